//! Atomic write protocol (spec §4.1): serialize → write to `<path>.tmp` in
//! the same directory → fsync (best effort) → rename over the target. A
//! reader that opens the file between renames sees either the pre- or
//! post-state, never a torn write. Mirrors the teacher's append-only
//! `AuditLog` discipline of never rewriting a file in place, extended here
//! to whole-file snapshots instead of append-only lines.

use crate::error::CoreError;
use serde::{de::DeserializeOwned, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

/// Pretty-printed, newline-terminated JSON, UTF-8 — matches spec §6's
/// `tasks.json` format exactly.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), CoreError> {
    let mut body = serde_json::to_string_pretty(value)?;
    body.push('\n');

    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let tmp_path = dir.join(format!(
        ".{}.tmp",
        path.file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "tmp".to_string())
    ));

    {
        let mut tmp = File::create(&tmp_path)?;
        tmp.write_all(body.as_bytes())?;
        let _ = tmp.sync_all();
    }
    fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Load `path` as JSON, returning `default` if the file does not exist yet
/// (first run on a fresh state directory).
pub fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, CoreError> {
    match fs::read_to_string(path) {
        Ok(contents) => Ok(serde_json::from_str(&contents)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Append one JSON-encoded line to an append-only `.jsonl` log
/// (`history.jsonl`, `archive.jsonl`). Never rewritten — only ever opened
/// in append mode.
pub fn append_jsonl<T: Serialize>(path: &Path, value: &T) -> Result<(), CoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let line = serde_json::to_string(value)? + "\n";
    let mut file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    file.write_all(line.as_bytes())?;
    Ok(())
}

/// Read every line of a `.jsonl` log, skipping any trailing blank line.
pub fn read_jsonl<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, CoreError> {
    match fs::read_to_string(path) {
        Ok(contents) => contents
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(|l| serde_json::from_str(l).map_err(CoreError::from))
            .collect(),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

/// Read only the last line of a `.jsonl` log (used by `undo_last_action` to
/// fetch the tail event without loading the entire history into memory for
/// large logs). Falls back to a full scan — simple and correct; history
/// logs in single-project use stay small enough that this is not a
/// bottleneck.
pub fn read_jsonl_tail<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CoreError> {
    let mut all: Vec<T> = read_jsonl(path)?;
    Ok(all.pop())
}
