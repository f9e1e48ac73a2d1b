//! `{state_dir}/claudia.toml` — all fields optional overrides.
//! Priority: CLI / env var > TOML > built-in default.
//!
//! Mirrors the teacher's `DaemonConfig::new` layering exactly.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::error;

const DEFAULT_PORT: u16 = 4400;
const DEFAULT_LOCK_TIMEOUT_SECS: u64 = 10;
const DEFAULT_CLEANUP_THRESHOLD_SECS: i64 = 180;
const DEFAULT_HEARTBEAT_WARN_SECS: i64 = 60;
const DEFAULT_HEARTBEAT_DANGER_SECS: i64 = 120;
const DEFAULT_MAX_CONCURRENT: usize = 1;
const DEFAULT_ARCHIVE_DAYS: i64 = 14;
const DEFAULT_CLIENT_DEADLINE_SECS: u64 = 5;

#[derive(Deserialize, Default)]
struct TomlConfig {
    port: Option<u16>,
    lock_timeout_secs: Option<u64>,
    cleanup_threshold_secs: Option<i64>,
    heartbeat_warn_secs: Option<i64>,
    heartbeat_danger_secs: Option<i64>,
    max_concurrent: Option<usize>,
    archive_days: Option<i64>,
    client_deadline_secs: Option<u64>,
    log: Option<String>,
    auto_complete_parents: Option<bool>,
}

fn load_toml(state_dir: &Path) -> Option<TomlConfig> {
    let path = state_dir.join("claudia.toml");
    let contents = std::fs::read_to_string(&path).ok()?;
    match toml::from_str::<TomlConfig>(&contents) {
        Ok(cfg) => Some(cfg),
        Err(e) => {
            error!(path = %path.display(), err = %e, "failed to parse claudia.toml — using defaults");
            None
        }
    }
}

/// Resolved configuration for every coordination-core component. Built once
/// at process startup and shared via `Arc` the way `clawd::AppContext` shares
/// its `DaemonConfig`.
#[derive(Debug, Clone)]
pub struct ClaudiaConfig {
    pub state_dir: PathBuf,
    pub port: u16,
    pub lock_timeout: std::time::Duration,
    /// Session considered dead and reclaimed after this many seconds without
    /// a heartbeat (spec §4.3, default 180s).
    pub cleanup_threshold_secs: i64,
    /// Dashboard soft warning thresholds (spec §4.3) — the registry itself
    /// never reclaims at these; only `cleanup_threshold_secs` does.
    pub heartbeat_warn_secs: i64,
    pub heartbeat_danger_secs: i64,
    /// Claims a single session may hold concurrently (spec §4.2, default 1).
    pub max_concurrent: usize,
    /// Archive `done` tasks older than this many days (spec §3 Lifecycle).
    pub archive_days: i64,
    /// Client façade's per-request deadline before the backoff-retry path
    /// triggers (spec §5, default 5s).
    pub client_deadline: std::time::Duration,
    pub log: String,
    /// Open Question #1 (spec §9) — off by default.
    pub auto_complete_parents: bool,
    /// Session id recorded in the `.parallel-mode` sentinel (spec §6) — the
    /// session that started the coordinator, if any.
    pub main_session: Option<String>,
}

impl ClaudiaConfig {
    pub fn new(port: Option<u16>, state_dir: Option<PathBuf>, log: Option<String>) -> Self {
        Self::with_main_session(port, state_dir, log, None)
    }

    pub fn with_main_session(
        port: Option<u16>,
        state_dir: Option<PathBuf>,
        log: Option<String>,
        main_session: Option<String>,
    ) -> Self {
        let state_dir = state_dir.unwrap_or_else(default_state_dir);
        let toml = load_toml(&state_dir).unwrap_or_default();

        let port = port.or(toml.port).unwrap_or(DEFAULT_PORT);
        let log = log.or(toml.log).unwrap_or_else(|| "info".to_string());

        Self {
            port,
            log,
            lock_timeout: std::time::Duration::from_secs(
                toml.lock_timeout_secs.unwrap_or(DEFAULT_LOCK_TIMEOUT_SECS),
            ),
            cleanup_threshold_secs: toml
                .cleanup_threshold_secs
                .unwrap_or(DEFAULT_CLEANUP_THRESHOLD_SECS),
            heartbeat_warn_secs: toml
                .heartbeat_warn_secs
                .unwrap_or(DEFAULT_HEARTBEAT_WARN_SECS),
            heartbeat_danger_secs: toml
                .heartbeat_danger_secs
                .unwrap_or(DEFAULT_HEARTBEAT_DANGER_SECS),
            max_concurrent: toml.max_concurrent.unwrap_or(DEFAULT_MAX_CONCURRENT),
            archive_days: toml.archive_days.unwrap_or(DEFAULT_ARCHIVE_DAYS),
            client_deadline: std::time::Duration::from_secs(
                toml.client_deadline_secs
                    .unwrap_or(DEFAULT_CLIENT_DEADLINE_SECS),
            ),
            auto_complete_parents: toml.auto_complete_parents.unwrap_or(false),
            main_session,
            state_dir,
        }
    }

    pub fn tasks_path(&self) -> PathBuf {
        self.state_dir.join("tasks.json")
    }

    pub fn templates_path(&self) -> PathBuf {
        self.state_dir.join("templates.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join("history.jsonl")
    }

    pub fn archive_path(&self) -> PathBuf {
        self.state_dir.join("archive.jsonl")
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join(".lock")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.state_dir.join("sessions")
    }

    pub fn parallel_mode_path(&self) -> PathBuf {
        self.state_dir.join(".parallel-mode")
    }

    pub fn coordinator_pid_path(&self) -> PathBuf {
        self.state_dir.join("coordinator.pid")
    }
}

fn default_state_dir() -> PathBuf {
    std::env::var("CLAUDIA_STATE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(".agent-state"))
}
