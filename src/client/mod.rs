//! Client façade (spec §5): the one API session-side code calls regardless
//! of mode. Mode detection and dispatch mirror the teacher's `Runner` trait
//! (`session/runner.rs`) — a single async-trait object swapped out per
//! backend (`ClaudeCodeRunner`/`CodexRunner`/`CursorRunner` there;
//! `SingleBackend`/`ParallelBackend` here) so callers never branch on mode
//! themselves.

mod parallel;
mod single;

pub use parallel::ParallelBackend;
pub use single::SingleBackend;

use crate::config::ClaudiaConfig;
use crate::error::CoreResult;
use crate::store::model::{Session, Task, Template, TemplateSubtask};
use crate::store::ops::{BulkResult, SubtaskProgress, TaskEdits};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Every operation the Coordinator's HTTP API and the single-mode Store
/// expose, behind one trait so `Agent` can hold either backend as a trait
/// object (spec §4.5 — both modes must be semantically equivalent).
#[async_trait]
pub trait ClientBackend: Send + Sync {
    async fn register_session(
        &self,
        session_id: &str,
        role: crate::store::model::SessionRole,
        context: &str,
        labels: BTreeSet<String>,
    ) -> CoreResult<Session>;
    async fn heartbeat(&self, session_id: &str) -> CoreResult<()>;
    async fn end_session(&self, session_id: &str) -> CoreResult<()>;

    async fn create_task(
        &self,
        title: String,
        description: String,
        priority: Option<u8>,
        labels: BTreeSet<String>,
        blocked_by: Vec<String>,
    ) -> CoreResult<Task>;
    async fn list_tasks(&self) -> CoreResult<Vec<Task>>;
    async fn request_task(&self, session_id: &str, preferred_labels: Option<BTreeSet<String>>) -> CoreResult<Option<Task>>;
    async fn complete_task(
        &self,
        task_id: &str,
        session_id: &str,
        note: Option<String>,
        branch: Option<String>,
        force: bool,
    ) -> CoreResult<Task>;
    async fn reopen_task(&self, task_id: &str, note: Option<String>) -> CoreResult<Task>;
    async fn edit_task(&self, task_id: &str, edits: TaskEdits) -> CoreResult<Task>;
    async fn delete_task(&self, task_id: &str, force: bool) -> CoreResult<()>;
    async fn add_note(&self, task_id: &str, session_id: &str, note: String) -> CoreResult<()>;
    async fn bulk_complete(&self, task_ids: Vec<String>, note: Option<String>) -> CoreResult<BulkResult>;
    async fn create_subtask(&self, parent_id: &str, title: String, description: String) -> CoreResult<Task>;
    async fn subtask_progress(&self, parent_id: &str) -> CoreResult<SubtaskProgress>;
    async fn instantiate_template(&self, template_id: &str, title: String) -> CoreResult<Task>;
    async fn create_template(
        &self,
        name: String,
        default_priority: u8,
        default_labels: BTreeSet<String>,
        subtasks: Vec<TemplateSubtask>,
    ) -> CoreResult<Template>;
}

/// `.parallel-mode` sentinel body (spec §6): `{port, main_session}`. `port`
/// is the coordinator's actually-bound port, which may differ from this
/// process's own `ClaudiaConfig::port` if the coordinator was started with
/// an explicit override; `main_session` names the session that started it.
#[derive(Debug, Clone, Deserialize)]
pub struct ParallelModeSentinel {
    pub port: u16,
    #[serde(default)]
    pub main_session: Option<String>,
}

/// Whether a given state directory is under a running Coordinator (spec
/// §4.5), and if so, the sentinel it left behind. Detected by the
/// `.parallel-mode` sentinel plus a liveness check on the PID it names — a
/// sentinel left behind by a crashed coordinator must not wedge every
/// session into parallel mode forever.
pub fn read_parallel_mode(config: &ClaudiaConfig) -> Option<ParallelModeSentinel> {
    let body = std::fs::read_to_string(config.parallel_mode_path()).ok()?;
    let sentinel: ParallelModeSentinel = serde_json::from_str(&body).ok()?;
    let pid_contents = std::fs::read_to_string(config.coordinator_pid_path()).ok()?;
    let alive = pid_contents.trim().parse::<u32>().map(pid_is_alive).unwrap_or(false);
    alive.then_some(sentinel)
}

pub fn detect_parallel_mode(config: &ClaudiaConfig) -> bool {
    read_parallel_mode(config).is_some()
}

/// `kill(pid, 0)` is cheap but not free, and mode detection runs on every
/// `Agent::connect`; cache results for a second so a burst of session
/// start-ups doesn't hammer the syscall.
static LIVENESS_CACHE: once_cell::sync::Lazy<std::sync::Mutex<std::collections::HashMap<u32, (std::time::Instant, bool)>>> =
    once_cell::sync::Lazy::new(|| std::sync::Mutex::new(std::collections::HashMap::new()));

const LIVENESS_TTL: Duration = Duration::from_secs(1);

#[cfg(unix)]
fn pid_is_alive(pid: u32) -> bool {
    let mut cache = LIVENESS_CACHE.lock().unwrap();
    if let Some((checked_at, alive)) = cache.get(&pid) {
        if checked_at.elapsed() < LIVENESS_TTL {
            return *alive;
        }
    }
    // Signal 0 performs no action but still checks permissions/existence —
    // the standard liveness probe on POSIX.
    let alive = unsafe { libc::kill(pid as libc::pid_t, 0) == 0 };
    cache.insert(pid, (std::time::Instant::now(), alive));
    alive
}

#[cfg(not(unix))]
fn pid_is_alive(_pid: u32) -> bool {
    false
}

/// The façade handed to session-side code: resolves its mode once at
/// construction (re-checked only if a request later fails with
/// `Unavailable`, per spec §4.5) and dispatches every call through the
/// chosen backend uniformly.
pub struct Agent {
    backend: Arc<dyn ClientBackend>,
}

impl Agent {
    pub fn connect(config: Arc<ClaudiaConfig>) -> Self {
        let backend: Arc<dyn ClientBackend> = match read_parallel_mode(&config) {
            Some(sentinel) => Arc::new(ParallelBackend::new(sentinel.port, config.client_deadline)),
            None => Arc::new(SingleBackend::new(config)),
        };
        Self { backend }
    }

    pub fn backend(&self) -> &dyn ClientBackend {
        self.backend.as_ref()
    }
}
