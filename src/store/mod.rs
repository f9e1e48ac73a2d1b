//! The Store (spec §4.1): the single place that ever touches `tasks.json`,
//! `templates.json`, `history.jsonl`, and the per-session snapshot files
//! under `sessions/`. Every mutation runs inside `transaction`, which is the
//! load → mutate → validate → persist → release cycle the teacher's
//! `storage/mod.rs` (`claim_session_for_run`, `recover_stale_sessions`)
//! performs against SQLite — here performed against flat JSON files guarded
//! by an OS advisory lock instead of a database transaction.

pub mod events;
pub mod lock;
pub mod model;
pub mod ops;
pub mod persistence;
pub mod validate;

use crate::config::ClaudiaConfig;
use crate::error::{CoreError, CoreResult};
use events::Event;
use model::{Session, Task, Template, TemplateSubtask, TemplatesFile, TasksFile};
use ops::{BulkResult, NewTask, SubtaskProgress, TaskEdits};
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

/// Owns the on-disk state directory. Cheap to clone (an `Arc<ClaudiaConfig>`
/// inside) and safe to share across the Coordinator's axum handlers — the
/// per-call lock is what actually serializes writers, not a `Mutex` on the
/// `Store` itself.
#[derive(Clone)]
pub struct Store {
    config: Arc<ClaudiaConfig>,
}

impl Store {
    pub fn new(config: Arc<ClaudiaConfig>) -> Self {
        Self { config }
    }

    /// Acquire the exclusive lock, load `tasks.json`, run `f` against a
    /// mutable copy, validate invariants, persist atomically, append any
    /// returned events to `history.jsonl`, then release the lock. `f` runs
    /// on a blocking thread since `fs2` locking and `fs::rename` are
    /// synchronous.
    async fn transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut TasksFile) -> CoreResult<(T, Vec<Event>)> + Send + 'static,
        T: Send + 'static,
    {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = lock::acquire_exclusive(&config.lock_path(), config.lock_timeout)?;
            let mut file: TasksFile = persistence::read_json_or_default(&config.tasks_path())?;

            let (result, events) = f(&mut file)?;
            validate::validate_invariants(&file)?;
            persistence::write_json_atomic(&config.tasks_path(), &file)?;
            for event in &events {
                persistence::append_jsonl(&config.history_path(), event)?;
            }
            Ok(result)
        })
        .await
        .map_err(|e| CoreError::Internal(format!("store transaction panicked: {e}")))?
    }

    /// Read-only snapshot under a shared view of the same lock file — no
    /// mutation, so any transient reader contention just means a short wait.
    async fn read_snapshot(&self) -> CoreResult<TasksFile> {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = lock::acquire_exclusive(&config.lock_path(), config.lock_timeout)?;
            persistence::read_json_or_default::<TasksFile>(&config.tasks_path())
        })
        .await
        .map_err(|e| CoreError::Internal(format!("store read panicked: {e}")))?
    }

    pub async fn create_task(
        &self,
        title: String,
        description: String,
        priority: Option<u8>,
        labels: BTreeSet<String>,
        blocked_by: Vec<String>,
    ) -> CoreResult<Task> {
        self.transaction(move |file| {
            ops::create_task(
                file,
                NewTask {
                    title,
                    description,
                    priority,
                    labels,
                    blocked_by,
                    parent_id: None,
                },
            )
        })
        .await
    }

    pub async fn get_task(&self, task_id: &str) -> CoreResult<Task> {
        let snapshot = self.read_snapshot().await?;
        ops::find_task(&snapshot, task_id).cloned()
    }

    pub async fn list_tasks(&self) -> CoreResult<Vec<Task>> {
        Ok(self.read_snapshot().await?.tasks)
    }

    pub async fn request_task(
        &self,
        session: Session,
        preferred_labels: Option<BTreeSet<String>>,
        current_claims: usize,
    ) -> CoreResult<Option<Task>> {
        let max_concurrent = self.config.max_concurrent;
        self.transaction(move |file| {
            ops::request_task(
                file,
                &session,
                preferred_labels.as_ref(),
                current_claims,
                max_concurrent,
            )
        })
        .await
    }

    pub async fn complete_task(
        &self,
        task_id: String,
        session_id: String,
        note: Option<String>,
        branch: Option<String>,
        force: bool,
    ) -> CoreResult<Task> {
        let auto_complete = self.config.auto_complete_parents;
        self.transaction(move |file| {
            let parent_id = ops::find_task(file, &task_id)?.parent_id.clone();
            let (task, mut events) =
                ops::complete_task(file, &task_id, &session_id, note, branch, force)?;
            if let Some(parent_id) = parent_id {
                events.extend(ops::maybe_auto_complete_parent(file, &parent_id, auto_complete)?);
            }
            Ok((task, events))
        })
        .await
    }

    pub async fn reopen_task(&self, task_id: String, note: Option<String>) -> CoreResult<Task> {
        self.transaction(move |file| ops::reopen_task(file, &task_id, note)).await
    }

    pub async fn edit_task(&self, task_id: String, edits: TaskEdits) -> CoreResult<Task> {
        self.transaction(move |file| ops::edit_task(file, &task_id, edits)).await
    }

    pub async fn delete_task(&self, task_id: String, force: bool) -> CoreResult<()> {
        self.transaction(move |file| ops::delete_task(file, &task_id, force)).await
    }

    pub async fn add_note(&self, task_id: String, session_id: String, note: String) -> CoreResult<()> {
        self.transaction(move |file| ops::add_note(file, &task_id, &session_id, &note)).await
    }

    pub async fn bulk_complete(&self, task_ids: Vec<String>, note: Option<String>) -> CoreResult<BulkResult> {
        self.transaction(move |file| ops::bulk_complete(file, &task_ids, note.as_deref())).await
    }

    pub async fn create_subtask(
        &self,
        parent_id: String,
        title: String,
        description: String,
    ) -> CoreResult<Task> {
        self.transaction(move |file| ops::create_subtask(file, &parent_id, title, description))
            .await
    }

    pub async fn subtask_progress(&self, parent_id: &str) -> CoreResult<SubtaskProgress> {
        let snapshot = self.read_snapshot().await?;
        ops::subtask_progress(&snapshot, parent_id)
    }

    pub async fn start_timer(&self, task_id: String) -> CoreResult<Task> {
        self.transaction(move |file| ops::start_timer(file, &task_id)).await
    }

    pub async fn stop_timer(&self, task_id: String) -> CoreResult<Task> {
        self.transaction(move |file| ops::stop_timer(file, &task_id)).await
    }

    /// Archive `done` tasks older than the configured retention window,
    /// appending each to `archive.jsonl` before removing it from
    /// `tasks.json`.
    pub async fn archive_done_tasks(&self) -> CoreResult<Vec<Task>> {
        let days = self.config.archive_days;
        let archive_path = self.config.archive_path();
        self.transaction(move |file| {
            let (archived, events) = ops::archive_done_tasks(file, days)?;
            for task in &archived {
                persistence::append_jsonl(&archive_path, task)?;
            }
            Ok((archived, events))
        })
        .await
    }

    /// Undo the most recent reversible event in `history.jsonl` (spec
    /// §4.6). Fails with `Conflict` if the tail event carries no
    /// `undo_hint` (irreversible, or history is empty).
    pub async fn undo_last_action(&self) -> CoreResult<Task> {
        let history_path = self.config.history_path();
        let tail = persistence::read_jsonl_tail::<Event>(&history_path)?
            .ok_or_else(|| CoreError::Conflict("no history to undo".into()))?;
        let hint = tail
            .undo_hint
            .ok_or_else(|| CoreError::Conflict("most recent action is not reversible".into()))?;
        self.transaction(move |file| ops::apply_undo(file, &hint)).await
    }

    // --- Templates -------------------------------------------------------

    async fn templates_transaction<F, T>(&self, f: F) -> CoreResult<T>
    where
        F: FnOnce(&mut TemplatesFile) -> CoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let config = self.config.clone();
        tokio::task::spawn_blocking(move || {
            let _guard = lock::acquire_exclusive(&config.lock_path(), config.lock_timeout)?;
            let mut file: TemplatesFile = persistence::read_json_or_default(&config.templates_path())?;
            let result = f(&mut file)?;
            persistence::write_json_atomic(&config.templates_path(), &file)?;
            Ok(result)
        })
        .await
        .map_err(|e| CoreError::Internal(format!("template transaction panicked: {e}")))?
    }

    pub async fn create_template(
        &self,
        name: String,
        default_priority: u8,
        default_labels: BTreeSet<String>,
        subtasks: Vec<TemplateSubtask>,
    ) -> CoreResult<Template> {
        self.templates_transaction(move |file| {
            let id = format!("tmpl-{:03}", file.templates.len() + 1);
            let template = Template {
                id,
                name,
                default_priority,
                default_labels,
                subtasks,
            };
            file.templates.push(template.clone());
            Ok(template)
        })
        .await
    }

    pub async fn get_template(&self, template_id: &str) -> CoreResult<Template> {
        let config = self.config.clone();
        let template_id = template_id.to_string();
        tokio::task::spawn_blocking(move || {
            let file: TemplatesFile = persistence::read_json_or_default(&config.templates_path())?;
            file.templates
                .into_iter()
                .find(|t| t.id == template_id)
                .ok_or_else(|| CoreError::NotFound(format!("template {template_id} not found")))
        })
        .await
        .map_err(|e| CoreError::Internal(format!("template read panicked: {e}")))?
    }

    /// Instantiate a template: create the parent task, then one subtask per
    /// `TemplateSubtask`, inheriting the template's default priority and
    /// labels (spec §4.4).
    pub async fn instantiate_template(&self, template_id: &str, title: String) -> CoreResult<Task> {
        let template = self.get_template(template_id).await?;
        self.transaction(move |file| {
            let (parent, mut events) = ops::create_task(
                file,
                NewTask {
                    title,
                    description: String::new(),
                    priority: Some(template.default_priority),
                    labels: template.default_labels.clone(),
                    blocked_by: Vec::new(),
                    parent_id: None,
                },
            )?;
            for subtask in &template.subtasks {
                let (_, mut sub_events) = ops::create_subtask(
                    file,
                    &parent.id,
                    subtask.title.clone(),
                    subtask.description.clone(),
                )?;
                events.append(&mut sub_events);
            }
            events.push(Event::new(
                events::EventKind::TemplateInstantiated,
                None,
                serde_json::json!({ "template_id": template.id, "task_id": parent.id }),
            ));
            let final_task = ops::find_task(file, &parent.id)?.clone();
            Ok((final_task, events))
        })
        .await
    }

    // --- Session snapshots -------------------------------------------------
    // The Coordinator mirrors `SessionRegistry` state here so a restarted
    // coordinator (or a single-mode reader inspecting the state dir
    // directly) can see who was live without replaying `history.jsonl`.

    fn session_path(&self, session_id: &str) -> std::path::PathBuf {
        self.config.sessions_dir().join(format!("{session_id}.json"))
    }

    pub async fn write_session_snapshot(&self, session: Session) -> CoreResult<()> {
        let path = self.session_path(&session.session_id);
        tokio::task::spawn_blocking(move || persistence::write_json_atomic(&path, &session))
            .await
            .map_err(|e| CoreError::Internal(format!("session snapshot write panicked: {e}")))?
    }

    pub async fn remove_session_snapshot(&self, session_id: &str) -> CoreResult<()> {
        let path = self.session_path(session_id);
        tokio::task::spawn_blocking(move || match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(CoreError::from(e)),
        })
        .await
        .map_err(|e| CoreError::Internal(format!("session snapshot remove panicked: {e}")))?
    }

    pub async fn list_session_snapshots(&self) -> CoreResult<Vec<Session>> {
        let dir = self.config.sessions_dir();
        tokio::task::spawn_blocking(move || {
            let mut sessions = Vec::new();
            let entries = match std::fs::read_dir(&dir) {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(sessions),
                Err(e) => return Err(CoreError::from(e)),
            };
            for entry in entries {
                let entry = entry?;
                if entry.path().extension().and_then(|e| e.to_str()) == Some("json") {
                    let session: Session = persistence::read_json_or_default(&entry.path())?;
                    sessions.push(session);
                }
            }
            Ok(sessions)
        })
        .await
        .map_err(|e| CoreError::Internal(format!("session snapshot list panicked: {e}")))?
    }

    pub fn lock_timeout(&self) -> Duration {
        self.config.lock_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::SessionRole;
    use chrono::Utc;
    use tempfile::tempdir;

    fn test_config(dir: &std::path::Path) -> Arc<ClaudiaConfig> {
        Arc::new(ClaudiaConfig::new(None, Some(dir.to_path_buf()), None))
    }

    fn test_session(id: &str) -> Session {
        Session {
            session_id: id.to_string(),
            role: SessionRole::Worker,
            context: String::new(),
            labels: BTreeSet::new(),
            started_at: Utc::now(),
            last_heartbeat: Utc::now(),
            working_on: None,
        }
    }

    #[tokio::test]
    async fn create_then_get_round_trips() {
        let dir = tempdir().unwrap();
        let store = Store::new(test_config(dir.path()));
        let created = store
            .create_task("Do the thing".into(), "".into(), None, BTreeSet::new(), Vec::new())
            .await
            .unwrap();
        let fetched = store.get_task(&created.id).await.unwrap();
        assert_eq!(fetched.id, created.id);
        assert_eq!(fetched.title, "Do the thing");
    }

    #[tokio::test]
    async fn complete_requires_ownership_unless_forced() {
        let dir = tempdir().unwrap();
        let store = Store::new(test_config(dir.path()));
        let task = store
            .create_task("t".into(), "".into(), None, BTreeSet::new(), Vec::new())
            .await
            .unwrap();
        let session = test_session("sess-a");
        store
            .request_task(session.clone(), None, 0)
            .await
            .unwrap();

        let err = store
            .complete_task(task.id.clone(), "sess-b".into(), None, None, false)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Conflict(_)));

        let done = store
            .complete_task(task.id.clone(), "sess-a".into(), None, None, false)
            .await
            .unwrap();
        assert_eq!(done.status, model::TaskStatus::Done);
    }

    #[tokio::test]
    async fn undo_reverses_completion() {
        let dir = tempdir().unwrap();
        let store = Store::new(test_config(dir.path()));
        let task = store
            .create_task("t".into(), "".into(), None, BTreeSet::new(), Vec::new())
            .await
            .unwrap();
        store
            .complete_task(task.id.clone(), "sess-a".into(), None, None, true)
            .await
            .unwrap();
        let reverted = store.undo_last_action().await.unwrap();
        assert_eq!(reverted.id, task.id);
        assert_eq!(reverted.status, model::TaskStatus::Open);
    }

    #[tokio::test]
    async fn subtask_progress_tracks_completion() {
        let dir = tempdir().unwrap();
        let store = Store::new(test_config(dir.path()));
        let parent = store
            .create_task("parent".into(), "".into(), None, BTreeSet::new(), Vec::new())
            .await
            .unwrap();
        let child = store
            .create_subtask(parent.id.clone(), "child".into(), "".into())
            .await
            .unwrap();
        let progress = store.subtask_progress(&parent.id).await.unwrap();
        assert_eq!(progress.total, 1);
        assert_eq!(progress.done, 0);

        store
            .complete_task(child.id, "sess-a".into(), None, None, true)
            .await
            .unwrap();
        let progress = store.subtask_progress(&parent.id).await.unwrap();
        assert_eq!(progress.done, 1);
        assert_eq!(progress.percentage, 100.0);
    }

    #[tokio::test]
    async fn session_snapshot_round_trips() {
        let dir = tempdir().unwrap();
        let store = Store::new(test_config(dir.path()));
        store.write_session_snapshot(test_session("sess-a")).await.unwrap();
        let listed = store.list_session_snapshots().await.unwrap();
        assert_eq!(listed.len(), 1);
        store.remove_session_snapshot("sess-a").await.unwrap();
        let listed = store.list_session_snapshots().await.unwrap();
        assert!(listed.is_empty());
    }
}
