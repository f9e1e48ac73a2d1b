//! Single-mode backend: one process, direct `Store` access, no HTTP hop.
//! Used when no coordinator is running — each session just locks the state
//! directory itself for the duration of its own transaction.

use super::ClientBackend;
use crate::clock::SystemClock;
use crate::config::ClaudiaConfig;
use crate::error::CoreResult;
use crate::session::SessionRegistry;
use crate::store::model::{Session, SessionRole, Task, Template, TemplateSubtask};
use crate::store::ops::{BulkResult, SubtaskProgress, TaskEdits};
use crate::store::Store;
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;

pub struct SingleBackend {
    store: Store,
    sessions: SessionRegistry,
}

impl SingleBackend {
    pub fn new(config: Arc<ClaudiaConfig>) -> Self {
        let sessions = SessionRegistry::new(
            Arc::new(SystemClock),
            config.heartbeat_warn_secs,
            config.heartbeat_danger_secs,
        );
        Self {
            store: Store::new(config),
            sessions,
        }
    }
}

#[async_trait]
impl ClientBackend for SingleBackend {
    async fn register_session(
        &self,
        session_id: &str,
        role: SessionRole,
        context: &str,
        labels: BTreeSet<String>,
    ) -> CoreResult<Session> {
        let session = self.sessions.register(session_id, role, context, labels).await;
        self.store.write_session_snapshot(session.clone()).await?;
        Ok(session)
    }

    async fn heartbeat(&self, session_id: &str) -> CoreResult<()> {
        self.sessions.heartbeat(session_id).await
    }

    async fn end_session(&self, session_id: &str) -> CoreResult<()> {
        let held_task = self.sessions.end(session_id).await?;
        self.store.remove_session_snapshot(session_id).await?;
        if let Some(task_id) = held_task {
            self.store.reopen_task(task_id, Some("session ended".into())).await?;
        }
        Ok(())
    }

    async fn create_task(
        &self,
        title: String,
        description: String,
        priority: Option<u8>,
        labels: BTreeSet<String>,
        blocked_by: Vec<String>,
    ) -> CoreResult<Task> {
        self.store
            .create_task(title, description, priority, labels, blocked_by)
            .await
    }

    async fn list_tasks(&self) -> CoreResult<Vec<Task>> {
        self.store.list_tasks().await
    }

    async fn request_task(
        &self,
        session_id: &str,
        preferred_labels: Option<BTreeSet<String>>,
    ) -> CoreResult<Option<Task>> {
        let session = self.sessions.ensure_fresh(session_id).await?;
        let claims = self.sessions.claim_count(session_id).await;
        let task = self.store.request_task(session, preferred_labels, claims).await?;
        if let Some(task) = &task {
            self.sessions.set_working_on(session_id, Some(task.id.clone())).await?;
        }
        Ok(task)
    }

    async fn complete_task(
        &self,
        task_id: &str,
        session_id: &str,
        note: Option<String>,
        branch: Option<String>,
        force: bool,
    ) -> CoreResult<Task> {
        self.sessions.ensure_fresh(session_id).await?;
        let task = self
            .store
            .complete_task(task_id.to_string(), session_id.to_string(), note, branch, force)
            .await?;
        let _ = self.sessions.set_working_on(session_id, None).await;
        Ok(task)
    }

    async fn reopen_task(&self, task_id: &str, note: Option<String>) -> CoreResult<Task> {
        self.store.reopen_task(task_id.to_string(), note).await
    }

    async fn edit_task(&self, task_id: &str, edits: TaskEdits) -> CoreResult<Task> {
        self.store.edit_task(task_id.to_string(), edits).await
    }

    async fn delete_task(&self, task_id: &str, force: bool) -> CoreResult<()> {
        self.store.delete_task(task_id.to_string(), force).await
    }

    async fn add_note(&self, task_id: &str, session_id: &str, note: String) -> CoreResult<()> {
        self.store
            .add_note(task_id.to_string(), session_id.to_string(), note)
            .await
    }

    async fn bulk_complete(&self, task_ids: Vec<String>, note: Option<String>) -> CoreResult<BulkResult> {
        self.store.bulk_complete(task_ids, note).await
    }

    async fn create_subtask(&self, parent_id: &str, title: String, description: String) -> CoreResult<Task> {
        self.store.create_subtask(parent_id.to_string(), title, description).await
    }

    async fn subtask_progress(&self, parent_id: &str) -> CoreResult<SubtaskProgress> {
        self.store.subtask_progress(parent_id).await
    }

    async fn instantiate_template(&self, template_id: &str, title: String) -> CoreResult<Task> {
        self.store.instantiate_template(template_id, title).await
    }

    async fn create_template(
        &self,
        name: String,
        default_priority: u8,
        default_labels: BTreeSet<String>,
        subtasks: Vec<TemplateSubtask>,
    ) -> CoreResult<Template> {
        self.store
            .create_template(name, default_priority, default_labels, subtasks)
            .await
    }
}
