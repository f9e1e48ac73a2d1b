//! Parallel-mode backend: every call becomes an HTTP request to the
//! Coordinator service, with bounded exponential backoff on transient
//! failures (spec §5). Retry budget and status-code handling mirror the
//! teacher's REST client conventions (`rest/routes/*`'s `{"error": ...}`
//! envelope) read in reverse — here we're the caller, not the handler.

use super::ClientBackend;
use crate::error::{CoreError, CoreResult};
use crate::store::model::{Session, SessionRole, Task, Template, TemplateSubtask};
use crate::store::ops::{BulkResult, SubtaskProgress, TaskEdits};
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::time::Duration;

const MAX_ATTEMPTS: u32 = 5;
const BACKOFF_CAP: Duration = Duration::from_secs(8);

pub struct ParallelBackend {
    client: reqwest::Client,
    base_url: String,
    deadline: Duration,
}

impl ParallelBackend {
    /// `port` is the coordinator's actually-bound port, read from the
    /// `.parallel-mode` sentinel rather than assumed from this process's own
    /// `ClaudiaConfig::port` — the coordinator may have been started with an
    /// explicit override.
    pub fn new(port: u16, deadline: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: format!("http://127.0.0.1:{port}"),
            deadline,
        }
    }

    /// Backoff doubling from 500ms, capped at 8s, never retrying a 4xx
    /// (those are the caller's fault, not a transient coordinator hiccup).
    async fn call<T: DeserializeOwned>(&self, method: Method, path: &str, body: Option<Value>) -> CoreResult<T> {
        let mut delay = Duration::from_millis(500);
        let mut last_err = CoreError::Unavailable("coordinator never responded".into());

        for attempt in 1..=MAX_ATTEMPTS {
            let mut req = self
                .client
                .request(method.clone(), format!("{}{}", self.base_url, path))
                .timeout(self.deadline);
            if let Some(body) = &body {
                req = req.json(body);
            }

            match req.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if status.is_success() {
                        return resp.json::<T>().await.map_err(|e| CoreError::Internal(e.to_string()));
                    }
                    let err = parse_error_body(resp).await;
                    if status.is_client_error() && status != StatusCode::SERVICE_UNAVAILABLE {
                        return Err(err);
                    }
                    last_err = err;
                }
                Err(e) => {
                    last_err = CoreError::Unavailable(e.to_string());
                }
            }

            if attempt < MAX_ATTEMPTS {
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(BACKOFF_CAP);
            }
        }
        Err(last_err)
    }
}

async fn parse_error_body(resp: reqwest::Response) -> CoreError {
    match resp.json::<Value>().await {
        Ok(body) => {
            let tag = body.get("kind").and_then(Value::as_str).unwrap_or("internal");
            let message = body
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("coordinator returned an error")
                .to_string();
            CoreError::from_tag(tag, message)
        }
        Err(_) => CoreError::Internal("coordinator returned a malformed error body".into()),
    }
}

#[async_trait]
impl ClientBackend for ParallelBackend {
    async fn register_session(
        &self,
        session_id: &str,
        role: SessionRole,
        context: &str,
        labels: BTreeSet<String>,
    ) -> CoreResult<Session> {
        self.call(
            Method::POST,
            "/session/register",
            Some(json!({ "session_id": session_id, "role": role, "context": context, "labels": labels })),
        )
        .await
    }

    async fn heartbeat(&self, session_id: &str) -> CoreResult<()> {
        self.call(Method::POST, "/session/heartbeat", Some(json!({ "session_id": session_id })))
            .await
    }

    async fn end_session(&self, session_id: &str) -> CoreResult<()> {
        self.call(Method::POST, "/session/end", Some(json!({ "session_id": session_id })))
            .await
    }

    async fn create_task(
        &self,
        title: String,
        description: String,
        priority: Option<u8>,
        labels: BTreeSet<String>,
        blocked_by: Vec<String>,
    ) -> CoreResult<Task> {
        self.call(
            Method::POST,
            "/task/create",
            Some(json!({
                "title": title, "description": description, "priority": priority,
                "labels": labels, "blocked_by": blocked_by,
            })),
        )
        .await
    }

    async fn list_tasks(&self) -> CoreResult<Vec<Task>> {
        self.call(Method::GET, "/tasks", None).await
    }

    async fn request_task(
        &self,
        session_id: &str,
        preferred_labels: Option<BTreeSet<String>>,
    ) -> CoreResult<Option<Task>> {
        self.call(
            Method::POST,
            "/task/request",
            Some(json!({ "session_id": session_id, "preferred_labels": preferred_labels })),
        )
        .await
    }

    async fn complete_task(
        &self,
        task_id: &str,
        session_id: &str,
        note: Option<String>,
        branch: Option<String>,
        force: bool,
    ) -> CoreResult<Task> {
        self.call(
            Method::POST,
            "/task/complete",
            Some(json!({
                "task_id": task_id, "session_id": session_id, "note": note,
                "branch": branch, "force": force,
            })),
        )
        .await
    }

    async fn reopen_task(&self, task_id: &str, note: Option<String>) -> CoreResult<Task> {
        self.call(Method::POST, "/task/reopen", Some(json!({ "task_id": task_id, "note": note })))
            .await
    }

    async fn edit_task(&self, task_id: &str, edits: TaskEdits) -> CoreResult<Task> {
        self.call(
            Method::POST,
            "/task/edit",
            Some(json!({
                "task_id": task_id,
                "title": edits.title,
                "description": edits.description,
                "priority": edits.priority,
                "labels": edits.labels,
                "blocked_by": edits.blocked_by,
                "status": edits.status,
            })),
        )
        .await
    }

    async fn delete_task(&self, task_id: &str, force: bool) -> CoreResult<()> {
        self.call(Method::POST, "/task/delete", Some(json!({ "task_id": task_id, "force": force })))
            .await
    }

    async fn add_note(&self, task_id: &str, session_id: &str, note: String) -> CoreResult<()> {
        self.call(
            Method::POST,
            "/task/note",
            Some(json!({ "task_id": task_id, "session_id": session_id, "note": note })),
        )
        .await
    }

    async fn bulk_complete(&self, task_ids: Vec<String>, note: Option<String>) -> CoreResult<BulkResult> {
        self.call(
            Method::POST,
            "/task/bulk-complete",
            Some(json!({ "task_ids": task_ids, "note": note })),
        )
        .await
    }

    async fn create_subtask(&self, parent_id: &str, title: String, description: String) -> CoreResult<Task> {
        self.call(
            Method::POST,
            "/subtask/create",
            Some(json!({ "parent_id": parent_id, "title": title, "description": description })),
        )
        .await
    }

    async fn subtask_progress(&self, parent_id: &str) -> CoreResult<SubtaskProgress> {
        self.call(Method::GET, &format!("/subtask/progress?parent_id={parent_id}"), None).await
    }

    async fn instantiate_template(&self, template_id: &str, title: String) -> CoreResult<Task> {
        self.call(
            Method::POST,
            "/template/instantiate",
            Some(json!({ "template_id": template_id, "title": title })),
        )
        .await
    }

    async fn create_template(
        &self,
        name: String,
        default_priority: u8,
        default_labels: BTreeSet<String>,
        subtasks: Vec<TemplateSubtask>,
    ) -> CoreResult<Template> {
        self.call(
            Method::POST,
            "/template/create",
            Some(json!({
                "name": name, "default_priority": default_priority,
                "default_labels": default_labels, "subtasks": subtasks,
            })),
        )
        .await
    }
}
