//! HTTP handlers (spec §6). Signature shape — `State(extractor)` plus
//! `Result<Json<T>, CoreError>` — follows the teacher's
//! `rest/routes/sessions.rs`; `CoreError`'s `IntoResponse` impl gives every
//! handler the same `{"error": ..., "kind": ...}` envelope on failure.

use super::CoordinatorState;
use crate::error::{CoreError, CoreResult};
use crate::store::model::{Session, SessionRole, Task, Template, TemplateSubtask};
use crate::store::ops::{BulkResult, SubtaskProgress, TaskEdits};
use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use std::collections::BTreeSet;

pub async fn status(State(state): State<CoordinatorState>) -> Json<serde_json::Value> {
    let tasks = state.store.list_tasks().await.unwrap_or_default();
    let sessions = state.sessions.list().await;
    Json(serde_json::json!({
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "task_count": tasks.len(),
        "session_count": sessions.len(),
    }))
}

#[derive(Deserialize)]
pub struct ListTasksQuery {
    #[serde(default)]
    status: Option<String>,
}

pub async fn list_tasks(
    State(state): State<CoordinatorState>,
    Query(query): Query<ListTasksQuery>,
) -> CoreResult<Json<Vec<Task>>> {
    let tasks = state.store.list_tasks().await?;
    let filtered = match query.status {
        Some(raw) => {
            let wanted: crate::store::model::TaskStatus = raw
                .parse()
                .map_err(CoreError::InvalidArgument)?;
            tasks.into_iter().filter(|t| t.status == wanted).collect()
        }
        None => tasks,
    };
    Ok(Json(filtered))
}

/// Tasks grouped by their `branch` field (spec §6) — `null` groups tasks
/// with no branch recorded, typically anything not yet completed.
pub async fn parallel_summary(State(state): State<CoordinatorState>) -> CoreResult<Json<serde_json::Value>> {
    let tasks = state.store.list_tasks().await?;
    let mut by_branch: std::collections::BTreeMap<String, Vec<&Task>> = std::collections::BTreeMap::new();
    for task in &tasks {
        let key = task.branch.clone().unwrap_or_else(|| "unassigned".to_string());
        by_branch.entry(key).or_default().push(task);
    }
    Ok(Json(serde_json::json!(by_branch)))
}

#[derive(Deserialize)]
pub struct RegisterSessionReq {
    session_id: String,
    role: SessionRole,
    #[serde(default)]
    context: String,
    #[serde(default)]
    labels: BTreeSet<String>,
}

pub async fn register_session(
    State(state): State<CoordinatorState>,
    Json(req): Json<RegisterSessionReq>,
) -> CoreResult<Json<Session>> {
    let session = state
        .sessions
        .register(&req.session_id, req.role, &req.context, req.labels)
        .await;
    state.store.write_session_snapshot(session.clone()).await?;
    Ok(Json(session))
}

#[derive(Deserialize)]
pub struct SessionIdReq {
    session_id: String,
}

pub async fn heartbeat(
    State(state): State<CoordinatorState>,
    Json(req): Json<SessionIdReq>,
) -> CoreResult<Json<()>> {
    state.sessions.heartbeat(&req.session_id).await?;
    Ok(Json(()))
}

#[derive(Deserialize)]
pub struct EndSessionReq {
    session_id: String,
    /// Release the held task back to `open` (default) instead of leaving
    /// it `in_progress` for a graceful hand-off (spec §4.3).
    #[serde(default = "default_release")]
    release: bool,
}

fn default_release() -> bool {
    true
}

pub async fn end_session(
    State(state): State<CoordinatorState>,
    Json(req): Json<EndSessionReq>,
) -> CoreResult<Json<()>> {
    let held = state.sessions.end(&req.session_id).await?;
    state.store.remove_session_snapshot(&req.session_id).await?;
    if req.release {
        if let Some(task_id) = held {
            state.store.reopen_task(task_id, Some("session ended".into())).await?;
        }
    }
    Ok(Json(()))
}

#[derive(Deserialize)]
pub struct CreateTaskReq {
    title: String,
    #[serde(default)]
    description: String,
    priority: Option<u8>,
    #[serde(default)]
    labels: BTreeSet<String>,
    #[serde(default)]
    blocked_by: Vec<String>,
    parent_id: Option<String>,
}

pub async fn create_task(
    State(state): State<CoordinatorState>,
    Json(req): Json<CreateTaskReq>,
) -> CoreResult<Json<Task>> {
    let task = match req.parent_id {
        Some(parent_id) => {
            state
                .store
                .create_subtask(parent_id, req.title, req.description)
                .await?
        }
        None => {
            state
                .store
                .create_task(req.title, req.description, req.priority, req.labels, req.blocked_by)
                .await?
        }
    };
    Ok(Json(task))
}

#[derive(Deserialize)]
pub struct RequestTaskReq {
    session_id: String,
    #[serde(default)]
    preferred_labels: Option<BTreeSet<String>>,
}

pub async fn request_task(
    State(state): State<CoordinatorState>,
    Json(req): Json<RequestTaskReq>,
) -> CoreResult<Json<Option<Task>>> {
    let session = state.sessions.ensure_fresh(&req.session_id).await?;
    let claims = state.sessions.claim_count(&req.session_id).await;
    let task = state.store.request_task(session, req.preferred_labels, claims).await?;
    if let Some(task) = &task {
        state
            .sessions
            .set_working_on(&req.session_id, Some(task.id.clone()))
            .await?;
    }
    Ok(Json(task))
}

#[derive(Deserialize)]
pub struct CompleteTaskReq {
    task_id: String,
    session_id: String,
    note: Option<String>,
    branch: Option<String>,
    #[serde(default)]
    force: Option<bool>,
}

pub async fn complete_task(
    State(state): State<CoordinatorState>,
    Json(req): Json<CompleteTaskReq>,
) -> CoreResult<Json<Task>> {
    state.sessions.ensure_fresh(&req.session_id).await?;
    let task = state
        .store
        .complete_task(
            req.task_id,
            req.session_id.clone(),
            req.note,
            req.branch,
            req.force.unwrap_or(false),
        )
        .await?;
    let _ = state.sessions.set_working_on(&req.session_id, None).await;
    Ok(Json(task))
}

#[derive(Deserialize)]
pub struct ReopenTaskReq {
    task_id: String,
    note: Option<String>,
}

pub async fn reopen_task(
    State(state): State<CoordinatorState>,
    Json(req): Json<ReopenTaskReq>,
) -> CoreResult<Json<Task>> {
    Ok(Json(state.store.reopen_task(req.task_id, req.note).await?))
}

#[derive(Deserialize)]
pub struct EditTaskReq {
    task_id: String,
    #[serde(flatten)]
    edits: TaskEdits,
}

pub async fn edit_task(
    State(state): State<CoordinatorState>,
    Json(req): Json<EditTaskReq>,
) -> CoreResult<Json<Task>> {
    Ok(Json(state.store.edit_task(req.task_id, req.edits).await?))
}

#[derive(Deserialize)]
pub struct DeleteTaskReq {
    task_id: String,
    #[serde(default)]
    force: bool,
}

pub async fn delete_task(
    State(state): State<CoordinatorState>,
    Json(req): Json<DeleteTaskReq>,
) -> CoreResult<Json<()>> {
    state.store.delete_task(req.task_id, req.force).await?;
    Ok(Json(()))
}

#[derive(Deserialize)]
pub struct AddNoteReq {
    task_id: String,
    session_id: String,
    note: String,
}

pub async fn add_note(
    State(state): State<CoordinatorState>,
    Json(req): Json<AddNoteReq>,
) -> CoreResult<Json<()>> {
    state.store.add_note(req.task_id, req.session_id, req.note).await?;
    Ok(Json(()))
}

#[derive(Deserialize)]
pub struct BulkCompleteReq {
    task_ids: Vec<String>,
    note: Option<String>,
}

pub async fn bulk_complete(
    State(state): State<CoordinatorState>,
    Json(req): Json<BulkCompleteReq>,
) -> CoreResult<Json<BulkResult>> {
    Ok(Json(state.store.bulk_complete(req.task_ids, req.note).await?))
}

#[derive(Deserialize)]
pub struct CreateSubtaskReq {
    parent_id: String,
    title: String,
    #[serde(default)]
    description: String,
}

pub async fn create_subtask(
    State(state): State<CoordinatorState>,
    Json(req): Json<CreateSubtaskReq>,
) -> CoreResult<Json<Task>> {
    Ok(Json(
        state.store.create_subtask(req.parent_id, req.title, req.description).await?,
    ))
}

#[derive(Deserialize)]
pub struct SubtaskProgressQuery {
    parent_id: String,
}

pub async fn subtask_progress(
    State(state): State<CoordinatorState>,
    Query(query): Query<SubtaskProgressQuery>,
) -> CoreResult<Json<SubtaskProgress>> {
    Ok(Json(state.store.subtask_progress(&query.parent_id).await?))
}

#[derive(Deserialize)]
pub struct CreateTemplateReq {
    name: String,
    default_priority: u8,
    #[serde(default)]
    default_labels: BTreeSet<String>,
    #[serde(default)]
    subtasks: Vec<TemplateSubtask>,
}

pub async fn create_template(
    State(state): State<CoordinatorState>,
    Json(req): Json<CreateTemplateReq>,
) -> CoreResult<Json<Template>> {
    Ok(Json(
        state
            .store
            .create_template(req.name, req.default_priority, req.default_labels, req.subtasks)
            .await?,
    ))
}

#[derive(Deserialize)]
pub struct InstantiateTemplateReq {
    template_id: String,
    title: String,
}

pub async fn instantiate_template(
    State(state): State<CoordinatorState>,
    Json(req): Json<InstantiateTemplateReq>,
) -> CoreResult<Json<Task>> {
    Ok(Json(state.store.instantiate_template(&req.template_id, req.title).await?))
}

pub async fn undo_last_action(State(state): State<CoordinatorState>) -> CoreResult<Json<Task>> {
    Ok(Json(state.store.undo_last_action().await?))
}
