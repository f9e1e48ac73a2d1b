//! Pure task-mutation logic (spec §3, §4.1, §4.6). Each function here takes
//! `&mut TasksFile` and returns the events it produced; `Store::transaction`
//! is the only thing that ever locks, persists, or appends them. This split
//! mirrors the teacher's separation of `tasks/reducer.rs` (pure transition
//! logic) from `tasks/storage.rs` (the thing that actually touches disk).

use super::events::{Event, EventKind, UndoHint};
use super::model::{format_task_id, Note, Task, TaskStatus, TasksFile, TimeTracking};
use crate::error::{CoreError, CoreResult};
use crate::scheduler;
use crate::store::model::Session;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::collections::BTreeSet;

pub struct NewTask {
    pub title: String,
    pub description: String,
    pub priority: Option<u8>,
    pub labels: BTreeSet<String>,
    pub blocked_by: Vec<String>,
    pub parent_id: Option<String>,
}

pub fn create_task(file: &mut TasksFile, spec: NewTask) -> CoreResult<(Task, Vec<Event>)> {
    if spec.title.trim().is_empty() {
        return Err(CoreError::InvalidArgument("title must not be empty".into()));
    }
    let now = Utc::now();
    let id = format_task_id(file.next_id);
    file.next_id += 1;

    let task = Task {
        id: id.clone(),
        title: spec.title,
        description: spec.description,
        status: TaskStatus::Open,
        priority: spec.priority.unwrap_or(2).min(3),
        labels: spec.labels,
        assignee: None,
        blocked_by: spec.blocked_by,
        branch: None,
        parent_id: spec.parent_id.clone(),
        subtasks: Vec::new(),
        notes: Vec::new(),
        time_tracking: TimeTracking::default(),
        created_at: now,
        updated_at: now,
    };

    if let Some(parent_id) = &spec.parent_id {
        let parent = find_task_mut(file, parent_id)?;
        parent.subtasks.push(id.clone());
        parent.updated_at = now;
    }

    file.tasks.push(task.clone());

    let event = Event::new(
        EventKind::TaskCreated,
        None,
        json!({ "task_id": id, "title": task.title }),
    );
    Ok((task, vec![event]))
}

pub fn find_task<'a>(file: &'a TasksFile, task_id: &str) -> CoreResult<&'a Task> {
    file.tasks
        .iter()
        .find(|t| t.id == task_id)
        .ok_or_else(|| CoreError::NotFound(format!("task {task_id} not found")))
}

pub fn find_task_mut<'a>(file: &'a mut TasksFile, task_id: &str) -> CoreResult<&'a mut Task> {
    file.tasks
        .iter_mut()
        .find(|t| t.id == task_id)
        .ok_or_else(|| CoreError::NotFound(format!("task {task_id} not found")))
}

/// The critical claim operation (spec §5): find the next ready task for
/// `session` via the pure scheduler and atomically mark it `in_progress`.
/// Race-free because it runs inside the same locked transaction that a
/// concurrent caller would also need to acquire first.
pub fn request_task(
    file: &mut TasksFile,
    session: &Session,
    preferred_labels: Option<&BTreeSet<String>>,
    current_claims: usize,
    max_concurrent: usize,
) -> CoreResult<(Option<Task>, Vec<Event>)> {
    let chosen_id = scheduler::pick(
        &file.tasks,
        session,
        preferred_labels,
        current_claims,
        max_concurrent,
    );
    let Some(task_id) = chosen_id else {
        return Ok((None, Vec::new()));
    };

    let now = Utc::now();
    let task = find_task_mut(file, &task_id)?;
    task.status = TaskStatus::InProgress;
    task.assignee = Some(session.session_id.clone());
    task.updated_at = now;
    let result = task.clone();

    let event = Event::new(
        EventKind::TaskClaimed,
        Some(session.session_id.clone()),
        json!({ "task_id": task_id, "session_id": session.session_id }),
    );
    Ok((Some(result), vec![event]))
}

pub fn complete_task(
    file: &mut TasksFile,
    task_id: &str,
    session_id: &str,
    note: Option<String>,
    branch: Option<String>,
    force: bool,
) -> CoreResult<(Task, Vec<Event>)> {
    let now = Utc::now();
    let task = find_task_mut(file, task_id)?;

    if task.status == TaskStatus::Done {
        return Err(CoreError::Conflict(format!("task {task_id} is already done")));
    }
    if !force {
        if let Some(owner) = &task.assignee {
            if owner != session_id {
                return Err(CoreError::Conflict(format!(
                    "task {task_id} is owned by {owner}, not {session_id}"
                )));
            }
        }
    }

    let hint = UndoHint::capture(task);
    task.status = TaskStatus::Done;
    task.assignee = None;
    task.branch = branch;
    task.updated_at = now;
    if task.time_tracking.is_running {
        task.time_tracking.is_running = false;
        if let Some(started) = task.time_tracking.started_at.take() {
            task.time_tracking.total_seconds += (now - started).num_seconds().max(0);
        }
    }
    if let Some(note_text) = &note {
        task.notes.push(Note {
            timestamp: now,
            session_id: session_id.to_string(),
            note: note_text.clone(),
        });
    }
    let result = task.clone();

    let event = Event::new(
        EventKind::TaskCompleted,
        Some(session_id.to_string()),
        json!({ "task_id": task_id, "note": note, "branch": result.branch }),
    )
    .with_undo(hint);
    Ok((result, vec![event]))
}

pub fn reopen_task(file: &mut TasksFile, task_id: &str, note: Option<String>) -> CoreResult<(Task, Vec<Event>)> {
    let now = Utc::now();
    let task = find_task_mut(file, task_id)?;
    let hint = UndoHint::capture(task);
    task.status = TaskStatus::Open;
    task.assignee = None;
    task.branch = None;
    task.updated_at = now;
    if let Some(note_text) = &note {
        task.notes.push(Note {
            timestamp: now,
            session_id: "system".into(),
            note: note_text.clone(),
        });
    }
    let result = task.clone();

    let event = Event::new(EventKind::TaskReopened, None, json!({ "task_id": task_id }))
        .with_undo(hint);
    Ok((result, vec![event]))
}

#[derive(Default, Debug, Serialize, Deserialize)]
pub struct TaskEdits {
    pub title: Option<String>,
    pub description: Option<String>,
    pub priority: Option<u8>,
    pub labels: Option<BTreeSet<String>>,
    pub blocked_by: Option<Vec<String>>,
    pub status: Option<TaskStatus>,
}

pub fn edit_task(file: &mut TasksFile, task_id: &str, edits: TaskEdits) -> CoreResult<(Task, Vec<Event>)> {
    // Validate the would-be blocked_by against a cycle before mutating, so a
    // rejected edit never partially applies.
    if let Some(new_blocked_by) = &edits.blocked_by {
        let mut probe = file.clone();
        if let Ok(t) = find_task_mut(&mut probe, task_id) {
            t.blocked_by = new_blocked_by.clone();
        }
        super::validate::validate_invariants(&probe)?;
    }

    let now = Utc::now();
    let task = find_task_mut(file, task_id)?;
    if let Some(title) = edits.title {
        if title.trim().is_empty() {
            return Err(CoreError::InvalidArgument("title must not be empty".into()));
        }
        task.title = title;
    }
    if let Some(description) = edits.description {
        task.description = description;
    }
    if let Some(priority) = edits.priority {
        task.priority = priority.min(3);
    }
    if let Some(labels) = edits.labels {
        task.labels = labels;
    }
    if let Some(blocked_by) = edits.blocked_by {
        task.blocked_by = blocked_by;
    }
    if let Some(status) = edits.status {
        task.status = status;
    }
    task.updated_at = now;
    let result = task.clone();

    let event = Event::new(EventKind::TaskEdited, None, json!({ "task_id": task_id }));
    Ok((result, vec![event]))
}

pub fn delete_task(file: &mut TasksFile, task_id: &str, force: bool) -> CoreResult<((), Vec<Event>)> {
    let task = find_task(file, task_id)?;
    if !task.subtasks.is_empty() && !force {
        return Err(CoreError::Conflict(format!(
            "task {task_id} has subtasks; pass force to delete recursively"
        )));
    }

    let to_delete: Vec<String> = if force {
        collect_descendants(file, task_id)
    } else {
        vec![task_id.to_string()]
    };

    let parent_id = find_task(file, task_id)?.parent_id.clone();
    file.tasks.retain(|t| !to_delete.contains(&t.id));
    if let Some(parent_id) = parent_id {
        if let Ok(parent) = find_task_mut(file, &parent_id) {
            parent.subtasks.retain(|s| !to_delete.contains(s));
        }
    }

    let event = Event::new(
        EventKind::TaskDeleted,
        None,
        json!({ "task_id": task_id, "deleted": to_delete }),
    );
    Ok(((), vec![event]))
}

fn collect_descendants(file: &TasksFile, task_id: &str) -> Vec<String> {
    let mut result = vec![task_id.to_string()];
    let mut frontier = vec![task_id.to_string()];
    while let Some(current) = frontier.pop() {
        for t in &file.tasks {
            if t.parent_id.as_deref() == Some(current.as_str()) {
                result.push(t.id.clone());
                frontier.push(t.id.clone());
            }
        }
    }
    result
}

pub fn add_note(
    file: &mut TasksFile,
    task_id: &str,
    session_id: &str,
    note: &str,
) -> CoreResult<((), Vec<Event>)> {
    let now = Utc::now();
    let task = find_task_mut(file, task_id)?;
    task.notes.push(Note {
        timestamp: now,
        session_id: session_id.to_string(),
        note: note.to_string(),
    });
    task.updated_at = now;

    let event = Event::new(
        EventKind::TaskNoteAdded,
        Some(session_id.to_string()),
        json!({ "task_id": task_id, "note": note }),
    );
    Ok(((), vec![event]))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct BulkResult {
    pub succeeded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub fn bulk_complete(
    file: &mut TasksFile,
    task_ids: &[String],
    note: Option<&str>,
) -> CoreResult<(BulkResult, Vec<Event>)> {
    let mut succeeded = Vec::new();
    let mut failed = Vec::new();
    let mut events = Vec::new();

    for task_id in task_ids {
        match complete_task(file, task_id, "bulk", note.map(String::from), None, true) {
            Ok((_, mut evs)) => {
                succeeded.push(task_id.clone());
                events.append(&mut evs);
            }
            Err(e) => failed.push((task_id.clone(), e.to_string())),
        }
    }

    Ok((BulkResult { succeeded, failed }, events))
}

pub fn create_subtask(
    file: &mut TasksFile,
    parent_id: &str,
    title: String,
    description: String,
) -> CoreResult<(Task, Vec<Event>)> {
    find_task(file, parent_id)?;
    let (task, mut events) = create_task(
        file,
        NewTask {
            title,
            description,
            priority: None,
            labels: BTreeSet::new(),
            blocked_by: Vec::new(),
            parent_id: Some(parent_id.to_string()),
        },
    )?;
    events.push(Event::new(
        EventKind::SubtaskCreated,
        None,
        json!({ "parent_id": parent_id, "task_id": task.id }),
    ));
    Ok((task, events))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubtaskProgress {
    pub done: usize,
    pub total: usize,
    pub percentage: f64,
}

pub fn subtask_progress(file: &TasksFile, parent_id: &str) -> CoreResult<SubtaskProgress> {
    let parent = find_task(file, parent_id)?;
    let total = parent.subtasks.len();
    let done = parent
        .subtasks
        .iter()
        .filter_map(|id| file.tasks.iter().find(|t| &t.id == id))
        .filter(|t| t.status == TaskStatus::Done)
        .count();
    let percentage = if total == 0 { 0.0 } else { (done as f64 / total as f64) * 100.0 };
    Ok(SubtaskProgress { done, total, percentage })
}

/// If `auto_complete_parents` is enabled (Open Question #1, spec §9,
/// default off), auto-completes `parent_id` once every sibling subtask is
/// `done`.
pub fn maybe_auto_complete_parent(
    file: &mut TasksFile,
    parent_id: &str,
    enabled: bool,
) -> CoreResult<Vec<Event>> {
    if !enabled {
        return Ok(Vec::new());
    }
    let progress = subtask_progress(file, parent_id)?;
    if progress.total > 0 && progress.done == progress.total {
        let (_, events) = complete_task(file, parent_id, "system", None, None, true)?;
        return Ok(events);
    }
    Ok(Vec::new())
}

pub fn start_timer(file: &mut TasksFile, task_id: &str) -> CoreResult<(Task, Vec<Event>)> {
    let now = Utc::now();
    let task = find_task_mut(file, task_id)?;
    // Double start_timer without stop is a no-op (spec §8 boundary behavior).
    if task.time_tracking.is_running {
        return Ok((task.clone(), Vec::new()));
    }
    task.time_tracking.is_running = true;
    task.time_tracking.is_paused = false;
    task.time_tracking.started_at = Some(now);
    task.updated_at = now;
    let result = task.clone();
    let event = Event::new(EventKind::TimerStarted, None, json!({ "task_id": task_id }));
    Ok((result, vec![event]))
}

pub fn stop_timer(file: &mut TasksFile, task_id: &str) -> CoreResult<(Task, Vec<Event>)> {
    let now = Utc::now();
    let task = find_task_mut(file, task_id)?;
    if !task.time_tracking.is_running {
        return Ok((task.clone(), Vec::new()));
    }
    if let Some(started) = task.time_tracking.started_at.take() {
        task.time_tracking.total_seconds += (now - started).num_seconds().max(0);
    }
    task.time_tracking.is_running = false;
    task.updated_at = now;
    let result = task.clone();
    let event = Event::new(EventKind::TimerStopped, None, json!({ "task_id": task_id }));
    Ok((result, vec![event]))
}

/// Archive `done` tasks older than `days`. Returns the tasks moved to the
/// archive log — irreversible, so the caller appends no `undo_hint`.
pub fn archive_done_tasks(file: &mut TasksFile, days: i64) -> CoreResult<(Vec<Task>, Vec<Event>)> {
    let cutoff = Utc::now() - chrono::Duration::days(days);
    let (to_archive, remaining): (Vec<Task>, Vec<Task>) = file
        .tasks
        .drain(..)
        .partition(|t| t.status == TaskStatus::Done && t.updated_at < cutoff);
    file.tasks = remaining;
    Ok((to_archive, Vec::new()))
}

/// Apply the inverse of the most recent reversible event (spec §4.6).
pub fn apply_undo(file: &mut TasksFile, hint: &UndoHint) -> CoreResult<(Task, Vec<Event>)> {
    let now = Utc::now();
    let task = find_task_mut(file, &hint.task_id)?;
    task.status = hint.prior_status;
    task.assignee = hint.prior_assignee.clone();
    task.branch = hint.prior_branch.clone();
    task.notes.truncate(hint.prior_notes_len);
    task.updated_at = now;
    let result = task.clone();
    let event = Event::new(EventKind::UndoApplied, None, json!({ "task_id": hint.task_id }));
    Ok((result, vec![event]))
}
