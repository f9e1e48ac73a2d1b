//! The event log (spec §3, §4.6): one immutable `Event` appended per
//! state-changing operation, doubling as the undo substrate via
//! `undo_hint`. Kind enum shape follows the teacher's `TaskEventKind`
//! (`tasks/events.rs`) — a tagged union keyed by `event_type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::model::{Task, TaskStatus};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventKind {
    TaskCreated,
    TaskClaimed,
    TaskCompleted,
    TaskReopened,
    TaskEdited,
    TaskDeleted,
    TaskNoteAdded,
    SubtaskCreated,
    TemplateInstantiated,
    SessionRegistered,
    SessionHeartbeat,
    SessionEnded,
    SessionReclaimed,
    TimerStarted,
    TimerStopped,
    UndoApplied,
}

/// The pre-image fields required to reverse the most recent reversible
/// action (spec §4.6). Irreversible operations (deletes without a captured
/// pre-image, archival flushes) carry no hint, and `undo_last_action` then
/// fails with `Conflict`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UndoHint {
    pub task_id: String,
    pub prior_status: TaskStatus,
    pub prior_assignee: Option<String>,
    pub prior_branch: Option<String>,
    /// Number of `notes` entries to truncate back to (the note this action
    /// appended, if any, is removed on undo).
    pub prior_notes_len: usize,
}

impl UndoHint {
    /// Capture the fields a reversible mutation is about to overwrite.
    pub fn capture(task: &Task) -> Self {
        Self {
            task_id: task.id.clone(),
            prior_status: task.status,
            prior_assignee: task.assignee.clone(),
            prior_branch: task.branch.clone(),
            prior_notes_len: task.notes.len(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub kind: EventKind,
    pub session_id: Option<String>,
    pub payload: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub undo_hint: Option<UndoHint>,
}

impl Event {
    pub fn new(kind: EventKind, session_id: Option<String>, payload: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            session_id,
            payload,
            undo_hint: None,
        }
    }

    pub fn with_undo(mut self, hint: UndoHint) -> Self {
        self.undo_hint = Some(hint);
        self
    }
}
