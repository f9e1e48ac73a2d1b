//! Data model (spec §3). These types are the on-disk shape of `tasks.json`,
//! `templates.json`, and `history.jsonl` — serialized with plain `serde`,
//! snake_case throughout, matching spec §6's wire format exactly.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Open,
    InProgress,
    Done,
    Blocked,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Open => "open",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Done => "done",
            TaskStatus::Blocked => "blocked",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(TaskStatus::Open),
            "in_progress" => Ok(TaskStatus::InProgress),
            "done" => Ok(TaskStatus::Done),
            "blocked" => Ok(TaskStatus::Blocked),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Note {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub note: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeTracking {
    pub total_seconds: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub is_running: bool,
    pub is_paused: bool,
}

impl Default for TimeTracking {
    fn default() -> Self {
        Self {
            total_seconds: 0,
            started_at: None,
            is_running: false,
            is_paused: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub status: TaskStatus,
    pub priority: u8,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    pub assignee: Option<String>,
    #[serde(default)]
    pub blocked_by: Vec<String>,
    pub branch: Option<String>,
    pub parent_id: Option<String>,
    #[serde(default)]
    pub subtasks: Vec<String>,
    #[serde(default)]
    pub notes: Vec<Note>,
    #[serde(default)]
    pub time_tracking: TimeTracking,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn is_subtask(&self) -> bool {
        self.parent_id.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionRole {
    Main,
    Worker,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub role: SessionRole,
    #[serde(default)]
    pub context: String,
    #[serde(default)]
    pub labels: BTreeSet<String>,
    pub started_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub working_on: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSubtask {
    pub title: String,
    #[serde(default)]
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: String,
    pub name: String,
    pub default_priority: u8,
    #[serde(default)]
    pub default_labels: BTreeSet<String>,
    #[serde(default)]
    pub subtasks: Vec<TemplateSubtask>,
}

/// On-disk root of `tasks.json` (spec §6): `{"version":2,"next_id":N,"tasks":[...]}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TasksFile {
    pub version: u32,
    pub next_id: u64,
    pub tasks: Vec<Task>,
}

impl Default for TasksFile {
    fn default() -> Self {
        Self {
            version: 2,
            next_id: 1,
            tasks: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TemplatesFile {
    pub templates: Vec<Template>,
}

pub fn format_task_id(n: u64) -> String {
    format!("task-{n:03}")
}
