//! Invariant checks (spec §3). Run once per transaction, after the mutation
//! closure and before the atomic write — any violation aborts the
//! transaction and the on-disk state is left untouched.

use super::model::{TaskStatus, TasksFile};
use crate::error::CoreError;
use std::collections::{HashMap, HashSet};

pub fn validate_invariants(file: &TasksFile) -> Result<(), CoreError> {
    let by_id: HashMap<&str, &super::model::Task> =
        file.tasks.iter().map(|t| (t.id.as_str(), t)).collect();

    let mut seen_ids = HashSet::new();
    for task in &file.tasks {
        if !seen_ids.insert(task.id.as_str()) {
            return Err(CoreError::Internal(format!("duplicate task id {}", task.id)));
        }

        // assignee != null ⇔ status = in_progress
        let assigned = task.assignee.is_some();
        let in_progress = task.status == TaskStatus::InProgress;
        if assigned != in_progress {
            return Err(CoreError::Internal(format!(
                "task {} violates assignee/status invariant (assignee={:?}, status={})",
                task.id, task.assignee, task.status
            )));
        }

        // Every subtask_id resolves to a task with parent_id = task.id.
        for sub_id in &task.subtasks {
            match by_id.get(sub_id.as_str()) {
                Some(sub) if sub.parent_id.as_deref() == Some(task.id.as_str()) => {}
                Some(_) => {
                    return Err(CoreError::Internal(format!(
                        "subtask {sub_id} does not point back to parent {}",
                        task.id
                    )))
                }
                None => {
                    return Err(CoreError::Internal(format!(
                        "task {} references missing subtask {sub_id}",
                        task.id
                    )))
                }
            }
        }

        // time_tracking.is_running ⇒ started_at != null; is_running ∧ is_paused forbidden.
        if task.time_tracking.is_running && task.time_tracking.started_at.is_none() {
            return Err(CoreError::Internal(format!(
                "task {} is_running with no started_at",
                task.id
            )));
        }
        if task.time_tracking.is_running && task.time_tracking.is_paused {
            return Err(CoreError::Internal(format!(
                "task {} is both running and paused",
                task.id
            )));
        }
    }

    // id counter strictly greater than any existing numeric suffix.
    let max_suffix = file
        .tasks
        .iter()
        .filter_map(|t| t.id.strip_prefix("task-"))
        .filter_map(|n| n.parse::<u64>().ok())
        .max()
        .unwrap_or(0);
    if file.next_id <= max_suffix {
        return Err(CoreError::Internal(format!(
            "next_id {} is not greater than max assigned id {}",
            file.next_id, max_suffix
        )));
    }

    // No cycle in blocked_by.
    for task in &file.tasks {
        if has_cycle(&by_id, &task.id, &mut HashSet::new()) {
            return Err(CoreError::Conflict(format!(
                "blocked_by cycle detected at task {}",
                task.id
            )));
        }
    }

    Ok(())
}

fn has_cycle<'a>(
    by_id: &HashMap<&'a str, &'a super::model::Task>,
    start: &str,
    visiting: &mut HashSet<String>,
) -> bool {
    if !visiting.insert(start.to_string()) {
        return true;
    }
    if let Some(task) = by_id.get(start) {
        for dep in &task.blocked_by {
            // Orphan references are satisfied, not cyclic (spec §4.2) — only
            // recurse into ids that actually resolve.
            if by_id.contains_key(dep.as_str()) && has_cycle(by_id, dep, visiting) {
                return true;
            }
        }
    }
    visiting.remove(start);
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::{Task, TimeTracking};
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn task(id: &str, blocked_by: Vec<&str>) -> Task {
        Task {
            id: id.to_string(),
            title: "t".into(),
            description: String::new(),
            status: TaskStatus::Open,
            priority: 2,
            labels: BTreeSet::new(),
            assignee: None,
            blocked_by: blocked_by.into_iter().map(String::from).collect(),
            branch: None,
            parent_id: None,
            subtasks: Vec::new(),
            notes: Vec::new(),
            time_tracking: TimeTracking::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn detects_direct_cycle() {
        let file = TasksFile {
            version: 2,
            next_id: 3,
            tasks: vec![task("task-001", vec!["task-002"]), task("task-002", vec!["task-001"])],
        };
        assert!(matches!(validate_invariants(&file), Err(CoreError::Conflict(_))));
    }

    #[test]
    fn orphan_blocked_by_is_not_a_cycle() {
        let file = TasksFile {
            version: 2,
            next_id: 2,
            tasks: vec![task("task-001", vec!["task-999"])],
        };
        assert!(validate_invariants(&file).is_ok());
    }

    #[test]
    fn rejects_assignee_without_in_progress() {
        let mut t = task("task-001", vec![]);
        t.assignee = Some("sess-1".into());
        let file = TasksFile {
            version: 2,
            next_id: 2,
            tasks: vec![t],
        };
        assert!(validate_invariants(&file).is_err());
    }
}
