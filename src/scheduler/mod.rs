//! Pure scheduling function (spec §4.2). No I/O, no time source — callers
//! pass in the snapshot and get back a deterministic answer. This purity is
//! what makes the ordering exhaustively testable (spec §9).
//!
//! The tie-break discipline — priority first, then enqueue/creation order —
//! is the same one the teacher's `SchedulerQueue` (`scheduler/queue.rs`)
//! encodes in a `BinaryHeap`'s `Ord` impl; here there is no persistent heap
//! (the scheduler runs over a fresh snapshot every call), so the ordering
//! tuple is computed directly with `Iterator::min_by_key`.

use crate::store::model::{Session, Task, TaskStatus};
use std::collections::{BTreeSet, HashMap, HashSet};

/// `(−affinity, priority, created_at, id)` — smaller sorts first. `affinity`
/// is negated so that higher affinity (more overlap) wins the min.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct OrderKey {
    neg_affinity: i64,
    priority: u8,
    created_at: String,
    id: String,
}

/// A task is ready iff open, unassigned, and every `blocked_by` predecessor
/// that resolves to a real task is `done`. Orphan references (ids that no
/// longer resolve) are treated as satisfied — see spec §4.2 and the Open
/// Question in §9.
pub fn is_ready(task: &Task, by_id: &HashMap<&str, &Task>) -> bool {
    if task.status != TaskStatus::Open || task.assignee.is_some() {
        return false;
    }
    task.blocked_by.iter().all(|dep| match by_id.get(dep.as_str()) {
        Some(predecessor) => predecessor.status == TaskStatus::Done,
        None => {
            tracing::warn!(task_id = %task.id, blocker = %dep, "blocked_by references a missing task — treating as satisfied");
            true
        }
    })
}

fn affinity(task: &Task, session: &Session, preferred_labels: &BTreeSet<String>) -> i64 {
    let mut interests: HashSet<&str> = session.labels.iter().map(String::as_str).collect();
    interests.extend(preferred_labels.iter().map(String::as_str));
    task.labels
        .iter()
        .filter(|l| interests.contains(l.as_str()))
        .count() as i64
}

/// Pick the next task to claim for `session`, or `None` if the backlog has
/// nothing ready or the session is already at its concurrency limit (spec
/// §4.2's load-balancing rule).
pub fn pick(
    tasks: &[Task],
    session: &Session,
    preferred_labels: Option<&BTreeSet<String>>,
    current_claims: usize,
    max_concurrent: usize,
) -> Option<String> {
    if current_claims >= max_concurrent {
        return None;
    }

    let by_id: HashMap<&str, &Task> = tasks.iter().map(|t| (t.id.as_str(), t)).collect();
    let empty = BTreeSet::new();
    let preferred = preferred_labels.unwrap_or(&empty);

    tasks
        .iter()
        .filter(|t| is_ready(t, &by_id))
        .map(|t| {
            let key = OrderKey {
                neg_affinity: -affinity(t, session, preferred),
                priority: t.priority,
                created_at: t.created_at.to_rfc3339(),
                id: t.id.clone(),
            };
            (key, t.id.clone())
        })
        .min_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, id)| id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::model::{SessionRole, TimeTracking};
    use chrono::{Duration, Utc};

    fn mk_task(id: &str, priority: u8, labels: &[&str], created_offset_secs: i64) -> Task {
        Task {
            id: id.to_string(),
            title: "t".into(),
            description: String::new(),
            status: TaskStatus::Open,
            priority,
            labels: labels.iter().map(|s| s.to_string()).collect(),
            assignee: None,
            blocked_by: Vec::new(),
            branch: None,
            parent_id: None,
            subtasks: Vec::new(),
            notes: Vec::new(),
            time_tracking: TimeTracking::default(),
            created_at: Utc::now() + Duration::seconds(created_offset_secs),
            updated_at: Utc::now(),
        }
    }

    fn mk_session(labels: &[&str]) -> Session {
        Session {
            session_id: "sess-1".into(),
            role: SessionRole::Worker,
            context: String::new(),
            labels: labels.iter().map(|s| s.to_string()).collect(),
            started_at: Utc::now(),
            last_heartbeat: Utc::now(),
            working_on: None,
        }
    }

    #[test]
    fn s1_priority_wins_over_age() {
        let t1 = mk_task("task-001", 2, &[], 0);
        let t2 = mk_task("task-002", 0, &[], 5);
        let session = mk_session(&[]);
        let picked = pick(&[t1, t2], &session, None, 0, 1);
        assert_eq!(picked.as_deref(), Some("task-002"));
    }

    #[test]
    fn s2_affinity_breaks_priority_tie() {
        let t3 = mk_task("task-003", 1, &["frontend"], 0);
        let t4 = mk_task("task-004", 1, &["backend"], 1);
        let session = mk_session(&["backend"]);
        let picked = pick(&[t3, t4], &session, None, 0, 1);
        assert_eq!(picked.as_deref(), Some("task-004"));
    }

    #[test]
    fn s3_blocked_by_gates_readiness() {
        let mut a = mk_task("task-a", 2, &[], 0);
        let mut b = mk_task("task-b", 2, &[], 1);
        b.blocked_by = vec!["task-a".into()];
        let session = mk_session(&[]);

        let picked = pick(&[a.clone(), b.clone()], &session, None, 0, 1);
        assert_eq!(picked.as_deref(), Some("task-a"));

        a.status = TaskStatus::Done;
        let picked = pick(&[a, b], &session, None, 0, 1);
        assert_eq!(picked.as_deref(), Some("task-b"));
    }

    #[test]
    fn empty_backlog_returns_none() {
        let session = mk_session(&[]);
        assert_eq!(pick(&[], &session, None, 0, 1), None);
    }

    #[test]
    fn backlog_of_only_blocked_tasks_returns_none() {
        let mut b = mk_task("task-b", 2, &[], 0);
        b.blocked_by = vec!["task-a".into()];
        let mut a = mk_task("task-a", 2, &[], 1);
        a.status = TaskStatus::InProgress;
        a.assignee = Some("someone".into());
        let session = mk_session(&[]);
        assert_eq!(pick(&[a, b], &session, None, 0, 1), None);
    }

    #[test]
    fn load_balancing_refuses_when_at_capacity() {
        let t = mk_task("task-001", 2, &[], 0);
        let session = mk_session(&[]);
        assert_eq!(pick(&[t], &session, None, 1, 1), None);
    }

    #[test]
    fn orphan_blocked_by_is_treated_as_satisfied() {
        let mut t = mk_task("task-001", 2, &[], 0);
        t.blocked_by = vec!["task-does-not-exist".into()];
        let session = mk_session(&[]);
        assert_eq!(pick(&[t], &session, None, 0, 1), Some("task-001".to_string()));
    }

    #[test]
    fn determinism_same_snapshot_same_result() {
        let t1 = mk_task("task-001", 1, &["x"], 0);
        let t2 = mk_task("task-002", 1, &["x"], 1);
        let session = mk_session(&["x"]);
        let a = pick(&[t1.clone(), t2.clone()], &session, None, 0, 1);
        let b = pick(&[t1, t2], &session, None, 0, 1);
        assert_eq!(a, b);
    }

    proptest::proptest! {
        /// Ordering doesn't depend on the order tasks appear in the
        /// snapshot — shuffling the slice must never change the pick.
        #[test]
        fn pick_is_order_independent(priorities in proptest::collection::vec(0u8..4, 1..8)) {
            let tasks: Vec<Task> = priorities
                .iter()
                .enumerate()
                .map(|(i, &p)| mk_task(&format!("task-{i:03}"), p, &[], i as i64))
                .collect();
            let session = mk_session(&[]);

            let forward = pick(&tasks, &session, None, 0, 1);
            let mut reversed = tasks.clone();
            reversed.reverse();
            let backward = pick(&reversed, &session, None, 0, 1);
            proptest::prop_assert_eq!(forward, backward);
        }
    }
}
