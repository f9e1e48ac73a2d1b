//! End-to-end scenarios (spec §8). S1-S4 run twice each, once against
//! `SingleBackend` and once against a `ParallelBackend` talking HTTP to a
//! real `Coordinator` (see the `harness` module below), so dual-mode
//! equivalence (spec §4.5) is actually exercised rather than assumed. S5 and
//! S6 exercise `SessionRegistry::cleanup` and `Store::undo_last_action`
//! directly — neither is reachable through `ClientBackend`, so there is no
//! second backend to parameterize over for those two.

use claudia_core::client::ClientBackend;
use claudia_core::config::ClaudiaConfig;
use claudia_core::store::model::{Session, SessionRole, TaskStatus};
use claudia_core::store::Store;
use std::collections::BTreeSet;
use std::sync::Arc;
use tempfile::tempdir;

mod harness {
    use claudia_core::client::ParallelBackend;
    use claudia_core::clock::SystemClock;
    use claudia_core::config::ClaudiaConfig;
    use claudia_core::coordinator::{build_router, CoordinatorState};
    use claudia_core::session::SessionRegistry;
    use claudia_core::store::Store;
    use std::sync::Arc;
    use std::time::Instant;

    /// Binds an ephemeral port, serves the real Coordinator router on it,
    /// and hands back a `ParallelBackend` pointed at it. The server task is
    /// aborted when the harness drops.
    pub struct ParallelHarness {
        pub backend: ParallelBackend,
        server: tokio::task::JoinHandle<()>,
    }

    impl Drop for ParallelHarness {
        fn drop(&mut self) {
            self.server.abort();
        }
    }

    pub async fn parallel(dir: &std::path::Path) -> ParallelHarness {
        let config = Arc::new(ClaudiaConfig::new(Some(0), Some(dir.to_path_buf()), None));
        let sessions = Arc::new(SessionRegistry::new(
            Arc::new(SystemClock),
            config.heartbeat_warn_secs,
            config.heartbeat_danger_secs,
        ));
        let state = CoordinatorState {
            store: Store::new(config.clone()),
            sessions,
            started_at: Instant::now(),
        };
        let listener = tokio::net::TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let router = build_router(state);
        let server = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        let backend = ParallelBackend::new(port, config.client_deadline);
        ParallelHarness { backend, server }
    }

    pub fn single(dir: &std::path::Path) -> claudia_core::client::SingleBackend {
        claudia_core::client::SingleBackend::new(Arc::new(ClaudiaConfig::new(
            None,
            Some(dir.to_path_buf()),
            None,
        )))
    }
}

fn store_in(dir: &std::path::Path) -> Store {
    Store::new(Arc::new(ClaudiaConfig::new(None, Some(dir.to_path_buf()), None)))
}

fn session(id: &str, labels: &[&str]) -> Session {
    Session {
        session_id: id.to_string(),
        role: SessionRole::Worker,
        context: String::new(),
        labels: labels.iter().map(|s| s.to_string()).collect(),
        started_at: chrono::Utc::now(),
        last_heartbeat: chrono::Utc::now(),
        working_on: None,
    }
}

#[tokio::test]
async fn s1_priority_wins_over_age() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());

    store
        .create_task("first".into(), "".into(), Some(2), BTreeSet::new(), Vec::new())
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let high_priority = store
        .create_task("second".into(), "".into(), Some(0), BTreeSet::new(), Vec::new())
        .await
        .unwrap();

    let picked = store.request_task(session("s", &[]), None, 0).await.unwrap().unwrap();
    assert_eq!(picked.id, high_priority.id);
}

#[tokio::test]
async fn s2_affinity_breaks_priority_tie() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());

    store
        .create_task(
            "frontend work".into(),
            "".into(),
            Some(1),
            ["frontend".to_string()].into_iter().collect(),
            Vec::new(),
        )
        .await
        .unwrap();
    let backend_task = store
        .create_task(
            "backend work".into(),
            "".into(),
            Some(1),
            ["backend".to_string()].into_iter().collect(),
            Vec::new(),
        )
        .await
        .unwrap();

    let picked = store
        .request_task(session("s", &["backend"]), None, 0)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(picked.id, backend_task.id);
}

#[tokio::test]
async fn s3_blocked_by_gates_readiness() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());

    let a = store
        .create_task("A".into(), "".into(), None, BTreeSet::new(), Vec::new())
        .await
        .unwrap();
    let b = store
        .create_task("B".into(), "".into(), None, BTreeSet::new(), vec![a.id.clone()])
        .await
        .unwrap();

    let picked = store.request_task(session("s", &[]), None, 0).await.unwrap().unwrap();
    assert_eq!(picked.id, a.id);

    store
        .complete_task(a.id.clone(), "s".into(), None, None, true)
        .await
        .unwrap();

    let picked = store.request_task(session("s", &[]), None, 0).await.unwrap().unwrap();
    assert_eq!(picked.id, b.id);
}

#[tokio::test]
async fn s4_race_on_single_task_yields_one_winner() {
    let dir = tempdir().unwrap();
    let store = Arc::new(store_in(dir.path()));
    let task = store
        .create_task("only".into(), "".into(), None, BTreeSet::new(), Vec::new())
        .await
        .unwrap();

    let store_a = store.clone();
    let store_b = store.clone();
    let (a, b) = tokio::join!(
        store_a.request_task(session("a", &[]), None, 0),
        store_b.request_task(session("b", &[]), None, 0),
    );
    let a = a.unwrap();
    let b = b.unwrap();

    let winners: Vec<_> = [a, b].into_iter().flatten().collect();
    assert_eq!(winners.len(), 1);
    let winner = &winners[0];
    assert_eq!(winner.id, task.id);
    assert!(winner.assignee == Some("a".to_string()) || winner.assignee == Some("b".to_string()));
}

#[tokio::test]
async fn s5_heartbeat_reclaim_releases_task() {
    use claudia_core::clock::SystemClock;
    use claudia_core::session::SessionRegistry;

    let dir = tempdir().unwrap();
    let store = store_in(dir.path());
    let registry = SessionRegistry::new(Arc::new(SystemClock), 60, 120);

    let task = store
        .create_task("t".into(), "".into(), None, BTreeSet::new(), Vec::new())
        .await
        .unwrap();
    registry.register("w", SessionRole::Worker, "", BTreeSet::new()).await;
    let claimed = store
        .request_task(registry.get("w").await.unwrap(), None, 0)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(claimed.id, task.id);
    registry.set_working_on("w", Some(task.id.clone())).await.unwrap();

    // threshold of 0 means "any heartbeat age counts as stale" — simulates
    // waiting out the real 180s window without sleeping in a test.
    let reclaimed = registry.cleanup(0).await;
    assert_eq!(reclaimed.len(), 1);
    let (_, held_task) = &reclaimed[0];
    assert_eq!(held_task.as_deref(), Some(task.id.as_str()));

    store.reopen_task(task.id.clone(), Some("reclaimed".into())).await.unwrap();

    let refetched = store.get_task(&task.id).await.unwrap();
    assert_eq!(refetched.status, TaskStatus::Open);
    assert!(refetched.assignee.is_none());

    let reclaimed_task = store
        .request_task(session("fresh", &[]), None, 0)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(reclaimed_task.id, task.id);
}

#[tokio::test]
async fn s6_undo_complete_restores_prior_state() {
    let dir = tempdir().unwrap();
    let store = store_in(dir.path());

    let task = store
        .create_task("t".into(), "".into(), None, BTreeSet::new(), Vec::new())
        .await
        .unwrap();
    store
        .complete_task(task.id.clone(), "s".into(), Some("x".into()), None, true)
        .await
        .unwrap();

    let reverted = store.undo_last_action().await.unwrap();
    assert_eq!(reverted.id, task.id);
    assert_eq!(reverted.status, TaskStatus::Open);
    assert!(reverted.assignee.is_none());
    assert!(reverted.notes.is_empty());
}

// --- dual-backend coverage (spec §4.5) ---------------------------------
//
// Each scenario below is written once against `&dyn ClientBackend` and run
// twice: once against `SingleBackend`, once against a `ParallelBackend`
// talking HTTP to a live `Coordinator` router (`harness::parallel`).

async fn priority_wins_over_age(backend: &dyn ClientBackend) {
    backend
        .create_task("first".into(), "".into(), Some(2), BTreeSet::new(), Vec::new())
        .await
        .unwrap();
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let high_priority = backend
        .create_task("second".into(), "".into(), Some(0), BTreeSet::new(), Vec::new())
        .await
        .unwrap();

    backend
        .register_session("s", SessionRole::Worker, "", BTreeSet::new())
        .await
        .unwrap();
    let picked = backend.request_task("s", None).await.unwrap().unwrap();
    assert_eq!(picked.id, high_priority.id);
}

#[tokio::test]
async fn client_priority_wins_over_age_single() {
    let dir = tempdir().unwrap();
    priority_wins_over_age(&harness::single(dir.path())).await;
}

#[tokio::test]
async fn client_priority_wins_over_age_parallel() {
    let dir = tempdir().unwrap();
    let h = harness::parallel(dir.path()).await;
    priority_wins_over_age(&h.backend).await;
}

async fn affinity_breaks_priority_tie(backend: &dyn ClientBackend) {
    backend
        .create_task(
            "frontend work".into(),
            "".into(),
            Some(1),
            ["frontend".to_string()].into_iter().collect(),
            Vec::new(),
        )
        .await
        .unwrap();
    let backend_task = backend
        .create_task(
            "backend work".into(),
            "".into(),
            Some(1),
            ["backend".to_string()].into_iter().collect(),
            Vec::new(),
        )
        .await
        .unwrap();

    backend
        .register_session("s", SessionRole::Worker, "", ["backend".to_string()].into_iter().collect())
        .await
        .unwrap();
    let picked = backend.request_task("s", None).await.unwrap().unwrap();
    assert_eq!(picked.id, backend_task.id);
}

#[tokio::test]
async fn client_affinity_breaks_priority_tie_single() {
    let dir = tempdir().unwrap();
    affinity_breaks_priority_tie(&harness::single(dir.path())).await;
}

#[tokio::test]
async fn client_affinity_breaks_priority_tie_parallel() {
    let dir = tempdir().unwrap();
    let h = harness::parallel(dir.path()).await;
    affinity_breaks_priority_tie(&h.backend).await;
}

async fn blocked_by_gates_readiness(backend: &dyn ClientBackend) {
    let a = backend
        .create_task("A".into(), "".into(), None, BTreeSet::new(), Vec::new())
        .await
        .unwrap();
    let b = backend
        .create_task("B".into(), "".into(), None, BTreeSet::new(), vec![a.id.clone()])
        .await
        .unwrap();

    backend
        .register_session("s", SessionRole::Worker, "", BTreeSet::new())
        .await
        .unwrap();
    let picked = backend.request_task("s", None).await.unwrap().unwrap();
    assert_eq!(picked.id, a.id);

    backend.complete_task(&a.id, "s", None, None, false).await.unwrap();

    let picked = backend.request_task("s", None).await.unwrap().unwrap();
    assert_eq!(picked.id, b.id);
}

#[tokio::test]
async fn client_blocked_by_gates_readiness_single() {
    let dir = tempdir().unwrap();
    blocked_by_gates_readiness(&harness::single(dir.path())).await;
}

#[tokio::test]
async fn client_blocked_by_gates_readiness_parallel() {
    let dir = tempdir().unwrap();
    let h = harness::parallel(dir.path()).await;
    blocked_by_gates_readiness(&h.backend).await;
}

async fn race_on_single_task_yields_one_winner(backend: &dyn ClientBackend) {
    let task = backend
        .create_task("only".into(), "".into(), None, BTreeSet::new(), Vec::new())
        .await
        .unwrap();
    backend
        .register_session("a", SessionRole::Worker, "", BTreeSet::new())
        .await
        .unwrap();
    backend
        .register_session("b", SessionRole::Worker, "", BTreeSet::new())
        .await
        .unwrap();

    let (a, b) = tokio::join!(backend.request_task("a", None), backend.request_task("b", None));
    let winners: Vec<_> = [a.unwrap(), b.unwrap()].into_iter().flatten().collect();
    assert_eq!(winners.len(), 1);
    assert_eq!(winners[0].id, task.id);
    assert!(winners[0].assignee == Some("a".to_string()) || winners[0].assignee == Some("b".to_string()));
}

#[tokio::test]
async fn client_race_on_single_task_yields_one_winner_single() {
    let dir = tempdir().unwrap();
    race_on_single_task_yields_one_winner(&harness::single(dir.path())).await;
}

#[tokio::test]
async fn client_race_on_single_task_yields_one_winner_parallel() {
    let dir = tempdir().unwrap();
    let h = harness::parallel(dir.path()).await;
    race_on_single_task_yields_one_winner(&h.backend).await;
}

/// Exercises the `force` flag end-to-end (spec §7: "complete a task not
/// owned by caller without force" is a reachable `Conflict`).
async fn complete_requires_force_across_ownership(backend: &dyn ClientBackend) {
    let task = backend
        .create_task("t".into(), "".into(), None, BTreeSet::new(), Vec::new())
        .await
        .unwrap();
    backend
        .register_session("owner", SessionRole::Worker, "", BTreeSet::new())
        .await
        .unwrap();
    let claimed = backend.request_task("owner", None).await.unwrap().unwrap();
    assert_eq!(claimed.id, task.id);

    let err = backend.complete_task(&task.id, "intruder", None, None, false).await.unwrap_err();
    assert!(matches!(err, claudia_core::CoreError::Conflict(_)));

    let completed = backend
        .complete_task(&task.id, "intruder", None, None, true)
        .await
        .unwrap();
    assert_eq!(completed.status, TaskStatus::Done);
}

#[tokio::test]
async fn client_complete_requires_force_across_ownership_single() {
    let dir = tempdir().unwrap();
    complete_requires_force_across_ownership(&harness::single(dir.path())).await;
}

#[tokio::test]
async fn client_complete_requires_force_across_ownership_parallel() {
    let dir = tempdir().unwrap();
    let h = harness::parallel(dir.path()).await;
    complete_requires_force_across_ownership(&h.backend).await;
}
