//! Coordinator service (spec §4.4): the axum front-end that serializes
//! every `Store` mutation for parallel-mode sessions through one process.
//! Router construction follows the teacher's `rest::build_router` —
//! `.route(...).with_state(state)` per endpoint, CORS + trace layers on top.

mod routes;

use crate::clock::SystemClock;
use crate::config::ClaudiaConfig;
use crate::session::SessionRegistry;
use crate::store::Store;
use axum::routing::{get, post};
use axum::Router;
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct CoordinatorState {
    pub store: Store,
    pub sessions: Arc<SessionRegistry>,
    pub started_at: Instant,
}

pub fn build_router(state: CoordinatorState) -> Router {
    Router::new()
        .route("/status", get(routes::status))
        .route("/tasks", get(routes::list_tasks))
        .route("/parallel-summary", get(routes::parallel_summary))
        .route("/session/register", post(routes::register_session))
        .route("/session/heartbeat", post(routes::heartbeat))
        .route("/session/end", post(routes::end_session))
        .route("/task/create", post(routes::create_task))
        .route("/task/request", post(routes::request_task))
        .route("/task/complete", post(routes::complete_task))
        .route("/task/reopen", post(routes::reopen_task))
        .route("/task/edit", post(routes::edit_task))
        .route("/task/delete", post(routes::delete_task))
        .route("/task/note", post(routes::add_note))
        .route("/task/bulk-complete", post(routes::bulk_complete))
        .route("/task/undo", post(routes::undo_last_action))
        .route("/subtask/create", post(routes::create_subtask))
        .route("/subtask/progress", get(routes::subtask_progress))
        .route("/template/create", post(routes::create_template))
        .route("/template/instantiate", post(routes::instantiate_template))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Write `.parallel-mode` and `coordinator.pid`, start the server, and run
/// the periodic cleanup(180s)/flush(1s) maintenance loops until a shutdown
/// signal arrives — then remove both sentinel files so the next session
/// falls back to single mode instead of waiting out a dead coordinator's
/// liveness check (spec §4.4, §4.5).
pub async fn run(config: Arc<ClaudiaConfig>) -> crate::error::CoreResult<()> {
    std::fs::create_dir_all(&config.state_dir)?;
    let sentinel = serde_json::json!({ "port": config.port, "main_session": config.main_session });
    std::fs::write(config.parallel_mode_path(), serde_json::to_string(&sentinel)?)?;
    std::fs::write(config.coordinator_pid_path(), std::process::id().to_string())?;

    let sessions = Arc::new(SessionRegistry::new(
        Arc::new(SystemClock),
        config.heartbeat_warn_secs,
        config.heartbeat_danger_secs,
    ));
    let state = CoordinatorState {
        store: Store::new(config.clone()),
        sessions: sessions.clone(),
        started_at: Instant::now(),
    };

    let cleanup_handle = tokio::spawn(cleanup_loop(state.clone(), config.cleanup_threshold_secs));
    let archive_handle = tokio::spawn(archive_loop(state.clone(), config.clone()));

    let listener = tokio::net::TcpListener::bind(("127.0.0.1", config.port)).await?;
    info!(port = config.port, "coordinator listening");
    let router = build_router(state);

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .into_future()
        .await?;

    cleanup_handle.abort();
    archive_handle.abort();
    let _ = std::fs::remove_file(config.parallel_mode_path());
    let _ = std::fs::remove_file(config.coordinator_pid_path());
    info!("coordinator shut down cleanly");
    Ok(())
}

/// Fixed 30s cadence (spec §4.4); each tick reclaims sessions whose
/// heartbeat is older than `threshold_secs` and releases whatever task they
/// were holding back to `open`.
const CLEANUP_TICK: std::time::Duration = std::time::Duration::from_secs(30);

async fn cleanup_loop(state: CoordinatorState, threshold_secs: i64) {
    let mut ticker = tokio::time::interval(CLEANUP_TICK);
    loop {
        ticker.tick().await;
        let reclaimed = state.sessions.cleanup(threshold_secs).await;
        for (session_id, held_task) in reclaimed {
            warn!(session = %session_id, "reclaiming stale session");
            let _ = state.store.remove_session_snapshot(&session_id).await;
            if let Some(task_id) = held_task {
                if let Err(e) = state
                    .store
                    .reopen_task(task_id.clone(), Some("reclaimed from stale session".into()))
                    .await
                {
                    warn!(task = %task_id, error = %e, "failed to release reclaimed task");
                }
            }
        }
    }
}

/// Daily archival sweep, grounded in the same periodic-maintenance shape as
/// `cleanup_loop` but on a much longer cadence (spec §3 Lifecycle).
async fn archive_loop(state: CoordinatorState, config: Arc<ClaudiaConfig>) {
    let mut ticker = tokio::time::interval(std::time::Duration::from_secs(24 * 60 * 60));
    ticker.tick().await; // first tick fires immediately; skip it at startup
    loop {
        ticker.tick().await;
        match state.store.archive_done_tasks().await {
            Ok(archived) if !archived.is_empty() => {
                info!(count = archived.len(), days = config.archive_days, "archived done tasks")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "archive sweep failed"),
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received, draining in-flight requests");
}
