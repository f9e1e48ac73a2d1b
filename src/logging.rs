//! `tracing-subscriber` + `tracing-appender` setup, following the teacher's
//! `main.rs::setup_logging` — daily-rolling file under the state directory,
//! falling back to stdout if the directory can't be created.

use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;

/// Returns the `WorkerGuard` the caller must keep alive for the process
/// lifetime — dropping it flushes and detaches the non-blocking writer.
pub fn setup_logging(state_dir: &Path, level: &str) -> WorkerGuard {
    let filter = tracing_subscriber::EnvFilter::try_new(level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match std::fs::create_dir_all(state_dir) {
        Ok(()) => {
            let file_appender = tracing_appender::rolling::daily(state_dir, "claudia.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .init();
            guard
        }
        Err(e) => {
            eprintln!("failed to create log directory {}: {e} — logging to stdout", state_dir.display());
            let (non_blocking, guard) = tracing_appender::non_blocking(std::io::stdout());
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .init();
            guard
        }
    }
}
