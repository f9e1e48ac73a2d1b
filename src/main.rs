//! Coordinator binary entry point. The full CLI surface (task listing,
//! session inspection, etc.) is a separate concern from this core crate —
//! this binary only boots the Coordinator service for parallel-mode
//! sessions, following the teacher's `main.rs` argument shape trimmed down
//! to what this crate actually owns.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;

#[derive(Parser)]
#[command(name = "claudia-coordinator", about = "Coordination core for multi-agent coding sessions", version)]
struct Args {
    /// HTTP port for the coordinator service.
    #[arg(long, env = "CLAUDIA_PORT")]
    port: Option<u16>,

    /// State directory holding tasks.json, history.jsonl, and sentinel files.
    #[arg(long, env = "CLAUDIA_STATE_DIR")]
    state_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "CLAUDIA_LOG")]
    log: Option<String>,

    /// Id of the session starting this coordinator, recorded in the
    /// `.parallel-mode` sentinel for other sessions to discover.
    #[arg(long, env = "CLAUDIA_MAIN_SESSION")]
    main_session: Option<String>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();
    let config = Arc::new(claudia_core::ClaudiaConfig::with_main_session(
        args.port,
        args.state_dir.clone(),
        args.log,
        args.main_session,
    ));

    let _guard = claudia_core::logging::setup_logging(&config.state_dir, &config.log);

    if let Err(e) = claudia_core::coordinator::run(config).await {
        error!(error = %e, "coordinator exited with error");
        std::process::exit(1);
    }
}
