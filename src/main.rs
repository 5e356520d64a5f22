//! CLI entry point for the DEX pool state synchronizer.
//!
//! ```text
//! main.rs (runtime + tracing)
//!     ↓
//! cli::run
//!     ↓
//! Config ─► SyncContext ─► SyncController::run ─► snapshots
//! ```
//!
//! Logging is controlled with `RUST_LOG`, `LOG_JSON` and `LOG_FILE`.

use dex_state_sync::{cli, observability};
use tracing::error;

#[tokio::main]
async fn main() {
    let log_level = std::env::var("RUST_LOG").ok();
    let log_file = std::env::var("LOG_FILE").ok().map(std::path::PathBuf::from);
    let json_output = std::env::var("LOG_JSON")
        .unwrap_or_else(|_| "false".to_string())
        .parse::<bool>()
        .unwrap_or(false);

    // Dropping the guard stops the file writer.
    let _guard = match observability::init_tracing(log_level, log_file, json_output) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize tracing: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = cli::run().await {
        error!(error = %e, "Application error");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
