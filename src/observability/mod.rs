//! Structured logging.
//!
//! Console output is pretty by default and JSON for log aggregation. An
//! optional file layer writes JSON with daily rotation.
//!
//! # Usage
//!
//! ```no_run
//! use dex_state_sync::observability;
//!
//! # fn main() -> dex_state_sync::error::TrackerResult<()> {
//! // Keep the guard alive for as long as file logs should be flushed.
//! let _guard = observability::init_tracing(None, None, false)?;
//! # Ok(())
//! # }
//! ```
//!
//! # Environment Configuration
//!
//! ```bash
//! # Component-specific levels
//! RUST_LOG=dex_state_sync=debug,alloy=warn dex-state-sync run
//!
//! # JSON output and a rotating file
//! LOG_JSON=true LOG_FILE=./logs/sync.log dex-state-sync run
//! ```
//!
//! Every controller cycle runs inside a `cycle` span carrying the cycle
//! index and the sync mode, so JSON output can be grouped per cycle.

use crate::error::{TrackerError, TrackerResult};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Filter used when neither `RUST_LOG` nor a level is given.
pub const DEFAULT_FILTER: &str = "dex_state_sync=info,warn";

/// Resolve the filter directive: `RUST_LOG`, then `log_level`, then
/// [`DEFAULT_FILTER`].
#[must_use]
pub fn filter_directive(rust_log: Option<String>, log_level: Option<String>) -> String {
    rust_log
        .or(log_level)
        .unwrap_or_else(|| DEFAULT_FILTER.to_string())
}

/// Install the global subscriber.
///
/// Returns the file writer's guard when `log_file` is set; dropping it
/// stops file output.
///
/// # Errors
///
/// Returns a configuration error if the log directory cannot be created or
/// a subscriber is already installed.
pub fn init_tracing(
    log_level: Option<String>,
    log_file: Option<PathBuf>,
    json_output: bool,
) -> TrackerResult<Option<WorkerGuard>> {
    let env_filter = EnvFilter::new(filter_directive(std::env::var("RUST_LOG").ok(), log_level));

    let console_layer = if json_output {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed()
    } else {
        fmt::layer()
            .pretty()
            .with_target(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    let (file_layer, guard) = match &log_file {
        Some(path) => {
            let dir = path.parent().unwrap_or_else(|| Path::new("."));
            std::fs::create_dir_all(dir).map_err(|e| {
                TrackerError::config(
                    format!("Failed to create log directory {}", dir.display()),
                    Some(Box::new(e)),
                )
            })?;

            let appender = tracing_appender::rolling::daily(
                dir,
                path.file_name().unwrap_or_else(|| OsStr::new("dex-state-sync.log")),
            );
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_current_span(true)
                .with_span_list(true)
                .with_target(true)
                .boxed();
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| TrackerError::config("Failed to initialize tracing", Some(Box::new(e))))?;

    info!(json_output, file_logging = log_file.is_some(), "Tracing initialized");
    Ok(guard)
}

/// Route logs to the test harness. Safe to call from every test.
#[cfg(any(test, feature = "test-utils"))]
pub fn init_test_tracing() {
    use tracing_subscriber::fmt::format::FmtSpan;

    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(EnvFilter::new("dex_state_sync=debug"))
        .with_span_events(FmtSpan::CLOSE)
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rust_log_takes_precedence() {
        assert_eq!(
            filter_directive(Some("debug".to_string()), Some("info".to_string())),
            "debug"
        );
    }

    #[test]
    fn test_level_then_default() {
        assert_eq!(filter_directive(None, Some("trace".to_string())), "trace");
        assert_eq!(filter_directive(None, None), DEFAULT_FILTER);
    }

    #[test]
    fn test_second_init_is_an_error() {
        init_test_tracing();
        assert!(matches!(
            init_tracing(None, None, false),
            Err(TrackerError::ConfigError { .. })
        ));
    }
}
