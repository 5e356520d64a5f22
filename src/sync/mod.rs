//! Sync controller: bootstrap, polling cycles, replay and terraforming.
//!
//! [`SyncContext`] owns everything a run needs (providers, adapters,
//! datasets, settings) and is threaded through the [`SyncController`],
//! which owns the [`crate::store::PoolStore`] exclusively.
//!
//! ## Example
//!
//! ```rust,no_run
//! use dex_state_sync::config::Config;
//! use dex_state_sync::snapshot::LoggingConsumer;
//! use dex_state_sync::sync::{SyncContext, SyncController};
//!
//! # async fn example() -> dex_state_sync::error::TrackerResult<()> {
//! let config = Config::from_env()?;
//! let mut controller = SyncController::new(SyncContext::from_config(&config)?);
//! let summary = controller.run(&mut LoggingConsumer).await?;
//! println!("stopped after {} cycles", summary.cycles);
//! # Ok(())
//! # }
//! ```

pub mod context;
pub mod controller;
pub mod terraform;

pub use context::{SyncContext, SyncSettings};
pub use controller::{ControllerState, CycleReport, RunSummary, StopReason, SyncController};
pub use terraform::TerraformReport;
