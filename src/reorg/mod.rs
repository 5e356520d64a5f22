//! Reorg-safe block range planning.
//!
//! Reorg handling is a conservative margin, not a fork-choice algorithm:
//! the newest `reorg_delay` blocks are never fetched, so the store only
//! ever reflects blocks that are unlikely to be reorganized away.
//!
//! ```text
//!   last_block_processed      safe_head = head - reorg_delay      head
//!            │ from ─────────── to │                               │
//!   ─────────┴────[ window ]───────┴──────── withheld ─────────────┴──
//! ```
//!
//! The window is further clamped to the provider's max blocks per call.
//!
//! ## Example
//!
//! ```
//! use dex_state_sync::reorg::{plan_window, SyncCursor, SyncMode};
//!
//! let cursor = SyncCursor::new(990, 2, SyncMode::Live);
//! let window = plan_window(&cursor, 1000, 2000).unwrap();
//! assert_eq!((window.from_block, window.to_block), (991, 998));
//! ```

pub mod window;

pub use window::{plan_window, BlockWindow, SyncCursor, SyncMode};
