//! Sync cursor and window planning.

use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// How the controller is reading the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Following the live head.
    Live,
    /// Replaying history, optionally against a fork.
    Replay,
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => write!(f, "live"),
            Self::Replay => write!(f, "replay"),
        }
    }
}

/// Inclusive block range to fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockWindow {
    /// First block
    pub from_block: u64,
    /// Last block, inclusive
    pub to_block: u64,
}

impl BlockWindow {
    /// Number of blocks in the window.
    #[must_use]
    pub const fn block_count(&self) -> u64 {
        self.to_block - self.from_block + 1
    }
}

impl fmt::Display for BlockWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.from_block, self.to_block)
    }
}

/// Progress of the controller through the chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    last_block_processed: u64,
    reorg_delay: u64,
    mode: SyncMode,
}

impl SyncCursor {
    /// Cursor positioned after `last_block_processed`.
    #[must_use]
    pub const fn new(last_block_processed: u64, reorg_delay: u64, mode: SyncMode) -> Self {
        Self {
            last_block_processed,
            reorg_delay,
            mode,
        }
    }

    /// Last block whose records have been applied.
    #[must_use]
    pub const fn last_block_processed(&self) -> u64 {
        self.last_block_processed
    }

    /// Blocks withheld below the head.
    #[must_use]
    pub const fn reorg_delay(&self) -> u64 {
        self.reorg_delay
    }

    /// Current mode.
    #[must_use]
    pub const fn mode(&self) -> SyncMode {
        self.mode
    }

    /// Highest block that may be processed at `head`.
    #[must_use]
    pub const fn safe_head(&self, head: u64) -> Option<u64> {
        head.checked_sub(self.reorg_delay)
    }

    /// Advance past a window that was fetched and applied.
    ///
    /// The cursor never moves backwards.
    pub fn commit(&mut self, window: BlockWindow) {
        if window.to_block > self.last_block_processed {
            debug!(from = self.last_block_processed, to = window.to_block, "Cursor advanced");
            self.last_block_processed = window.to_block;
        }
    }
}

/// Next window to fetch, or `None` when the safe head has not moved past
/// the cursor.
///
/// `to_block` never exceeds `head - reorg_delay` and the window never spans
/// more than `max_block_fetch` blocks.
#[must_use]
pub fn plan_window(cursor: &SyncCursor, head: u64, max_block_fetch: u64) -> Option<BlockWindow> {
    let from_block = cursor.last_block_processed.checked_add(1)?;
    let safe_head = cursor.safe_head(head)?;
    if safe_head < from_block {
        return None;
    }

    let span = max_block_fetch.max(1) - 1;
    let to_block = safe_head.min(from_block.saturating_add(span));
    Some(BlockWindow { from_block, to_block })
}
