//! Batch window arithmetic.

use serde::{Deserialize, Serialize};

/// Default number of sequence steps added per window.
///
/// Windows are inclusive on both ends, so a full window spans
/// `DEFAULT_BATCH_SIZE + 1` blocks.
pub const DEFAULT_BATCH_SIZE: u64 = 20;

/// An inclusive range of sequence numbers scheduled as one unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Batch {
    /// First sequence number in the window.
    pub start: u64,
    /// Last sequence number in the window, `>= start`.
    pub end: u64,
}

impl Batch {
    /// Computes the window beginning at `start` against a cached tip.
    ///
    /// Returns `None` when `start >= tip`: the indexer has caught up and
    /// there is nothing to schedule. Otherwise the window ends at
    /// `min(start + batch_size, tip)`.
    pub fn next(start: u64, tip: u64, batch_size: u64) -> Option<Batch> {
        if start >= tip {
            return None;
        }
        Some(Batch {
            start,
            end: start.saturating_add(batch_size).min(tip),
        })
    }

    /// Number of blocks covered by the window.
    pub fn block_count(&self) -> u64 {
        self.end - self.start + 1
    }
}
