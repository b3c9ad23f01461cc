//! Error types for the chainsync loop.

use thiserror::Error;

/// Errors that can occur while driving an indexer.
#[derive(Debug, Error)]
pub enum IndexerError {
    #[error("Source error: {0}")]
    Source(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Handler error in '{name}': {reason}")]
    Handler { name: String, reason: String },

    #[error("Incompatible version for '{name}': stored {stored}, target {target}")]
    IncompatibleVersion {
        name: String,
        stored: u32,
        target: u32,
    },

    #[error("{0}")]
    Other(String),
}

impl IndexerError {
    /// Returns `true` if restarting the loop can plausibly clear the error.
    ///
    /// A version mismatch cannot be retried away: the stored cursor was
    /// written by newer indexing logic than the running binary. Deploy the
    /// newer code or reset the cursor by hand.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::IncompatibleVersion { .. })
    }
}
