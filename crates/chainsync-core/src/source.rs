//! Capabilities the loop needs from a block source.
//!
//! The loop never talks to a chain directly. It is handed something that can
//! report the tip and fetch single blocks; everything else about the source
//! (transport, retries, caching) lives behind these traits.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// A fetched block paired with the sequence number it was requested at.
///
/// The payload is opaque to the loop; handlers interpret it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block<T> {
    /// Sequence number, `>= 1`.
    pub seq: u64,
    /// Source-defined block payload.
    pub content: T,
}

/// Trait for querying the latest sequence number at the source.
#[async_trait]
pub trait TipOracle: Send + Sync {
    /// Latest known sequence number. Side-effect free, may fail transiently.
    async fn latest_seq(&self) -> Result<u64, IndexerError>;
}

/// Trait for fetching a single block by sequence number.
///
/// Fetches must be idempotent: after a failed iteration the loop refetches
/// the same range. Calls carry no ordering requirement; the scheduler issues
/// them concurrently and reassembles order itself.
#[async_trait]
pub trait BlockFetcher: Send + Sync {
    /// Block payload type handed through to handlers.
    type Content: Send + Sync + 'static;

    /// Fetch the block at `seq`.
    async fn fetch_block(&self, seq: u64) -> Result<Self::Content, IndexerError>;
}
