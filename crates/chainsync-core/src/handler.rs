//! Batch handler trait.

use async_trait::async_trait;

use crate::error::IndexerError;
use crate::source::Block;

/// Trait implemented by consumers to index a batch of blocks.
///
/// The handler runs inside the iteration's transaction: reads and writes
/// issued through `tx` commit together with the cursor advance, or not at
/// all. Implementations must not commit or roll back `tx` themselves. An
/// error aborts the whole batch; the same range is retried later.
#[async_trait]
pub trait BatchHandler<Tx, B>: Send + Sync {
    /// Index `blocks`, ordered by ascending `seq`, through `tx`.
    async fn handle_batch(&self, tx: &mut Tx, blocks: &[Block<B>]) -> Result<(), IndexerError>;
}
