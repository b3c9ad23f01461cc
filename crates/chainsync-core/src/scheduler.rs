//! The batch scheduler — one transactional iteration at a time.
//!
//! # One iteration
//! 1. Open a transaction on the cursor store.
//! 2. Resolve the start position from the stored cursor:
//!    no row → 1, same version → `seq + 1`, older version → 1 (full
//!    re-index), newer version → fail.
//! 3. Compute the next window against the cached tip; if the cursor has
//!    caught up, roll back and report no work. Nothing is written on this
//!    path, not even on a first run.
//! 4. Stage the cursor advance to the window's end, then fetch every block
//!    in the window concurrently.
//! 5. Run the handler inside the same transaction, then commit. The cursor
//!    advance and the handler's writes become durable together.
//!
//! Any failure between begin and commit rolls the whole iteration back, so
//! a crash at any point resumes at the last committed position.
//!
//! # Tip caching
//! `run` queries the tip once at startup and reuses it for every iteration
//! until the loop catches up. Only then does it sleep and re-query. A batch
//! therefore never chases a moving target mid-stride.

use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::batch::Batch;
use crate::config::IndexerConfig;
use crate::cursor::{CursorStore, IndexerCursor};
use crate::error::IndexerError;
use crate::handler::BatchHandler;
use crate::source::{Block, BlockFetcher, TipOracle};

/// Drives one named indexer against a block source and a cursor store.
pub struct BatchScheduler<C: TipOracle + BlockFetcher, S: CursorStore> {
    name: String,
    version: u32,
    chain: Arc<C>,
    store: Arc<S>,
    handler: Arc<dyn BatchHandler<S::Tx, C::Content>>,
    config: IndexerConfig,
}

impl<C: TipOracle + BlockFetcher, S: CursorStore> BatchScheduler<C, S> {
    pub fn new(
        name: impl Into<String>,
        version: u32,
        chain: Arc<C>,
        store: Arc<S>,
        handler: Arc<dyn BatchHandler<S::Tx, C::Content>>,
        config: IndexerConfig,
    ) -> Self {
        Self {
            name: name.into(),
            version,
            chain,
            store,
            handler,
            config,
        }
    }

    /// Name this scheduler indexes under.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the loop until an error escapes.
    ///
    /// The tip is cached across iterations and refreshed only after the
    /// loop has caught up and slept through one poll interval.
    pub async fn run(&self) -> Result<(), IndexerError> {
        let poll_interval = Duration::from_millis(self.config.poll_interval_ms);
        let mut tip = self.chain.latest_seq().await?;
        tracing::info!(
            indexer = %self.name,
            version = self.version,
            tip,
            "Starting index loop"
        );

        loop {
            if self.iterate(tip).await?.is_none() {
                tracing::debug!(indexer = %self.name, tip, "Caught up, waiting for new blocks");
                tokio::time::sleep(poll_interval).await;
                tip = self.chain.latest_seq().await?;
            }
        }
    }

    /// Run a single transactional iteration against `cached_tip`.
    ///
    /// Returns the window that was indexed and committed, or `None` if the
    /// cursor had already caught up with the cached tip.
    pub async fn iterate(&self, cached_tip: u64) -> Result<Option<Batch>, IndexerError> {
        let mut tx = self.store.begin().await?;
        match self.advance(&mut tx, cached_tip).await {
            Ok(Some(batch)) => {
                self.store.commit(tx).await?;
                Ok(Some(batch))
            }
            Ok(None) => {
                self.store.rollback(tx).await?;
                Ok(None)
            }
            Err(err) => {
                // Nothing from this iteration may survive
                if let Err(rb) = self.store.rollback(tx).await {
                    tracing::warn!(indexer = %self.name, error = %rb, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn advance(
        &self,
        tx: &mut S::Tx,
        cached_tip: u64,
    ) -> Result<Option<Batch>, IndexerError> {
        let existing = self.store.find_cursor(tx, &self.name).await?;

        let start = match &existing {
            None => 1,
            Some(cursor) if cursor.version == self.version => cursor.seq + 1,
            Some(cursor) if cursor.version < self.version => {
                tracing::warn!(
                    indexer = %self.name,
                    stored = cursor.version,
                    target = self.version,
                    "Version upgraded, re-indexing from the start"
                );
                1
            }
            Some(cursor) => {
                return Err(IndexerError::IncompatibleVersion {
                    name: self.name.clone(),
                    stored: cursor.version,
                    target: self.version,
                });
            }
        };

        let batch = match Batch::next(start, cached_tip, self.config.batch_size) {
            Some(batch) => batch,
            None => return Ok(None), // Caught up with the cached tip
        };

        // Stage the advance up front; it only becomes durable at commit
        let cursor = IndexerCursor::new(&self.name, self.version, batch.end);
        match existing {
            Some(_) => self.store.update_cursor(tx, &cursor).await?,
            None => self.store.insert_cursor(tx, &cursor).await?,
        }

        // Fetch the whole window concurrently; any failure aborts the batch
        let started = Instant::now();
        let fetches = (batch.start..=batch.end).map(|seq| self.fetch_one(seq));
        let blocks = futures::future::try_join_all(fetches).await?;
        tracing::info!(
            indexer = %self.name,
            start = batch.start,
            end = batch.end,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch loaded"
        );

        let started = Instant::now();
        self.handler
            .handle_batch(tx, &blocks)
            .await
            .map_err(|e| IndexerError::Handler {
                name: self.name.clone(),
                reason: e.to_string(),
            })?;
        tracing::info!(
            indexer = %self.name,
            start = batch.start,
            end = batch.end,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Batch indexed"
        );

        Ok(Some(batch))
    }

    async fn fetch_one(&self, seq: u64) -> Result<Block<C::Content>, IndexerError> {
        let content = self.chain.fetch_block(seq).await?;
        Ok(Block { seq, content })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::cursor::{MemoryCursorStore, MemoryTransaction};

    struct MockChain {
        tip: AtomicU64,
        failing_seqs: Mutex<HashSet<u64>>,
    }

    impl MockChain {
        fn new(tip: u64) -> Self {
            Self {
                tip: AtomicU64::new(tip),
                failing_seqs: Mutex::new(HashSet::new()),
            }
        }

        fn set_tip(&self, tip: u64) {
            self.tip.store(tip, Ordering::SeqCst);
        }

        fn fail_at(&self, seq: u64) {
            self.failing_seqs.lock().unwrap().insert(seq);
        }

        fn heal(&self) {
            self.failing_seqs.lock().unwrap().clear();
        }
    }

    #[async_trait]
    impl TipOracle for MockChain {
        async fn latest_seq(&self) -> Result<u64, IndexerError> {
            Ok(self.tip.load(Ordering::SeqCst))
        }
    }

    #[async_trait]
    impl BlockFetcher for MockChain {
        type Content = String;

        async fn fetch_block(&self, seq: u64) -> Result<String, IndexerError> {
            if self.failing_seqs.lock().unwrap().contains(&seq) {
                return Err(IndexerError::Source(format!("fetch {seq} failed")));
            }
            Ok(format!("payload-{seq}"))
        }
    }

    #[derive(Default)]
    struct RecordingHandler {
        batches: Mutex<Vec<Vec<(u64, String)>>>,
        fail_next: AtomicBool,
    }

    impl RecordingHandler {
        fn seq_ranges(&self) -> Vec<(u64, u64)> {
            self.batches
                .lock()
                .unwrap()
                .iter()
                .map(|batch| (batch[0].0, batch[batch.len() - 1].0))
                .collect()
        }

        fn batch_count(&self) -> usize {
            self.batches.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl BatchHandler<MemoryTransaction, String> for RecordingHandler {
        async fn handle_batch(
            &self,
            _tx: &mut MemoryTransaction,
            blocks: &[Block<String>],
        ) -> Result<(), IndexerError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(IndexerError::Other("handler blew up".into()));
            }
            let seen = blocks
                .iter()
                .map(|b| (b.seq, b.content.clone()))
                .collect::<Vec<_>>();
            self.batches.lock().unwrap().push(seen);
            Ok(())
        }
    }

    struct Fixture {
        chain: Arc<MockChain>,
        store: Arc<MemoryCursorStore>,
        handler: Arc<RecordingHandler>,
    }

    impl Fixture {
        fn new(tip: u64) -> Self {
            Self {
                chain: Arc::new(MockChain::new(tip)),
                store: Arc::new(MemoryCursorStore::new()),
                handler: Arc::new(RecordingHandler::default()),
            }
        }

        fn scheduler(&self, name: &str, version: u32) -> BatchScheduler<MockChain, MemoryCursorStore> {
            BatchScheduler::new(
                name,
                version,
                self.chain.clone(),
                self.store.clone(),
                self.handler.clone(),
                IndexerConfig::default(),
            )
        }

        async fn seed_cursor(&self, name: &str, version: u32, seq: u64) {
            let mut tx = self.store.begin().await.unwrap();
            self.store
                .insert_cursor(&mut tx, &IndexerCursor::new(name, version, seq))
                .await
                .unwrap();
            self.store.commit(tx).await.unwrap();
        }
    }

    #[tokio::test]
    async fn fresh_cursor_indexes_from_one() {
        let fx = Fixture::new(5);
        let scheduler = fx.scheduler("block_generic", 1);

        let batch = scheduler.iterate(5).await.unwrap().unwrap();
        assert_eq!((batch.start, batch.end), (1, 5));

        let cursor = fx.store.get("block_generic").unwrap();
        assert_eq!(cursor.seq, 5);
        assert_eq!(cursor.version, 1);

        // Short chain: one partial window, delivered in order
        let batches = fx.handler.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        let seqs: Vec<u64> = batches[0].iter().map(|(seq, _)| *seq).collect();
        assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
        assert_eq!(batches[0][2].1, "payload-3");
    }

    #[tokio::test]
    async fn caught_up_iteration_reports_no_work() {
        let fx = Fixture::new(5);
        let scheduler = fx.scheduler("block_generic", 1);

        scheduler.iterate(5).await.unwrap().unwrap();
        let before = fx.store.get("block_generic").unwrap();

        assert!(scheduler.iterate(5).await.unwrap().is_none());
        assert_eq!(fx.handler.batch_count(), 1);

        let after = fx.store.get("block_generic").unwrap();
        assert_eq!(after.seq, before.seq);
        assert_eq!(after.updated_at, before.updated_at);
    }

    #[tokio::test]
    async fn no_work_on_fresh_store_writes_no_cursor() {
        let fx = Fixture::new(1);
        let scheduler = fx.scheduler("block_generic", 1);

        // Tip 1 means nothing is indexable yet: start 1 >= tip 1
        assert!(scheduler.iterate(1).await.unwrap().is_none());
        assert!(fx.store.get("block_generic").is_none());
        assert_eq!(fx.handler.batch_count(), 0);
    }

    #[tokio::test]
    async fn windows_tile_until_caught_up() {
        let fx = Fixture::new(50);
        let scheduler = fx.scheduler("block_generic", 1);

        while scheduler.iterate(50).await.unwrap().is_some() {}

        assert_eq!(fx.handler.seq_ranges(), vec![(1, 21), (22, 42), (43, 50)]);
        assert_eq!(fx.store.get("block_generic").unwrap().seq, 50);
    }

    #[tokio::test]
    async fn resumes_after_existing_cursor() {
        let fx = Fixture::new(50);
        fx.seed_cursor("block_generic", 1, 21).await;
        let scheduler = fx.scheduler("block_generic", 1);

        let batch = scheduler.iterate(50).await.unwrap().unwrap();
        assert_eq!((batch.start, batch.end), (22, 42));
    }

    #[tokio::test]
    async fn version_upgrade_reindexes_from_the_start() {
        let fx = Fixture::new(50);
        fx.seed_cursor("block_tx", 1, 30).await;
        let scheduler = fx.scheduler("block_tx", 2);

        let batch = scheduler.iterate(50).await.unwrap().unwrap();
        assert_eq!((batch.start, batch.end), (1, 21));

        let cursor = fx.store.get("block_tx").unwrap();
        assert_eq!(cursor.version, 2);
        assert_eq!(cursor.seq, 21);
    }

    #[tokio::test]
    async fn version_downgrade_fails_and_leaves_cursor_alone() {
        let fx = Fixture::new(50);
        fx.seed_cursor("block_tx", 3, 30).await;
        let scheduler = fx.scheduler("block_tx", 2);

        let err = scheduler.iterate(50).await.unwrap_err();
        assert!(matches!(
            err,
            IndexerError::IncompatibleVersion { stored: 3, target: 2, .. }
        ));
        assert!(!err.is_retryable());

        let cursor = fx.store.get("block_tx").unwrap();
        assert_eq!(cursor.version, 3);
        assert_eq!(cursor.seq, 30);
        assert_eq!(fx.handler.batch_count(), 0);
    }

    #[tokio::test]
    async fn fetch_failure_discards_the_whole_iteration() {
        let fx = Fixture::new(5);
        fx.chain.fail_at(3);
        let scheduler = fx.scheduler("block_generic", 1);

        let err = scheduler.iterate(5).await.unwrap_err();
        assert!(matches!(err, IndexerError::Source(_)));

        // No cursor advance, no handler call
        assert!(fx.store.get("block_generic").is_none());
        assert_eq!(fx.handler.batch_count(), 0);

        // Same range succeeds once the source recovers
        fx.chain.heal();
        let batch = scheduler.iterate(5).await.unwrap().unwrap();
        assert_eq!((batch.start, batch.end), (1, 5));
        assert_eq!(fx.store.get("block_generic").unwrap().seq, 5);
    }

    #[tokio::test]
    async fn handler_failure_discards_the_cursor_advance() {
        let fx = Fixture::new(5);
        fx.handler.fail_next.store(true, Ordering::SeqCst);
        let scheduler = fx.scheduler("block_generic", 1);

        let err = scheduler.iterate(5).await.unwrap_err();
        assert!(matches!(err, IndexerError::Handler { .. }));
        assert!(fx.store.get("block_generic").is_none());

        // Retry covers the same range
        let batch = scheduler.iterate(5).await.unwrap().unwrap();
        assert_eq!((batch.start, batch.end), (1, 5));
    }

    #[tokio::test]
    async fn run_refreshes_tip_only_after_catching_up() {
        let fx = Fixture::new(5);
        let config = IndexerConfig {
            poll_interval_ms: 20,
            ..IndexerConfig::default()
        };
        let scheduler = Arc::new(BatchScheduler::new(
            "block_generic",
            1,
            fx.chain.clone(),
            fx.store.clone(),
            fx.handler.clone(),
            config,
        ));

        let task = tokio::spawn({
            let scheduler = scheduler.clone();
            async move { scheduler.run().await }
        });

        wait_until(|| fx.handler.seq_ranges() == vec![(1, 5)]).await;

        // The loop is idle until the source grows past the cached tip
        fx.chain.set_tip(8);
        wait_until(|| fx.handler.seq_ranges() == vec![(1, 5), (6, 8)]).await;

        assert_eq!(fx.store.get("block_generic").unwrap().seq, 8);
        task.abort();
    }

    async fn wait_until(predicate: impl Fn() -> bool) {
        for _ in 0..200 {
            if predicate() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }
}
