//! Registration and startup of a set of named indexers.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::IndexerConfig;
use crate::cursor::CursorStore;
use crate::handler::BatchHandler;
use crate::scheduler::BatchScheduler;
use crate::source::{BlockFetcher, TipOracle};
use crate::supervisor::{ExponentialBackoff, Supervisor};

struct Registration<Tx, B> {
    name: String,
    version: u32,
    handler: Arc<dyn BatchHandler<Tx, B>>,
}

/// Collects named indexers and launches one supervised loop per entry.
///
/// Every loop shares the block source and the store engine. Nothing else is
/// shared: each loop owns its cursor row, its cached tip and its
/// transactions, so one indexer stalling or failing never holds up another.
pub struct IndexerRegistry<C: TipOracle + BlockFetcher, S: CursorStore> {
    chain: Arc<C>,
    store: Arc<S>,
    config: IndexerConfig,
    entries: Vec<Registration<S::Tx, C::Content>>,
}

impl<C, S> IndexerRegistry<C, S>
where
    C: TipOracle + BlockFetcher + 'static,
    S: CursorStore + 'static,
{
    pub fn new(chain: Arc<C>, store: Arc<S>, config: IndexerConfig) -> Self {
        Self {
            chain,
            store,
            config,
            entries: Vec::new(),
        }
    }

    /// Register an indexer under `name`.
    ///
    /// `version` stamps every cursor row the indexer writes; bumping it
    /// makes the loop re-index from the start on next launch.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        version: u32,
        handler: Arc<dyn BatchHandler<S::Tx, C::Content>>,
    ) {
        let name = name.into();
        tracing::debug!(indexer = %name, version, "Registered indexer");
        self.entries.push(Registration {
            name,
            version,
            handler,
        });
    }

    /// Launch one supervised task per registered indexer.
    ///
    /// The tasks run until the process terminates. Handles are returned for
    /// callers that want to await or abort them.
    pub fn spawn(self) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::with_capacity(self.entries.len());
        for entry in self.entries {
            let scheduler = BatchScheduler::new(
                entry.name,
                entry.version,
                self.chain.clone(),
                self.store.clone(),
                entry.handler,
                self.config.clone(),
            );
            let backoff = ExponentialBackoff {
                initial_delay: Duration::from_millis(self.config.initial_backoff_ms),
                max_delay: Duration::from_millis(self.config.max_backoff_ms),
                multiplier: 2.0,
            };
            let mut supervisor = Supervisor::new(scheduler, Box::new(backoff));
            handles.push(tokio::spawn(async move { supervisor.run().await }));
        }
        tracing::info!(indexers = handles.len(), "Spawned index loops");
        handles
    }
}
