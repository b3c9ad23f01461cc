//! chainsync-core: the resumable, versioned, transactional batch-indexing loop.
//!
//! # Architecture
//!
//! ```text
//! IndexerRegistry → Supervisor (crash-only restart, capped backoff)
//!                       └── BatchScheduler (one transaction per iteration)
//!                               ├── TipOracle / BlockFetcher (injected block source)
//!                               ├── CursorStore   (memory / SQLite / Postgres)
//!                               └── BatchHandler  (derived writes, same transaction)
//! ```
//!
//! One supervised loop runs per registered indexer name. Each iteration
//! resolves its cursor, fetches an inclusive window of blocks concurrently,
//! runs the handler inside the open transaction and commits the cursor
//! advance together with the handler's writes.

pub mod batch;
pub mod config;
pub mod cursor;
pub mod error;
pub mod handler;
pub mod registry;
pub mod scheduler;
pub mod source;
pub mod supervisor;

pub use batch::{Batch, DEFAULT_BATCH_SIZE};
pub use config::IndexerConfig;
pub use cursor::{CursorStore, IndexerCursor, MemoryCursorStore, MemoryTransaction};
pub use error::IndexerError;
pub use handler::BatchHandler;
pub use registry::IndexerRegistry;
pub use scheduler::BatchScheduler;
pub use source::{Block, BlockFetcher, TipOracle};
pub use supervisor::{BackoffPolicy, ExponentialBackoff, Supervisor, SupervisorState};
