//! chainsync-storage: sqlx-backed cursor stores for ChainSync.
//!
//! Backends:
//! - [`sqlite`]: embedded, single-file persistence (default feature)
//! - `postgres`: shared server deployments (`postgres` feature)

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCursorStore;

#[cfg(feature = "postgres")]
pub use postgres::{PostgresCursorStore, PostgresOptions};
