//! Cursor persistence behind a unit-of-work boundary.
//!
//! A cursor records how far a named indexer has advanced. The store hands
//! out transactions; cursor writes and handler writes made through the same
//! transaction become durable together at commit, which is what makes the
//! loop resumable at an exact position after a crash.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

/// A persisted position for a named indexer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerCursor {
    /// Indexer name, unique per store.
    pub name: String,
    /// Version of the indexing logic that wrote this row.
    pub version: u32,
    /// Last fully indexed sequence number.
    pub seq: u64,
    /// Unix timestamp of the last successful commit.
    pub updated_at: i64,
}

impl IndexerCursor {
    pub fn new(name: impl Into<String>, version: u32, seq: u64) -> Self {
        Self {
            name: name.into(),
            version,
            seq,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }
}

/// Trait for transactional cursor persistence.
///
/// Implementations include `MemoryCursorStore`, `SqliteCursorStore` and
/// `PostgresCursorStore`. `begin` opens a unit of work; writes staged through
/// it are invisible to other readers until `commit`. Dropping an uncommitted
/// transaction discards its writes.
///
/// Deployments run at most one writer per cursor name; implementations are
/// not required to arbitrate concurrent writers of the same row.
#[async_trait]
pub trait CursorStore: Send + Sync {
    /// Transaction handle threaded through one loop iteration.
    type Tx: Send + 'static;

    /// Open a transaction.
    async fn begin(&self) -> Result<Self::Tx, IndexerError>;

    /// Make all writes staged in `tx` durable atomically.
    async fn commit(&self, tx: Self::Tx) -> Result<(), IndexerError>;

    /// Discard all writes staged in `tx`.
    async fn rollback(&self, tx: Self::Tx) -> Result<(), IndexerError>;

    /// Load the cursor for `name` (returns `None` if none exists).
    async fn find_cursor(
        &self,
        tx: &mut Self::Tx,
        name: &str,
    ) -> Result<Option<IndexerCursor>, IndexerError>;

    /// Stage a new cursor row. Fails if a row for the name already exists.
    async fn insert_cursor(
        &self,
        tx: &mut Self::Tx,
        cursor: &IndexerCursor,
    ) -> Result<(), IndexerError>;

    /// Stage an overwrite of an existing cursor row. Fails if none exists.
    async fn update_cursor(
        &self,
        tx: &mut Self::Tx,
        cursor: &IndexerCursor,
    ) -> Result<(), IndexerError>;
}

// ─── In-memory store (for testing) ────────────────────────────────────────────

use std::collections::HashMap;
use std::sync::Mutex;

/// In-memory cursor store for tests and ephemeral runs.
///
/// Transactions stage writes in a private map and apply them to the shared
/// map at commit, so rollback behavior matches the SQL-backed stores.
#[derive(Default)]
pub struct MemoryCursorStore {
    rows: Mutex<HashMap<String, IndexerCursor>>,
}

/// Staged writes for one open `MemoryCursorStore` transaction.
#[derive(Default)]
pub struct MemoryTransaction {
    staged: HashMap<String, IndexerCursor>,
}

impl MemoryCursorStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Committed cursor for `name`, read outside any transaction.
    pub fn get(&self, name: &str) -> Option<IndexerCursor> {
        self.rows.lock().unwrap().get(name).cloned()
    }
}

#[async_trait]
impl CursorStore for MemoryCursorStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx, IndexerError> {
        Ok(MemoryTransaction::default())
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), IndexerError> {
        let mut rows = self.rows.lock().unwrap();
        for (name, cursor) in tx.staged {
            rows.insert(name, cursor);
        }
        Ok(())
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), IndexerError> {
        drop(tx);
        Ok(())
    }

    async fn find_cursor(
        &self,
        tx: &mut Self::Tx,
        name: &str,
    ) -> Result<Option<IndexerCursor>, IndexerError> {
        // Staged writes shadow committed rows within the transaction.
        if let Some(cursor) = tx.staged.get(name) {
            return Ok(Some(cursor.clone()));
        }
        Ok(self.rows.lock().unwrap().get(name).cloned())
    }

    async fn insert_cursor(
        &self,
        tx: &mut Self::Tx,
        cursor: &IndexerCursor,
    ) -> Result<(), IndexerError> {
        if tx.staged.contains_key(&cursor.name)
            || self.rows.lock().unwrap().contains_key(&cursor.name)
        {
            return Err(IndexerError::Storage(format!(
                "cursor '{}' already exists",
                cursor.name
            )));
        }
        tx.staged.insert(cursor.name.clone(), cursor.clone());
        Ok(())
    }

    async fn update_cursor(
        &self,
        tx: &mut Self::Tx,
        cursor: &IndexerCursor,
    ) -> Result<(), IndexerError> {
        if !tx.staged.contains_key(&cursor.name)
            && !self.rows.lock().unwrap().contains_key(&cursor.name)
        {
            return Err(IndexerError::Storage(format!(
                "no cursor row for '{}'",
                cursor.name
            )));
        }
        tx.staged.insert(cursor.name.clone(), cursor.clone());
        Ok(())
    }
}
