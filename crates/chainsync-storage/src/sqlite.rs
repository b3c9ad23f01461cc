//! SQLite cursor store for ChainSync.
//!
//! Persists indexer cursors to a single SQLite file. Uses `sqlx` with WAL
//! mode so status reads stay cheap while an indexer holds a write
//! transaction. Handlers that keep their derived tables in the same file
//! get the crash consistency of the loop for free.
//!
//! # Usage
//! ```rust,no_run
//! use chainsync_storage::sqlite::SqliteCursorStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // File-backed (persistent)
//! let store = SqliteCursorStore::open("./chainsync.db").await?;
//!
//! // In-memory (tests / ephemeral)
//! let store = SqliteCursorStore::in_memory().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use tracing::debug;

use chainsync_core::cursor::{CursorStore, IndexerCursor};
use chainsync_core::error::IndexerError;

/// SQLite-backed cursor store.
pub struct SqliteCursorStore {
    pool: SqlitePool,
}

impl SqliteCursorStore {
    /// Open (or create) a SQLite database at `path`.
    ///
    /// The path may be a plain file path (`"./chainsync.db"`) or a full
    /// SQLite URL (`"sqlite:./chainsync.db?mode=rwc"`).
    pub async fn open(path: &str) -> Result<Self, IndexerError> {
        let url = if path.starts_with("sqlite:") {
            path.to_string()
        } else {
            format!("sqlite:{path}?mode=rwc")
        };

        let pool = SqlitePool::connect(&url)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Open an in-memory SQLite database.
    ///
    /// All data is lost when the pool is dropped. Ideal for tests.
    pub async fn in_memory() -> Result<Self, IndexerError> {
        // Single connection: every new connection to :memory: would open
        // its own fresh, empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Create tables and enable WAL mode.
    async fn init_schema(&self) -> Result<(), IndexerError> {
        sqlx::query("PRAGMA journal_mode=WAL;")
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS cursors (
                name       TEXT    PRIMARY KEY,
                version    INTEGER NOT NULL,
                seq        INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(())
    }

    /// The underlying pool, for handlers that keep their derived tables in
    /// the same database.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ─── Operator helpers (outside any transaction) ──────────────────────────────

    /// Committed cursor row for `name`.
    pub async fn latest_cursor(&self, name: &str) -> Result<Option<IndexerCursor>, IndexerError> {
        let row = sqlx::query(
            "SELECT name, version, seq, updated_at FROM cursors WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(row.map(|r| IndexerCursor {
            name: r.get("name"),
            version: r.get::<i64, _>("version") as u32,
            seq: r.get::<i64, _>("seq") as u64,
            updated_at: r.get("updated_at"),
        }))
    }

    /// All committed cursor rows, ordered by name.
    pub async fn list_cursors(&self) -> Result<Vec<IndexerCursor>, IndexerError> {
        let rows = sqlx::query(
            "SELECT name, version, seq, updated_at FROM cursors ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(rows
            .into_iter()
            .map(|r| IndexerCursor {
                name: r.get("name"),
                version: r.get::<i64, _>("version") as u32,
                seq: r.get::<i64, _>("seq") as u64,
                updated_at: r.get("updated_at"),
            })
            .collect())
    }

    /// Delete the cursor row for `name`, forcing a full re-index on next run.
    ///
    /// Returns `true` if a row existed.
    pub async fn delete_cursor(&self, name: &str) -> Result<bool, IndexerError> {
        let result = sqlx::query("DELETE FROM cursors WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))?;

        debug!(name, deleted = result.rows_affected(), "cursor reset");
        Ok(result.rows_affected() > 0)
    }
}

// ─── CursorStore impl ────────────────────────────────────────────────────────

#[async_trait]
impl CursorStore for SqliteCursorStore {
    type Tx = Transaction<'static, Sqlite>;

    async fn begin(&self) -> Result<Self::Tx, IndexerError> {
        self.pool
            .begin()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), IndexerError> {
        tx.commit()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), IndexerError> {
        tx.rollback()
            .await
            .map_err(|e| IndexerError::Storage(e.to_string()))
    }

    async fn find_cursor(
        &self,
        tx: &mut Self::Tx,
        name: &str,
    ) -> Result<Option<IndexerCursor>, IndexerError> {
        let row = sqlx::query(
            "SELECT name, version, seq, updated_at FROM cursors WHERE name = ?",
        )
        .bind(name)
        .fetch_optional(&mut **tx)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        Ok(row.map(|r| IndexerCursor {
            name: r.get("name"),
            version: r.get::<i64, _>("version") as u32,
            seq: r.get::<i64, _>("seq") as u64,
            updated_at: r.get("updated_at"),
        }))
    }

    async fn insert_cursor(
        &self,
        tx: &mut Self::Tx,
        cursor: &IndexerCursor,
    ) -> Result<(), IndexerError> {
        sqlx::query(
            "INSERT INTO cursors (name, version, seq, updated_at) VALUES (?, ?, ?, ?)",
        )
        .bind(&cursor.name)
        .bind(cursor.version as i64)
        .bind(cursor.seq as i64)
        .bind(cursor.updated_at)
        .execute(&mut **tx)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        debug!(name = %cursor.name, seq = cursor.seq, "cursor staged (insert)");
        Ok(())
    }

    async fn update_cursor(
        &self,
        tx: &mut Self::Tx,
        cursor: &IndexerCursor,
    ) -> Result<(), IndexerError> {
        let result = sqlx::query(
            "UPDATE cursors SET version = ?, seq = ?, updated_at = ? WHERE name = ?",
        )
        .bind(cursor.version as i64)
        .bind(cursor.seq as i64)
        .bind(cursor.updated_at)
        .bind(&cursor.name)
        .execute(&mut **tx)
        .await
        .map_err(|e| IndexerError::Storage(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(IndexerError::Storage(format!(
                "no cursor row for '{}'",
                cursor.name
            )));
        }

        debug!(name = %cursor.name, seq = cursor.seq, "cursor staged (update)");
        Ok(())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
