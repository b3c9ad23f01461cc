//! chainsync CLI: inspect cursors and run a simulated pipeline.
//!
//! Usage:
//! ```bash
//! # Show all indexer cursors
//! chainsync status --db ./chainsync.db
//!
//! # Delete one cursor so the indexer re-indexes from sequence 1
//! chainsync reset --name block_generic --db ./chainsync.db
//!
//! # Run two demo indexers over a simulated chain
//! chainsync demo --tip 50
//! ```

use std::env;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::{Sqlite, Transaction};

use chainsync_core::{
    BatchHandler, Block, BlockFetcher, IndexerConfig, IndexerCursor, IndexerError,
    IndexerRegistry, TipOracle,
};
use chainsync_storage::SqliteCursorStore;

const DEFAULT_DB: &str = "./chainsync.db";

#[tokio::main]
async fn main() {
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        print_usage();
        process::exit(1);
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let result = match args[1].as_str() {
        "status" => cmd_status(&args[2..]).await,
        "reset" => cmd_reset(&args[2..]).await,
        "demo" => cmd_demo(&args[2..]).await,
        "info" => {
            cmd_info();
            Ok(())
        }
        "version" | "--version" | "-V" => {
            println!("chainsync {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            print_usage();
            process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn print_usage() {
    println!("chainsync {}", env!("CARGO_PKG_VERSION"));
    println!("Resumable, transactional batch indexer\n");
    println!("USAGE:");
    println!("    chainsync <COMMAND>\n");
    println!("COMMANDS:");
    println!("    status   Show indexer cursors       (--db <path>, --name <name>)");
    println!("    reset    Delete an indexer cursor   (--name <name>, --db <path>)");
    println!("    demo     Index a simulated chain    (--db <path>, --tip <n>)");
    println!("    info     Show ChainSync defaults");
    println!("    version  Print version");
    println!("    help     Print this help");
}

fn cmd_info() {
    println!("ChainSync v{}", env!("CARGO_PKG_VERSION"));
    println!("  Default batch size: 20 steps (21 blocks per full window)");
    println!("  Default poll interval: 1000 ms after catching up");
    println!("  Default restart backoff: 500 ms initial, 15 s ceiling");
    println!("  Storage backends: SQLite (default), Postgres (feature: postgres)");
}

async fn cmd_status(args: &[String]) -> Result<(), String> {
    let db = parse_flag(args, "--db").unwrap_or_else(|| DEFAULT_DB.to_string());
    let store = SqliteCursorStore::open(&db).await.map_err(|e| e.to_string())?;

    match parse_flag(args, "--name") {
        Some(name) => match store.latest_cursor(&name).await.map_err(|e| e.to_string())? {
            Some(cursor) => print_cursor(&cursor),
            None => println!("No cursor for '{name}'"),
        },
        None => {
            let cursors = store.list_cursors().await.map_err(|e| e.to_string())?;
            if cursors.is_empty() {
                println!("No cursors in {db}");
            }
            for cursor in cursors {
                print_cursor(&cursor);
            }
        }
    }
    Ok(())
}

async fn cmd_reset(args: &[String]) -> Result<(), String> {
    let name = parse_flag(args, "--name").ok_or("--name is required")?;
    let db = parse_flag(args, "--db").unwrap_or_else(|| DEFAULT_DB.to_string());
    let store = SqliteCursorStore::open(&db).await.map_err(|e| e.to_string())?;

    if store.delete_cursor(&name).await.map_err(|e| e.to_string())? {
        println!("Cursor '{name}' deleted; the indexer restarts from sequence 1 on next run");
    } else {
        println!("No cursor for '{name}'");
    }
    Ok(())
}

fn print_cursor(cursor: &IndexerCursor) {
    let updated = chrono::DateTime::from_timestamp(cursor.updated_at, 0)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| cursor.updated_at.to_string());
    println!(
        "{:<16} version {:<4} seq {:<10} updated {updated}",
        cursor.name, cursor.version, cursor.seq
    );
}

fn parse_flag<'a>(args: &'a [String], flag: &str) -> Option<String> {
    let pos = args.iter().position(|a| a == flag)?;
    args.get(pos + 1).cloned()
}

// ─── Demo pipeline ───────────────────────────────────────────────────────────

/// Deterministic stand-in for a chain node.
struct SimulatedChain {
    tip: u64,
}

#[async_trait]
impl TipOracle for SimulatedChain {
    async fn latest_seq(&self) -> Result<u64, IndexerError> {
        Ok(self.tip)
    }
}

#[async_trait]
impl BlockFetcher for SimulatedChain {
    type Content = serde_json::Value;

    async fn fetch_block(&self, seq: u64) -> Result<serde_json::Value, IndexerError> {
        Ok(serde_json::json!({
            "seq": seq,
            "hash": format!("{:016x}", seq.wrapping_mul(0x9e37_79b9_7f4a_7c15)),
            "tx_count": seq % 7,
        }))
    }
}

/// Archives every block row; the widest, dumbest possible handler.
struct BlockArchiver;

#[async_trait]
impl BatchHandler<Transaction<'static, Sqlite>, serde_json::Value> for BlockArchiver {
    async fn handle_batch(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        blocks: &[Block<serde_json::Value>],
    ) -> Result<(), IndexerError> {
        for block in blocks {
            let hash = block.content["hash"].as_str().unwrap_or_default();
            sqlx::query("INSERT OR REPLACE INTO demo_blocks (seq, hash) VALUES (?, ?)")
                .bind(block.seq as i64)
                .bind(hash)
                .execute(&mut **tx)
                .await
                .map_err(|e| IndexerError::Storage(e.to_string()))?;
        }
        Ok(())
    }
}

/// Tracks per-block transaction counts in its own table.
struct TxCounter;

#[async_trait]
impl BatchHandler<Transaction<'static, Sqlite>, serde_json::Value> for TxCounter {
    async fn handle_batch(
        &self,
        tx: &mut Transaction<'static, Sqlite>,
        blocks: &[Block<serde_json::Value>],
    ) -> Result<(), IndexerError> {
        for block in blocks {
            let tx_count = block.content["tx_count"].as_u64().unwrap_or(0);
            sqlx::query("INSERT OR REPLACE INTO demo_tx_counts (seq, tx_count) VALUES (?, ?)")
                .bind(block.seq as i64)
                .bind(tx_count as i64)
                .execute(&mut **tx)
                .await
                .map_err(|e| IndexerError::Storage(e.to_string()))?;
        }
        Ok(())
    }
}

async fn cmd_demo(args: &[String]) -> Result<(), String> {
    let db = parse_flag(args, "--db").unwrap_or_else(|| DEFAULT_DB.to_string());
    let tip: u64 = match parse_flag(args, "--tip") {
        Some(raw) => raw.parse().map_err(|_| format!("invalid --tip: {raw}"))?,
        None => 50,
    };
    if tip < 2 {
        return Err("--tip must be at least 2 (a tip of 1 leaves nothing to index)".into());
    }

    let store = Arc::new(SqliteCursorStore::open(&db).await.map_err(|e| e.to_string())?);
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS demo_blocks (seq INTEGER PRIMARY KEY, hash TEXT NOT NULL)",
    )
    .execute(store.pool())
    .await
    .map_err(|e| e.to_string())?;
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS demo_tx_counts (seq INTEGER PRIMARY KEY, tx_count INTEGER NOT NULL)",
    )
    .execute(store.pool())
    .await
    .map_err(|e| e.to_string())?;

    let chain = Arc::new(SimulatedChain { tip });
    let mut registry = IndexerRegistry::new(chain, store.clone(), IndexerConfig::default());
    registry.register("block_generic", 1, Arc::new(BlockArchiver));
    registry.register("block_tx", 1, Arc::new(TxCounter));
    let handles = registry.spawn();

    println!("Indexing a simulated chain with tip {tip} into {db}...");

    // Wait for both loops to catch up with the fixed tip
    loop {
        let generic = store
            .latest_cursor("block_generic")
            .await
            .map_err(|e| e.to_string())?;
        let per_tx = store
            .latest_cursor("block_tx")
            .await
            .map_err(|e| e.to_string())?;
        let caught_up =
            |cursor: &Option<IndexerCursor>| cursor.as_ref().is_some_and(|c| c.seq + 1 >= tip);
        if caught_up(&generic) && caught_up(&per_tx) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    for handle in handles {
        handle.abort();
    }

    println!("Caught up:");
    for cursor in store.list_cursors().await.map_err(|e| e.to_string())? {
        print_cursor(&cursor);
    }
    println!("Inspect any time with: chainsync status --db {db}");
    Ok(())
}
