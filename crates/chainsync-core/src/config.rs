//! Loop configuration.

use serde::{Deserialize, Serialize};

use crate::batch::DEFAULT_BATCH_SIZE;

/// Tuning knobs for a single indexing loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexerConfig {
    /// Sequence steps added per batch window (default 20). Windows are
    /// inclusive, so a full one spans `batch_size + 1` blocks.
    pub batch_size: u64,
    /// How long to wait after catching up before re-querying the tip,
    /// in milliseconds (default 1000).
    pub poll_interval_ms: u64,
    /// First restart delay after a loop failure, in milliseconds
    /// (default 500).
    pub initial_backoff_ms: u64,
    /// Ceiling for the restart delay, in milliseconds (default 15000).
    pub max_backoff_ms: u64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            poll_interval_ms: 1_000,
            initial_backoff_ms: 500,
            max_backoff_ms: 15_000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = IndexerConfig::default();
        assert_eq!(config.batch_size, 20);
        assert_eq!(config.poll_interval_ms, 1_000);
        assert_eq!(config.initial_backoff_ms, 500);
        assert_eq!(config.max_backoff_ms, 15_000);
    }

    #[test]
    fn roundtrips_through_json() {
        let config = IndexerConfig {
            batch_size: 50,
            ..IndexerConfig::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        let back: IndexerConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.batch_size, 50);
        assert_eq!(back.poll_interval_ms, 1_000);
    }
}
