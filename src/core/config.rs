use std::path::PathBuf;
use std::time::Duration;
use crate::query::parser::BooleanOperator;
use crate::storage::wal::SyncMode;

#[derive(Debug, Clone)]
pub struct Config {
    pub storage_path: PathBuf,

    // Analysis
    pub stop_words: Vec<String>,
    pub punctuation: String,
    pub max_token_length: usize,

    // Query
    pub default_operator: BooleanOperator,
    pub structural_weight: f32,             // Weight of path-scope specificity vs. text relevance
    pub query_cache_size: usize,            // 0 disables the cache

    // Durability
    pub io_timeout: Duration,
    pub wal_sync_mode: SyncMode,
    pub checkpoint_every: u64,              // WAL records between automatic checkpoints, 0 = never

    // Compaction
    pub compaction_threshold: f64,          // retired / live postings ratio
    pub compaction_min_retired: u64,
    pub background_compaction: bool,
}

impl Config {
    pub fn new(storage_path: impl Into<PathBuf>) -> Self {
        Config {
            storage_path: storage_path.into(),
            ..Config::default()
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            storage_path: PathBuf::from("./data"),

            stop_words: [
                "a", "an", "and", "are", "as", "at", "be", "by", "for",
                "from", "has", "he", "in", "is", "it", "its", "of", "on",
                "that", "the", "to", "was", "will", "with",
            ].iter().map(|s| s.to_string()).collect(),
            punctuation: "'’_".to_string(),
            max_token_length: 255,

            default_operator: BooleanOperator::Or,
            structural_weight: 0.0,
            query_cache_size: 256,

            io_timeout: Duration::from_secs(5),
            wal_sync_mode: SyncMode::Immediate,
            checkpoint_every: 10_000,

            compaction_threshold: 0.5,
            compaction_min_retired: 1024,
            background_compaction: true,
        }
    }
}
