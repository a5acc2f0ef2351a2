use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};
use crate::query::cache::CacheStats;

/// Index statistics for monitoring
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexStats {
    // General info
    pub uptime_secs: u64,
    pub opened_at: DateTime<Utc>,
    pub snapshot_version: u64,
    pub active_readers: usize,

    // Documents
    pub live_documents: u64,
    pub deleted_documents: u64,

    // Postings
    pub terms: usize,
    pub live_postings: u64,
    pub retired_postings: u64,

    // Durability
    pub checkpoint_generation: Option<u64>,
    pub wal_records_since_checkpoint: u64,

    // Query metrics
    pub cache_stats: CacheStats,
}

impl IndexStats {
    /// Retired postings per live posting; what compaction scheduling looks at.
    pub fn retired_ratio(&self) -> f64 {
        if self.live_postings == 0 {
            return if self.retired_postings == 0 { 0.0 } else { f64::INFINITY };
        }
        self.retired_postings as f64 / self.live_postings as f64
    }
}
