use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicUsize, Ordering};
use lru::LruCache;
use parking_lot::Mutex;
use crate::search::results::SearchHit;

/// Result cache keyed by snapshot version; entries of older snapshots simply age out.
pub struct QueryCache {
    cache: Option<Mutex<LruCache<QueryKey, Vec<SearchHit>>>>,
    hit_count: AtomicUsize,
    miss_count: AtomicUsize,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct QueryKey {
    pub query: String,
    pub snapshot_version: u64,
    pub limit: Option<usize>,
    pub offset: usize,
}

impl QueryCache {
    /// A capacity of zero disables caching.
    pub fn new(capacity: usize) -> Self {
        QueryCache {
            cache: NonZeroUsize::new(capacity).map(|cap| Mutex::new(LruCache::new(cap))),
            hit_count: AtomicUsize::new(0),
            miss_count: AtomicUsize::new(0),
        }
    }

    pub fn get(&self, key: &QueryKey) -> Option<Vec<SearchHit>> {
        let cache = self.cache.as_ref()?;
        match cache.lock().get(key) {
            Some(hits) => {
                self.hit_count.fetch_add(1, Ordering::Relaxed);
                Some(hits.clone())
            }
            None => {
                self.miss_count.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    pub fn put(&self, key: QueryKey, hits: Vec<SearchHit>) {
        if let Some(cache) = &self.cache {
            cache.lock().put(key, hits);
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hit_count: self.hit_count.load(Ordering::Relaxed),
            miss_count: self.miss_count.load(Ordering::Relaxed),
            size: self.cache.as_ref().map_or(0, |c| c.lock().len()),
            capacity: self.cache.as_ref().map_or(0, |c| c.lock().cap().get()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CacheStats {
    pub hit_count: usize,
    pub miss_count: usize,
    pub size: usize,
    pub capacity: usize,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hit_count + self.miss_count;
        if total == 0 {
            0.0
        } else {
            self.hit_count as f64 / total as f64
        }
    }
}
