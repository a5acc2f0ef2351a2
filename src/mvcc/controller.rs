use std::collections::BTreeMap;
use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use crate::index::doc_table::DocumentView;
use crate::index::posting_store::PostingView;

/// Immutable point-in-time view of the index
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub version: u64,
    pub postings: PostingView,
    pub documents: DocumentView,
    pub timestamp: DateTime<Utc>,
}

impl Snapshot {
    pub fn doc_count(&self) -> u64 {
        self.documents.live_count()
    }
}

/// Reader bookkeeping: snapshot version -> number of guards alive.
type ReaderTable = Mutex<BTreeMap<u64, usize>>;

/// Handle keeping one snapshot registered while a query uses it.
pub struct SnapshotGuard {
    snapshot: Arc<Snapshot>,
    readers: Arc<ReaderTable>,
}

impl SnapshotGuard {
    pub fn snapshot(&self) -> &Arc<Snapshot> {
        &self.snapshot
    }
}

impl Deref for SnapshotGuard {
    type Target = Snapshot;

    fn deref(&self) -> &Snapshot {
        &self.snapshot
    }
}

impl Clone for SnapshotGuard {
    fn clone(&self) -> Self {
        *self.readers.lock().entry(self.snapshot.version).or_insert(0) += 1;
        SnapshotGuard {
            snapshot: self.snapshot.clone(),
            readers: self.readers.clone(),
        }
    }
}

impl Drop for SnapshotGuard {
    fn drop(&mut self) {
        let mut readers = self.readers.lock();
        if let Some(count) = readers.get_mut(&self.snapshot.version) {
            *count -= 1;
            if *count == 0 {
                readers.remove(&self.snapshot.version);
            }
        }
    }
}

/// Multi-Version Concurrency Control: publishes snapshots, hands them to readers.
pub struct MVCCController {
    current: RwLock<Arc<Snapshot>>,
    current_version: AtomicU64,
    readers: Arc<ReaderTable>,
}

impl MVCCController {
    pub fn new(postings: PostingView, documents: DocumentView) -> Self {
        MVCCController {
            current: RwLock::new(Arc::new(Snapshot {
                version: 0,
                postings,
                documents,
                timestamp: Utc::now(),
            })),
            current_version: AtomicU64::new(0),
            readers: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    /// Installs a new snapshot. Callers serialize publication themselves.
    pub fn publish(&self, postings: PostingView, documents: DocumentView) -> u64 {
        let version = self.current_version.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(Snapshot {
            version,
            postings,
            documents,
            timestamp: Utc::now(),
        });
        *self.current.write() = snapshot;
        version
    }

    /// Current snapshot; never waits on writers beyond the pointer swap.
    pub fn acquire(&self) -> SnapshotGuard {
        let snapshot = self.current.read().clone();
        *self.readers.lock().entry(snapshot.version).or_insert(0) += 1;
        SnapshotGuard {
            snapshot,
            readers: self.readers.clone(),
        }
    }

    pub fn current_version(&self) -> u64 {
        self.current_version.load(Ordering::Acquire)
    }

    pub fn active_readers(&self) -> usize {
        self.readers.lock().values().sum()
    }
}
