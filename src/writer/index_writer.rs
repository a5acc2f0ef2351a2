use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::Duration;
use log::debug;
use parking_lot::{Mutex, MutexGuard, RwLock};
use crate::analysis::analyzer::{AnalyzedDocument, Analyzer};
use crate::core::error::Result;
use crate::core::types::{DocId, DocumentContent};
use crate::index::doc_table::DocumentTable;
use crate::index::posting_store::PostingStore;
use crate::mvcc::controller::MVCCController;
use crate::storage::checkpoint::{CheckpointData, Manifest};
use crate::storage::compaction::CompactionReport;
use crate::storage::io_worker::IoWorker;
use crate::storage::wal::{Operation, WALEntry};

/// Mutable index state; only touched under the commit lock.
#[derive(Debug, Default)]
pub struct WriterState {
    pub postings: PostingStore,
    pub documents: DocumentTable,
}

impl WriterState {
    pub fn new(postings: PostingStore, documents: DocumentTable) -> Self {
        WriterState { postings, documents }
    }

    /// Replaces the document's visible postings and metadata in one step.
    pub fn apply_index(&mut self, doc_id: DocId, version: u32, document: &AnalyzedDocument) -> Result<usize> {
        for (term, locations) in &document.terms {
            for location in locations {
                self.postings.append(term, doc_id, *location);
            }
        }
        let committed = match self.postings.commit(doc_id, version) {
            Ok(committed) => committed,
            Err(e) => {
                self.postings.abort(doc_id);
                return Err(e);
            }
        };
        self.documents.set_metadata(doc_id, document.length, version, document.paths.clone())?;
        Ok(committed)
    }

    pub fn apply_remove(&mut self, doc_id: DocId) -> Result<()> {
        self.postings.forget(doc_id);
        self.documents.mark_deleted(doc_id)
    }

    /// Re-applies a logged operation during recovery. Operations already
    /// reflected in the state are skipped.
    pub fn replay(&mut self, entry: &WALEntry) -> Result<bool> {
        match &entry.operation {
            Operation::IndexDocument { source_id, doc_id, version, document } => {
                self.documents.ensure_allocated(source_id, *doc_id)?;
                if self.documents.get(*doc_id)?.version >= *version {
                    return Ok(false);
                }
                self.apply_index(*doc_id, *version, document)?;
                Ok(true)
            }
            Operation::RemoveDocument { source_id, doc_id } => {
                self.documents.ensure_allocated(source_id, *doc_id)?;
                if !self.documents.get(*doc_id)?.is_live() {
                    return Ok(false);
                }
                self.apply_remove(*doc_id)?;
                Ok(true)
            }
        }
    }

    pub fn checkpoint_data(&self) -> CheckpointData {
        let (postings, visible) = self.postings.parts();
        CheckpointData {
            postings,
            visible,
            documents: self.documents.to_data(),
        }
    }
}

/// Serializes writers of the same source id; entries are dropped once unused.
#[derive(Default)]
struct SourceLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SourceLocks {
    fn with_lock<R>(&self, source_id: &str, f: impl FnOnce() -> R) -> R {
        let lock = self.locks
            .lock()
            .entry(source_id.to_string())
            .or_default()
            .clone();

        let result = {
            let _held = lock.lock();
            f()
        };

        let mut locks = self.locks.lock();
        // One reference in the map, one here: nobody else is waiting.
        if Arc::strong_count(&lock) == 2 {
            locks.remove(source_id);
        }
        result
    }
}

/// Applies document writes: log first through the I/O worker, then make the
/// change visible under the short commit lock.
///
/// Lock order: source lock, checkpoint gate (shared), commit lock.
pub struct IndexWriter {
    analyzer: Arc<Analyzer>,
    mvcc: Arc<MVCCController>,
    io: Arc<IoWorker>,
    state: Mutex<WriterState>,
    source_locks: SourceLocks,
    gate: RwLock<()>,                   // Held shared by writes, exclusively by checkpoints
    records_since_checkpoint: AtomicU64,
}

impl IndexWriter {
    pub fn new(analyzer: Arc<Analyzer>, mvcc: Arc<MVCCController>, io: Arc<IoWorker>, state: WriterState) -> Self {
        IndexWriter {
            analyzer,
            mvcc,
            io,
            state: Mutex::new(state),
            source_locks: SourceLocks::default(),
            gate: RwLock::new(()),
            records_since_checkpoint: AtomicU64::new(0),
        }
    }

    pub fn analyzer(&self) -> &Arc<Analyzer> {
        &self.analyzer
    }

    pub fn index_document(&self, source_id: &str, content: &DocumentContent, timeout: Duration) -> Result<DocId> {
        let document = self.analyzer.analyze_document(content)?;
        self.write_analyzed(source_id, document, timeout)
    }

    /// Logs and commits an already analyzed document.
    pub fn write_analyzed(&self, source_id: &str, document: AnalyzedDocument, timeout: Duration) -> Result<DocId> {
        self.source_locks.with_lock(source_id, || {
            let _gate = self.gate.read();

            let (doc_id, version) = {
                let mut state = self.state.lock();
                let doc_id = state.documents.allocate(source_id);
                (doc_id, state.documents.get(doc_id)?.version + 1)
            };

            self.io.append(Operation::IndexDocument {
                source_id: source_id.to_string(),
                doc_id,
                version,
                document: document.clone(),
            }, timeout)?;

            let mut state = self.state.lock();
            let committed = state.apply_index(doc_id, version, &document)?;
            let snapshot = self.publish(&state);
            self.records_since_checkpoint.fetch_add(1, Ordering::Relaxed);
            debug!("indexed '{}' as {:?} v{} ({} postings, snapshot {})",
                   source_id, doc_id, version, committed, snapshot);
            Ok(doc_id)
        })
    }

    /// Returns the removed document's id, or `None` when nothing live was
    /// indexed under `source_id`.
    pub fn remove_document(&self, source_id: &str, timeout: Duration) -> Result<Option<DocId>> {
        self.source_locks.with_lock(source_id, || {
            let _gate = self.gate.read();

            let doc_id = {
                let state = self.state.lock();
                match state.documents.lookup_source(source_id) {
                    Some(doc_id) if state.documents.get(doc_id)?.is_live() => doc_id,
                    _ => return Ok(None),
                }
            };

            self.io.append(Operation::RemoveDocument {
                source_id: source_id.to_string(),
                doc_id,
            }, timeout)?;

            let mut state = self.state.lock();
            state.apply_remove(doc_id)?;
            let snapshot = self.publish(&state);
            self.records_since_checkpoint.fetch_add(1, Ordering::Relaxed);
            debug!("removed '{}' ({:?}, snapshot {})", source_id, doc_id, snapshot);
            Ok(Some(doc_id))
        })
    }

    fn publish(&self, state: &WriterState) -> u64 {
        self.mvcc.publish(state.postings.view(), state.documents.view())
    }

    /// Persists the current state and rotates the log. Waits for in-flight
    /// writes to finish and holds new ones off until done.
    pub fn checkpoint(&self, timeout: Duration) -> Result<Manifest> {
        let _gate = self.gate.write();
        let data = self.state.lock().checkpoint_data();
        let manifest = self.io.checkpoint(data, timeout)?;
        self.records_since_checkpoint.store(0, Ordering::Relaxed);
        Ok(manifest)
    }

    pub fn records_since_checkpoint(&self) -> u64 {
        self.records_since_checkpoint.load(Ordering::Relaxed)
    }

    /// Drops retired postings one list at a time, yielding between lists.
    /// Readers holding older snapshots keep the lists they already see.
    /// `budget` caps the lists rewritten in this pass; the rest wait for the next.
    pub fn compact(&self, budget: Option<usize>) -> CompactionReport {
        let candidates = self.state.lock().postings.compaction_candidates();
        let mut report = CompactionReport::default();

        for term in candidates {
            if budget.is_some_and(|budget| report.lists_rewritten >= budget) {
                break;
            }
            let dropped = self.state.lock().postings.compact_term(&term);
            if dropped > 0 {
                report.lists_rewritten += 1;
                report.postings_dropped += dropped;
            }
            thread::yield_now();
        }

        let state = self.state.lock();
        self.publish(&state);
        report
    }

    /// Commit lock access for inspection and recovery.
    pub fn state(&self) -> MutexGuard<'_, WriterState> {
        self.state.lock()
    }
}
