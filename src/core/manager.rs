use std::sync::{Arc, Weak};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use crate::analysis::analyzer::Analyzer;
use crate::core::config::Config;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::stats::IndexStats;
use crate::core::types::{DocId, DocumentContent};
use crate::index::doc_table::DocumentMeta;
use crate::mvcc::controller::{MVCCController, SnapshotGuard};
use crate::query::cache::{QueryCache, QueryKey};
use crate::query::parser::QueryParser;
use crate::query::planner::QueryPlanner;
use crate::scoring::scorer::TfIdfScorer;
use crate::search::executor::QueryExecutor;
use crate::search::results::{SearchHit, SearchOptions};
use crate::storage::checkpoint::{self, Manifest};
use crate::storage::compaction::{CompactionPolicy, CompactionReport, Compactor, RatioCompactionPolicy};
use crate::storage::file_lock::FileLock;
use crate::storage::io_worker::IoWorker;
use crate::storage::layout::StorageLayout;
use crate::storage::wal::WAL;
use crate::writer::batch::BatchIndexer;
use crate::writer::index_writer::{IndexWriter, WriterState};

struct Inner {
    config: Config,
    storage: StorageLayout,

    analyzer: Arc<Analyzer>,
    parser: QueryParser,
    planner: QueryPlanner,
    executor: QueryExecutor,
    cache: QueryCache,

    mvcc: Arc<MVCCController>,
    io: Arc<IoWorker>,
    writer: IndexWriter,
    batch: BatchIndexer,
    policy: Box<dyn CompactionPolicy>,

    last_manifest: Mutex<Option<Manifest>>,
    checkpointing: AtomicBool,
    opened_at: DateTime<Utc>,
    start_time: Instant,

    // Released last, after the I/O worker has stopped.
    _lock: FileLock,
}

impl Inner {
    fn checkpoint(&self, timeout: Duration) -> Result<Manifest> {
        let manifest = self.writer.checkpoint(timeout)?;
        debug!("checkpoint generation {} at WAL sequence {}", manifest.generation, manifest.wal_sequence);
        *self.last_manifest.lock() = Some(manifest.clone());
        Ok(manifest)
    }

    fn compact(&self, budget: Option<usize>) -> Result<CompactionReport> {
        let report = self.writer.compact(budget);
        if report.postings_dropped > 0 {
            self.checkpoint(self.config.io_timeout)?;
        }
        info!("compaction rewrote {} lists, dropped {} postings",
              report.lists_rewritten, report.postings_dropped);
        Ok(report)
    }
}

/// Entry point of the index: one per storage directory, shared between
/// threads behind an `Arc`.
///
/// Writes are durable once they return; searches run against immutable
/// snapshots and never wait for writers.
pub struct IndexManager {
    inner: Arc<Inner>,
    compactor: Option<Compactor>,
    closed: bool,
}

impl IndexManager {
    /// Opens (or creates) the index at `config.storage_path`, recovering from
    /// the last checkpoint and the WAL written after it.
    pub fn open(config: Config) -> Result<Self> {
        let storage = StorageLayout::new(config.storage_path.clone())?;
        let lock = FileLock::acquire(&storage)?;

        let recovered = checkpoint::recover(&storage)?;
        let mut state = WriterState::new(recovered.postings, recovered.documents);
        let mut replayed = 0u64;
        for entry in &recovered.wal_entries {
            if state.replay(entry)? {
                replayed += 1;
            }
        }

        let generation = recovered.manifest.as_ref().map_or(0, |m| m.generation);
        let wal = WAL::open(&storage, recovered.next_sequence, config.wal_sync_mode)?;
        let io = Arc::new(IoWorker::start(storage.clone(), wal, generation, config.io_timeout)?);

        let mvcc = Arc::new(MVCCController::new(state.postings.view(), state.documents.view()));
        let analyzer = Arc::new(Analyzer::from_config(&config));
        let writer = IndexWriter::new(analyzer.clone(), mvcc.clone(), io.clone(), state);

        let inner = Arc::new(Inner {
            parser: QueryParser::new(config.default_operator),
            planner: QueryPlanner::new(analyzer.clone()),
            executor: QueryExecutor::new(Arc::new(TfIdfScorer), config.structural_weight),
            cache: QueryCache::new(config.query_cache_size),
            batch: BatchIndexer::new(0)?,
            policy: Box::new(RatioCompactionPolicy::from_config(&config)),
            last_manifest: Mutex::new(recovered.manifest),
            checkpointing: AtomicBool::new(false),
            opened_at: Utc::now(),
            start_time: Instant::now(),
            analyzer,
            mvcc,
            io,
            writer,
            storage,
            config,
            _lock: lock,
        });

        if replayed > 0 {
            inner.checkpoint(inner.config.io_timeout)?;
        }

        let compactor = if inner.config.background_compaction {
            let weak: Weak<Inner> = Arc::downgrade(&inner);
            Some(Compactor::start(move || match weak.upgrade() {
                Some(inner) => inner.compact(None),
                None => Ok(CompactionReport::default()),
            })?)
        } else {
            None
        };

        info!("opened index at {:?}: {} live documents, {} WAL records replayed",
              inner.storage.base_dir, inner.mvcc.acquire().doc_count(), replayed);

        Ok(IndexManager {
            inner,
            compactor,
            closed: false,
        })
    }

    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    pub fn analyzer(&self) -> &Arc<Analyzer> {
        &self.inner.analyzer
    }

    /// Current committed state; stays valid and unchanged while held.
    pub fn snapshot(&self) -> SnapshotGuard {
        self.inner.mvcc.acquire()
    }

    pub fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        self.search_with(query, SearchOptions::default())
    }

    pub fn search_with(&self, query: &str, options: SearchOptions) -> Result<Vec<SearchHit>> {
        let snapshot = self.inner.mvcc.acquire();
        self.search_snapshot(&snapshot, query, options)
    }

    /// Evaluates `query` against a snapshot the caller already holds.
    pub fn search_snapshot(&self, snapshot: &SnapshotGuard, query: &str, options: SearchOptions) -> Result<Vec<SearchHit>> {
        let cancel = options.cancel.clone().unwrap_or_default();
        if cancel.is_cancelled() {
            return Err(Error::new(ErrorKind::Cancelled, "query cancelled".to_string()));
        }

        let key = QueryKey {
            query: query.to_string(),
            snapshot_version: snapshot.version,
            limit: options.limit,
            offset: options.offset,
        };
        if let Some(hits) = self.inner.cache.get(&key) {
            return Ok(hits);
        }

        let parsed = self.inner.parser.parse(query)?;
        let plan = self.inner.planner.plan(&parsed)?;
        debug!("query '{}' planned to {} nodes", query, plan.size());

        let ranked = self.inner.executor.evaluate(&plan, snapshot, &cancel)?;
        let hits = options.page(ranked)
            .into_iter()
            .map(|doc| {
                let meta = snapshot.documents.get(doc.doc_id)?;
                Ok(SearchHit {
                    source_id: meta.source_id.clone(),
                    doc_id: doc.doc_id,
                    score: doc.score,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        self.inner.cache.put(key, hits.clone());
        Ok(hits)
    }

    /// Indexes or replaces the document stored under `source_id`.
    pub fn index_document(&self, source_id: &str, content: DocumentContent) -> Result<DocId> {
        self.index_document_with_timeout(source_id, content, self.inner.config.io_timeout)
    }

    pub fn index_document_with_timeout(&self, source_id: &str, content: DocumentContent, timeout: Duration) -> Result<DocId> {
        let doc_id = self.inner.writer.index_document(source_id, &content, timeout)?;
        self.after_write();
        Ok(doc_id)
    }

    /// Bulk variant of [`index_document`](Self::index_document). Analysis
    /// runs in parallel; a document that fails analysis rejects the batch.
    pub fn index_documents(&self, documents: Vec<(String, DocumentContent)>) -> Result<Vec<DocId>> {
        let result = self.inner.batch.index_batch(&self.inner.writer, documents, self.inner.config.io_timeout);
        self.after_write();
        result
    }

    /// Returns the id of the removed document, `None` if `source_id` had
    /// nothing live.
    pub fn remove_document(&self, source_id: &str) -> Result<Option<DocId>> {
        self.remove_document_with_timeout(source_id, self.inner.config.io_timeout)
    }

    pub fn remove_document_with_timeout(&self, source_id: &str, timeout: Duration) -> Result<Option<DocId>> {
        let removed = self.inner.writer.remove_document(source_id, timeout)?;
        if removed.is_some() {
            self.after_write();
        }
        Ok(removed)
    }

    /// Metadata of the document stored under `source_id`, deleted or not.
    pub fn document(&self, source_id: &str) -> Result<DocumentMeta> {
        let snapshot = self.inner.mvcc.acquire();
        let doc_id = snapshot.documents.lookup_source(source_id)
            .ok_or_else(|| Error::not_found(format!("no document for source '{}'", source_id)))?;
        snapshot.documents.get(doc_id).cloned()
    }

    pub fn get(&self, doc_id: DocId) -> Result<DocumentMeta> {
        self.inner.mvcc.acquire().documents.get(doc_id).cloned()
    }

    /// Occurrences of an index term in the live version of `source_id`.
    pub fn term_frequency(&self, term: &str, source_id: &str) -> Result<u32> {
        let snapshot = self.inner.mvcc.acquire();
        let doc_id = snapshot.documents.lookup_source(source_id)
            .ok_or_else(|| Error::not_found(format!("no document for source '{}'", source_id)))?;
        Ok(snapshot.postings.postings(term)
            .find(|posting| posting.doc_id == doc_id)
            .map_or(0, |posting| posting.term_freq()))
    }

    pub fn checkpoint(&self) -> Result<Manifest> {
        self.inner.checkpoint(self.inner.config.io_timeout)
    }

    /// Runs a compaction pass now, on the calling thread.
    pub fn compact(&self) -> Result<CompactionReport> {
        self.inner.compact(None)
    }

    /// Like [`compact`](Self::compact) but rewrites at most `lists` posting lists.
    pub fn compact_with_budget(&self, lists: usize) -> Result<CompactionReport> {
        self.inner.compact(Some(lists))
    }

    pub fn stats(&self) -> IndexStats {
        // Counted before our own guard registers.
        let active_readers = self.inner.mvcc.active_readers();
        let snapshot = self.inner.mvcc.acquire();
        let (postings, deleted_documents) = {
            let state = self.inner.writer.state();
            (state.postings.stats(), state.documents.deleted_count())
        };

        IndexStats {
            uptime_secs: self.inner.start_time.elapsed().as_secs(),
            opened_at: self.inner.opened_at,
            snapshot_version: snapshot.version,
            active_readers,
            live_documents: snapshot.doc_count(),
            deleted_documents,
            terms: postings.terms,
            live_postings: postings.live_postings,
            retired_postings: postings.retired_postings,
            checkpoint_generation: self.inner.last_manifest.lock().as_ref().map(|m| m.generation),
            wal_records_since_checkpoint: self.inner.writer.records_since_checkpoint(),
            cache_stats: self.inner.cache.stats(),
        }
    }

    fn after_write(&self) {
        let every = self.inner.config.checkpoint_every;
        if every > 0 && self.inner.writer.records_since_checkpoint() >= every
            && self.inner.checkpointing
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            if let Err(e) = self.inner.checkpoint(self.inner.config.io_timeout) {
                warn!("automatic checkpoint failed: {}", e);
            }
            self.inner.checkpointing.store(false, Ordering::Release);
        }

        if let Some(compactor) = &self.compactor {
            let stats = self.inner.writer.state().postings.stats();
            if self.inner.policy.should_compact(&stats) {
                compactor.trigger();
            }
        }
    }

    /// Stops background work, writes a final checkpoint and releases the
    /// directory.
    pub fn close(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        if let Some(compactor) = self.compactor.take() {
            compactor.shutdown();
        }
        let result = self.inner.checkpoint(self.inner.config.io_timeout);
        self.inner.io.shutdown();
        info!("closed index at {:?}", self.inner.storage.base_dir);
        result.map(|_| ())
    }
}

impl Drop for IndexManager {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!("final checkpoint failed, WAL will be replayed on open: {}", e);
        }
    }
}
