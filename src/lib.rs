pub mod core;
pub mod storage;
pub mod analysis;
pub mod index;
pub mod scoring;
pub mod search;
pub mod query;
pub mod mvcc;
pub mod writer;
pub mod compression;

pub use crate::core::config::Config;
pub use crate::core::error::{Error, ErrorKind, Result};
pub use crate::core::manager::IndexManager;
pub use crate::core::types::{CancellationToken, DocId, DocumentContent, PathContent};
pub use crate::search::results::{SearchHit, SearchOptions};

/*
                               PATHDEX LAYOUT

  IndexManager ─────────────────────────────────────────────────────────────
    │ search(query)                        │ index_document / remove_document
    ▼                                      ▼
  QueryParser ─► QueryPlanner          Analyzer (tokenizer + filters,
    (nom lexer)   (Analyzer, path         PathTokenizer for structure)
                   scope terms)            │
    │                                      ▼
    ▼                                  IndexWriter
  QueryExecutor ◄── SnapshotGuard ◄──    source lock ─► gate (shared) ─► commit lock
    (sorted merges,   MVCCController       │                              │
     TfIdfScorer)     (publish/acquire)    ▼                              ▼
    │                                  IoWorker thread ──► WAL      PostingStore
    ▼                                    │                          DocumentTable
  QueryCache (snapshot-versioned)        └──► checkpoint generation + Manifest

  Compactor thread: RatioCompactionPolicy ─► IndexWriter::compact ─► checkpoint
*/
