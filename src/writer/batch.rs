use std::time::Duration;
use log::info;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use crate::analysis::analyzer::AnalyzedDocument;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{DocId, DocumentContent};
use crate::writer::index_writer::IndexWriter;

/// Batch writer for bulk ingestion: analysis runs in parallel, commits run
/// in input order with the single-document guarantees.
pub struct BatchIndexer {
    pool: ThreadPool,
    pub workers: usize,
}

impl BatchIndexer {
    /// `workers == 0` sizes the pool to the machine.
    pub fn new(workers: usize) -> Result<Self> {
        let workers = if workers == 0 { num_cpus::get() } else { workers };
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("pathdex-analyze-{}", i))
            .build()
            .map_err(|e| Error::new(ErrorKind::Internal, format!("cannot build analysis pool: {}", e)))?;

        Ok(BatchIndexer { pool, workers })
    }

    /// Analyzes every document first; if any fails, nothing is written.
    /// Writes then stop at the first failure, keeping the documents already
    /// committed.
    pub fn index_batch(
        &self,
        writer: &IndexWriter,
        documents: Vec<(String, DocumentContent)>,
        timeout: Duration,
    ) -> Result<Vec<DocId>> {
        let analyzer = writer.analyzer().clone();
        let analyzed: Vec<(String, AnalyzedDocument)> = self.pool.install(|| {
            documents
                .into_par_iter()
                .map(|(source_id, content)| match analyzer.analyze_document(&content) {
                    Ok(document) => Ok((source_id, document)),
                    Err(e) => Err(Error::new(e.kind(), format!("{}: {}", source_id, e.context))),
                })
                .collect::<Result<Vec<_>>>()
        })?;

        let total = analyzed.len();
        let mut doc_ids = Vec::with_capacity(total);
        for (source_id, document) in analyzed {
            doc_ids.push(writer.write_analyzed(&source_id, document, timeout)?);
        }
        info!("indexed batch of {} documents", total);
        Ok(doc_ids)
    }
}
