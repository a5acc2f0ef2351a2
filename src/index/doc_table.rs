use std::collections::BTreeMap;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use roaring::RoaringBitmap;
use serde::{Serialize, Deserialize};
use crate::core::error::{Error, Result};
use crate::core::types::DocId;
use crate::index::persistent_map::PersistentMap;

/// Per-document metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub doc_id: DocId,
    pub source_id: String,
    pub version: u32,                      // 0 until the first commit
    pub length: u32,                       // Full-text term count
    pub paths: Vec<String>,                // Node ordinal -> structural path
    pub deleted: bool,
    pub indexed_at: Option<DateTime<Utc>>,
}

impl DocumentMeta {
    pub fn is_live(&self) -> bool {
        !self.deleted && self.version > 0
    }
}

const CHUNK_BITS: u32 = 16;

/// Live doc ids as one roaring bitmap per 64K-id chunk, so a change copies
/// a single chunk rather than the whole set.
#[derive(Debug, Clone, Default)]
pub struct LiveSet {
    chunks: Arc<BTreeMap<u64, Arc<RoaringBitmap>>>,
    len: u64,
}

impl LiveSet {
    fn split(id: u64) -> (u64, u32) {
        (id >> CHUNK_BITS, (id & ((1 << CHUNK_BITS) - 1)) as u32)
    }

    pub fn contains(&self, id: u64) -> bool {
        let (high, low) = Self::split(id);
        self.chunks.get(&high).is_some_and(|chunk| chunk.contains(low))
    }

    pub fn insert(&mut self, id: u64) -> bool {
        if self.contains(id) {
            return false;
        }
        let (high, low) = Self::split(id);
        let chunk = Arc::make_mut(&mut self.chunks).entry(high).or_default();
        Arc::make_mut(chunk).insert(low);
        self.len += 1;
        true
    }

    pub fn remove(&mut self, id: u64) -> bool {
        if !self.contains(id) {
            return false;
        }
        let (high, low) = Self::split(id);
        let chunks = Arc::make_mut(&mut self.chunks);
        if let Some(chunk) = chunks.get_mut(&high) {
            Arc::make_mut(chunk).remove(low);
            if chunk.is_empty() {
                chunks.remove(&high);
            }
        }
        self.len -= 1;
        true
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Ascending.
    pub fn iter(&self) -> impl Iterator<Item = u64> + '_ {
        self.chunks.iter().flat_map(|(&high, chunk)| {
            chunk.iter().map(move |low| (high << CHUNK_BITS) | u64::from(low))
        })
    }
}

/// Immutable view of the document table, shared by snapshots.
#[derive(Debug, Clone, Default)]
pub struct DocumentView {
    docs: PersistentMap<DocId, Arc<DocumentMeta>>,
    sources: PersistentMap<String, DocId>,
    live: LiveSet,
}

impl DocumentView {
    pub fn get(&self, doc_id: DocId) -> Result<&DocumentMeta> {
        self.docs
            .get(&doc_id)
            .map(|meta| meta.as_ref())
            .ok_or_else(|| Error::not_found(format!("document {} not found", doc_id.0)))
    }

    pub fn lookup_source(&self, source_id: &str) -> Option<DocId> {
        self.sources.get(source_id).copied()
    }

    pub fn is_live(&self, doc_id: DocId) -> bool {
        self.live.contains(doc_id.0)
    }

    pub fn live_count(&self) -> u64 {
        self.live.len()
    }

    /// Live doc ids in ascending order.
    pub fn live_ids(&self) -> impl Iterator<Item = DocId> + '_ {
        self.live.iter().map(DocId)
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }
}

/// Persisted form of the table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentTableData {
    pub next_id: u64,
    pub documents: Vec<DocumentMeta>,
}

/// doc_id -> metadata plus the stable source_id -> doc_id mapping.
#[derive(Debug, Default)]
pub struct DocumentTable {
    docs: PersistentMap<DocId, Arc<DocumentMeta>>,
    sources: PersistentMap<String, DocId>,
    live: LiveSet,
    deleted: u64,
    next_id: u64,
}

impl DocumentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn restore(data: DocumentTableData) -> Result<Self> {
        let mut table = DocumentTable::new();
        let mut max_id = None;

        for meta in data.documents {
            if table.sources.insert(meta.source_id.clone(), meta.doc_id).is_some() {
                return Err(Error::corruption(format!("source id '{}' mapped twice", meta.source_id)));
            }
            if meta.is_live() {
                table.live.insert(meta.doc_id.0);
            }
            if meta.deleted {
                table.deleted += 1;
            }
            max_id = max_id.max(Some(meta.doc_id.0));
            if table.docs.insert(meta.doc_id, Arc::new(meta)).is_some() {
                return Err(Error::corruption("document id stored twice".to_string()));
            }
        }

        if let Some(max_id) = max_id {
            if max_id >= data.next_id {
                return Err(Error::corruption(format!(
                    "next document id {} not above stored id {}", data.next_id, max_id
                )));
            }
        }
        table.next_id = data.next_id;
        Ok(table)
    }

    pub fn to_data(&self) -> DocumentTableData {
        let mut documents: Vec<DocumentMeta> = self.docs.values().map(|m| (**m).clone()).collect();
        documents.sort_by_key(|m| m.doc_id);
        DocumentTableData {
            next_id: self.next_id,
            documents,
        }
    }

    /// Returns the id already mapped to `source_id`, or allocates a fresh one.
    pub fn allocate(&mut self, source_id: &str) -> DocId {
        if let Some(doc_id) = self.sources.get(source_id) {
            return *doc_id;
        }
        let doc_id = DocId(self.next_id);
        self.next_id += 1;
        self.insert_new(source_id, doc_id);
        doc_id
    }

    /// Re-establishes an allocation recorded in the log. The mapping must not
    /// conflict with what the table already knows.
    pub fn ensure_allocated(&mut self, source_id: &str, doc_id: DocId) -> Result<()> {
        match self.sources.get(source_id) {
            Some(existing) if *existing == doc_id => Ok(()),
            Some(existing) => Err(Error::corruption(format!(
                "source '{}' is document {} but the log says {}", source_id, existing.0, doc_id.0
            ))),
            None => {
                if self.docs.contains_key(&doc_id) {
                    return Err(Error::corruption(format!(
                        "document {} already belongs to another source", doc_id.0
                    )));
                }
                self.next_id = self.next_id.max(doc_id.0 + 1);
                self.insert_new(source_id, doc_id);
                Ok(())
            }
        }
    }

    fn insert_new(&mut self, source_id: &str, doc_id: DocId) {
        self.sources.insert(source_id.to_string(), doc_id);
        self.docs.insert(doc_id, Arc::new(DocumentMeta {
            doc_id,
            source_id: source_id.to_string(),
            version: 0,
            length: 0,
            paths: Vec::new(),
            deleted: false,
            indexed_at: None,
        }));
    }

    pub fn lookup_source(&self, source_id: &str) -> Option<DocId> {
        self.sources.get(source_id).copied()
    }

    pub fn get(&self, doc_id: DocId) -> Result<DocumentMeta> {
        self.docs
            .get(&doc_id)
            .map(|meta| (**meta).clone())
            .ok_or_else(|| Error::not_found(format!("document {} not found", doc_id.0)))
    }

    pub fn set_metadata(&mut self, doc_id: DocId, length: u32, version: u32, paths: Vec<String>) -> Result<()> {
        let meta = self.meta_mut(doc_id)?;
        let was_deleted = std::mem::replace(&mut meta.deleted, false);
        meta.length = length;
        meta.version = version;
        meta.paths = paths;
        meta.indexed_at = Some(Utc::now());
        if was_deleted {
            self.deleted -= 1;
        }
        self.live.insert(doc_id.0);
        Ok(())
    }

    pub fn mark_deleted(&mut self, doc_id: DocId) -> Result<()> {
        let meta = self.meta_mut(doc_id)?;
        if !std::mem::replace(&mut meta.deleted, true) {
            self.deleted += 1;
        }
        self.live.remove(doc_id.0);
        Ok(())
    }

    fn meta_mut(&mut self, doc_id: DocId) -> Result<&mut DocumentMeta> {
        self.docs
            .get_mut(&doc_id)
            .map(Arc::make_mut)
            .ok_or_else(|| Error::not_found(format!("document {} not found", doc_id.0)))
    }

    pub fn live_count(&self) -> u64 {
        self.live.len()
    }

    pub fn deleted_count(&self) -> u64 {
        self.deleted
    }

    pub fn view(&self) -> DocumentView {
        DocumentView {
            docs: self.docs.clone(),
            sources: self.sources.clone(),
            live: self.live.clone(),
        }
    }
}
