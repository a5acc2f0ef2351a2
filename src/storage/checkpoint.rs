use std::fs;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use crate::compression::delta::DeltaEncoder;
use crate::compression::vbyte::VByteEncoder;
use crate::core::error::{Error, Result};
use crate::core::types::DocId;
use crate::index::doc_table::{DocumentTable, DocumentTableData};
use crate::index::posting::{Location, Posting, PostingList};
use crate::index::posting_store::{PostingMap, PostingStore, VisibleMap};
use crate::storage::format::{self, DOCUMENTS_MAGIC, MANIFEST_MAGIC, POSTINGS_MAGIC};
use crate::storage::layout::StorageLayout;
use crate::storage::wal::{WALEntry, WAL};

/// Names the checkpoint generation that is current on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    pub generation: u64,
    pub wal_sequence: u64,       // First WAL sequence not covered by the checkpoint
    pub created_at: DateTime<Utc>,
    pub doc_count: u64,
    pub term_count: usize,
}

impl Manifest {
    pub fn load(storage: &StorageLayout) -> Result<Option<Self>> {
        let path = storage.manifest_path();
        if !path.exists() {
            return Ok(None);
        }

        let data = fs::read(&path)?;
        let payload = format::decode_file(MANIFEST_MAGIC, &data)
            .map_err(|e| Error::corruption(format!("{}: {}", path.display(), e.context)))?;
        let manifest = bincode::deserialize(&payload)
            .map_err(|e| Error::corruption(format!("{}: {}", path.display(), e)))?;
        Ok(Some(manifest))
    }

    pub fn save(&self, storage: &StorageLayout) -> Result<()> {
        let payload = bincode::serialize(self)?;
        format::write_atomic(&storage.manifest_path(), &format::encode_file(MANIFEST_MAGIC, &payload))
    }
}

/// Everything a checkpoint persists, captured from the writer in O(1).
#[derive(Debug, Clone)]
pub struct CheckpointData {
    pub postings: PostingMap,
    pub visible: VisibleMap,
    pub documents: DocumentTableData,
}

/// Index state rebuilt at open.
pub struct RecoveredState {
    pub manifest: Option<Manifest>,
    pub postings: PostingStore,
    pub documents: DocumentTable,
    pub wal_entries: Vec<WALEntry>,   // Records after the checkpoint, in sequence order
    pub next_sequence: u64,
}

/// Posting payload:
/// visible map  [ doc ids (delta) | version per doc (vbyte) ]
/// term count, then per term in sorted order
/// [ len | utf-8 bytes | doc ids (delta) | per posting: version, location count, (node gap, position)* ]
pub fn encode_postings(lists: &PostingMap, visible: &VisibleMap) -> Result<Vec<u8>> {
    let mut out = Vec::new();

    let mut versions: Vec<(u64, u32)> = visible.iter().map(|(d, v)| (d.0, *v)).collect();
    versions.sort_unstable();
    let visible_ids: Vec<u64> = versions.iter().map(|(id, _)| *id).collect();
    DeltaEncoder::encode_sorted(&mut out, &visible_ids)?;
    for (_, version) in &versions {
        VByteEncoder::encode_u32(&mut out, *version);
    }

    let mut terms: Vec<(&String, &Arc<PostingList>)> = lists.iter().collect();
    terms.sort_unstable_by_key(|(term, _)| *term);
    VByteEncoder::encode_u64(&mut out, terms.len() as u64);

    for (term, list) in terms {
        VByteEncoder::encode_u64(&mut out, term.len() as u64);
        out.extend_from_slice(term.as_bytes());

        let doc_ids: Vec<u64> = list.iter().map(|p| p.doc_id.0).collect();
        DeltaEncoder::encode_sorted(&mut out, &doc_ids)?;
        for posting in list.iter() {
            VByteEncoder::encode_u32(&mut out, posting.version);
            VByteEncoder::encode_u64(&mut out, posting.locations.len() as u64);
            let mut prev_node = 0;
            for location in &posting.locations {
                VByteEncoder::encode_u32(&mut out, location.node - prev_node);
                VByteEncoder::encode_u32(&mut out, location.position);
                prev_node = location.node;
            }
        }
    }
    Ok(out)
}

pub fn decode_postings(data: &[u8]) -> Result<(PostingMap, VisibleMap)> {
    let mut pos = 0;

    let visible_ids = DeltaEncoder::decode_sorted(data, &mut pos)?;
    let mut visible = VisibleMap::new();
    for id in visible_ids {
        visible.insert(DocId(id), VByteEncoder::decode_u32(data, &mut pos)?);
    }

    let term_count = VByteEncoder::decode_u64(data, &mut pos)? as usize;
    let mut lists = PostingMap::new();

    for _ in 0..term_count {
        let len = VByteEncoder::decode_u64(data, &mut pos)? as usize;
        let end = pos.checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or_else(|| Error::corruption("term runs past end of payload"))?;
        let term = std::str::from_utf8(&data[pos..end])
            .map_err(|_| Error::corruption("term is not valid UTF-8"))?
            .to_string();
        pos = end;

        let doc_ids = DeltaEncoder::decode_sorted(data, &mut pos)?;
        let mut postings = Vec::with_capacity(doc_ids.len());
        for doc_id in doc_ids {
            let version = VByteEncoder::decode_u32(data, &mut pos)?;
            let count = VByteEncoder::decode_u64(data, &mut pos)? as usize;
            if count > data.len() - pos {
                return Err(Error::corruption(format!("location count {} exceeds payload", count)));
            }
            let mut locations = Vec::with_capacity(count);
            let mut node = 0u32;
            for _ in 0..count {
                node = node.checked_add(VByteEncoder::decode_u32(data, &mut pos)?)
                    .ok_or_else(|| Error::corruption("node ordinal overflow"))?;
                locations.push(Location::new(node, VByteEncoder::decode_u32(data, &mut pos)?));
            }
            postings.push(Posting::new(DocId(doc_id), version, locations));
        }

        if lists.insert(term.clone(), Arc::new(PostingList::from_sorted(postings))).is_some() {
            return Err(Error::corruption(format!("term '{}' stored twice", term)));
        }
    }

    if pos != data.len() {
        return Err(Error::corruption(format!("{} trailing bytes after posting payload", data.len() - pos)));
    }
    Ok((lists, visible))
}

/// Writes (and syncs) both files of a generation. Nothing refers to them
/// until the manifest is swapped.
pub fn write_generation(storage: &StorageLayout, generation: u64, data: &CheckpointData) -> Result<()> {
    let postings = encode_postings(&data.postings, &data.visible)?;
    format::write_synced(&storage.postings_path(generation), &format::encode_file(POSTINGS_MAGIC, &postings))?;

    let documents = bincode::serialize(&data.documents)?;
    format::write_synced(&storage.documents_path(generation), &format::encode_file(DOCUMENTS_MAGIC, &documents))?;
    Ok(())
}

pub fn remove_generation(storage: &StorageLayout, generation: u64) {
    for path in [storage.postings_path(generation), storage.documents_path(generation)] {
        if let Err(e) = fs::remove_file(&path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Deletes checkpoint generations other than `current` and log files
/// entirely covered by it.
pub fn remove_obsolete(storage: &StorageLayout, manifest: &Manifest) -> Result<()> {
    for generation in storage.list_generations()? {
        if generation != manifest.generation {
            remove_generation(storage, generation);
        }
    }
    for (sequence, path) in WAL::find_wal_files(storage)? {
        if sequence < manifest.wal_sequence {
            if let Err(e) = fs::remove_file(&path) {
                warn!("failed to remove {}: {}", path.display(), e);
            }
        }
    }
    Ok(())
}

fn load_generation(storage: &StorageLayout, generation: u64) -> Result<(PostingStore, DocumentTable)> {
    let path = storage.postings_path(generation);
    let bytes = fs::read(&path)
        .map_err(|e| Error::corruption(format!("{}: {}", path.display(), e)))?;
    let payload = format::decode_file(POSTINGS_MAGIC, &bytes)
        .map_err(|e| Error::corruption(format!("{}: {}", path.display(), e.context)))?;
    let (lists, visible) = decode_postings(&payload)?;

    let path = storage.documents_path(generation);
    let bytes = fs::read(&path)
        .map_err(|e| Error::corruption(format!("{}: {}", path.display(), e)))?;
    let payload = format::decode_file(DOCUMENTS_MAGIC, &bytes)
        .map_err(|e| Error::corruption(format!("{}: {}", path.display(), e.context)))?;
    let data: DocumentTableData = bincode::deserialize(&payload)
        .map_err(|e| Error::corruption(format!("{}: {}", path.display(), e)))?;

    check_consistency(&visible, &data)?;
    Ok((PostingStore::restore(lists, visible), DocumentTable::restore(data)?))
}

/// The posting store's visible versions must agree with the live documents.
fn check_consistency(visible: &VisibleMap, documents: &DocumentTableData) -> Result<()> {
    let mut live = 0;
    for meta in documents.documents.iter().filter(|m| m.is_live()) {
        live += 1;
        if visible.get(&meta.doc_id) != Some(&meta.version) {
            return Err(Error::corruption(format!(
                "document {} is live at version {} but postings disagree", meta.doc_id.0, meta.version
            )));
        }
    }
    if live != visible.len() {
        return Err(Error::corruption(format!(
            "{} visible posting owners but {} live documents", visible.len(), live
        )));
    }
    Ok(())
}

/// Loads the current checkpoint and collects the log records written after it.
pub fn recover(storage: &StorageLayout) -> Result<RecoveredState> {
    let manifest = Manifest::load(storage)?;
    let (postings, documents) = match &manifest {
        Some(m) => {
            info!("loading checkpoint generation {} ({} documents, {} terms)",
                  m.generation, m.doc_count, m.term_count);
            load_generation(storage, m.generation)?
        }
        None => (PostingStore::new(), DocumentTable::new()),
    };

    let replay_from = manifest.as_ref().map(|m| m.wal_sequence).unwrap_or(0);
    let mut next_sequence = replay_from;
    let mut wal_entries = Vec::new();
    let files = WAL::find_wal_files(storage)?;

    for (i, (first, path)) in files.iter().enumerate() {
        next_sequence = next_sequence.max(*first);
        let scan = WAL::scan(path)?;
        if scan.torn_tail {
            if i + 1 != files.len() {
                return Err(Error::corruption(format!("{}: damaged entry before the last log file", path.display())));
            }
            fs::OpenOptions::new().write(true).open(path)?.set_len(scan.valid_len)?;
        }
        for entry in scan.entries {
            if entry.sequence < next_sequence && entry.sequence >= replay_from {
                return Err(Error::corruption(format!("{}: sequence {} out of order", path.display(), entry.sequence)));
            }
            next_sequence = next_sequence.max(entry.sequence + 1);
            if entry.sequence >= replay_from {
                wal_entries.push(entry);
            }
        }
    }

    Ok(RecoveredState {
        manifest,
        postings,
        documents,
        wal_entries,
        next_sequence,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use tempfile::TempDir;

    fn committed_store() -> PostingStore {
        let mut store = PostingStore::new();
        store.append("/book", DocId(0), Location::new(0, 1));
        store.append("/book", DocId(0), Location::new(3, 1));
        store.append("intro", DocId(0), Location::new(0, 0));
        store.commit(DocId(0), 1).unwrap();
        store.append("intro", DocId(4), Location::new(0, 7));
        store.commit(DocId(4), 2).unwrap();
        store
    }

    #[test]
    fn posting_payload_preserves_lists_and_visibility() {
        let store = committed_store();
        let (lists, visible) = store.parts();
        let encoded = encode_postings(&lists, &visible).unwrap();
        let (decoded, decoded_visible) = decode_postings(&encoded).unwrap();

        assert_eq!(decoded_visible, visible);
        assert_eq!(decoded.len(), 2);
        assert_eq!(decoded.get("intro"), lists.get("intro"));
        let book = decoded.get("/book").unwrap().iter().next().unwrap();
        assert_eq!(book.locations[1], Location::new(3, 1));

        let mut trailing = encoded.clone();
        trailing.push(0);
        assert_eq!(decode_postings(&trailing).unwrap_err().kind(), ErrorKind::Corruption);
    }

    #[test]
    fn generation_and_manifest_round_trip() {
        let dir = TempDir::new().unwrap();
        let storage = StorageLayout::new(dir.path().to_path_buf()).unwrap();

        let mut documents = DocumentTable::new();
        let a = documents.allocate("a");
        documents.set_metadata(a, 1, 1, Vec::new()).unwrap();
        let mut store = PostingStore::new();
        store.append("intro", a, Location::new(0, 0));
        store.commit(a, 1).unwrap();

        let (postings, visible) = store.parts();
        let data = CheckpointData { postings, visible, documents: documents.to_data() };
        write_generation(&storage, 3, &data).unwrap();
        let manifest = Manifest {
            generation: 3,
            wal_sequence: 12,
            created_at: Utc::now(),
            doc_count: 1,
            term_count: 1,
        };
        manifest.save(&storage).unwrap();

        let state = recover(&storage).unwrap();
        assert_eq!(state.manifest, Some(manifest));
        assert_eq!(state.postings.stats(), store.stats());
        assert_eq!(state.documents.to_data(), documents.to_data());
        assert_eq!(state.next_sequence, 12);
    }

    #[test]
    fn mismatched_visibility_is_corruption() {
        let store = committed_store();
        let (_, visible) = store.parts();
        let documents = DocumentTableData::default();
        assert_eq!(check_consistency(&visible, &documents).unwrap_err().kind(), ErrorKind::Corruption);
    }
}
