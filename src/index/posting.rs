use std::sync::Arc;
use serde::{Serialize, Deserialize};
use crate::core::types::DocId;

/// Where a term occurs inside a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Location {
    pub node: u32,      // Ordinal of the (path, text) pair; 0 for raw text
    pub position: u32,  // Word position, or depth for path terms
}

impl Location {
    pub fn new(node: u32, position: u32) -> Self {
        Location { node, position }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Posting {
    pub doc_id: DocId,
    pub version: u32,              // Document version this posting was committed for
    pub locations: Vec<Location>,  // Sorted by (node, position)
}

impl Posting {
    pub fn new(doc_id: DocId, version: u32, mut locations: Vec<Location>) -> Self {
        locations.sort_unstable();
        Posting { doc_id, version, locations }
    }

    /// Occurrence count of the term in the document, uncapped.
    pub fn term_freq(&self) -> u32 {
        self.locations.len() as u32
    }

    /// Occurrences restricted to the given (sorted) node ordinals.
    pub fn term_freq_in(&self, nodes: &[u32]) -> u32 {
        self.locations.iter()
            .filter(|loc| nodes.binary_search(&loc.node).is_ok())
            .count() as u32
    }

    /// Distinct node ordinals this posting touches, ascending.
    pub fn nodes(&self) -> Vec<u32> {
        let mut nodes: Vec<u32> = self.locations.iter().map(|l| l.node).collect();
        nodes.dedup();
        nodes
    }
}

const BLOCK_SIZE: usize = 128;

/// Posting list for a term
/// Note: Sorted by doc_id, one posting per doc_id. Postings live in shared
/// blocks of at most `2 * BLOCK_SIZE`; cloning a list copies only the block
/// pointers, and an update copies the one block it touches.
#[derive(Debug, Clone, Default)]
pub struct PostingList {
    blocks: Vec<Arc<Vec<Posting>>>,
    len: usize,
}

impl PostingList {
    pub fn new() -> Self {
        PostingList::default()
    }

    pub fn from_sorted(postings: Vec<Posting>) -> Self {
        debug_assert!(postings.windows(2).all(|w| w[0].doc_id < w[1].doc_id));
        let len = postings.len();
        let blocks = postings
            .chunks(BLOCK_SIZE)
            .map(|chunk| Arc::new(chunk.to_vec()))
            .collect();
        PostingList { blocks, len }
    }

    /// Block that holds, or would hold, `doc_id`.
    fn block_for(&self, doc_id: DocId) -> usize {
        let idx = self.blocks.partition_point(|block| {
            block.last().is_some_and(|last| last.doc_id < doc_id)
        });
        idx.min(self.blocks.len().saturating_sub(1))
    }

    /// Inserts or replaces the posting for its doc_id, returning the replaced one.
    pub fn upsert(&mut self, posting: Posting) -> Option<Posting> {
        if self.blocks.is_empty() {
            self.blocks.push(Arc::new(Vec::with_capacity(BLOCK_SIZE)));
        }
        let idx = self.block_for(posting.doc_id);
        let block = Arc::make_mut(&mut self.blocks[idx]);
        match block.binary_search_by_key(&posting.doc_id, |p| p.doc_id) {
            Ok(pos) => Some(std::mem::replace(&mut block[pos], posting)),
            Err(pos) => {
                block.insert(pos, posting);
                self.len += 1;
                if block.len() > 2 * BLOCK_SIZE {
                    let tail = block.split_off(BLOCK_SIZE);
                    self.blocks.insert(idx + 1, Arc::new(tail));
                }
                None
            }
        }
    }

    pub fn get(&self, doc_id: DocId) -> Option<&Posting> {
        let block = self.blocks.get(self.block_for(doc_id))?;
        block
            .binary_search_by_key(&doc_id, |p| p.doc_id)
            .ok()
            .map(|pos| &block[pos])
    }

    pub fn iter(&self) -> impl Iterator<Item = &Posting> {
        self.blocks.iter().flat_map(|block| block.iter())
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn doc_freq(&self) -> u32 {
        self.len as u32
    }

    pub fn total_freq(&self) -> u64 {
        self.iter().map(|p| p.term_freq() as u64).sum()
    }

    /// Keeps postings accepted by `keep`; returns how many were dropped.
    /// Blocks without a dropped posting stay shared.
    pub fn retain<F: FnMut(&Posting) -> bool>(&mut self, mut keep: F) -> usize {
        let before = self.len;
        for block in &mut self.blocks {
            if block.iter().all(&mut keep) {
                continue;
            }
            Arc::make_mut(block).retain(&mut keep);
        }
        self.blocks.retain(|block| !block.is_empty());
        self.len = self.blocks.iter().map(|block| block.len()).sum();
        before - self.len
    }
}

impl PartialEq for PostingList {
    fn eq(&self, other: &Self) -> bool {
        self.len == other.len && self.iter().eq(other.iter())
    }
}

impl Eq for PostingList {}
