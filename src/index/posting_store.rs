use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use serde::{Serialize, Deserialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::DocId;
use crate::index::persistent_map::PersistentMap;
use crate::index::posting::{Location, Posting, PostingList};

pub type PostingMap = PersistentMap<String, Arc<PostingList>>;

/// Visible (committed, not retired) version of each document.
pub type VisibleMap = PersistentMap<DocId, u32>;

/// Immutable view of the committed postings, shared by snapshots.
#[derive(Debug, Clone, Default)]
pub struct PostingView {
    lists: PostingMap,
    visible: VisibleMap,
}

impl PostingView {
    pub fn is_visible(&self, posting: &Posting) -> bool {
        self.visible.get(&posting.doc_id) == Some(&posting.version)
    }

    /// Visible postings of `term`, in doc_id order, without copying.
    pub fn postings<'a>(&'a self, term: &str) -> impl Iterator<Item = &'a Posting> + 'a {
        self.lists
            .get(term)
            .into_iter()
            .flat_map(|list| list.iter())
            .filter(move |p| self.is_visible(p))
    }

    /// Owned copy of the visible posting list; unknown terms give an empty list.
    pub fn lookup(&self, term: &str) -> PostingList {
        PostingList::from_sorted(self.postings(term).cloned().collect())
    }

    pub fn doc_freq(&self, term: &str) -> u32 {
        self.postings(term).count() as u32
    }

    pub fn term_count(&self) -> usize {
        self.lists.len()
    }

    pub fn visible_version(&self, doc_id: DocId) -> Option<u32> {
        self.visible.get(&doc_id).copied()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingStats {
    pub terms: usize,
    pub live_postings: u64,
    pub retired_postings: u64,
    pub pending_documents: usize,
}

impl PostingStats {
    pub fn retired_ratio(&self) -> f64 {
        if self.live_postings == 0 {
            if self.retired_postings == 0 { 0.0 } else { f64::INFINITY }
        } else {
            self.retired_postings as f64 / self.live_postings as f64
        }
    }
}

/// Term-keyed posting lists with pending (uncommitted) buffers and
/// logical retirement. Maps and lists are structurally shared with the
/// published views: a commit copies only the trie paths and posting blocks
/// it touches.
#[derive(Debug, Default)]
pub struct PostingStore {
    lists: PostingMap,
    visible: VisibleMap,
    doc_terms: HashMap<DocId, Vec<String>>,          // Terms of each document's visible version
    pending: HashMap<DocId, BTreeMap<String, Vec<Location>>>,
    retired_terms: HashSet<String>,                  // Lists holding at least one retired posting
    live_postings: u64,
    retired_postings: u64,
}

impl PostingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuilds bookkeeping from persisted lists and visibility.
    pub fn restore(lists: PostingMap, visible: VisibleMap) -> Self {
        let mut doc_terms: HashMap<DocId, Vec<String>> = HashMap::new();
        let mut retired_terms = HashSet::new();
        let mut live_postings = 0;
        let mut retired_postings = 0;

        for (term, list) in lists.iter() {
            for posting in list.iter() {
                if visible.get(&posting.doc_id) == Some(&posting.version) {
                    doc_terms.entry(posting.doc_id).or_default().push(term.clone());
                    live_postings += 1;
                } else {
                    retired_terms.insert(term.clone());
                    retired_postings += 1;
                }
            }
        }

        PostingStore {
            lists,
            visible,
            doc_terms,
            pending: HashMap::new(),
            retired_terms,
            live_postings,
            retired_postings,
        }
    }

    /// Buffers a posting; nothing becomes visible before `commit`.
    pub fn append(&mut self, term: &str, doc_id: DocId, location: Location) {
        let doc = self.pending.entry(doc_id).or_default();
        match doc.get_mut(term) {
            Some(locations) => locations.push(location),
            None => {
                doc.insert(term.to_string(), vec![location]);
            }
        }
    }

    /// Drops pending postings of a document that will not be committed.
    pub fn abort(&mut self, doc_id: DocId) {
        self.pending.remove(&doc_id);
    }

    /// Makes every committed posting of the document invisible. Idempotent.
    pub fn retire(&mut self, doc_id: DocId) -> usize {
        if self.visible.remove(&doc_id).is_none() {
            return 0;
        }
        let terms = self.doc_terms.remove(&doc_id).unwrap_or_default();
        let count = terms.len();
        self.live_postings -= count as u64;
        self.retired_postings += count as u64;
        self.retired_terms.extend(terms);
        count
    }

    /// Merges the document's pending postings into the lists and makes them
    /// visible under `version`, replacing whatever version was visible before.
    pub fn commit(&mut self, doc_id: DocId, version: u32) -> Result<usize> {
        if let Some(current) = self.visible.get(&doc_id) {
            if *current >= version {
                return Err(Error::new(
                    ErrorKind::InvalidState,
                    format!("commit of {:?} at version {} would not advance visible version {}", doc_id, version, current),
                ));
            }
        }
        self.retire(doc_id);

        let pending = self.pending.remove(&doc_id).unwrap_or_default();
        let mut terms = Vec::with_capacity(pending.len());

        for (term, locations) in pending {
            let list = Arc::make_mut(self.lists.get_or_insert_with(term.clone(), Default::default));
            // Any posting displaced here belongs to an older, already retired version.
            if list.upsert(Posting::new(doc_id, version, locations)).is_some() {
                self.retired_postings -= 1;
            }
            terms.push(term);
        }

        let committed = terms.len();
        self.live_postings += committed as u64;
        self.doc_terms.insert(doc_id, terms);
        self.visible.insert(doc_id, version);
        Ok(committed)
    }

    /// Stops tracking a deleted document; its postings stay retired until compaction.
    pub fn forget(&mut self, doc_id: DocId) {
        self.retire(doc_id);
        self.pending.remove(&doc_id);
    }

    pub fn view(&self) -> PostingView {
        PostingView {
            lists: self.lists.clone(),
            visible: self.visible.clone(),
        }
    }

    /// Terms whose lists may contain retired postings, sorted for stable work order.
    pub fn compaction_candidates(&self) -> Vec<String> {
        let mut terms: Vec<String> = self.retired_terms.iter().cloned().collect();
        terms.sort_unstable();
        terms
    }

    /// Rewrites one list without its retired postings. Returns the number dropped.
    pub fn compact_term(&mut self, term: &str) -> usize {
        self.retired_terms.remove(term);
        let visible = &self.visible;
        let has_retired = match self.lists.get(term) {
            Some(list) => list.iter().any(|p| visible.get(&p.doc_id) != Some(&p.version)),
            None => false,
        };
        if !has_retired {
            return 0;
        }

        let Some(list) = self.lists.get_mut(term) else {
            return 0;
        };
        let dropped = Arc::make_mut(list)
            .retain(|p| visible.get(&p.doc_id) == Some(&p.version));
        if list.is_empty() {
            self.lists.remove(term);
        }
        self.retired_postings -= dropped as u64;
        dropped
    }

    pub fn stats(&self) -> PostingStats {
        PostingStats {
            terms: self.lists.len(),
            live_postings: self.live_postings,
            retired_postings: self.retired_postings,
            pending_documents: self.pending.len(),
        }
    }

    /// Persistable state: every list plus the visible version per document.
    pub fn parts(&self) -> (PostingMap, VisibleMap) {
        (self.lists.clone(), self.visible.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loc(node: u32, position: u32) -> Location {
        Location::new(node, position)
    }

    #[test]
    fn pending_postings_are_invisible_until_commit() {
        let mut store = PostingStore::new();
        store.append("fox", DocId(1), loc(0, 0));
        store.append("fox", DocId(1), loc(0, 3));
        assert!(store.view().lookup("fox").is_empty());

        assert_eq!(store.commit(DocId(1), 1).unwrap(), 1);
        let list = store.view().lookup("fox");
        assert_eq!(list.len(), 1);
        assert_eq!(list.iter().next().unwrap().term_freq(), 2);
    }

    #[test]
    fn views_taken_before_a_commit_do_not_change() {
        let mut store = PostingStore::new();
        store.append("fox", DocId(1), loc(0, 0));
        store.commit(DocId(1), 1).unwrap();
        let before = store.view();

        store.append("fox", DocId(2), loc(0, 0));
        store.commit(DocId(2), 1).unwrap();

        assert_eq!(before.doc_freq("fox"), 1);
        assert_eq!(store.view().doc_freq("fox"), 2);
    }

    #[test]
    fn commits_leave_untouched_lists_shared_with_views() {
        let mut store = PostingStore::new();
        for doc in 0..500 {
            store.append("common", DocId(doc), loc(0, 0));
            store.append(&format!("uniq{}", doc), DocId(doc), loc(0, 1));
            store.commit(DocId(doc), 1).unwrap();
        }
        let view = store.view();

        store.append("common", DocId(500), loc(0, 0));
        store.append("uniq7", DocId(500), loc(0, 1));
        store.commit(DocId(500), 1).unwrap();

        let shared = |term: &str| Arc::ptr_eq(view.lists.get(term).unwrap(), store.lists.get(term).unwrap());
        assert!(shared("uniq3"));
        assert!(shared("uniq499"));
        assert!(!shared("uniq7"));
        assert!(!shared("common"));
        assert_eq!(view.doc_freq("common"), 500);
        assert_eq!(store.view().doc_freq("common"), 501);
    }

    #[test]
    fn reindex_retires_terms_missing_from_the_new_version() {
        let mut store = PostingStore::new();
        store.append("quick", DocId(1), loc(0, 0));
        store.append("fox", DocId(1), loc(0, 1));
        store.commit(DocId(1), 1).unwrap();

        store.append("fox", DocId(1), loc(0, 0));
        store.commit(DocId(1), 2).unwrap();

        let view = store.view();
        assert!(view.lookup("quick").is_empty());
        assert_eq!(view.lookup("fox").iter().next().unwrap().version, 2);

        let stats = store.stats();
        assert_eq!(stats.live_postings, 1);
        assert_eq!(stats.retired_postings, 1);
    }

    #[test]
    fn compaction_drops_retired_postings_copy_on_write() {
        let mut store = PostingStore::new();
        for doc in 1..=3 {
            store.append("fox", DocId(doc), loc(0, 0));
            store.commit(DocId(doc), 1).unwrap();
        }
        store.forget(DocId(2));
        let reader = store.view();

        for term in store.compaction_candidates() {
            store.compact_term(&term);
        }

        assert_eq!(store.stats().retired_postings, 0);
        assert_eq!(store.stats().live_postings, 2);
        // The old view still holds the pre-compaction list.
        assert_eq!(reader.lists.get("fox").unwrap().len(), 3);
        assert_eq!(store.parts().0.get("fox").unwrap().len(), 2);
    }

    #[test]
    fn abort_discards_pending_and_stale_versions_are_rejected() {
        let mut store = PostingStore::new();
        store.append("fox", DocId(1), loc(0, 0));
        store.abort(DocId(1));
        assert_eq!(store.commit(DocId(1), 1).unwrap(), 0);
        assert!(store.commit(DocId(1), 1).is_err());
    }

    #[test]
    fn restore_recomputes_counters() {
        let mut store = PostingStore::new();
        store.append("a", DocId(1), loc(0, 0));
        store.append("b", DocId(1), loc(0, 1));
        store.commit(DocId(1), 1).unwrap();
        store.append("a", DocId(1), loc(0, 0));
        store.commit(DocId(1), 2).unwrap();

        let (lists, visible) = store.parts();
        let restored = PostingStore::restore(lists, visible);
        assert_eq!(restored.stats(), store.stats());
        assert_eq!(restored.compaction_candidates(), vec!["b".to_string()]);
    }
}
