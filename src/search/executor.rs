use std::collections::BTreeMap;
use std::sync::Arc;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::{CancellationToken, DocId};
use crate::mvcc::controller::Snapshot;
use crate::query::planner::PlanNode;
use crate::scoring::scorer::Scorer;
use crate::search::results::ScoredDoc;

/// Nodes in scope per document, each node list sorted ascending.
type ScopeSet = BTreeMap<DocId, Vec<u32>>;

/// Evaluates plans against one snapshot. Every intermediate result is a
/// list sorted by doc id so that AND/OR/NOT are linear merges.
pub struct QueryExecutor {
    scorer: Arc<dyn Scorer>,
    structural_weight: f32,
}

impl QueryExecutor {
    pub fn new(scorer: Arc<dyn Scorer>, structural_weight: f32) -> Self {
        QueryExecutor { scorer, structural_weight }
    }

    /// Matching documents ranked by score descending, ties by ascending doc id.
    pub fn evaluate(&self, plan: &PlanNode, snapshot: &Snapshot, cancel: &CancellationToken) -> Result<Vec<ScoredDoc>> {
        let evaluation = Evaluation {
            executor: self,
            snapshot,
            cancel,
            total_docs: snapshot.doc_count(),
        };
        let mut results = evaluation.eval(plan, None)?;
        results.sort_by(ScoredDoc::rank_cmp);
        Ok(results)
    }
}

struct Evaluation<'a> {
    executor: &'a QueryExecutor,
    snapshot: &'a Snapshot,
    cancel: &'a CancellationToken,
    total_docs: u64,
}

impl<'a> Evaluation<'a> {
    fn eval(&self, node: &PlanNode, scope: Option<&ScopeSet>) -> Result<Vec<ScoredDoc>> {
        if self.cancel.is_cancelled() {
            return Err(Error::new(ErrorKind::Cancelled, "query cancelled".to_string()));
        }

        match node {
            PlanNode::Term(term) => Ok(self.term(term, scope)),
            PlanNode::And(children) => {
                let mut lists = children.iter()
                    .map(|child| self.eval(child, scope))
                    .collect::<Result<Vec<_>>>()?;
                // Smallest first keeps every intermediate intersection small.
                lists.sort_by_key(Vec::len);
                let mut lists = lists.into_iter();
                let first = lists.next().unwrap_or_default();
                Ok(lists.fold(first, |acc, list| intersect(&acc, &list)))
            }
            PlanNode::Or(children) => {
                let mut acc = Vec::new();
                for child in children {
                    let list = self.eval(child, scope)?;
                    acc = union(&acc, &list);
                }
                Ok(acc)
            }
            PlanNode::Not(child) => {
                let excluded = self.eval(child, scope)?;
                let universe: Vec<DocId> = match scope {
                    Some(scope) => scope.keys().copied().collect(),
                    None => self.snapshot.documents.live_ids().collect(),
                };
                Ok(difference(&universe, &excluded))
            }
            PlanNode::PathScope { term, child, .. } => self.path_scope(term, child.as_deref(), scope),
        }
    }

    fn idf(&self, term: &str) -> f32 {
        let doc_freq = self.snapshot.postings.doc_freq(term) as u64;
        self.executor.scorer.idf(doc_freq, self.total_docs)
    }

    fn term(&self, term: &str, scope: Option<&ScopeSet>) -> Vec<ScoredDoc> {
        let idf = self.idf(term);
        let scorer = &self.executor.scorer;

        self.snapshot.postings.postings(term)
            .filter_map(|posting| {
                let term_freq = match scope {
                    Some(scope) => posting.term_freq_in(scope.get(&posting.doc_id)?),
                    None => posting.term_freq(),
                };
                (term_freq > 0).then(|| ScoredDoc::new(posting.doc_id, scorer.score(term_freq, idf)))
            })
            .collect()
    }

    fn path_scope(&self, term: &str, child: Option<&PlanNode>, outer: Option<&ScopeSet>) -> Result<Vec<ScoredDoc>> {
        let mut scoped = ScopeSet::new();
        for posting in self.snapshot.postings.postings(term) {
            let mut nodes = posting.nodes();
            if let Some(outer) = outer {
                let Some(allowed) = outer.get(&posting.doc_id) else { continue };
                nodes.retain(|node| allowed.binary_search(node).is_ok());
            }
            if !nodes.is_empty() {
                scoped.insert(posting.doc_id, nodes);
            }
        }

        let weight = self.executor.structural_weight;
        let specificity = if weight == 0.0 { 0.0 } else { weight * self.idf(term) };
        let bonus = |doc_id: DocId| {
            scoped.get(&doc_id).map_or(0.0, |nodes| specificity * nodes.len() as f32)
        };

        let mut results = match child {
            Some(child) => self.eval(child, Some(&scoped))?,
            None => scoped.keys().map(|doc_id| ScoredDoc::new(*doc_id, 0.0)).collect(),
        };
        for doc in &mut results {
            doc.score += bonus(doc.doc_id);
        }
        Ok(results)
    }
}

/// Sorted merge intersection; scores are summed.
pub fn intersect(left: &[ScoredDoc], right: &[ScoredDoc]) -> Vec<ScoredDoc> {
    let mut out = Vec::with_capacity(left.len().min(right.len()));
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        match left[i].doc_id.cmp(&right[j].doc_id) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                out.push(ScoredDoc::new(left[i].doc_id, left[i].score + right[j].score));
                i += 1;
                j += 1;
            }
        }
    }
    out
}

/// Sorted merge union; scores of documents in both lists are summed.
pub fn union(left: &[ScoredDoc], right: &[ScoredDoc]) -> Vec<ScoredDoc> {
    let mut out = Vec::with_capacity(left.len() + right.len());
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        match left[i].doc_id.cmp(&right[j].doc_id) {
            std::cmp::Ordering::Less => {
                out.push(left[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(right[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push(ScoredDoc::new(left[i].doc_id, left[i].score + right[j].score));
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&left[i..]);
    out.extend_from_slice(&right[j..]);
    out
}

/// Documents of the sorted `universe` absent from `excluded`, scored 0.
pub fn difference(universe: &[DocId], excluded: &[ScoredDoc]) -> Vec<ScoredDoc> {
    let mut out = Vec::with_capacity(universe.len());
    let mut j = 0;
    for &doc_id in universe {
        while j < excluded.len() && excluded[j].doc_id < doc_id {
            j += 1;
        }
        if j < excluded.len() && excluded[j].doc_id == doc_id {
            continue;
        }
        out.push(ScoredDoc::new(doc_id, 0.0));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::doc_table::DocumentTable;
    use crate::index::posting::Location;
    use crate::index::posting_store::PostingStore;
    use crate::mvcc::controller::MVCCController;
    use crate::scoring::scorer::TfIdfScorer;

    fn docs(pairs: &[(u64, f32)]) -> Vec<ScoredDoc> {
        pairs.iter().map(|&(id, score)| ScoredDoc::new(DocId(id), score)).collect()
    }

    #[test]
    fn merges_combine_scores() {
        let a = docs(&[(1, 1.0), (3, 1.0), (5, 1.0)]);
        let b = docs(&[(3, 2.0), (4, 2.0)]);
        assert_eq!(intersect(&a, &b), docs(&[(3, 3.0)]));
        assert_eq!(union(&a, &b), docs(&[(1, 1.0), (3, 3.0), (4, 2.0), (5, 1.0)]));
        assert_eq!(difference(&[DocId(1), DocId(2), DocId(3)], &a), docs(&[(2, 0.0)]));
    }

    /// doc 0: /book/chapter1 "intro fox", /book/chapter2 "fox"; doc 1: raw "fox fox"
    fn snapshot() -> MVCCController {
        let mut postings = PostingStore::new();
        let mut table = DocumentTable::new();
        let d0 = table.allocate("book");
        let d1 = table.allocate("raw");
        for (term, loc) in [
            ("/book", Location::new(0, 1)), ("/book/chapter1", Location::new(0, 2)),
            ("=/book/chapter1", Location::new(0, 2)), ("intro", Location::new(0, 0)),
            ("fox", Location::new(0, 1)), ("/book", Location::new(1, 1)),
            ("/book/chapter2", Location::new(1, 2)), ("=/book/chapter2", Location::new(1, 2)),
            ("fox", Location::new(1, 2)),
        ] {
            postings.append(term, d0, loc);
        }
        postings.commit(d0, 1).unwrap();
        postings.append("fox", d1, Location::new(0, 0));
        postings.append("fox", d1, Location::new(0, 1));
        postings.commit(d1, 1).unwrap();
        table.set_metadata(d0, 3, 1, vec!["/book/chapter1".into(), "/book/chapter2".into()]).unwrap();
        table.set_metadata(d1, 2, 1, Vec::new()).unwrap();
        MVCCController::new(postings.view(), table.view())
    }

    fn run(plan: &PlanNode) -> Result<Vec<ScoredDoc>> {
        run_weighted(plan, 0.0)
    }

    fn run_weighted(plan: &PlanNode, structural_weight: f32) -> Result<Vec<ScoredDoc>> {
        let mvcc = snapshot();
        let guard = mvcc.acquire();
        QueryExecutor::new(Arc::new(TfIdfScorer), structural_weight).evaluate(plan, &guard, &CancellationToken::new())
    }

    fn term(t: &str) -> PlanNode {
        PlanNode::Term(t.to_string())
    }

    fn scope(path: &str, child: Option<PlanNode>) -> PlanNode {
        PlanNode::PathScope { term: path.to_string(), exact: path.starts_with('='), child: child.map(Box::new) }
    }

    #[test]
    fn scope_restricts_locations_inside_one_document() {
        let hits = run(&scope("/book/chapter1", Some(term("intro")))).unwrap();
        assert_eq!(hits.len(), 1);
        assert!(run(&scope("/book/chapter2", Some(term("intro")))).unwrap().is_empty());
        // Only one of the two "fox" occurrences of doc 0 is under chapter2.
        let idf = (2f32 / 2f32).ln();
        assert_eq!(run(&scope("=/book/chapter2", Some(term("fox")))).unwrap(), docs(&[(0, idf)]));
    }

    #[test]
    fn not_inside_a_scope_uses_scoped_documents() {
        let outside = run(&PlanNode::Not(Box::new(term("intro")))).unwrap();
        assert_eq!(outside, docs(&[(1, 0.0)]));
        let inside = run(&scope("/book", Some(PlanNode::Not(Box::new(term("intro")))))).unwrap();
        assert!(inside.is_empty());
        let path_only = run(&scope("/book", None)).unwrap();
        assert_eq!(path_only, docs(&[(0, 0.0)]));
    }

    #[test]
    fn structural_weight_adds_a_bonus_per_scoped_node() {
        let ln2 = 2f32.ln();
        // "/book" is in one of two documents; doc 0 has two nodes under it.
        let bonus = 0.5 * 2.0 * ln2;

        let plain = run(&scope("/book", Some(term("intro")))).unwrap();
        assert_eq!(plain.len(), 1);
        assert!((plain[0].score - ln2).abs() < 1e-6);

        let weighted = run_weighted(&scope("/book", Some(term("intro"))), 0.5).unwrap();
        assert!((weighted[0].score - (ln2 + bonus)).abs() < 1e-6);

        let path_only = run_weighted(&scope("/book", None), 0.5).unwrap();
        assert!((path_only[0].score - bonus).abs() < 1e-6);

        // The exact scope covers a single node.
        let exact = run_weighted(&scope("=/book/chapter1", None), 0.5).unwrap();
        assert!((exact[0].score - 0.5 * ln2).abs() < 1e-6);
    }

    #[test]
    fn ranking_prefers_higher_term_frequency() {
        let hits = run(&PlanNode::Or(vec![term("fox"), term("intro")])).unwrap();
        // fox is everywhere (idf 0); intro is only in doc 0.
        assert_eq!(hits[0].doc_id, DocId(0));
        assert!(hits[0].score > 0.0);
        assert_eq!(hits[1], ScoredDoc::new(DocId(1), 0.0));
        assert!(run(&term("missing")).unwrap().is_empty());
    }

    #[test]
    fn cancelled_queries_return_no_results() {
        let mvcc = snapshot();
        let guard = mvcc.acquire();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = QueryExecutor::new(Arc::new(TfIdfScorer), 0.0)
            .evaluate(&term("fox"), &guard, &cancel)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Cancelled);
    }
}
