use std::sync::Arc;
use crate::analysis::analyzer::Analyzer;
use crate::analysis::structural;
use crate::core::error::{Error, Result};
use crate::query::ast::{PathScope, Query};

/// Evaluation plan over the posting store
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanNode {
    Term(String),
    And(Vec<PlanNode>),             // At least two children, none of them And
    Or(Vec<PlanNode>),              // At least two children, none of them Or
    Not(Box<PlanNode>),
    PathScope {
        term: String,               // Prefix term, or the exact-path term
        exact: bool,
        child: Option<Box<PlanNode>>,
    },
}

impl PlanNode {
    /// Number of nodes in the tree.
    pub fn size(&self) -> usize {
        match self {
            PlanNode::Term(_) => 1,
            PlanNode::And(children) | PlanNode::Or(children) => {
                1 + children.iter().map(PlanNode::size).sum::<usize>()
            }
            PlanNode::Not(child) => 1 + child.size(),
            PlanNode::PathScope { child, .. } => 1 + child.as_ref().map_or(0, |c| c.size()),
        }
    }
}

/// Query planner: analyzes query words and normalizes the boolean structure
pub struct QueryPlanner {
    analyzer: Arc<Analyzer>,
}

impl QueryPlanner {
    pub fn new(analyzer: Arc<Analyzer>) -> Self {
        QueryPlanner { analyzer }
    }

    /// A query whose words all analyze to nothing (stop words, bare
    /// punctuation) plans to the empty term, which no document contains.
    pub fn plan(&self, query: &Query) -> Result<PlanNode> {
        Ok(self.plan_node(query)?.unwrap_or_else(|| PlanNode::Term(String::new())))
    }

    /// `None` marks a subtree with no terms left after analysis. Such
    /// operands drop out of AND, OR and NOT rather than emptying them.
    fn plan_node(&self, query: &Query) -> Result<Option<PlanNode>> {
        match query {
            Query::Empty => Err(Error::malformed_query("empty query")),
            Query::Term(word) => Ok(self.plan_word(word)),
            Query::And(children) => {
                let nodes = self.plan_all(children)?;
                Ok(flatten(nodes, PlanNode::And, |node| match node {
                    PlanNode::And(inner) => Ok(inner),
                    other => Err(other),
                }))
            }
            Query::Or(children) => {
                let nodes = self.plan_all(children)?;
                Ok(flatten(nodes, PlanNode::Or, |node| match node {
                    PlanNode::Or(inner) => Ok(inner),
                    other => Err(other),
                }))
            }
            Query::Not(None) => Err(Error::malformed_query("NOT without operand")),
            Query::Not(Some(child)) => Ok(self.plan_node(child)?.map(|node| PlanNode::Not(Box::new(node)))),
            Query::Scope(scope) => self.plan_scope(scope).map(Some),
        }
    }

    fn plan_all(&self, children: &[Query]) -> Result<Vec<PlanNode>> {
        if children.is_empty() {
            return Err(Error::malformed_query("empty query"));
        }
        let mut nodes = Vec::with_capacity(children.len());
        for child in children {
            nodes.extend(self.plan_node(child)?);
        }
        Ok(nodes)
    }

    /// A word analyzing to several terms requires all of them.
    fn plan_word(&self, word: &str) -> Option<PlanNode> {
        let mut terms = self.analyzer.query_terms(word);
        match terms.len() {
            0 => None,
            1 => Some(PlanNode::Term(terms.remove(0))),
            _ => Some(PlanNode::And(terms.into_iter().map(PlanNode::Term).collect())),
        }
    }

    fn plan_scope(&self, scope: &PathScope) -> Result<PlanNode> {
        if scope.segments.is_empty() {
            return Err(Error::malformed_query("empty path scope"));
        }
        let term = if scope.exact {
            structural::exact_term(&scope.segments)
        } else {
            structural::prefix_term(&scope.segments)
        };
        let child = match &scope.query {
            Some(query) => self.plan_node(query)?.map(Box::new),
            None => None,
        };
        Ok(PlanNode::PathScope { term, exact: scope.exact, child })
    }
}

/// Splices children of the same operator into the parent; a single child
/// replaces the operator altogether, and no children leave nothing.
fn flatten(
    nodes: Vec<PlanNode>,
    combine: fn(Vec<PlanNode>) -> PlanNode,
    same_kind: fn(PlanNode) -> std::result::Result<Vec<PlanNode>, PlanNode>,
) -> Option<PlanNode> {
    let mut flat = Vec::with_capacity(nodes.len());
    for node in nodes {
        match same_kind(node) {
            Ok(inner) => flat.extend(inner),
            Err(other) => flat.push(other),
        }
    }
    match flat.len() {
        0 => None,
        1 => flat.pop(),
        _ => Some(combine(flat)),
    }
}
