/// Parsed query, before analysis of its words.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Query {
    Term(String),                  // Raw query word
    And(Vec<Query>),
    Or(Vec<Query>),
    Not(Option<Box<Query>>),       // `None` for a dangling NOT
    Scope(PathScope),
    Empty,
}

/// `path:/a/b` or `path:=/a/b` restriction with the expression it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathScope {
    pub segments: Vec<String>,     // Normalized path segments
    pub exact: bool,
    pub query: Option<Box<Query>>, // `None` for a path-only query
}

impl Query {
    pub fn term(word: impl Into<String>) -> Self {
        Query::Term(word.into())
    }

    pub fn not(query: Query) -> Self {
        Query::Not(Some(Box::new(query)))
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Query::Empty)
    }
}
