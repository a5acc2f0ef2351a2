use serde::{Serialize, Deserialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId(pub u64);

impl DocId {
    pub fn new(id: u64) -> Self {
        DocId(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for DocId {
    fn from(id: u64) -> Self {
        DocId(id)
    }
}

/// One content-bearing node of a tree-shaped document, already flattened by the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathContent {
    pub path: Vec<String>,
    pub text: String,
}

impl PathContent {
    pub fn new<S: Into<String>>(path: impl IntoIterator<Item = S>, text: impl Into<String>) -> Self {
        PathContent {
            path: path.into_iter().map(Into::into).collect(),
            text: text.into(),
        }
    }
}

/// Document body handed over by the acquisition layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentContent {
    /// Raw bytes expected to decode as UTF-8.
    Text(Vec<u8>),
    /// Ordered `(path, text)` pairs of a tree-shaped document.
    Structured(Vec<PathContent>),
}

impl DocumentContent {
    pub fn text(text: impl Into<String>) -> Self {
        DocumentContent::Text(text.into().into_bytes())
    }

    pub fn structured(nodes: Vec<PathContent>) -> Self {
        DocumentContent::Structured(nodes)
    }
}

/// Cooperative cancellation flag shared between a query and whoever may abort it.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}
