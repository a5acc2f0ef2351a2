use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};
use crate::analysis::filter::TokenFilter;
use crate::analysis::filters::lowercase::LowercaseFilter;
use crate::analysis::filters::punctuation::PunctuationFilter;
use crate::analysis::filters::stopword::StopWordFilter;
use crate::analysis::structural::{self, PathTokenizer};
use crate::analysis::token::Token;
use crate::analysis::tokenizer::{StandardTokenizer, Tokenizer};
use crate::core::config::Config;
use crate::core::error::Result;
use crate::core::types::{DocumentContent, PathContent};
use crate::index::posting::Location;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentMode {
    FullText,
    StructuralPath,
}

/// Finite, deterministic stream of tokens produced by one `tokenize` call.
pub struct TokenStream {
    inner: std::vec::IntoIter<Token>,
}

impl Iterator for TokenStream {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        self.inner.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl ExactSizeIterator for TokenStream {}

/// Terms of one document grouped for the posting store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalyzedDocument {
    pub terms: BTreeMap<String, Vec<Location>>,
    pub length: u32,          // Full-text term count
    pub paths: Vec<String>,   // Node ordinal -> rendered path
}

impl AnalyzedDocument {
    pub fn posting_count(&self) -> usize {
        self.terms.len()
    }
}

/// Text analysis pipeline
pub struct Analyzer {
    pub tokenizer: Box<dyn Tokenizer>,
    pub filters: Vec<Box<dyn TokenFilter>>,
    pub path_tokenizer: PathTokenizer,
    pub name: String,
}

impl Analyzer {
    pub fn new(name: String, tokenizer: Box<dyn Tokenizer>) -> Self {
        Analyzer {
            tokenizer,
            filters: Vec::new(),
            path_tokenizer: PathTokenizer,
            name,
        }
    }

    pub fn add_filter(mut self, filter: Box<dyn TokenFilter>) -> Self {
        self.filters.push(filter);
        self
    }

    /// Runs the full-text pipeline and renumbers positions densely from 0.
    pub fn analyze(&self, text: &str) -> Vec<Token> {
        let mut tokens = self.tokenizer.tokenize(text);

        for filter in &self.filters {
            tokens = filter.filter(tokens);
        }

        for (position, token) in tokens.iter_mut().enumerate() {
            token.position = position as u32;
        }
        tokens
    }

    pub fn tokenize(&self, content: &[u8], mode: ContentMode) -> Result<TokenStream> {
        let text = std::str::from_utf8(content)?;
        let tokens = match mode {
            ContentMode::FullText => self.analyze(text),
            ContentMode::StructuralPath => self.path_tokenizer.tokenize(text),
        };
        Ok(TokenStream { inner: tokens.into_iter() })
    }

    /// Normalizes a single query word the same way document text is normalized.
    pub fn query_terms(&self, word: &str) -> Vec<String> {
        self.analyze(word).into_iter().map(|t| t.text).collect()
    }

    pub fn analyze_document(&self, content: &DocumentContent) -> Result<AnalyzedDocument> {
        match content {
            DocumentContent::Text(bytes) => {
                let mut doc = AnalyzedDocument {
                    terms: BTreeMap::new(),
                    length: 0,
                    paths: Vec::new(),
                };
                for token in self.tokenize(bytes, ContentMode::FullText)? {
                    doc.terms.entry(token.text)
                        .or_default()
                        .push(Location::new(0, token.position));
                    doc.length += 1;
                }
                Ok(doc)
            }
            DocumentContent::Structured(nodes) => Ok(self.analyze_nodes(nodes)),
        }
    }

    fn analyze_nodes(&self, nodes: &[PathContent]) -> AnalyzedDocument {
        let mut terms: BTreeMap<String, Vec<Location>> = BTreeMap::new();
        let mut paths = Vec::with_capacity(nodes.len());
        let mut next_position = 0u32;

        for (ordinal, node) in nodes.iter().enumerate() {
            let ordinal = ordinal as u32;
            let segments = structural::normalize_path(&node.path);

            for token in self.path_tokenizer.tokenize_segments(&segments) {
                terms.entry(token.text)
                    .or_default()
                    .push(Location::new(ordinal, token.position));
            }

            let words = self.analyze(&node.text);
            let word_count = words.len() as u32;
            for token in words {
                terms.entry(token.text)
                    .or_default()
                    .push(Location::new(ordinal, next_position + token.position));
            }
            next_position += word_count;
            paths.push(structural::render_path(&segments));
        }

        AnalyzedDocument {
            terms,
            length: next_position,
            paths,
        }
    }

    /// Standard pipeline configured from `Config`: words, lowercase, punctuation, stop words.
    pub fn from_config(config: &Config) -> Self {
        Analyzer::new("standard".to_string(),
                      Box::new(StandardTokenizer::new(config.max_token_length)))
            .add_filter(Box::new(LowercaseFilter))
            .add_filter(Box::new(PunctuationFilter::new(&config.punctuation)))
            .add_filter(Box::new(StopWordFilter::new(config.stop_words.clone())))
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Analyzer::from_config(&Config::default())
    }
}
