use crate::analysis::token::{Token, TokenType};
use crate::analysis::tokenizer::Tokenizer;

/// Leading marker of the distinguished exact-path term.
pub const EXACT_PATH_MARKER: char = '=';
pub const PATH_SEPARATOR: char = '/';

/// Lower-cases and trims a node name. Separators inside a name are replaced so
/// the rendered path stays unambiguous; blank names are dropped.
pub fn normalize_segment(segment: &str) -> Option<String> {
    let trimmed = segment.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_lowercase().replace(PATH_SEPARATOR, "_"))
}

pub fn normalize_path<S: AsRef<str>>(segments: &[S]) -> Vec<String> {
    segments.iter()
        .filter_map(|s| normalize_segment(s.as_ref()))
        .collect()
}

/// Splits `/a/b` (leading separator optional) into normalized segments.
pub fn parse_path(text: &str) -> Vec<String> {
    text.split(PATH_SEPARATOR)
        .filter_map(normalize_segment)
        .collect()
}

pub fn render_path(segments: &[String]) -> String {
    if segments.is_empty() {
        return PATH_SEPARATOR.to_string();
    }
    let mut out = String::new();
    for segment in segments {
        out.push(PATH_SEPARATOR);
        out.push_str(segment);
    }
    out
}

/// Term matching every node at or below `segments`.
pub fn prefix_term(segments: &[String]) -> String {
    render_path(segments)
}

/// Term matching only nodes exactly at `segments`.
pub fn exact_term(segments: &[String]) -> String {
    format!("{}{}", EXACT_PATH_MARKER, render_path(segments))
}

/// Emits one term per path prefix followed by the exact-path term.
/// Position carries the depth of the prefix.
#[derive(Clone, Default)]
pub struct PathTokenizer;

impl PathTokenizer {
    pub fn tokenize_segments(&self, segments: &[String]) -> Vec<Token> {
        let mut tokens = Vec::with_capacity(segments.len() + 1);
        for depth in 1..=segments.len() {
            tokens.push(Token::path(
                prefix_term(&segments[..depth]),
                depth as u32,
                TokenType::PathPrefix,
            ));
        }
        tokens.push(Token::path(
            exact_term(segments),
            segments.len() as u32,
            TokenType::PathExact,
        ));
        tokens
    }
}

impl Tokenizer for PathTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        self.tokenize_segments(&parse_path(text))
    }

    fn name(&self) -> &str {
        "structural_path"
    }

    fn clone_box(&self) -> Box<dyn Tokenizer> {
        Box::new(PathTokenizer)
    }
}
