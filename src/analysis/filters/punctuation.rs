use std::collections::HashSet;
use crate::analysis::filter::TokenFilter;
use crate::analysis::token::Token;

/// Removes a configurable set of characters from tokens; tokens left empty are dropped.
pub struct PunctuationFilter {
    pub strip: HashSet<char>,
}

impl PunctuationFilter {
    pub fn new(chars: &str) -> Self {
        PunctuationFilter {
            strip: chars.chars().collect(),
        }
    }
}

impl TokenFilter for PunctuationFilter {
    fn filter(&self, tokens: Vec<Token>) -> Vec<Token> {
        if self.strip.is_empty() {
            return tokens;
        }
        tokens.into_iter()
            .filter_map(|mut token| {
                if token.text.chars().any(|c| self.strip.contains(&c)) {
                    token.text = token.text.chars().filter(|c| !self.strip.contains(c)).collect();
                    token.length = token.text.len();
                }
                (!token.text.is_empty()).then_some(token)
            })
            .collect()
    }

    fn name(&self) -> &str {
        "punctuation"
    }

    fn clone_box(&self) -> Box<dyn TokenFilter> {
        Box::new(PunctuationFilter {
            strip: self.strip.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_configured_characters_and_drops_empties() {
        let filter = PunctuationFilter::new("'_");
        let tokens = vec![
            Token::new("don't".to_string(), 0, 0),
            Token::new("__".to_string(), 1, 6),
            Token::new("plain".to_string(), 2, 9),
        ];
        let out: Vec<_> = filter.filter(tokens).into_iter().map(|t| t.text).collect();
        assert_eq!(out, vec!["dont", "plain"]);
    }
}
