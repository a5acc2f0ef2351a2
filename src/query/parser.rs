use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, multispace0},
    combinator::{map, opt, value},
    multi::many0,
    sequence::preceded,
};
use crate::analysis::structural;
use crate::core::error::{Error, Result};
use crate::query::ast::{PathScope, Query};

/// Query parser for converting query strings to the AST
///
/// Grammar:
/// - query    := scope? or_expr
/// - scope    := "path:" "="? "/" segment ("/" segment)*
/// - or_expr  := and_expr ("OR" and_expr)*
/// - and_expr := not_expr ("AND"? not_expr)*
/// - not_expr := "NOT" not_expr | primary
/// - primary  := "(" query ")" | word
///
/// Operators are upper case; juxtaposed operands are joined with the default operator.
#[derive(Debug, Clone)]
pub struct QueryParser {
    pub default_operator: BooleanOperator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BooleanOperator {
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Lexeme {
    LParen,
    RParen,
    And,
    Or,
    Not,
    Scope { exact: bool, raw: String },
    Word(String),
}

fn is_word_char(c: char) -> bool {
    !c.is_whitespace() && c != '(' && c != ')'
}

fn scope(input: &str) -> IResult<&str, Lexeme> {
    let (input, _) = tag("path:").parse(input)?;
    let (input, exact) = opt(char(structural::EXACT_PATH_MARKER)).parse(input)?;
    let (input, raw) = take_while(is_word_char).parse(input)?;
    Ok((input, Lexeme::Scope { exact: exact.is_some(), raw: raw.to_string() }))
}

fn word(input: &str) -> IResult<&str, Lexeme> {
    map(take_while1(is_word_char), |w: &str| match w {
        "AND" => Lexeme::And,
        "OR" => Lexeme::Or,
        "NOT" => Lexeme::Not,
        _ => Lexeme::Word(w.to_string()),
    }).parse(input)
}

fn lexeme(input: &str) -> IResult<&str, Lexeme> {
    preceded(
        multispace0,
        alt((
            value(Lexeme::LParen, char('(')),
            value(Lexeme::RParen, char(')')),
            scope,
            word,
        )),
    ).parse(input)
}

fn lex(input: &str) -> Result<Vec<Lexeme>> {
    let (rest, lexemes) = many0(lexeme)
        .parse(input)
        .map_err(|e| Error::malformed_query(format!("cannot tokenize query: {:?}", e)))?;
    if !rest.trim().is_empty() {
        return Err(Error::malformed_query(format!("unexpected input '{}'", rest.trim())));
    }
    Ok(lexemes)
}

impl Default for QueryParser {
    fn default() -> Self {
        QueryParser::new(BooleanOperator::Or)
    }
}

impl QueryParser {
    pub fn new(default_operator: BooleanOperator) -> Self {
        QueryParser { default_operator }
    }

    /// Parse a query string into Query AST
    /// Examples:
    /// - "quick fox" -> default operator between the words
    /// - "quick AND (fox OR dog)"
    /// - "NOT fox"
    /// - "path:/book/chapter1 intro" -> words restricted to nodes under the path
    /// - "path:=/book/chapter1" -> every node exactly at the path
    pub fn parse(&self, input: &str) -> Result<Query> {
        let lexemes = lex(input)?;
        let mut cursor = Cursor { lexemes: &lexemes, pos: 0, default_operator: self.default_operator };
        let query = cursor.query()?;
        match cursor.peek() {
            None => Ok(query),
            Some(Lexeme::RParen) => Err(Error::malformed_query("unbalanced ')'")),
            Some(other) => Err(Error::malformed_query(format!("unexpected {:?}", other))),
        }
    }
}

struct Cursor<'a> {
    lexemes: &'a [Lexeme],
    pos: usize,
    default_operator: BooleanOperator,
}

impl<'a> Cursor<'a> {
    fn peek(&self) -> Option<&'a Lexeme> {
        self.lexemes.get(self.pos)
    }

    fn bump(&mut self) -> Option<&'a Lexeme> {
        let lexeme = self.lexemes.get(self.pos);
        self.pos += 1;
        lexeme
    }

    /// True when the next lexeme can begin an operand.
    fn at_operand(&self) -> bool {
        matches!(self.peek(), Some(Lexeme::Word(_) | Lexeme::Not | Lexeme::LParen))
    }

    fn at_end_of_group(&self) -> bool {
        matches!(self.peek(), None | Some(Lexeme::RParen))
    }

    fn query(&mut self) -> Result<Query> {
        let scope = match self.peek() {
            Some(Lexeme::Scope { exact, raw }) => {
                self.pos += 1;
                Some(parse_scope(*exact, raw)?)
            }
            _ => None,
        };

        let body = if self.at_end_of_group() { None } else { Some(self.or_expr()?) };

        Ok(match (scope, body) {
            (Some((segments, exact)), body) => Query::Scope(PathScope {
                segments,
                exact,
                query: body.map(Box::new),
            }),
            (None, Some(body)) => body,
            (None, None) => Query::Empty,
        })
    }

    fn or_expr(&mut self) -> Result<Query> {
        let mut operands = vec![self.and_expr()?];
        loop {
            match self.peek() {
                Some(Lexeme::Or) => {
                    self.pos += 1;
                    if self.at_end_of_group() {
                        return Err(Error::malformed_query("OR without right operand"));
                    }
                }
                _ if self.default_operator == BooleanOperator::Or && self.at_operand() => {}
                _ => break,
            }
            operands.push(self.and_expr()?);
        }
        Ok(join(operands, Query::Or))
    }

    fn and_expr(&mut self) -> Result<Query> {
        let mut operands = vec![self.not_expr()?];
        loop {
            match self.peek() {
                Some(Lexeme::And) => {
                    self.pos += 1;
                    if self.at_end_of_group() {
                        return Err(Error::malformed_query("AND without right operand"));
                    }
                }
                _ if self.default_operator == BooleanOperator::And && self.at_operand() => {}
                _ => break,
            }
            operands.push(self.not_expr()?);
        }
        Ok(join(operands, Query::And))
    }

    fn not_expr(&mut self) -> Result<Query> {
        if let Some(Lexeme::Not) = self.peek() {
            self.pos += 1;
            if !self.at_operand() {
                return Ok(Query::Not(None));
            }
            return Ok(Query::not(self.not_expr()?));
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Query> {
        match self.bump() {
            Some(Lexeme::Word(word)) => Ok(Query::Term(word.clone())),
            Some(Lexeme::LParen) => {
                let inner = self.query()?;
                match self.bump() {
                    Some(Lexeme::RParen) => Ok(inner),
                    _ => Err(Error::malformed_query("unbalanced '('")),
                }
            }
            Some(Lexeme::RParen) => Err(Error::malformed_query("unbalanced ')'")),
            Some(Lexeme::And) => Err(Error::malformed_query("AND without left operand")),
            Some(Lexeme::Or) => Err(Error::malformed_query("OR without left operand")),
            Some(Lexeme::Scope { .. }) => Err(Error::malformed_query("path scope must begin the query or group")),
            Some(Lexeme::Not) | None => Err(Error::malformed_query("unexpected end of query")),
        }
    }
}

fn join(mut operands: Vec<Query>, combine: fn(Vec<Query>) -> Query) -> Query {
    if operands.len() == 1 {
        operands.remove(0)
    } else {
        combine(operands)
    }
}

fn parse_scope(exact: bool, raw: &str) -> Result<(Vec<String>, bool)> {
    if !raw.starts_with(structural::PATH_SEPARATOR) {
        return Err(Error::malformed_query(format!("path scope '{}' must start with '/'", raw)));
    }
    let segments = structural::parse_path(raw);
    if segments.is_empty() {
        return Err(Error::malformed_query("empty path scope"));
    }
    Ok((segments, exact))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    fn parse(input: &str) -> Result<Query> {
        QueryParser::default().parse(input)
    }

    fn t(word: &str) -> Query {
        Query::term(word)
    }

    #[test]
    fn and_binds_tighter_than_or() {
        assert_eq!(
            parse("a OR b AND c").unwrap(),
            Query::Or(vec![t("a"), Query::And(vec![t("b"), t("c")])])
        );
        assert_eq!(
            parse("(a OR b) AND NOT c").unwrap(),
            Query::And(vec![Query::Or(vec![t("a"), t("b")]), Query::not(t("c"))])
        );
    }

    #[test]
    fn juxtaposition_uses_the_default_operator() {
        assert_eq!(parse("quick fox").unwrap(), Query::Or(vec![t("quick"), t("fox")]));
        let and = QueryParser::new(BooleanOperator::And);
        assert_eq!(
            and.parse("quick fox OR dog").unwrap(),
            Query::Or(vec![Query::And(vec![t("quick"), t("fox")]), t("dog")])
        );
    }

    #[test]
    fn scopes_capture_path_and_body() {
        assert_eq!(
            parse("path:/Book/chapter1 intro").unwrap(),
            Query::Scope(PathScope {
                segments: vec!["book".to_string(), "chapter1".to_string()],
                exact: false,
                query: Some(Box::new(t("intro"))),
            })
        );
        match parse("path:=/book").unwrap() {
            Query::Scope(scope) => {
                assert!(scope.exact);
                assert!(scope.query.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn shape_errors_are_left_to_the_planner() {
        assert_eq!(parse("   ").unwrap(), Query::Empty);
        assert_eq!(parse("()").unwrap(), Query::Empty);
        assert_eq!(parse("NOT").unwrap(), Query::Not(None));
    }

    #[test]
    fn syntax_errors_are_malformed_queries() {
        for input in ["(a OR b", "a)", "a AND", "OR a", "a path:/x", "path:", "path:/", "path:book"] {
            let err = parse(input).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::MalformedQuery, "{}", input);
        }
    }
}
