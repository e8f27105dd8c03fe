//! Textual filter expressions
//!
//! Parses the SQL-like filter text accepted by the CLI into a
//! [`PredicateNode`]:
//!
//! ```text
//! CitationID = 1 AND (LastName startsWith 'Ab' OR Date IS NULL)
//! NOT Kind IN ('a', 'b')
//! `my.view`.id <=> 3
//! ```
//!
//! `AND` binds tighter than `OR`. Keywords are case-insensitive.

use crate::read::predicate::{ComparisonOp, PredicateNode, StringMatchKind};
use crate::value::Value;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("filter syntax error at offset {offset}: {message}")]
pub struct FilterSyntaxError {
    pub offset: usize,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Int(i64),
    Op(ComparisonOp),
    LParen,
    RParen,
    Comma,
}

/// Parse a filter expression
pub fn parse_filter(text: &str) -> Result<PredicateNode, FilterSyntaxError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: text.len(),
    };
    let node = parser.parse_or()?;
    if let Some((offset, token)) = parser.tokens.get(parser.pos) {
        return Err(FilterSyntaxError {
            offset: *offset,
            message: format!("unexpected {token:?}"),
        });
    }
    Ok(node)
}

fn tokenize(text: &str) -> Result<Vec<(usize, Token)>, FilterSyntaxError> {
    let bytes = text.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        match c {
            b' ' | b'\t' | b'\n' | b'\r' => {
                i += 1;
                continue;
            }
            b'(' => {
                tokens.push((start, Token::LParen));
                i += 1;
            }
            b')' => {
                tokens.push((start, Token::RParen));
                i += 1;
            }
            b',' => {
                tokens.push((start, Token::Comma));
                i += 1;
            }
            b'\'' => {
                let (literal, next) = read_quoted(text, i, b'\'')?;
                tokens.push((start, Token::Str(literal)));
                i = next;
            }
            b'=' | b'!' | b'<' | b'>' => {
                let rest = &text[i..];
                let (op, len) = if rest.starts_with("<=>") {
                    (ComparisonOp::NullSafeEq, 3)
                } else if rest.starts_with("!=") {
                    (ComparisonOp::NotEq, 2)
                } else if rest.starts_with("<>") {
                    (ComparisonOp::NotEq, 2)
                } else if rest.starts_with("<=") {
                    (ComparisonOp::LtEq, 2)
                } else if rest.starts_with(">=") {
                    (ComparisonOp::GtEq, 2)
                } else if c == b'<' {
                    (ComparisonOp::Lt, 1)
                } else if c == b'>' {
                    (ComparisonOp::Gt, 1)
                } else if c == b'=' {
                    (ComparisonOp::Eq, 1)
                } else {
                    return Err(FilterSyntaxError {
                        offset: start,
                        message: "expected '!='".to_string(),
                    });
                };
                tokens.push((start, Token::Op(op)));
                i += len;
            }
            b'-' | b'0'..=b'9' => {
                i += 1;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                let digits = &text[start..i];
                let value = digits.parse::<i64>().map_err(|e| FilterSyntaxError {
                    offset: start,
                    message: format!("invalid integer '{digits}': {e}"),
                })?;
                tokens.push((start, Token::Int(value)));
            }
            _ if c == b'`' || c.is_ascii_alphabetic() || c == b'_' => {
                let (ident, next) = read_identifier(text, i)?;
                tokens.push((start, Token::Ident(ident)));
                i = next;
            }
            _ => {
                return Err(FilterSyntaxError {
                    offset: start,
                    message: format!("unexpected character '{}'", text[start..].chars().next().unwrap_or('?')),
                })
            }
        }
    }
    Ok(tokens)
}

/// Quoted run starting at `start`; a doubled quote escapes itself
fn read_quoted(text: &str, start: usize, quote: u8) -> Result<(String, usize), FilterSyntaxError> {
    let bytes = text.as_bytes();
    let mut out = String::new();
    let mut i = start + 1;
    let mut run = i;
    while i < bytes.len() {
        if bytes[i] == quote {
            out.push_str(&text[run..i]);
            if bytes.get(i + 1) == Some(&quote) {
                out.push(quote as char);
                i += 2;
                run = i;
                continue;
            }
            return Ok((out, i + 1));
        }
        i += 1;
    }
    Err(FilterSyntaxError {
        offset: start,
        message: "unterminated quoted text".to_string(),
    })
}

/// Dotted identifier; backquoted parts keep their dots
fn read_identifier(text: &str, start: usize) -> Result<(String, usize), FilterSyntaxError> {
    let bytes = text.as_bytes();
    let mut i = start;
    loop {
        if bytes.get(i) == Some(&b'`') {
            let (_, next) = read_quoted(text, i, b'`')?;
            i = next;
        } else {
            let part_start = i;
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            if i == part_start {
                return Err(FilterSyntaxError {
                    offset: i,
                    message: "expected identifier".to_string(),
                });
            }
        }
        if bytes.get(i) == Some(&b'.') {
            i += 1;
        } else {
            return Ok((text[start..i].to_string(), i));
        }
    }
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(_, t)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map_or(self.end, |(o, _)| *o)
    }

    fn error(&self, message: impl Into<String>) -> FilterSyntaxError {
        FilterSyntaxError {
            offset: self.offset(),
            message: message.into(),
        }
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(_, t)| t.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn keyword(&mut self, word: &str) -> bool {
        match self.peek() {
            Some(Token::Ident(ident)) if ident.eq_ignore_ascii_case(word) => {
                self.pos += 1;
                true
            }
            _ => false,
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), FilterSyntaxError> {
        if self.peek() == Some(expected) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}")))
        }
    }

    fn parse_or(&mut self) -> Result<PredicateNode, FilterSyntaxError> {
        let mut node = self.parse_and()?;
        while self.keyword("OR") {
            node = PredicateNode::or(node, self.parse_and()?);
        }
        Ok(node)
    }

    fn parse_and(&mut self) -> Result<PredicateNode, FilterSyntaxError> {
        let mut node = self.parse_unary()?;
        while self.keyword("AND") {
            node = PredicateNode::and(node, self.parse_unary()?);
        }
        Ok(node)
    }

    fn parse_unary(&mut self) -> Result<PredicateNode, FilterSyntaxError> {
        if self.keyword("NOT") {
            return Ok(PredicateNode::not(self.parse_unary()?));
        }
        if self.peek() == Some(&Token::LParen) {
            self.pos += 1;
            let node = self.parse_or()?;
            self.expect(&Token::RParen)?;
            return Ok(node);
        }
        self.parse_atom()
    }

    fn parse_atom(&mut self) -> Result<PredicateNode, FilterSyntaxError> {
        let column = match self.next() {
            Some(Token::Ident(ident)) => ident,
            _ => {
                self.pos = self.pos.saturating_sub(1);
                return Err(self.error("expected column name"));
            }
        };

        if self.keyword("IS") {
            let negated = self.keyword("NOT");
            if !self.keyword("NULL") {
                return Err(self.error("expected NULL"));
            }
            return Ok(if negated {
                PredicateNode::IsNotNull(column)
            } else {
                PredicateNode::IsNull(column)
            });
        }

        if self.keyword("IN") {
            self.expect(&Token::LParen)?;
            let mut literals = Vec::new();
            if self.peek() != Some(&Token::RParen) {
                loop {
                    literals.push(self.parse_literal()?);
                    if self.peek() == Some(&Token::Comma) {
                        self.pos += 1;
                    } else {
                        break;
                    }
                }
            }
            self.expect(&Token::RParen)?;
            return Ok(PredicateNode::is_in(column, literals));
        }

        for kind in [
            StringMatchKind::Contains,
            StringMatchKind::StartsWith,
            StringMatchKind::EndsWith,
        ] {
            if self.keyword(kind.name()) {
                return match self.next() {
                    Some(Token::Str(pattern)) => Ok(PredicateNode::string_match(column, kind, pattern)),
                    _ => {
                        self.pos = self.pos.saturating_sub(1);
                        Err(self.error(format!("{} needs a quoted pattern", kind.name())))
                    }
                };
            }
        }

        match self.next() {
            Some(Token::Op(op)) => {
                let literal = self.parse_literal()?;
                Ok(PredicateNode::compare(column, op, literal))
            }
            _ => {
                self.pos = self.pos.saturating_sub(1);
                Err(self.error("expected comparison operator"))
            }
        }
    }

    fn parse_literal(&mut self) -> Result<Value, FilterSyntaxError> {
        let value = match self.peek() {
            Some(Token::Str(s)) => Value::String(s.clone()),
            Some(Token::Int(n)) => Value::Integer(*n),
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("true") => Value::Boolean(true),
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("false") => Value::Boolean(false),
            Some(Token::Ident(word)) if word.eq_ignore_ascii_case("null") => Value::Null,
            _ => return Err(self.error("expected literal")),
        };
        self.pos += 1;
        Ok(value)
    }
}
