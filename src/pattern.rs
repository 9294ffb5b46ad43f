//! Subject pattern matching
//!
//! Subjects are dot-separated hierarchical topics (`orders.eu.created`).
//! Patterns may contain wildcard tokens:
//! - `*` matches exactly one segment
//! - `>` matches one or more trailing segments (must be the last token)
//!
//! Patterns are compiled once at subscribe time; matching always runs
//! against the compiled token list, never the raw string.

use crate::error::{QueueError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Literal(String),
    Single,
    Tail,
}

/// A compiled subject pattern
#[derive(Debug, Clone)]
pub struct SubjectPattern {
    raw: String,
    tokens: Vec<Token>,
}

impl SubjectPattern {
    /// Compile a pattern string
    pub fn parse(pattern: &str) -> Result<Self> {
        if pattern.is_empty() {
            return Err(invalid(pattern, "pattern is empty"));
        }

        let segments: Vec<&str> = pattern.split('.').collect();
        let mut tokens = Vec::with_capacity(segments.len());

        for (i, segment) in segments.iter().enumerate() {
            match *segment {
                "" => return Err(invalid(pattern, "empty segment")),
                "*" => tokens.push(Token::Single),
                ">" => {
                    if i != segments.len() - 1 {
                        return Err(invalid(pattern, "'>' must be the last segment"));
                    }
                    tokens.push(Token::Tail);
                }
                literal => {
                    if literal.contains('*') || literal.contains('>') {
                        return Err(invalid(pattern, "wildcard inside a literal segment"));
                    }
                    tokens.push(Token::Literal(literal.to_string()));
                }
            }
        }

        Ok(Self {
            raw: pattern.to_string(),
            tokens,
        })
    }

    /// The original pattern string
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Whether this pattern contains any wildcard token
    pub fn has_wildcards(&self) -> bool {
        self.tokens
            .iter()
            .any(|t| matches!(t, Token::Single | Token::Tail))
    }

    /// Test a concrete subject against the compiled pattern
    pub fn matches(&self, subject: &str) -> bool {
        let segments: Vec<&str> = subject.split('.').collect();

        let mut i = 0;
        for token in &self.tokens {
            match token {
                Token::Tail => return i < segments.len(),
                Token::Single => {
                    if i >= segments.len() || segments[i].is_empty() {
                        return false;
                    }
                    i += 1;
                }
                Token::Literal(lit) => {
                    if i >= segments.len() || segments[i] != lit {
                        return false;
                    }
                    i += 1;
                }
            }
        }

        i == segments.len()
    }
}

fn invalid(pattern: &str, reason: &str) -> QueueError {
    QueueError::Pattern {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    }
}
