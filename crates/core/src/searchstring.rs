//! Search query parsing.
//!
//! A query is a list of words and double-quoted strings, each optionally
//! prefixed with a `field:` qualifier:
//!
//! ```rust
//! use scrapbook_core::searchstring::{SearchTerm, parse};
//!
//! let terms = parse(r#"title:"long story" cats"#).unwrap();
//! assert_eq!(terms[0], SearchTerm { field: "title".into(), value: "long story".into(), quoted: true });
//! assert_eq!(terms[1], SearchTerm { field: String::new(), value: "cats".into(), quoted: false });
//! ```

use std::iter::Peekable;
use std::str::Chars;

use serde::Serialize;

/// Query parsing failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SearchError {
    #[error("field followed by a field")]
    FieldFollowedByField,
}

/// One search term.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchTerm {
    /// Qualifier, empty for a free term.
    pub field: String,
    pub value: String,
    /// Whether the value was a quoted string.
    pub quoted: bool,
}

#[derive(Debug, PartialEq, Eq)]
enum Token {
    Word(String),
    Quoted(String),
    Field(String),
}

/// Unicode white space, as separators between terms.
fn is_space(c: char) -> bool {
    matches!(
        c,
        ' ' | '\t'
            | '\n'
            | '\u{0b}'
            | '\u{0c}'
            | '\r'
            | '\u{85}'
            | '\u{a0}'
            | '\u{1680}'
            | '\u{2000}'..='\u{200a}'
            | '\u{2028}'
            | '\u{2029}'
            | '\u{202f}'
            | '\u{205f}'
            | '\u{3000}'
    )
}

struct Scanner<'a> {
    chars: Peekable<Chars<'a>>,
}

impl<'a> Scanner<'a> {
    fn new(input: &'a str) -> Self {
        Self { chars: input.chars().peekable() }
    }

    /// Everything up to the closing quote or the end of input. `\"` is an
    /// escaped quote, other backslashes are kept.
    fn quoted(&mut self) -> String {
        let mut value = String::new();
        while let Some(c) = self.chars.next() {
            match c {
                '"' => break,
                '\\' => match self.chars.next() {
                    Some('"') => value.push('"'),
                    Some(next) => {
                        value.push('\\');
                        value.push(next);
                    }
                    None => value.push('\\'),
                },
                c => value.push(c),
            }
        }
        value
    }

    /// A word, or a field name when it ends with `:`.
    fn word(&mut self, first: char) -> Token {
        let mut value = String::from(first);
        while let Some(c) = self.chars.next() {
            match c {
                ':' => return Token::Field(value),
                c if is_space(c) => break,
                c => value.push(c),
            }
        }
        Token::Word(value)
    }
}

impl Iterator for Scanner<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        loop {
            match self.chars.next()? {
                '"' => return Some(Token::Quoted(self.quoted())),
                c if is_space(c) => continue,
                c => return Some(self.word(c)),
            }
        }
    }
}

/// Split a query into search terms.
///
/// A field without a value at the end of the query is ignored.
///
/// # Errors
///
/// Returns [`SearchError::FieldFollowedByField`] for `a:b:value`.
pub fn parse(input: &str) -> Result<Vec<SearchTerm>, SearchError> {
    let mut terms = Vec::new();
    let mut field: Option<String> = None;

    for token in Scanner::new(input) {
        let (value, quoted) = match token {
            Token::Field(name) => {
                if field.is_some() {
                    return Err(SearchError::FieldFollowedByField);
                }
                field = Some(name);
                continue;
            }
            Token::Word(value) => (value, false),
            Token::Quoted(value) => (value, true),
        };
        terms.push(SearchTerm { field: field.take().unwrap_or_default(), value, quoted });
    }
    Ok(terms)
}
