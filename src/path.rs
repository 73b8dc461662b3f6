//! Field addressing into response bodies.
//!
//! A [`FieldPath`] is a small expression such as `$.items[0].id` or
//! `$["content-type"]`, parsed once when the scenario is built and evaluated
//! against a [`Value`] tree for every response. The leading `$` is optional.
use std::{fmt, str::FromStr};

use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PathError {
    #[error("empty key at byte {position} of `{path}`")]
    EmptyKey { path: String, position: usize },
    #[error("unclosed `[` at byte {position} of `{path}`")]
    UnclosedBracket { path: String, position: usize },
    #[error("invalid index `{index}` in `{path}`")]
    InvalidIndex { path: String, index: String },
    #[error("unexpected `{found}` at byte {position} of `{path}`")]
    UnexpectedChar {
        path: String,
        found: char,
        position: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed dot/bracket path into a [`Value`] tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(expr: &str) -> Result<Self, PathError> {
        Parser::new(expr).parse()
    }

    /// Walk the tree; `None` when any segment is missing or mistyped.
    pub fn resolve<'v>(&self, root: &'v Value) -> Option<&'v Value> {
        self.segments
            .iter()
            .try_fold(root, |node, segment| match (segment, node) {
                (Segment::Key(key), Value::Object(map)) => map.get(key),
                (Segment::Index(i), Value::Array(items)) => items.get(*i),
                _ => None,
            })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl FromStr for FieldPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldPath::parse(s)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

struct Parser<'a> {
    raw: &'a str,
    chars: Vec<(usize, char)>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(raw: &'a str) -> Self {
        Self {
            raw,
            chars: raw.char_indices().collect(),
            pos: 0,
        }
    }

    fn parse(mut self) -> Result<FieldPath, PathError> {
        let mut segments = Vec::new();

        match self.peek() {
            Some('$') => self.pos += 1,
            Some('.') | Some('[') | None => {}
            // bare leading key, e.g. `user.id`
            Some(_) => segments.push(Segment::Key(self.key()?)),
        }

        while let Some(c) = self.peek() {
            match c {
                '.' => {
                    self.pos += 1;
                    segments.push(Segment::Key(self.key()?));
                }
                '[' => segments.push(self.bracket()?),
                found => {
                    return Err(PathError::UnexpectedChar {
                        path: self.raw.to_owned(),
                        found,
                        position: self.offset(),
                    })
                }
            }
        }

        Ok(FieldPath {
            raw: self.raw.to_owned(),
            segments,
        })
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).map(|(_, c)| *c)
    }

    fn offset(&self) -> usize {
        self.chars
            .get(self.pos)
            .map_or(self.raw.len(), |(offset, _)| *offset)
    }

    fn key(&mut self) -> Result<String, PathError> {
        let start = self.offset();
        let mut key = String::new();
        while let Some(c) = self.peek() {
            if c == '.' || c == '[' {
                break;
            }
            key.push(c);
            self.pos += 1;
        }
        if key.is_empty() {
            return Err(PathError::EmptyKey {
                path: self.raw.to_owned(),
                position: start,
            });
        }
        Ok(key)
    }

    fn bracket(&mut self) -> Result<Segment, PathError> {
        let open = self.offset();
        let raw = self.raw;
        let unclosed = || PathError::UnclosedBracket {
            path: raw.to_owned(),
            position: open,
        };
        self.pos += 1;

        let quote = match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.pos += 1;
                Some(q)
            }
            _ => None,
        };

        let mut inner = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(unclosed());
            };
            self.pos += 1;
            match quote {
                Some(q) if c == q => {
                    if self.peek() != Some(']') {
                        return Err(unclosed());
                    }
                    self.pos += 1;
                    return Ok(Segment::Key(inner));
                }
                None if c == ']' => break,
                _ => inner.push(c),
            }
        }

        inner
            .trim()
            .parse::<usize>()
            .map(Segment::Index)
            .map_err(|_| PathError::InvalidIndex {
                path: self.raw.to_owned(),
                index: inner,
            })
    }
}
