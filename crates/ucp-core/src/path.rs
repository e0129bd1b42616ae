//! Reference paths
//!
//! Shared by argument templating, `items_from` and condition expressions:
//!
//! - `ops.<op_id>.status|output|error...`
//! - `loop.<var>...` (plus `loop.first`, `loop.last`, `loop.length`)
//! - `ledger.<field>`
//! - `error.code|message` (inside a catch branch)
//!
//! After the root, segments are `.name` or `[index]`.

use serde_json::Value;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathRoot {
    Ops,
    Loop,
    Ledger,
    Error,
}

impl PathRoot {
    fn parse(name: &str) -> Option<Self> {
        match name {
            "ops" => Some(PathRoot::Ops),
            "loop" => Some(PathRoot::Loop),
            "ledger" => Some(PathRoot::Ledger),
            "error" => Some(PathRoot::Error),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Index(usize),
}

/// A parsed reference path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefPath {
    pub root: PathRoot,
    pub segments: Vec<Segment>,
    raw: String,
}

impl RefPath {
    /// Parse a reference path.
    ///
    /// ## Errors
    ///
    /// Returns a human-readable reason on unknown roots, empty segments,
    /// malformed indices, or an `ops` path with no op id.
    pub fn parse(input: &str) -> Result<Self, String> {
        let raw = input.trim();
        let mut chars = raw.char_indices().peekable();

        let root_end = raw.find(['.', '[']).unwrap_or(raw.len());
        let root_name = &raw[..root_end];
        let root = PathRoot::parse(root_name)
            .ok_or_else(|| format!("unknown reference root '{}'", root_name))?;

        while chars.peek().is_some_and(|(i, _)| *i < root_end) {
            chars.next();
        }

        let mut segments = Vec::new();
        while let Some((start, c)) = chars.next() {
            match c {
                '.' => {
                    let mut end = raw.len();
                    while let Some(&(i, next)) = chars.peek() {
                        if next == '.' || next == '[' {
                            end = i;
                            break;
                        }
                        if !is_name_char(next) {
                            return Err(format!("invalid character '{}' in '{}'", next, raw));
                        }
                        chars.next();
                    }
                    let name = &raw[start + 1..end];
                    if name.is_empty() {
                        return Err(format!("empty segment in '{}'", raw));
                    }
                    segments.push(Segment::Key(name.to_string()));
                }
                '[' => {
                    let mut digits = String::new();
                    let mut closed = false;
                    for (_, next) in chars.by_ref() {
                        if next == ']' {
                            closed = true;
                            break;
                        }
                        digits.push(next);
                    }
                    if !closed {
                        return Err(format!("unclosed '[' in '{}'", raw));
                    }
                    let index = digits
                        .trim()
                        .parse::<usize>()
                        .map_err(|_| format!("invalid index '{}' in '{}'", digits, raw))?;
                    segments.push(Segment::Index(index));
                }
                other => return Err(format!("unexpected '{}' in '{}'", other, raw)),
            }
        }

        if root == PathRoot::Ops && !matches!(segments.first(), Some(Segment::Key(_))) {
            return Err(format!("'{}' must name an operation id", raw));
        }

        Ok(Self {
            root,
            segments,
            raw: raw.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for RefPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Walk `segments` into `value`
pub fn walk<'a>(value: &'a Value, segments: &[Segment]) -> Option<&'a Value> {
    segments.iter().try_fold(value, |current, segment| match segment {
        Segment::Key(key) => current.get(key.as_str()),
        Segment::Index(index) => current.get(*index),
    })
}

/// Anything reference paths can be resolved against
pub trait Scope {
    /// Resolve `path`; `None` when any segment is missing
    fn lookup(&self, path: &RefPath) -> Option<Value>;
}
