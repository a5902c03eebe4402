// src/pathexpr.rs

//! Dotted property paths over document trees
//!
//! Policies address manifest properties with dotted paths such as
//! `image.selinux_mode`. One segment may carry a `[]` suffix, which fetches
//! the sequence at that point and applies the rest of the path to every
//! element: `content.container_images[].containers-transport`.
//!
//! A `null` value is treated the same as a missing one.

use serde_json::Value;
use thiserror::Error;

/// Errors while parsing a property path
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PathExprError {
    #[error("property path '{0}' contains an empty segment")]
    EmptySegment(String),

    #[error("property path '{0}' may contain at most one '[]' segment")]
    MultipleBroadcast(String),

    #[error("property path '{0}' uses '[]' inside a segment; it must end the segment")]
    MisplacedBroadcast(String),
}

/// A parsed property path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpression {
    raw: String,
    head: Vec<String>,
    broadcast: Option<Broadcast>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Broadcast {
    array_key: String,
    tail: Vec<String>,
}

/// Result of resolving a path against a document
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution<'a> {
    /// Path without `[]`: the value, if present
    Single(Option<&'a Value>),
    /// Path with `[]`: one entry per sequence element, in element order.
    /// Empty when the base is missing or not a sequence.
    Each(Vec<Option<&'a Value>>),
}

impl PathExpression {
    pub fn parse(path: &str) -> Result<Self, PathExprError> {
        let mut head = Vec::new();
        let mut broadcast: Option<Broadcast> = None;

        for segment in path.split('.') {
            let (key, is_array) = match segment.strip_suffix("[]") {
                Some(key) => (key, true),
                None => (segment, false),
            };
            if key.is_empty() {
                return Err(PathExprError::EmptySegment(path.to_string()));
            }
            if key.contains("[]") {
                return Err(PathExprError::MisplacedBroadcast(path.to_string()));
            }

            if is_array {
                if broadcast.is_some() {
                    return Err(PathExprError::MultipleBroadcast(path.to_string()));
                }
                broadcast = Some(Broadcast {
                    array_key: key.to_string(),
                    tail: Vec::new(),
                });
            } else if let Some(b) = broadcast.as_mut() {
                b.tail.push(key.to_string());
            } else {
                head.push(key.to_string());
            }
        }

        Ok(Self {
            raw: path.to_string(),
            head,
            broadcast,
        })
    }

    /// The path as written
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Whether the path contains a `[]` segment
    pub fn is_broadcast(&self) -> bool {
        self.broadcast.is_some()
    }

    pub fn resolve<'a>(&self, doc: &'a Value) -> Resolution<'a> {
        match &self.broadcast {
            None => Resolution::Single(get(doc, &self.head)),
            Some(b) => Resolution::Each(
                self.sequence(doc, b)
                    .map(|items| items.iter().map(|item| get(item, &b.tail)).collect())
                    .unwrap_or_default(),
            ),
        }
    }

    /// Whether the path addresses something in the document.
    ///
    /// For a `[]` path this means the sequence exists and, if the path goes
    /// on past the `[]`, at least one element has the remaining property.
    pub fn exists(&self, doc: &Value) -> bool {
        match &self.broadcast {
            None => get(doc, &self.head).is_some(),
            Some(b) => match self.sequence(doc, b) {
                Some(items) => b.tail.is_empty() || items.iter().any(|i| get(i, &b.tail).is_some()),
                None => false,
            },
        }
    }

    fn sequence<'a>(&self, doc: &'a Value, b: &Broadcast) -> Option<&'a [Value]> {
        let base = get(doc, &self.head)?;
        match get(base, std::slice::from_ref(&b.array_key))? {
            Value::Array(items) => Some(items.as_slice()),
            _ => None,
        }
    }
}

impl std::fmt::Display for PathExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Walk `keys` through nested mappings
pub fn get<'a, S: AsRef<str>>(doc: &'a Value, keys: &[S]) -> Option<&'a Value> {
    let mut current = doc;
    for key in keys {
        current = current.as_object()?.get(key.as_ref())?;
        if current.is_null() {
            return None;
        }
    }
    if current.is_null() { None } else { Some(current) }
}

/// Look up a plain dotted path (no `[]`)
pub fn lookup<'a>(doc: &'a Value, dotted: &str) -> Option<&'a Value> {
    let keys: Vec<&str> = dotted.split('.').collect();
    get(doc, &keys)
}
