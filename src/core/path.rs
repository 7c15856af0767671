//! Reference paths into JSON payloads.
//!
//! Supports the subset of JSONPath that ASL reference paths allow:
//! `$`, dotted fields, bracketed quoted fields and array indices. Paths
//! rooted at `$$` address the context object instead of the payload.

use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while compiling or applying a path.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PathError {
    #[error("Invalid path '{path}': {reason}")]
    Syntax { path: String, reason: String },

    #[error("Path '{path}' cannot be applied: {reason}")]
    Unassignable { path: String, reason: String },
}

/// Which document a path is evaluated against.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PathRoot {
    /// `$` - the state payload
    Input,
    /// `$$` - the context object
    Context,
}

/// One step of a compiled path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Segment {
    Field(String),
    Index(usize),
}

/// A compiled reference path.
///
/// # Example
///
/// ```rust
/// use stepwise::core::JsonPath;
/// use serde_json::json;
///
/// let path: JsonPath = "$.order.items[1]".parse().unwrap();
/// let doc = json!({"order": {"items": ["a", "b"]}});
/// assert_eq!(path.select(&doc), Some(&json!("b")));
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JsonPath {
    raw: String,
    root: PathRoot,
    segments: Vec<Segment>,
}

impl JsonPath {
    /// The `$` path.
    pub fn root() -> Self {
        Self {
            raw: "$".to_string(),
            root: PathRoot::Input,
            segments: Vec::new(),
        }
    }

    pub fn parse(raw: &str) -> Result<Self, PathError> {
        let syntax = |reason: &str| PathError::Syntax {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        let (root, rest) = if let Some(rest) = raw.strip_prefix("$$") {
            (PathRoot::Context, rest)
        } else if let Some(rest) = raw.strip_prefix('$') {
            (PathRoot::Input, rest)
        } else {
            return Err(syntax("must start with '$'"));
        };

        let chars: Vec<char> = rest.chars().collect();
        let mut segments = Vec::new();
        let mut pos = 0;

        while pos < chars.len() {
            match chars[pos] {
                '.' => {
                    pos += 1;
                    let start = pos;
                    while pos < chars.len() && chars[pos] != '.' && chars[pos] != '[' {
                        pos += 1;
                    }
                    if start == pos {
                        return Err(syntax("empty field name"));
                    }
                    let field: String = chars[start..pos].iter().collect();
                    if field == "*" {
                        return Err(syntax("wildcards are not supported"));
                    }
                    segments.push(Segment::Field(field));
                }
                '[' => {
                    pos += 1;
                    match chars.get(pos) {
                        Some(&quote) if quote == '\'' || quote == '"' => {
                            pos += 1;
                            let start = pos;
                            while pos < chars.len() && chars[pos] != quote {
                                pos += 1;
                            }
                            if pos >= chars.len() {
                                return Err(syntax("unterminated quoted field"));
                            }
                            segments.push(Segment::Field(chars[start..pos].iter().collect()));
                            pos += 1;
                        }
                        Some(c) if c.is_ascii_digit() => {
                            let start = pos;
                            while pos < chars.len() && chars[pos].is_ascii_digit() {
                                pos += 1;
                            }
                            let digits: String = chars[start..pos].iter().collect();
                            let index = digits
                                .parse::<usize>()
                                .map_err(|_| syntax("array index out of range"))?;
                            segments.push(Segment::Index(index));
                        }
                        _ => return Err(syntax("expected a quoted field or an array index")),
                    }
                    if chars.get(pos) != Some(&']') {
                        return Err(syntax("missing ']'"));
                    }
                    pos += 1;
                }
                _ => return Err(syntax("expected '.' or '['")),
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            root,
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn root_kind(&self) -> PathRoot {
        self.root
    }

    pub fn is_context(&self) -> bool {
        self.root == PathRoot::Context
    }

    /// True for the bare `$` path.
    pub fn is_root(&self) -> bool {
        self.root == PathRoot::Input && self.segments.is_empty()
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Select the value this path addresses, if it exists.
    pub fn select<'a>(&self, document: &'a Value) -> Option<&'a Value> {
        self.segments
            .iter()
            .try_fold(document, |current, segment| match segment {
                Segment::Field(name) => current.as_object()?.get(name),
                Segment::Index(index) => current.as_array()?.get(*index),
            })
    }

    /// Write `value` at this path inside `target`.
    ///
    /// Missing intermediate objects are created. Walking through a value
    /// that is neither an object nor an array fails.
    pub fn assign(&self, target: &mut Value, value: Value) -> Result<(), PathError> {
        let mut current = target;
        for (depth, segment) in self.segments.iter().enumerate() {
            let last = depth + 1 == self.segments.len();
            current = match segment {
                Segment::Field(name) => {
                    let object = current.as_object_mut().ok_or_else(|| self.unassignable(
                        format!("cannot set field '{name}' on a non-object value"),
                    ))?;
                    if last {
                        object.insert(name.clone(), value);
                        return Ok(());
                    }
                    object
                        .entry(name.clone())
                        .or_insert_with(|| Value::Object(Map::new()))
                }
                Segment::Index(index) => {
                    let array = current.as_array_mut().ok_or_else(|| {
                        self.unassignable(format!("cannot index [{index}] into a non-array value"))
                    })?;
                    let len = array.len();
                    let slot = array.get_mut(*index).ok_or_else(|| {
                        self.unassignable(format!("index {index} out of bounds (len {len})"))
                    })?;
                    if last {
                        *slot = value;
                        return Ok(());
                    }
                    slot
                }
            };
        }
        *current = value;
        Ok(())
    }

    fn unassignable(&self, reason: String) -> PathError {
        PathError::Unassignable {
            path: self.raw.clone(),
            reason,
        }
    }
}

impl FromStr for JsonPath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for JsonPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl Serialize for JsonPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_dotted_and_bracketed_segments() {
        let path = JsonPath::parse("$.a['b c'][2].d").unwrap();
        assert_eq!(
            path.segments(),
            &[
                Segment::Field("a".into()),
                Segment::Field("b c".into()),
                Segment::Index(2),
                Segment::Field("d".into()),
            ]
        );
        assert_eq!(path.root_kind(), PathRoot::Input);
    }

    #[test]
    fn context_paths_use_double_dollar() {
        let path = JsonPath::parse("$$.Map.Item.Index").unwrap();
        assert!(path.is_context());
        assert!(!path.is_root());
    }

    #[test]
    fn rejects_malformed_paths() {
        assert!(JsonPath::parse("a.b").is_err());
        assert!(JsonPath::parse("$.").is_err());
        assert!(JsonPath::parse("$.a[").is_err());
        assert!(JsonPath::parse("$.a[x]").is_err());
        assert!(JsonPath::parse("$.items[*]").is_err());
        assert!(JsonPath::parse("$['open").is_err());
    }

    #[test]
    fn select_walks_objects_and_arrays() {
        let doc = json!({"a": {"b": [10, 20, 30]}});
        let path = JsonPath::parse("$.a.b[1]").unwrap();
        assert_eq!(path.select(&doc), Some(&json!(20)));

        let missing = JsonPath::parse("$.a.c").unwrap();
        assert_eq!(missing.select(&doc), None);

        assert_eq!(JsonPath::root().select(&doc), Some(&doc));
    }

    #[test]
    fn assign_creates_intermediate_objects() {
        let mut doc = json!({"keep": true});
        JsonPath::parse("$.result.inner")
            .unwrap()
            .assign(&mut doc, json!(5))
            .unwrap();
        assert_eq!(doc, json!({"keep": true, "result": {"inner": 5}}));
    }

    #[test]
    fn assign_at_root_replaces_document() {
        let mut doc = json!({"old": 1});
        JsonPath::root().assign(&mut doc, json!([1, 2])).unwrap();
        assert_eq!(doc, json!([1, 2]));
    }

    #[test]
    fn assign_through_scalar_fails() {
        let mut doc = json!({"a": "text"});
        let err = JsonPath::parse("$.a.b")
            .unwrap()
            .assign(&mut doc, json!(1))
            .unwrap_err();
        assert!(matches!(err, PathError::Unassignable { .. }));
    }

    #[test]
    fn assign_into_existing_array_slot() {
        let mut doc = json!({"list": [0, 0]});
        JsonPath::parse("$.list[1]")
            .unwrap()
            .assign(&mut doc, json!("x"))
            .unwrap();
        assert_eq!(doc, json!({"list": [0, "x"]}));

        let out_of_bounds = JsonPath::parse("$.list[5]")
            .unwrap()
            .assign(&mut doc, json!(1));
        assert!(out_of_bounds.is_err());
    }
}
