//! Route template normalization and matching.
//!
//! Templates are stored in a canonical form where every brace-delimited
//! parameter (`{id}`, `{role_id}`, ...) becomes the literal token `:id`.
//! Stored policies, the route registry and assignment requests all go
//! through [`normalize_path`], so template comparison is exact-string.
//!
//! Matching a concrete request path against a template follows `keyMatch2`
//! semantics without `*`: segment counts must agree, a `:`-prefixed template
//! segment matches any single non-empty segment, everything else is literal.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Canonical placeholder token that replaces every `{param}` segment.
pub const PLACEHOLDER: &str = ":id";

static BRACE_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{.*?\}").expect("static regex is valid"));

/// Rewrite `{name}` parameters to the canonical `:id` token.
///
/// Idempotent: a normalized template contains no braces.
pub fn normalize_path(raw: &str) -> String {
    BRACE_PARAM.replace_all(raw, PLACEHOLDER).into_owned()
}

/// A normalized URL template, as stored in a policy tuple.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct ObjectPattern(String);

impl ObjectPattern {
    pub fn new(raw: &str) -> Self {
        Self(normalize_path(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for ObjectPattern {
    fn from(value: String) -> Self {
        Self::new(&value)
    }
}

impl From<&str> for ObjectPattern {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<ObjectPattern> for String {
    fn from(value: ObjectPattern) -> Self {
        value.0
    }
}

impl core::fmt::Display for ObjectPattern {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Placeholder,
}

/// Pre-split form of an [`ObjectPattern`] used on the enforcement hot path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    segments: Vec<Segment>,
}

impl PathTemplate {
    pub fn compile(pattern: &ObjectPattern) -> Self {
        let segments = pattern
            .as_str()
            .split('/')
            .map(|seg| {
                if seg.len() > 1 && seg.starts_with(':') {
                    Segment::Placeholder
                } else {
                    Segment::Literal(seg.to_string())
                }
            })
            .collect();
        Self { segments }
    }

    /// Does the literal request path match this template?
    pub fn matches(&self, request_path: &str) -> bool {
        let mut request = request_path.split('/');
        for segment in &self.segments {
            let Some(actual) = request.next() else {
                return false;
            };
            let ok = match segment {
                Segment::Placeholder => !actual.is_empty(),
                Segment::Literal(expected) => expected == actual,
            };
            if !ok {
                return false;
            }
        }
        request.next().is_none()
    }
}
