//! Registry of the endpoints the serving layer actually exposes.
//!
//! Route assignments are validated against this registry so a role can never
//! be granted access to an endpoint that does not exist.

use std::borrow::Cow;
use std::collections::HashSet;

use serde::Serialize;

use crate::{Action, ObjectPattern};

/// Static endpoint declaration as written by the serving layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    /// Raw template, `{param}` style.
    pub path: Cow<'static, str>,
    pub method: Action,
    pub name: Cow<'static, str>,
    pub summary: Option<Cow<'static, str>>,
    pub tags: Vec<Cow<'static, str>>,
}

impl RouteSpec {
    pub fn new(method: Action, path: &'static str, name: &'static str) -> Self {
        Self {
            path: Cow::Borrowed(path),
            method,
            name: Cow::Borrowed(name),
            summary: None,
            tags: Vec::new(),
        }
    }

    pub fn summary(mut self, summary: &'static str) -> Self {
        self.summary = Some(Cow::Borrowed(summary));
        self
    }

    pub fn tag(mut self, tag: &'static str) -> Self {
        self.tags.push(Cow::Borrowed(tag));
        self
    }
}

/// Normalized registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteEntry {
    pub path: ObjectPattern,
    pub method: Action,
    pub name: String,
    pub summary: Option<String>,
    pub tags: Vec<String>,
}

/// Authoritative `(template, method)` set, built once at startup.
#[derive(Debug, Clone, Default)]
pub struct RouteRegistry {
    entries: Vec<RouteEntry>,
    index: HashSet<(ObjectPattern, Action)>,
}

impl RouteRegistry {
    pub fn new(specs: impl IntoIterator<Item = RouteSpec>) -> Self {
        let mut registry = Self::default();
        for spec in specs {
            let path = ObjectPattern::new(&spec.path);
            if !registry.index.insert((path.clone(), spec.method.clone())) {
                tracing::warn!(path = %path, method = %spec.method, "duplicate route declaration ignored");
                continue;
            }
            registry.entries.push(RouteEntry {
                path,
                method: spec.method,
                name: spec.name.into_owned(),
                summary: spec.summary.map(Cow::into_owned),
                tags: spec.tags.into_iter().map(Cow::into_owned).collect(),
            });
        }
        registry
    }

    /// All routes in declaration order.
    pub fn all_routes(&self) -> &[RouteEntry] {
        &self.entries
    }

    /// Is `(path, method)` a live endpoint? `path` is normalized first.
    pub fn is_valid(&self, path: &str, method: &Action) -> bool {
        self.index
            .contains(&(ObjectPattern::new(path), method.clone()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
