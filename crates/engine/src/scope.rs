//! Namespaced lookup scope built from a flat state object.
//!
//! Top-level state keys that name a [`Namespace`] become that namespace,
//! `ds_*` keys hold data source results, and everything else lands in the
//! overflow bucket. The `state` namespace always exposes the whole tree.
//!
//! Lookup of `a.b.c`:
//! 1. `a` as a namespace, `ds_*` entry or overflow key, then `b.c` inside it;
//! 2. the full path inside each namespace in [`Namespace::PRIORITY`] order;
//! 3. the full path inside each `ds_*` entry.
//!
//! The first defined value wins.

use indexmap::IndexMap;
use serde_json::{Map, Value};
use tessera_util::get_path;

pub const DATA_SOURCE_PREFIX: &str = "ds_";

/// Canonical scope namespaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    State,
    Form,
    Props,
    Config,
    Data,
    Auth,
    User,
    Router,
    Params,
    Query,
    Headers,
    Request,
    Url,
    Location,
    Cookies,
    Session,
    Profile,
}

impl Namespace {
    /// Fallback order for paths whose first segment is not a namespace.
    pub const PRIORITY: [Namespace; 17] = [
        Namespace::State,
        Namespace::Form,
        Namespace::Data,
        Namespace::Props,
        Namespace::Params,
        Namespace::Query,
        Namespace::User,
        Namespace::Auth,
        Namespace::Profile,
        Namespace::Session,
        Namespace::Config,
        Namespace::Router,
        Namespace::Url,
        Namespace::Location,
        Namespace::Request,
        Namespace::Headers,
        Namespace::Cookies,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Namespace::State => "state",
            Namespace::Form => "form",
            Namespace::Props => "props",
            Namespace::Config => "config",
            Namespace::Data => "data",
            Namespace::Auth => "auth",
            Namespace::User => "user",
            Namespace::Router => "router",
            Namespace::Params => "params",
            Namespace::Query => "query",
            Namespace::Headers => "headers",
            Namespace::Request => "request",
            Namespace::Url => "url",
            Namespace::Location => "location",
            Namespace::Cookies => "cookies",
            Namespace::Session => "session",
            Namespace::Profile => "profile",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::PRIORITY.iter().copied().find(|namespace| namespace.as_str() == name)
    }
}

/// Per-resolution view over the state tree.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    root: Value,
    namespaces: IndexMap<Namespace, Value>,
    sources: IndexMap<String, Value>,
    overflow: Map<String, Value>,
}

impl Scope {
    pub fn build(state: &Value) -> Self {
        let mut scope = Scope {
            root: state.clone(),
            ..Default::default()
        };
        let Some(entries) = state.as_object() else {
            return scope;
        };
        for (key, value) in entries {
            if key == Namespace::State.as_str() {
                continue;
            }
            if let Some(namespace) = Namespace::parse(key) {
                scope.namespaces.insert(namespace, value.clone());
            } else if key.starts_with(DATA_SOURCE_PREFIX) {
                scope.sources.insert(key.clone(), value.clone());
            } else {
                scope.overflow.insert(key.clone(), value.clone());
            }
        }
        scope
    }

    pub fn namespace(&self, namespace: Namespace) -> Option<&Value> {
        match namespace {
            Namespace::State => Some(&self.root),
            other => self.namespaces.get(&other),
        }
    }

    pub fn data_source(&self, key: &str) -> Option<&Value> {
        self.sources.get(key)
    }

    /// Top-level identifier lookup: namespace, `ds_*` entry or overflow key.
    pub fn root(&self, name: &str) -> Option<&Value> {
        if let Some(namespace) = Namespace::parse(name) {
            return self.namespace(namespace);
        }
        if name.starts_with(DATA_SOURCE_PREFIX) {
            return self.sources.get(name);
        }
        self.overflow.get(name)
    }

    /// Resolves a dotted path following the lookup order above.
    pub fn lookup(&self, path: &str) -> Option<&Value> {
        let path = path.trim();
        if path.is_empty() {
            return None;
        }
        let (head, rest) = split_head(path);
        if let Some(value) = self.root(head).and_then(|root| get_path(root, rest)) {
            return Some(value);
        }
        for namespace in Namespace::PRIORITY {
            if let Some(value) = self.namespace(namespace).and_then(|root| get_path(root, path)) {
                return Some(value);
            }
        }
        self.sources.values().find_map(|source| get_path(source, path))
    }

    /// The flat state this scope was built from.
    pub fn as_value(&self) -> &Value {
        &self.root
    }
}

fn split_head(path: &str) -> (&str, &str) {
    match path.find(['.', '[']) {
        Some(index) if path.as_bytes()[index] == b'.' => (&path[..index], &path[index + 1..]),
        Some(index) => (&path[..index], &path[index..]),
        None => (path, ""),
    }
}
