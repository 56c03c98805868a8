//! Query template registry.
//!
//! Templates are grouped by namespace and addressed as `"<namespace>.<key>"`.
//! A registry is filled once at startup from a static list of sources (see
//! [`crate::builtin`]) plus any explicitly configured TOML files, then frozen
//! behind an `Arc`. Reloading means building a new registry and swapping it
//! into a [`SharedRegistry`]; nothing is ever mutated under active readers.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info};

use crate::error::{QueryError, Result};
use crate::resolve::{Placeholder, scan_placeholders};

// ---------------------------------------------------------------------------
// Addressing
// ---------------------------------------------------------------------------

/// A parsed `"<namespace>.<key>"` template address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryAddress {
    pub namespace: String,
    pub key: String,
}

impl QueryAddress {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
        }
    }

    /// Parse a dotted address; anything but two non-empty segments is an error.
    pub fn parse(raw: &str) -> Result<Self> {
        let mut parts = raw.split('.');
        match (parts.next(), parts.next(), parts.next()) {
            (Some(ns), Some(key), None) if !ns.trim().is_empty() && !key.trim().is_empty() => {
                Ok(Self::new(ns.trim(), key.trim()))
            }
            _ => Err(QueryError::InvalidQueryKey(raw.to_string())),
        }
    }
}

impl fmt::Display for QueryAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.key)
    }
}

impl std::str::FromStr for QueryAddress {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Templates
// ---------------------------------------------------------------------------

/// An immutable, registered SQL template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryTemplate {
    address: QueryAddress,
    text: String,
}

impl QueryTemplate {
    pub fn address(&self) -> &QueryAddress {
        &self.address
    }

    pub fn namespace(&self) -> &str {
        &self.address.namespace
    }

    pub fn key(&self) -> &str {
        &self.address.key
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Distinct placeholders in order of first appearance.
    pub fn placeholders(&self) -> Vec<Placeholder> {
        let mut seen = BTreeSet::new();
        scan_placeholders(&self.text)
            .into_iter()
            .filter(|p| seen.insert(p.clone()))
            .collect()
    }
}

/// A statically declared template source: one namespace and its templates.
#[derive(Debug, Clone, Copy)]
pub struct TemplateSource {
    pub namespace: &'static str,
    pub templates: &'static [(&'static str, &'static str)],
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Catalog of templates keyed by namespace, then key.
#[derive(Debug, Default, Clone)]
pub struct TemplateRegistry {
    namespaces: BTreeMap<String, BTreeMap<String, Arc<QueryTemplate>>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in source.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for source in crate::builtin::SOURCES {
            registry
                .register_source(source)
                .unwrap_or_else(|e| panic!("built-in template source is invalid: {e}"));
        }
        registry
    }

    /// Add a namespace of templates.
    ///
    /// The whole source is validated before anything is inserted, so a failed
    /// call leaves the registry unchanged.
    pub fn register<I, K, V>(&mut self, namespace: &str, templates: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let entries = templates
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect::<Vec<(String, String)>>();
        self.insert_validated(namespace, entries)
    }

    pub fn register_source(&mut self, source: &TemplateSource) -> Result<()> {
        self.register(source.namespace, source.templates.iter().copied())
    }

    /// Register a namespace from a TOML table of `key = "sql"` pairs.
    ///
    /// Any non-string value is rejected as [`QueryError::InvalidTemplate`].
    pub fn register_toml(&mut self, namespace: &str, table: &toml::Table) -> Result<()> {
        let mut entries = Vec::with_capacity(table.len());
        for (key, value) in table {
            match value.as_str() {
                Some(text) => entries.push((key.clone(), text.to_string())),
                None => {
                    return Err(QueryError::InvalidTemplate {
                        namespace: namespace.to_string(),
                        key: key.clone(),
                        reason: format!("expected a string, found {}", value.type_str()),
                    });
                }
            }
        }
        self.insert_validated(namespace, entries)
    }

    /// Load one TOML template file. The namespace is the file stem with a
    /// trailing `_queries` removed (`user_360_queries.toml` → `user_360`).
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let content = std::fs::read_to_string(path).map_err(|source| QueryError::SourceRead {
            path: path.to_path_buf(),
            source,
        })?;
        let table: toml::Table = content.parse().map_err(|source| QueryError::SourceParse {
            path: path.to_path_buf(),
            source,
        })?;
        let namespace = namespace_for_path(path);
        self.register_toml(&namespace, &table)?;
        info!(path = %path.display(), %namespace, templates = table.len(), "Loaded template file");
        Ok(())
    }

    fn insert_validated(&mut self, namespace: &str, entries: Vec<(String, String)>) -> Result<()> {
        let invalid = |key: &str, reason: &str| QueryError::InvalidTemplate {
            namespace: namespace.to_string(),
            key: key.to_string(),
            reason: reason.to_string(),
        };

        if namespace.trim().is_empty() || namespace.contains('.') {
            return Err(invalid("", "namespace must be non-empty and contain no '.'"));
        }
        if self.namespaces.contains_key(namespace) {
            return Err(QueryError::DuplicateNamespace(namespace.to_string()));
        }

        let mut templates = BTreeMap::new();
        for (key, text) in entries {
            if key.trim().is_empty() || key.contains('.') {
                return Err(invalid(&key, "key must be non-empty and contain no '.'"));
            }
            if text.trim().is_empty() {
                return Err(invalid(&key, "template body is empty"));
            }
            let template = QueryTemplate {
                address: QueryAddress::new(namespace, key.clone()),
                text,
            };
            if templates.insert(key.clone(), Arc::new(template)).is_some() {
                return Err(invalid(&key, "key appears more than once"));
            }
        }

        debug!(namespace, templates = templates.len(), "Registered namespace");
        self.namespaces.insert(namespace.to_string(), templates);
        Ok(())
    }

    pub fn lookup(&self, namespace: &str, key: &str) -> Result<&Arc<QueryTemplate>> {
        let templates = self
            .namespaces
            .get(namespace)
            .ok_or_else(|| QueryError::NamespaceNotFound(namespace.to_string()))?;
        templates
            .get(key)
            .ok_or_else(|| QueryError::TemplateNotFound {
                namespace: namespace.to_string(),
                key: key.to_string(),
            })
    }

    pub fn lookup_address(&self, address: &QueryAddress) -> Result<&Arc<QueryTemplate>> {
        self.lookup(&address.namespace, &address.key)
    }

    pub fn namespaces(&self) -> impl Iterator<Item = &str> {
        self.namespaces.keys().map(String::as_str)
    }

    /// Every template, ordered by namespace then key.
    pub fn templates(&self) -> impl Iterator<Item = &Arc<QueryTemplate>> {
        self.namespaces.values().flat_map(BTreeMap::values)
    }

    /// Total number of templates across all namespaces.
    pub fn len(&self) -> usize {
        self.namespaces.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn namespace_for_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    stem.strip_suffix("_queries").unwrap_or(&stem).to_string()
}

// ---------------------------------------------------------------------------
// SharedRegistry
// ---------------------------------------------------------------------------

/// Process-wide handle to the current registry snapshot.
///
/// Readers take an `Arc` snapshot and keep using it even if a reload swaps in
/// a new registry meanwhile.
#[derive(Debug)]
pub struct SharedRegistry {
    current: RwLock<Arc<TemplateRegistry>>,
}

impl SharedRegistry {
    pub fn new(registry: TemplateRegistry) -> Self {
        Self {
            current: RwLock::new(Arc::new(registry)),
        }
    }

    pub fn snapshot(&self) -> Arc<TemplateRegistry> {
        Arc::clone(&self.current.read())
    }

    /// Swap in a fully built registry, returning the previous one.
    pub fn replace(&self, registry: TemplateRegistry) -> Arc<TemplateRegistry> {
        let next = Arc::new(registry);
        let previous = std::mem::replace(&mut *self.current.write(), next);
        info!(templates = self.current.read().len(), "Template registry replaced");
        previous
    }
}

impl From<TemplateRegistry> for SharedRegistry {
    fn from(registry: TemplateRegistry) -> Self {
        Self::new(registry)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TemplateRegistry {
        let mut r = TemplateRegistry::new();
        r.register(
            "usage",
            [
                ("total", "SELECT COUNT(*) FROM {query_history_table}"),
                ("by_user", "SELECT * FROM {query_history_table} WHERE user_name = {:user}"),
            ],
        )
        .unwrap();
        r
    }

    #[test]
    fn address_parse_requires_two_segments() {
        assert_eq!(
            QueryAddress::parse("usage.total").unwrap(),
            QueryAddress::new("usage", "total")
        );
        for bad in ["usage", "usage.", ".total", "a.b.c", ""] {
            assert!(
                matches!(QueryAddress::parse(bad), Err(QueryError::InvalidQueryKey(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn lookup_distinguishes_namespace_and_key_errors() {
        let r = sample();
        assert!(r.lookup("usage", "total").is_ok());
        assert!(matches!(
            r.lookup("nope", "total"),
            Err(QueryError::NamespaceNotFound(ns)) if ns == "nope"
        ));
        assert!(matches!(
            r.lookup("usage", "nope"),
            Err(QueryError::TemplateNotFound { key, .. }) if key == "nope"
        ));
    }

    #[test]
    fn duplicate_namespace_rejected() {
        let mut r = sample();
        let err = r.register("usage", [("x", "SELECT 1")]).unwrap_err();
        assert!(matches!(err, QueryError::DuplicateNamespace(ns) if ns == "usage"));
    }

    #[test]
    fn failed_register_leaves_registry_untouched() {
        let mut r = sample();
        let before = r.len();
        let err = r
            .register("other", [("ok", "SELECT 1"), ("empty", "   ")])
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidTemplate { .. }));
        assert_eq!(r.len(), before);
        assert!(r.namespaces().all(|ns| ns != "other"));
    }

    #[test]
    fn repeated_key_in_one_source_rejected() {
        let mut r = TemplateRegistry::new();
        let err = r
            .register("ns", [("a", "SELECT 1"), ("a", "SELECT 2")])
            .unwrap_err();
        assert!(matches!(err, QueryError::InvalidTemplate { key, .. } if key == "a"));
    }

    #[test]
    fn toml_non_string_value_is_invalid_template() {
        let table: toml::Table = "good = \"SELECT 1\"\nbad = 42\n".parse().unwrap();
        let mut r = TemplateRegistry::new();
        let err = r.register_toml("ns", &table).unwrap_err();
        assert!(matches!(err, QueryError::InvalidTemplate { key, .. } if key == "bad"));
        assert!(r.is_empty());
    }

    #[test]
    fn namespace_strips_queries_suffix() {
        assert_eq!(namespace_for_path(Path::new("/q/user_360_queries.toml")), "user_360");
        assert_eq!(namespace_for_path(Path::new("common.toml")), "common");
    }

    #[test]
    fn placeholders_are_distinct_in_order() {
        let mut r = TemplateRegistry::new();
        r.register(
            "ns",
            [("q", "SELECT {a} {:b} {a} {{literal}} {c}")],
        )
        .unwrap();
        let names: Vec<String> = r
            .lookup("ns", "q")
            .unwrap()
            .placeholders()
            .into_iter()
            .map(|p| p.to_string())
            .collect();
        assert_eq!(names, vec!["{a}", "{:b}", "{c}"]);
    }

    #[test]
    fn builtin_registry_loads() {
        let r = TemplateRegistry::builtin();
        assert!(r.lookup("common", "get_distinct_users_30_days").is_ok());
        assert!(r.lookup("user_360", "credits_by_user").is_ok());
    }

    #[test]
    fn shared_registry_swap_keeps_old_snapshots_alive() {
        let shared = SharedRegistry::new(sample());
        let old = shared.snapshot();
        let mut next = TemplateRegistry::new();
        next.register("fresh", [("q", "SELECT 1")]).unwrap();
        let previous = shared.replace(next);

        assert!(Arc::ptr_eq(&old, &previous));
        assert!(old.lookup("usage", "total").is_ok());
        assert!(shared.snapshot().lookup("fresh", "q").is_ok());
        assert!(shared.snapshot().lookup("usage", "total").is_err());
    }
}
