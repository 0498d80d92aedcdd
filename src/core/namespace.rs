//! Purpose: Namespaces (identifier -> value maps) and the process-wide module cache.
//! Exports: `Namespace`, `NamespaceRegistry`, metadata binding names.
//! Role: Explicit replacement for an ambient module table; owned by `ModuleSystem`.
//! Invariants: A `Namespace` clone is the same namespace (shared handle), never a copy.
//! Invariants: A cached namespace is never replaced; racing inserts observe the first entry.
//! Invariants: Locks are held only for single map operations, never across evaluation.
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use super::value::{Value, read_lock, write_lock};

pub const NAME_KEY: &str = "__name__";
pub const FILE_KEY: &str = "__file__";
pub const LOADER_KEY: &str = "__loader__";
pub const PACKAGE_KEY: &str = "__package__";
pub const PATH_KEY: &str = "__path__";

#[derive(Clone)]
pub struct Namespace {
    inner: Arc<NamespaceInner>,
}

struct NamespaceInner {
    name: String,
    bindings: RwLock<IndexMap<String, Value>>,
}

impl Namespace {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(NamespaceInner {
                name: name.into(),
                bindings: RwLock::new(IndexMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        read_lock(&self.inner.bindings).get(key).cloned()
    }

    pub fn set(&self, key: impl Into<String>, value: Value) {
        write_lock(&self.inner.bindings).insert(key.into(), value);
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        write_lock(&self.inner.bindings).shift_remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        read_lock(&self.inner.bindings).contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        read_lock(&self.inner.bindings).keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.inner.bindings).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Point-in-time copy of the bindings; values that are handles stay shared.
    pub fn snapshot(&self) -> IndexMap<String, Value> {
        read_lock(&self.inner.bindings).clone()
    }

    /// Bindings that are not dunder metadata.
    pub fn public_names(&self) -> Vec<String> {
        read_lock(&self.inner.bindings)
            .keys()
            .filter(|key| !(key.starts_with("__") && key.ends_with("__")))
            .cloned()
            .collect()
    }

    pub fn ptr_eq(&self, other: &Namespace) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("name", &self.inner.name)
            .field("len", &self.len())
            .finish()
    }
}

/// Module cache keyed by fully-qualified module name.
#[derive(Default)]
pub struct NamespaceRegistry {
    modules: RwLock<HashMap<String, Namespace>>,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<Namespace> {
        read_lock(&self.modules).get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        read_lock(&self.modules).contains_key(name)
    }

    /// Inserts `namespace` unless the name is already cached.
    ///
    /// Returns `Err(existing)` when another namespace already owns the name.
    pub fn insert_new(&self, namespace: Namespace) -> Result<Namespace, Namespace> {
        let mut modules = write_lock(&self.modules);
        if let Some(existing) = modules.get(namespace.name()) {
            return Err(existing.clone());
        }
        modules.insert(namespace.name().to_string(), namespace.clone());
        Ok(namespace)
    }

    /// Returns the cached namespace for `name`, creating an empty one atomically if absent.
    ///
    /// The flag is `true` when this call created the namespace.
    pub fn get_or_create(&self, name: &str) -> (Namespace, bool) {
        let mut modules = write_lock(&self.modules);
        if let Some(existing) = modules.get(name) {
            return (existing.clone(), false);
        }
        let namespace = Namespace::new(name);
        namespace.set(NAME_KEY, Value::str(name));
        modules.insert(name.to_string(), namespace.clone());
        (namespace, true)
    }

    pub fn remove(&self, name: &str) -> Option<Namespace> {
        write_lock(&self.modules).remove(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = read_lock(&self.modules).keys().cloned().collect();
        names.sort();
        names
    }
}
