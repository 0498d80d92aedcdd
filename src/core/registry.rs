//! Purpose: In-memory registry of module source text keyed by fully-qualified name.
//! Exports: `ModuleSpec`, `ModuleRegistry`, `PACKAGE_INIT_SUFFIX`.
//! Role: Backing store for the registry resolver; filled by the external tool.
//! Invariants: Keys are unique; `register` overwrites and never validates `content`.
//! Invariants: `resolve(name)` falls back to `name.__init__` for package entries.
use std::collections::HashMap;
use std::sync::RwLock;

use super::value::{read_lock, write_lock};

pub const PACKAGE_INIT_SUFFIX: &str = ".__init__";

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ModuleSpec {
    pub fullname: String,
    pub content: String,
    pub filepath: String,
}

impl ModuleSpec {
    pub fn new(
        fullname: impl Into<String>,
        content: impl Into<String>,
        filepath: impl Into<String>,
    ) -> Self {
        Self {
            fullname: fullname.into(),
            content: content.into(),
            filepath: filepath.into(),
        }
    }

    pub fn is_package(&self) -> bool {
        self.fullname.ends_with(PACKAGE_INIT_SUFFIX)
    }

    /// Module name with any package-init suffix removed.
    pub fn module_name(&self) -> &str {
        self.fullname
            .strip_suffix(PACKAGE_INIT_SUFFIX)
            .unwrap_or(&self.fullname)
    }

    /// Directory part of `filepath`, keeping the trailing `/`.
    pub fn search_path(&self) -> String {
        match self.filepath.rfind('/') {
            Some(idx) => self.filepath[..=idx].to_string(),
            None => "/".to_string(),
        }
    }
}

#[derive(Default)]
pub struct ModuleRegistry {
    specs: RwLock<HashMap<String, ModuleSpec>>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        fullname: impl Into<String>,
        content: impl Into<String>,
        filepath: impl Into<String>,
    ) {
        let spec = ModuleSpec::new(fullname, content, filepath);
        tracing::debug!(module = %spec.fullname, filepath = %spec.filepath, "register module");
        write_lock(&self.specs).insert(spec.fullname.clone(), spec);
    }

    pub fn resolve(&self, fullname: &str) -> Option<ModuleSpec> {
        let specs = read_lock(&self.specs);
        specs
            .get(fullname)
            .or_else(|| specs.get(&format!("{fullname}{PACKAGE_INIT_SUFFIX}")))
            .cloned()
    }

    pub fn contains(&self, fullname: &str) -> bool {
        self.resolve(fullname).is_some()
    }

    pub fn unregister(&self, fullname: &str) -> Option<ModuleSpec> {
        write_lock(&self.specs).remove(fullname)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = read_lock(&self.specs).keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        read_lock(&self.specs).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::{ModuleRegistry, ModuleSpec};

    #[test]
    fn resolve_prefers_exact_name() {
        let registry = ModuleRegistry::new();
        registry.register("app", "x = 1", "/virtual/app.lpy");
        registry.register("app.__init__", "x = 2", "/virtual/app/__init__.lpy");
        let spec = registry.resolve("app").expect("spec");
        assert_eq!(spec.content, "x = 1");
    }

    #[test]
    fn resolve_falls_back_to_package_init() {
        let registry = ModuleRegistry::new();
        registry.register("pkg.__init__", "", "/virtual/pkg/__init__.lpy");
        let spec = registry.resolve("pkg").expect("spec");
        assert!(spec.is_package());
        assert_eq!(spec.module_name(), "pkg");
        assert_eq!(spec.search_path(), "/virtual/pkg/");
        assert!(registry.resolve("other").is_none());
    }

    #[test]
    fn register_overwrites_without_validation() {
        let registry = ModuleRegistry::new();
        registry.register("m", "x = 1", "m.lpy");
        registry.register("m", "this is not ( valid", "m.lpy");
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.resolve("m"),
            Some(ModuleSpec::new("m", "this is not ( valid", "m.lpy"))
        );
    }

    #[test]
    fn search_path_without_directory_is_root() {
        let spec = ModuleSpec::new("pkg.__init__", "", "init.lpy");
        assert_eq!(spec.search_path(), "/");
    }
}
