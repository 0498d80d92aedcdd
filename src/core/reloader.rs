//! Purpose: Track import dependencies between live modules and propagate re-executed bindings.
//! Exports: `ModuleReloader`, `ModuleInfo`.
//! Role: Hot reload: after code is re-run in a module, dependents see the new definitions.
//! Invariants: `imported_by` edges are recorded for every module named by an import.
//! Invariants: Dependent discovery is transitive; binding updates touch direct dependents only.
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::SystemTime;

use super::evaluator::{CodeSummary, ImportRecord};
use super::namespace::NamespaceRegistry;
use super::value::Value;

#[derive(Clone, Debug)]
pub struct ModuleInfo {
    pub name: String,
    pub imports: Vec<ImportRecord>,
    pub imported_by: BTreeSet<String>,
    pub last_modified: SystemTime,
    pub top_level_names: BTreeSet<String>,
}

impl ModuleInfo {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            imports: Vec::new(),
            imported_by: BTreeSet::new(),
            last_modified: SystemTime::now(),
            top_level_names: BTreeSet::new(),
        }
    }
}

#[derive(Debug, Default)]
pub struct ModuleReloader {
    modules: HashMap<String, ModuleInfo>,
    stale_modules: BTreeSet<String>,
}

impl ModuleReloader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_module(&mut self, name: &str) -> &mut ModuleInfo {
        self.modules
            .entry(name.to_string())
            .or_insert_with(|| ModuleInfo::new(name))
    }

    pub fn module(&self, name: &str) -> Option<&ModuleInfo> {
        self.modules.get(name)
    }

    /// Records a run of code in `name` and returns the modules that depend on it.
    pub fn track_module_execution(&mut self, name: &str, summary: CodeSummary) -> BTreeSet<String> {
        let imported: BTreeSet<String> = summary
            .imports
            .iter()
            .map(|record| record.module.clone())
            .collect();

        let info = self.register_module(name);
        info.imports = summary.imports;
        info.top_level_names = summary.top_level_names.into_iter().collect();
        info.last_modified = SystemTime::now();

        for module in imported {
            if module != name {
                self.register_module(&module)
                    .imported_by
                    .insert(name.to_string());
            }
        }

        let affected = self.find_dependent_modules(name);
        self.stale_modules.extend(affected.iter().cloned());
        affected
    }

    pub fn find_dependent_modules(&self, name: &str) -> BTreeSet<String> {
        let Some(info) = self.modules.get(name) else {
            return BTreeSet::new();
        };
        let mut dependent: BTreeSet<String> = info.imported_by.clone();
        let mut to_check: Vec<String> = dependent.iter().cloned().collect();
        let mut checked: BTreeSet<String> = BTreeSet::from([name.to_string()]);

        while let Some(checking) = to_check.pop() {
            if !checked.insert(checking.clone()) {
                continue;
            }
            if let Some(info) = self.modules.get(&checking) {
                for dep in &info.imported_by {
                    if !checked.contains(dep) && dependent.insert(dep.clone()) {
                        to_check.push(dep.clone());
                    }
                }
            }
        }
        dependent.remove(name);
        dependent
    }

    /// Rebinds names imported from `source` in each direct dependent.
    ///
    /// Returns `{dependent: [updated names]}` for dependents that changed.
    pub fn update_dependent_modules(
        &self,
        source: &str,
        cache: &NamespaceRegistry,
    ) -> BTreeMap<String, Vec<String>> {
        let mut updates = BTreeMap::new();
        let (Some(source_ns), Some(source_info)) = (cache.get(source), self.modules.get(source))
        else {
            return updates;
        };

        for dependent_name in &source_info.imported_by {
            let (Some(dependent_ns), Some(dependent_info)) =
                (cache.get(dependent_name), self.modules.get(dependent_name))
            else {
                continue;
            };

            let mut updated = Vec::new();
            for record in dependent_info
                .imports
                .iter()
                .filter(|record| record.module == source)
            {
                if record.is_wildcard {
                    for name in &source_info.top_level_names {
                        if let Some(value) = source_ns.get(name) {
                            dependent_ns.set(name.clone(), value);
                            updated.push(name.clone());
                        }
                    }
                } else if let Some(symbol) = &record.imported_symbol {
                    let actual = symbol.rsplit('.').next().unwrap_or(symbol);
                    if let Some(value) = source_ns.get(actual) {
                        dependent_ns.set(record.definition.clone(), value);
                        updated.push(record.definition.clone());
                    }
                } else if !record.definition.contains('.') {
                    dependent_ns.set(record.definition.clone(), Value::Module(source_ns.clone()));
                    updated.push(record.definition.clone());
                }
            }

            if !updated.is_empty() {
                tracing::debug!(module = %dependent_name, source = %source, names = ?updated, "hot reload rebind");
                updates.insert(dependent_name.clone(), updated);
            }
        }
        updates
    }

    pub fn stale_modules(&self) -> &BTreeSet<String> {
        &self.stale_modules
    }

    pub fn clear_stale_modules(&mut self) {
        self.stale_modules.clear();
    }

    pub fn get_import_info(&self, name: &str) -> &[ImportRecord] {
        self.modules
            .get(name)
            .map(|info| info.imports.as_slice())
            .unwrap_or(&[])
    }
}
