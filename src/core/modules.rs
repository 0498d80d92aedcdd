//! Purpose: Own the module cache, global namespace, registry, resolver chain and evaluator.
//! Exports: `ModuleSystem`, `GLOBAL_NAMESPACE`.
//! Role: Implements import/create/load on top of explicit state instead of process globals.
//! Invariants: A namespace is cached before its source runs (self and cyclic imports see it).
//! Invariants: Load failures leave the partially initialized namespace cached.
//! Invariants: Dotted names import their parents first and are bound on the parent namespace.
use std::path::PathBuf;
use std::sync::Arc;

use super::error::{Error, ErrorKind};
use super::evaluator::{ExecContext, Evaluator};
use super::namespace::{
    FILE_KEY, LOADER_KEY, NAME_KEY, Namespace, NamespaceRegistry, PACKAGE_KEY, PATH_KEY,
};
use super::registry::{ModuleRegistry, ModuleSpec};
use super::resolver::{FileResolver, RegistryResolver, ResolverChain};
use super::value::Value;

pub const GLOBAL_NAMESPACE: &str = "__main__";

pub struct ModuleSystem {
    evaluator: Arc<dyn Evaluator>,
    registry: Arc<ModuleRegistry>,
    cache: NamespaceRegistry,
    global: Namespace,
    resolvers: ResolverChain,
}

impl ModuleSystem {
    pub fn new(evaluator: Arc<dyn Evaluator>) -> Self {
        Self::with_search_paths(evaluator, Vec::new())
    }

    /// Builds the chain `[file resolver over roots, registry resolver]`.
    pub fn with_search_paths(evaluator: Arc<dyn Evaluator>, roots: Vec<PathBuf>) -> Self {
        let global = Namespace::new(GLOBAL_NAMESPACE);
        global.set(NAME_KEY, Value::str(GLOBAL_NAMESPACE));
        let system = Self {
            evaluator,
            registry: Arc::new(ModuleRegistry::new()),
            cache: NamespaceRegistry::new(),
            global,
            resolvers: ResolverChain::new(),
        };
        system
            .resolvers
            .install(Arc::new(FileResolver::new(roots)));
        system.install_registry_hook();
        system
    }

    /// (Re)installs the registry-backed resolver at the end of the chain.
    pub fn install_registry_hook(&self) {
        self.resolvers
            .install(Arc::new(RegistryResolver::new(self.registry.clone())));
    }

    pub fn evaluator(&self) -> &Arc<dyn Evaluator> {
        &self.evaluator
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn cache(&self) -> &NamespaceRegistry {
        &self.cache
    }

    pub fn resolvers(&self) -> &ResolverChain {
        &self.resolvers
    }

    pub fn global(&self) -> &Namespace {
        &self.global
    }

    pub fn lookup(&self, name: &str) -> Option<Namespace> {
        self.cache.get(name)
    }

    /// Returns the cached namespace for `name` or atomically creates an empty one.
    pub fn create(&self, name: &str) -> Namespace {
        let (namespace, created) = self.cache.get_or_create(name);
        if created {
            tracing::debug!(module = %name, "created empty module");
        }
        namespace
    }

    /// True when `name` is cached or some resolver can locate its source.
    pub fn can_resolve(&self, name: &str) -> bool {
        self.cache.contains(name) || self.resolvers.find(name).is_some()
    }

    pub fn import(&self, name: &str, ctx: &mut ExecContext<'_>) -> Result<Namespace, Error> {
        if let Some(namespace) = self.cache.get(name) {
            return Ok(namespace);
        }
        validate_module_name(name)?;

        let parent = match name.rsplit_once('.') {
            Some((parent, child)) => Some((self.import(parent, ctx)?, child)),
            None => None,
        };
        // The parent's source may already have imported this module.
        if let Some(namespace) = self.cache.get(name) {
            return Ok(namespace);
        }

        let Some(namespace) = self.resolvers.try_resolve(name, ctx)? else {
            return Err(Error::new(ErrorKind::Resolution)
                .with_message(format!("No module named '{name}'"))
                .with_module(name));
        };
        if let Some((parent, child)) = parent {
            parent.set(child, Value::Module(namespace.clone()));
        }
        Ok(namespace)
    }

    /// Materializes `spec` as module `name`: metadata, cache insert, then execution.
    pub fn load_spec(
        &self,
        name: &str,
        spec: &ModuleSpec,
        loader: &str,
        ctx: &mut ExecContext<'_>,
    ) -> Result<Namespace, Error> {
        let namespace = Namespace::new(name);
        namespace.set(NAME_KEY, Value::str(name));
        namespace.set(LOADER_KEY, Value::str(loader));
        namespace.set(FILE_KEY, Value::str(spec.filepath.clone()));
        if spec.is_package() {
            namespace.set(PACKAGE_KEY, Value::str(name));
            namespace.set(PATH_KEY, Value::list(vec![Value::str(spec.search_path())]));
        } else {
            let package = name.rsplit_once('.').map(|(parent, _)| parent).unwrap_or("");
            namespace.set(PACKAGE_KEY, Value::str(package));
        }

        let namespace = match self.cache.insert_new(namespace) {
            Ok(namespace) => namespace,
            Err(existing) => return Ok(existing),
        };

        tracing::debug!(module = %name, loader = %loader, file = %spec.filepath, "load module");
        let evaluator = self.evaluator.clone();
        ctx.nested(|ctx| evaluator.exec_statements(&spec.content, &namespace, ctx))
            .map_err(|err| err.with_module(name))?;
        Ok(namespace)
    }
}

fn validate_module_name(name: &str) -> Result<(), Error> {
    if name.is_empty() || name.split('.').any(|segment| segment.is_empty()) {
        return Err(Error::new(ErrorKind::Resolution)
            .with_message(format!("invalid module name '{name}'")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::ModuleSystem;
    use crate::core::error::ErrorKind;
    use crate::core::evaluator::ExecContext;
    use crate::core::namespace::{FILE_KEY, LOADER_KEY, PACKAGE_KEY, PATH_KEY};
    use crate::core::output::OutputCapture;
    use crate::core::value::Value;
    use crate::script::ScriptEvaluator;
    use std::sync::Arc;

    fn system() -> ModuleSystem {
        ModuleSystem::new(Arc::new(ScriptEvaluator::new()))
    }

    #[test]
    fn import_runs_registry_source_once() {
        let modules = system();
        modules
            .registry()
            .register("counter", "hits = 1\nprint(\"loaded\")", "/virtual/counter.lpy");
        let output = OutputCapture::new();
        let mut ctx = ExecContext::new(&modules, &output);
        let first = modules.import("counter", &mut ctx).expect("import");
        let second = modules.import("counter", &mut ctx).expect("import again");
        assert!(first.ptr_eq(&second));
        assert_eq!(first.get("hits"), Some(Value::Int(1)));
        assert_eq!(output.finish().stdout, "loaded\n");
    }

    #[test]
    fn package_metadata_is_derived_from_filepath() {
        let modules = system();
        modules
            .registry()
            .register("pkg.__init__", "", "/virtual/pkg/__init__.lpy");
        let output = OutputCapture::new();
        let mut ctx = ExecContext::new(&modules, &output);
        let ns = modules.import("pkg", &mut ctx).expect("import");
        assert_eq!(ns.get(LOADER_KEY), Some(Value::str("registry")));
        assert_eq!(ns.get(FILE_KEY), Some(Value::str("/virtual/pkg/__init__.lpy")));
        assert_eq!(ns.get(PACKAGE_KEY), Some(Value::str("pkg")));
        assert_eq!(
            ns.get(PATH_KEY),
            Some(Value::list(vec![Value::str("/virtual/pkg/")]))
        );
    }

    #[test]
    fn submodules_are_bound_on_their_parent() {
        let modules = system();
        modules.registry().register("pkg.__init__", "", "/v/pkg/__init__.lpy");
        modules.registry().register("pkg.util", "answer = 42", "/v/pkg/util.lpy");
        let output = OutputCapture::new();
        let mut ctx = ExecContext::new(&modules, &output);
        let util = modules.import("pkg.util", &mut ctx).expect("import");
        let pkg = modules.lookup("pkg").expect("parent cached");
        let bound = pkg.get("util").expect("bound");
        assert!(bound.as_module().expect("module").ptr_eq(&util));
        assert_eq!(util.get(PACKAGE_KEY), Some(Value::str("pkg")));
    }

    #[test]
    fn missing_parent_package_fails_resolution() {
        let modules = system();
        modules.registry().register("lonely.child", "x = 1", "/v/lonely/child.lpy");
        let output = OutputCapture::new();
        let mut ctx = ExecContext::new(&modules, &output);
        let err = modules.import("lonely.child", &mut ctx).expect_err("no parent");
        assert_eq!(err.kind(), ErrorKind::Resolution);
        assert_eq!(err.message(), Some("No module named 'lonely'"));
    }

    #[test]
    fn module_can_import_itself_while_loading() {
        let modules = system();
        modules.registry().register(
            "selfref",
            "import selfref\nname_seen = selfref.__name__",
            "/v/selfref.lpy",
        );
        let output = OutputCapture::new();
        let mut ctx = ExecContext::new(&modules, &output);
        let ns = modules.import("selfref", &mut ctx).expect("import");
        assert_eq!(ns.get("name_seen"), Some(Value::str("selfref")));
    }

    #[test]
    fn failed_load_leaves_partial_module_cached() {
        let modules = system();
        modules
            .registry()
            .register("broken", "before = 1\nraise \"boom\"\nafter = 2", "/v/broken.lpy");
        let output = OutputCapture::new();
        let mut ctx = ExecContext::new(&modules, &output);
        let err = modules.import("broken", &mut ctx).expect_err("load fails");
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(err.module(), Some("broken"));
        let partial = modules.lookup("broken").expect("still cached");
        assert_eq!(partial.get("before"), Some(Value::Int(1)));
        assert!(partial.get("after").is_none());
    }

    #[test]
    fn create_is_get_or_create() {
        let modules = system();
        let first = modules.create("scratch");
        let second = modules.create("scratch");
        assert!(first.ptr_eq(&second));
        assert!(modules.can_resolve("scratch"));
        assert!(!modules.can_resolve("nowhere"));
    }

    #[test]
    fn reinstalling_the_hook_keeps_one_instance() {
        let modules = system();
        modules.install_registry_hook();
        modules.install_registry_hook();
        assert_eq!(modules.resolvers().ids(), vec!["file", "registry"]);
    }
}
