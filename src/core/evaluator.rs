//! Purpose: The injected code-evaluation capability and the context it runs with.
//! Exports: `Evaluator`, `ExecContext`, `CodeSummary`, `ImportRecord`, `MAX_CALL_DEPTH`.
//! Role: Seam between the protocol/module core and a concrete language implementation.
//! Invariants: Evaluators receive output sinks and module access only through `ExecContext`.
//! Invariants: `analyze` is side-effect free and returns `None` for unparsable code.
use super::error::{Error, ErrorKind};
use super::modules::ModuleSystem;
use super::namespace::Namespace;
use super::output::{OutputCapture, Stream};
use super::value::Value;

pub const MAX_CALL_DEPTH: usize = 256;

pub trait Evaluator: Send + Sync {
    /// Evaluates `code` as a single expression against `namespace`.
    fn eval_expression(
        &self,
        code: &str,
        namespace: &Namespace,
        ctx: &mut ExecContext<'_>,
    ) -> Result<Value, Error>;

    /// Executes `code` as a sequence of statements against `namespace`.
    fn exec_statements(
        &self,
        code: &str,
        namespace: &Namespace,
        ctx: &mut ExecContext<'_>,
    ) -> Result<(), Error>;

    /// Extracts import statements and top-level bindings without running `code`.
    fn analyze(&self, code: &str) -> Option<CodeSummary>;
}

/// One binding introduced by an import statement.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ImportRecord {
    /// Imported module (`a.b` in `from a.b import x`).
    pub module: String,
    /// Name bound in the importing namespace (`*` for wildcard imports).
    pub definition: String,
    /// `module.symbol` for `from` imports, `None` for plain module imports.
    pub imported_symbol: Option<String>,
    pub is_alias: bool,
    pub is_wildcard: bool,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct CodeSummary {
    pub imports: Vec<ImportRecord>,
    pub top_level_names: Vec<String>,
}

pub struct ExecContext<'a> {
    pub modules: &'a ModuleSystem,
    pub output: &'a OutputCapture,
    depth: usize,
}

impl<'a> ExecContext<'a> {
    pub fn new(modules: &'a ModuleSystem, output: &'a OutputCapture) -> Self {
        Self {
            modules,
            output,
            depth: 0,
        }
    }

    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Runs `f` one call level deeper, failing once `MAX_CALL_DEPTH` is reached.
    pub fn nested<T>(
        &mut self,
        f: impl FnOnce(&mut ExecContext<'a>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        if self.depth >= MAX_CALL_DEPTH {
            return Err(Error::new(ErrorKind::Execution)
                .with_message("maximum recursion depth exceeded"));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    pub fn write(&self, stream: Stream, text: &str) {
        self.output.write(stream, text);
    }

    /// Imports `name` through the module system on behalf of running code.
    pub fn import(&mut self, name: &str) -> Result<Namespace, Error> {
        let modules = self.modules;
        modules.import(name, self)
    }
}

#[cfg(test)]
mod tests {
    use super::{ExecContext, MAX_CALL_DEPTH};
    use crate::core::error::{Error, ErrorKind};
    use crate::core::modules::ModuleSystem;
    use crate::core::output::OutputCapture;
    use crate::script::ScriptEvaluator;
    use std::sync::Arc;

    fn recurse(ctx: &mut ExecContext<'_>) -> Result<(), Error> {
        ctx.nested(recurse)
    }

    #[test]
    fn nested_stops_at_depth_limit() {
        let modules = ModuleSystem::new(Arc::new(ScriptEvaluator::new()));
        let output = OutputCapture::new();
        let mut ctx = ExecContext::new(&modules, &output);
        let err = recurse(&mut ctx).expect_err("depth error");
        assert_eq!(err.kind(), ErrorKind::Execution);
        assert_eq!(ctx.depth(), 0);
        assert!(MAX_CALL_DEPTH > 0);
    }
}
