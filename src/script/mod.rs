//! Purpose: lpy script, the embedded language executed by the service.
//! Exports: `ScriptEvaluator`.
//! Role: Concrete `Evaluator` plugged into `ModuleSystem`; owns parsing, execution and analysis.
//! Invariants: Syntax and runtime failures surface as `ErrorKind::Execution` with a line.
//! Invariants: Analysis never executes code.
mod ast;
mod builtins;
mod interp;
mod lexer;
mod ops;
mod parser;

use crate::core::error::{Error, ErrorKind};
use crate::core::evaluator::{CodeSummary, Evaluator, ExecContext, ImportRecord};
use crate::core::namespace::Namespace;
use crate::core::value::Value;

use ast::{Stmt, StmtKind};
use interp::Frame;

pub(crate) fn syntax_error(line: usize, message: impl AsRef<str>) -> Error {
    Error::new(ErrorKind::Execution)
        .with_message(format!("invalid syntax: {}", message.as_ref()))
        .with_line(line)
}

pub(crate) fn runtime_error(message: impl Into<String>) -> Error {
    Error::new(ErrorKind::Execution).with_message(message)
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ScriptEvaluator;

impl ScriptEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl Evaluator for ScriptEvaluator {
    fn eval_expression(
        &self,
        code: &str,
        namespace: &Namespace,
        ctx: &mut ExecContext<'_>,
    ) -> Result<Value, Error> {
        let expr =
            parser::parse_expression(code).map_err(|err| err.with_module(namespace.name()))?;
        Frame::module(namespace.clone())
            .eval(&expr, ctx)
            .map_err(|err| err.with_line(expr.line).with_module(namespace.name()))
    }

    fn exec_statements(
        &self,
        code: &str,
        namespace: &Namespace,
        ctx: &mut ExecContext<'_>,
    ) -> Result<(), Error> {
        let program =
            parser::parse_program(code).map_err(|err| err.with_module(namespace.name()))?;
        Frame::module(namespace.clone()).run_module(&program, ctx)
    }

    fn analyze(&self, code: &str) -> Option<CodeSummary> {
        let program = parser::parse_program(code).ok()?;
        Some(summarize(&program))
    }
}

fn summarize(program: &[Stmt]) -> CodeSummary {
    let mut summary = CodeSummary::default();
    collect_imports(program, &mut summary.imports);

    let mut push = |name: &str| {
        if !summary.top_level_names.iter().any(|seen| seen == name) {
            summary.top_level_names.push(name.to_string());
        }
    };
    for stmt in program {
        match &stmt.kind {
            StmtKind::Assign { target, .. } | StmtKind::AugAssign { target, .. } => {
                if let ast::ExprKind::Name(name) = &target.kind {
                    push(name);
                }
            }
            StmtKind::Function(def) => {
                if let Some(name) = &def.name {
                    push(name);
                }
            }
            StmtKind::Import { module, alias } => {
                let head = module.split_once('.').map_or(module.as_str(), |(head, _)| head);
                push(alias.as_deref().unwrap_or(head));
            }
            StmtKind::FromImport { names, .. } => {
                for item in names {
                    push(item.alias.as_deref().unwrap_or(&item.name));
                }
            }
            StmtKind::For { binding, .. } => push(binding),
            _ => {}
        }
    }
    summary
}

fn collect_imports(stmts: &[Stmt], out: &mut Vec<ImportRecord>) {
    for stmt in stmts {
        match &stmt.kind {
            StmtKind::Import { module, alias } => out.push(ImportRecord {
                module: module.clone(),
                definition: alias.clone().unwrap_or_else(|| module.clone()),
                imported_symbol: None,
                is_alias: alias.is_some(),
                is_wildcard: false,
            }),
            StmtKind::FromImport { module, names } => {
                for item in names {
                    out.push(ImportRecord {
                        module: module.clone(),
                        definition: item.alias.clone().unwrap_or_else(|| item.name.clone()),
                        imported_symbol: Some(format!("{module}.{}", item.name)),
                        is_alias: item.alias.is_some(),
                        is_wildcard: false,
                    });
                }
            }
            StmtKind::FromImportAll { module } => out.push(ImportRecord {
                module: module.clone(),
                definition: "*".to_string(),
                imported_symbol: None,
                is_alias: false,
                is_wildcard: true,
            }),
            StmtKind::Function(def) => collect_imports(&def.body, out),
            StmtKind::If {
                branches,
                otherwise,
            } => {
                for (_, body) in branches {
                    collect_imports(body, out);
                }
                if let Some(body) = otherwise {
                    collect_imports(body, out);
                }
            }
            StmtKind::While { body, .. } | StmtKind::For { body, .. } => {
                collect_imports(body, out)
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ScriptEvaluator;
    use crate::core::evaluator::Evaluator;

    #[test]
    fn analyze_reports_imports_and_top_level_names() {
        let summary = ScriptEvaluator::new()
            .analyze(
                "import pkg.util\nimport data as d\nfrom lib import helper as h, other\nfrom star import *\n\
                 fn run() {\n  import inner\n}\ncount = 1\ncount += 1",
            )
            .expect("parsable");

        let modules: Vec<&str> = summary
            .imports
            .iter()
            .map(|record| record.module.as_str())
            .collect();
        assert_eq!(modules, vec!["pkg.util", "data", "lib", "lib", "star", "inner"]);

        let helper = &summary.imports[2];
        assert_eq!(helper.definition, "h");
        assert_eq!(helper.imported_symbol.as_deref(), Some("lib.helper"));
        assert!(helper.is_alias);
        assert_eq!(summary.imports[0].definition, "pkg.util");
        assert!(summary.imports[4].is_wildcard);

        assert_eq!(
            summary.top_level_names,
            vec!["pkg", "d", "h", "other", "run", "count"]
        );
    }

    #[test]
    fn analyze_returns_none_for_invalid_code() {
        assert!(ScriptEvaluator::new().analyze("fn (").is_none());
    }
}
