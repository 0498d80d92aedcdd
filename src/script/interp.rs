//! Purpose: Tree-walking execution of lpy script against module namespaces.
//! Exports: `Frame`.
//! Role: Runs parsed statements for `ScriptEvaluator`; user functions live here too.
//! Invariants: Module-level code binds into its namespace; function bodies bind into a fresh scope.
//! Invariants: Errors are tagged with the innermost statement line and the module that ran it.
//! Invariants: Every user-function call goes through `ExecContext::nested` (bounded recursion).
use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use indexmap::IndexMap;

use super::ast::{Expr, ExprKind, FunctionDef, Literal, LogicalOp, Stmt, StmtKind, UnaryOp};
use super::{builtins, ops, runtime_error};
use crate::core::error::Error;
use crate::core::evaluator::ExecContext;
use crate::core::namespace::Namespace;
use crate::core::value::{Callable, Value, read_lock, write_lock};

/// Local variables of one function activation, chained to the defining scope.
struct Scope {
    vars: RwLock<IndexMap<String, Value>>,
    parent: Option<Arc<Scope>>,
}

impl Scope {
    fn new(parent: Option<Arc<Scope>>) -> Arc<Self> {
        Arc::new(Self {
            vars: RwLock::new(IndexMap::new()),
            parent,
        })
    }

    fn lookup(&self, name: &str) -> Option<Value> {
        if let Some(value) = read_lock(&self.vars).get(name) {
            return Some(value.clone());
        }
        self.parent.as_ref().and_then(|parent| parent.lookup(name))
    }

    fn set(&self, name: &str, value: Value) {
        write_lock(&self.vars).insert(name.to_string(), value);
    }
}

enum Flow {
    Normal,
    Return(Value),
    Break,
    Continue,
}

struct UserFunction {
    name: String,
    def: Arc<FunctionDef>,
    defaults: Vec<Option<Value>>,
    globals: Namespace,
    closure: Option<Arc<Scope>>,
}

impl Callable for UserFunction {
    fn name(&self) -> &str {
        &self.name
    }

    fn call(&self, args: Vec<Value>, ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
        let params = &self.def.params;
        if args.len() > params.len() {
            return Err(runtime_error(format!(
                "{}() takes {} positional argument(s) but {} were given",
                self.name,
                params.len(),
                args.len()
            )));
        }
        let scope = Scope::new(self.closure.clone());
        let mut args = args.into_iter();
        for (param, default) in params.iter().zip(&self.defaults) {
            let value = match (args.next(), default) {
                (Some(value), _) => value,
                (None, Some(default)) => default.clone(),
                (None, None) => {
                    return Err(runtime_error(format!(
                        "{}() missing required argument: '{}'",
                        self.name, param.name
                    )));
                }
            };
            scope.set(&param.name, value);
        }

        ctx.nested(|ctx| {
            let mut frame = Frame {
                globals: self.globals.clone(),
                locals: Some(scope),
                declared_globals: HashSet::new(),
            };
            match frame.exec_block(&self.def.body, ctx)? {
                Flow::Return(value) => Ok(value),
                Flow::Normal => Ok(Value::None),
                Flow::Break | Flow::Continue => Err(runtime_error("'break' or 'continue' outside loop")
                    .with_line(self.def.line)),
            }
        })
    }
}

pub(crate) struct Frame {
    globals: Namespace,
    locals: Option<Arc<Scope>>,
    declared_globals: HashSet<String>,
}

impl Frame {
    /// Frame for module-level code: every binding lands in `globals`.
    pub(crate) fn module(globals: Namespace) -> Self {
        Self {
            globals,
            locals: None,
            declared_globals: HashSet::new(),
        }
    }

    pub(crate) fn run_module(&mut self, program: &[Stmt], ctx: &mut ExecContext<'_>) -> Result<(), Error> {
        match self.exec_block(program, ctx)? {
            Flow::Normal => Ok(()),
            Flow::Return(_) => Err(self.tag(runtime_error("'return' outside function"), program)),
            Flow::Break | Flow::Continue => {
                Err(self.tag(runtime_error("'break' or 'continue' outside loop"), program))
            }
        }
    }

    fn tag(&self, err: Error, program: &[Stmt]) -> Error {
        let err = match program.last() {
            Some(stmt) => err.with_line(stmt.line),
            None => err,
        };
        err.with_module(self.globals.name())
    }

    fn exec_block(&mut self, stmts: &[Stmt], ctx: &mut ExecContext<'_>) -> Result<Flow, Error> {
        for stmt in stmts {
            let flow = self
                .exec_stmt(stmt, ctx)
                .map_err(|err| err.with_line(stmt.line).with_module(self.globals.name()))?;
            if !matches!(flow, Flow::Normal) {
                return Ok(flow);
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, ctx: &mut ExecContext<'_>) -> Result<Flow, Error> {
        match &stmt.kind {
            StmtKind::Expr(expr) => {
                self.eval(expr, ctx)?;
            }
            StmtKind::Assign { target, value } => {
                let value = self.eval(value, ctx)?;
                self.assign(target, value, ctx)?;
            }
            StmtKind::AugAssign { target, op, value } => {
                let current = self.eval(target, ctx)?;
                let rhs = self.eval(value, ctx)?;
                let updated = ops::binary(*op, &current, &rhs)?;
                self.assign(target, updated, ctx)?;
            }
            StmtKind::Import { module, alias } => {
                let namespace = ctx.import(module)?;
                match alias {
                    Some(alias) => self.bind(alias, Value::Module(namespace)),
                    None => match module.split_once('.') {
                        Some((head, _)) => {
                            let top = ctx.import(head)?;
                            self.bind(head, Value::Module(top));
                        }
                        None => self.bind(module, Value::Module(namespace)),
                    },
                }
            }
            StmtKind::FromImport { module, names } => {
                let namespace = ctx.import(module)?;
                for item in names {
                    let value = match namespace.get(&item.name) {
                        Some(value) => value,
                        None => {
                            let submodule = format!("{module}.{}", item.name);
                            if !ctx.modules.can_resolve(&submodule) {
                                return Err(runtime_error(format!(
                                    "cannot import name '{}' from '{module}'",
                                    item.name
                                )));
                            }
                            Value::Module(ctx.import(&submodule)?)
                        }
                    };
                    self.bind(item.alias.as_deref().unwrap_or(&item.name), value);
                }
            }
            StmtKind::FromImportAll { module } => {
                let namespace = ctx.import(module)?;
                for name in namespace.public_names() {
                    if name.starts_with('_') {
                        continue;
                    }
                    if let Some(value) = namespace.get(&name) {
                        self.bind(&name, value);
                    }
                }
            }
            StmtKind::Function(def) => {
                let function = self.make_function(def, ctx)?;
                let name = def.name.as_deref().unwrap_or("<anonymous>");
                self.bind(name, function);
            }
            StmtKind::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if self.eval(condition, ctx)?.is_truthy() {
                        return self.exec_block(body, ctx);
                    }
                }
                if let Some(body) = otherwise {
                    return self.exec_block(body, ctx);
                }
            }
            StmtKind::While { condition, body } => {
                while self.eval(condition, ctx)?.is_truthy() {
                    match self.exec_block(body, ctx)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }
            StmtKind::For {
                binding,
                iterable,
                body,
            } => {
                let items = ops::iterate(&self.eval(iterable, ctx)?)?;
                for item in items {
                    self.bind(binding, item);
                    match self.exec_block(body, ctx)? {
                        Flow::Break => break,
                        Flow::Normal | Flow::Continue => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, ctx)?,
                    None => Value::None,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Break => return Ok(Flow::Break),
            StmtKind::Continue => return Ok(Flow::Continue),
            StmtKind::Pass => {}
            StmtKind::Global(names) => {
                self.declared_globals.extend(names.iter().cloned());
            }
            StmtKind::Raise(expr) => {
                let value = self.eval(expr, ctx)?;
                return Err(runtime_error(value.to_string()));
            }
        }
        Ok(Flow::Normal)
    }

    fn is_local(&self, name: &str) -> bool {
        self.locals.is_some() && !self.declared_globals.contains(name)
    }

    fn bind(&self, name: &str, value: Value) {
        match &self.locals {
            Some(locals) if self.is_local(name) => locals.set(name, value),
            _ => self.globals.set(name, value),
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, Error> {
        if let Some(locals) = &self.locals {
            if self.is_local(name) {
                if let Some(value) = locals.lookup(name) {
                    return Ok(value);
                }
            }
        }
        self.globals
            .get(name)
            .or_else(|| builtins::lookup(name))
            .ok_or_else(|| runtime_error(format!("name '{name}' is not defined")))
    }

    fn assign(&mut self, target: &Expr, value: Value, ctx: &mut ExecContext<'_>) -> Result<(), Error> {
        match &target.kind {
            ExprKind::Name(name) => {
                self.bind(name, value);
                Ok(())
            }
            ExprKind::Attribute { target, name } => match self.eval(target, ctx)? {
                Value::Module(namespace) => {
                    namespace.set(name.clone(), value);
                    Ok(())
                }
                other => Err(runtime_error(format!(
                    "cannot set attribute '{name}' on '{}' object",
                    other.type_name()
                ))),
            },
            ExprKind::Index { target, index } => {
                let container = self.eval(target, ctx)?;
                let index = self.eval(index, ctx)?;
                ops::set_index(&container, &index, value)
            }
            _ => Err(runtime_error("cannot assign to expression")),
        }
    }

    fn make_function(
        &mut self,
        def: &Arc<FunctionDef>,
        ctx: &mut ExecContext<'_>,
    ) -> Result<Value, Error> {
        let mut defaults = Vec::with_capacity(def.params.len());
        for param in &def.params {
            defaults.push(match &param.default {
                Some(expr) => Some(self.eval(expr, ctx)?),
                None => None,
            });
        }
        Ok(Value::function(UserFunction {
            name: def.name.clone().unwrap_or_else(|| "<anonymous>".to_string()),
            def: def.clone(),
            defaults,
            globals: self.globals.clone(),
            closure: self.locals.clone(),
        }))
    }

    pub(crate) fn eval(&mut self, expr: &Expr, ctx: &mut ExecContext<'_>) -> Result<Value, Error> {
        match &expr.kind {
            ExprKind::Literal(literal) => Ok(match literal {
                Literal::Int(n) => Value::Int(*n),
                Literal::Float(f) => Value::Float(*f),
                Literal::Bool(b) => Value::Bool(*b),
                Literal::Str(s) => Value::Str(s.clone()),
                Literal::None => Value::None,
            }),
            ExprKind::Name(name) => self.lookup(name),
            ExprKind::Binary { op, left, right } => {
                let left = self.eval(left, ctx)?;
                let right = self.eval(right, ctx)?;
                ops::binary(*op, &left, &right)
            }
            ExprKind::Logical { op, left, right } => {
                let left = self.eval(left, ctx)?;
                match (op, left.is_truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval(right, ctx),
                }
            }
            ExprKind::Unary { op, expr } => {
                let value = self.eval(expr, ctx)?;
                match (op, value) {
                    (UnaryOp::Not, value) => Ok(Value::Bool(!value.is_truthy())),
                    (UnaryOp::Negate, Value::Int(n)) => n
                        .checked_neg()
                        .map(Value::Int)
                        .ok_or_else(|| runtime_error("integer overflow")),
                    (UnaryOp::Negate, Value::Bool(b)) => Ok(Value::Int(-i64::from(b))),
                    (UnaryOp::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
                    (UnaryOp::Negate, other) => Err(runtime_error(format!(
                        "bad operand type for unary -: '{}'",
                        other.type_name()
                    ))),
                }
            }
            ExprKind::Call { callee, args } => {
                let callee = self.eval(callee, ctx)?;
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg, ctx)?);
                }
                match callee {
                    Value::Function(function) => function.call(values, ctx),
                    other => Err(runtime_error(format!(
                        "'{}' object is not callable",
                        other.type_name()
                    ))),
                }
            }
            ExprKind::Attribute { target, name } => {
                let target = self.eval(target, ctx)?;
                match &target {
                    Value::Module(namespace) => namespace.get(name).ok_or_else(|| {
                        runtime_error(format!(
                            "module '{}' has no attribute '{name}'",
                            namespace.name()
                        ))
                    }),
                    other => builtins::method(other, name).ok_or_else(|| {
                        runtime_error(format!(
                            "'{}' object has no attribute '{name}'",
                            other.type_name()
                        ))
                    }),
                }
            }
            ExprKind::Index { target, index } => {
                let target = self.eval(target, ctx)?;
                let index = self.eval(index, ctx)?;
                ops::get_index(&target, &index)
            }
            ExprKind::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, ctx)?);
                }
                Ok(Value::list(values))
            }
            ExprKind::Dict(entries) => {
                let mut map = IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    let key = match self.eval(key, ctx)? {
                        Value::Str(key) => key,
                        other => {
                            return Err(runtime_error(format!(
                                "dict keys must be str, not {}",
                                other.type_name()
                            )));
                        }
                    };
                    let value = self.eval(value, ctx)?;
                    map.insert(key, value);
                }
                Ok(Value::dict(map))
            }
            ExprKind::Function(def) => self.make_function(def, ctx),
        }
    }
}
