//! Purpose: Execute one protocol `Message` against the shared module system.
//! Exports: `ExecutionService`, `Outcome`, `EXECUTION_STACK_BYTES`.
//! Role: Transport-independent core of `/execute`; the HTTP server and tests drive it directly.
//! Invariants: Every request gets its own `OutputCapture`; captured text survives failures.
//! Invariants: Resolution, execution and protocol failures become `type=error`, never panics.
//! Invariants: `status` and `quit` never look at `code`.
//! Invariants: `execute` needs a thread with `EXECUTION_STACK_BYTES` of stack.
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde_json::{Value as Json, json};

use super::message::{Message, MessageType, ModuleCreateMethod, Response};
use crate::core::error::{Error, ErrorKind};
use crate::core::evaluator::{Evaluator, ExecContext};
use crate::core::modules::ModuleSystem;
use crate::core::namespace::Namespace;
use crate::core::output::OutputCapture;
use crate::core::reloader::ModuleReloader;

/// Response plus whether the hosting process should exit once it is delivered.
#[derive(Clone, Debug)]
pub struct Outcome {
    pub response: Response,
    pub quit: bool,
}

struct Completed {
    value: Json,
    updated_modules: BTreeMap<String, Vec<String>>,
    quit: bool,
}

impl Completed {
    fn value(value: Json) -> Self {
        Self {
            value,
            updated_modules: BTreeMap::new(),
            quit: false,
        }
    }
}

/// Stack size for threads that call `ExecutionService::execute`.
///
/// Covers `MAX_CALL_DEPTH` nested script calls in debug builds. A default 2 MiB
/// thread can overflow before the recursion limit is reported as an error.
pub const EXECUTION_STACK_BYTES: usize = 64 * 1024 * 1024;

/// Runs protocol messages against one shared module system.
///
/// Call `execute` from a thread built with [`EXECUTION_STACK_BYTES`] of stack
/// (`std::thread::Builder::stack_size` or tokio's `thread_stack_size`).
pub struct ExecutionService {
    modules: ModuleSystem,
    reloader: Mutex<ModuleReloader>,
}

impl ExecutionService {
    pub fn new(modules: ModuleSystem) -> Self {
        Self {
            modules,
            reloader: Mutex::new(ModuleReloader::new()),
        }
    }

    pub fn with_evaluator(evaluator: Arc<dyn Evaluator>) -> Self {
        Self::new(ModuleSystem::new(evaluator))
    }

    pub fn modules(&self) -> &ModuleSystem {
        &self.modules
    }

    pub fn reloader(&self) -> MutexGuard<'_, ModuleReloader> {
        self.reloader
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    pub fn execute(&self, message: &Message) -> Outcome {
        tracing::debug!(
            kind = %message.kind,
            module = message.module.as_deref().unwrap_or(""),
            "execute message"
        );
        let output = OutputCapture::new();
        match self.run(message, &output) {
            Ok(completed) => Outcome {
                response: Response::result(completed.value, output.finish())
                    .with_updated_modules(completed.updated_modules),
                quit: completed.quit,
            },
            Err(err) => {
                tracing::debug!(error = %err, "execution failed");
                output.write_stderr(&format!("{err}\n"));
                Outcome {
                    response: Response::error(err.description(), output.finish()),
                    quit: false,
                }
            }
        }
    }

    fn run(&self, message: &Message, output: &OutputCapture) -> Result<Completed, Error> {
        let mut ctx = ExecContext::new(&self.modules, output);
        let namespace = self.resolve_namespace(message, &mut ctx)?;
        let evaluator = self.modules.evaluator().clone();

        match message.message_type() {
            Some(MessageType::Eval) => {
                let code = require_code(message)?;
                let value = evaluator.eval_expression(code, &namespace, &mut ctx)?;
                Ok(Completed::value(value.to_json()))
            }
            Some(MessageType::Exec) => {
                let code = require_code(message)?;
                evaluator.exec_statements(code, &namespace, &mut ctx)?;
                let mut completed = Completed::value(Json::Null);
                if let Some(module) = message.module.as_deref() {
                    completed.updated_modules = self.propagate_reload(module, code);
                }
                Ok(completed)
            }
            Some(MessageType::Status) => Ok(Completed::value(json!({"alive": true}))),
            Some(MessageType::Quit) => Ok(Completed {
                quit: true,
                ..Completed::value(Json::Null)
            }),
            None => Err(Error::new(ErrorKind::Protocol)
                .with_message(format!("Unknown type: {}", message.kind))),
        }
    }

    fn resolve_namespace(
        &self,
        message: &Message,
        ctx: &mut ExecContext<'_>,
    ) -> Result<Namespace, Error> {
        let Some(name) = message.module.as_deref() else {
            return Ok(self.modules.global().clone());
        };
        if let Some(namespace) = self.modules.lookup(name) {
            return Ok(namespace);
        }

        let raw = message
            .module_create_method
            .as_deref()
            .unwrap_or(ModuleCreateMethod::default().as_str());
        match ModuleCreateMethod::parse(raw) {
            Some(ModuleCreateMethod::Create) => Ok(self.modules.create(name)),
            Some(ModuleCreateMethod::Import) => ctx.import(name),
            Some(ModuleCreateMethod::ImportOrCreate) => {
                if self.modules.can_resolve(name) {
                    ctx.import(name)
                } else {
                    Ok(self.modules.create(name))
                }
            }
            None => Err(Error::new(ErrorKind::Resolution)
                .with_message(format!("unknown module-create-method: {raw}"))
                .with_hint("Use one of: create, import, import_or_create.")),
        }
    }

    /// Records the executed code's imports and rebinds dependents of `module`.
    fn propagate_reload(&self, module: &str, code: &str) -> BTreeMap<String, Vec<String>> {
        let Some(summary) = self.modules.evaluator().analyze(code) else {
            tracing::warn!(module = %module, "skipping reload tracking: code could not be analyzed");
            return BTreeMap::new();
        };
        let mut reloader = self.reloader();
        let affected = reloader.track_module_execution(module, summary);
        let updates = reloader.update_dependent_modules(module, self.modules.cache());
        if !affected.is_empty() {
            tracing::debug!(module = %module, affected = ?affected, "dependents marked stale");
        }
        updates
    }
}

fn require_code(message: &Message) -> Result<&str, Error> {
    message.code.as_deref().ok_or_else(|| {
        Error::new(ErrorKind::Protocol).with_message(format!("missing code for {}", message.kind))
    })
}
