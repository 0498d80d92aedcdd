//! Purpose: Define the public Rust API boundary for lpy.
//! Exports: Protocol envelopes, the execution service, the HTTP client and error types.
//! Role: Surface used by the CLI, the server and integration tests.
//! Invariants: Protocol types live here; the module system stays under `core`.
//! Invariants: Additive-only; internal helpers remain private.

mod message;
mod remote;
mod service;

#[doc(hidden)]
pub use crate::core::error::to_exit_code;
pub use crate::core::error::{Error, ErrorKind};
pub use crate::core::modules::{GLOBAL_NAMESPACE, ModuleSystem};
pub use crate::core::output::CapturedOutput;
pub use message::{Message, MessageType, ModuleCreateMethod, Response, ResponseType};
pub use remote::RemoteClient;
pub use service::{EXECUTION_STACK_BYTES, ExecutionService, Outcome};
