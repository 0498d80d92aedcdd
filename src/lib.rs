//! Purpose: Shared library crate used by the `lpy` CLI and tests.
//! Exports: `core` (module system), `script` (embedded language), `api` (protocol surface).
//! Role: Backs the `lpy` binary; embedders can host `ExecutionService` with their own evaluator.
//! Invariants: `core` takes its `Evaluator` by injection; only its tests name `script`.
//! Invariants: Core modules prefer explicit inputs/outputs over hidden state.
pub mod api;
pub mod core;
pub mod script;
