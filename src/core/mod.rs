// Core modules implementing the module system, resolution, capture, and error modeling.
pub mod error;
pub mod evaluator;
pub mod modules;
pub mod namespace;
pub mod output;
pub mod registry;
pub mod reloader;
pub mod resolver;
pub mod value;
