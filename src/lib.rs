//! Pyground – run learner Python code from editor surfaces
//!
//! This crate implements the code-execution core of an interactive Python
//! course:
//! - A built-in interpreter for the subset of Python taught in lessons
//! - An optional CPython backend hosted as a child process
//! - A process-wide interpreter loader that loads once and fans out the result
//! - Execution sessions that capture output per run and never throw
//! - Editor surfaces with run, reset, copy and tab indentation
//! - Progress plumbing that marks practice tasks completed

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

/// Interpreter for the Python subset
pub mod interpreter;

/// Execution runtime: loader, sessions, surfaces
pub mod runtime;

// Re-export key types for convenience
pub use runtime::{EditorSurface, ExecutionResult, Playground, RuntimeConfig};

/// Current version of pyground
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
