//! Error types for the playground runtime
//!
//! Every concern gets its own thiserror enum. None of these ever cross the
//! execution session boundary as faults: the session folds them into an
//! [`ExecutionResult`](super::session::ExecutionResult).

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::interpreter::ProgramError;

/// Interpreter runtime failed to initialize.
///
/// Cloneable because one load outcome fans out to every caller that joined
/// the in-flight load.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LoadError {
    /// The backend could not bring the interpreter up
    #[error("interpreter load failed ({backend}): {reason}")]
    InterpreterLoadFailed {
        /// Backend name
        backend: String,
        /// Human-readable cause
        reason: String,
    },
}

impl LoadError {
    /// Build an `InterpreterLoadFailed` for a backend
    pub fn failed(backend: impl Into<String>, reason: impl Into<String>) -> Self {
        LoadError::InterpreterLoadFailed {
            backend: backend.into(),
            reason: reason.into(),
        }
    }
}

/// The learner's program raised an exception or failed to parse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{description}")]
pub struct ProgramFault {
    /// Rendered exception or traceback
    pub description: String,
}

impl ProgramFault {
    /// Wrap a rendered fault description
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
        }
    }
}

impl From<ProgramError> for ProgramFault {
    fn from(err: ProgramError) -> Self {
        Self::new(err.to_string())
    }
}

/// Output channel could not be bound or unbound
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BindingError {
    /// Tried to bind a buffer that was already sealed
    #[error("output buffer is already sealed")]
    SealedBuffer,

    /// On release the channel was bound to a different sink than ours
    #[error("output channel was rebound during execution")]
    Rebound,
}

/// Clipboard write failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClipboardError {
    /// No clipboard is attached to the surface
    #[error("no clipboard available")]
    Unavailable,

    /// The host clipboard rejected the write
    #[error("clipboard write rejected: {0}")]
    Rejected(String),
}

/// Configuration loading or saving failed
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Filesystem error
    #[error("config io error at {path:?}: {source}")]
    Io {
        /// File involved
        path: PathBuf,
        /// Underlying error
        source: io::Error,
    },

    /// Malformed JSON
    #[error("invalid config json: {0}")]
    Json(#[from] serde_json::Error),

    /// Environment override could not be parsed
    #[error("invalid value {value:?} for {var}")]
    InvalidEnv {
        /// Variable name
        var: &'static str,
        /// Offending value
        value: String,
    },
}

/// Convenience result alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
