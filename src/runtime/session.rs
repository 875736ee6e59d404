//! Execution session: one run, end to end
//!
//! A session waits for the interpreter, binds a fresh capture buffer to its
//! output channel, runs the source, unbinds on every path and folds whatever
//! happened into an [`ExecutionResult`]. Nothing is ever thrown past
//! [`ExecutionSession::execute`]: every failure is a value.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use super::capture::OutputCaptureBuffer;
use super::config::RuntimeConfig;
use super::error::ProgramFault;
use super::loader::InterpreterLoader;

/// Source text captured at the moment "run" was invoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionRequest {
    /// Surface generation the request belongs to
    pub generation: u64,
    /// Program text
    pub source: String,
}

impl ExecutionRequest {
    /// Snapshot `source` for `generation`.
    pub fn new(generation: u64, source: impl Into<String>) -> Self {
        Self {
            generation,
            source: source.into(),
        }
    }
}

/// Why a run failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The interpreter never became ready
    InterpreterUnavailable,
    /// The learner's program raised or failed to parse
    ProgramFault,
    /// The output channel could not be bound or released cleanly
    HostBindingFault,
}

/// Terminal outcome of one [`ExecutionRequest`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ExecutionResult {
    /// Program ran to completion
    Success {
        /// Captured output, or the empty-output sentinel
        output: String,
    },
    /// Program or host failed
    Failure {
        /// Failure classification
        kind: FailureKind,
        /// Readable description
        description: String,
    },
}

impl ExecutionResult {
    /// Build a failure.
    pub fn failure(kind: FailureKind, description: impl Into<String>) -> Self {
        ExecutionResult::Failure {
            kind,
            description: description.into(),
        }
    }

    /// Whether this is a success.
    pub fn is_success(&self) -> bool {
        matches!(self, ExecutionResult::Success { .. })
    }

    /// Output text of a success.
    pub fn output(&self) -> Option<&str> {
        match self {
            ExecutionResult::Success { output } => Some(output),
            ExecutionResult::Failure { .. } => None,
        }
    }

    /// Failure classification, if any.
    pub fn failure_kind(&self) -> Option<FailureKind> {
        match self {
            ExecutionResult::Failure { kind, .. } => Some(*kind),
            ExecutionResult::Success { .. } => None,
        }
    }

    /// Text to display: output as-is, failures behind an `Error: ` marker.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ExecutionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionResult::Success { output } => f.write_str(output),
            ExecutionResult::Failure { description, .. } => write!(f, "Error: {}", description),
        }
    }
}

struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Runs requests for one editor surface, one at a time.
#[derive(Debug)]
pub struct ExecutionSession {
    id: Uuid,
    loader: Arc<InterpreterLoader>,
    in_flight: AtomicBool,
    timeout: Option<Duration>,
    empty_output_message: String,
}

impl ExecutionSession {
    /// Session drawing interpreters from `loader`.
    pub fn new(loader: Arc<InterpreterLoader>, config: &RuntimeConfig) -> Self {
        Self {
            id: Uuid::new_v4(),
            loader,
            in_flight: AtomicBool::new(false),
            timeout: config.timeout(),
            empty_output_message: config.empty_output_message.clone(),
        }
    }

    /// Session identifier used in logs.
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether a call to [`execute`](Self::execute) is outstanding.
    pub fn is_busy(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Execute `request`.
    ///
    /// Returns `None` without doing anything when a previous call on this
    /// session has not settled yet. Otherwise always resolves to a result.
    pub async fn execute(&self, request: &ExecutionRequest) -> Option<ExecutionResult> {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!(session = %self.id, generation = request.generation, "rejecting overlapping execute");
            return None;
        }
        let _in_flight = InFlight(&self.in_flight);
        Some(self.run(request).await)
    }

    async fn run(&self, request: &ExecutionRequest) -> ExecutionResult {
        let interpreter = match self.loader.ensure_ready().await {
            Ok(interpreter) => interpreter,
            Err(err) => {
                return ExecutionResult::failure(
                    FailureKind::InterpreterUnavailable,
                    format!("Python interpreter is unavailable ({})", err),
                );
            }
        };

        let buffer = OutputCaptureBuffer::new();
        let binding = match interpreter.stdout().acquire(Arc::clone(&buffer)).await {
            Ok(binding) => binding,
            Err(err) => return ExecutionResult::failure(FailureKind::HostBindingFault, err.to_string()),
        };
        debug!(
            session = %self.id,
            generation = request.generation,
            backend = interpreter.name(),
            "executing program"
        );

        let run = interpreter.run(&request.source);
        let outcome = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => Err(ProgramFault::new(format!(
                    "TimeoutError: execution exceeded {} ms",
                    limit.as_millis()
                ))),
            },
            None => run.await,
        };

        let released = binding.release();
        let output = buffer.seal();
        if let Err(err) = released {
            warn!(session = %self.id, error = %err, "output channel fault");
            return ExecutionResult::failure(FailureKind::HostBindingFault, err.to_string());
        }

        match outcome {
            Ok(()) if output.is_empty() => ExecutionResult::Success {
                output: self.empty_output_message.clone(),
            },
            Ok(()) => ExecutionResult::Success { output },
            Err(fault) => {
                debug!(session = %self.id, generation = request.generation, fault = %fault, "program fault");
                ExecutionResult::failure(FailureKind::ProgramFault, fault.description)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_render_with_error_marker() {
        let failure = ExecutionResult::failure(FailureKind::ProgramFault, "NameError: name 'x' is not defined on line 1");
        assert_eq!(failure.render(), "Error: NameError: name 'x' is not defined on line 1");
        assert_eq!(failure.failure_kind(), Some(FailureKind::ProgramFault));

        let success = ExecutionResult::Success { output: "hi\n".into() };
        assert_eq!(success.render(), "hi\n");
        assert_eq!(success.output(), Some("hi\n"));
    }

    #[test]
    fn results_serialize_with_status_tag() {
        let failure = ExecutionResult::failure(FailureKind::InterpreterUnavailable, "down");
        let json = serde_json::to_value(&failure).unwrap();
        assert_eq!(json["status"], "failure");
        assert_eq!(json["kind"], "interpreter_unavailable");
    }
}
