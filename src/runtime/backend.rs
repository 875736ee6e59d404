//! Interpreter backends
//!
//! The execution pipeline only ever talks to [`EmbeddedInterpreter`]; how
//! that interpreter comes to exist is a [`InterpreterBackend`]'s business.
//! Two backends ship: the built-in tree-walker below and the CPython child
//! process in [`super::process`].

use futures::FutureExt;
use futures::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use super::capture::OutputChannel;
use super::error::{LoadError, ProgramFault};
use crate::interpreter::{
    Evaluator, EvaluatorLimits, PrintWriter, Program, ProgramError, eval_thread, parse_program,
};

/// Source executed ahead of every program on the built-in backend.
pub const DEFAULT_PRELUDE: &str = "__name__ = '__main__'\n";

/// A ready interpreter instance.
///
/// Programs write to [`stdout`](EmbeddedInterpreter::stdout); callers bind a
/// capture buffer to it around each [`run`](EmbeddedInterpreter::run).
pub trait EmbeddedInterpreter: Send + Sync {
    /// Backend that produced this instance.
    fn name(&self) -> &str;

    /// The interpreter's redirectable standard output.
    fn stdout(&self) -> &OutputChannel;

    /// Execute `source` to completion.
    fn run<'a>(&'a self, source: &'a str) -> BoxFuture<'a, Result<(), ProgramFault>>;
}

/// Something that can bring an [`EmbeddedInterpreter`] up.
pub trait InterpreterBackend: Send + Sync {
    /// Short name used in logs and errors.
    fn name(&self) -> &'static str;

    /// Load the interpreter. Called at most once per loader epoch.
    fn load(&self) -> BoxFuture<'static, Result<Arc<dyn EmbeddedInterpreter>, LoadError>>;
}

/// Loads the built-in tree-walking interpreter.
#[derive(Debug, Clone)]
pub struct BuiltinBackend {
    limits: EvaluatorLimits,
    prelude: String,
}

impl Default for BuiltinBackend {
    fn default() -> Self {
        Self::new(EvaluatorLimits::default())
    }
}

impl BuiltinBackend {
    /// Backend with the given limits and the default prelude.
    pub fn new(limits: EvaluatorLimits) -> Self {
        Self {
            limits,
            prelude: DEFAULT_PRELUDE.to_string(),
        }
    }

    /// Replace the prelude.
    pub fn with_prelude(mut self, prelude: impl Into<String>) -> Self {
        self.prelude = prelude.into();
        self
    }
}

impl InterpreterBackend for BuiltinBackend {
    fn name(&self) -> &'static str {
        "builtin"
    }

    fn load(&self) -> BoxFuture<'static, Result<Arc<dyn EmbeddedInterpreter>, LoadError>> {
        let limits = self.limits;
        let prelude = self.prelude.clone();
        async move {
            info!("loading built-in interpreter");
            let prelude = parse_program(&prelude)
                .map_err(|err| LoadError::failed("builtin", format!("prelude: {}", err)))?;
            let interpreter: Arc<dyn EmbeddedInterpreter> = Arc::new(BuiltinInterpreter {
                channel: OutputChannel::new(),
                limits,
                prelude: Arc::new(prelude),
            });
            info!("built-in interpreter ready");
            Ok(interpreter)
        }
        .boxed()
    }
}

/// Tree-walking interpreter instance.
///
/// Each run parses and evaluates on its own [`eval_thread`], streaming
/// printed chunks back to the channel as they are produced. Dropping the
/// run future cancels the program at its next statement.
#[derive(Debug)]
pub struct BuiltinInterpreter {
    channel: OutputChannel,
    limits: EvaluatorLimits,
    prelude: Arc<Program>,
}

struct ChunkWriter(mpsc::UnboundedSender<String>);

impl PrintWriter for ChunkWriter {
    fn write_str(&mut self, text: &str) {
        // The receiver is gone only after the run was abandoned.
        let _ = self.0.send(text.to_string());
    }
}

/// Raises the cancel flag when the run future goes away.
struct CancelOnDrop(Arc<AtomicBool>);

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Relaxed);
    }
}

fn evaluate(
    prelude: &Program,
    source: &str,
    limits: EvaluatorLimits,
    cancel: Arc<AtomicBool>,
    out: &mut dyn PrintWriter,
) -> Result<u64, ProgramError> {
    // Parse first: a syntax error must not leave partial output behind.
    let program = parse_program(source)?;
    let mut evaluator = Evaluator::new(limits).with_cancel(cancel);
    for stmt in prelude.body.iter().chain(program.body.iter()) {
        evaluator.exec_top_level(stmt, out)?;
    }
    Ok(evaluator.steps())
}

impl EmbeddedInterpreter for BuiltinInterpreter {
    fn name(&self) -> &str {
        "builtin"
    }

    fn stdout(&self) -> &OutputChannel {
        &self.channel
    }

    fn run<'a>(&'a self, source: &'a str) -> BoxFuture<'a, Result<(), ProgramFault>> {
        async move {
            let (chunks, mut incoming) = mpsc::unbounded_channel();
            let (done, finished) = oneshot::channel();
            let cancel = CancelOnDrop(Arc::new(AtomicBool::new(false)));

            let prelude = Arc::clone(&self.prelude);
            let source = source.to_string();
            let limits = self.limits;
            let flag = Arc::clone(&cancel.0);
            eval_thread()
                .spawn(move || {
                    let mut writer = ChunkWriter(chunks);
                    let outcome = evaluate(&prelude, &source, limits, flag, &mut writer);
                    let _ = done.send(outcome);
                })
                .map_err(|err| {
                    ProgramFault::new(format!("RuntimeError: cannot start interpreter thread: {}", err))
                })?;

            while let Some(chunk) = incoming.recv().await {
                self.channel.write(&chunk);
            }
            let steps = match finished.await {
                Ok(outcome) => outcome?,
                Err(_) => {
                    warn!("interpreter thread panicked");
                    return Err(ProgramFault::new("RuntimeError: interpreter thread panicked"));
                }
            };
            debug!(steps, "program finished");
            Ok(())
        }
        .boxed()
    }
}
