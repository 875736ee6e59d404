//! Execution runtime and public API
//!
//! [`Playground`] ties the pieces together: it owns the configuration and
//! the interpreter loader, and mounts [`EditorSurface`]s that each run code
//! through their own [`ExecutionSession`]. All surfaces of a process share
//! one interpreter, and runs on it are serialized by its output channel.

use std::sync::Arc;
use tracing::debug;

// Submodules
pub mod backend;
pub mod capture;
pub mod config;
pub mod error;
pub mod loader;
pub mod process;
pub mod progress;
pub mod session;
pub mod snippets;
pub mod surface;

pub use backend::{BuiltinBackend, EmbeddedInterpreter, InterpreterBackend};
pub use capture::{OutputCaptureBuffer, OutputChannel};
pub use config::{BackendConfig, RuntimeConfig};
pub use error::{BindingError, ClipboardError, ConfigError, LoadError, ProgramFault};
pub use loader::{InterpreterLoader, LoaderStatus};
pub use process::ProcessBackend;
pub use progress::{MemoryProgressStore, ProgressStore, TaskCompletionRecorder};
pub use session::{ExecutionRequest, ExecutionResult, ExecutionSession, FailureKind};
pub use surface::{
    Clipboard, EditorSurface, MemoryClipboard, RunOutcome, Selection, SourceDocument,
    SurfaceBuilder, TaskCompletionHook,
};

/// Backend selected by `config`.
pub fn backend_for(config: &RuntimeConfig) -> Arc<dyn InterpreterBackend> {
    match &config.backend {
        BackendConfig::Builtin => Arc::new(BuiltinBackend::new(config.limits())),
        BackendConfig::Process { python } => Arc::new(ProcessBackend::new(python.clone())),
    }
}

/// Entry point for hosts embedding the playground.
#[derive(Debug, Clone)]
pub struct Playground {
    config: RuntimeConfig,
    loader: Arc<InterpreterLoader>,
}

impl Playground {
    /// Playground on the process-wide interpreter.
    ///
    /// The first playground in a process decides the backend; later ones
    /// share its loader whatever their configured backend.
    pub fn new(config: RuntimeConfig) -> Self {
        let loader = InterpreterLoader::global(|| backend_for(&config));
        Self { config, loader }
    }

    /// Playground on an explicit loader.
    pub fn with_loader(config: RuntimeConfig, loader: Arc<InterpreterLoader>) -> Self {
        Self { config, loader }
    }

    /// Active configuration.
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Shared interpreter loader.
    pub fn loader(&self) -> &Arc<InterpreterLoader> {
        &self.loader
    }

    /// Start loading the interpreter and wait for the outcome.
    pub async fn warm_up(&self) -> Result<(), LoadError> {
        self.loader.ensure_ready().await.map(|_| ())
    }

    /// Builder for a surface showing `initial_text`.
    pub fn surface(&self, initial_text: impl Into<String>) -> SurfaceBuilder {
        SurfaceBuilder::new(Arc::clone(&self.loader), self.config.clone(), initial_text)
    }

    /// Builder for a surface preloaded with playground snippet `index`.
    pub fn snippet_surface(&self, index: usize) -> Option<SurfaceBuilder> {
        snippets::get(index).map(|snippet| self.surface(snippet.code))
    }

    /// Run `source` once, outside of any surface.
    pub async fn execute(&self, source: &str) -> ExecutionResult {
        let session = ExecutionSession::new(Arc::clone(&self.loader), &self.config);
        debug!(session = %session.id(), "one-off execution");
        match session.execute(&ExecutionRequest::new(0, source)).await {
            Some(result) => result,
            None => ExecutionResult::failure(FailureKind::HostBindingFault, "session is busy"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn playground() -> Playground {
        let config = RuntimeConfig::default();
        let loader = Arc::new(InterpreterLoader::new(backend_for(&config)));
        Playground::with_loader(config, loader)
    }

    #[tokio::test]
    async fn execute_reports_output_and_faults() {
        let playground = playground();
        assert_eq!(
            playground.execute("print('hi')").await,
            ExecutionResult::Success { output: "hi\n".into() }
        );
        let fault = playground.execute("1 / 0").await;
        assert_eq!(fault.failure_kind(), Some(FailureKind::ProgramFault));
        assert_eq!(fault.render(), "Error: ZeroDivisionError: division by zero on line 1");
    }

    #[tokio::test]
    async fn snippet_surface_loads_snippet_text() {
        let playground = playground();
        let surface = playground.snippet_surface(0).unwrap().build();
        assert_eq!(surface.text(), snippets::SNIPPETS[0].code);
        assert!(playground.snippet_surface(snippets::SNIPPETS.len()).is_none());
    }

    #[test]
    fn backend_follows_config() {
        let config = RuntimeConfig {
            backend: BackendConfig::Process {
                python: "python3".into(),
            },
            ..RuntimeConfig::default()
        };
        assert_eq!(backend_for(&config).name(), "process");
        assert_eq!(backend_for(&RuntimeConfig::default()).name(), "builtin");
    }
}
