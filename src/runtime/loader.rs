//! Interpreter loader: load exactly once, fan the outcome out to every caller
//!
//! The loader moves through `Uninitialized -> Loading -> Ready | Failed`.
//! While `Loading`, all callers await clones of one shared load future, so
//! concurrent surfaces never start a second load. `Ready` is permanent.
//! `Failed` sticks until [`InterpreterLoader::rearm`] is called explicitly.

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::Mutex;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::{error, info, warn};

use super::backend::{EmbeddedInterpreter, InterpreterBackend};
use super::error::LoadError;

type LoadOutcome = Result<Arc<dyn EmbeddedInterpreter>, LoadError>;
type LoadFuture = Shared<BoxFuture<'static, LoadOutcome>>;

/// Process-wide loader shared by every playground in the process.
static GLOBAL_LOADER: OnceLock<Arc<InterpreterLoader>> = OnceLock::new();

enum LoaderState {
    Uninitialized,
    Loading { epoch: u64, future: LoadFuture },
    Ready(Arc<dyn EmbeddedInterpreter>),
    Failed(LoadError),
}

/// Observable lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoaderStatus {
    /// No load attempted yet (or re-armed after a failure)
    Uninitialized,
    /// A load is in flight
    Loading,
    /// Interpreter is ready for good
    Ready,
    /// The last load failed
    Failed,
}

/// Owns the single interpreter instance for a backend.
pub struct InterpreterLoader {
    backend: Arc<dyn InterpreterBackend>,
    state: Mutex<LoaderState>,
    epoch: AtomicU64,
}

impl fmt::Debug for InterpreterLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterpreterLoader")
            .field("backend", &self.backend.name())
            .field("status", &self.status())
            .field("loads_started", &self.loads_started())
            .finish()
    }
}

impl InterpreterLoader {
    /// Loader for `backend`, not yet started.
    pub fn new(backend: Arc<dyn InterpreterBackend>) -> Self {
        Self {
            backend,
            state: Mutex::new(LoaderState::Uninitialized),
            epoch: AtomicU64::new(0),
        }
    }

    /// The process-wide loader, created from `backend` on first use.
    ///
    /// Later calls return the existing loader and ignore their backend.
    pub fn global(backend: impl FnOnce() -> Arc<dyn InterpreterBackend>) -> Arc<InterpreterLoader> {
        let mut created = false;
        let loader = GLOBAL_LOADER.get_or_init(|| {
            created = true;
            Arc::new(InterpreterLoader::new(backend()))
        });
        if !created {
            tracing::trace!(backend = loader.backend.name(), "reusing global interpreter loader");
        }
        Arc::clone(loader)
    }

    /// Backend name.
    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Current lifecycle state.
    pub fn status(&self) -> LoaderStatus {
        match &*self.state.lock() {
            LoaderState::Uninitialized => LoaderStatus::Uninitialized,
            LoaderState::Loading { .. } => LoaderStatus::Loading,
            LoaderState::Ready(_) => LoaderStatus::Ready,
            LoaderState::Failed(_) => LoaderStatus::Failed,
        }
    }

    /// Number of backend loads started over the loader's lifetime.
    pub fn loads_started(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    /// The ready interpreter, without waiting.
    pub fn ready(&self) -> Option<Arc<dyn EmbeddedInterpreter>> {
        match &*self.state.lock() {
            LoaderState::Ready(interpreter) => Some(Arc::clone(interpreter)),
            _ => None,
        }
    }

    /// Wait until the interpreter is ready or the load has failed.
    ///
    /// Returns immediately once `Ready`. The first caller in `Uninitialized`
    /// starts the load; everyone else joins it.
    pub async fn ensure_ready(&self) -> LoadOutcome {
        let (epoch, future) = {
            let mut state = self.state.lock();
            match &*state {
                LoaderState::Ready(interpreter) => return Ok(Arc::clone(interpreter)),
                LoaderState::Failed(err) => return Err(err.clone()),
                LoaderState::Loading { epoch, future } => (*epoch, future.clone()),
                LoaderState::Uninitialized => {
                    let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                    info!(backend = self.backend.name(), epoch, "interpreter load started");
                    let future = self.backend.load().shared();
                    *state = LoaderState::Loading {
                        epoch,
                        future: future.clone(),
                    };
                    (epoch, future)
                }
            }
        };

        let outcome = future.await;
        self.settle(epoch, &outcome);
        outcome
    }

    fn settle(&self, epoch: u64, outcome: &LoadOutcome) {
        let mut state = self.state.lock();
        let current = match &*state {
            LoaderState::Loading { epoch: current, .. } => *current,
            _ => return,
        };
        if current != epoch {
            warn!(epoch, current, "ignoring stale interpreter load outcome");
            return;
        }
        *state = match outcome {
            Ok(interpreter) => {
                info!(backend = self.backend.name(), epoch, "interpreter ready");
                LoaderState::Ready(Arc::clone(interpreter))
            }
            Err(err) => {
                error!(backend = self.backend.name(), epoch, error = %err, "interpreter load failed");
                LoaderState::Failed(err.clone())
            }
        };
    }

    /// Move `Failed` back to `Uninitialized` so the next caller retries.
    ///
    /// Returns whether a re-arm happened; other states are left alone.
    pub fn rearm(&self) -> bool {
        let mut state = self.state.lock();
        if matches!(&*state, LoaderState::Failed(_)) {
            *state = LoaderState::Uninitialized;
            info!(backend = self.backend.name(), "interpreter loader re-armed");
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::backend::BuiltinBackend;
    use crate::runtime::process::ProcessBackend;

    #[tokio::test]
    async fn ready_is_permanent() {
        let loader = InterpreterLoader::new(Arc::new(BuiltinBackend::default()));
        assert_eq!(loader.status(), LoaderStatus::Uninitialized);
        let first = loader.ensure_ready().await.ok().unwrap();
        let second = loader.ensure_ready().await.ok().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(loader.status(), LoaderStatus::Ready);
        assert_eq!(loader.loads_started(), 1);
        assert!(!loader.rearm());
    }

    #[tokio::test]
    async fn failure_sticks_until_rearmed() {
        let loader = InterpreterLoader::new(Arc::new(ProcessBackend::new("/nonexistent/python")));
        assert!(loader.ensure_ready().await.is_err());
        assert!(loader.ensure_ready().await.is_err());
        assert_eq!(loader.status(), LoaderStatus::Failed);
        assert_eq!(loader.loads_started(), 1);

        assert!(loader.rearm());
        assert_eq!(loader.status(), LoaderStatus::Uninitialized);
        assert!(loader.ensure_ready().await.is_err());
        assert_eq!(loader.loads_started(), 2);
    }
}
