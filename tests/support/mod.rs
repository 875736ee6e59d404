//! Shared fixtures for runtime integration tests

#![allow(dead_code)]

use futures::FutureExt;
use futures::future::BoxFuture;
use pyground::runtime::{
    BuiltinBackend, EmbeddedInterpreter, InterpreterBackend, InterpreterLoader, LoadError,
    Playground, RuntimeConfig,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Notify;

/// Built-in backend whose load blocks until the gate opens.
pub struct GatedBackend {
    pub loads: Arc<AtomicUsize>,
    pub gate: Arc<Notify>,
    pub fail: bool,
}

impl GatedBackend {
    pub fn new(fail: bool) -> Self {
        Self {
            loads: Arc::new(AtomicUsize::new(0)),
            gate: Arc::new(Notify::new()),
            fail,
        }
    }
}

impl InterpreterBackend for GatedBackend {
    fn name(&self) -> &'static str {
        "gated"
    }

    fn load(&self) -> BoxFuture<'static, Result<Arc<dyn EmbeddedInterpreter>, LoadError>> {
        let loads = Arc::clone(&self.loads);
        let gate = Arc::clone(&self.gate);
        let fail = self.fail;
        async move {
            loads.fetch_add(1, Ordering::SeqCst);
            gate.notified().await;
            if fail {
                return Err(LoadError::failed("gated", "script failed to load"));
            }
            BuiltinBackend::default().load().await
        }
        .boxed()
    }
}

/// Playground on a gated loader, plus the gate and load counter.
pub fn gated_playground(fail: bool) -> (Playground, Arc<Notify>, Arc<AtomicUsize>) {
    let backend = GatedBackend::new(fail);
    let gate = Arc::clone(&backend.gate);
    let loads = Arc::clone(&backend.loads);
    let loader = Arc::new(InterpreterLoader::new(Arc::new(backend)));
    (
        Playground::with_loader(RuntimeConfig::default(), loader),
        gate,
        loads,
    )
}

/// Playground on a private built-in loader.
pub fn playground(config: RuntimeConfig) -> Playground {
    let loader = Arc::new(InterpreterLoader::new(pyground::runtime::backend_for(&config)));
    Playground::with_loader(config, loader)
}
