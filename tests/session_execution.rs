//! Integration tests for execution sessions
//!
//! Covers result folding, recovery after faults, output isolation between
//! concurrent sessions and the opt-in run guards.

mod support;

use futures::FutureExt;
use futures::future::BoxFuture;
use pyground::runtime::config::DEFAULT_EMPTY_OUTPUT;
use pyground::runtime::{
    EmbeddedInterpreter, ExecutionRequest, ExecutionResult, ExecutionSession, FailureKind,
    InterpreterBackend, InterpreterLoader, LoadError, OutputChannel, ProgramFault, RuntimeConfig,
};
use std::sync::Arc;
use std::time::Duration;
use support::playground;

#[tokio::test]
async fn test_program_without_output_reports_sentinel() {
    let playground = playground(RuntimeConfig::default());
    let result = playground.execute("x = 40 + 2").await;
    assert_eq!(
        result,
        ExecutionResult::Success {
            output: DEFAULT_EMPTY_OUTPUT.into()
        }
    );
    assert!(!result.render().starts_with("Error:"));
}

#[tokio::test]
async fn test_custom_empty_output_message() {
    let playground = playground(RuntimeConfig {
        empty_output_message: "(nothing printed)".into(),
        ..RuntimeConfig::default()
    });
    assert_eq!(playground.execute("pass").await.output(), Some("(nothing printed)"));
}

#[tokio::test]
async fn test_fault_then_recovery() {
    let playground = playground(RuntimeConfig::default());

    let fault = playground.execute("print('before')\nraise ValueError('bad input')").await;
    assert_eq!(
        fault,
        ExecutionResult::failure(FailureKind::ProgramFault, "ValueError: bad input on line 2")
    );
    assert_eq!(fault.render(), "Error: ValueError: bad input on line 2");

    let ok = playground.execute("print('after')").await;
    assert_eq!(ok.output(), Some("after\n"));
}

#[tokio::test]
async fn test_no_state_leaks_between_runs() {
    let playground = playground(RuntimeConfig::default());
    playground.execute("secret = 1\nprint(secret)").await;
    let result = playground.execute("print(secret)").await;
    assert_eq!(result.failure_kind(), Some(FailureKind::ProgramFault));
}

#[tokio::test]
async fn test_concurrent_sessions_keep_output_apart() {
    let playground = playground(RuntimeConfig::default());
    let source_a = "for i in range(3):\n    print('A')\nprint('A')\nprint('A')";
    let source_b = "print('B')\nprint('B')\nfor i in range(3):\n    print('B')";

    for _ in 0..5 {
        let (a, b) = tokio::join!(playground.execute(source_a), playground.execute(source_b));
        assert_eq!(a.output(), Some("A\nA\nA\nA\nA\n"));
        assert_eq!(b.output(), Some("B\nB\nB\nB\nB\n"));
    }
}

#[tokio::test]
async fn test_spawned_sessions_keep_output_apart() {
    let playground = Arc::new(playground(RuntimeConfig::default()));
    let handles: Vec<_> = (0..8)
        .map(|n| {
            let playground = Arc::clone(&playground);
            tokio::spawn(async move {
                let source = format!("for i in range(4):\n    print({})", n);
                (n, playground.execute(&source).await)
            })
        })
        .collect();
    for handle in handles {
        let (n, result) = handle.await.unwrap();
        assert_eq!(result.output(), Some(format!("{n}\n").repeat(4).as_str()));
    }
}

#[tokio::test]
async fn test_session_rejects_overlapping_execute() {
    let config = RuntimeConfig::default();
    let loader = Arc::new(InterpreterLoader::new(pyground::runtime::backend_for(&config)));
    let session = ExecutionSession::new(loader, &config);
    let request = ExecutionRequest::new(0, "print(1)");

    let (first, second) = tokio::join!(session.execute(&request), session.execute(&request));
    let settled: Vec<ExecutionResult> = [first, second].into_iter().flatten().collect();
    assert_eq!(settled.len(), 1);
    assert_eq!(settled[0].output(), Some("1\n"));
    assert!(!session.is_busy());
}

#[tokio::test]
async fn test_step_limit_interrupts_infinite_loop() {
    let playground = playground(RuntimeConfig {
        step_limit: Some(500),
        ..RuntimeConfig::default()
    });
    let result = playground.execute("while True:\n    pass").await;
    assert_eq!(result.failure_kind(), Some(FailureKind::ProgramFault));
    assert!(
        result
            .render()
            .starts_with("Error: TimeoutError: execution exceeded 500 steps")
    );

    // The interpreter is still usable.
    assert_eq!(playground.execute("print('ok')").await.output(), Some("ok\n"));
}

/// Interpreter that prints a little and then never finishes.
struct StalledInterpreter {
    channel: OutputChannel,
}

impl EmbeddedInterpreter for StalledInterpreter {
    fn name(&self) -> &str {
        "stalled"
    }

    fn stdout(&self) -> &OutputChannel {
        &self.channel
    }

    fn run<'a>(&'a self, _source: &'a str) -> BoxFuture<'a, Result<(), ProgramFault>> {
        async move {
            self.channel.write("partial");
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }
        .boxed()
    }
}

struct StalledBackend;

impl InterpreterBackend for StalledBackend {
    fn name(&self) -> &'static str {
        "stalled"
    }

    fn load(&self) -> BoxFuture<'static, Result<Arc<dyn EmbeddedInterpreter>, LoadError>> {
        async {
            let interpreter: Arc<dyn EmbeddedInterpreter> = Arc::new(StalledInterpreter {
                channel: OutputChannel::new(),
            });
            Ok(interpreter)
        }
        .boxed()
    }
}

#[tokio::test]
async fn test_timeout_fails_run_and_unbinds_channel() {
    let config = RuntimeConfig {
        timeout_ms: Some(20),
        ..RuntimeConfig::default()
    };
    let loader = Arc::new(InterpreterLoader::new(Arc::new(StalledBackend)));
    let session = ExecutionSession::new(Arc::clone(&loader), &config);

    let result = session
        .execute(&ExecutionRequest::new(0, "anything"))
        .await
        .unwrap();
    assert_eq!(
        result,
        ExecutionResult::failure(FailureKind::ProgramFault, "TimeoutError: execution exceeded 20 ms")
    );

    let interpreter = loader.ready().unwrap();
    assert!(!interpreter.stdout().is_bound());
    assert!(!session.is_busy());
}

#[tokio::test]
async fn test_timeout_stops_tight_loop_on_builtin_backend() {
    let playground = playground(RuntimeConfig {
        timeout_ms: Some(50),
        ..RuntimeConfig::default()
    });
    let result = playground.execute("while True:\n    pass").await;
    assert_eq!(
        result,
        ExecutionResult::failure(FailureKind::ProgramFault, "TimeoutError: execution exceeded 50 ms")
    );

    // The abandoned run does not hold the interpreter.
    assert_eq!(playground.execute("print('ok')").await.output(), Some("ok\n"));
}
