//! Integration tests for editor surfaces
//!
//! Exercises run/reset/copy/indent as a host would drive them, including the
//! races between a slow interpreter load, resets and repeated clicks.

mod support;

use proptest::prelude::*;
use pyground::runtime::progress::{module_progress, project_id, task_id};
use pyground::runtime::{
    Clipboard, ClipboardError, ExecutionResult, FailureKind, MemoryClipboard,
    MemoryProgressStore, ProgressStore, RunOutcome, RuntimeConfig, Selection,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use support::{gated_playground, playground};

fn counting_hook() -> (Arc<AtomicUsize>, impl Fn(&str) + Send + Sync + 'static) {
    let count = Arc::new(AtomicUsize::new(0));
    let hook_count = Arc::clone(&count);
    (count, move |_output: &str| {
        hook_count.fetch_add(1, Ordering::SeqCst);
    })
}

#[tokio::test]
async fn test_run_before_ready_waits_for_load() {
    let (playground, gate, _) = gated_playground(false);
    let surface = playground.surface("print('Hello, Python!')").build();

    let release = async {
        tokio::task::yield_now().await;
        assert!(surface.is_busy());
        gate.notify_one();
    };
    let (outcome, ()) = tokio::join!(surface.run(), release);

    let RunOutcome::Rendered(result) = outcome else {
        panic!("run was not rendered: {outcome:?}");
    };
    assert!(result.is_success());
    assert!(result.output().unwrap().contains("Hello, Python!"));
    assert_eq!(surface.rendered_output(), "Hello, Python!\n");
    assert!(!surface.is_busy());
}

#[tokio::test]
async fn test_double_run_renders_once() {
    let (playground, gate, _) = gated_playground(false);
    let (count, hook) = counting_hook();
    let surface = playground.surface("print(1)").on_success(hook).build();

    let release = async {
        tokio::task::yield_now().await;
        gate.notify_one();
    };
    let (first, second, ()) = tokio::join!(surface.run(), surface.run(), release);

    let outcomes = [first, second];
    let rendered = outcomes
        .iter()
        .filter(|o| matches!(o, RunOutcome::Rendered(_)))
        .count();
    let busy = outcomes.iter().filter(|o| **o == RunOutcome::Busy).count();
    assert_eq!((rendered, busy), (1, 1));
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(surface.rendered_output(), "1\n");
}

#[tokio::test]
async fn test_reset_discards_in_flight_result() {
    let (playground, gate, _) = gated_playground(false);
    let (count, hook) = counting_hook();
    let surface = playground.surface("print('old')").on_success(hook).build();
    surface.set_text("print('edited')");

    let reset = async {
        tokio::task::yield_now().await;
        surface.reset();
        gate.notify_one();
    };
    let (outcome, ()) = tokio::join!(surface.run(), reset);

    assert_eq!(outcome, RunOutcome::Superseded);
    assert_eq!(surface.last_result(), None);
    assert_eq!(surface.text(), "print('old')");
    assert_eq!(count.load(Ordering::SeqCst), 0);

    // The next run proceeds normally.
    let outcome = surface.run().await;
    assert_eq!(
        outcome,
        RunOutcome::Rendered(ExecutionResult::Success {
            output: "old\n".into()
        })
    );
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_hook_fires_once_per_success_never_on_failure() {
    let playground = playground(RuntimeConfig::default());
    let seen = Arc::new(parking_lot::Mutex::new(Vec::<String>::new()));
    let sink = Arc::clone(&seen);
    let surface = playground
        .surface("print('done')")
        .on_success(move |output: &str| sink.lock().push(output.to_string()))
        .build();

    surface.run().await;
    surface.run().await;
    assert_eq!(*seen.lock(), vec!["done\n".to_string(), "done\n".to_string()]);

    surface.set_text("print(missing)");
    let outcome = surface.run().await;
    let RunOutcome::Rendered(result) = outcome else {
        panic!("expected a rendered failure");
    };
    assert_eq!(result.failure_kind(), Some(FailureKind::ProgramFault));
    assert_eq!(seen.lock().len(), 2);

    surface.set_text("x = 1");
    surface.run().await;
    assert_eq!(seen.lock().last().map(String::as_str), Some("Code executed successfully (no output)"));
}

#[tokio::test]
async fn test_concurrent_surfaces_do_not_cross_talk() {
    let playground = playground(RuntimeConfig::default());
    let a = playground.surface("print('A')\nprint('A')").build();
    let b = playground.surface("print('B')\nprint('B')").build();

    let (ra, rb) = tokio::join!(a.run(), b.run());
    assert_eq!(
        ra,
        RunOutcome::Rendered(ExecutionResult::Success { output: "A\nA\n".into() })
    );
    assert_eq!(
        rb,
        RunOutcome::Rendered(ExecutionResult::Success { output: "B\nB\n".into() })
    );
}

#[test]
fn test_copy_writes_current_text() {
    let playground = playground(RuntimeConfig::default());
    let clipboard = Arc::new(MemoryClipboard::new());
    let surface = playground
        .surface("print('initial')")
        .clipboard(clipboard.clone())
        .build();

    surface.set_text("x = 1");
    assert!(surface.copy());
    assert_eq!(clipboard.contents().as_deref(), Some("x = 1"));
}

struct DeniedClipboard;

impl Clipboard for DeniedClipboard {
    fn write_text(&self, _text: &str) -> Result<(), ClipboardError> {
        Err(ClipboardError::Rejected("permission denied".into()))
    }
}

#[test]
fn test_copy_failure_is_not_an_execution_result() {
    let playground = playground(RuntimeConfig::default());
    let surface = playground
        .surface("x = 1")
        .clipboard(Arc::new(DeniedClipboard))
        .build();
    assert!(!surface.copy());
    assert_eq!(surface.last_result(), None);
}

#[tokio::test]
async fn test_read_only_surface_still_runs() {
    let playground = playground(RuntimeConfig::default());
    let surface = playground.surface("print(2 ** 10)").read_only(true).build();
    assert!(!surface.set_text("print(0)"));
    assert_eq!(surface.indent(Selection::caret(0)), None);
    assert_eq!(surface.run().await, RunOutcome::Rendered(ExecutionResult::Success { output: "1024\n".into() }));
}

#[tokio::test]
async fn test_task_surface_records_completion() {
    let playground = playground(RuntimeConfig::default());
    let store = Arc::new(MemoryProgressStore::new());
    let id = task_id(1, 2, 1);

    let surface = playground
        .surface("print('solved')")
        .task(id.clone(), store.clone())
        .build();
    assert_eq!(surface.task_id(), Some(id.as_str()));
    assert!(!surface.task_completed());

    surface.set_text("raise ValueError('not yet')");
    surface.run().await;
    assert!(!store.is_completed(&id));

    surface.reset();
    surface.run().await;
    surface.run().await;
    assert_eq!(store.completed(), vec![id.clone()]);

    let remounted = playground.surface("").task(id.clone(), store.clone()).build();
    assert!(remounted.task_completed());

    store.mark_completed(&project_id(1));
    let progress = module_progress(store.as_ref(), 1, 3);
    assert_eq!((progress.completed, progress.total), (2, 4));
}

proptest! {
    #[test]
    fn reset_restores_initial_text(
        initial in ".{0,40}",
        edits in prop::collection::vec(".{0,20}", 0..5),
        carets in prop::collection::vec(0usize..60, 0..5),
    ) {
        let playground = playground(RuntimeConfig::default());
        let surface = playground.surface(initial.clone()).build();
        for edit in &edits {
            surface.set_text(edit.clone());
        }
        for caret in &carets {
            surface.indent(Selection::caret(*caret));
        }
        surface.reset();
        prop_assert_eq!(surface.text(), initial.clone());
        surface.reset();
        prop_assert_eq!(surface.text(), initial);
    }

    #[test]
    fn indent_inserts_unit_and_places_caret(
        text in ".{0,40}",
        a in 0usize..50,
        b in 0usize..50,
    ) {
        let playground = playground(RuntimeConfig::default());
        let surface = playground.surface(text.clone()).build();
        let (start, end) = (a.min(b), a.max(b));
        let len = text.chars().count();
        let (clamped_start, clamped_end) = (start.min(len), end.min(len));

        let caret = surface.indent(Selection { start, end });
        prop_assert_eq!(caret, Some(clamped_start + 4));

        let expected: String = text
            .chars()
            .take(clamped_start)
            .chain("    ".chars())
            .chain(text.chars().skip(clamped_end))
            .collect();
        prop_assert_eq!(surface.text(), expected);
    }
}
