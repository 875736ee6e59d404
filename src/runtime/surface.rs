//! Editor surfaces
//!
//! An [`EditorSurface`] is one code panel: the learner's text, a run button
//! backed by its own [`ExecutionSession`], reset, copy and tab indentation.
//! Every reset bumps the surface generation; a run that settles after a
//! newer generation began is discarded instead of overwriting newer state.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::config::RuntimeConfig;
use super::error::ClipboardError;
use super::loader::InterpreterLoader;
use super::progress::{ProgressStore, TaskCompletionRecorder};
use super::session::{ExecutionRequest, ExecutionResult, ExecutionSession};

/// Host clipboard.
pub trait Clipboard: Send + Sync {
    /// Replace the clipboard contents with `text`.
    fn write_text(&self, text: &str) -> Result<(), ClipboardError>;
}

/// Clipboard that keeps the last written text in memory.
#[derive(Debug, Default)]
pub struct MemoryClipboard {
    contents: Mutex<Option<String>>,
}

impl MemoryClipboard {
    /// Empty clipboard.
    pub fn new() -> Self {
        Self::default()
    }

    /// Last written text.
    pub fn contents(&self) -> Option<String> {
        self.contents.lock().clone()
    }
}

impl Clipboard for MemoryClipboard {
    fn write_text(&self, text: &str) -> Result<(), ClipboardError> {
        *self.contents.lock() = Some(text.to_string());
        Ok(())
    }
}

/// Called once for every successful run of a surface.
pub trait TaskCompletionHook: Send + Sync {
    /// `output` is the text the surface displays for the run. A run that
    /// printed nothing passes the empty-output sentinel
    /// ([`RuntimeConfig::empty_output_message`](super::config::RuntimeConfig::empty_output_message)),
    /// never an empty string.
    fn on_successful_run(&self, output: &str);
}

impl<F> TaskCompletionHook for F
where
    F: Fn(&str) + Send + Sync,
{
    fn on_successful_run(&self, output: &str) {
        self(output)
    }
}

/// Editable program text and the text it started from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDocument {
    /// Current text
    pub text: String,
    /// Text supplied at construction, restored by reset
    pub initial_text: String,
}

impl SourceDocument {
    /// Document whose current text is `initial_text`.
    pub fn new(initial_text: impl Into<String>) -> Self {
        let initial_text = initial_text.into();
        Self {
            text: initial_text.clone(),
            initial_text,
        }
    }
}

/// Caret range in characters; `start == end` is a plain caret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selection {
    /// First selected character
    pub start: usize,
    /// One past the last selected character
    pub end: usize,
}

impl Selection {
    /// Empty selection at `pos`.
    pub fn caret(pos: usize) -> Self {
        Self { start: pos, end: pos }
    }
}

/// What a call to [`EditorSurface::run`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// The run settled and its result is now displayed
    Rendered(ExecutionResult),
    /// A run was already in flight; nothing happened
    Busy,
    /// The surface was reset while running; the result was dropped
    Superseded,
}

struct SurfaceState {
    document: SourceDocument,
    generation: u64,
    last_result: Option<ExecutionResult>,
}

/// One code panel.
pub struct EditorSurface {
    session: ExecutionSession,
    state: Mutex<SurfaceState>,
    read_only: bool,
    indent_width: usize,
    hooks: Vec<Arc<dyn TaskCompletionHook>>,
    clipboard: Option<Arc<dyn Clipboard>>,
    task_id: Option<String>,
    completed_at_mount: bool,
}

impl fmt::Debug for EditorSurface {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EditorSurface")
            .field("id", &self.id())
            .field("read_only", &self.read_only)
            .field("task_id", &self.task_id)
            .field("busy", &self.is_busy())
            .finish()
    }
}

impl EditorSurface {
    /// Surface identifier (its session's id).
    pub fn id(&self) -> Uuid {
        self.session.id()
    }

    /// Snapshot of the current and initial text.
    pub fn document(&self) -> SourceDocument {
        self.state.lock().document.clone()
    }

    /// Current text.
    pub fn text(&self) -> String {
        self.state.lock().document.text.clone()
    }

    /// Text the surface was constructed with.
    pub fn initial_text(&self) -> String {
        self.state.lock().document.initial_text.clone()
    }

    /// Replace the text. Returns `false` on a read-only surface.
    pub fn set_text(&self, text: impl Into<String>) -> bool {
        if self.read_only {
            return false;
        }
        self.state.lock().document.text = text.into();
        true
    }

    /// Whether the surface rejects edits.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Whether a run is outstanding; renderers disable the run button.
    pub fn is_busy(&self) -> bool {
        self.session.is_busy()
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.state.lock().generation
    }

    /// Result of the last settled run, if still displayed.
    pub fn last_result(&self) -> Option<ExecutionResult> {
        self.state.lock().last_result.clone()
    }

    /// Text of the output panel.
    pub fn rendered_output(&self) -> String {
        self.state
            .lock()
            .last_result
            .as_ref()
            .map(ExecutionResult::render)
            .unwrap_or_default()
    }

    /// Task this surface practices, if any.
    pub fn task_id(&self) -> Option<&str> {
        self.task_id.as_deref()
    }

    /// Whether the bound task was already completed when the surface mounted.
    pub fn task_completed(&self) -> bool {
        self.completed_at_mount
    }

    /// Run the current text.
    pub async fn run(&self) -> RunOutcome {
        if self.session.is_busy() {
            debug!(surface = %self.id(), "run ignored while busy");
            return RunOutcome::Busy;
        }
        let request = {
            let mut state = self.state.lock();
            state.last_result = None;
            ExecutionRequest::new(state.generation, state.document.text.clone())
        };

        let Some(result) = self.session.execute(&request).await else {
            return RunOutcome::Busy;
        };

        {
            let mut state = self.state.lock();
            if state.generation != request.generation {
                warn!(
                    surface = %self.id(),
                    stale = request.generation,
                    current = state.generation,
                    "discarding result of superseded run"
                );
                return RunOutcome::Superseded;
            }
            state.last_result = Some(result.clone());
        }

        if let Some(output) = result.output() {
            info!(surface = %self.id(), hooks = self.hooks.len(), "run succeeded");
            for hook in &self.hooks {
                hook.on_successful_run(output);
            }
        } else {
            debug!(surface = %self.id(), kind = ?result.failure_kind(), "run failed");
        }
        RunOutcome::Rendered(result)
    }

    /// Restore the initial text and clear the output.
    ///
    /// An in-flight run keeps going but its result will be discarded.
    pub fn reset(&self) {
        let mut state = self.state.lock();
        if !self.read_only {
            state.document.text = state.document.initial_text.clone();
        }
        state.last_result = None;
        state.generation += 1;
        debug!(surface = %self.id(), generation = state.generation, "surface reset");
    }

    /// Copy the current text to the clipboard. Failures are logged only.
    pub fn copy(&self) -> bool {
        let written = match &self.clipboard {
            Some(clipboard) => clipboard.write_text(&self.text()),
            None => Err(ClipboardError::Unavailable),
        };
        match written {
            Ok(()) => true,
            Err(err) => {
                warn!(surface = %self.id(), error = %err, "copy to clipboard failed");
                false
            }
        }
    }

    /// Replace `selection` with one indent unit.
    ///
    /// Returns the new caret position, `selection.start + indent_width`, or
    /// `None` on a read-only surface. Positions past the end are clamped.
    pub fn indent(&self, selection: Selection) -> Option<usize> {
        if self.read_only {
            return None;
        }
        let mut state = self.state.lock();
        let text = &mut state.document.text;
        let chars = text.chars().count();
        let start = selection.start.min(chars);
        let end = selection.end.clamp(start, chars);
        let (from, to) = (byte_offset(text, start), byte_offset(text, end));
        text.replace_range(from..to, &" ".repeat(self.indent_width));
        Some(start + self.indent_width)
    }
}

fn byte_offset(text: &str, chars: usize) -> usize {
    text.char_indices()
        .nth(chars)
        .map(|(offset, _)| offset)
        .unwrap_or(text.len())
}

/// Configures an [`EditorSurface`].
pub struct SurfaceBuilder {
    loader: Arc<InterpreterLoader>,
    config: RuntimeConfig,
    initial_text: String,
    read_only: bool,
    hooks: Vec<Arc<dyn TaskCompletionHook>>,
    clipboard: Option<Arc<dyn Clipboard>>,
    task: Option<(String, Arc<dyn ProgressStore>)>,
}

impl SurfaceBuilder {
    /// Builder for a surface showing `initial_text`.
    pub fn new(
        loader: Arc<InterpreterLoader>,
        config: RuntimeConfig,
        initial_text: impl Into<String>,
    ) -> Self {
        Self {
            loader,
            config,
            initial_text: initial_text.into(),
            read_only: false,
            hooks: Vec::new(),
            clipboard: None,
            task: None,
        }
    }

    /// Make the surface read-only (lesson examples).
    pub fn read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Call `hook` after every successful run.
    pub fn on_success(mut self, hook: impl TaskCompletionHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    /// Attach a clipboard for [`EditorSurface::copy`].
    pub fn clipboard(mut self, clipboard: Arc<dyn Clipboard>) -> Self {
        self.clipboard = Some(clipboard);
        self
    }

    /// Bind the surface to a practice task recorded in `store`.
    pub fn task(mut self, task_id: impl Into<String>, store: Arc<dyn ProgressStore>) -> Self {
        self.task = Some((task_id.into(), store));
        self
    }

    /// Mount the surface.
    pub fn build(self) -> EditorSurface {
        let mut hooks = self.hooks;
        let (task_id, completed_at_mount) = match self.task {
            Some((task_id, store)) => {
                let completed = store.is_completed(&task_id);
                hooks.push(Arc::new(TaskCompletionRecorder::new(store, task_id.clone())));
                (Some(task_id), completed)
            }
            None => (None, false),
        };
        EditorSurface {
            session: ExecutionSession::new(self.loader, &self.config),
            state: Mutex::new(SurfaceState {
                document: SourceDocument::new(self.initial_text),
                generation: 0,
                last_result: None,
            }),
            read_only: self.read_only,
            indent_width: self.config.indent_width,
            hooks,
            clipboard: self.clipboard,
            task_id,
            completed_at_mount,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::backend::BuiltinBackend;

    fn builder(text: &str) -> SurfaceBuilder {
        let loader = Arc::new(InterpreterLoader::new(Arc::new(BuiltinBackend::default())));
        SurfaceBuilder::new(loader, RuntimeConfig::default(), text)
    }

    #[test]
    fn indent_replaces_selection_and_moves_caret() {
        let surface = builder("ab\ncd").build();
        assert_eq!(surface.indent(Selection::caret(3)), Some(7));
        assert_eq!(surface.text(), "ab\n    cd");

        assert_eq!(surface.indent(Selection { start: 0, end: 2 }), Some(4));
        assert_eq!(surface.text(), "    \n    cd");
    }

    #[test]
    fn indent_counts_characters_not_bytes() {
        let surface = builder("é=1").build();
        assert_eq!(surface.indent(Selection::caret(1)), Some(5));
        assert_eq!(surface.text(), "é    =1");
        assert_eq!(surface.indent(Selection::caret(100)), Some(11));
        assert_eq!(surface.text(), "é    =1    ");
    }

    #[test]
    fn read_only_surface_rejects_edits() {
        let surface = builder("print(1)").read_only(true).build();
        assert!(!surface.set_text("x"));
        assert_eq!(surface.indent(Selection::caret(0)), None);
        surface.reset();
        assert_eq!(surface.text(), "print(1)");
    }

    #[test]
    fn copy_without_clipboard_reports_failure() {
        let surface = builder("x").build();
        assert!(!surface.copy());
    }

    #[tokio::test]
    async fn failed_run_renders_error_marker() {
        let surface = builder("print(undefined)").build();
        let outcome = surface.run().await;
        assert!(matches!(outcome, RunOutcome::Rendered(ref r) if !r.is_success()));
        assert_eq!(
            surface.rendered_output(),
            "Error: NameError: name 'undefined' is not defined on line 1"
        );
        surface.reset();
        assert_eq!(surface.rendered_output(), "");
    }
}
