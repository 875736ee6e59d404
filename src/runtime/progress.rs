//! Task progress plumbing
//!
//! Persistence of learner progress lives outside this crate; it is reached
//! through [`ProgressStore`]. Surfaces bound to a task read the store once
//! at mount time and record a completion through [`TaskCompletionRecorder`]
//! after each successful run.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info};

use super::surface::TaskCompletionHook;

/// Identifier of a practice task: `"<module>-<lesson>-<task>"`.
pub fn task_id(module: u32, lesson: u32, task: u32) -> String {
    format!("{}-{}-{}", module, lesson, task)
}

/// Identifier of a module's final project: `"<module>-project"`.
pub fn project_id(module: u32) -> String {
    format!("{}-project", module)
}

/// Key-value record of completed task ids.
pub trait ProgressStore: Send + Sync {
    /// Whether `task_id` has been completed.
    fn is_completed(&self, task_id: &str) -> bool;

    /// Record `task_id` as completed. Returns `false` if it already was.
    fn mark_completed(&self, task_id: &str) -> bool;

    /// All completed task ids.
    fn completed(&self) -> Vec<String>;
}

/// In-memory [`ProgressStore`].
#[derive(Debug, Default)]
pub struct MemoryProgressStore {
    completed: RwLock<BTreeMap<String, DateTime<Utc>>>,
}

impl MemoryProgressStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// When `task_id` was completed.
    pub fn completed_at(&self, task_id: &str) -> Option<DateTime<Utc>> {
        self.completed.read().get(task_id).copied()
    }
}

impl ProgressStore for MemoryProgressStore {
    fn is_completed(&self, task_id: &str) -> bool {
        self.completed.read().contains_key(task_id)
    }

    fn mark_completed(&self, task_id: &str) -> bool {
        let mut completed = self.completed.write();
        if completed.contains_key(task_id) {
            return false;
        }
        completed.insert(task_id.to_string(), Utc::now());
        true
    }

    fn completed(&self) -> Vec<String> {
        self.completed.read().keys().cloned().collect()
    }
}

/// Completed items of one module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleProgress {
    /// Completed tasks plus the project if done
    pub completed: usize,
    /// Task count plus one for the project
    pub total: usize,
}

impl ModuleProgress {
    /// Completion percentage in `0.0..=100.0`.
    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        (self.completed.min(self.total) as f64 / self.total as f64) * 100.0
    }
}

/// Progress of `module` given its number of practice tasks.
pub fn module_progress(store: &dyn ProgressStore, module: u32, task_count: usize) -> ModuleProgress {
    let prefix = format!("{}-", module);
    let completed = store
        .completed()
        .iter()
        .filter(|id| id.starts_with(&prefix))
        .count();
    ModuleProgress {
        completed,
        total: task_count + 1,
    }
}

/// Completion hook that marks one task as done.
pub struct TaskCompletionRecorder {
    store: Arc<dyn ProgressStore>,
    task_id: String,
}

impl TaskCompletionRecorder {
    /// Recorder for `task_id`.
    pub fn new(store: Arc<dyn ProgressStore>, task_id: impl Into<String>) -> Self {
        Self {
            store,
            task_id: task_id.into(),
        }
    }

    /// Task this recorder marks.
    pub fn task_id(&self) -> &str {
        &self.task_id
    }
}

impl TaskCompletionHook for TaskCompletionRecorder {
    fn on_successful_run(&self, _output: &str) {
        if self.store.mark_completed(&self.task_id) {
            info!(task = %self.task_id, "task completed");
        } else {
            debug!(task = %self.task_id, "task already completed");
        }
    }
}
