//! Runtime configuration and its on-disk JSON form
//!
//! Configuration is written atomically (temp file, fsync, rename, fsync of
//! the parent directory) so a crash never leaves a torn config behind.

use serde::{Deserialize, Serialize};
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::{ConfigError, ConfigResult};
use crate::interpreter::EvaluatorLimits;

/// Text shown for a successful run that printed nothing.
pub const DEFAULT_EMPTY_OUTPUT: &str = "Code executed successfully (no output)";

/// Spaces inserted by the tab key.
pub const DEFAULT_INDENT_WIDTH: usize = 4;

/// Executable used when the process backend is selected without a path.
pub const DEFAULT_PYTHON: &str = "python3";

/// Step budget override
pub const ENV_STEP_LIMIT: &str = "PYGROUND_STEP_LIMIT";
/// Session timeout override (milliseconds)
pub const ENV_TIMEOUT_MS: &str = "PYGROUND_TIMEOUT_MS";
/// Selects the process backend with the given executable
pub const ENV_PYTHON: &str = "PYGROUND_PYTHON";

/// Which interpreter backend hosts learner code
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackendConfig {
    /// Built-in tree-walking interpreter
    #[default]
    Builtin,
    /// CPython child process
    Process {
        /// Executable name or path
        python: String,
    },
}

/// Configuration for the playground runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Interpreter backend
    pub backend: BackendConfig,

    /// Statement budget per run (built-in backend); `None` is unbounded
    pub step_limit: Option<u64>,

    /// Wall-clock limit per run; `None` disables the timeout
    pub timeout_ms: Option<u64>,

    /// Spaces inserted by tab indentation
    pub indent_width: usize,

    /// Sentinel reported when a successful run printed nothing
    pub empty_output_message: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::Builtin,
            step_limit: None,
            timeout_ms: None,
            indent_width: DEFAULT_INDENT_WIDTH,
            empty_output_message: DEFAULT_EMPTY_OUTPUT.to_string(),
        }
    }
}

impl RuntimeConfig {
    /// Evaluator limits derived from this config
    pub fn limits(&self) -> EvaluatorLimits {
        EvaluatorLimits {
            step_limit: self.step_limit,
            ..EvaluatorLimits::default()
        }
    }

    /// Per-run timeout, if enabled
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }

    /// Apply `PYGROUND_*` overrides from the process environment
    pub fn apply_env(self) -> ConfigResult<Self> {
        self.apply_overrides(|var| std::env::var(var).ok())
    }

    /// Apply overrides from an arbitrary lookup (tests pass a map)
    pub fn apply_overrides(
        mut self,
        lookup: impl Fn(&'static str) -> Option<String>,
    ) -> ConfigResult<Self> {
        if let Some(raw) = lookup(ENV_STEP_LIMIT) {
            self.step_limit = Some(parse_env(ENV_STEP_LIMIT, &raw)?);
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            self.timeout_ms = Some(parse_env(ENV_TIMEOUT_MS, &raw)?);
        }
        if let Some(python) = lookup(ENV_PYTHON) {
            if !python.trim().is_empty() {
                self.backend = BackendConfig::Process {
                    python: python.trim().to_string(),
                };
            }
        }
        Ok(self)
    }
}

fn parse_env(var: &'static str, raw: &str) -> ConfigResult<u64> {
    raw.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        var,
        value: raw.to_string(),
    })
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> ConfigError {
    let path = path.to_path_buf();
    move |source| ConfigError::Io { path, source }
}

/// Write data atomically to a file
///
/// Creates a temporary sibling, writes and syncs it, renames it over the
/// destination, then syncs the parent directory.
pub fn write_atomic(path: &Path, data: &[u8]) -> ConfigResult<()> {
    let temp_path = path.with_extension("tmp");

    let mut file = File::create(&temp_path).map_err(io_err(&temp_path))?;
    file.write_all(data).map_err(io_err(&temp_path))?;
    file.sync_all().map_err(io_err(&temp_path))?;
    drop(file);

    fs::rename(&temp_path, path).map_err(io_err(path))?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        let dir = OpenOptions::new()
            .read(true)
            .open(parent)
            .map_err(io_err(parent))?;
        dir.sync_all().map_err(io_err(parent))?;
    }

    Ok(())
}

/// Write runtime configuration as pretty JSON
pub fn write_config(path: &Path, config: &RuntimeConfig) -> ConfigResult<()> {
    let json = serde_json::to_vec_pretty(config)?;
    write_atomic(path, &json)
}

/// Load runtime configuration
pub fn load_config(path: &Path) -> ConfigResult<RuntimeConfig> {
    let data = fs::read(path).map_err(io_err(path))?;
    Ok(serde_json::from_slice(&data)?)
}

/// Default config location: `pyground.json` in the working directory
pub fn default_config_path() -> PathBuf {
    PathBuf::from("pyground.json")
}
