//! CPython hosted as a child process
//!
//! Loading probes `<python> --version`. Each run spawns `<python> -u -c
//! <source>`, streams the child's stdout into the interpreter's output
//! channel as it arrives and treats a non-zero exit as a program fault whose
//! description is the child's stderr (the traceback).

use futures::FutureExt;
use futures::future::BoxFuture;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::backend::{EmbeddedInterpreter, InterpreterBackend};
use super::capture::OutputChannel;
use super::config::DEFAULT_PYTHON;
use super::error::{LoadError, ProgramFault};

/// Loads a CPython executable as the interpreter.
#[derive(Debug, Clone)]
pub struct ProcessBackend {
    python: String,
}

impl Default for ProcessBackend {
    fn default() -> Self {
        Self::new(DEFAULT_PYTHON)
    }
}

impl ProcessBackend {
    /// Backend for the given executable name or path.
    pub fn new(python: impl Into<String>) -> Self {
        Self {
            python: python.into(),
        }
    }

    /// Configured executable.
    pub fn python(&self) -> &str {
        &self.python
    }
}

impl InterpreterBackend for ProcessBackend {
    fn name(&self) -> &'static str {
        "process"
    }

    fn load(&self) -> BoxFuture<'static, Result<Arc<dyn EmbeddedInterpreter>, LoadError>> {
        let python = self.python.clone();
        async move {
            info!(%python, "probing python executable");
            let output = Command::new(&python)
                .arg("--version")
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|err| {
                    LoadError::failed("process", format!("cannot start {}: {}", python, err))
                })?;
            if !output.status.success() {
                return Err(LoadError::failed(
                    "process",
                    format!("{} --version exited with {}", python, output.status),
                ));
            }
            // Python 2 printed its version on stderr.
            let raw = if output.stdout.is_empty() {
                &output.stderr
            } else {
                &output.stdout
            };
            let version = String::from_utf8_lossy(raw).trim().to_string();
            info!(%python, %version, "python interpreter ready");
            let interpreter: Arc<dyn EmbeddedInterpreter> = Arc::new(ProcessInterpreter {
                python,
                version,
                channel: OutputChannel::new(),
            });
            Ok(interpreter)
        }
        .boxed()
    }
}

/// A probed CPython executable.
#[derive(Debug)]
pub struct ProcessInterpreter {
    python: String,
    version: String,
    channel: OutputChannel,
}

impl ProcessInterpreter {
    /// Version string reported by the probe.
    pub fn version(&self) -> &str {
        &self.version
    }
}

/// Forward a byte stream to `channel`, splitting only on UTF-8 boundaries.
async fn pump<R: AsyncRead + Unpin>(mut reader: R, channel: &OutputChannel) -> std::io::Result<()> {
    let mut chunk = [0u8; 4096];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        let read = reader.read(&mut chunk).await?;
        if read == 0 {
            break;
        }
        pending.extend_from_slice(&chunk[..read]);
        let valid = match std::str::from_utf8(&pending) {
            Ok(text) => text.len(),
            Err(err) => err.valid_up_to(),
        };
        if valid > 0 {
            channel.write(&String::from_utf8_lossy(&pending[..valid]));
            pending.drain(..valid);
        }
    }
    if !pending.is_empty() {
        channel.write(&String::from_utf8_lossy(&pending));
    }
    Ok(())
}

impl EmbeddedInterpreter for ProcessInterpreter {
    fn name(&self) -> &str {
        "process"
    }

    fn stdout(&self) -> &OutputChannel {
        &self.channel
    }

    fn run<'a>(&'a self, source: &'a str) -> BoxFuture<'a, Result<(), ProgramFault>> {
        async move {
            let mut child = Command::new(&self.python)
                .arg("-u")
                .arg("-c")
                .arg(source)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .spawn()
                .map_err(|err| ProgramFault::new(format!("failed to start {}: {}", self.python, err)))?;

            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| ProgramFault::new("python stdout was not captured"))?;
            let mut stderr = child
                .stderr
                .take()
                .ok_or_else(|| ProgramFault::new("python stderr was not captured"))?;

            let collect_stderr = async {
                let mut buf = Vec::new();
                stderr.read_to_end(&mut buf).await.map(|_| buf)
            };
            let (pumped, traceback) = tokio::join!(pump(stdout, &self.channel), collect_stderr);
            if let Err(err) = pumped {
                warn!(error = %err, "failed reading python stdout");
            }
            let traceback = traceback.unwrap_or_default();

            let status = child
                .wait()
                .await
                .map_err(|err| ProgramFault::new(format!("failed waiting for python: {}", err)))?;
            debug!(%status, "python child exited");
            if status.success() {
                return Ok(());
            }
            let description = String::from_utf8_lossy(&traceback).trim_end().to_string();
            if description.is_empty() {
                Err(ProgramFault::new(format!("python exited with {}", status)))
            } else {
                Err(ProgramFault::new(description))
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_executable_fails_load() {
        let backend = ProcessBackend::new("/nonexistent/pyground-python");
        let err = backend.load().await.err().unwrap();
        match err {
            LoadError::InterpreterLoadFailed { backend, reason } => {
                assert_eq!(backend, "process");
                assert!(reason.contains("/nonexistent/pyground-python"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    async fn python3_available() -> bool {
        Command::new("python3")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .is_ok_and(|status| status.success())
    }

    #[tokio::test]
    async fn runs_python3_child_when_available() {
        if !python3_available().await {
            eprintln!("python3 not found, skipping");
            return;
        }
        let interpreter = ProcessBackend::new("python3").load().await.unwrap();

        let buffer = crate::runtime::capture::OutputCaptureBuffer::new();
        let binding = interpreter.stdout().acquire(Arc::clone(&buffer)).await.unwrap();
        let result = interpreter.run("print('A')\nprint('B')").await;
        binding.release().unwrap();
        assert!(result.is_ok());
        assert_eq!(buffer.seal(), "A\nB\n");

        let buffer = crate::runtime::capture::OutputCaptureBuffer::new();
        let binding = interpreter.stdout().acquire(Arc::clone(&buffer)).await.unwrap();
        let fault = interpreter.run("print('before')\n1 / 0").await.unwrap_err();
        binding.release().unwrap();
        assert_eq!(buffer.seal(), "before\n");
        assert!(fault.description.starts_with("Traceback"));
        assert!(fault.description.ends_with("ZeroDivisionError: division by zero"));
    }

    #[tokio::test]
    async fn silent_python3_run_shows_empty_output_sentinel() {
        use crate::runtime::config::{DEFAULT_EMPTY_OUTPUT, RuntimeConfig};
        use crate::runtime::loader::InterpreterLoader;
        use crate::runtime::session::{ExecutionRequest, ExecutionResult, ExecutionSession, FailureKind};

        if !python3_available().await {
            eprintln!("python3 not found, skipping");
            return;
        }
        let loader = Arc::new(InterpreterLoader::new(Arc::new(ProcessBackend::new("python3"))));
        let session = ExecutionSession::new(loader, &RuntimeConfig::default());

        let silent = session.execute(&ExecutionRequest::new(0, "x = 1")).await.unwrap();
        assert_eq!(
            silent,
            ExecutionResult::Success {
                output: DEFAULT_EMPTY_OUTPUT.into()
            }
        );
        let failed = session.execute(&ExecutionRequest::new(0, "raise ValueError('no')")).await.unwrap();
        assert_eq!(failed.failure_kind(), Some(FailureKind::ProgramFault));
        assert!(failed.render().contains("ValueError: no"));
    }

    #[tokio::test]
    async fn pump_reassembles_split_utf8() {
        let channel = OutputChannel::new();
        let buffer = crate::runtime::capture::OutputCaptureBuffer::new();
        let binding = channel.acquire(Arc::clone(&buffer)).await.unwrap();
        let bytes = "héllo ✓".as_bytes().to_vec();
        pump(&bytes[..], &channel).await.unwrap();
        binding.release().unwrap();
        assert_eq!(buffer.read(), "héllo ✓");
    }
}
