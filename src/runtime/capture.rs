//! Output capture: per-run buffers and the interpreter's redirectable channel
//!
//! An interpreter owns exactly one [`OutputChannel`]. Each execution binds a
//! fresh [`OutputCaptureBuffer`] to it through [`OutputChannel::acquire`],
//! which also takes the channel's execution lock. Bind, invoke and unbind
//! therefore happen under a single owner, and two sessions can never have
//! output bound at the same time. The returned [`ChannelBinding`] restores
//! the previous sink on every exit path, including panics and dropped
//! futures.

use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

use super::error::BindingError;

/// Anything the interpreter's output channel can forward text into.
pub trait OutputSink: Send + Sync {
    /// Append a chunk of program output.
    fn append(&self, text: &str);
}

#[derive(Debug, Default)]
struct BufferState {
    text: String,
    sealed: bool,
}

/// Append-only text accumulator scoped to one execution.
#[derive(Debug, Default)]
pub struct OutputCaptureBuffer {
    state: Mutex<BufferState>,
}

impl OutputCaptureBuffer {
    /// Fresh, unsealed buffer.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append text. Writes after [`seal`](Self::seal) are discarded.
    pub fn append(&self, text: &str) {
        let mut state = self.state.lock();
        if state.sealed {
            debug!(bytes = text.len(), "discarding write to sealed capture buffer");
            return;
        }
        state.text.push_str(text);
    }

    /// Everything appended so far.
    pub fn read(&self) -> String {
        self.state.lock().text.clone()
    }

    /// Freeze the buffer and return its final contents.
    pub fn seal(&self) -> String {
        let mut state = self.state.lock();
        state.sealed = true;
        state.text.clone()
    }

    /// Whether the buffer has been sealed.
    pub fn is_sealed(&self) -> bool {
        self.state.lock().sealed
    }

    /// Whether nothing has been appended.
    pub fn is_empty(&self) -> bool {
        self.state.lock().text.is_empty()
    }
}

impl OutputSink for OutputCaptureBuffer {
    fn append(&self, text: &str) {
        OutputCaptureBuffer::append(self, text);
    }
}

/// The interpreter's standard output, redirectable per execution.
pub struct OutputChannel {
    sink: Mutex<Option<Arc<dyn OutputSink>>>,
    exec: tokio::sync::Mutex<()>,
}

impl Default for OutputChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OutputChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputChannel")
            .field("bound", &self.is_bound())
            .finish()
    }
}

impl OutputChannel {
    /// Unbound channel.
    pub fn new() -> Self {
        Self {
            sink: Mutex::new(None),
            exec: tokio::sync::Mutex::new(()),
        }
    }

    /// Forward program output to the bound sink, if any.
    pub fn write(&self, text: &str) {
        let sink = self.sink.lock().clone();
        match sink {
            Some(sink) => sink.append(text),
            None => trace!(bytes = text.len(), "dropping output on unbound channel"),
        }
    }

    /// Whether a sink is currently bound.
    pub fn is_bound(&self) -> bool {
        self.sink.lock().is_some()
    }

    /// Bind `buffer` for the duration of one execution.
    ///
    /// Waits for any other execution on this channel to release it first.
    pub async fn acquire(
        &self,
        buffer: Arc<OutputCaptureBuffer>,
    ) -> Result<ChannelBinding<'_>, BindingError> {
        if buffer.is_sealed() {
            return Err(BindingError::SealedBuffer);
        }
        let guard = self.exec.lock().await;
        let sink: Arc<dyn OutputSink> = buffer;
        let previous = self.sink.lock().replace(Arc::clone(&sink));
        trace!("output channel bound");
        Ok(ChannelBinding {
            channel: self,
            sink,
            previous: Some(previous),
            _exclusive: guard,
        })
    }

    fn restore(&self, previous: Option<Arc<dyn OutputSink>>) -> Option<Arc<dyn OutputSink>> {
        std::mem::replace(&mut *self.sink.lock(), previous)
    }
}

/// Scoped ownership of an [`OutputChannel`].
///
/// Dropping the binding unbinds the channel; [`release`](Self::release) does
/// the same and also reports whether someone rebound the channel meanwhile.
pub struct ChannelBinding<'a> {
    channel: &'a OutputChannel,
    sink: Arc<dyn OutputSink>,
    previous: Option<Option<Arc<dyn OutputSink>>>,
    _exclusive: tokio::sync::MutexGuard<'a, ()>,
}

impl ChannelBinding<'_> {
    /// Unbind, restoring whatever was bound before.
    pub fn release(mut self) -> Result<(), BindingError> {
        let previous = self.previous.take().unwrap_or_default();
        let displaced = self.channel.restore(previous);
        trace!("output channel released");
        match displaced {
            Some(current) if std::ptr::addr_eq(Arc::as_ptr(&current), Arc::as_ptr(&self.sink)) => {
                Ok(())
            }
            _ => Err(BindingError::Rebound),
        }
    }
}

impl Drop for ChannelBinding<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            self.channel.restore(previous);
            debug!("output channel unbound by drop");
        }
    }
}
