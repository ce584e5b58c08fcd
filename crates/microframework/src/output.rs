//! Explicit output capture
//!
//! Application code never writes to the transport directly. Anything it
//! prints goes into an [`OutputBuffer`], which keeps a stack of capture
//! frames. Opening a [`CaptureScope`] pushes a frame; the scope must then be
//! released exactly once, by taking, discarding or flushing its contents.
//!
//! The supervisor opens the bottom frame before the application runs and
//! unwinds the whole stack afterwards. Any bytes found at that point were
//! written outside a balanced scope and fail the request.

use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::error::{FrameworkError, Result};

#[derive(Debug)]
struct Frame {
    id: u64,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct State {
    frames: Vec<Frame>,
    /// Bytes written while no frame was open
    stray: Vec<u8>,
    next_id: u64,
}

impl State {
    fn top_mut(&mut self) -> &mut Vec<u8> {
        match self.frames.last_mut() {
            Some(frame) => &mut frame.bytes,
            None => &mut self.stray,
        }
    }

    fn pop(&mut self, id: u64) -> Result<Vec<u8>> {
        match self.frames.last() {
            Some(frame) if frame.id == id => {}
            Some(_) if self.frames.iter().any(|f| f.id == id) => {
                return Err(FrameworkError::output_integrity(
                    "Capture scope released while an inner scope is still open",
                ));
            }
            _ => {
                return Err(FrameworkError::output_integrity(
                    "Capture scope was already closed",
                ));
            }
        }
        Ok(self.frames.pop().map(|f| f.bytes).unwrap_or_default())
    }
}

/// Shared handle to the output of one invocation.
///
/// Cloning is cheap; all clones write to the same stack.
#[derive(Debug, Clone, Default)]
pub struct OutputBuffer {
    state: Arc<Mutex<State>>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Open a new capture scope on top of the stack.
    pub fn begin_capture(&self) -> CaptureScope {
        let mut state = self.lock();
        let id = state.next_id;
        state.next_id += 1;
        state.frames.push(Frame {
            id,
            bytes: Vec::new(),
        });
        CaptureScope {
            buffer: self.clone(),
            id,
        }
    }

    /// Write bytes into the innermost open scope.
    pub fn write_bytes(&self, bytes: &[u8]) {
        self.lock().top_mut().extend_from_slice(bytes);
    }

    /// Write text into the innermost open scope.
    pub fn echo(&self, text: &str) {
        self.write_bytes(text.as_bytes());
    }

    /// Number of open capture scopes.
    pub fn level(&self) -> usize {
        self.lock().frames.len()
    }

    /// Close every open scope, innermost first, returning what each held.
    ///
    /// Bytes written while no scope was open come last.
    pub(crate) fn unwind(&self) -> Vec<Vec<u8>> {
        let mut state = self.lock();
        let mut contents: Vec<Vec<u8>> = state.frames.drain(..).rev().map(|f| f.bytes).collect();
        contents.push(std::mem::take(&mut state.stray));
        contents
    }
}

impl io::Write for OutputBuffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.write_bytes(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// One open capture frame.
///
/// Dropping a scope without releasing it leaves the frame open, which the
/// supervisor treats as unbalanced output.
#[derive(Debug)]
#[must_use = "a capture scope must be released with take, discard or flush"]
pub struct CaptureScope {
    buffer: OutputBuffer,
    id: u64,
}

impl CaptureScope {
    /// Copy of what this scope has captured so far.
    pub fn contents(&self) -> Vec<u8> {
        self.buffer
            .lock()
            .frames
            .iter()
            .find(|f| f.id == self.id)
            .map(|f| f.bytes.clone())
            .unwrap_or_default()
    }

    /// Close the scope and return its contents.
    pub fn take(self) -> Result<Vec<u8>> {
        self.buffer.lock().pop(self.id)
    }

    /// Close the scope and return its contents as text.
    pub fn take_string(self) -> Result<String> {
        self.take()
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Close the scope, dropping its contents.
    pub fn discard(self) -> Result<()> {
        self.take().map(|_| ())
    }

    /// Close the scope, passing its contents on to the enclosing scope.
    ///
    /// Returns the flushed contents.
    pub fn flush(self) -> Result<Vec<u8>> {
        let mut state = self.buffer.lock();
        let bytes = state.pop(self.id)?;
        state.top_mut().extend_from_slice(&bytes);
        Ok(bytes)
    }
}
