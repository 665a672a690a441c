//! Bounded blocking byte pipe between the dispatch loop and a handler.
//!
//! The dispatch loop pushes incoming DATA payloads; the handler's
//! [`BodyReader`](crate::stream::BodyReader) drains them. Capacity is the
//! stream's receive window, so a well-behaved peer never blocks the
//! dispatch thread on `push`.

use std::collections::VecDeque;
use std::io;

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct PipeState {
    buf: VecDeque<u8>,
    /// Set once END_STREAM arrives; readers drain the remainder then see EOF.
    closed: bool,
    /// A stream or connection error; readers see it instead of EOF.
    failed: Option<String>,
}

/// One-directional byte channel with blocking reads.
#[derive(Debug)]
pub struct BodyPipe {
    state: Mutex<PipeState>,
    readable: Condvar,
}

impl BodyPipe {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(PipeState::default()),
            readable: Condvar::new(),
        }
    }

    /// Append a DATA payload. Pushing after close is ignored (the stream was
    /// already reset from the reader's point of view).
    pub fn push(&self, data: &[u8]) {
        let mut state = self.state.lock();
        if state.closed || state.failed.is_some() {
            return;
        }
        state.buf.extend(data);
        drop(state);
        self.readable.notify_all();
    }

    /// Mark end of body. Buffered bytes remain readable.
    pub fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        drop(state);
        self.readable.notify_all();
    }

    /// Abort the body with an error. Buffered bytes are dropped; the next
    /// read fails.
    pub fn fail(&self, reason: impl Into<String>) {
        let mut state = self.state.lock();
        if state.failed.is_none() {
            state.failed = Some(reason.into());
        }
        state.buf.clear();
        drop(state);
        self.readable.notify_all();
    }

    /// Blocking read into `out`. Returns 0 only at end of body.
    pub fn read(&self, out: &mut [u8]) -> io::Result<usize> {
        if out.is_empty() {
            return Ok(0);
        }
        let mut state = self.state.lock();
        loop {
            if let Some(reason) = &state.failed {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, reason.clone()));
            }
            if !state.buf.is_empty() {
                let n = out.len().min(state.buf.len());
                for slot in out.iter_mut().take(n) {
                    // Cannot be empty: n <= buf.len().
                    match state.buf.pop_front() {
                        Some(b) => *slot = b,
                        None => break,
                    }
                }
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
            self.readable.wait(&mut state);
        }
    }

    /// Bytes currently buffered and unread.
    pub fn buffered(&self) -> usize {
        self.state.lock().buf.len()
    }
}

impl Default for BodyPipe {
    fn default() -> Self {
        Self::new()
    }
}
