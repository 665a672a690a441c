//! Per-stream state and the handler-facing body reader / response writer.
//!
//! A `StreamInner` is shared between the connection's dispatch loop (which
//! feeds it incoming DATA and window credit) and the handler worker (which
//! reads the body and writes the response). The writer obeys both flow
//! control windows and the peer's SETTINGS_MAX_FRAME_SIZE, chunking the
//! response body into as many DATA frames as credit allows.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::connection::ConnShared;
use crate::error::{ErrorCode, H2Error, Result};
use crate::frame::Frame;
use crate::headers::Response;
use crate::hpack::Encoder;
use crate::pipe::BodyPipe;
use crate::window::SendWindow;

/// Dispatch-side receive state, touched only by the dispatch thread.
#[derive(Debug)]
pub(crate) struct RecvState {
    /// END_STREAM seen from the peer.
    pub(crate) remote_end: bool,
    /// Remaining stream-level receive window we advertised.
    pub(crate) window: i64,
    /// Declared content-length, if the request carried one.
    pub(crate) content_length: Option<u64>,
    /// Body bytes received so far (payload, padding excluded).
    pub(crate) received: u64,
}

#[derive(Debug)]
pub(crate) struct StreamInner {
    pub(crate) id: u32,
    pub(crate) body: BodyPipe,
    /// Peer-controlled credit for DATA we send on this stream.
    pub(crate) send_window: SendWindow,
    pub(crate) recv: Mutex<RecvState>,
    /// Stream torn down (RST in either direction, or connection death).
    reset: AtomicBool,
    /// We sent END_STREAM.
    local_end: AtomicBool,
}

impl StreamInner {
    pub(crate) fn new(id: u32, send_window: i64, recv_window: i64) -> Self {
        Self {
            id,
            body: BodyPipe::new(),
            send_window: SendWindow::new(send_window),
            recv: Mutex::new(RecvState {
                remote_end: false,
                window: recv_window,
                content_length: None,
                received: 0,
            }),
            reset: AtomicBool::new(false),
            local_end: AtomicBool::new(false),
        }
    }

    /// Tear the stream down: fail the body, unblock the writer. Idempotent.
    pub(crate) fn abort(&self, reason: &str) {
        self.reset.store(true, Ordering::Release);
        self.body.fail(reason);
        self.send_window.wake_all();
    }

    /// Peer finished its half (END_STREAM). Buffered body stays readable.
    pub(crate) fn finish_remote(&self) {
        self.recv.lock().remote_end = true;
        self.body.close();
    }

    pub(crate) fn is_reset(&self) -> bool {
        self.reset.load(Ordering::Acquire)
    }

    pub(crate) fn mark_local_end(&self) {
        self.local_end.store(true, Ordering::Release);
    }

    /// Fully closed: reset, or both directions ended.
    pub(crate) fn is_done(&self) -> bool {
        if self.is_reset() {
            return true;
        }
        self.local_end.load(Ordering::Acquire) && self.recv.lock().remote_end
    }
}

/// Blocking reader over the request body. Returns 0 at end of body; fails
/// if the stream or connection is torn down first.
pub struct BodyReader {
    stream: Arc<StreamInner>,
}

impl BodyReader {
    pub(crate) fn new(stream: Arc<StreamInner>) -> Self {
        Self { stream }
    }
}

impl io::Read for BodyReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.stream.body.read(buf)
    }
}

/// Handler-facing response writer.
///
/// Status and headers may be changed freely until the first body write (or
/// [`finish`](Self::finish)); the response HEADERS frame goes out exactly
/// once, lazily, ahead of the first DATA. Dropping the writer finishes the
/// stream with whatever has been written.
pub struct ResponseWriter {
    stream: Arc<StreamInner>,
    conn: Arc<ConnShared>,
    response: Response,
    headers_sent: bool,
    finished: bool,
}

impl ResponseWriter {
    pub(crate) fn new(stream: Arc<StreamInner>, conn: Arc<ConnShared>) -> Self {
        Self {
            stream,
            conn,
            response: Response::default(),
            headers_sent: false,
            finished: false,
        }
    }

    /// The response under construction. Mutations after the header block has
    /// been sent have no effect.
    pub fn response_mut(&mut self) -> &mut Response {
        &mut self.response
    }

    pub fn status(&mut self, status: u16) {
        self.response.status = status;
    }

    pub fn header(&mut self, name: &str, value: impl Into<String>) {
        self.response.headers.add(name, value);
    }

    /// Send the response HEADERS frame now, without waiting for a body
    /// write. No-op if already sent.
    pub fn send_headers(&mut self) -> Result<()> {
        self.ensure_headers(false)
    }

    /// End the stream. Sends the header block first if it has not gone out
    /// yet (a body-less response carries END_STREAM on HEADERS). Idempotent.
    pub fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        if self.stream.is_reset() {
            self.finished = true;
            return Ok(());
        }
        if self.headers_sent {
            self.conn.send_frame(&Frame::Data {
                stream_id: self.stream.id,
                data: Vec::new(),
                end_stream: true,
                flow_len: 0,
            })?;
        } else {
            self.ensure_headers(true)?;
        }
        self.finished = true;
        self.stream.mark_local_end();
        self.conn.flush()
    }

    fn ensure_headers(&mut self, end_stream: bool) -> Result<()> {
        if self.headers_sent {
            return Ok(());
        }
        let block = Encoder::new().encode(&self.response.to_fields());
        let max = self.conn.remote_max_frame_size();
        let mut frames = Vec::with_capacity(1 + block.len() / max);
        let mut chunks = block.chunks(max.max(1));
        let first = chunks.next().unwrap_or(&[]).to_vec();
        let rest: Vec<&[u8]> = chunks.collect();
        frames.push(Frame::Headers {
            stream_id: self.stream.id,
            fragment: first,
            end_stream,
            end_headers: rest.is_empty(),
            priority: None,
        });
        for (i, chunk) in rest.iter().enumerate() {
            frames.push(Frame::Continuation {
                stream_id: self.stream.id,
                fragment: chunk.to_vec(),
                end_headers: i == rest.len() - 1,
            });
        }
        self.conn.send_frames(&frames)?;
        self.headers_sent = true;
        if end_stream {
            self.stream.mark_local_end();
        }
        Ok(())
    }

    /// Send one window-limited DATA chunk; blocks until some credit is
    /// available on both windows. Returns the number of bytes sent.
    fn send_chunk(&mut self, buf: &[u8]) -> Result<usize> {
        loop {
            if self.conn.is_closed() || self.stream.is_reset() {
                return Err(H2Error::stream(
                    self.stream.id,
                    ErrorCode::Cancel,
                    "stream closed while writing body",
                ));
            }
            let want = buf.len().min(self.conn.remote_max_frame_size());
            // Connection credit first, then stream credit; return whatever
            // the narrower window refuses.
            let conn_granted = self.conn.send_window.reserve(want);
            if conn_granted == 0 {
                self.conn.send_window.wait_for_credit();
                continue;
            }
            let granted = self.stream.send_window.reserve(conn_granted);
            if granted < conn_granted {
                self.conn.send_window.release(conn_granted - granted);
            }
            if granted == 0 {
                self.stream.send_window.wait_for_credit();
                continue;
            }
            self.conn.send_frame(&Frame::Data {
                stream_id: self.stream.id,
                data: buf[..granted].to_vec(),
                end_stream: false,
                flow_len: granted as u32,
            })?;
            return Ok(granted);
        }
    }
}

impl io::Write for ResponseWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.finished {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "response already finished",
            ));
        }
        self.ensure_headers(false)?;
        let mut sent = 0;
        while sent < buf.len() {
            sent += self.send_chunk(&buf[sent..])?;
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.conn.flush()?;
        Ok(())
    }
}

impl Drop for ResponseWriter {
    fn drop(&mut self) {
        // Best-effort END_STREAM; a dead connection makes this a no-op.
        let _ = self.finish();
    }
}
