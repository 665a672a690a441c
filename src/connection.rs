//! The per-connection dispatch loop.
//!
//! One thread per connection runs [`Connection::run`]: it validates the
//! preface, announces local settings, then reads and dispatches one frame at
//! a time. Control frames (SETTINGS, PING, GOAWAY, stream-0 WINDOW_UPDATE)
//! are handled inline; HEADERS/CONTINUATION fragments are reassembled into
//! complete header blocks before HPACK decoding; DATA is routed to the
//! addressed stream's body pipe. Handlers run on workers supplied by an
//! external [`Executor`](crate::Executor); everything they write goes
//! through the shared [`ConnShared`] writer lock so frames never interleave
//! on the wire.

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::Config;
use crate::error::{ErrorCode, H2Error, Result};
use crate::frame::{Frame, FrameHeader, MAX_FRAME_SIZE};
use crate::headers::{HeaderFields, Request};
use crate::hpack::Decoder;
use crate::settings::{
    Settings, SETTINGS_INITIAL_WINDOW_SIZE, SETTINGS_MAX_CONCURRENT_STREAMS,
    SETTINGS_MAX_FRAME_SIZE,
};
use crate::stats::Stats;
use crate::stream::{BodyReader, ResponseWriter, StreamInner};
use crate::window::SendWindow;
use crate::{Executor, StreamHandler};

/// The full client connection preface (RFC 7540 Section 3.5).
pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Trailing half of the preface, all that remains when an HTTP/1.1 upgrade
/// path already consumed the request-line-shaped first half.
const PREFACE_TAIL: &[u8] = b"SM\r\n\r\n";

/// Cap on a reassembled header block, against CONTINUATION floods.
const MAX_HEADER_BLOCK_SIZE: usize = 256 * 1024;

/// Replenish the connection receive window once it drops below this
/// fraction of the configured size.
const REPLENISH_THRESHOLD: i64 = 10;

/// State shared between the dispatch loop and handler workers: the writer
/// lock, the peer-controlled connection send window, and the remote
/// settings table.
pub(crate) struct ConnShared {
    writer: Mutex<Box<dyn io::Write + Send>>,
    flush_delay: bool,
    /// Connection-level credit for DATA we send, fed by stream-0
    /// WINDOW_UPDATE.
    pub(crate) send_window: SendWindow,
    pub(crate) remote: Mutex<Settings>,
    closed: AtomicBool,
    pub(crate) stats: Arc<Stats>,
}

impl ConnShared {
    pub(crate) fn new(writer: Box<dyn io::Write + Send>, config: &Config) -> Self {
        Self {
            writer: Mutex::new(writer),
            flush_delay: config.flush_delay,
            send_window: SendWindow::default(),
            remote: Mutex::new(Settings::default()),
            closed: AtomicBool::new(false),
            stats: Arc::new(Stats::new()),
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Mark the connection dead and wake anyone parked on its windows.
    pub(crate) fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.send_window.wake_all();
    }

    pub(crate) fn remote_max_frame_size(&self) -> usize {
        self.remote.lock().max_frame_size as usize
    }

    pub(crate) fn send_frame(&self, frame: &Frame) -> Result<()> {
        self.send_frames(std::slice::from_ref(frame))
    }

    /// Write a batch of frames back to back under one lock acquisition
    /// (header blocks must stay contiguous on the wire).
    pub(crate) fn send_frames(&self, frames: &[Frame]) -> Result<()> {
        if self.is_closed() {
            return Err(H2Error::Io(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "connection closed",
            )));
        }
        let mut writer = self.writer.lock();
        for frame in frames {
            let bytes = frame.encode();
            writer.write_all(&bytes)?;
            self.stats.record_frame_sent(bytes.len());
        }
        if !self.flush_delay {
            writer.flush()?;
            self.stats.record_flush();
        }
        Ok(())
    }

    pub(crate) fn flush(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.writer.lock().flush()?;
        self.stats.record_flush();
        Ok(())
    }
}

/// A header block under reassembly (HEADERS seen, END_HEADERS not yet).
struct PendingBlock {
    stream_id: u32,
    end_stream: bool,
    /// Block addressed to an existing stream, i.e. trailers.
    trailers: bool,
    buf: Vec<u8>,
}

enum Control {
    Continue,
    /// Peer sent GOAWAY; drain and stop.
    Shutdown,
}

/// A server-side HTTP/2 connection over a duplex byte stream.
pub struct Connection<R: io::Read> {
    reader: R,
    shared: Arc<ConnShared>,
    config: Config,
    handler: Arc<dyn StreamHandler>,
    executor: Arc<dyn Executor>,

    streams: HashMap<u32, Arc<StreamInner>>,
    last_seen_stream_id: u32,
    /// Peer acknowledged our SETTINGS; max_concurrent_streams binds only
    /// from this point on.
    local_settings_acked: bool,
    /// Connection-level receive window we advertised, replenished eagerly.
    recv_window: i64,
    decoder: Decoder,
    pending_block: Option<PendingBlock>,
    goaway_sent: bool,
}

impl<R: io::Read> Connection<R> {
    pub fn new(
        reader: R,
        writer: Box<dyn io::Write + Send>,
        handler: Arc<dyn StreamHandler>,
        executor: Arc<dyn Executor>,
        config: Config,
    ) -> Self {
        let shared = Arc::new(ConnShared::new(writer, &config));
        Self {
            reader,
            shared,
            config,
            handler,
            executor,
            streams: HashMap::new(),
            last_seen_stream_id: 0,
            local_settings_acked: false,
            recv_window: 65535,
            decoder: Decoder::new(),
            pending_block: None,
            goaway_sent: false,
        }
    }

    /// Advisory connection counters.
    pub fn stats(&self) -> Arc<Stats> {
        Arc::clone(&self.shared.stats)
    }

    /// Run the connection to completion: preface, local SETTINGS, then the
    /// dispatch loop until the peer disconnects, sends GOAWAY, or a
    /// connection-fatal error occurs.
    pub fn run(mut self) -> Result<()> {
        if let Err(err) = self.expect_preface() {
            self.teardown();
            return Err(err);
        }
        if let Err(err) = self.announce_settings() {
            self.teardown();
            return Err(err);
        }
        loop {
            let frame = match self.read_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!("peer closed the connection");
                    self.teardown();
                    return Ok(());
                }
                Err(err) => {
                    self.fail_connection(&err);
                    return Err(err);
                }
            };
            trace!(?frame, "dispatch");
            match self.dispatch(frame) {
                Ok(Control::Continue) => {}
                Ok(Control::Shutdown) => {
                    self.teardown();
                    return Ok(());
                }
                Err(H2Error::Stream { id, code, message }) => {
                    debug!(stream = id, ?code, %message, "resetting stream");
                    self.close_stream(id, &message);
                    let rst = Frame::RstStream {
                        stream_id: id,
                        error_code: code,
                    };
                    if let Err(err) = self.shared.send_frame(&rst) {
                        self.teardown();
                        return Err(err);
                    }
                }
                Err(err) => {
                    self.fail_connection(&err);
                    return Err(err);
                }
            }
        }
    }

    /// Accept the full 24-byte preface, or just its trailing `SM\r\n\r\n`
    /// when an upgrade path already consumed the first half.
    fn expect_preface(&mut self) -> Result<()> {
        let mut head = [0u8; PREFACE_TAIL.len()];
        self.reader.read_exact(&mut head)?;
        if head == PREFACE_TAIL {
            return Ok(());
        }
        if head != PREFACE[..PREFACE_TAIL.len()] {
            return Err(H2Error::connection(
                ErrorCode::ProtocolError,
                "invalid connection preface",
            ));
        }
        let mut rest = vec![0u8; PREFACE.len() - PREFACE_TAIL.len()];
        self.reader.read_exact(&mut rest)?;
        if rest != PREFACE[PREFACE_TAIL.len()..] {
            return Err(H2Error::connection(
                ErrorCode::ProtocolError,
                "invalid connection preface",
            ));
        }
        Ok(())
    }

    /// Send the initial SETTINGS frame, plus a stream-0 WINDOW_UPDATE when
    /// the configured connection window exceeds the implicit 65535.
    fn announce_settings(&mut self) -> Result<()> {
        let mut params = vec![
            (SETTINGS_MAX_FRAME_SIZE, self.config.max_frame_size),
            (SETTINGS_INITIAL_WINDOW_SIZE, self.config.initial_window_size),
        ];
        if let Some(limit) = self.config.max_concurrent_streams {
            params.push((SETTINGS_MAX_CONCURRENT_STREAMS, limit));
        }
        self.shared.send_frame(&Frame::Settings { ack: false, params })?;
        let configured = i64::from(self.config.connection_window_size);
        if configured > self.recv_window {
            let increment = (configured - self.recv_window) as u32;
            self.shared.send_frame(&Frame::WindowUpdate {
                stream_id: 0,
                increment,
            })?;
            self.recv_window = configured;
        }
        Ok(())
    }

    /// Read one frame. `Ok(None)` means the peer closed cleanly between
    /// frames; EOF inside a frame is an error.
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        let mut header = [0u8; 9];
        let mut filled = 0;
        while filled < header.len() {
            let n = self.reader.read(&mut header[filled..])?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(H2Error::connection(
                    ErrorCode::ProtocolError,
                    "connection closed inside a frame header",
                ));
            }
            filled += n;
        }
        let header = match FrameHeader::parse(&header) {
            Some(header) => header,
            None => {
                return Err(H2Error::connection(
                    ErrorCode::ProtocolError,
                    "malformed frame header",
                ))
            }
        };
        if header.length as usize > MAX_FRAME_SIZE {
            return Err(H2Error::connection(
                ErrorCode::FrameSizeError,
                format!("frame body {} exceeds {MAX_FRAME_SIZE}", header.length),
            ));
        }
        let mut payload = vec![0u8; header.length as usize];
        self.reader.read_exact(&mut payload)?;
        Frame::decode(&header, payload).map(Some)
    }

    fn dispatch(&mut self, frame: Frame) -> Result<Control> {
        // Streams whose handler finished after the peer's half-close would
        // otherwise linger in the registry for the connection's lifetime.
        self.streams.retain(|_, s| !s.is_done());

        // A header block in flight admits nothing but its own CONTINUATION.
        if let Some(block) = &self.pending_block {
            match &frame {
                Frame::Continuation { stream_id, .. } if *stream_id == block.stream_id => {}
                _ => {
                    return Err(H2Error::connection(
                        ErrorCode::ProtocolError,
                        "frame interleaved inside a header block",
                    ));
                }
            }
        }
        match frame {
            Frame::Settings { ack, params } => {
                self.on_settings(ack, params)?;
            }
            Frame::Ping { ack, payload } => {
                if !ack {
                    self.shared.send_frame(&Frame::Ping { ack: true, payload })?;
                    self.shared.stats.record_ping_sent();
                }
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                ..
            } => {
                if error_code != ErrorCode::NoError {
                    warn!(?error_code, last_stream_id, "peer sent GOAWAY");
                }
                return Ok(Control::Shutdown);
            }
            Frame::WindowUpdate { stream_id: 0, increment } => {
                self.shared.send_window.increase(increment)?;
            }
            Frame::WindowUpdate { stream_id, increment } => {
                self.check_client_stream_id(stream_id)?;
                match self.streams.get(&stream_id) {
                    Some(stream) => {
                        // Overflow on one stream's window resets only that
                        // stream.
                        if stream.send_window.increase(increment).is_err() {
                            return Err(H2Error::stream(
                                stream_id,
                                ErrorCode::FlowControlError,
                                "stream send window overflow",
                            ));
                        }
                    }
                    None if stream_id <= self.last_seen_stream_id => {}
                    None => {
                        return Err(H2Error::connection(
                            ErrorCode::ProtocolError,
                            "WINDOW_UPDATE for a stream that never existed",
                        ));
                    }
                }
            }
            Frame::RstStream { stream_id, error_code } => {
                self.check_client_stream_id(stream_id)?;
                match self.streams.remove(&stream_id) {
                    Some(stream) => {
                        debug!(stream = stream_id, ?error_code, "peer reset stream");
                        stream.abort("stream reset by peer");
                    }
                    None if stream_id <= self.last_seen_stream_id => {}
                    None => {
                        return Err(H2Error::connection(
                            ErrorCode::ProtocolError,
                            "RST_STREAM for a stream that never existed",
                        ));
                    }
                }
            }
            Frame::PushPromise { .. } => {
                return Err(H2Error::connection(
                    ErrorCode::ProtocolError,
                    "clients cannot push",
                ));
            }
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
                ..
            } => {
                self.check_client_stream_id(stream_id)?;
                let trailers = self.streams.contains_key(&stream_id);
                let block = PendingBlock {
                    stream_id,
                    end_stream,
                    trailers,
                    buf: fragment,
                };
                if end_headers {
                    self.finish_header_block(block)?;
                } else {
                    self.pending_block = Some(block);
                }
            }
            Frame::Continuation {
                stream_id,
                fragment,
                end_headers,
            } => {
                let mut block = match self.pending_block.take() {
                    Some(block) if block.stream_id == stream_id => block,
                    _ => {
                        return Err(H2Error::connection(
                            ErrorCode::ProtocolError,
                            "CONTINUATION without an open header block",
                        ));
                    }
                };
                if block.buf.len() + fragment.len() > MAX_HEADER_BLOCK_SIZE {
                    return Err(H2Error::connection(
                        ErrorCode::CompressionError,
                        "header block too large",
                    ));
                }
                block.buf.extend_from_slice(&fragment);
                if end_headers {
                    self.finish_header_block(block)?;
                } else {
                    self.pending_block = Some(block);
                }
            }
            Frame::Data {
                stream_id,
                data,
                end_stream,
                flow_len,
            } => {
                self.check_client_stream_id(stream_id)?;
                self.on_data(stream_id, data, end_stream, flow_len)?;
            }
            // Parsed, semantically ignored.
            Frame::Priority { .. } | Frame::Unknown { .. } => {}
        }
        Ok(Control::Continue)
    }

    fn on_settings(&mut self, ack: bool, params: Vec<(u16, u32)>) -> Result<()> {
        if ack {
            self.local_settings_acked = true;
            debug!("local SETTINGS acknowledged");
            return Ok(());
        }
        let delta = {
            let mut remote = self.shared.remote.lock();
            let old_initial = i64::from(remote.initial_window_size);
            remote.apply(&params)?;
            i64::from(remote.initial_window_size) - old_initial
        };
        // A changed INITIAL_WINDOW_SIZE retroactively moves every open
        // stream's send window by the delta.
        if delta != 0 {
            for stream in self.streams.values() {
                stream.send_window.adjust(delta)?;
            }
        }
        self.shared.send_frame(&Frame::Settings {
            ack: true,
            params: Vec::new(),
        })
    }

    fn on_data(
        &mut self,
        stream_id: u32,
        data: Vec<u8>,
        end_stream: bool,
        flow_len: u32,
    ) -> Result<()> {
        // Connection-level accounting happens whether or not the stream
        // exists; the bytes were sent either way.
        self.recv_window -= i64::from(flow_len);
        if self.recv_window < 0 {
            return Err(H2Error::connection(
                ErrorCode::FlowControlError,
                "connection receive window exceeded",
            ));
        }
        let configured = i64::from(self.config.connection_window_size);
        if self.recv_window < configured / REPLENISH_THRESHOLD {
            let increment = (configured - self.recv_window) as u32;
            self.shared.send_frame(&Frame::WindowUpdate {
                stream_id: 0,
                increment,
            })?;
            self.recv_window = configured;
        }

        let stream = match self.streams.get(&stream_id) {
            Some(stream) => Arc::clone(stream),
            None if stream_id <= self.last_seen_stream_id => {
                return Err(H2Error::stream(
                    stream_id,
                    ErrorCode::StreamClosed,
                    "DATA on a closed stream",
                ));
            }
            None => {
                return Err(H2Error::connection(
                    ErrorCode::ProtocolError,
                    "DATA on a stream that never existed",
                ));
            }
        };

        {
            let mut recv = stream.recv.lock();
            if recv.remote_end {
                return Err(H2Error::stream(
                    stream_id,
                    ErrorCode::StreamClosed,
                    "DATA after END_STREAM",
                ));
            }
            recv.window -= i64::from(flow_len);
            if recv.window < 0 {
                return Err(H2Error::stream(
                    stream_id,
                    ErrorCode::FlowControlError,
                    "stream receive window exceeded",
                ));
            }
            recv.received += data.len() as u64;
            if let Some(declared) = recv.content_length {
                if recv.received > declared {
                    return Err(H2Error::stream(
                        stream_id,
                        ErrorCode::ProtocolError,
                        "body longer than declared content-length",
                    ));
                }
            }
            // Echo the consumed credit right back; the pipe buffers, so the
            // advertised window never actually shrinks for long.
            if flow_len > 0 {
                recv.window += i64::from(flow_len);
            }
        }
        if flow_len > 0 {
            self.shared.send_frame(&Frame::WindowUpdate {
                stream_id,
                increment: flow_len,
            })?;
        }

        stream.body.push(&data);
        if end_stream {
            self.finish_remote(&stream)?;
        }
        Ok(())
    }

    /// Complete header block: HPACK-decode first (the dynamic table must
    /// stay consistent even for blocks we end up rejecting), then route.
    fn finish_header_block(&mut self, block: PendingBlock) -> Result<()> {
        let fields = self.decoder.decode(&block.buf)?;

        if block.trailers {
            // Decoded and discarded; only the stream lifecycle effect
            // remains.
            let stream = match self.streams.get(&block.stream_id) {
                Some(stream) => Arc::clone(stream),
                None => {
                    return Err(H2Error::stream(
                        block.stream_id,
                        ErrorCode::StreamClosed,
                        "trailers on a closed stream",
                    ));
                }
            };
            if stream.recv.lock().remote_end {
                return Err(H2Error::stream(
                    block.stream_id,
                    ErrorCode::StreamClosed,
                    "trailers after END_STREAM",
                ));
            }
            if !block.end_stream {
                return Err(H2Error::stream(
                    block.stream_id,
                    ErrorCode::ProtocolError,
                    "trailers must carry END_STREAM",
                ));
            }
            self.finish_remote(&stream)?;
            return Ok(());
        }

        if block.stream_id <= self.last_seen_stream_id {
            return Err(H2Error::stream(
                block.stream_id,
                ErrorCode::StreamClosed,
                "stream id not strictly increasing",
            ));
        }
        self.last_seen_stream_id = block.stream_id;

        let mut header_fields = HeaderFields::new();
        for field in fields {
            header_fields.push(block.stream_id, field)?;
        }
        let fields = header_fields.finish(block.stream_id)?;
        let request = Request::from_fields(&fields);

        if self.local_settings_acked {
            if let Some(limit) = self.config.max_concurrent_streams {
                if self.streams.len() as u32 >= limit {
                    return Err(H2Error::stream(
                        block.stream_id,
                        ErrorCode::RefusedStream,
                        "max concurrent streams exceeded",
                    ));
                }
            }
        }

        let stream = Arc::new(StreamInner::new(
            block.stream_id,
            i64::from(self.shared.remote.lock().initial_window_size),
            i64::from(self.config.initial_window_size),
        ));
        stream.recv.lock().content_length = request.content_length();
        self.streams.insert(block.stream_id, Arc::clone(&stream));
        self.shared.stats.record_stream_opened();
        debug!(stream = block.stream_id, method = %request.method, path = %request.path, "stream opened");

        if block.end_stream {
            self.finish_remote(&stream)?;
        }

        let handler = Arc::clone(&self.handler);
        let conn = Arc::clone(&self.shared);
        let reader = BodyReader::new(Arc::clone(&stream));
        let writer = ResponseWriter::new(stream, conn);
        self.executor.execute(Box::new(move || {
            handler.handle(request, reader, writer);
        }));
        Ok(())
    }

    /// Peer half-closed: verify content-length, close the body pipe, drop
    /// the registry entry once both sides are done.
    fn finish_remote(&mut self, stream: &Arc<StreamInner>) -> Result<()> {
        let (declared, received) = {
            let recv = stream.recv.lock();
            (recv.content_length, recv.received)
        };
        if let Some(declared) = declared {
            if declared != received {
                return Err(H2Error::stream(
                    stream.id,
                    ErrorCode::ProtocolError,
                    format!("content-length {declared} but received {received}"),
                ));
            }
        }
        stream.finish_remote();
        if stream.is_done() {
            self.streams.remove(&stream.id);
        }
        Ok(())
    }

    /// Client-initiated stream ids are odd and nonzero.
    fn check_client_stream_id(&self, stream_id: u32) -> Result<()> {
        if stream_id == 0 || stream_id % 2 == 0 {
            return Err(H2Error::connection(
                ErrorCode::ProtocolError,
                format!("invalid client stream id {stream_id}"),
            ));
        }
        Ok(())
    }

    fn close_stream(&mut self, stream_id: u32, reason: &str) {
        if let Some(stream) = self.streams.remove(&stream_id) {
            stream.abort(reason);
        }
    }

    /// Connection-fatal path: GOAWAY (when the socket is still usable),
    /// then tear everything down.
    fn fail_connection(&mut self, err: &H2Error) {
        warn!(%err, "connection failed");
        if !self.goaway_sent && !matches!(err, H2Error::Io(_)) {
            self.goaway_sent = true;
            let _ = self.shared.send_frame(&Frame::GoAway {
                last_stream_id: self.last_seen_stream_id,
                error_code: err.code(),
                debug_data: err.to_string().into_bytes(),
            });
        }
        self.teardown();
    }

    fn teardown(&mut self) {
        let _ = self.shared.flush();
        self.shared.close();
        for (_, stream) in self.streams.drain() {
            stream.abort("connection closed");
        }
    }
}

impl<R: io::Read> Drop for Connection<R> {
    fn drop(&mut self) {
        self.teardown();
    }
}
