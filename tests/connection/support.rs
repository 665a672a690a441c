//! Scripted in-memory transport for connection scenarios.
//!
//! A test builds the client's byte script up front, starts the connection
//! on its own thread, polls the captured output for the frames it expects,
//! then releases the reader (EOF) and joins.

use std::io;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use h2_embed::frame::{Frame, FrameHeader};
use h2_embed::hpack::{Decoder, Encoder, HeaderField};
use h2_embed::{Config, Connection, Executor, StreamHandler, PREFACE};

/// Client-side byte script, starting with the connection preface.
pub struct Script {
    bytes: Vec<u8>,
}

impl Script {
    pub fn new() -> Self {
        Self {
            bytes: PREFACE.to_vec(),
        }
    }

    /// Start from raw bytes instead of the preface.
    pub fn raw(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    pub fn frame(mut self, frame: Frame) -> Self {
        self.bytes.extend_from_slice(&frame.encode());
        self
    }

    /// HEADERS frame carrying an HPACK-encoded request, END_HEADERS set.
    pub fn request(self, stream_id: u32, headers: &[(&str, &str)], end_stream: bool) -> Self {
        self.frame(Frame::Headers {
            stream_id,
            fragment: encode_block(headers),
            end_stream,
            end_headers: true,
            priority: None,
        })
    }

    pub fn data(self, stream_id: u32, data: &[u8], end_stream: bool) -> Self {
        self.frame(Frame::Data {
            stream_id,
            data: data.to_vec(),
            end_stream,
            flow_len: data.len() as u32,
        })
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// HPACK-encode a header list (literal without indexing, fine for scripts).
pub fn encode_block(headers: &[(&str, &str)]) -> Vec<u8> {
    let fields: Vec<HeaderField> = headers
        .iter()
        .map(|(n, v)| HeaderField::new(n.as_bytes().to_vec(), v.as_bytes().to_vec()))
        .collect();
    Encoder::new().encode(&fields)
}

pub fn get_headers(path: &str) -> Vec<(&str, &str)> {
    vec![(":method", "GET"), (":path", path), (":scheme", "http")]
}

/// Reader that serves the script, then blocks until the test drops the
/// gate, then reports EOF.
struct GatedReader {
    script: Vec<u8>,
    pos: usize,
    gate: mpsc::Receiver<()>,
}

impl io::Read for GatedReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.pos < self.script.len() {
            let n = buf.len().min(self.script.len() - self.pos);
            buf[..n].copy_from_slice(&self.script[self.pos..self.pos + n]);
            self.pos += n;
            return Ok(n);
        }
        // Park until the test is done asserting, then EOF.
        let _ = self.gate.recv();
        Ok(0)
    }
}

/// Captures everything the server writes.
#[derive(Clone, Default)]
pub struct Output {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for Output {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.buf.lock().extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Parse captured output into frames. Panics on trailing garbage.
pub fn parse_frames(bytes: &[u8]) -> Vec<Frame> {
    let mut frames = Vec::new();
    let mut pos = 0;
    while pos + 9 <= bytes.len() {
        let header = FrameHeader::parse(&bytes[pos..pos + 9]).unwrap();
        let end = pos + 9 + header.length as usize;
        assert!(end <= bytes.len(), "truncated frame in output");
        frames.push(Frame::decode(&header, bytes[pos + 9..end].to_vec()).unwrap());
        pos = end;
    }
    assert_eq!(pos, bytes.len(), "trailing bytes in output");
    frames
}

/// Decode a response header block (the engine encodes statelessly, so a
/// fresh decoder per block is fine).
pub fn decode_block(fragment: &[u8]) -> Vec<(String, String)> {
    Decoder::new()
        .decode(fragment)
        .unwrap()
        .into_iter()
        .map(|f| {
            (
                String::from_utf8(f.name).unwrap(),
                String::from_utf8(f.value).unwrap(),
            )
        })
        .collect()
}

pub struct Server {
    output: Output,
    gate: Option<mpsc::Sender<()>>,
    thread: JoinHandle<h2_embed::Result<()>>,
}

impl Server {
    pub fn start(
        script: Vec<u8>,
        config: Config,
        handler: Arc<dyn StreamHandler>,
        executor: Arc<dyn Executor>,
    ) -> Self {
        let (gate, rx) = mpsc::channel();
        let reader = GatedReader {
            script,
            pos: 0,
            gate: rx,
        };
        let output = Output::default();
        let writer = output.clone();
        let thread = std::thread::spawn(move || {
            Connection::new(reader, Box::new(writer), handler, executor, config).run()
        });
        Self {
            output,
            gate: Some(gate),
            thread,
        }
    }

    pub fn frames(&self) -> Vec<Frame> {
        parse_frames(&self.output.buf.lock())
    }

    /// Poll the output until `cond` holds. Panics after two seconds.
    pub fn wait_for(&self, what: &str, cond: impl Fn(&[Frame]) -> bool) -> Vec<Frame> {
        let deadline = Instant::now() + Duration::from_secs(2);
        loop {
            let frames = self.frames();
            if cond(&frames) {
                return frames;
            }
            if Instant::now() > deadline {
                panic!("timed out waiting for {what}; output so far: {frames:#?}");
            }
            std::thread::sleep(Duration::from_millis(2));
        }
    }

    /// Release the reader (EOF) and join the dispatch loop.
    pub fn finish(self) -> (Vec<Frame>, h2_embed::Result<()>) {
        let Server { output, gate, thread } = self;
        drop(gate);
        let result = thread.join().expect("connection thread panicked");
        let frames = parse_frames(&output.buf.lock());
        (frames, result)
    }
}

/// Handler that ignores the body and sends an empty 200.
pub struct NoopHandler;

impl StreamHandler for NoopHandler {
    fn handle(
        &self,
        _request: h2_embed::Request,
        _body: h2_embed::BodyReader,
        _response: h2_embed::ResponseWriter,
    ) {
    }
}
