//! h2-embed: an embeddable server-side HTTP/2 protocol engine
//!
//! This crate turns an accepted duplex byte stream into a set of concurrent,
//! independently flow-controlled HTTP/2 request/response exchanges
//! (RFC 7540/7541). It is synchronous by design: one dedicated thread runs
//! each connection's frame-dispatch loop, and request handlers run on
//! workers obtained from a caller-supplied [`Executor`].
//!
//! # Features
//!
//! - **Frame codec**: parse/encode of all ten frame types plus unknown
//!   frames, with full structural validation
//! - **HPACK**: static + dynamic table, Huffman decoding, header block
//!   reassembly across CONTINUATION frames
//! - **Flow control**: connection and stream send windows honored on the
//!   write path, eager receive-window replenishment on the read path
//! - **Stream lifecycle**: RFC 7540 state machine with the stream/connection
//!   error split (RST_STREAM vs GOAWAY)
//!
//! # Quick start
//!
//! ```no_run
//! use std::io::Write;
//! use std::sync::Arc;
//! use h2_embed::{BodyReader, Config, Connection, Request, ResponseWriter};
//! use h2_embed::{StreamHandler, ThreadExecutor};
//!
//! struct Hello;
//!
//! impl StreamHandler for Hello {
//!     fn handle(&self, request: Request, _body: BodyReader, mut response: ResponseWriter) {
//!         response.header("content-type", "text/plain");
//!         let _ = write!(response, "hello {}", request.path);
//!     }
//! }
//!
//! let socket = std::net::TcpStream::connect("127.0.0.1:8080").unwrap();
//! let reader = socket.try_clone().unwrap();
//! let conn = Connection::new(
//!     reader,
//!     Box::new(socket),
//!     Arc::new(Hello),
//!     Arc::new(ThreadExecutor),
//!     Config::default(),
//! );
//! conn.run().unwrap();
//! ```
//!
//! Out of scope: server push (never initiated, PUSH_PROMISE from a client is
//! a protocol error), priority semantics (PRIORITY frames are parsed and
//! ignored), and any transport concern beyond `Read`/`Write` (TLS, accept
//! loops, idle reaping belong to the embedding server).

pub mod config;
pub mod connection;
pub mod error;
pub mod frame;
pub mod headers;
pub mod hpack;
pub mod huffman;
pub mod pipe;
pub mod settings;
pub mod stats;
pub mod stream;
pub mod window;


pub use config::Config;
pub use connection::{Connection, PREFACE};
pub use error::{ErrorCode, H2Error, Result};
pub use headers::{Headers, Request, Response};
pub use stats::Stats;
pub use stream::{BodyReader, ResponseWriter};

/// Supplies the workers request handlers run on. One connection keeps its
/// dispatch thread to itself; every stream's handler is submitted here.
pub trait Executor: Send + Sync + 'static {
    fn execute(&self, task: Box<dyn FnOnce() + Send>);
}

/// Spawns a fresh thread per task. Fine for tests and small embeddings;
/// production servers usually pass their own pool.
pub struct ThreadExecutor;

impl Executor for ThreadExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        std::thread::spawn(task);
    }
}

/// Runs tasks inline on the dispatch thread. Only safe for handlers that
/// never block on the request body or on flow control.
pub struct InlineExecutor;

impl Executor for InlineExecutor {
    fn execute(&self, task: Box<dyn FnOnce() + Send>) {
        task();
    }
}

/// Invoked once per completed request header block, on an [`Executor`]
/// worker. The handler consumes the body and produces the response; the
/// stream is finished (END_STREAM) when the writer is dropped.
pub trait StreamHandler: Send + Sync + 'static {
    fn handle(&self, request: Request, body: BodyReader, response: ResponseWriter);
}

impl<F> StreamHandler for F
where
    F: Fn(Request, BodyReader, ResponseWriter) + Send + Sync + 'static,
{
    fn handle(&self, request: Request, body: BodyReader, response: ResponseWriter) {
        self(request, body, response)
    }
}
