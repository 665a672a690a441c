//! HTTP/2 error codes and the engine error type (RFC 7540 Section 7).
//!
//! Two failure classes exist and they are kept apart in the type itself:
//! connection-fatal errors escalate to a GOAWAY and tear the connection
//! down, stream-fatal errors are isolated to one stream via RST_STREAM.

use thiserror::Error;

/// HTTP/2 error codes (RFC 7540 Section 7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    NoError = 0x0,
    ProtocolError = 0x1,
    InternalError = 0x2,
    FlowControlError = 0x3,
    SettingsTimeout = 0x4,
    StreamClosed = 0x5,
    FrameSizeError = 0x6,
    RefusedStream = 0x7,
    Cancel = 0x8,
    CompressionError = 0x9,
    ConnectError = 0xa,
    EnhanceYourCalm = 0xb,
    InadequateSecurity = 0xc,
    Http11Required = 0xd,
}

impl ErrorCode {
    pub fn from_u32(v: u32) -> Self {
        match v {
            0x0 => Self::NoError,
            0x1 => Self::ProtocolError,
            0x2 => Self::InternalError,
            0x3 => Self::FlowControlError,
            0x4 => Self::SettingsTimeout,
            0x5 => Self::StreamClosed,
            0x6 => Self::FrameSizeError,
            0x7 => Self::RefusedStream,
            0x8 => Self::Cancel,
            0x9 => Self::CompressionError,
            0xa => Self::ConnectError,
            0xb => Self::EnhanceYourCalm,
            0xc => Self::InadequateSecurity,
            0xd => Self::Http11Required,
            // Unknown codes must be treated as INTERNAL_ERROR (RFC 7540 Section 7).
            _ => Self::InternalError,
        }
    }

    pub fn as_u32(self) -> u32 {
        self as u32
    }
}

/// Errors produced by the HTTP/2 engine.
///
/// A `Connection` error ends the whole connection (GOAWAY carrying `code`);
/// a `Stream` error ends only the addressed stream (RST_STREAM). I/O errors
/// from the underlying transport end the connection without a GOAWAY since
/// the socket is already unusable.
#[derive(Debug, Error)]
pub enum H2Error {
    #[error("connection error ({code:?}): {message}")]
    Connection { code: ErrorCode, message: String },
    #[error("stream {id} error ({code:?}): {message}")]
    Stream {
        id: u32,
        code: ErrorCode,
        message: String,
    },
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

impl H2Error {
    pub fn connection(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Connection {
            code,
            message: message.into(),
        }
    }

    pub fn stream(id: u32, code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Stream {
            id,
            code,
            message: message.into(),
        }
    }

    /// The RFC error code carried by this error (INTERNAL_ERROR for I/O).
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Connection { code, .. } | Self::Stream { code, .. } => *code,
            Self::Io(_) => ErrorCode::InternalError,
        }
    }
}

impl From<H2Error> for std::io::Error {
    fn from(err: H2Error) -> Self {
        match err {
            H2Error::Io(io) => io,
            other => std::io::Error::new(std::io::ErrorKind::BrokenPipe, other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, H2Error>;
