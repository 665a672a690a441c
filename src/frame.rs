//! HTTP/2 frame codec (RFC 7540 Sections 4 and 6).
//!
//! A frame is a 9-byte header (24-bit length, type, flags, 31-bit stream id)
//! followed by a type-specific body. `Frame::decode` performs every
//! structural check that makes a frame unsafe to skip: bad padding, bad
//! priority block, wrong body length for fixed-size frames, SETTINGS body
//! alignment. Those are always connection-fatal, since the frame boundary
//! cannot be trusted afterwards.

use crate::error::{ErrorCode, H2Error, Result};

/// HTTP/2 frame type identifiers (RFC 7540 Section 6).
pub mod frame_type {
    pub const DATA: u8 = 0x0;
    pub const HEADERS: u8 = 0x1;
    pub const PRIORITY: u8 = 0x2;
    pub const RST_STREAM: u8 = 0x3;
    pub const SETTINGS: u8 = 0x4;
    pub const PUSH_PROMISE: u8 = 0x5;
    pub const PING: u8 = 0x6;
    pub const GOAWAY: u8 = 0x7;
    pub const WINDOW_UPDATE: u8 = 0x8;
    pub const CONTINUATION: u8 = 0x9;
}

/// HTTP/2 frame flags.
pub mod flags {
    pub const ACK: u8 = 0x1;
    pub const END_STREAM: u8 = 0x1;
    pub const END_HEADERS: u8 = 0x4;
    pub const PADDED: u8 = 0x8;
    pub const PRIORITY: u8 = 0x20;
}

/// Absolute ceiling on a frame body, independent of negotiated settings.
pub const MAX_FRAME_SIZE: usize = 16384;

/// A parsed 9-byte frame header.
#[derive(Debug, Clone)]
pub struct FrameHeader {
    pub length: u32, // 24 bits
    pub frame_type: u8,
    pub flags: u8,
    pub stream_id: u32, // 31 bits (high bit reserved)
}

impl FrameHeader {
    /// Parse a 9-byte frame header. Returns `None` if fewer than 9 bytes.
    pub fn parse(data: &[u8]) -> Option<Self> {
        if data.len() < 9 {
            return None;
        }
        let length = ((data[0] as u32) << 16) | ((data[1] as u32) << 8) | (data[2] as u32);
        let frame_type = data[3];
        let flags = data[4];
        let stream_id = ((data[5] as u32) << 24)
            | ((data[6] as u32) << 16)
            | ((data[7] as u32) << 8)
            | (data[8] as u32);
        let stream_id = stream_id & 0x7FFF_FFFF; // Clear reserved bit
        Some(Self {
            length,
            frame_type,
            flags,
            stream_id,
        })
    }

    /// Encode the 9-byte header.
    pub fn encode(&self) -> [u8; 9] {
        [
            (self.length >> 16) as u8,
            (self.length >> 8) as u8,
            self.length as u8,
            self.frame_type,
            self.flags,
            (self.stream_id >> 24) as u8,
            (self.stream_id >> 16) as u8,
            (self.stream_id >> 8) as u8,
            self.stream_id as u8,
        ]
    }

    pub fn is_end_stream(&self) -> bool {
        self.flags & flags::END_STREAM != 0
    }

    pub fn is_end_headers(&self) -> bool {
        self.flags & flags::END_HEADERS != 0
    }

    pub fn is_ack(&self) -> bool {
        self.flags & flags::ACK != 0
    }
}

/// Priority block carried by HEADERS (with PRIORITY flag) and PRIORITY
/// frames. Accepted and parsed but semantically ignored by the engine.
/// Weight is stored as the wire value + 1 (RFC range 1..=256).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Priority {
    pub exclusive: bool,
    pub dependency: u32,
    pub weight: u16,
}

impl Priority {
    fn parse(stream_id: u32, data: &[u8]) -> Result<Self> {
        let raw = u32::from_be_bytes([data[0], data[1], data[2], data[3]]);
        let dependency = raw & 0x7FFF_FFFF;
        if dependency == stream_id {
            return Err(H2Error::connection(
                ErrorCode::ProtocolError,
                format!("stream {stream_id} depends on itself"),
            ));
        }
        Ok(Self {
            exclusive: raw & 0x8000_0000 != 0,
            dependency,
            weight: u16::from(data[4]) + 1,
        })
    }
}

/// A decoded HTTP/2 frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Data {
        stream_id: u32,
        data: Vec<u8>,
        end_stream: bool,
        /// Declared body length including any padding; this is what flow
        /// control accounts for, not the stripped payload.
        flow_len: u32,
    },
    Headers {
        stream_id: u32,
        fragment: Vec<u8>,
        end_stream: bool,
        end_headers: bool,
        priority: Option<Priority>,
    },
    Priority {
        stream_id: u32,
        priority: Priority,
    },
    RstStream {
        stream_id: u32,
        error_code: ErrorCode,
    },
    Settings {
        ack: bool,
        params: Vec<(u16, u32)>,
    },
    PushPromise {
        stream_id: u32,
    },
    Ping {
        ack: bool,
        payload: [u8; 8],
    },
    GoAway {
        last_stream_id: u32,
        error_code: ErrorCode,
        debug_data: Vec<u8>,
    },
    WindowUpdate {
        stream_id: u32,
        increment: u32,
    },
    Continuation {
        stream_id: u32,
        fragment: Vec<u8>,
        end_headers: bool,
    },
    /// Unknown frame type: decoded opaquely and otherwise ignored.
    Unknown {
        frame_type: u8,
        stream_id: u32,
    },
}

impl Frame {
    /// Decode a frame body given its already-parsed header.
    ///
    /// `payload.len()` must equal `header.length`; the caller (the
    /// connection read loop) is responsible for having read exactly that
    /// many bytes and for rejecting bodies above [`MAX_FRAME_SIZE`].
    pub fn decode(header: &FrameHeader, payload: Vec<u8>) -> Result<Frame> {
        if payload.len() > MAX_FRAME_SIZE {
            return Err(H2Error::connection(
                ErrorCode::FrameSizeError,
                format!("frame body {} exceeds {MAX_FRAME_SIZE}", payload.len()),
            ));
        }
        match header.frame_type {
            frame_type::DATA => decode_data(header, payload),
            frame_type::HEADERS => decode_headers(header, payload),
            frame_type::PRIORITY => decode_priority(header, payload),
            frame_type::RST_STREAM => decode_rst_stream(header, payload),
            frame_type::SETTINGS => decode_settings(header, payload),
            frame_type::PUSH_PROMISE => Ok(Frame::PushPromise {
                stream_id: header.stream_id,
            }),
            frame_type::PING => decode_ping(header, payload),
            frame_type::GOAWAY => decode_goaway(header, payload),
            frame_type::WINDOW_UPDATE => decode_window_update(header, payload),
            frame_type::CONTINUATION => {
                if header.stream_id == 0 {
                    return Err(H2Error::connection(
                        ErrorCode::ProtocolError,
                        "CONTINUATION on stream 0",
                    ));
                }
                Ok(Frame::Continuation {
                    stream_id: header.stream_id,
                    fragment: payload,
                    end_headers: header.is_end_headers(),
                })
            }
            other => Ok(Frame::Unknown {
                frame_type: other,
                stream_id: header.stream_id,
            }),
        }
    }

    /// Encode this frame to wire bytes (header + body).
    pub fn encode(&self) -> Vec<u8> {
        match self {
            Frame::Data {
                stream_id,
                data,
                end_stream,
                ..
            } => {
                let f = if *end_stream { flags::END_STREAM } else { 0 };
                encode_frame(frame_type::DATA, f, *stream_id, data)
            }
            Frame::Headers {
                stream_id,
                fragment,
                end_stream,
                end_headers,
                ..
            } => {
                let mut f = 0;
                if *end_stream {
                    f |= flags::END_STREAM;
                }
                if *end_headers {
                    f |= flags::END_HEADERS;
                }
                encode_frame(frame_type::HEADERS, f, *stream_id, fragment)
            }
            Frame::Priority {
                stream_id,
                priority,
            } => {
                let mut body = Vec::with_capacity(5);
                let mut dep = priority.dependency;
                if priority.exclusive {
                    dep |= 0x8000_0000;
                }
                body.extend_from_slice(&dep.to_be_bytes());
                body.push((priority.weight - 1) as u8);
                encode_frame(frame_type::PRIORITY, 0, *stream_id, &body)
            }
            Frame::RstStream {
                stream_id,
                error_code,
            } => encode_frame(
                frame_type::RST_STREAM,
                0,
                *stream_id,
                &error_code.as_u32().to_be_bytes(),
            ),
            Frame::Settings { ack, params } => {
                let f = if *ack { flags::ACK } else { 0 };
                let mut body = Vec::with_capacity(params.len() * 6);
                for (id, value) in params {
                    body.extend_from_slice(&id.to_be_bytes());
                    body.extend_from_slice(&value.to_be_bytes());
                }
                encode_frame(frame_type::SETTINGS, f, 0, &body)
            }
            Frame::PushPromise { stream_id } => {
                encode_frame(frame_type::PUSH_PROMISE, 0, *stream_id, &[])
            }
            Frame::Ping { ack, payload } => {
                let f = if *ack { flags::ACK } else { 0 };
                encode_frame(frame_type::PING, f, 0, payload)
            }
            Frame::GoAway {
                last_stream_id,
                error_code,
                debug_data,
            } => {
                let mut body = Vec::with_capacity(8 + debug_data.len());
                body.extend_from_slice(&last_stream_id.to_be_bytes());
                body.extend_from_slice(&error_code.as_u32().to_be_bytes());
                body.extend_from_slice(debug_data);
                encode_frame(frame_type::GOAWAY, 0, 0, &body)
            }
            Frame::WindowUpdate {
                stream_id,
                increment,
            } => encode_frame(
                frame_type::WINDOW_UPDATE,
                0,
                *stream_id,
                &(increment & 0x7FFF_FFFF).to_be_bytes(),
            ),
            Frame::Continuation {
                stream_id,
                fragment,
                end_headers,
            } => {
                let f = if *end_headers { flags::END_HEADERS } else { 0 };
                encode_frame(frame_type::CONTINUATION, f, *stream_id, fragment)
            }
            Frame::Unknown {
                frame_type: t,
                stream_id,
            } => encode_frame(*t, 0, *stream_id, &[]),
        }
    }

    /// The stream this frame addresses (0 for connection-level frames).
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::Data { stream_id, .. }
            | Frame::Headers { stream_id, .. }
            | Frame::Priority { stream_id, .. }
            | Frame::RstStream { stream_id, .. }
            | Frame::PushPromise { stream_id }
            | Frame::WindowUpdate { stream_id, .. }
            | Frame::Continuation { stream_id, .. }
            | Frame::Unknown { stream_id, .. } => *stream_id,
            Frame::Settings { .. } | Frame::Ping { .. } | Frame::GoAway { .. } => 0,
        }
    }
}

fn encode_frame(frame_type: u8, flags: u8, stream_id: u32, body: &[u8]) -> Vec<u8> {
    let header = FrameHeader {
        length: body.len() as u32,
        frame_type,
        flags,
        stream_id,
    };
    let mut out = Vec::with_capacity(9 + body.len());
    out.extend_from_slice(&header.encode());
    out.extend_from_slice(body);
    out
}

fn decode_data(header: &FrameHeader, mut payload: Vec<u8>) -> Result<Frame> {
    if header.stream_id == 0 {
        return Err(H2Error::connection(
            ErrorCode::ProtocolError,
            "DATA on stream 0",
        ));
    }
    let flow_len = payload.len() as u32;
    if header.flags & flags::PADDED != 0 {
        if payload.is_empty() {
            return Err(H2Error::connection(
                ErrorCode::FrameSizeError,
                "PADDED DATA frame with no pad length",
            ));
        }
        let pad_length = payload[0] as usize;
        if pad_length >= payload.len() {
            return Err(H2Error::connection(
                ErrorCode::FrameSizeError,
                "DATA padding exceeds body length",
            ));
        }
        payload.truncate(payload.len() - pad_length);
        payload.remove(0);
    }
    Ok(Frame::Data {
        stream_id: header.stream_id,
        data: payload,
        end_stream: header.is_end_stream(),
        flow_len,
    })
}

fn decode_headers(header: &FrameHeader, mut payload: Vec<u8>) -> Result<Frame> {
    if header.stream_id == 0 {
        return Err(H2Error::connection(
            ErrorCode::ProtocolError,
            "HEADERS on stream 0",
        ));
    }
    let mut offset = 0;
    let mut end = payload.len();

    if header.flags & flags::PADDED != 0 {
        if payload.is_empty() {
            return Err(H2Error::connection(
                ErrorCode::FrameSizeError,
                "PADDED HEADERS frame with no pad length",
            ));
        }
        let pad_length = payload[0] as usize;
        offset = 1;
        // An all-padding frame (empty fragment) is legal; only padding that
        // exceeds the remainder is an error.
        if pad_length > payload.len() - offset {
            return Err(H2Error::connection(
                ErrorCode::FrameSizeError,
                "HEADERS padding exceeds body length",
            ));
        }
        end = payload.len() - pad_length;
    }

    let priority = if header.flags & flags::PRIORITY != 0 {
        if end - offset < 5 {
            return Err(H2Error::connection(
                ErrorCode::FrameSizeError,
                "HEADERS priority block truncated",
            ));
        }
        let p = Priority::parse(header.stream_id, &payload[offset..offset + 5])?;
        offset += 5;
        Some(p)
    } else {
        None
    };

    payload.truncate(end);
    if offset > 0 {
        payload.drain(..offset);
    }

    Ok(Frame::Headers {
        stream_id: header.stream_id,
        fragment: payload,
        end_stream: header.is_end_stream(),
        end_headers: header.is_end_headers(),
        priority,
    })
}

fn decode_priority(header: &FrameHeader, payload: Vec<u8>) -> Result<Frame> {
    if header.stream_id == 0 {
        return Err(H2Error::connection(
            ErrorCode::ProtocolError,
            "PRIORITY on stream 0",
        ));
    }
    if payload.len() != 5 {
        return Err(H2Error::connection(
            ErrorCode::FrameSizeError,
            "PRIORITY body must be 5 bytes",
        ));
    }
    Ok(Frame::Priority {
        stream_id: header.stream_id,
        priority: Priority::parse(header.stream_id, &payload)?,
    })
}

fn decode_rst_stream(header: &FrameHeader, payload: Vec<u8>) -> Result<Frame> {
    if header.stream_id == 0 {
        return Err(H2Error::connection(
            ErrorCode::ProtocolError,
            "RST_STREAM on stream 0",
        ));
    }
    if payload.len() != 4 {
        return Err(H2Error::connection(
            ErrorCode::FrameSizeError,
            "RST_STREAM body must be 4 bytes",
        ));
    }
    let code = u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]);
    Ok(Frame::RstStream {
        stream_id: header.stream_id,
        error_code: ErrorCode::from_u32(code),
    })
}

fn decode_settings(header: &FrameHeader, payload: Vec<u8>) -> Result<Frame> {
    if header.stream_id != 0 {
        return Err(H2Error::connection(
            ErrorCode::ProtocolError,
            "SETTINGS on non-zero stream",
        ));
    }
    if header.is_ack() {
        if !payload.is_empty() {
            return Err(H2Error::connection(
                ErrorCode::FrameSizeError,
                "SETTINGS ACK with non-empty body",
            ));
        }
        return Ok(Frame::Settings {
            ack: true,
            params: Vec::new(),
        });
    }
    if payload.len() % 6 != 0 {
        return Err(H2Error::connection(
            ErrorCode::FrameSizeError,
            "SETTINGS body not a multiple of 6",
        ));
    }
    let mut params = Vec::with_capacity(payload.len() / 6);
    let mut pos = 0;
    while pos + 6 <= payload.len() {
        let id = u16::from_be_bytes([payload[pos], payload[pos + 1]]);
        let value = u32::from_be_bytes([
            payload[pos + 2],
            payload[pos + 3],
            payload[pos + 4],
            payload[pos + 5],
        ]);
        params.push((id, value));
        pos += 6;
    }
    Ok(Frame::Settings { ack: false, params })
}

fn decode_ping(header: &FrameHeader, payload: Vec<u8>) -> Result<Frame> {
    if header.stream_id != 0 {
        return Err(H2Error::connection(
            ErrorCode::ProtocolError,
            "PING on non-zero stream",
        ));
    }
    if payload.len() != 8 {
        return Err(H2Error::connection(
            ErrorCode::FrameSizeError,
            "PING body must be 8 bytes",
        ));
    }
    let mut data = [0u8; 8];
    data.copy_from_slice(&payload);
    Ok(Frame::Ping {
        ack: header.is_ack(),
        payload: data,
    })
}

fn decode_goaway(header: &FrameHeader, payload: Vec<u8>) -> Result<Frame> {
    if header.stream_id != 0 {
        return Err(H2Error::connection(
            ErrorCode::ProtocolError,
            "GOAWAY on non-zero stream",
        ));
    }
    if payload.len() < 8 {
        return Err(H2Error::connection(
            ErrorCode::FrameSizeError,
            "GOAWAY body must be at least 8 bytes",
        ));
    }
    let last_stream_id =
        u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFF_FFFF;
    let error_code = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
    Ok(Frame::GoAway {
        last_stream_id,
        error_code: ErrorCode::from_u32(error_code),
        debug_data: payload[8..].to_vec(),
    })
}

fn decode_window_update(header: &FrameHeader, payload: Vec<u8>) -> Result<Frame> {
    if payload.len() != 4 {
        return Err(H2Error::connection(
            ErrorCode::FrameSizeError,
            "WINDOW_UPDATE body must be 4 bytes",
        ));
    }
    let increment =
        u32::from_be_bytes([payload[0], payload[1], payload[2], payload[3]]) & 0x7FFF_FFFF;
    if increment == 0 {
        return Err(H2Error::connection(
            ErrorCode::ProtocolError,
            "WINDOW_UPDATE with zero increment",
        ));
    }
    Ok(Frame::WindowUpdate {
        stream_id: header.stream_id,
        increment,
    })
}
