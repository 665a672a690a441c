//! Error isolation and escalation scenarios

use std::sync::Arc;

use h2_embed::frame::Frame;
use h2_embed::{Config, ErrorCode, InlineExecutor};

use crate::support::{encode_block, get_headers, NoopHandler, Script, Server};

fn start(script: Vec<u8>) -> Server {
    Server::start(
        script,
        Config::default(),
        Arc::new(NoopHandler),
        Arc::new(InlineExecutor),
    )
}

fn rst_for(frames: &[Frame], id: u32) -> Option<ErrorCode> {
    frames.iter().find_map(|f| match f {
        Frame::RstStream { stream_id, error_code } if *stream_id == id => Some(*error_code),
        _ => None,
    })
}

fn goaway_code(frames: &[Frame]) -> Option<ErrorCode> {
    frames.iter().find_map(|f| match f {
        Frame::GoAway { error_code, .. } => Some(*error_code),
        _ => None,
    })
}

#[test]
fn test_stream_id_monotonicity() {
    // Stream 5, then stream 3: the latter is "already seen" and refused,
    // but the connection survives (the trailing PING is still echoed).
    let script = Script::new()
        .request(5, &get_headers("/a"), true)
        .request(3, &get_headers("/b"), true)
        .frame(Frame::Ping { ack: false, payload: [0; 8] })
        .build();
    let server = start(script);

    let frames = server.wait_for("RST for stream 3 and PING ack", |frames| {
        rst_for(frames, 3).is_some()
            && frames.iter().any(|f| matches!(f, Frame::Ping { ack: true, .. }))
    });
    assert_eq!(rst_for(&frames, 3), Some(ErrorCode::StreamClosed));
    assert!(goaway_code(&frames).is_none());

    let (_, result) = server.finish();
    result.unwrap();
}

#[test]
fn test_header_block_interleave_is_fatal() {
    let block = encode_block(&get_headers("/"));
    let script = Script::new()
        .frame(Frame::Headers {
            stream_id: 1,
            fragment: block,
            end_stream: false,
            end_headers: false, // block left open
            priority: None,
        })
        .data(3, b"intruder", false)
        .build();
    let server = start(script);

    let (frames, result) = server.finish();
    assert_eq!(goaway_code(&frames), Some(ErrorCode::ProtocolError));
    assert_eq!(result.unwrap_err().code(), ErrorCode::ProtocolError);
}

#[test]
fn test_content_length_mismatch_isolated_to_stream() {
    // Declares 10 bytes, sends 5: stream 1 is reset, stream 3 still works.
    let script = Script::new()
        .request(
            1,
            &[
                (":method", "POST"),
                (":path", "/short"),
                (":scheme", "http"),
                ("content-length", "10"),
            ],
            false,
        )
        .data(1, b"hello", true)
        .request(3, &get_headers("/ok"), true)
        .build();
    let server = start(script);

    let frames = server.wait_for("RST for stream 1 and response on stream 3", |frames| {
        rst_for(frames, 1).is_some()
            && frames.iter().any(|f| matches!(f, Frame::Headers { stream_id: 3, .. }))
    });
    assert_eq!(rst_for(&frames, 1), Some(ErrorCode::ProtocolError));
    assert!(goaway_code(&frames).is_none());

    let (_, result) = server.finish();
    result.unwrap();
}

#[test]
fn test_oversized_dynamic_table_update_is_fatal() {
    // Block starts with a size update to 8192 while the cap is 4096.
    let mut fragment = vec![0x3f, 0xe1, 0x3f];
    fragment.extend_from_slice(&encode_block(&get_headers("/")));
    let script = Script::new()
        .frame(Frame::Headers {
            stream_id: 1,
            fragment,
            end_stream: true,
            end_headers: true,
            priority: None,
        })
        .build();
    let server = start(script);

    let (frames, result) = server.finish();
    assert_eq!(goaway_code(&frames), Some(ErrorCode::CompressionError));
    assert_eq!(result.unwrap_err().code(), ErrorCode::CompressionError);
}

#[test]
fn test_data_on_never_opened_stream_is_fatal() {
    let script = Script::new().data(1, b"orphan", false).build();
    let server = start(script);

    let (frames, result) = server.finish();
    assert_eq!(goaway_code(&frames), Some(ErrorCode::ProtocolError));
    assert_eq!(result.unwrap_err().code(), ErrorCode::ProtocolError);
}

#[test]
fn test_data_on_closed_stream_is_stream_error() {
    let script = Script::new()
        .request(1, &get_headers("/"), true)
        .data(1, b"late", false)
        .frame(Frame::Ping { ack: false, payload: [0; 8] })
        .build();
    let server = start(script);

    let frames = server.wait_for("RST for stream 1", |frames| {
        rst_for(frames, 1).is_some()
            && frames.iter().any(|f| matches!(f, Frame::Ping { ack: true, .. }))
    });
    assert_eq!(rst_for(&frames, 1), Some(ErrorCode::StreamClosed));
    assert!(goaway_code(&frames).is_none());

    let (_, result) = server.finish();
    result.unwrap();
}

#[test]
fn test_even_stream_id_is_fatal() {
    let script = Script::new().request(2, &get_headers("/"), true).build();
    let server = start(script);

    let (frames, result) = server.finish();
    assert_eq!(goaway_code(&frames), Some(ErrorCode::ProtocolError));
    assert_eq!(result.unwrap_err().code(), ErrorCode::ProtocolError);
}

#[test]
fn test_push_promise_from_client_is_fatal() {
    let script = Script::new().frame(Frame::PushPromise { stream_id: 2 }).build();
    let server = start(script);

    let (frames, result) = server.finish();
    assert_eq!(goaway_code(&frames), Some(ErrorCode::ProtocolError));
    assert_eq!(result.unwrap_err().code(), ErrorCode::ProtocolError);
}

#[test]
fn test_bad_preface_rejected() {
    let server = Server::start(
        Script::raw(b"GET / HTTP/1.1\r\nHost: x\r\n\r\n").build(),
        Config::default(),
        Arc::new(NoopHandler),
        Arc::new(InlineExecutor),
    );
    let (_, result) = server.finish();
    assert_eq!(result.unwrap_err().code(), ErrorCode::ProtocolError);
}

#[test]
fn test_client_rst_tolerated() {
    let script = Script::new()
        .request(1, &get_headers("/"), false)
        .frame(Frame::RstStream {
            stream_id: 1,
            error_code: ErrorCode::Cancel,
        })
        .frame(Frame::Ping { ack: false, payload: [0; 8] })
        .build();
    let server = start(script);

    let frames = server.wait_for("PING ack", |frames| {
        frames.iter().any(|f| matches!(f, Frame::Ping { ack: true, .. }))
    });
    assert!(goaway_code(&frames).is_none());

    let (_, result) = server.finish();
    result.unwrap();
}

#[test]
fn test_rst_for_old_stream_id_tolerated() {
    let script = Script::new()
        .request(1, &get_headers("/"), true)
        .frame(Frame::RstStream {
            stream_id: 1,
            error_code: ErrorCode::Cancel,
        })
        .frame(Frame::Ping { ack: false, payload: [0; 8] })
        .build();
    let server = start(script);

    server.wait_for("PING ack", |frames| {
        frames.iter().any(|f| matches!(f, Frame::Ping { ack: true, .. }))
    });
    let (_, result) = server.finish();
    result.unwrap();
}

#[test]
fn test_rst_for_unknown_stream_id_is_fatal() {
    let script = Script::new()
        .frame(Frame::RstStream {
            stream_id: 7,
            error_code: ErrorCode::Cancel,
        })
        .build();
    let server = start(script);

    let (frames, result) = server.finish();
    assert_eq!(goaway_code(&frames), Some(ErrorCode::ProtocolError));
    assert_eq!(result.unwrap_err().code(), ErrorCode::ProtocolError);
}

#[test]
fn test_missing_required_pseudo_header_resets_stream() {
    // No :scheme.
    let script = Script::new()
        .request(1, &[(":method", "GET"), (":path", "/")], true)
        .frame(Frame::Ping { ack: false, payload: [0; 8] })
        .build();
    let server = start(script);

    let frames = server.wait_for("RST for stream 1", |frames| rst_for(frames, 1).is_some());
    assert_eq!(rst_for(&frames, 1), Some(ErrorCode::ProtocolError));
    assert!(goaway_code(&frames).is_none());

    let (_, result) = server.finish();
    result.unwrap();
}
