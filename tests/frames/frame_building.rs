//! Tests for frame encoding

use h2_embed::frame::{flags, frame_type, Frame, FrameHeader};
use h2_embed::ErrorCode;

fn round_trip(frame: Frame) -> Frame {
    let bytes = frame.encode();
    let header = FrameHeader::parse(&bytes[..9]).unwrap();
    Frame::decode(&header, bytes[9..].to_vec()).unwrap()
}

#[test]
fn test_encode_data_frame() {
    let frame = Frame::Data {
        stream_id: 1,
        data: b"hello".to_vec(),
        end_stream: true,
        flow_len: 5,
    };
    let bytes = frame.encode();
    assert_eq!(&bytes[..9], &[0, 0, 5, 0, flags::END_STREAM, 0, 0, 0, 1]);
    assert_eq!(&bytes[9..], b"hello");
}

#[test]
fn test_encode_headers_frame() {
    let frame = Frame::Headers {
        stream_id: 3,
        fragment: vec![0x82, 0x86],
        end_stream: false,
        end_headers: true,
        priority: None,
    };
    let bytes = frame.encode();
    assert_eq!(bytes[3], frame_type::HEADERS);
    assert_eq!(bytes[4], flags::END_HEADERS);
    assert_eq!(round_trip(frame.clone()), frame);
}

#[test]
fn test_encode_settings_params() {
    let frame = Frame::Settings {
        ack: false,
        params: vec![(4, 65536), (5, 16384)],
    };
    let bytes = frame.encode();
    // Two 6-byte parameters.
    assert_eq!(bytes[2], 12);
    assert_eq!(round_trip(frame.clone()), frame);
}

#[test]
fn test_encode_settings_ack() {
    let frame = Frame::Settings {
        ack: true,
        params: Vec::new(),
    };
    let bytes = frame.encode();
    assert_eq!(bytes[2], 0);
    assert_eq!(bytes[4], flags::ACK);
}

#[test]
fn test_encode_ping_ack_round_trip() {
    let frame = Frame::Ping {
        ack: true,
        payload: [9, 8, 7, 6, 5, 4, 3, 2],
    };
    assert_eq!(round_trip(frame.clone()), frame);
}

#[test]
fn test_encode_goaway_round_trip() {
    let frame = Frame::GoAway {
        last_stream_id: 5,
        error_code: ErrorCode::EnhanceYourCalm,
        debug_data: b"slow down".to_vec(),
    };
    assert_eq!(round_trip(frame.clone()), frame);
}

#[test]
fn test_encode_window_update_round_trip() {
    let frame = Frame::WindowUpdate {
        stream_id: 7,
        increment: 65535,
    };
    assert_eq!(round_trip(frame.clone()), frame);
}

#[test]
fn test_encode_rst_stream_round_trip() {
    let frame = Frame::RstStream {
        stream_id: 9,
        error_code: ErrorCode::RefusedStream,
    };
    assert_eq!(round_trip(frame.clone()), frame);
}

#[test]
fn test_encode_continuation_round_trip() {
    let frame = Frame::Continuation {
        stream_id: 1,
        fragment: vec![1, 2, 3],
        end_headers: true,
    };
    assert_eq!(round_trip(frame.clone()), frame);
}
