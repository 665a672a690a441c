//! Tests for HPACK header block decoding

use h2_embed::hpack::{Decoder, HeaderField};
use h2_embed::ErrorCode;

fn field(name: &str, value: &str) -> HeaderField {
    HeaderField::new(name.as_bytes().to_vec(), value.as_bytes().to_vec())
}

#[test]
fn test_indexed_static_fields() {
    let mut decoder = Decoder::new();
    // :method GET (2), :scheme http (6), :path / (4)
    let fields = decoder.decode(&[0x82, 0x86, 0x84]).unwrap();
    assert_eq!(
        fields,
        vec![field(":method", "GET"), field(":scheme", "http"), field(":path", "/")]
    );
}

#[test]
fn test_rfc7541_c2_1_literal_with_indexing() {
    let block = [
        0x40, 0x0a, 0x63, 0x75, 0x73, 0x74, 0x6f, 0x6d, 0x2d, 0x6b, 0x65, 0x79, 0x0d, 0x63,
        0x75, 0x73, 0x74, 0x6f, 0x6d, 0x2d, 0x68, 0x65, 0x61, 0x64, 0x65, 0x72,
    ];
    let mut decoder = Decoder::new();
    let fields = decoder.decode(&block).unwrap();
    assert_eq!(fields, vec![field("custom-key", "custom-header")]);
}

#[test]
fn test_rfc7541_c3_request_sequence() {
    let mut decoder = Decoder::new();

    // C.3.1: first request
    let block = [
        0x82, 0x86, 0x84, 0x41, 0x0f, 0x77, 0x77, 0x77, 0x2e, 0x65, 0x78, 0x61, 0x6d, 0x70,
        0x6c, 0x65, 0x2e, 0x63, 0x6f, 0x6d,
    ];
    let fields = decoder.decode(&block).unwrap();
    assert_eq!(
        fields,
        vec![
            field(":method", "GET"),
            field(":scheme", "http"),
            field(":path", "/"),
            field(":authority", "www.example.com"),
        ]
    );

    // C.3.2: second request reuses the dynamic table entry via index 62.
    let block = [
        0x82, 0x86, 0x84, 0xbe, 0x58, 0x08, 0x6e, 0x6f, 0x2d, 0x63, 0x61, 0x63, 0x68, 0x65,
    ];
    let fields = decoder.decode(&block).unwrap();
    assert_eq!(fields[3], field(":authority", "www.example.com"));
    assert_eq!(fields[4], field("cache-control", "no-cache"));
}

#[test]
fn test_rfc7541_c4_huffman_coded_request() {
    let block = [
        0x82, 0x86, 0x84, 0x41, 0x8c, 0xf1, 0xe3, 0xc2, 0xe5, 0xf2, 0x3a, 0x6b, 0xa0, 0xab,
        0x90, 0xf4, 0xff,
    ];
    let mut decoder = Decoder::new();
    let fields = decoder.decode(&block).unwrap();
    assert_eq!(fields[3], field(":authority", "www.example.com"));
}

#[test]
fn test_never_indexed_decodes_like_without_indexing() {
    // 0x10 (never indexed) and 0x00 (without indexing), same literal bytes.
    let literal = b"\x04name\x05value";
    let mut never = vec![0x10];
    never.extend_from_slice(literal);
    let mut without = vec![0x00];
    without.extend_from_slice(literal);

    let a = Decoder::new().decode(&never).unwrap();
    let b = Decoder::new().decode(&without).unwrap();
    assert_eq!(a, b);
    assert_eq!(a, vec![field("name", "value")]);
}

#[test]
fn test_neither_pattern_inserts_into_dynamic_table() {
    let mut decoder = Decoder::new();
    decoder.decode(b"\x10\x04name\x05value").unwrap();
    decoder.decode(b"\x00\x04name\x05value").unwrap();
    // Index 62 would be the first dynamic entry; it must not exist.
    let err = decoder.decode(&[0xbe]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CompressionError);
}

#[test]
fn test_uppercase_literal_name_rejected() {
    let mut decoder = Decoder::new();
    let err = decoder.decode(b"\x00\x04Name\x05value").unwrap_err();
    assert_eq!(err.code(), ErrorCode::ProtocolError);
}

#[test]
fn test_table_size_update_must_be_first() {
    let mut decoder = Decoder::new();
    // Indexed field, then a size update: rejected.
    let err = decoder.decode(&[0x82, 0x20]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CompressionError);
}

#[test]
fn test_table_size_update_above_cap_rejected() {
    let mut decoder = Decoder::new();
    // Size update requesting 8192 (cap is 4096): 0x3f then varint(8161).
    let err = decoder.decode(&[0x3f, 0xe1, 0x3f]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CompressionError);
}

#[test]
fn test_table_size_update_at_cap_accepted() {
    let mut decoder = Decoder::new();
    // 4096 = 31 + varint(4065)
    decoder.decode(&[0x3f, 0xe1, 0x1f]).unwrap();
}

#[test]
fn test_shrinking_update_evicts_entries() {
    let mut decoder = Decoder::new();
    decoder.decode(b"\x40\x04name\x05value").unwrap();
    // Entry exists at index 62.
    assert_eq!(
        decoder.decode(&[0xbe]).unwrap(),
        vec![field("name", "value")]
    );
    // Shrink the table to zero; index 62 must now be invalid.
    decoder.decode(&[0x20]).unwrap();
    let err = decoder.decode(&[0xbe]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CompressionError);
}

#[test]
fn test_index_zero_rejected() {
    let mut decoder = Decoder::new();
    let err = decoder.decode(&[0x80]).unwrap_err();
    assert_eq!(err.code(), ErrorCode::CompressionError);
}

#[test]
fn test_truncated_block_rejected() {
    let mut decoder = Decoder::new();
    // Literal announces a 10-byte name, but the block ends early.
    assert!(decoder.decode(b"\x00\x0aabc").is_err());
}
