//! HPACK header compression (RFC 7541).
//!
//! The decoder implements the full wire format: static table, per-connection
//! dynamic table, Huffman-coded string literals, and the prefix integer
//! codec. The encoder covers the response path only and deliberately uses
//! just the literal-without-indexing representation: response header blocks
//! never touch the dynamic table, so encoder state can't drift from any
//! client decoder.

use std::collections::VecDeque;

use crate::error::{ErrorCode, H2Error, Result};
use crate::huffman;

/// Hard cap on the dynamic table size. A dynamic table size update
/// requesting more than this is a compression error.
pub const MAX_DYNAMIC_TABLE_SIZE: usize = 4096;

/// A single header name-value pair as it appears in a header block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    pub name: Vec<u8>,
    pub value: Vec<u8>,
}

impl HeaderField {
    pub fn new(name: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Dynamic table size accounting (RFC 7541 Section 4.1):
    /// len(name) + len(value) + 32.
    fn size(&self) -> usize {
        self.name.len() + self.value.len() + 32
    }

    pub fn is_pseudo(&self) -> bool {
        self.name.first() == Some(&b':')
    }
}

// -- Prefix integer codec (RFC 7541 Section 5.1) --

pub(crate) fn encode_prefix_int(buf: &mut Vec<u8>, value: u64, prefix_bits: u8, pattern: u8) {
    let max = (1u64 << prefix_bits) - 1;
    if value < max {
        buf.push(pattern | value as u8);
    } else {
        buf.push(pattern | max as u8);
        let mut remaining = value - max;
        while remaining >= 128 {
            buf.push(0x80 | (remaining & 0x7f) as u8);
            remaining >>= 7;
        }
        buf.push(remaining as u8);
    }
}

/// Decode a prefix integer. Returns `(value, bytes_consumed)`, or `None` on
/// a truncated or overflowing encoding.
pub(crate) fn decode_prefix_int(buf: &[u8], prefix_bits: u8) -> Option<(u64, usize)> {
    if buf.is_empty() {
        return None;
    }
    let max = (1u64 << prefix_bits) - 1;
    let value = u64::from(buf[0]) & max;
    if value < max {
        return Some((value, 1));
    }
    let mut value = max;
    let mut shift = 0u32;
    for (i, &b) in buf[1..].iter().enumerate() {
        value += u64::from(b & 0x7f) << shift;
        shift += 7;
        if b & 0x80 == 0 {
            return Some((value, i + 2));
        }
        if shift > 56 {
            return None;
        }
    }
    None
}

// -- Static table (RFC 7541 Appendix A) --

/// HPACK static table: 61 predefined entries, 1-indexed on the wire.
pub(crate) const STATIC_TABLE: &[(&[u8], &[u8])] = &[
    (b":authority", b""),                   // 1
    (b":method", b"GET"),                   // 2
    (b":method", b"POST"),                  // 3
    (b":path", b"/"),                       // 4
    (b":path", b"/index.html"),             // 5
    (b":scheme", b"http"),                  // 6
    (b":scheme", b"https"),                 // 7
    (b":status", b"200"),                   // 8
    (b":status", b"204"),                   // 9
    (b":status", b"206"),                   // 10
    (b":status", b"304"),                   // 11
    (b":status", b"400"),                   // 12
    (b":status", b"404"),                   // 13
    (b":status", b"500"),                   // 14
    (b"accept-charset", b""),               // 15
    (b"accept-encoding", b"gzip, deflate"), // 16
    (b"accept-language", b""),              // 17
    (b"accept-ranges", b""),                // 18
    (b"accept", b""),                       // 19
    (b"access-control-allow-origin", b""),  // 20
    (b"age", b""),                          // 21
    (b"allow", b""),                        // 22
    (b"authorization", b""),                // 23
    (b"cache-control", b""),                // 24
    (b"content-disposition", b""),          // 25
    (b"content-encoding", b""),             // 26
    (b"content-language", b""),             // 27
    (b"content-length", b""),               // 28
    (b"content-location", b""),             // 29
    (b"content-range", b""),                // 30
    (b"content-type", b""),                 // 31
    (b"cookie", b""),                       // 32
    (b"date", b""),                         // 33
    (b"etag", b""),                         // 34
    (b"expect", b""),                       // 35
    (b"expires", b""),                      // 36
    (b"from", b""),                         // 37
    (b"host", b""),                         // 38
    (b"if-match", b""),                     // 39
    (b"if-modified-since", b""),            // 40
    (b"if-none-match", b""),                // 41
    (b"if-range", b""),                     // 42
    (b"if-unmodified-since", b""),          // 43
    (b"last-modified", b""),                // 44
    (b"link", b""),                         // 45
    (b"location", b""),                     // 46
    (b"max-forwards", b""),                 // 47
    (b"proxy-authenticate", b""),           // 48
    (b"proxy-authorization", b""),          // 49
    (b"range", b""),                        // 50
    (b"referer", b""),                      // 51
    (b"refresh", b""),                      // 52
    (b"retry-after", b""),                  // 53
    (b"server", b""),                       // 54
    (b"set-cookie", b""),                   // 55
    (b"strict-transport-security", b""),    // 56
    (b"transfer-encoding", b""),            // 57
    (b"user-agent", b""),                   // 58
    (b"vary", b""),                         // 59
    (b"via", b""),                          // 60
    (b"www-authenticate", b""),             // 61
];

// -- Dynamic table --

/// HPACK dynamic table (RFC 7541 Section 2.3.2). Entries are stored
/// newest-first: VecDeque index 0 is HPACK index 62.
pub struct DynamicTable {
    entries: VecDeque<HeaderField>,
    size: usize,
    max_size: usize,
}

impl DynamicTable {
    pub fn new(max_size: usize) -> Self {
        Self {
            entries: VecDeque::new(),
            size: 0,
            max_size,
        }
    }

    pub fn get(&self, index: usize) -> Option<&HeaderField> {
        self.entries.get(index)
    }

    /// Insert a new entry at the front, evicting oldest entries as needed
    /// (RFC 7541 Section 4.4).
    pub fn insert(&mut self, field: HeaderField) {
        let entry_size = field.size();
        while self.size + entry_size > self.max_size && !self.entries.is_empty() {
            if let Some(evicted) = self.entries.pop_back() {
                self.size -= evicted.size();
            }
        }
        // An entry larger than the whole table empties it and is not stored.
        if entry_size > self.max_size {
            self.entries.clear();
            self.size = 0;
            return;
        }
        self.entries.push_front(field);
        self.size += entry_size;
    }

    /// Shrink (or grow, within the hard cap) the table, evicting oldest
    /// entries until within bound.
    pub fn set_max_size(&mut self, max_size: usize) {
        self.max_size = max_size;
        while self.size > self.max_size {
            if let Some(evicted) = self.entries.pop_back() {
                self.size -= evicted.size();
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

// -- String literals --

fn compression_error(message: &'static str) -> H2Error {
    H2Error::connection(ErrorCode::CompressionError, message)
}

/// Decode a string literal (Huffman or raw). Returns the bytes and the
/// total input consumed.
fn decode_string_literal(buf: &[u8]) -> Result<(Vec<u8>, usize)> {
    if buf.is_empty() {
        return Err(compression_error("truncated string literal"));
    }
    let huffman_coded = buf[0] & 0x80 != 0;
    let (len, n) =
        decode_prefix_int(buf, 7).ok_or_else(|| compression_error("bad string length"))?;
    let len = len as usize;
    let total = n + len;
    if buf.len() < total {
        return Err(compression_error("string literal exceeds block"));
    }
    let data = &buf[n..total];
    let value = if huffman_coded {
        huffman::decode(data)?
    } else {
        data.to_vec()
    };
    Ok((value, total))
}

/// Encode a raw (never Huffman-coded) string literal.
fn encode_string_literal(buf: &mut Vec<u8>, data: &[u8]) {
    encode_prefix_int(buf, data.len() as u64, 7, 0x00);
    buf.extend_from_slice(data);
}

// -- Decoder --

/// HPACK decoder holding the per-connection dynamic table.
pub struct Decoder {
    dynamic_table: DynamicTable,
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            dynamic_table: DynamicTable::new(MAX_DYNAMIC_TABLE_SIZE),
        }
    }

    /// Decode one complete (reassembled) header block into an ordered field
    /// list. Literal names must already be lower-case; an upper-case octet
    /// in a literal name is a protocol error.
    pub fn decode(&mut self, buf: &[u8]) -> Result<Vec<HeaderField>> {
        let mut fields = Vec::new();
        let mut pos = 0;
        let mut block_started = false;

        while pos < buf.len() {
            let first = buf[pos];

            if first & 0x80 != 0 {
                // Indexed header field (Section 6.1): 1xxxxxxx.
                let (index, n) = decode_prefix_int(&buf[pos..], 7)
                    .ok_or_else(|| compression_error("bad field index"))?;
                pos += n;
                fields.push(self.get_indexed(index as usize)?);
            } else if first & 0x40 != 0 {
                // Literal with incremental indexing (Section 6.2.1): 01xxxxxx.
                let (field, n) = self.decode_literal(&buf[pos..], 6)?;
                pos += n;
                self.dynamic_table.insert(field.clone());
                fields.push(field);
            } else if first & 0x20 != 0 {
                // Dynamic table size update (Section 6.3): 001xxxxx.
                // Must be the first field of the block.
                if block_started {
                    return Err(compression_error("table size update not at block start"));
                }
                let (new_size, n) = decode_prefix_int(&buf[pos..], 5)
                    .ok_or_else(|| compression_error("bad table size update"))?;
                pos += n;
                if new_size as usize > MAX_DYNAMIC_TABLE_SIZE {
                    return Err(compression_error("table size update above hard cap"));
                }
                self.dynamic_table.set_max_size(new_size as usize);
                continue;
            } else {
                // Literal without indexing (0000xxxx) and literal never
                // indexed (0001xxxx) decode identically; the never-index
                // hint is advisory and not enforced here.
                let (field, n) = self.decode_literal(&buf[pos..], 4)?;
                pos += n;
                fields.push(field);
            }
            block_started = true;
        }

        Ok(fields)
    }

    /// Decode the name and value of a literal field representation with the
    /// given name-index prefix width. Returns the field and bytes consumed.
    fn decode_literal(&self, buf: &[u8], prefix_bits: u8) -> Result<(HeaderField, usize)> {
        let (name_index, mut pos) = decode_prefix_int(buf, prefix_bits)
            .ok_or_else(|| compression_error("bad literal name index"))?;
        let name = if name_index > 0 {
            self.get_name(name_index as usize)?
        } else {
            let (name, consumed) = decode_string_literal(&buf[pos..])?;
            pos += consumed;
            validate_literal_name(&name)?;
            name
        };
        let (value, consumed) = decode_string_literal(&buf[pos..])?;
        pos += consumed;
        Ok((HeaderField { name, value }, pos))
    }

    fn get_indexed(&self, index: usize) -> Result<HeaderField> {
        if index == 0 {
            return Err(compression_error("field index 0"));
        }
        if index <= STATIC_TABLE.len() {
            let (name, value) = STATIC_TABLE[index - 1];
            return Ok(HeaderField::new(name, value));
        }
        self.dynamic_table
            .get(index - STATIC_TABLE.len() - 1)
            .cloned()
            .ok_or_else(|| compression_error("dynamic table index out of range"))
    }

    fn get_name(&self, index: usize) -> Result<Vec<u8>> {
        Ok(self.get_indexed(index)?.name)
    }

    #[cfg(test)]
    fn dynamic_table(&self) -> &DynamicTable {
        &self.dynamic_table
    }
}

/// A literal (non-indexed) field name must already be lower-case on the
/// wire (RFC 7540 Section 8.1.2).
fn validate_literal_name(name: &[u8]) -> Result<()> {
    if name.iter().any(|b| b.is_ascii_uppercase()) {
        return Err(H2Error::connection(
            ErrorCode::ProtocolError,
            format!(
                "upper-case header field name: {}",
                String::from_utf8_lossy(name)
            ),
        ));
    }
    Ok(())
}

// -- Encoder --

/// HPACK encoder for the response path.
///
/// Emits every field as a literal without indexing: no dynamic table state,
/// no Huffman coding. Pseudo-headers are emitted before regular fields and
/// names are lower-cased.
#[derive(Debug, Default)]
pub struct Encoder;

impl Encoder {
    pub fn new() -> Self {
        Self
    }

    pub fn encode(&self, fields: &[HeaderField]) -> Vec<u8> {
        let mut buf = Vec::new();
        for field in fields.iter().filter(|f| f.is_pseudo()) {
            encode_field(&mut buf, field);
        }
        for field in fields.iter().filter(|f| !f.is_pseudo()) {
            encode_field(&mut buf, field);
        }
        buf
    }
}

fn encode_field(buf: &mut Vec<u8>, field: &HeaderField) {
    // Literal without indexing, new name: 0000 0000.
    buf.push(0x00);
    let name: Vec<u8> = field.name.iter().map(|b| b.to_ascii_lowercase()).collect();
    encode_string_literal(buf, &name);
    encode_string_literal(buf, &field.value);
}
