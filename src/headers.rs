//! Request header validation and the exchange header facade.
//!
//! `HeaderFields` is the per-block container the connection fills while a
//! header block is being decoded; it enforces the pseudo-header rules of
//! RFC 7540 Section 8.1.2. `Headers` is the case-normalized multi-value
//! mapping handed to application handlers.

use crate::error::{ErrorCode, H2Error, Result};
use crate::hpack::HeaderField;

/// Pseudo-headers a request may carry.
const ALLOWED_PSEUDO: &[&[u8]] = &[b":method", b":path", b":scheme", b":authority"];

/// Per-block container enforcing request header invariants:
/// - pseudo-headers only from the allow-list, all before regular fields;
/// - `:method`, `:path`, `:scheme` each exactly once and non-empty;
/// - `connection` prohibited; `te` only with value `trailers`.
#[derive(Debug, Default)]
pub struct HeaderFields {
    fields: Vec<HeaderField>,
    seen_regular: bool,
    method: u32,
    path: u32,
    scheme: u32,
    authority: u32,
}

impl HeaderFields {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one decoded field, validating as we go. `stream_id` scopes any
    /// violation to the offending stream.
    pub fn push(&mut self, stream_id: u32, field: HeaderField) -> Result<()> {
        let reject = |msg: String| Err(H2Error::stream(stream_id, ErrorCode::ProtocolError, msg));

        if field.is_pseudo() {
            if self.seen_regular {
                return reject(format!(
                    "pseudo-header {} after regular fields",
                    String::from_utf8_lossy(&field.name)
                ));
            }
            if !ALLOWED_PSEUDO.contains(&field.name.as_slice()) {
                return reject(format!(
                    "unknown pseudo-header {}",
                    String::from_utf8_lossy(&field.name)
                ));
            }
            match field.name.as_slice() {
                b":method" => self.method += 1,
                b":path" => self.path += 1,
                b":scheme" => self.scheme += 1,
                _ => self.authority += 1,
            }
        } else {
            self.seen_regular = true;
            match field.name.as_slice() {
                b"connection" => {
                    return reject("connection header is prohibited".into());
                }
                b"te" if field.value != b"trailers" => {
                    return reject("te header only allows value \"trailers\"".into());
                }
                _ => {}
            }
        }
        self.fields.push(field);
        Ok(())
    }

    /// Final validation once the block is complete: the three required
    /// pseudo-headers must each appear exactly once and non-empty.
    pub fn finish(self, stream_id: u32) -> Result<Vec<HeaderField>> {
        for (count, name) in [
            (self.method, ":method"),
            (self.path, ":path"),
            (self.scheme, ":scheme"),
        ] {
            if count != 1 {
                return Err(H2Error::stream(
                    stream_id,
                    ErrorCode::ProtocolError,
                    format!("{name} must appear exactly once (got {count})"),
                ));
            }
        }
        if self.authority > 1 {
            return Err(H2Error::stream(
                stream_id,
                ErrorCode::ProtocolError,
                ":authority must appear at most once",
            ));
        }
        for field in &self.fields {
            if field.is_pseudo() && field.name.as_slice() != b":authority" && field.value.is_empty()
            {
                return Err(H2Error::stream(
                    stream_id,
                    ErrorCode::ProtocolError,
                    format!("empty {}", String::from_utf8_lossy(&field.name)),
                ));
            }
        }
        Ok(self.fields)
    }
}

/// Normalize a header name to the exchange facade's canonical form: first
/// letter upper-case, the rest lower. Pseudo-headers pass through untouched.
fn canonical_name(name: &str) -> String {
    if name.starts_with(':') {
        return name.to_string();
    }
    let mut out = String::with_capacity(name.len());
    let mut chars = name.chars();
    if let Some(first) = chars.next() {
        out.push(first.to_ascii_uppercase());
    }
    for c in chars {
        out.push(c.to_ascii_lowercase());
    }
    out
}

/// Case-normalized multi-value header mapping exposed to handler code.
///
/// Insertion order is preserved; duplicate names are kept as separate
/// entries (`set-cookie` and friends rely on this).
#[derive(Debug, Default, Clone)]
pub struct Headers {
    entries: Vec<(String, String)>,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a value for `name`.
    pub fn add(&mut self, name: &str, value: impl Into<String>) {
        self.entries.push((canonical_name(name), value.into()));
    }

    /// Replace every value of `name` with a single value.
    pub fn set(&mut self, name: &str, value: impl Into<String>) {
        let canonical = canonical_name(name);
        self.entries.retain(|(n, _)| *n != canonical);
        self.entries.push((canonical, value.into()));
    }

    /// First value for `name`, if any.
    pub fn get(&self, name: &str) -> Option<&str> {
        let canonical = canonical_name(name);
        self.entries
            .iter()
            .find(|(n, _)| *n == canonical)
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name`, in insertion order.
    pub fn get_all(&self, name: &str) -> Vec<&str> {
        let canonical = canonical_name(name);
        self.entries
            .iter()
            .filter(|(n, _)| *n == canonical)
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The decoded, validated request line and headers for one stream.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: String,
    pub path: String,
    pub scheme: String,
    pub authority: Option<String>,
    pub headers: Headers,
}

impl Request {
    /// Build a request view from a validated field list (the output of
    /// [`HeaderFields::finish`]).
    pub fn from_fields(fields: &[HeaderField]) -> Self {
        let mut method = String::new();
        let mut path = String::new();
        let mut scheme = String::new();
        let mut authority = None;
        let mut headers = Headers::new();

        for field in fields {
            let value = String::from_utf8_lossy(&field.value).into_owned();
            match field.name.as_slice() {
                b":method" => method = value,
                b":path" => path = value,
                b":scheme" => scheme = value,
                b":authority" => authority = Some(value),
                name => headers.add(&String::from_utf8_lossy(name), value),
            }
        }

        Self {
            method,
            path,
            scheme,
            authority,
            headers,
        }
    }

    /// Declared `Content-length`, if present and well-formed.
    pub fn content_length(&self) -> Option<u64> {
        self.headers.get("content-length")?.parse().ok()
    }
}

/// Response status and headers accumulated by the handler before the
/// response header block is sent.
#[derive(Debug, Clone)]
pub struct Response {
    pub status: u16,
    pub headers: Headers,
}

impl Default for Response {
    fn default() -> Self {
        Self {
            status: 200,
            headers: Headers::new(),
        }
    }
}

impl Response {
    /// Flatten into HPACK fields: `:status` first, then regular headers with
    /// lower-cased names.
    pub fn to_fields(&self) -> Vec<HeaderField> {
        let mut fields = Vec::with_capacity(1 + self.headers.len());
        fields.push(HeaderField::new(
            b":status".as_slice(),
            self.status.to_string().into_bytes(),
        ));
        for (name, value) in self.headers.iter() {
            fields.push(HeaderField::new(
                name.to_ascii_lowercase().into_bytes(),
                value.as_bytes().to_vec(),
            ));
        }
        fields
    }
}
