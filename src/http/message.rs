//! The [`HttpMessage`] data model and bounded string fields.

use bytes::BytesMut;
use std::fmt;
use std::ops::Deref;

use super::types::{MessageFlags, Method};

/// Maximum length of a header-derived string field, in bytes.
pub const FIELD_CAPACITY: usize = 128;

/// Maximum body size, in bytes. Deserialization clamps at this boundary and
/// never writes past it.
pub const BODY_CAPACITY: usize = 256 * 1024;

/// An owned string with a hard length cap. Writes that would exceed the cap
/// truncate at a UTF-8 boundary; they never overflow and never fail.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct BoundedString<const N: usize>(String);

impl<const N: usize> BoundedString<N> {
    /// The empty string.
    #[must_use]
    pub const fn new() -> Self {
        Self(String::new())
    }

    /// Replace the contents with `value`, truncating to the cap.
    pub fn assign(&mut self, value: &str) {
        self.0.clear();
        self.0.push_str(truncate_to_boundary(value, N));
    }

    /// Append `value`, truncating whatever would not fit.
    pub fn push_str(&mut self, value: &str) {
        let room = N - self.0.len();
        self.0.push_str(truncate_to_boundary(value, room));
    }

    /// Clear the contents.
    pub fn clear(&mut self) {
        self.0.clear();
    }

    /// View as `&str`.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Longest prefix of `value` that fits in `cap` bytes without splitting a
/// UTF-8 sequence.
fn truncate_to_boundary(value: &str, cap: usize) -> &str {
    if value.len() <= cap {
        return value;
    }
    let mut end = cap;
    while end > 0 && !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}

impl<const N: usize> From<&str> for BoundedString<N> {
    fn from(value: &str) -> Self {
        let mut s = Self::new();
        s.assign(value);
        s
    }
}

impl<const N: usize> Deref for BoundedString<N> {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl<const N: usize> PartialEq<&str> for BoundedString<N> {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

impl<const N: usize> fmt::Debug for BoundedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&self.0, f)
    }
}

impl<const N: usize> fmt::Display for BoundedString<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A single HTTP/1.1 message, request or response.
///
/// A non-zero [`status_code`](Self::status_code) makes this a response; the
/// serializer emits a status line instead of a request line. All string
/// fields are capped at [`FIELD_CAPACITY`]; the body is capped at
/// [`BODY_CAPACITY`]. Parse progress lives in the two transient bits of
/// [`flags`](Self::flags).
#[derive(Clone, Default, Debug)]
pub struct HttpMessage {
    /// Request path (request) or empty (response).
    pub path: BoundedString<FIELD_CAPACITY>,
    /// Host header.
    pub host: BoundedString<FIELD_CAPACITY>,
    /// Origin header.
    pub origin: BoundedString<FIELD_CAPACITY>,
    /// Authorization header.
    pub authorization: BoundedString<FIELD_CAPACITY>,
    /// Content-Type (requests also accept Accept into this field).
    pub content_type: BoundedString<FIELD_CAPACITY>,
    /// Sec-WebSocket-Key (request) or Sec-WebSocket-Accept (response).
    pub sec_websocket_key: BoundedString<FIELD_CAPACITY>,
    /// Sec-WebSocket-Protocol header.
    pub sec_websocket_protocol: BoundedString<FIELD_CAPACITY>,
    /// Message body, clamped at [`BODY_CAPACITY`].
    pub body: BytesMut,
    /// Declared Content-Length.
    pub content_length: usize,
    /// Bytes remaining in the chunk currently being consumed.
    pub chunk_remaining: usize,
    /// Sec-WebSocket-Version numeric value (13 expected).
    pub websocket_version: u16,
    /// Response status code; zero for requests.
    pub status_code: u16,
    /// Packed flag word.
    pub flags: MessageFlags,
}

impl HttpMessage {
    /// A fresh GET request message.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A request message with the given method and path.
    #[must_use]
    pub fn request(method: Method, path: &str) -> Self {
        let mut msg = Self::default();
        msg.flags.set_method(method);
        msg.path.assign(path);
        msg
    }

    /// A response message with the given status code.
    #[must_use]
    pub fn response(status: u16) -> Self {
        let mut msg = Self::default();
        msg.status_code = status;
        msg
    }

    /// True when a status code is set, i.e. this serializes as a response.
    #[must_use]
    pub const fn is_response(&self) -> bool {
        self.status_code != 0
    }

    /// Append body bytes, clamping at [`BODY_CAPACITY`]. Returns the number
    /// of bytes actually stored; excess input is accepted and discarded.
    pub fn append_body(&mut self, data: &[u8]) -> usize {
        let room = BODY_CAPACITY - self.body.len();
        let stored = room.min(data.len());
        self.body.extend_from_slice(&data[..stored]);
        stored
    }

    /// Set the body, clamping at [`BODY_CAPACITY`], and record its length as
    /// the Content-Length.
    pub fn set_body(&mut self, data: &[u8]) {
        self.body.clear();
        self.append_body(data);
        self.content_length = self.body.len();
    }
}
