//! HTTP/1.1 protocol types: method, version, reason phrases, and the packed
//! per-message flag word.

use std::fmt;

/// HTTP request method.
///
/// The flag word allots a single bit to the method, so exactly these two
/// exist; any other token on the request line is a hard parse failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Method {
    /// GET
    #[default]
    Get,
    /// POST
    Post,
}

impl Method {
    /// Parse a method from its ASCII representation.
    #[must_use]
    pub fn from_bytes(src: &[u8]) -> Option<Self> {
        match src {
            b"GET" => Some(Self::Get),
            b"POST" => Some(Self::Post),
            _ => None,
        }
    }

    /// Returns the method as a string slice.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// HTTP protocol version. Only 1.1 appears on the wire here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Version {
    /// HTTP/1.1
    #[default]
    Http11,
}

impl Version {
    /// Parse a version token.
    #[must_use]
    pub fn from_bytes(src: &[u8]) -> Option<Self> {
        match src {
            b"HTTP/1.1" => Some(Self::Http11),
            _ => None,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HTTP/1.1")
    }
}

/// Reason phrase for the status codes this stack emits.
#[must_use]
pub fn default_reason(status: u16) -> &'static str {
    match status {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        _ => "Unknown",
    }
}

/// Connection-state sub-field (2 bits). Both bits clear means close.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// Connection: close (or no keep-alive/upgrade seen).
    #[default]
    Close,
    /// Connection: keep-alive.
    KeepAlive,
    /// Connection: upgrade (keep-alive implied or not, upgrade bit set).
    Upgrade,
    /// Both keep-alive and upgrade tokens present.
    KeepAliveUpgrade,
}

/// Content-encoding sub-field (3 bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u16)]
pub enum ContentEncoding {
    /// No transformation.
    #[default]
    Identity = 0,
    /// gzip (RFC 1952).
    Gzip = 1,
    /// LZW compress.
    Compress = 2,
    /// zlib deflate.
    Deflate = 3,
    /// Brotli.
    Brotli = 4,
}

impl ContentEncoding {
    /// Parse a Content-Encoding token (case-insensitive).
    #[must_use]
    pub fn from_token(token: &str) -> Option<Self> {
        if token.eq_ignore_ascii_case("identity") {
            Some(Self::Identity)
        } else if token.eq_ignore_ascii_case("gzip") {
            Some(Self::Gzip)
        } else if token.eq_ignore_ascii_case("compress") {
            Some(Self::Compress)
        } else if token.eq_ignore_ascii_case("deflate") {
            Some(Self::Deflate)
        } else if token.eq_ignore_ascii_case("br") {
            Some(Self::Brotli)
        } else {
            None
        }
    }

    /// The wire token for this encoding.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Identity => "identity",
            Self::Gzip => "gzip",
            Self::Compress => "compress",
            Self::Deflate => "deflate",
            Self::Brotli => "br",
        }
    }

    fn from_bits(bits: u16) -> Self {
        match bits {
            1 => Self::Gzip,
            2 => Self::Compress,
            3 => Self::Deflate,
            4 => Self::Brotli,
            _ => Self::Identity,
        }
    }
}

/// Packed per-message flag word.
///
/// Sub-fields never overlap:
///
/// ```text
/// bit  0      method (0 = GET, 1 = POST)
/// bits 1-2    connection-state (keep-alive bit, upgrade bit; both clear = close)
/// bit  3      cache-control (no-cache)
/// bit  4      transfer-encoding (0 = identity, 1 = chunked)
/// bits 5-7    content-encoding (identity/gzip/compress/deflate/br)
/// bit  8      upgrade-type (websocket)
/// bit  9      headers-read   (transient parse state)
/// bit 10      response-ready (transient parse state)
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Default)]
pub struct MessageFlags(u16);

const FLAG_METHOD: u16 = 1 << 0;
const FLAG_KEEP_ALIVE: u16 = 1 << 1;
const FLAG_UPGRADE: u16 = 1 << 2;
const FLAG_NO_CACHE: u16 = 1 << 3;
const FLAG_CHUNKED: u16 = 1 << 4;
const ENCODING_SHIFT: u16 = 5;
const ENCODING_MASK: u16 = 0b111 << ENCODING_SHIFT;
const FLAG_UPGRADE_WEBSOCKET: u16 = 1 << 8;
const FLAG_HEADERS_READ: u16 = 1 << 9;
const FLAG_RESPONSE_READY: u16 = 1 << 10;

impl MessageFlags {
    /// All bits clear: GET, close, identity coding, no parse progress.
    #[must_use]
    pub const fn new() -> Self {
        Self(0)
    }

    fn set(&mut self, bit: u16, value: bool) {
        if value {
            self.0 |= bit;
        } else {
            self.0 &= !bit;
        }
    }

    /// The request method bit.
    #[must_use]
    pub const fn method(self) -> Method {
        if self.0 & FLAG_METHOD != 0 {
            Method::Post
        } else {
            Method::Get
        }
    }

    /// Set the request method bit.
    pub fn set_method(&mut self, method: Method) {
        self.set(FLAG_METHOD, matches!(method, Method::Post));
    }

    /// Decode the 2-bit connection-state field.
    #[must_use]
    pub const fn connection(self) -> ConnectionState {
        match (
            self.0 & FLAG_KEEP_ALIVE != 0,
            self.0 & FLAG_UPGRADE != 0,
        ) {
            (false, false) => ConnectionState::Close,
            (true, false) => ConnectionState::KeepAlive,
            (false, true) => ConnectionState::Upgrade,
            (true, true) => ConnectionState::KeepAliveUpgrade,
        }
    }

    /// Clear both connection-state bits ("close").
    pub fn set_connection_close(&mut self) {
        self.0 &= !(FLAG_KEEP_ALIVE | FLAG_UPGRADE);
    }

    /// Set the keep-alive bit.
    pub fn set_keep_alive(&mut self) {
        self.0 |= FLAG_KEEP_ALIVE;
    }

    /// Set the upgrade bit.
    pub fn set_upgrade(&mut self) {
        self.0 |= FLAG_UPGRADE;
    }

    /// True when the upgrade connection-state bit is set.
    #[must_use]
    pub const fn is_upgrade(self) -> bool {
        self.0 & FLAG_UPGRADE != 0
    }

    /// True when the keep-alive connection-state bit is set.
    #[must_use]
    pub const fn is_keep_alive(self) -> bool {
        self.0 & FLAG_KEEP_ALIVE != 0
    }

    /// Cache-control bit (Cache-Control: no-cache).
    #[must_use]
    pub const fn no_cache(self) -> bool {
        self.0 & FLAG_NO_CACHE != 0
    }

    /// Set the cache-control bit.
    pub fn set_no_cache(&mut self, value: bool) {
        self.set(FLAG_NO_CACHE, value);
    }

    /// Transfer-encoding bit: true for chunked.
    #[must_use]
    pub const fn chunked(self) -> bool {
        self.0 & FLAG_CHUNKED != 0
    }

    /// Set the transfer-encoding bit.
    pub fn set_chunked(&mut self, value: bool) {
        self.set(FLAG_CHUNKED, value);
    }

    /// Decode the 3-bit content-encoding field.
    #[must_use]
    pub fn content_encoding(self) -> ContentEncoding {
        ContentEncoding::from_bits((self.0 & ENCODING_MASK) >> ENCODING_SHIFT)
    }

    /// Store the 3-bit content-encoding field.
    pub fn set_content_encoding(&mut self, encoding: ContentEncoding) {
        self.0 = (self.0 & !ENCODING_MASK) | ((encoding as u16) << ENCODING_SHIFT);
    }

    /// Upgrade-type bit (Upgrade: websocket seen).
    #[must_use]
    pub const fn upgrade_websocket(self) -> bool {
        self.0 & FLAG_UPGRADE_WEBSOCKET != 0
    }

    /// Set the upgrade-type bit.
    pub fn set_upgrade_websocket(&mut self, value: bool) {
        self.set(FLAG_UPGRADE_WEBSOCKET, value);
    }

    /// Transient parse bit: the header block has been fully consumed.
    #[must_use]
    pub const fn headers_read(self) -> bool {
        self.0 & FLAG_HEADERS_READ != 0
    }

    /// Set the headers-read parse bit.
    pub fn set_headers_read(&mut self, value: bool) {
        self.set(FLAG_HEADERS_READ, value);
    }

    /// Transient parse bit: the message (headers + body) is complete.
    #[must_use]
    pub const fn response_ready(self) -> bool {
        self.0 & FLAG_RESPONSE_READY != 0
    }

    /// Set the response-ready parse bit.
    pub fn set_response_ready(&mut self, value: bool) {
        self.set(FLAG_RESPONSE_READY, value);
    }
}

impl fmt::Debug for MessageFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageFlags")
            .field("method", &self.method())
            .field("connection", &self.connection())
            .field("no_cache", &self.no_cache())
            .field("chunked", &self.chunked())
            .field("content_encoding", &self.content_encoding())
            .field("upgrade_websocket", &self.upgrade_websocket())
            .field("headers_read", &self.headers_read())
            .field("response_ready", &self.response_ready())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_parse() {
        assert_eq!(Method::from_bytes(b"GET"), Some(Method::Get));
        assert_eq!(Method::from_bytes(b"POST"), Some(Method::Post));
        assert_eq!(Method::from_bytes(b"PURGE"), None);
        assert_eq!(Method::from_bytes(b"get"), None);
    }

    #[test]
    fn default_reasons() {
        assert_eq!(default_reason(101), "Switching Protocols");
        assert_eq!(default_reason(200), "OK");
        assert_eq!(default_reason(404), "Not Found");
        assert_eq!(default_reason(502), "Bad Gateway");
        assert_eq!(default_reason(999), "Unknown");
    }

    #[test]
    fn flag_fields_do_not_overlap() {
        let mut flags = MessageFlags::new();
        flags.set_method(Method::Post);
        flags.set_keep_alive();
        flags.set_upgrade();
        flags.set_no_cache(true);
        flags.set_chunked(true);
        flags.set_content_encoding(ContentEncoding::Brotli);
        flags.set_upgrade_websocket(true);
        flags.set_headers_read(true);
        flags.set_response_ready(true);

        assert_eq!(flags.method(), Method::Post);
        assert_eq!(flags.connection(), ConnectionState::KeepAliveUpgrade);
        assert!(flags.no_cache());
        assert!(flags.chunked());
        assert_eq!(flags.content_encoding(), ContentEncoding::Brotli);
        assert!(flags.upgrade_websocket());
        assert!(flags.headers_read());
        assert!(flags.response_ready());

        // Clearing the encoding field leaves everything else intact.
        flags.set_content_encoding(ContentEncoding::Identity);
        assert_eq!(flags.content_encoding(), ContentEncoding::Identity);
        assert_eq!(flags.method(), Method::Post);
        assert!(flags.chunked());
        assert!(flags.response_ready());
    }

    #[test]
    fn connection_close_clears_both_bits() {
        let mut flags = MessageFlags::new();
        flags.set_keep_alive();
        flags.set_upgrade();
        flags.set_connection_close();
        assert_eq!(flags.connection(), ConnectionState::Close);
    }

    #[test]
    fn content_encoding_tokens() {
        assert_eq!(
            ContentEncoding::from_token("GZIP"),
            Some(ContentEncoding::Gzip)
        );
        assert_eq!(
            ContentEncoding::from_token("br"),
            Some(ContentEncoding::Brotli)
        );
        assert_eq!(ContentEncoding::from_token("zstd"), None);
    }
}
