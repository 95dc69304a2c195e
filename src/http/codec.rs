//! Incremental HTTP/1.1 message codec.
//!
//! [`HttpCodec`] implements [`Decoder`] for parsing requests and responses
//! and [`Encoder`] for serializing them. Decoding is re-entrant: input may
//! arrive in arbitrarily fragmented pieces across any number of calls, and a
//! single call consumes as many complete logical pieces as the buffer holds.
//! Parse progress is carried in the in-progress message's transient flag bits
//! plus a small amount of codec-side chunk state; leftover bytes are handled
//! by an explicit loop over the buffer, never recursion.

use bytes::BytesMut;
use std::fmt;
use std::io::{self, Read};
use tracing::debug;

use crate::codec::{Decoder, Encoder};
use crate::http::message::HttpMessage;
use crate::http::types::{default_reason, ConnectionState, ContentEncoding, Method, Version};

/// Longest accepted start or header line.
const MAX_LINE: usize = 8192;

/// HTTP/1.1 protocol errors. Any of these means the connection is dropped;
/// no partial message state survives.
#[derive(Debug)]
pub enum HttpError {
    /// An I/O error from the transport.
    Io(io::Error),
    /// The request or status line is malformed.
    BadStartLine,
    /// The request method is not one this stack speaks.
    BadMethod,
    /// Unsupported HTTP version token.
    BadVersion,
    /// A header line is malformed.
    BadHeader,
    /// Content-Length is not a valid integer.
    BadContentLength,
    /// A chunk-size line is not valid hex.
    BadChunkSize,
    /// Missing CRLF after chunk data, or junk after the final chunk.
    BadChunkTerminator,
    /// A line exceeded the accepted maximum.
    LineTooLong,
    /// The gzip body failed to inflate.
    Inflate(String),
}

impl fmt::Display for HttpError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::BadStartLine => write!(f, "malformed start line"),
            Self::BadMethod => write!(f, "unrecognised HTTP method"),
            Self::BadVersion => write!(f, "unsupported HTTP version"),
            Self::BadHeader => write!(f, "malformed header"),
            Self::BadContentLength => write!(f, "invalid Content-Length"),
            Self::BadChunkSize => write!(f, "invalid chunk size"),
            Self::BadChunkTerminator => write!(f, "malformed chunk terminator"),
            Self::LineTooLong => write!(f, "line exceeds maximum length"),
            Self::Inflate(msg) => write!(f, "gzip inflate failed: {msg}"),
        }
    }
}

impl std::error::Error for HttpError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for HttpError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

/// Progress through a chunked body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChunkPhase {
    /// Expecting a hex chunk-size line.
    SizeLine,
    /// Copying chunk data; remaining count lives in the message.
    Data,
    /// Expecting the CRLF that closes a chunk.
    DataCrlf,
    /// Zero-size chunk seen; expecting the final blank line.
    Final,
}

/// HTTP/1.1 request/response codec.
///
/// One codec instance serves one connection; the in-progress message and the
/// chunk cursor persist between `decode` calls.
#[derive(Debug)]
pub struct HttpCodec {
    /// Message being assembled.
    msg: HttpMessage,
    /// Start line consumed but headers not yet finished.
    saw_start_line: bool,
    /// Total body bytes consumed off the wire (may exceed what was stored
    /// when the body clamps at capacity).
    body_received: usize,
    /// A Content-Length header has been seen; a second one, or chunked
    /// alongside it, is ambiguous framing.
    saw_content_length: bool,
    chunk: ChunkPhase,
    /// User-Agent (requests) or Server (responses) header value.
    agent: String,
}

impl HttpCodec {
    /// Create a codec emitting the given User-Agent/Server string.
    #[must_use]
    pub fn new(agent: impl Into<String>) -> Self {
        Self {
            msg: HttpMessage::new(),
            saw_start_line: false,
            body_received: 0,
            saw_content_length: false,
            chunk: ChunkPhase::SizeLine,
            agent: agent.into(),
        }
    }

    fn reset(&mut self) {
        self.msg = HttpMessage::new();
        self.saw_start_line = false;
        self.body_received = 0;
        self.saw_content_length = false;
        self.chunk = ChunkPhase::SizeLine;
    }

    /// Finish the in-progress message and hand it out.
    fn complete(&mut self) -> Result<HttpMessage, HttpError> {
        if self.msg.flags.content_encoding() == ContentEncoding::Gzip && !self.msg.body.is_empty()
        {
            inflate_in_place(&mut self.msg)?;
        }
        self.msg.flags.set_response_ready(true);
        let done = std::mem::take(&mut self.msg);
        self.reset();
        Ok(done)
    }

    fn parse_start_line(&mut self, line: &str) -> Result<(), HttpError> {
        let mut parts = line.split_ascii_whitespace();
        let first = parts.next().ok_or(HttpError::BadStartLine)?;

        if Version::from_bytes(first.as_bytes()).is_some() {
            // Status line: HTTP/1.1 CODE REASON
            let code = parts.next().ok_or(HttpError::BadStartLine)?;
            self.msg.status_code = code.parse().map_err(|_| HttpError::BadStartLine)?;
            // Reason phrase is informational; dropped.
        } else {
            // Request line: METHOD PATH HTTP/1.1
            let method = Method::from_bytes(first.as_bytes()).ok_or(HttpError::BadMethod)?;
            let path = parts.next().ok_or(HttpError::BadStartLine)?;
            let version = parts.next().ok_or(HttpError::BadStartLine)?;
            Version::from_bytes(version.as_bytes()).ok_or(HttpError::BadVersion)?;
            self.msg.flags.set_method(method);
            self.msg.path.assign(path);
        }
        self.saw_start_line = true;
        Ok(())
    }

    fn parse_header(&mut self, line: &str) -> Result<(), HttpError> {
        let colon = line.find(':').ok_or(HttpError::BadHeader)?;
        let name = line[..colon].trim();
        let value = line[colon + 1..].trim();
        if name.is_empty() {
            return Err(HttpError::BadHeader);
        }

        let msg = &mut self.msg;
        if name.eq_ignore_ascii_case("host") {
            msg.host.assign(value);
        } else if name.eq_ignore_ascii_case("content-type")
            || name.eq_ignore_ascii_case("accept")
        {
            msg.content_type.assign(value);
        } else if name.eq_ignore_ascii_case("authorization") {
            msg.authorization.assign(value);
        } else if name.eq_ignore_ascii_case("content-length") {
            if self.saw_content_length || msg.flags.chunked() {
                return Err(HttpError::BadContentLength);
            }
            msg.content_length = value.parse().map_err(|_| HttpError::BadContentLength)?;
            self.saw_content_length = true;
        } else if name.eq_ignore_ascii_case("origin") {
            msg.origin.assign(value);
        } else if name.eq_ignore_ascii_case("sec-websocket-key")
            || name.eq_ignore_ascii_case("sec-websocket-accept")
        {
            msg.sec_websocket_key.assign(value);
        } else if name.eq_ignore_ascii_case("sec-websocket-protocol") {
            msg.sec_websocket_protocol.assign(value);
        } else if name.eq_ignore_ascii_case("sec-websocket-version") {
            msg.websocket_version = value.parse().unwrap_or(0);
        } else if name.eq_ignore_ascii_case("cache-control") {
            if value
                .split(',')
                .any(|t| t.trim().eq_ignore_ascii_case("no-cache"))
            {
                msg.flags.set_no_cache(true);
            }
        } else if name.eq_ignore_ascii_case("connection") {
            // Tokens apply in order: "close" clears both state bits, later
            // tokens in the same value can still set theirs.
            for token in value.split(',') {
                let token = token.trim();
                if token.eq_ignore_ascii_case("close") {
                    msg.flags.set_connection_close();
                } else if token.eq_ignore_ascii_case("keep-alive") {
                    msg.flags.set_keep_alive();
                } else if token.eq_ignore_ascii_case("upgrade") {
                    msg.flags.set_upgrade();
                }
            }
        } else if name.eq_ignore_ascii_case("transfer-encoding") {
            if value.eq_ignore_ascii_case("chunked") {
                if self.saw_content_length {
                    return Err(HttpError::BadContentLength);
                }
                msg.flags.set_chunked(true);
            }
        } else if name.eq_ignore_ascii_case("content-encoding") {
            if let Some(encoding) = ContentEncoding::from_token(value) {
                msg.flags.set_content_encoding(encoding);
            }
        } else if name.eq_ignore_ascii_case("upgrade") {
            if value.eq_ignore_ascii_case("websocket") {
                msg.flags.set_upgrade_websocket(true);
            }
        } else {
            debug!(header = name, "ignoring unrecognized header");
        }
        Ok(())
    }

    /// Phase B for a chunked body. Returns true when the body is complete.
    fn decode_chunked(&mut self, src: &mut BytesMut) -> Result<Option<bool>, HttpError> {
        loop {
            match self.chunk {
                ChunkPhase::SizeLine => {
                    let Some(line) = split_line_crlf(src)? else {
                        return Ok(None);
                    };
                    let line =
                        std::str::from_utf8(line.as_ref()).map_err(|_| HttpError::BadChunkSize)?;
                    let size_part = line.split(';').next().unwrap_or("").trim();
                    if size_part.is_empty() {
                        return Err(HttpError::BadChunkSize);
                    }
                    let size = usize::from_str_radix(size_part, 16)
                        .map_err(|_| HttpError::BadChunkSize)?;
                    if size == 0 {
                        self.chunk = ChunkPhase::Final;
                    } else {
                        self.msg.chunk_remaining = size;
                        self.chunk = ChunkPhase::Data;
                    }
                }

                ChunkPhase::Data => {
                    if src.is_empty() {
                        return Ok(None);
                    }
                    let take = src.len().min(self.msg.chunk_remaining);
                    let data = src.split_to(take);
                    self.msg.append_body(data.as_ref());
                    self.body_received += take;
                    self.msg.chunk_remaining -= take;
                    if self.msg.chunk_remaining == 0 {
                        self.chunk = ChunkPhase::DataCrlf;
                    }
                }

                ChunkPhase::DataCrlf => {
                    if src.len() < 2 {
                        return Ok(None);
                    }
                    if &src.as_ref()[..2] != b"\r\n" {
                        return Err(HttpError::BadChunkTerminator);
                    }
                    let _ = src.split_to(2);
                    self.chunk = ChunkPhase::SizeLine;
                }

                ChunkPhase::Final => {
                    let Some(line) = split_line_crlf(src)? else {
                        return Ok(None);
                    };
                    if !line.is_empty() {
                        // Trailers are not part of this stack.
                        return Err(HttpError::BadChunkTerminator);
                    }
                    return Ok(Some(true));
                }
            }
        }
    }
}

impl Decoder for HttpCodec {
    type Item = HttpMessage;
    type Error = HttpError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<HttpMessage>, HttpError> {
        loop {
            // Phase A: start line and headers, one line at a time.
            if !self.msg.flags.headers_read() {
                let Some(line) = split_line_crlf(src)? else {
                    return Ok(None);
                };
                let line = std::str::from_utf8(line.as_ref())
                    .map_err(|_| HttpError::BadHeader)?
                    .to_owned();

                if !self.saw_start_line {
                    if line.is_empty() {
                        // Stray CRLF between messages; tolerated.
                        continue;
                    }
                    self.parse_start_line(&line)?;
                } else if line.is_empty() {
                    self.msg.flags.set_headers_read(true);
                    if !self.msg.flags.chunked() && self.msg.content_length == 0 {
                        return self.complete().map(Some);
                    }
                } else {
                    self.parse_header(&line)?;
                }
                continue;
            }

            // Phase B: body.
            if self.msg.flags.chunked() {
                match self.decode_chunked(src)? {
                    Some(true) => return self.complete().map(Some),
                    _ => return Ok(None),
                }
            }

            if src.is_empty() {
                return Ok(None);
            }
            // Consume the declared length off the wire even past the storage
            // cap; completing early would leave body bytes to misparse as the
            // next start line.
            let needed = self.msg.content_length - self.body_received;
            let take = src.len().min(needed);
            let data = src.split_to(take);
            self.msg.append_body(data.as_ref());
            self.body_received += take;
            if self.body_received >= self.msg.content_length {
                return self.complete().map(Some);
            }
            return Ok(None);
        }
    }
}

impl Encoder<HttpMessage> for HttpCodec {
    type Error = HttpError;

    fn encode(&mut self, msg: HttpMessage, dst: &mut BytesMut) -> Result<(), HttpError> {
        use std::fmt::Write;

        let mut head = String::with_capacity(256);

        if msg.is_response() {
            let _ = write!(
                head,
                "HTTP/1.1 {} {}\r\n",
                msg.status_code,
                default_reason(msg.status_code)
            );
        } else {
            let path = if msg.path.is_empty() { "/" } else { &msg.path };
            let _ = write!(head, "{} {} HTTP/1.1\r\n", msg.flags.method(), path);
        }

        if !msg.host.is_empty() {
            let _ = write!(head, "Host: {}\r\n", msg.host);
        }
        if !msg.origin.is_empty() {
            let _ = write!(head, "Origin: {}\r\n", msg.origin);
        }
        if !msg.content_type.is_empty() {
            let _ = write!(head, "Content-Type: {}\r\n", msg.content_type);
        }
        if !msg.authorization.is_empty() {
            let _ = write!(head, "Authorization: {}\r\n", msg.authorization);
        }
        if !self.agent.is_empty() {
            let label = if msg.is_response() { "Server" } else { "User-Agent" };
            let _ = write!(head, "{}: {}\r\n", label, self.agent);
        }
        if !msg.sec_websocket_key.is_empty() {
            let label = if msg.is_response() {
                "Sec-WebSocket-Accept"
            } else {
                "Sec-WebSocket-Key"
            };
            let _ = write!(head, "{}: {}\r\n", label, msg.sec_websocket_key);
        }
        if !msg.sec_websocket_protocol.is_empty() {
            let _ = write!(
                head,
                "Sec-WebSocket-Protocol: {}\r\n",
                msg.sec_websocket_protocol
            );
        }
        if msg.websocket_version != 0 && !msg.is_response() {
            let _ = write!(head, "Sec-WebSocket-Version: {}\r\n", msg.websocket_version);
        }

        if msg.flags.chunked() {
            head.push_str("Transfer-Encoding: chunked\r\n");
        } else if !msg.body.is_empty() {
            let _ = write!(head, "Content-Length: {}\r\n", msg.body.len());
        }

        if msg.flags.upgrade_websocket() {
            head.push_str("Upgrade: websocket\r\n");
        }

        match msg.flags.connection() {
            ConnectionState::Close => head.push_str("Connection: close\r\n"),
            ConnectionState::KeepAlive => head.push_str("Connection: keep-alive\r\n"),
            ConnectionState::Upgrade => head.push_str("Connection: Upgrade\r\n"),
            ConnectionState::KeepAliveUpgrade => {
                head.push_str("Connection: keep-alive, Upgrade\r\n");
            }
        }

        if msg.flags.no_cache() {
            head.push_str("Cache-Control: no-cache\r\n");
        }
        if msg.flags.content_encoding() != ContentEncoding::Identity {
            let _ = write!(
                head,
                "Content-Encoding: {}\r\n",
                msg.flags.content_encoding().as_str()
            );
        }

        head.push_str("\r\n");
        dst.extend_from_slice(head.as_bytes());

        if msg.flags.chunked() {
            if !msg.body.is_empty() {
                let mut chunk_line = String::with_capacity(16);
                let _ = write!(chunk_line, "{:X}\r\n", msg.body.len());
                dst.extend_from_slice(chunk_line.as_bytes());
                dst.extend_from_slice(&msg.body);
                dst.extend_from_slice(b"\r\n");
            }
            dst.extend_from_slice(b"0\r\n\r\n");
        } else if !msg.body.is_empty() {
            dst.extend_from_slice(&msg.body);
        }

        Ok(())
    }
}

/// Split one CRLF-terminated line off the front of `src`, without the CRLF.
/// Returns `None` when no complete line has arrived yet.
fn split_line_crlf(src: &mut BytesMut) -> Result<Option<BytesMut>, HttpError> {
    let Some(line_end) = src.as_ref().windows(2).position(|w| w == b"\r\n") else {
        if src.len() > MAX_LINE {
            return Err(HttpError::LineTooLong);
        }
        return Ok(None);
    };
    if line_end > MAX_LINE {
        return Err(HttpError::LineTooLong);
    }
    let line = src.split_to(line_end);
    let _ = src.split_to(2);
    Ok(Some(line))
}

/// Inflate a fully-received gzip body in place, clamping at capacity.
fn inflate_in_place(msg: &mut HttpMessage) -> Result<(), HttpError> {
    let mut decoder = flate2::read::GzDecoder::new(msg.body.as_ref());
    let mut inflated = Vec::with_capacity(msg.body.len() * 2);
    decoder
        .read_to_end(&mut inflated)
        .map_err(|e| HttpError::Inflate(e.to_string()))?;
    msg.body.clear();
    msg.append_body(&inflated);
    msg.flags.set_content_encoding(ContentEncoding::Identity);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::message::BODY_CAPACITY;
    use crate::http::types::ConnectionState;

    fn decode_one(codec: &mut HttpCodec, data: &[u8]) -> Result<Option<HttpMessage>, HttpError> {
        let mut buf = BytesMut::from(data);
        codec.decode(&mut buf)
    }

    fn encode_one(msg: HttpMessage) -> Vec<u8> {
        let mut codec = HttpCodec::new("wireproto");
        let mut buf = BytesMut::with_capacity(1024);
        codec.encode(msg, &mut buf).unwrap();
        buf.to_vec()
    }

    #[test]
    fn decode_simple_get() {
        let mut codec = HttpCodec::new("");
        let msg = decode_one(
            &mut codec,
            b"GET / HTTP/1.1\r\nHost: example.com\r\nConnection: close\r\n\r\n",
        )
        .unwrap()
        .unwrap();
        assert_eq!(msg.flags.method(), Method::Get);
        assert_eq!(msg.path, "/");
        assert_eq!(msg.host, "example.com");
        assert_eq!(msg.flags.connection(), ConnectionState::Close);
        assert!(msg.flags.headers_read());
        assert!(msg.flags.response_ready());
        assert!(msg.body.is_empty());
    }

    #[test]
    fn decode_post_with_body() {
        let mut codec = HttpCodec::new("");
        let msg = decode_one(
            &mut codec,
            b"POST /data HTTP/1.1\r\nContent-Length: 5\r\n\r\nhello",
        )
        .unwrap()
        .unwrap();
        assert_eq!(msg.flags.method(), Method::Post);
        assert_eq!(msg.path, "/data");
        assert_eq!(msg.body.as_ref(), b"hello");
    }

    #[test]
    fn decode_unknown_method_is_hard_failure() {
        let mut codec = HttpCodec::new("");
        let result = decode_one(&mut codec, b"PURGE /cache HTTP/1.1\r\n\r\n");
        assert!(matches!(result, Err(HttpError::BadMethod)));
    }

    #[test]
    fn decode_unsupported_version() {
        let mut codec = HttpCodec::new("");
        let result = decode_one(&mut codec, b"GET / HTTP/2.0\r\n\r\n");
        assert!(matches!(result, Err(HttpError::BadVersion)));
    }

    #[test]
    fn decode_status_line() {
        let mut codec = HttpCodec::new("");
        let msg = decode_one(&mut codec, b"HTTP/1.1 404 Not Found\r\n\r\n")
            .unwrap()
            .unwrap();
        assert_eq!(msg.status_code, 404);
        assert!(msg.is_response());
    }

    #[test]
    fn decode_incomplete_returns_none() {
        let mut codec = HttpCodec::new("");
        assert!(decode_one(&mut codec, b"GET / HTTP/1.1\r\nHost:")
            .unwrap()
            .is_none());
    }

    #[test]
    fn decode_across_fragments() {
        let mut codec = HttpCodec::new("");
        let raw = b"POST /x HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123456789";
        let mut buf = BytesMut::new();
        for chunk in raw.chunks(3) {
            buf.extend_from_slice(chunk);
            if let Some(msg) = codec.decode(&mut buf).unwrap() {
                assert_eq!(msg.body.as_ref(), b"0123456789");
                return;
            }
        }
        panic!("message never completed");
    }

    #[test]
    fn decode_chunked_body() {
        let mut codec = HttpCodec::new("");
        let msg = decode_one(
            &mut codec,
            b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhello\r\n6\r\n world\r\n0\r\n\r\n",
        )
        .unwrap()
        .unwrap();
        assert_eq!(msg.body.as_ref(), b"hello world");
        assert!(msg.flags.chunked());
        assert!(msg.flags.response_ready());
    }

    #[test]
    fn decode_chunked_split_inside_chunk() {
        let mut codec = HttpCodec::new("");
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"HTTP/1.1 200 OK\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nHel");
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(b"lo\r\n0\r\n\r\n");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.body.as_ref(), b"Hello");
        assert!(msg.flags.response_ready());
    }

    #[test]
    fn decode_chunked_bad_terminator() {
        let mut codec = HttpCodec::new("");
        let result = decode_one(
            &mut codec,
            b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n5\r\nhelloXX0\r\n\r\n",
        );
        assert!(matches!(result, Err(HttpError::BadChunkTerminator)));
    }

    #[test]
    fn decode_bad_chunk_size() {
        let mut codec = HttpCodec::new("");
        let result = decode_one(
            &mut codec,
            b"POST /up HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\nzz\r\n\r\n",
        );
        assert!(matches!(result, Err(HttpError::BadChunkSize)));
    }

    #[test]
    fn decode_bad_content_length() {
        let mut codec = HttpCodec::new("");
        let result = decode_one(&mut codec, b"POST / HTTP/1.1\r\nContent-Length: abc\r\n\r\n");
        assert!(matches!(result, Err(HttpError::BadContentLength)));
    }

    #[test]
    fn connection_token_list() {
        let mut codec = HttpCodec::new("");
        let msg = decode_one(
            &mut codec,
            b"GET / HTTP/1.1\r\nConnection: keep-alive, Upgrade\r\n\r\n",
        )
        .unwrap()
        .unwrap();
        assert_eq!(msg.flags.connection(), ConnectionState::KeepAliveUpgrade);
    }

    #[test]
    fn connection_close_then_keep_alive_reinstates() {
        // Tokens are processed in order; a later keep-alive wins over an
        // earlier close in the same header value.
        let mut codec = HttpCodec::new("");
        let msg = decode_one(
            &mut codec,
            b"GET / HTTP/1.1\r\nConnection: close, keep-alive\r\n\r\n",
        )
        .unwrap()
        .unwrap();
        assert_eq!(msg.flags.connection(), ConnectionState::KeepAlive);
    }

    #[test]
    fn unrecognized_header_ignored() {
        let mut codec = HttpCodec::new("");
        let msg = decode_one(
            &mut codec,
            b"GET / HTTP/1.1\r\nX-Custom: whatever\r\nHost: h\r\n\r\n",
        )
        .unwrap()
        .unwrap();
        assert_eq!(msg.host, "h");
    }

    #[test]
    fn websocket_upgrade_request_fields() {
        let mut codec = HttpCodec::new("");
        let msg = decode_one(
            &mut codec,
            b"GET /chat HTTP/1.1\r\n\
              Host: server.example.com\r\n\
              Upgrade: websocket\r\n\
              Connection: Upgrade\r\n\
              Sec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\
              Sec-WebSocket-Protocol: chat\r\n\
              Sec-WebSocket-Version: 13\r\n\r\n",
        )
        .unwrap()
        .unwrap();
        assert!(msg.flags.upgrade_websocket());
        assert!(msg.flags.is_upgrade());
        assert_eq!(msg.sec_websocket_key, "dGhlIHNhbXBsZSBub25jZQ==");
        assert_eq!(msg.sec_websocket_protocol, "chat");
        assert_eq!(msg.websocket_version, 13);
    }

    #[test]
    fn decode_pipelined_messages() {
        let mut codec = HttpCodec::new("");
        let raw = b"GET /a HTTP/1.1\r\nHost: a\r\n\r\nGET /b HTTP/1.1\r\nHost: b\r\n\r\n";
        let mut buf = BytesMut::from(&raw[..]);
        let first = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.path, "/a");
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(second.path, "/b");
    }

    #[test]
    fn body_clamped_never_overruns() {
        let mut codec = HttpCodec::new("");
        let declared = BODY_CAPACITY + 64;
        let head = format!("POST / HTTP/1.1\r\nContent-Length: {declared}\r\n\r\n");
        let mut buf = BytesMut::from(head.as_bytes());
        buf.extend_from_slice(&vec![b'x'; declared]);
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.body.len(), BODY_CAPACITY);
        assert!(msg.flags.response_ready());
    }

    #[test]
    fn oversized_body_consumed_fully_at_any_split() {
        let declared = BODY_CAPACITY + 64;
        let head = format!("POST / HTTP/1.1\r\nContent-Length: {declared}\r\n\r\n");
        let mut wire = head.into_bytes();
        wire.extend_from_slice(&vec![b'x'; declared]);
        wire.extend_from_slice(b"GET /next HTTP/1.1\r\n\r\n");

        // Split inside the body, past the storage cap: the message must not
        // complete until the declared length is consumed off the wire.
        let split = wire.len() - 100;
        let mut codec = HttpCodec::new("");
        let mut buf = BytesMut::from(&wire[..split]);
        assert!(codec.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&wire[split..]);
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.body.len(), BODY_CAPACITY);
        // The pipelined request behind the excess parses cleanly.
        let next = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(next.path, "/next");
    }

    #[test]
    fn duplicate_content_length_is_error() {
        let mut codec = HttpCodec::new("");
        let result = decode_one(
            &mut codec,
            b"POST / HTTP/1.1\r\nContent-Length: 4\r\nContent-Length: 2\r\n\r\nbody",
        );
        assert!(matches!(result, Err(HttpError::BadContentLength)));
    }

    #[test]
    fn content_length_with_chunked_is_error() {
        let mut codec = HttpCodec::new("");
        let result = decode_one(
            &mut codec,
            b"POST / HTTP/1.1\r\nContent-Length: 4\r\nTransfer-Encoding: chunked\r\n\r\n",
        );
        assert!(matches!(result, Err(HttpError::BadContentLength)));

        let mut codec = HttpCodec::new("");
        let result = decode_one(
            &mut codec,
            b"POST / HTTP/1.1\r\nTransfer-Encoding: chunked\r\nContent-Length: 4\r\n\r\n",
        );
        assert!(matches!(result, Err(HttpError::BadContentLength)));
    }

    #[test]
    fn encode_request_line_and_headers() {
        let mut msg = HttpMessage::request(Method::Get, "/chat");
        msg.host.assign("example.com");
        msg.flags.set_keep_alive();
        let text = String::from_utf8(encode_one(msg)).unwrap();
        assert!(text.starts_with("GET /chat HTTP/1.1\r\n"));
        assert!(text.contains("Host: example.com\r\n"));
        assert!(text.contains("User-Agent: wireproto\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[test]
    fn encode_response_status_line() {
        let mut msg = HttpMessage::response(404);
        msg.flags.set_keep_alive();
        let text = String::from_utf8(encode_one(msg)).unwrap();
        assert!(text.starts_with("HTTP/1.1 404 Not Found\r\n"));
        assert!(text.contains("Server: wireproto\r\n"));
    }

    #[test]
    fn encode_body_with_content_length() {
        let mut msg = HttpMessage::response(200);
        msg.set_body(b"hello");
        msg.flags.set_keep_alive();
        let text = String::from_utf8(encode_one(msg)).unwrap();
        assert!(text.contains("Content-Length: 5\r\n"));
        assert!(text.ends_with("\r\n\r\nhello"));
    }

    #[test]
    fn encode_chunked_body() {
        let mut msg = HttpMessage::response(200);
        msg.set_body(b"hello");
        msg.flags.set_chunked(true);
        msg.flags.set_keep_alive();
        let text = String::from_utf8(encode_one(msg)).unwrap();
        assert!(text.contains("Transfer-Encoding: chunked\r\n"));
        assert!(!text.contains("Content-Length"));
        assert!(text.ends_with("5\r\nhello\r\n0\r\n\r\n"));
    }

    #[test]
    fn roundtrip_request() {
        let mut msg = HttpMessage::request(Method::Post, "/submit");
        msg.host.assign("example.org");
        msg.content_type.assign("application/json");
        msg.set_body(b"{\"k\":1}");
        msg.flags.set_keep_alive();

        let wire = encode_one(msg.clone());
        let mut codec = HttpCodec::new("");
        let parsed = decode_one(&mut codec, &wire).unwrap().unwrap();

        assert_eq!(parsed.flags.method(), Method::Post);
        assert_eq!(parsed.path, "/submit");
        assert_eq!(parsed.host, "example.org");
        assert_eq!(parsed.content_type, "application/json");
        assert_eq!(parsed.body.as_ref(), msg.body.as_ref());
        assert_eq!(parsed.flags.connection(), ConnectionState::KeepAlive);
    }

    #[test]
    fn roundtrip_chunked_across_split_points() {
        let mut msg = HttpMessage::response(200);
        msg.set_body(b"The quick brown fox");
        msg.flags.set_chunked(true);
        msg.flags.set_keep_alive();
        let wire = encode_one(msg);

        for split in 1..wire.len() {
            let mut codec = HttpCodec::new("");
            let mut buf = BytesMut::from(&wire[..split]);
            let first = codec.decode(&mut buf).unwrap();
            let parsed = if let Some(done) = first {
                done
            } else {
                buf.extend_from_slice(&wire[split..]);
                codec.decode(&mut buf).unwrap().expect("second half completes")
            };
            assert_eq!(parsed.body.as_ref(), b"The quick brown fox".as_ref());
            assert!(parsed.flags.response_ready());
        }
    }

    #[test]
    fn gzip_body_inflated_on_completion() {
        use flate2::write::GzEncoder;
        use flate2::Compression;
        use std::io::Write;

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"inflate me please").unwrap();
        let compressed = encoder.finish().unwrap();

        let head = format!(
            "HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: {}\r\n\r\n",
            compressed.len()
        );
        let mut buf = BytesMut::from(head.as_bytes());
        buf.extend_from_slice(&compressed);

        let mut codec = HttpCodec::new("");
        let msg = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(msg.body.as_ref(), b"inflate me please");
    }

    #[test]
    fn corrupt_gzip_body_is_error() {
        let mut codec = HttpCodec::new("");
        let result = decode_one(
            &mut codec,
            b"HTTP/1.1 200 OK\r\nContent-Encoding: gzip\r\nContent-Length: 4\r\n\r\njunk",
        );
        assert!(matches!(result, Err(HttpError::Inflate(_))));
    }
}
