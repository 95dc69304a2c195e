//! WebSocket opening handshake and per-connection session state.
//!
//! A [`WsSession`] tracks one connection through the RFC 6455 opening
//! handshake and then classifies control frames for the dispatch layer. The
//! handshake itself rides on [`HttpMessage`] values produced and consumed by
//! the HTTP codec; this module only builds and validates them.

use sha1::{Digest, Sha1};
use std::fmt;
use tracing::debug;

use crate::http::{BoundedString, HttpMessage, Method, FIELD_CAPACITY};
use crate::ws::frame::{FrameKind, WsFrame};

/// Fixed GUID appended to the client key before hashing (RFC 6455 §4.2.2).
const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";

/// Protocol version this stack speaks.
pub const WS_VERSION: u16 = 13;

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Upgrade request sent, awaiting the 101 response.
    ConnectingClient,
    /// Valid upgrade request received, 101 response not yet on the wire.
    ConnectingServer,
    /// Handshake complete, dialing side.
    ConnectedClient,
    /// Handshake complete, accepting side.
    ConnectedServer,
}

impl SessionState {
    /// True once the handshake has completed in either role.
    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::ConnectedClient | Self::ConnectedServer)
    }
}

/// Reasons an upgrade request or response is rejected. Any of these closes
/// the connection.
#[derive(Debug, PartialEq, Eq)]
pub enum HandshakeError {
    /// Sec-WebSocket-Version is not 13.
    BadVersion(u16),
    /// Sec-WebSocket-Key absent from the request.
    MissingKey,
    /// Upgrade: websocket / Connection: Upgrade not present.
    NotUpgrade,
    /// Requested sub-protocol matches none of ours.
    ProtocolMismatch,
    /// Client side: response status was not 101.
    BadStatus(u16),
    /// Client side: 101 response carried no accept key.
    MissingAcceptKey,
    /// Operation invalid in the current state.
    BadState(SessionState),
}

impl fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BadVersion(v) => write!(f, "unsupported websocket version {v}"),
            Self::MissingKey => write!(f, "missing Sec-WebSocket-Key"),
            Self::NotUpgrade => write!(f, "not a websocket upgrade"),
            Self::ProtocolMismatch => write!(f, "no acceptable sub-protocol"),
            Self::BadStatus(code) => write!(f, "expected 101, got {code}"),
            Self::MissingAcceptKey => write!(f, "missing Sec-WebSocket-Accept"),
            Self::BadState(state) => write!(f, "invalid in state {state:?}"),
        }
    }
}

impl std::error::Error for HandshakeError {}

/// What the dispatch layer should do with a received control frame.
#[derive(Debug)]
pub enum ControlAction {
    /// Queue this reply frame for transmission, discard the input.
    ReplyPong(WsFrame),
    /// Drop the frame.
    Discard,
    /// Mark the socket closable.
    Close,
    /// Not a control frame; deliver to the application.
    Deliver,
}

/// Per-connection WebSocket session.
#[derive(Debug)]
pub struct WsSession {
    /// Host the client dialed, or the Host header the server saw.
    pub host: BoundedString<FIELD_CAPACITY>,
    /// Request path of the upgrade.
    pub path: BoundedString<FIELD_CAPACITY>,
    /// Origin, when one was supplied.
    pub origin: BoundedString<FIELD_CAPACITY>,
    /// Client nonce key (client role) or the peer's key (server role).
    pub sec_websocket_key: BoundedString<FIELD_CAPACITY>,
    /// Negotiated sub-protocol, empty when none.
    pub sec_websocket_protocol: BoundedString<FIELD_CAPACITY>,
    state: SessionState,
}

impl WsSession {
    /// Start a client-side session dialing `host` at `path`.
    #[must_use]
    pub fn client(host: &str, path: &str, origin: &str) -> Self {
        Self {
            host: host.into(),
            path: path.into(),
            origin: origin.into(),
            sec_websocket_key: BoundedString::new(),
            sec_websocket_protocol: BoundedString::new(),
            state: SessionState::ConnectingClient,
        }
    }

    /// Start a server-side session for an incoming upgrade.
    #[must_use]
    pub fn server() -> Self {
        Self {
            host: BoundedString::new(),
            path: BoundedString::new(),
            origin: BoundedString::new(),
            sec_websocket_key: BoundedString::new(),
            sec_websocket_protocol: BoundedString::new(),
            state: SessionState::ConnectingServer,
        }
    }

    /// Current handshake state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Build the upgrade request for a client session. `key_seed` comes from
    /// the dispatcher's monotonically increasing handshake counter.
    ///
    /// # Errors
    ///
    /// Returns [`HandshakeError::BadState`] outside `ConnectingClient`.
    pub fn upgrade_request(
        &mut self,
        key_seed: u32,
        protocol: &str,
    ) -> Result<HttpMessage, HandshakeError> {
        if self.state != SessionState::ConnectingClient {
            return Err(HandshakeError::BadState(self.state));
        }
        let key = generate_client_key(key_seed);
        self.sec_websocket_key.assign(&key);
        self.sec_websocket_protocol.assign(protocol);

        let mut req = HttpMessage::request(Method::Get, &self.path);
        req.host.assign(&self.host);
        req.origin.assign(&self.origin);
        req.sec_websocket_key.assign(&key);
        req.sec_websocket_protocol.assign(protocol);
        req.websocket_version = WS_VERSION;
        req.flags.set_upgrade_websocket(true);
        req.flags.set_upgrade();
        Ok(req)
    }

    /// Server side: validate an upgrade request and build the 101 response.
    ///
    /// The session stays `ConnectingServer` until [`response_sent`] reports
    /// the response actually left the socket.
    ///
    /// [`response_sent`]: Self::response_sent
    ///
    /// # Errors
    ///
    /// Any [`HandshakeError`] means the connection is closed without a
    /// response.
    pub fn accept_upgrade(
        &mut self,
        req: &HttpMessage,
        protocols: &[&str],
    ) -> Result<HttpMessage, HandshakeError> {
        if self.state != SessionState::ConnectingServer {
            return Err(HandshakeError::BadState(self.state));
        }
        if !req.flags.upgrade_websocket() || !req.flags.is_upgrade() {
            return Err(HandshakeError::NotUpgrade);
        }
        if req.websocket_version != WS_VERSION {
            return Err(HandshakeError::BadVersion(req.websocket_version));
        }
        if req.sec_websocket_key.is_empty() {
            return Err(HandshakeError::MissingKey);
        }
        let negotiated = if req.sec_websocket_protocol.is_empty() {
            None
        } else {
            Some(
                select_protocol(&req.sec_websocket_protocol, protocols)
                    .ok_or(HandshakeError::ProtocolMismatch)?,
            )
        };

        self.host.assign(&req.host);
        self.path.assign(&req.path);
        self.origin.assign(&req.origin);
        self.sec_websocket_key.assign(&req.sec_websocket_key);
        if let Some(p) = negotiated {
            self.sec_websocket_protocol.assign(p);
        }

        let mut resp = HttpMessage::response(101);
        resp.sec_websocket_key
            .assign(&compute_accept_key(&req.sec_websocket_key));
        if let Some(p) = negotiated {
            resp.sec_websocket_protocol.assign(p);
        }
        resp.flags.set_upgrade_websocket(true);
        resp.flags.set_upgrade();
        debug!(path = %self.path, "accepting websocket upgrade");
        Ok(resp)
    }

    /// Server side: the 101 response has been transmitted.
    pub fn response_sent(&mut self) {
        if self.state == SessionState::ConnectingServer {
            self.state = SessionState::ConnectedServer;
        }
    }

    /// Client side: process the handshake response.
    ///
    /// # Errors
    ///
    /// Rejects anything other than a 101 with a non-empty accept key.
    pub fn handle_response(&mut self, resp: &HttpMessage) -> Result<(), HandshakeError> {
        if self.state != SessionState::ConnectingClient {
            return Err(HandshakeError::BadState(self.state));
        }
        if resp.status_code != 101 {
            return Err(HandshakeError::BadStatus(resp.status_code));
        }
        if resp.sec_websocket_key.is_empty() {
            return Err(HandshakeError::MissingAcceptKey);
        }
        if !resp.sec_websocket_protocol.is_empty() {
            self.sec_websocket_protocol
                .assign(&resp.sec_websocket_protocol);
        }
        self.state = SessionState::ConnectedClient;
        Ok(())
    }

    /// Classify a received frame. Control frames are absorbed here; data
    /// frames are delivered to the application.
    pub fn on_frame(&mut self, frame: &WsFrame) -> ControlAction {
        match frame.kind {
            FrameKind::Ping => {
                ControlAction::ReplyPong(WsFrame::new(FrameKind::Pong, frame.payload.as_ref()))
            }
            FrameKind::Pong => ControlAction::Discard,
            FrameKind::Close => {
                debug!(code = ?frame.close_code(), "peer sent close");
                ControlAction::Close
            }
            _ => ControlAction::Deliver,
        }
    }
}

/// One requested token, matched case-sensitively against our list after
/// trimming leading whitespace.
fn select_protocol<'a>(requested: &str, offered: &[&'a str]) -> Option<&'a str> {
    for token in requested.split(',') {
        let token = token.trim_start();
        if let Some(hit) = offered.iter().find(|&&p| p == token) {
            return Some(hit);
        }
    }
    None
}

/// Derive Sec-WebSocket-Accept from the client key: SHA-1 over key + GUID,
/// base64-encoded.
#[must_use]
pub fn compute_accept_key(client_key: &str) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Generate a client nonce key: four pseudo-random words from a xorshift
/// stream seeded by the dispatcher's handshake counter, base64-encoded.
#[must_use]
pub fn generate_client_key(seed: u32) -> String {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine as _;

    let mut state = seed.wrapping_mul(0x9e37_79b9).wrapping_add(0x6d2b_79f5);
    let mut nonce = [0u8; 16];
    for chunk in nonce.chunks_exact_mut(4) {
        state ^= state << 13;
        state ^= state >> 17;
        state ^= state << 5;
        chunk.copy_from_slice(&state.to_be_bytes());
    }
    STANDARD.encode(nonce)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn upgrade_request() -> HttpMessage {
        let mut req = HttpMessage::request(Method::Get, "/chat");
        req.host.assign("server.example.com");
        req.sec_websocket_key.assign("dGhlIHNhbXBsZSBub25jZQ==");
        req.websocket_version = 13;
        req.flags.set_upgrade_websocket(true);
        req.flags.set_upgrade();
        req
    }

    #[test]
    fn accept_key_matches_rfc6455_vector() {
        assert_eq!(
            compute_accept_key("dGhlIHNhbXBsZSBub25jZQ=="),
            "s3pPLMBiTxaQ9kYGzzhZRbK+xOo="
        );
    }

    #[test]
    fn client_key_is_16_bytes_base64() {
        use base64::engine::general_purpose::STANDARD;
        use base64::Engine as _;

        let key = generate_client_key(1);
        let decoded = STANDARD.decode(&key).unwrap();
        assert_eq!(decoded.len(), 16);
        // Different seeds give different keys.
        assert_ne!(key, generate_client_key(2));
    }

    #[test]
    fn server_accepts_valid_upgrade() {
        let mut session = WsSession::server();
        let resp = session.accept_upgrade(&upgrade_request(), &[]).unwrap();
        assert_eq!(resp.status_code, 101);
        assert_eq!(resp.sec_websocket_key, "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
        assert!(resp.flags.upgrade_websocket());
        assert!(resp.flags.is_upgrade());
        // Connected only once the response is on the wire.
        assert_eq!(session.state(), SessionState::ConnectingServer);
        session.response_sent();
        assert_eq!(session.state(), SessionState::ConnectedServer);
    }

    #[test]
    fn server_rejects_wrong_version() {
        let mut session = WsSession::server();
        let mut req = upgrade_request();
        req.websocket_version = 8;
        assert_eq!(
            session.accept_upgrade(&req, &[]).unwrap_err(),
            HandshakeError::BadVersion(8)
        );
    }

    #[test]
    fn server_rejects_missing_key() {
        let mut session = WsSession::server();
        let mut req = upgrade_request();
        req.sec_websocket_key.clear();
        assert_eq!(
            session.accept_upgrade(&req, &[]).unwrap_err(),
            HandshakeError::MissingKey
        );
    }

    #[test]
    fn server_rejects_non_upgrade() {
        let mut session = WsSession::server();
        let mut req = upgrade_request();
        req.flags.set_upgrade_websocket(false);
        assert_eq!(
            session.accept_upgrade(&req, &[]).unwrap_err(),
            HandshakeError::NotUpgrade
        );
    }

    #[test]
    fn subprotocol_exact_match_case_sensitive() {
        let mut req = upgrade_request();
        req.sec_websocket_protocol.assign("chat, superchat");

        let mut session = WsSession::server();
        let resp = session.accept_upgrade(&req, &["superchat"]).unwrap();
        assert_eq!(resp.sec_websocket_protocol, "superchat");
        assert_eq!(session.sec_websocket_protocol, "superchat");

        // Case differs: no match.
        let mut session = WsSession::server();
        assert_eq!(
            session.accept_upgrade(&req, &["Chat"]).unwrap_err(),
            HandshakeError::ProtocolMismatch
        );
    }

    #[test]
    fn subprotocol_trims_leading_whitespace_only() {
        assert_eq!(select_protocol("  chat", &["chat"]), Some("chat"));
        // Trailing whitespace is part of the token and fails the exact match.
        assert_eq!(select_protocol("chat ", &["chat"]), None);
    }

    #[test]
    fn client_handshake_completes_on_101() {
        let mut session = WsSession::client("example.com", "/live", "");
        let req = session.upgrade_request(7, "").unwrap();
        assert_eq!(req.host, "example.com");
        assert_eq!(req.websocket_version, 13);
        assert!(!req.sec_websocket_key.is_empty());

        let mut resp = HttpMessage::response(101);
        resp.sec_websocket_key
            .assign(&compute_accept_key(&req.sec_websocket_key));
        session.handle_response(&resp).unwrap();
        assert_eq!(session.state(), SessionState::ConnectedClient);
    }

    #[test]
    fn client_rejects_non_101() {
        let mut session = WsSession::client("example.com", "/", "");
        let _ = session.upgrade_request(1, "").unwrap();
        let resp = HttpMessage::response(400);
        assert_eq!(
            session.handle_response(&resp),
            Err(HandshakeError::BadStatus(400))
        );
    }

    #[test]
    fn client_rejects_missing_accept_key() {
        let mut session = WsSession::client("example.com", "/", "");
        let _ = session.upgrade_request(1, "").unwrap();
        let resp = HttpMessage::response(101);
        assert_eq!(
            session.handle_response(&resp),
            Err(HandshakeError::MissingAcceptKey)
        );
    }

    #[test]
    fn ping_queues_pong_with_same_payload() {
        let mut session = WsSession::server();
        let ping = WsFrame::new(FrameKind::Ping, b"beat");
        match session.on_frame(&ping) {
            ControlAction::ReplyPong(pong) => {
                assert_eq!(pong.kind, FrameKind::Pong);
                assert_eq!(pong.payload.as_ref(), b"beat");
            }
            other => panic!("expected pong, got {other:?}"),
        }
    }

    #[test]
    fn pong_discarded_close_closes() {
        let mut session = WsSession::server();
        assert!(matches!(
            session.on_frame(&WsFrame::new(FrameKind::Pong, b"")),
            ControlAction::Discard
        ));
        assert!(matches!(
            session.on_frame(&WsFrame::close(1000, "")),
            ControlAction::Close
        ));
        assert!(matches!(
            session.on_frame(&WsFrame::new(FrameKind::Text, b"hi")),
            ControlAction::Deliver
        ));
    }
}
