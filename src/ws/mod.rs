//! WebSocket frame codec, handshake, and session state.

pub mod frame;
pub mod session;

pub use frame::{apply_mask, FrameCodec, FrameKind, Role, WsError, WsFrame};
pub use session::{
    compute_accept_key, generate_client_key, ControlAction, HandshakeError, SessionState,
    WsSession, WS_VERSION,
};
