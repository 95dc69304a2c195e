//! WebSocket dispatcher: handshake over the HTTP codec, then frames.

use bytes::BytesMut;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::codec::{Decoder, Encoder};
use crate::dispatch::http::fill_inbuf;
use crate::dispatch::socket::{send_all, SendOutcome, Socket, SocketId};
use crate::dispatch::Dispatcher;
use crate::http::HttpCodec;
use crate::queue::BoundedQueue;
use crate::ws::{ControlAction, FrameCodec, FrameKind, Role, WsFrame, WsSession};

/// Dial parameters for client-role dispatchers.
#[derive(Debug, Clone)]
pub struct ClientTarget {
    /// Host header and SNI name.
    pub host: String,
    /// Upgrade request path.
    pub path: String,
    /// Origin header, empty to omit.
    pub origin: String,
    /// Requested sub-protocol, empty to omit.
    pub protocol: String,
}

/// Handshake-then-frames progress of one connection.
enum Phase {
    /// Exchanging the HTTP upgrade; the codec parses it.
    Handshake(Box<HttpCodec>),
    /// Upgrade complete, speaking frames.
    Frames,
}

struct WsConn {
    phase: Phase,
    session: WsSession,
    frames: FrameCodec,
    inbuf: BytesMut,
    sendbuf: BytesMut,
    /// Server role: the 101 went into sendbuf but has not fully left the
    /// socket; `response_sent` fires when it does.
    awaiting_response_flush: bool,
    inbound: BoundedQueue<WsFrame>,
    outbound: BoundedQueue<WsFrame>,
}

/// Dispatches WebSocket traffic: runs the opening handshake through an HTTP
/// codec, then decodes frames, absorbing control frames per session policy.
///
/// A `Connect` marker frame is pushed onto the inbound queue when the
/// handshake completes, so the application observes session establishment in
/// stream order.
pub struct WsDispatcher {
    role: Role,
    agent: String,
    /// Server: sub-protocols we accept.
    protocols: Vec<String>,
    /// Client: where to dial.
    target: Option<ClientTarget>,
    queue_capacity: usize,
    /// Seeds client handshake keys; monotonically increasing.
    key_counter: u32,
    conns: HashMap<SocketId, WsConn>,
}

impl WsDispatcher {
    /// Server-role dispatcher accepting the given sub-protocols.
    #[must_use]
    pub fn server(
        agent: impl Into<String>,
        protocols: &[&str],
        queue_capacity: usize,
    ) -> Self {
        Self {
            role: Role::Server,
            agent: agent.into(),
            protocols: protocols.iter().map(|&p| p.to_owned()).collect(),
            target: None,
            queue_capacity,
            key_counter: 0,
            conns: HashMap::new(),
        }
    }

    /// Client-role dispatcher dialing `target` on every opened socket.
    #[must_use]
    pub fn client(agent: impl Into<String>, target: ClientTarget, queue_capacity: usize) -> Self {
        Self {
            role: Role::Client,
            agent: agent.into(),
            protocols: Vec::new(),
            target: Some(target),
            queue_capacity,
            key_counter: 0,
            conns: HashMap::new(),
        }
    }

    /// Queue handles for a connection: `(inbound, outbound)`.
    #[must_use]
    pub fn channels(
        &self,
        id: SocketId,
    ) -> Option<(BoundedQueue<WsFrame>, BoundedQueue<WsFrame>)> {
        self.conns
            .get(&id)
            .map(|c| (c.inbound.clone(), c.outbound.clone()))
    }

    fn new_conn(&self, session: WsSession) -> WsConn {
        WsConn {
            phase: Phase::Handshake(Box::new(HttpCodec::new(self.agent.clone()))),
            session,
            frames: FrameCodec::new(self.role),
            inbuf: BytesMut::new(),
            sendbuf: BytesMut::new(),
            awaiting_response_flush: false,
            inbound: BoundedQueue::new(self.queue_capacity),
            outbound: BoundedQueue::new(self.queue_capacity),
        }
    }

    /// Handshake bytes arrived; returns true when the frame phase begins.
    fn advance_handshake(conn: &mut WsConn, socket: &mut dyn Socket, protocols: &[String]) -> bool {
        let Phase::Handshake(codec) = &mut conn.phase else {
            return true;
        };
        let msg = match codec.decode(&mut conn.inbuf) {
            Ok(Some(msg)) => msg,
            Ok(None) => return false,
            Err(e) => {
                warn!(socket = %socket.id(), error = %e, "handshake parse error");
                socket.mark_closable();
                return false;
            }
        };

        if msg.is_response() {
            // Client side: expect the 101.
            if let Err(e) = conn.session.handle_response(&msg) {
                warn!(socket = %socket.id(), error = %e, "handshake rejected");
                socket.mark_closable();
                return false;
            }
            conn.phase = Phase::Frames;
            push_connect_marker(conn, socket.id());
            true
        } else {
            // Server side: validate the upgrade, answer with the 101.
            let offered: Vec<&str> = protocols.iter().map(String::as_str).collect();
            let resp = match conn.session.accept_upgrade(&msg, &offered) {
                Ok(resp) => resp,
                Err(e) => {
                    warn!(socket = %socket.id(), error = %e, "upgrade rejected");
                    socket.mark_closable();
                    return false;
                }
            };
            if let Err(e) = codec.encode(resp, &mut conn.sendbuf) {
                warn!(socket = %socket.id(), error = %e, "handshake serialize error");
                socket.mark_closable();
                return false;
            }
            conn.phase = Phase::Frames;
            match send_all(socket, &mut conn.sendbuf) {
                SendOutcome::Flushed => {
                    conn.session.response_sent();
                    push_connect_marker(conn, socket.id());
                }
                SendOutcome::Deferred => conn.awaiting_response_flush = true,
                SendOutcome::Failed => return false,
            }
            true
        }
    }

    fn read_frames(conn: &mut WsConn, socket: &mut dyn Socket) {
        loop {
            let Some(permit) = conn.inbound.reserve() else {
                break;
            };
            let frame = match conn.frames.decode(&mut conn.inbuf) {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    permit.abort();
                    break;
                }
                Err(e) => {
                    permit.abort();
                    warn!(socket = %socket.id(), error = %e, "frame parse error");
                    conn.inbuf.clear();
                    socket.mark_closable();
                    break;
                }
            };
            match conn.session.on_frame(&frame) {
                ControlAction::Deliver => permit.commit(frame),
                ControlAction::ReplyPong(pong) => {
                    permit.abort();
                    // Control replies ride the send buffer directly; a full
                    // application queue cannot drop them.
                    if let Err(e) = conn.frames.encode(pong, &mut conn.sendbuf) {
                        warn!(socket = %socket.id(), error = %e, "pong serialize error");
                        socket.mark_closable();
                        break;
                    }
                }
                ControlAction::Discard => permit.abort(),
                ControlAction::Close => {
                    permit.abort();
                    debug!(socket = %socket.id(), "close frame received");
                    socket.mark_closable();
                    break;
                }
            }
        }
    }
}

/// Queue the non-wire `Connect` marker so the application sees the session
/// come up in order with the frames that follow.
fn push_connect_marker(conn: &mut WsConn, id: SocketId) {
    if conn
        .inbound
        .try_push(WsFrame::new(FrameKind::Connect, &[]))
        .is_err()
    {
        warn!(socket = %id, "inbound full, connect marker dropped");
    }
    debug!(socket = %id, "websocket session established");
}

impl Dispatcher for WsDispatcher {
    fn socket_opened(&mut self, socket: &mut dyn Socket) {
        let id = socket.id();
        match self.role {
            Role::Server => {
                let conn = self.new_conn(WsSession::server());
                self.conns.insert(id, conn);
            }
            Role::Client => {
                let Some(target) = self.target.clone() else {
                    warn!(socket = %id, "client dispatcher without a target");
                    socket.mark_closable();
                    return;
                };
                let mut session = WsSession::client(&target.host, &target.path, &target.origin);
                self.key_counter = self.key_counter.wrapping_add(1);
                let request = match session.upgrade_request(self.key_counter, &target.protocol) {
                    Ok(req) => req,
                    Err(e) => {
                        warn!(socket = %id, error = %e, "upgrade request failed");
                        socket.mark_closable();
                        return;
                    }
                };
                let mut conn = self.new_conn(session);
                let Phase::Handshake(codec) = &mut conn.phase else {
                    unreachable!("fresh connection starts in handshake");
                };
                if codec.encode(request, &mut conn.sendbuf).is_ok() {
                    let _ = send_all(socket, &mut conn.sendbuf);
                }
                self.conns.insert(id, conn);
            }
        }
        debug!(socket = %id, role = ?self.role, "websocket connection registered");
    }

    fn read(&mut self, socket: &mut dyn Socket) {
        let Some(conn) = self.conns.get_mut(&socket.id()) else {
            return;
        };
        if !fill_inbuf(socket, &mut conn.inbuf) {
            return;
        }
        if matches!(conn.phase, Phase::Handshake(_))
            && !Self::advance_handshake(conn, socket, &self.protocols)
        {
            return;
        }
        // While the 101 has not fully left the socket, frames stay in inbuf
        // so the connect marker always precedes them.
        if conn.awaiting_response_flush {
            return;
        }
        Self::read_frames(conn, socket);
    }

    fn process_outbound(&mut self, socket: &mut dyn Socket) {
        let Some(conn) = self.conns.get_mut(&socket.id()) else {
            return;
        };

        match send_all(socket, &mut conn.sendbuf) {
            SendOutcome::Flushed => {}
            SendOutcome::Deferred | SendOutcome::Failed => return,
        }
        if conn.awaiting_response_flush {
            conn.awaiting_response_flush = false;
            conn.session.response_sent();
            push_connect_marker(conn, socket.id());
        }
        if !conn.session.state().is_connected() {
            return;
        }

        while let Some(permit) = conn.outbound.reserve_pop() {
            let frame = permit.take();
            if let Err(e) = conn.frames.encode(frame, &mut conn.sendbuf) {
                warn!(socket = %socket.id(), error = %e, "frame serialize error");
                socket.mark_closable();
                return;
            }
            match send_all(socket, &mut conn.sendbuf) {
                SendOutcome::Flushed => {}
                SendOutcome::Deferred | SendOutcome::Failed => return,
            }
        }
    }

    fn socket_changed(&mut self, old: SocketId, new: SocketId) {
        if let Some(conn) = self.conns.remove(&old) {
            debug!(%old, %new, "websocket connection migrated");
            self.conns.insert(new, conn);
        }
    }

    fn socket_closed(&mut self, id: SocketId) {
        if self.conns.remove(&id).is_some() {
            debug!(socket = %id, "websocket connection released");
        }
    }
}
