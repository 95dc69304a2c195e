//! Plain-HTTP dispatcher.

use bytes::BytesMut;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::codec::{Decoder, Encoder};
use crate::dispatch::socket::{send_all, SendOutcome, Socket, SocketId};
use crate::dispatch::Dispatcher;
use crate::http::{HttpCodec, HttpMessage};
use crate::queue::BoundedQueue;
use std::io;

/// Read chunk size per `receive` call.
pub(crate) const READ_CHUNK: usize = 4096;

/// Per-connection HTTP state.
struct HttpConn {
    codec: HttpCodec,
    /// Raw bytes read but not yet parsed.
    inbuf: BytesMut,
    /// Serialized bytes not yet accepted by the socket.
    sendbuf: BytesMut,
    /// Completed inbound messages, popped by the application.
    inbound: BoundedQueue<HttpMessage>,
    /// Responses pushed by the application, drained to the socket.
    outbound: BoundedQueue<HttpMessage>,
}

/// Dispatches HTTP/1.1 traffic for any number of sockets.
///
/// The external poll loop calls [`Dispatcher::read`] on readability and
/// [`Dispatcher::process_outbound`] once per pass; the application exchanges
/// messages through the per-connection queues from [`channels`].
///
/// [`channels`]: HttpDispatcher::channels
pub struct HttpDispatcher {
    agent: String,
    queue_capacity: usize,
    conns: HashMap<SocketId, HttpConn>,
}

impl HttpDispatcher {
    /// New dispatcher emitting `agent` as User-Agent/Server, with
    /// per-connection queues of `queue_capacity` messages.
    #[must_use]
    pub fn new(agent: impl Into<String>, queue_capacity: usize) -> Self {
        Self {
            agent: agent.into(),
            queue_capacity,
            conns: HashMap::new(),
        }
    }

    /// Queue handles for a connection: `(inbound, outbound)`. The
    /// application pops the first and pushes the second.
    #[must_use]
    pub fn channels(
        &self,
        id: SocketId,
    ) -> Option<(BoundedQueue<HttpMessage>, BoundedQueue<HttpMessage>)> {
        self.conns
            .get(&id)
            .map(|c| (c.inbound.clone(), c.outbound.clone()))
    }

    fn conn_entry(&mut self, id: SocketId) -> &mut HttpConn {
        let capacity = self.queue_capacity;
        let agent = self.agent.clone();
        self.conns.entry(id).or_insert_with(|| HttpConn {
            codec: HttpCodec::new(agent),
            inbuf: BytesMut::with_capacity(READ_CHUNK),
            sendbuf: BytesMut::new(),
            inbound: BoundedQueue::new(capacity),
            outbound: BoundedQueue::new(capacity),
        })
    }
}

/// Read everything currently available into `inbuf`. Returns false when the
/// connection is done (EOF or error; the socket has been marked closable).
pub(crate) fn fill_inbuf(socket: &mut dyn Socket, inbuf: &mut BytesMut) -> bool {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match socket.receive(&mut chunk) {
            Ok(0) => {
                debug!(socket = %socket.id(), "peer closed");
                socket.mark_closable();
                return false;
            }
            Ok(n) => inbuf.extend_from_slice(&chunk[..n]),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return true,
            Err(e) => {
                warn!(socket = %socket.id(), error = %e, "read failed");
                socket.mark_closable();
                return false;
            }
        }
    }
}

impl Dispatcher for HttpDispatcher {
    fn socket_opened(&mut self, socket: &mut dyn Socket) {
        let _ = self.conn_entry(socket.id());
        debug!(socket = %socket.id(), "http connection registered");
    }

    fn read(&mut self, socket: &mut dyn Socket) {
        let conn = self.conn_entry(socket.id());
        if !fill_inbuf(socket, &mut conn.inbuf) {
            return;
        }

        // Reserve the queue slot before parsing so a completed message is
        // never left without a home; a full queue defers parsing entirely
        // and the raw bytes wait in inbuf.
        loop {
            let Some(permit) = conn.inbound.reserve() else {
                break;
            };
            match conn.codec.decode(&mut conn.inbuf) {
                Ok(Some(msg)) => permit.commit(msg),
                Ok(None) => {
                    permit.abort();
                    break;
                }
                Err(e) => {
                    permit.abort();
                    warn!(socket = %socket.id(), error = %e, "http parse error");
                    conn.inbuf.clear();
                    socket.mark_closable();
                    break;
                }
            }
        }
    }

    fn process_outbound(&mut self, socket: &mut dyn Socket) {
        let Some(conn) = self.conns.get_mut(&socket.id()) else {
            return;
        };

        // Finish any partially-sent message first; ordering depends on it.
        match send_all(socket, &mut conn.sendbuf) {
            SendOutcome::Flushed => {}
            SendOutcome::Deferred | SendOutcome::Failed => return,
        }

        while let Some(permit) = conn.outbound.reserve_pop() {
            let msg = permit.take();
            if let Err(e) = conn.codec.encode(msg, &mut conn.sendbuf) {
                warn!(socket = %socket.id(), error = %e, "http serialize error");
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
            debug!(%old, %new, "http connection migrated");
            self.conns.insert(new, conn);
        }
    }

    fn socket_closed(&mut self, id: SocketId) {
        if self.conns.remove(&id).is_some() {
            debug!(socket = %id, "http connection released");
        }
    }
}
