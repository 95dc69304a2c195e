//! TLS-wrapped dispatchers.
//!
//! [`TlsDispatcher`] composes one [`TlsAdapter`] with one inner dispatcher:
//! reads are routed through the session's decrypt path before the inner
//! codec sees them, and everything the inner dispatcher sends is routed
//! through the encrypt path. The per-socket [`TlsSession`] is created lazily
//! on first use and lives in this wrapper's attachment map.

use bytes::BytesMut;
use std::collections::HashMap;
use std::io;
use tracing::{debug, warn};

use crate::dispatch::socket::{send_all, SendOutcome, Socket, SocketId};
use crate::dispatch::{Dispatcher, HttpDispatcher, WsDispatcher};
use crate::tls::{TlsAdapter, TlsSession};

/// TLS + HTTP.
pub type TlsHttpDispatcher = TlsDispatcher<HttpDispatcher>;
/// TLS + WebSocket.
pub type TlsWsDispatcher = TlsDispatcher<WsDispatcher>;

/// Per-socket TLS attachment.
struct TlsAttachment {
    session: TlsSession,
    /// Decrypted bytes the inner dispatcher has not consumed yet.
    plaintext: BytesMut,
    /// Raw ciphertext not yet accepted by the socket.
    raw_out: BytesMut,
}

/// A dispatcher whose transport is a TLS session.
pub struct TlsDispatcher<D> {
    adapter: TlsAdapter,
    inner: D,
    /// Client side: hostname for SNI and verification.
    sni_host: Option<String>,
    attachments: HashMap<SocketId, TlsAttachment>,
}

impl<D: Dispatcher> TlsDispatcher<D> {
    /// Wrap `inner` behind `adapter`. `sni_host` is required for client
    /// adapters and ignored for server adapters.
    #[must_use]
    pub fn new(adapter: TlsAdapter, inner: D, sni_host: Option<&str>) -> Self {
        Self {
            adapter,
            inner,
            sni_host: sni_host.map(str::to_owned),
            attachments: HashMap::new(),
        }
    }

    /// The wrapped dispatcher, for queue access.
    #[must_use]
    pub fn inner(&self) -> &D {
        &self.inner
    }

    /// Mutable access to the wrapped dispatcher.
    pub fn inner_mut(&mut self) -> &mut D {
        &mut self.inner
    }

    /// Lazily create the per-socket session. Returns false when setup
    /// failed; the socket has been marked closable.
    fn ensure_attachment(&mut self, socket: &mut dyn Socket) -> bool {
        let id = socket.id();
        if self.attachments.contains_key(&id) {
            return true;
        }
        match self.adapter.session(self.sni_host.as_deref()) {
            Ok(session) => {
                debug!(socket = %id, "tls session created");
                self.attachments.insert(
                    id,
                    TlsAttachment {
                        session,
                        plaintext: BytesMut::new(),
                        raw_out: BytesMut::new(),
                    },
                );
                true
            }
            Err(e) => {
                warn!(socket = %id, error = %e, "tls session setup failed");
                socket.mark_closable();
                false
            }
        }
    }

    /// Run one inner-dispatcher call against the decrypting socket wrapper,
    /// then flush whatever ciphertext the session queued.
    fn with_tls_socket(
        &mut self,
        socket: &mut dyn Socket,
        call: impl FnOnce(&mut D, &mut TlsSocket<'_>),
    ) {
        if !self.ensure_attachment(socket) {
            return;
        }
        let id = socket.id();
        let att = self.attachments.get_mut(&id).expect("attachment ensured");
        {
            let mut tls_socket = TlsSocket {
                socket: &mut *socket,
                att,
            };
            call(&mut self.inner, &mut tls_socket);
        }
        let att = self.attachments.get_mut(&id).expect("attachment ensured");
        att.session.drain_ciphertext(&mut att.raw_out);
        if att.session.is_failed() {
            socket.mark_closable();
        }
        let _ = send_all(socket, &mut att.raw_out);
    }
}

impl<D: Dispatcher> Dispatcher for TlsDispatcher<D> {
    fn socket_opened(&mut self, socket: &mut dyn Socket) {
        // A client session has its hello (and any inner handshake bytes
        // rustls buffered) ready immediately; the flush sends them.
        self.with_tls_socket(socket, |inner, tls_socket| {
            inner.socket_opened(tls_socket);
        });
    }

    fn read(&mut self, socket: &mut dyn Socket) {
        self.with_tls_socket(socket, |inner, tls_socket| inner.read(tls_socket));
    }

    fn process_outbound(&mut self, socket: &mut dyn Socket) {
        self.with_tls_socket(socket, |inner, tls_socket| {
            inner.process_outbound(tls_socket);
        });
    }

    fn socket_changed(&mut self, old: SocketId, new: SocketId) {
        if let Some(att) = self.attachments.remove(&old) {
            self.attachments.insert(new, att);
        }
        self.inner.socket_changed(old, new);
    }

    fn socket_closed(&mut self, id: SocketId) {
        self.attachments.remove(&id);
        self.inner.socket_closed(id);
    }
}

/// The decrypting [`Socket`] the inner dispatcher is driven against.
struct TlsSocket<'a> {
    socket: &'a mut dyn Socket,
    att: &'a mut TlsAttachment,
}

impl Socket for TlsSocket<'_> {
    fn id(&self) -> SocketId {
        self.socket.id()
    }

    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.att.plaintext.is_empty() {
            // Pull ciphertext off the raw socket and run it through rustls.
            let mut raw = BytesMut::new();
            let mut chunk = [0u8; 4096];
            loop {
                match self.socket.receive(&mut chunk) {
                    Ok(0) => {
                        if raw.is_empty() {
                            return Ok(0);
                        }
                        break;
                    }
                    Ok(n) => raw.extend_from_slice(&chunk[..n]),
                    Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                    Err(e) => return Err(e),
                }
            }
            self.att
                .session
                .read_ciphertext(&mut raw, &mut self.att.plaintext, &mut self.att.raw_out);
            let _ = send_all(self.socket, &mut self.att.raw_out);
            if self.att.session.is_failed() {
                return Err(io::Error::other("tls session failed"));
            }
        }
        if self.att.plaintext.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(self.att.plaintext.len());
        let chunk = self.att.plaintext.split_to(n);
        buf[..n].copy_from_slice(chunk.as_ref());
        Ok(n)
    }

    fn send(&mut self, data: &[u8]) -> io::Result<usize> {
        let n = self
            .att
            .session
            .write_plaintext(data, &mut self.att.raw_out);
        if self.att.session.is_failed() {
            return Err(io::Error::other("tls session failed"));
        }
        if send_all(self.socket, &mut self.att.raw_out) == SendOutcome::Failed {
            return Err(io::Error::other("raw send failed"));
        }
        Ok(n)
    }

    fn mark_closable(&mut self) {
        self.socket.mark_closable();
    }
}
