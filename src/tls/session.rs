//! Per-connection TLS session plumbing.
//!
//! [`TlsSession`] sits between the raw socket buffers and a codec: ciphertext
//! goes in through [`read_ciphertext`](TlsSession::read_ciphertext), decoded
//! plaintext comes out, and anything rustls wants on the wire (handshake
//! records, alerts, encrypted application data) accumulates in the caller's
//! outbound buffer.
//!
//! Handshake failures and alerts are logged and latch the session into a
//! failed state, but are not surfaced as typed errors; the dispatch layer
//! notices the failed session and marks the socket closable. Kept this way
//! pending a product decision on a typed alert surface.

use bytes::{Buf, BytesMut};
use rustls::{ClientConfig, ClientConnection, ServerConfig, ServerConnection};
use rustls_pki_types::ServerName;
use std::io::{self, Read, Write};
use std::sync::Arc;
use tracing::{error, trace};

use super::error::TlsError;

/// Wrapper to handle both client and server connections.
enum TlsConnection {
    Client(ClientConnection),
    Server(ServerConnection),
}

impl TlsConnection {
    fn is_handshaking(&self) -> bool {
        match self {
            Self::Client(c) => c.is_handshaking(),
            Self::Server(s) => s.is_handshaking(),
        }
    }

    fn wants_write(&self) -> bool {
        match self {
            Self::Client(c) => c.wants_write(),
            Self::Server(s) => s.wants_write(),
        }
    }

    fn reader(&mut self) -> rustls::Reader<'_> {
        match self {
            Self::Client(c) => c.reader(),
            Self::Server(s) => s.reader(),
        }
    }

    fn writer(&mut self) -> rustls::Writer<'_> {
        match self {
            Self::Client(c) => c.writer(),
            Self::Server(s) => s.writer(),
        }
    }

    fn read_tls(&mut self, rd: &mut dyn io::Read) -> io::Result<usize> {
        match self {
            Self::Client(c) => c.read_tls(rd),
            Self::Server(s) => s.read_tls(rd),
        }
    }

    fn write_tls(&mut self, wr: &mut dyn io::Write) -> io::Result<usize> {
        match self {
            Self::Client(c) => c.write_tls(wr),
            Self::Server(s) => s.write_tls(wr),
        }
    }

    fn process_new_packets(&mut self) -> Result<rustls::IoState, rustls::Error> {
        match self {
            Self::Client(c) => c.process_new_packets(),
            Self::Server(s) => s.process_new_packets(),
        }
    }

    fn send_close_notify(&mut self) {
        match self {
            Self::Client(c) => c.send_close_notify(),
            Self::Server(s) => s.send_close_notify(),
        }
    }

    fn sni_hostname(&self) -> Option<&str> {
        match self {
            Self::Client(_) => None,
            Self::Server(s) => s.server_name(),
        }
    }
}

/// One connection's TLS state.
pub struct TlsSession {
    conn: TlsConnection,
    /// A fatal alert or handshake failure happened; see module docs.
    failed: bool,
}

impl TlsSession {
    pub(super) fn client(
        config: Arc<ClientConfig>,
        name: ServerName<'static>,
    ) -> Result<Self, TlsError> {
        let conn = ClientConnection::new(config, name)?;
        Ok(Self {
            conn: TlsConnection::Client(conn),
            failed: false,
        })
    }

    pub(super) fn server(config: Arc<ServerConfig>) -> Result<Self, TlsError> {
        let conn = ServerConnection::new(config)?;
        Ok(Self {
            conn: TlsConnection::Server(conn),
            failed: false,
        })
    }

    /// Feed raw bytes from the socket. Decrypted application data is appended
    /// to `plaintext`; records rustls wants transmitted (handshake replies,
    /// alerts) are appended to `encrypted_out`.
    ///
    /// Consumes from the front of `src`; a partial TLS record is buffered
    /// inside the session and completed by a later call.
    pub fn read_ciphertext(
        &mut self,
        src: &mut BytesMut,
        plaintext: &mut BytesMut,
        encrypted_out: &mut BytesMut,
    ) {
        if self.failed {
            src.clear();
            return;
        }

        while !src.is_empty() {
            let mut rd = src.as_ref();
            let before = rd.len();
            match self.conn.read_tls(&mut rd) {
                Ok(0) => break,
                Ok(_) => {
                    let consumed = before - rd.len();
                    src.advance(consumed);
                }
                Err(e) => {
                    // rustls buffers internally; a refusal here means the
                    // record is oversized or the session is poisoned.
                    error!(error = %e, "TLS record ingest failed");
                    self.failed = true;
                    return;
                }
            }

            match self.conn.process_new_packets() {
                Ok(state) => {
                    let readable = state.plaintext_bytes_to_read();
                    if readable > 0 {
                        let start = plaintext.len();
                        plaintext.resize(start + readable, 0);
                        let mut filled = 0;
                        while filled < readable {
                            match self.conn.reader().read(&mut plaintext[start + filled..]) {
                                Ok(0) => break,
                                Ok(n) => filled += n,
                                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                                Err(e) => {
                                    error!(error = %e, "TLS plaintext read failed");
                                    self.failed = true;
                                    plaintext.truncate(start + filled);
                                    return;
                                }
                            }
                        }
                        plaintext.truncate(start + filled);
                        trace!(bytes = filled, "TLS read");
                    }
                }
                Err(e) => {
                    error!(error = %e, "TLS session error");
                    self.failed = true;
                    // The alert rustls queued still needs to reach the peer.
                    self.drain_ciphertext(encrypted_out);
                    return;
                }
            }

            self.drain_ciphertext(encrypted_out);
        }

        self.drain_ciphertext(encrypted_out);
    }

    /// Encrypt application data. The ciphertext is appended to
    /// `encrypted_out`; returns the number of plaintext bytes accepted.
    ///
    /// During the handshake rustls buffers the plaintext and sends it once
    /// the session is established.
    pub fn write_plaintext(&mut self, data: &[u8], encrypted_out: &mut BytesMut) -> usize {
        if self.failed {
            return 0;
        }
        let n = match self.conn.writer().write(data) {
            Ok(n) => n,
            Err(e) => {
                error!(error = %e, "TLS plaintext write failed");
                self.failed = true;
                return 0;
            }
        };
        trace!(bytes = n, "TLS write");
        self.drain_ciphertext(encrypted_out);
        n
    }

    /// Move every pending outbound record into `encrypted_out`.
    pub fn drain_ciphertext(&mut self, encrypted_out: &mut BytesMut) {
        let mut sink = BufSink(encrypted_out);
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut sink) {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    error!(error = %e, "TLS record emit failed");
                    self.failed = true;
                    break;
                }
            }
        }
    }

    /// Queue a close_notify alert; drain it with
    /// [`drain_ciphertext`](Self::drain_ciphertext).
    pub fn send_close_notify(&mut self) {
        self.conn.send_close_notify();
    }

    /// True while the handshake is still in flight.
    #[must_use]
    pub fn is_handshaking(&self) -> bool {
        self.conn.is_handshaking()
    }

    /// True after a fatal alert or handshake failure.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// SNI hostname the peer requested (server side only).
    #[must_use]
    pub fn sni_hostname(&self) -> Option<&str> {
        self.conn.sni_hostname()
    }
}

impl std::fmt::Debug for TlsSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let side = match self.conn {
            TlsConnection::Client(_) => "client",
            TlsConnection::Server(_) => "server",
        };
        f.debug_struct("TlsSession")
            .field("side", &side)
            .field("failed", &self.failed)
            .finish()
    }
}

struct BufSink<'a>(&'a mut BytesMut);

impl io::Write for BufSink<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
