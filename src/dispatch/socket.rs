//! The socket contract dispatchers are driven against.
//!
//! The poll loop that owns real file descriptors lives outside this crate;
//! dispatchers only see this trait. Every call is non-blocking: a read or
//! write that cannot progress returns [`io::ErrorKind::WouldBlock`].

use bytes::{Buf, BytesMut};
use std::io;
use tracing::warn;

/// Stable identity of a connection, assigned by the owning poll loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketId(pub u64);

impl std::fmt::Display for SocketId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "socket#{}", self.0)
    }
}

/// A non-blocking byte stream plus the closable mark the poll loop honors.
pub trait Socket {
    /// Connection identity; stable for the socket's lifetime.
    fn id(&self) -> SocketId;

    /// Read available bytes into `buf`. `Ok(0)` means the peer closed.
    ///
    /// # Errors
    ///
    /// `WouldBlock` when nothing is available; any other error is fatal for
    /// the connection.
    fn receive(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write as many bytes as the transport accepts right now.
    ///
    /// # Errors
    ///
    /// `WouldBlock` when the transport cannot take any bytes; any other
    /// error is fatal for the connection.
    fn send(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Ask the poll loop to close this socket after the current pass.
    fn mark_closable(&mut self);
}

/// Result of [`send_all`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Everything left the socket.
    Flushed,
    /// The transport backed up; the unsent remainder stays in the buffer.
    Deferred,
    /// A write error occurred; the socket has been marked closable.
    Failed,
}

/// Passes at which a partial send gives up for this I/O pass.
const SEND_RETRY_LIMIT: usize = 16;

/// Push the front of `buf` out through `socket`, retrying partial sends a
/// bounded number of times. Sent bytes are consumed from `buf`; on
/// [`SendOutcome::Failed`] the remainder is dropped and the socket is marked
/// closable.
pub fn send_all(socket: &mut dyn Socket, buf: &mut BytesMut) -> SendOutcome {
    for _ in 0..SEND_RETRY_LIMIT {
        if buf.is_empty() {
            return SendOutcome::Flushed;
        }
        match socket.send(buf.as_ref()) {
            Ok(0) => break,
            Ok(n) => buf.advance(n),
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {
                return SendOutcome::Deferred;
            }
            Err(e) => {
                warn!(socket = %socket.id(), error = %e, "send failed");
                buf.clear();
                socket.mark_closable();
                return SendOutcome::Failed;
            }
        }
    }
    if buf.is_empty() {
        SendOutcome::Flushed
    } else {
        SendOutcome::Deferred
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemorySocket;
    use super::*;

    #[test]
    fn send_all_flushes_in_one_pass() {
        let mut socket = MemorySocket::new(1);
        let mut buf = BytesMut::from(&b"hello"[..]);
        assert_eq!(send_all(&mut socket, &mut buf), SendOutcome::Flushed);
        assert_eq!(socket.outbound, b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn send_all_retries_partial_writes() {
        let mut socket = MemorySocket::new(1);
        socket.send_limit = 2;
        let mut buf = BytesMut::from(&b"0123456789"[..]);
        assert_eq!(send_all(&mut socket, &mut buf), SendOutcome::Flushed);
        assert_eq!(socket.outbound, b"0123456789");
    }

    #[test]
    fn send_all_error_marks_closable() {
        let mut socket = MemorySocket::new(1);
        socket.fail_next_send = true;
        let mut buf = BytesMut::from(&b"data"[..]);
        assert_eq!(send_all(&mut socket, &mut buf), SendOutcome::Failed);
        assert!(socket.closable);
        assert!(buf.is_empty());
    }
}
