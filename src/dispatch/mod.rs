//! Protocol dispatchers.
//!
//! A dispatcher composes one codec with zero or one TLS session layer and is
//! driven by an external poll loop through the [`Dispatcher`] contract. Four
//! concrete shapes exist: [`HttpDispatcher`], [`WsDispatcher`], and their
//! TLS-wrapped forms [`TlsHttpDispatcher`] and [`TlsWsDispatcher`], built by
//! composition in [`TlsDispatcher`].
//!
//! Nothing here blocks and nothing panics across the poll-loop boundary:
//! connection failures are signaled by marking the socket closable, and full
//! queues defer work to a later pass.

mod http;
mod socket;
mod tls;
mod ws;

pub use http::HttpDispatcher;
pub use socket::{send_all, SendOutcome, Socket, SocketId};
pub use tls::{TlsDispatcher, TlsHttpDispatcher, TlsWsDispatcher};
pub use ws::{ClientTarget, WsDispatcher};

/// The contract the poll loop drives a dispatcher through.
///
/// `read` runs when the socket is readable; `process_outbound` runs once per
/// loop pass to drain application output. The lifecycle hooks migrate or
/// release per-connection state. All calls are non-blocking.
pub trait Dispatcher {
    /// A socket has been registered with this dispatcher.
    fn socket_opened(&mut self, socket: &mut dyn Socket);

    /// Data is available on `socket`.
    fn read(&mut self, socket: &mut dyn Socket);

    /// Drain queued outbound work for `socket`.
    fn process_outbound(&mut self, socket: &mut dyn Socket);

    /// The connection moved to a new identity (e.g. after a reconnect).
    fn socket_changed(&mut self, old: SocketId, new: SocketId);

    /// The socket is gone; release its state.
    fn socket_closed(&mut self, id: SocketId);
}
