//! Wireproto: an incremental wire-protocol stack for non-blocking I/O loops.
//!
//! # Overview
//!
//! Wireproto parses and serializes HTTP/1.1 messages and RFC 6455 WebSocket
//! frames from input that arrives in arbitrary-sized pieces across repeated
//! non-blocking socket reads. Codecs keep partial-message state between
//! calls, never block, and hand completed messages to application threads
//! through fixed-capacity queues with a two-phase reserve/commit handoff.
//! TLS transports are wrapped by composition, not by a parallel code path.
//!
//! # Core Guarantees
//!
//! - **Re-entrant parsing**: any split of the input byte stream decodes to
//!   the same messages
//! - **Bounded memory**: string fields, bodies, and queues have fixed
//!   capacities; overlong input is clamped, never overrun
//! - **No blocking, no panics across the loop boundary**: failures are
//!   signaled by return values and the closable mark
//! - **At-most-once delivery**: a queued message reaches exactly one
//!   consumer, moving at most once
//!
//! # Module Structure
//!
//! - [`codec`]: the `Decoder`/`Encoder` traits shared by every protocol
//! - [`http`]: HTTP/1.1 message model and incremental codec
//! - [`ws`]: WebSocket frame codec, handshake, and session state
//! - [`tls`]: rustls-backed session adapter
//! - [`queue`]: bounded MPMC queues with two-phase handoff
//! - [`dispatch`]: per-transport dispatchers driven by the poll loop

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod codec;
pub mod dispatch;
pub mod http;
pub mod queue;
pub mod tls;
pub mod ws;

pub use codec::{Decoder, Encoder};
pub use queue::{BoundedQueue, PopPermit, PushPermit, QueueFull};
