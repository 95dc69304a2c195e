//! HTTP/1.1 message model and incremental codec.

pub mod codec;
pub mod message;
pub mod types;

pub use codec::{HttpCodec, HttpError};
pub use message::{BoundedString, HttpMessage, BODY_CAPACITY, FIELD_CAPACITY};
pub use types::{
    default_reason, ConnectionState, ContentEncoding, MessageFlags, Method, Version,
};
