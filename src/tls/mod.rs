//! TLS support via rustls.
//!
//! [`TlsAdapter`] holds the per-process configuration and mints a
//! [`TlsSession`] per connection; the session translates between raw socket
//! bytes and the plaintext a codec consumes. [`CredentialResolver`] picks a
//! server certificate chain by SNI hostname and offered signature schemes.

mod adapter;
mod error;
mod session;

pub use adapter::{CredentialResolver, TlsAdapter};
pub use error::TlsError;
pub use session::TlsSession;
