//! TLS error types.

use std::fmt;
use std::io;

/// Error type for TLS configuration and session plumbing.
///
/// Handshake failures and alerts raised mid-session deliberately do not pass
/// through here; see [`TlsSession::read_ciphertext`](super::TlsSession::read_ciphertext).
#[derive(Debug)]
pub enum TlsError {
    /// Invalid DNS name for SNI.
    InvalidDnsName(String),
    /// Certificate or key material could not be loaded.
    Credentials(String),
    /// Configuration error.
    Configuration(String),
    /// I/O error during TLS operations.
    Io(io::Error),
    /// Rustls-specific error.
    Rustls(rustls::Error),
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidDnsName(name) => write!(f, "invalid DNS name: {name}"),
            Self::Credentials(msg) => write!(f, "credential error: {msg}"),
            Self::Configuration(msg) => write!(f, "TLS configuration error: {msg}"),
            Self::Io(err) => write!(f, "I/O error: {err}"),
            Self::Rustls(err) => write!(f, "rustls error: {err}"),
        }
    }
}

impl std::error::Error for TlsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Rustls(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for TlsError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<rustls::Error> for TlsError {
    fn from(err: rustls::Error) -> Self {
        Self::Rustls(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;

    #[test]
    fn display_invalid_dns_name() {
        let err = TlsError::InvalidDnsName("bad.local".to_string());
        assert!(format!("{err}").contains("bad.local"));
    }

    #[test]
    fn io_error_has_source() {
        let err = TlsError::from(io::Error::other("boom"));
        assert!(err.source().is_some());
        assert!(format!("{err}").contains("I/O error"));
    }
}
