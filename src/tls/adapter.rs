//! TLS configuration shared across connections.
//!
//! A [`TlsAdapter`] owns one rustls config (client or server) and mints a
//! [`TlsSession`](super::TlsSession) per connection. The session-ID cache
//! lives inside the config, so resumption state is process-wide and lasts
//! exactly as long as the adapter.

use rustls::client::ClientConfig;
use rustls::crypto::aws_lc_rs::sign::any_supported_type;
use rustls::server::{ClientHello, ResolvesServerCert, ServerConfig};
use rustls::sign::CertifiedKey;
use rustls::RootCertStore;
use rustls_pki_types::{CertificateDer, PrivateKeyDer, ServerName};
use std::fmt;
use std::sync::Arc;

use super::error::TlsError;
use super::session::TlsSession;

/// Shared TLS configuration for one side of the protocol.
#[derive(Debug, Clone)]
pub struct TlsAdapter {
    inner: AdapterConfig,
}

#[derive(Debug, Clone)]
enum AdapterConfig {
    Client(Arc<ClientConfig>),
    Server(Arc<ServerConfig>),
}

impl TlsAdapter {
    /// Client adapter trusting the given PEM root certificates.
    ///
    /// Chain verification delegates to rustls path validation.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::Credentials`] when the PEM data is unusable.
    pub fn client_from_pem(root_pem: &[u8]) -> Result<Self, TlsError> {
        let mut roots = RootCertStore::empty();
        for cert in parse_certs(root_pem)? {
            roots
                .add(cert)
                .map_err(|e| TlsError::Credentials(e.to_string()))?;
        }
        if roots.is_empty() {
            return Err(TlsError::Credentials("no root certificates".into()));
        }
        let config = ClientConfig::builder()
            .with_root_certificates(roots)
            .with_no_client_auth();
        Ok(Self {
            inner: AdapterConfig::Client(Arc::new(config)),
        })
    }

    /// Client adapter from a prebuilt config.
    #[must_use]
    pub fn client_with_config(config: Arc<ClientConfig>) -> Self {
        Self {
            inner: AdapterConfig::Client(config),
        }
    }

    /// Server adapter with a single certificate chain and key.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::Credentials`] when the PEM data is unusable.
    pub fn server_from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, TlsError> {
        let mut resolver = CredentialResolver::new();
        resolver.push(None, cert_pem, key_pem)?;
        Ok(Self::server_with_resolver(resolver))
    }

    /// Server adapter selecting credentials per connection through
    /// `resolver`.
    #[must_use]
    pub fn server_with_resolver(resolver: CredentialResolver) -> Self {
        let config = ServerConfig::builder()
            .with_no_client_auth()
            .with_cert_resolver(Arc::new(resolver));
        Self {
            inner: AdapterConfig::Server(Arc::new(config)),
        }
    }

    /// True for the client side.
    #[must_use]
    pub fn is_client(&self) -> bool {
        matches!(self.inner, AdapterConfig::Client(_))
    }

    /// Create the per-connection session object.
    ///
    /// Client adapters require `host` for SNI and verification; server
    /// adapters ignore it.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::InvalidDnsName`] for an unusable client hostname,
    /// or [`TlsError::Rustls`] when rustls rejects the config.
    pub fn session(&self, host: Option<&str>) -> Result<TlsSession, TlsError> {
        match &self.inner {
            AdapterConfig::Client(config) => {
                let host = host.ok_or_else(|| TlsError::InvalidDnsName(String::new()))?;
                let name = ServerName::try_from(host.to_owned())
                    .map_err(|_| TlsError::InvalidDnsName(host.to_owned()))?;
                TlsSession::client(Arc::clone(config), name)
            }
            AdapterConfig::Server(config) => TlsSession::server(Arc::clone(config)),
        }
    }
}

/// Server credential store: certificate chains keyed by hostname, selected
/// by SNI and by the signature schemes the peer offered.
pub struct CredentialResolver {
    entries: Vec<CredentialEntry>,
}

struct CredentialEntry {
    /// `None` matches any requested hostname.
    host: Option<String>,
    credential: Arc<CertifiedKey>,
}

impl CredentialResolver {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Add a chain and key, optionally pinned to one hostname.
    ///
    /// # Errors
    ///
    /// Returns [`TlsError::Credentials`] when the PEM data is unusable.
    pub fn push(
        &mut self,
        host: Option<&str>,
        cert_pem: &[u8],
        key_pem: &[u8],
    ) -> Result<(), TlsError> {
        let chain = parse_certs(cert_pem)?;
        if chain.is_empty() {
            return Err(TlsError::Credentials("no certificates in PEM".into()));
        }
        let key = parse_key(key_pem)?;
        let signing_key =
            any_supported_type(&key).map_err(|e| TlsError::Credentials(e.to_string()))?;
        self.entries.push(CredentialEntry {
            host: host.map(str::to_owned),
            credential: Arc::new(CertifiedKey::new(chain, signing_key)),
        });
        Ok(())
    }

    /// Number of stored credentials.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no credentials are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for CredentialResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CredentialResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hosts: Vec<_> = self.entries.iter().map(|e| e.host.as_deref()).collect();
        f.debug_struct("CredentialResolver")
            .field("hosts", &hosts)
            .finish()
    }
}

impl ResolvesServerCert for CredentialResolver {
    fn resolve(&self, client_hello: ClientHello<'_>) -> Option<Arc<CertifiedKey>> {
        let sni = client_hello.server_name();
        self.entries
            .iter()
            .filter(|e| host_matches(e.host.as_deref(), sni))
            .find(|e| {
                e.credential
                    .key
                    .choose_scheme(client_hello.signature_schemes())
                    .is_some()
            })
            .map(|e| Arc::clone(&e.credential))
    }
}

/// An unpinned entry serves any name; a pinned one serves exactly that name.
fn host_matches(pinned: Option<&str>, requested: Option<&str>) -> bool {
    match (pinned, requested) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(p), Some(r)) => p.eq_ignore_ascii_case(r),
    }
}

fn parse_certs(pem: &[u8]) -> Result<Vec<CertificateDer<'static>>, TlsError> {
    rustls_pemfile::certs(&mut &pem[..])
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| TlsError::Credentials(e.to_string()))
}

fn parse_key(pem: &[u8]) -> Result<PrivateKeyDer<'static>, TlsError> {
    rustls_pemfile::private_key(&mut &pem[..])
        .map_err(|e| TlsError::Credentials(e.to_string()))?
        .ok_or_else(|| TlsError::Credentials("no private key in PEM".into()))
}
