use http::StatusCode;
use rustls::RootCertStore;
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

/// The wire protocol spoken by a [`MockServer`](crate::MockServer).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Protocol {
    Http,
    Https,
}

/// The minimum TLS protocol version accepted by an HTTPS mock server.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum MinProtocolVersion {
    #[default]
    Tls12,
    Tls13,
}

/// A server certificate chain together with its private key.
#[derive(Debug)]
pub struct ServerIdentity {
    pub cert_chain: Vec<CertificateDer<'static>>,
    pub private_key: PrivateKeyDer<'static>,
}

impl ServerIdentity {
    pub fn new(cert_chain: Vec<CertificateDer<'static>>, private_key: PrivateKeyDer<'static>) -> Self {
        Self {
            cert_chain,
            private_key,
        }
    }
}

impl Clone for ServerIdentity {
    fn clone(&self) -> Self {
        Self {
            cert_chain: self.cert_chain.clone(),
            private_key: self.private_key.clone_key(),
        }
    }
}

/// TLS settings for an HTTPS mock server.
///
/// With the default options the server presents a freshly generated
/// self-signed certificate and does not request a client certificate.
#[derive(Clone, Debug, Default)]
pub struct TlsOptions {
    /// Server certificates. When empty, a self-signed certificate is
    /// generated on startup. Only the first identity is presented.
    pub certificates: Vec<ServerIdentity>,
    /// Require the client to present a certificate during the handshake.
    pub require_client_cert: bool,
    /// Roots used to verify client certificates. Ignored unless
    /// `require_client_cert` is set and `skip_client_verify` is not.
    pub client_cas: Option<RootCertStore>,
    /// Accept any client certificate without verifying it against
    /// `client_cas`. Only meaningful together with `require_client_cert`.
    pub skip_client_verify: bool,
    /// Documents that clients are expected to skip verification of the
    /// server certificate. Clients built by
    /// [`MockServer::default_client`](crate::MockServer::default_client)
    /// always do, since the default certificate is self-signed.
    pub insecure_skip_verify: bool,
    /// Minimum TLS version accepted by the server.
    pub min_version: MinProtocolVersion,
}

/// Configuration for a [`MockServer`](crate::MockServer).
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Plain HTTP or TLS. Defaults to HTTP.
    pub protocol: Protocol,
    /// TLS settings, only consulted when `protocol` is HTTPS.
    pub tls: Option<TlsOptions>,
    /// Status code served when no expectation matches. Defaults to 418.
    pub unmatched_status_code: StatusCode,
    /// Body of the default unmatched response.
    pub unmatched_status_message: String,
    /// Log unmatched requests through the server logger. Defaults to true.
    pub log_unmatched: bool,
    /// Request body cap in bytes; bodies above it are rejected with a 400.
    /// `0` disables the cap. Defaults to 10 MiB.
    pub max_body_size: usize,
    /// Trace every incoming request and the outcome of its dispatch.
    pub verbose_logging: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            protocol: Protocol::Http,
            tls: None,
            unmatched_status_code: StatusCode::IM_A_TEAPOT,
            unmatched_status_message: "Unmatched Request".into(),
            log_unmatched: true,
            max_body_size: 10 * 1024 * 1024,
            verbose_logging: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_matches_documented_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.protocol, Protocol::Http);
        assert_eq!(config.unmatched_status_code, StatusCode::IM_A_TEAPOT);
        assert_eq!(config.unmatched_status_message, "Unmatched Request");
        assert!(config.log_unmatched);
        assert_eq!(config.max_body_size, 10 * 1024 * 1024);
        assert!(!config.verbose_logging);
        assert!(config.tls.is_none());
    }

    #[test]
    fn min_tls_version_defaults_to_1_2() {
        assert_eq!(TlsOptions::default().min_version, MinProtocolVersion::Tls12);
    }
}
