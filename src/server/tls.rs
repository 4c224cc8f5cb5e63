//! Assembly of the rustls server configuration from [`TlsOptions`].
use std::sync::Arc;

use rustls::crypto::{verify_tls12_signature, verify_tls13_signature, WebPkiSupportedAlgorithms};
use rustls::server::danger::{ClientCertVerified, ClientCertVerifier};
use rustls::server::WebPkiClientVerifier;
use rustls::{DigitallySignedStruct, DistinguishedName, SignatureScheme, SupportedProtocolVersion};
use rustls_pki_types::{CertificateDer, UnixTime};

use crate::config::{MinProtocolVersion, TlsOptions};
use crate::server::cert::SelfSignedCertificate;

/// Build the rustls server configuration for an HTTPS mock server.
///
/// When no certificate was supplied a self-signed one is generated on the
/// spot. Failures are fatal: the server cannot start without a working TLS
/// configuration.
pub(crate) fn build_server_config(options: TlsOptions) -> rustls::ServerConfig {
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();
    let versions: &[&'static SupportedProtocolVersion] = match options.min_version {
        MinProtocolVersion::Tls12 => &[&rustls::version::TLS13, &rustls::version::TLS12],
        MinProtocolVersion::Tls13 => &[&rustls::version::TLS13],
    };
    let builder = rustls::ServerConfig::builder_with_protocol_versions(versions);

    let builder = if options.require_client_cert {
        if options.skip_client_verify {
            builder.with_client_cert_verifier(Arc::new(AcceptAnyClientCert::new()))
        } else {
            let roots = options
                .client_cas
                .unwrap_or_else(rustls::RootCertStore::empty);
            let verifier = WebPkiClientVerifier::builder(Arc::new(roots))
                .build()
                .expect("Failed to build the client certificate verifier");
            builder.with_client_cert_verifier(verifier)
        }
    } else {
        builder.with_no_client_auth()
    };

    let identity = options
        .certificates
        .into_iter()
        .next()
        .unwrap_or_else(|| SelfSignedCertificate::generate("localhost").into_identity());
    builder
        .with_single_cert(identity.cert_chain, identity.private_key)
        .expect("Failed to assemble the server TLS configuration")
}

/// Demands a client certificate during the handshake but accepts any,
/// without chain verification (the `skip_client_verify` mode). Signatures
/// are still checked so the client has to actually hold the key it claims.
#[derive(Debug)]
struct AcceptAnyClientCert {
    supported_algorithms: WebPkiSupportedAlgorithms,
}

impl AcceptAnyClientCert {
    fn new() -> Self {
        Self {
            supported_algorithms: rustls::crypto::aws_lc_rs::default_provider()
                .signature_verification_algorithms,
        }
    }
}

impl ClientCertVerifier for AcceptAnyClientCert {
    fn root_hint_subjects(&self) -> &[DistinguishedName] {
        &[]
    }

    fn verify_client_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _now: UnixTime,
    ) -> Result<ClientCertVerified, rustls::Error> {
        Ok(ClientCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        verify_tls12_signature(message, cert, dss, &self.supported_algorithms)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> Result<rustls::client::danger::HandshakeSignatureValid, rustls::Error> {
        verify_tls13_signature(message, cert, dss, &self.supported_algorithms)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.supported_algorithms.supported_schemes()
    }
}
