//! TLS certificate generation.
//!
//! An HTTPS mock server that was given no certificates provisions a
//! self-signed leaf on startup ([`SelfSignedCertificate`]). For mutual-TLS
//! scenarios, [`CertificateAuthority`] generates a throwaway root and issues
//! server and client certificates chained to it.
use std::fmt::Display;
use std::net::IpAddr;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use rcgen::{
    BasicConstraints, Certificate, CertificateParams, DistinguishedName, ExtendedKeyUsagePurpose,
    IsCa, KeyPair, KeyUsagePurpose, SanType, SerialNumber, SignatureAlgorithm,
    PKCS_ECDSA_P256_SHA256,
};
use rustls_pki_types::{CertificateDer, PrivateKeyDer};

use crate::config::ServerIdentity;

pub(crate) const DEFAULT_ALGORITHM: &SignatureAlgorithm = &PKCS_ECDSA_P256_SHA256;

const ISSUER_KEY_USAGES: &[KeyUsagePurpose; 3] = &[
    KeyUsagePurpose::CrlSign,
    KeyUsagePurpose::KeyCertSign,
    KeyUsagePurpose::DigitalSignature,
];

const LEAF_KEY_USAGES: &[KeyUsagePurpose; 2] = &[
    KeyUsagePurpose::KeyEncipherment,
    KeyUsagePurpose::DigitalSignature,
];

static SERIAL_NUMBER: AtomicU64 = AtomicU64::new(1);

fn next_serial() -> u64 {
    SERIAL_NUMBER.fetch_add(1, Ordering::SeqCst)
}

fn default_hostnames() -> Vec<SanType> {
    vec![
        SanType::DnsName("localhost".to_string().try_into().unwrap()),
        SanType::IpAddress(IpAddr::from_str("127.0.0.1").unwrap()),
    ]
}

/// A self-signed ECDSA P-256 leaf certificate, valid from one hour in the
/// past for 24 hours, with `127.0.0.1` and `localhost` in its SANs.
///
/// This is the certificate an HTTPS [`MockServer`](crate::MockServer)
/// presents when [`TlsOptions::certificates`](crate::TlsOptions) is empty.
/// Generation panics on failure: without a certificate the server cannot
/// start, so there is nothing sensible to recover to.
pub struct SelfSignedCertificate {
    certificate: Certificate,
    key_pair: KeyPair,
}

impl SelfSignedCertificate {
    /// Generate a certificate with the given common name ("localhost" is the
    /// conventional choice).
    pub fn generate(common_name: &str) -> Self {
        let key_pair = KeyPair::generate_for(DEFAULT_ALGORITHM)
            .expect("Failed to generate a key pair for the server certificate");
        let serial = next_serial();

        let mut params = CertificateParams::default();
        let mut distinguished_name = DistinguishedName::new();
        distinguished_name.push(rcgen::DnType::CommonName, common_name);
        params.distinguished_name = distinguished_name;
        params.serial_number = Some(SerialNumber::from_slice(&serial.to_be_bytes()[..]));
        params.not_before = time::OffsetDateTime::now_utc() - time::Duration::hours(1);
        params.not_after = time::OffsetDateTime::now_utc() + time::Duration::hours(24);
        params.is_ca = IsCa::NoCa;
        params.key_usages = LEAF_KEY_USAGES.to_vec();
        params.extended_key_usages = vec![
            ExtendedKeyUsagePurpose::ServerAuth,
            ExtendedKeyUsagePurpose::ClientAuth,
        ];
        params.subject_alt_names = default_hostnames();

        let certificate = params
            .self_signed(&key_pair)
            .expect("Failed to self-sign the server certificate");
        Self {
            certificate,
            key_pair,
        }
    }

    pub fn cert_der(&self) -> CertificateDer<'static> {
        self.certificate.der().clone()
    }

    pub fn cert_pem(&self) -> String {
        self.certificate.pem()
    }

    pub fn private_key_der(&self) -> PrivateKeyDer<'static> {
        self.key_pair
            .serialize_der()
            .try_into()
            .expect("Failed to deserialize a serialized key")
    }

    pub fn private_key_pem(&self) -> String {
        self.key_pair.serialize_pem()
    }

    /// Package the certificate and key for
    /// [`TlsOptions::certificates`](crate::TlsOptions).
    pub fn into_identity(self) -> ServerIdentity {
        let cert = self.cert_der();
        let key = self.private_key_der();
        ServerIdentity::new(vec![cert], key)
    }
}

/// A throwaway root certificate authority for mutual-TLS tests.
///
/// The root can issue server certificates (to be presented by an HTTPS mock
/// server) and client certificates (to be presented by a test client); both
/// verify against the root. We do not bother with an intermediate
/// certificate because CAs use them for flexibility only.
pub struct CertificateAuthority {
    root_cert: Certificate,
    root_key: KeyPair,
}

impl CertificateAuthority {
    pub fn generate() -> Self {
        let root_key = KeyPair::generate_for(DEFAULT_ALGORITHM)
            .expect("Failed to generate a key pair for the root certificate");
        let serial = next_serial();

        let mut params = CertificateParams::default();
        params.distinguished_name = common_name(format!("Test-only temporary root CA #{serial}"));
        params.use_authority_key_identifier_extension = true;
        params.serial_number = Some(SerialNumber::from_slice(&serial.to_be_bytes()[..]));
        params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
        params.key_usages = ISSUER_KEY_USAGES.to_vec();

        let root_cert = params
            .self_signed(&root_key)
            .expect("Failed to self-sign the root certificate");
        Self {
            root_cert,
            root_key,
        }
    }

    pub fn root_cert_der(&self) -> CertificateDer<'static> {
        self.root_cert.der().clone()
    }

    pub fn root_cert_pem(&self) -> String {
        self.root_cert.pem()
    }

    /// Issue a server certificate for `localhost`/`127.0.0.1`, signed by this
    /// root.
    pub fn issue_server_certificate(&self) -> IssuedCertificate {
        let serial = next_serial();
        let mut params = CertificateParams::default();
        params.distinguished_name = common_name(format!("Test-only temporary server #{serial}"));
        params.use_authority_key_identifier_extension = true;
        params.serial_number = Some(SerialNumber::from_slice(&serial.to_be_bytes()[..]));
        params.is_ca = IsCa::NoCa;
        params.key_usages = LEAF_KEY_USAGES.to_vec();
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ServerAuth];
        params.subject_alt_names = default_hostnames();
        self.issue(params)
    }

    /// Issue a client certificate, signed by this root. Each invocation
    /// generates a fresh key pair.
    pub fn issue_client_certificate(&self, name: &str) -> IssuedCertificate {
        let serial = next_serial();
        let mut params = CertificateParams::default();
        params.distinguished_name =
            common_name(format!("Test-only temporary client {name} #{serial}"));
        params.use_authority_key_identifier_extension = true;
        params.serial_number = Some(SerialNumber::from_slice(&serial.to_be_bytes()[..]));
        params.is_ca = IsCa::NoCa;
        params.key_usages = LEAF_KEY_USAGES.to_vec();
        params.extended_key_usages = vec![ExtendedKeyUsagePurpose::ClientAuth];
        self.issue(params)
    }

    fn issue(&self, params: CertificateParams) -> IssuedCertificate {
        let key_pair = KeyPair::generate_for(DEFAULT_ALGORITHM)
            .expect("Failed to generate a key pair for the issued certificate");
        let certificate = params
            .signed_by(&key_pair, &self.root_cert, &self.root_key)
            .expect("Failed to sign the issued certificate");
        IssuedCertificate {
            certificate,
            key_pair,
        }
    }
}

/// A certificate issued by a [`CertificateAuthority`], together with its key
/// pair.
pub struct IssuedCertificate {
    certificate: Certificate,
    key_pair: KeyPair,
}

impl IssuedCertificate {
    pub fn cert_der(&self) -> CertificateDer<'static> {
        self.certificate.der().clone()
    }

    pub fn cert_pem(&self) -> String {
        self.certificate.pem()
    }

    pub fn private_key_der(&self) -> PrivateKeyDer<'static> {
        self.key_pair
            .serialize_der()
            .try_into()
            .expect("Failed to deserialize a serialized key")
    }

    pub fn private_key_pem(&self) -> String {
        self.key_pair.serialize_pem()
    }

    /// Package the certificate and key for
    /// [`TlsOptions::certificates`](crate::TlsOptions).
    pub fn into_identity(self) -> ServerIdentity {
        let cert = self.cert_der();
        let key = self.private_key_der();
        ServerIdentity::new(vec![cert], key)
    }
}

fn common_name(name: impl Display) -> DistinguishedName {
    let mut distinguished_name = DistinguishedName::new();
    distinguished_name.push(rcgen::DnType::CommonName, format!("{name}"));
    distinguished_name
}
