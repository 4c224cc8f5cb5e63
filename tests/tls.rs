use decoy::{
    CertificateAuthority, Expectation, MockServer, Protocol, ServerConfig, TlsOptions,
};

fn https_config(tls: TlsOptions) -> ServerConfig {
    ServerConfig {
        protocol: Protocol::Https,
        tls: Some(tls),
        ..ServerConfig::default()
    }
}

fn reqwest_root(ca: &CertificateAuthority) -> reqwest::Certificate {
    let der = ca.root_cert_der();
    reqwest::Certificate::from_der(&der).expect("Failed to create certificate from DER")
}

fn reqwest_identity(ca: &CertificateAuthority, name: &str) -> reqwest::Identity {
    let issued = ca.issue_client_certificate(name);
    let pem = format!("{}{}", issued.cert_pem(), issued.private_key_pem());
    reqwest::Identity::from_pem(pem.as_bytes()).expect("Failed to create identity from PEM")
}

#[tokio::test]
async fn https_servers_use_a_self_signed_cert_by_default() {
    // Arrange
    let server = MockServer::with_config(https_config(TlsOptions::default())).await;
    server
        .add_expectation(
            Expectation::new("GET")
                .path("/hello")
                .unwrap()
                .respond_with_string("secure", 200),
        )
        .await;

    // Assert - the base url carries the scheme
    assert!(server.uri().starts_with("https://127.0.0.1:"));

    // Act - the default client trusts the server blindly
    let response = server
        .default_client()
        .get(format!("{}/hello", server.uri()))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "secure");
}

#[tokio::test]
async fn verifying_clients_reject_the_self_signed_cert() {
    // Arrange
    let server = MockServer::with_config(https_config(TlsOptions::default())).await;

    // Act - a stock client with standard verification
    let outcome = reqwest::get(server.uri()).await;

    // Assert
    assert!(outcome.is_err());
}

#[tokio::test]
async fn a_ca_issued_server_cert_passes_standard_verification() {
    // Arrange
    let ca = CertificateAuthority::generate();
    let options = TlsOptions {
        certificates: vec![ca.issue_server_certificate().into_identity()],
        ..TlsOptions::default()
    };
    let server = MockServer::with_config(https_config(options)).await;
    server
        .add_expectation(Expectation::new("GET").respond_with_string("ok", 200))
        .await;

    // Act - the client trusts the root, full verification stays on
    let client = reqwest::Client::builder()
        .use_rustls_tls()
        .add_root_certificate(reqwest_root(&ca))
        .build()
        .unwrap();
    let response = client.get(server.uri()).send().await.unwrap();

    // Assert
    assert_eq!(response.status(), 200);
}

#[tokio::test]
async fn mutual_tls_accepts_clients_signed_by_the_trusted_ca() {
    // Arrange
    let ca = CertificateAuthority::generate();
    let mut client_cas = rustls::RootCertStore::empty();
    client_cas.add(ca.root_cert_der()).unwrap();
    let options = TlsOptions {
        certificates: vec![ca.issue_server_certificate().into_identity()],
        require_client_cert: true,
        client_cas: Some(client_cas),
        ..TlsOptions::default()
    };
    let server = MockServer::with_config(https_config(options)).await;
    server
        .add_expectation(
            Expectation::new("GET")
                .path("/secure")
                .unwrap()
                .respond_with_string("verified", 200),
        )
        .await;

    // Act
    let client = server.mtls_client(
        reqwest_identity(&ca, "tester@example.test"),
        vec![reqwest_root(&ca)],
    );
    let response = client
        .get(format!("{}/secure", server.uri()))
        .send()
        .await
        .unwrap();

    // Assert
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "verified");
}

#[tokio::test]
async fn mutual_tls_rejects_clients_signed_by_an_unknown_ca() {
    // Arrange
    let ca = CertificateAuthority::generate();
    let rogue_ca = CertificateAuthority::generate();
    let mut client_cas = rustls::RootCertStore::empty();
    client_cas.add(ca.root_cert_der()).unwrap();
    let options = TlsOptions {
        certificates: vec![ca.issue_server_certificate().into_identity()],
        require_client_cert: true,
        client_cas: Some(client_cas),
        ..TlsOptions::default()
    };
    let server = MockServer::with_config(https_config(options)).await;

    // Act - the client presents a certificate from an unrelated authority
    let client = server.mtls_client(
        reqwest_identity(&rogue_ca, "impostor@example.test"),
        vec![reqwest_root(&ca)],
    );
    let outcome = client.get(server.uri()).send().await;

    // Assert - the handshake fails before any request is dispatched
    assert!(outcome.is_err());
    assert!(server.unmatched_requests().await.is_empty());
}

#[tokio::test]
async fn skip_client_verify_accepts_any_presented_cert() {
    // Arrange - client certs are demanded but not verified
    let ca = CertificateAuthority::generate();
    let rogue_ca = CertificateAuthority::generate();
    let options = TlsOptions {
        certificates: vec![ca.issue_server_certificate().into_identity()],
        require_client_cert: true,
        skip_client_verify: true,
        ..TlsOptions::default()
    };
    let server = MockServer::with_config(https_config(options)).await;
    server
        .add_expectation(Expectation::new("GET").respond_with_string("ok", 200))
        .await;

    // Act
    let client = server.mtls_client(
        reqwest_identity(&rogue_ca, "anyone@example.test"),
        vec![reqwest_root(&ca)],
    );
    let response = client.get(server.uri()).send().await.unwrap();

    // Assert
    assert_eq!(response.status(), 200);
}
