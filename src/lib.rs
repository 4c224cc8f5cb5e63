#![allow(clippy::needless_doctest_main)]
//! `decoy` provides a programmable, in-process HTTP/HTTPS mock server for
//! black-box testing of applications that talk to third-party APIs.
//!
//! A test declares one or more [`Expectation`]s describing the shape of the
//! requests it anticipates - method, path (literal, pattern or with named
//! variables), query parameters, headers, body - and the response (possibly a
//! sequence of responses) to serve. The server accepts real HTTP traffic on a
//! random loopback port, answers from the first matching expectation, records
//! invocation counts, and can verify at teardown that every declared call
//! count was met.
//!
//! ## How to install
//!
//! Add `decoy` to your development dependencies:
//! ```toml
//! [dev-dependencies]
//! # ...
//! decoy = "0.1"
//! ```
//!
//! ## Getting started
//!
//! ```rust
//! use decoy::{Expectation, MockServer};
//!
//! #[tokio::main]
//! async fn main() {
//!     // Start a background HTTP server on a random local port
//!     let server = MockServer::start().await;
//!
//!     // When it receives a GET request on '/hello' it will respond with 200.
//!     server
//!         .add_expectation(
//!             Expectation::new("GET")
//!                 .path("/hello")
//!                 .unwrap()
//!                 .respond_with_string("world", 200),
//!         )
//!         .await;
//!
//!     // If we probe the server using any HTTP client it behaves as expected.
//!     let response = reqwest::get(format!("{}/hello", server.uri())).await.unwrap();
//!     assert_eq!(response.status(), 200);
//!     assert_eq!(response.text().await.unwrap(), "world");
//!
//!     // Requests that match no expectation get a 418 and are recorded in
//!     // the unmatched-request log.
//!     let response = reqwest::get(format!("{}/missing", server.uri())).await.unwrap();
//!     assert_eq!(response.status(), 418);
//!     assert_eq!(server.unmatched_requests().await.len(), 1);
//! }
//! ```
//!
//! ## Response sequences
//!
//! An expectation can carry several responses, served in registration order
//! with the last one repeating forever. Builder setters always edit the
//! current response; [`Expectation::next_response`] moves on to the next one.
//!
//! ## Spying
//!
//! Declare an exact call count with [`Expectation::exactly`] (or
//! [`Expectation::once`]) and check it at teardown with
//! [`MockServer::verify_expectations`]: the returned error lists every
//! expectation whose count was not met. During dispatch the same count acts
//! as a cap - an exhausted expectation is skipped so later expectations (or
//! the unmatched path) take over.
//!
//! ## HTTPS and mutual TLS
//!
//! With [`Protocol::Https`] the server terminates TLS itself, generating a
//! self-signed certificate on startup if [`TlsOptions`] carries none.
//! [`MockServer::default_client`] returns a client that accepts that
//! certificate; [`MockServer::mtls_client`] builds one that also presents a
//! client certificate, for servers configured to require it. The
//! [`CertificateAuthority`] helper issues throwaway server and client
//! certificates for such tests.
//!
//! ## Test isolation
//!
//! Every [`MockServer`] is fully isolated: it listens on its own random port
//! and is shut down when dropped (or via [`MockServer::close`]). Create one
//! server per test instead of sharing instances; parallel test execution
//! then works out of the box.
mod config;
mod error;
mod expectation;
pub mod http;
mod logging;
mod mounted;
mod request;
mod respond;
mod server;

pub use config::{MinProtocolVersion, Protocol, ServerConfig, ServerIdentity, TlsOptions};
pub use error::{BuilderError, VerificationError};
pub use expectation::Expectation;
pub use logging::Logger;
pub use mounted::MountedExpectation;
pub use request::{Request, UnmatchedRequest};
pub use respond::{RespondUnmatched, ResponseDefinition};
pub use server::{
    CertificateAuthority, HandlerFuture, IssuedCertificate, MockServer, MockServerBuilder,
    RequestHandler, SelfSignedCertificate,
};
