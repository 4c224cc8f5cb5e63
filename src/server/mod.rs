//! All bits and pieces concerning the HTTP mock server are in this module.
//!
//! [`MockServer`] is the user-facing front-end; the actual listening server
//! runs on a dedicated background thread, defined in the `hyper` sub-module,
//! and the two communicate through the shared `ServerInner` state. The
//! `handler` sub-module holds the per-request dispatcher and the middleware
//! chain wrapped around it; `tls` and `cert` cover the HTTPS bootstrap.
mod builder;
mod cert;
mod handler;
mod hyper;
mod tls;

use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, RwLock as StdRwLock};

use log::Level;
use tokio::sync::{oneshot, RwLock};

use crate::config::{Protocol, ServerConfig};
use crate::error::VerificationError;
use crate::expectation::Expectation;
use crate::logging::{FacadeLogger, Logger};
use crate::mounted::MountedExpectation;
use crate::request::UnmatchedRequest;
use crate::respond::RespondUnmatched;

pub use builder::MockServerBuilder;
pub use cert::{CertificateAuthority, IssuedCertificate, SelfSignedCertificate};
pub use handler::{HandlerFuture, RequestHandler};

/// Everything guarded by the server's single readers-writer lock: the
/// expectation registry and the unmatched-request log.
///
/// The dispatcher takes the write half for the whole scan-select-record
/// sequence; verification and introspection take the read half.
#[derive(Default)]
pub(crate) struct Registry {
    pub(crate) expectations: Vec<MountedExpectation>,
    pub(crate) unmatched: Vec<UnmatchedRequest>,
}

/// State shared between the [`MockServer`] handle and the background server
/// thread.
pub(crate) struct ServerInner {
    pub(crate) config: ServerConfig,
    pub(crate) registry: RwLock<Registry>,
    logger: StdRwLock<Arc<dyn Logger>>,
    unmatched_responder: StdRwLock<Option<Arc<dyn RespondUnmatched>>>,
    /// The middleware chain; the innermost element is the dispatcher.
    chain: StdRwLock<Option<RequestHandler>>,
}

impl ServerInner {
    pub(crate) fn new(config: ServerConfig) -> Arc<Self> {
        let inner = Arc::new(Self {
            config,
            registry: RwLock::new(Registry::default()),
            logger: StdRwLock::new(Arc::new(FacadeLogger)),
            unmatched_responder: StdRwLock::new(None),
            chain: StdRwLock::new(None),
        });
        let dispatcher = handler::dispatcher(Arc::downgrade(&inner));
        *inner.chain.write().unwrap() = Some(dispatcher);
        inner
    }

    pub(crate) fn log(&self, level: Level, message: fmt::Arguments<'_>) {
        self.logger.read().unwrap().log(level, message);
    }

    pub(crate) fn handler(&self) -> RequestHandler {
        self.chain
            .read()
            .unwrap()
            .clone()
            .expect("The root handler is installed at startup")
    }

    pub(crate) fn unmatched_responder(&self) -> Option<Arc<dyn RespondUnmatched>> {
        self.unmatched_responder.read().unwrap().clone()
    }

    pub(crate) fn scheme(&self) -> &'static str {
        match self.config.protocol {
            Protocol::Http => "http",
            Protocol::Https => "https",
        }
    }
}

/// A programmable HTTP(S) server running in the background to stand in for
/// one of your dependencies during a test.
///
/// Register [`Expectation`]s describing the requests you anticipate and the
/// responses to serve; incoming traffic is matched against them in
/// registration order. Requests nothing matched are recorded in the
/// unmatched-request log and answered with the configured status code
/// (418 by default).
///
/// Each instance listens on its own random loopback port, so tests run in
/// parallel without interfering; create one server per test rather than
/// sharing.
///
/// ```rust
/// use decoy::{Expectation, MockServer};
///
/// #[tokio::main]
/// async fn main() {
///     let server = MockServer::start().await;
///     server
///         .add_expectation(
///             Expectation::new("GET")
///                 .path("/health")
///                 .unwrap()
///                 .respond_with_string("ok", 200),
///         )
///         .await;
///
///     let response = reqwest::get(format!("{}/health", server.uri())).await.unwrap();
///     assert_eq!(response.status(), 200);
/// }
/// ```
pub struct MockServer {
    inner: Arc<ServerInner>,
    server_address: SocketAddr,
    // When `_shutdown_trigger` gets dropped the listening server terminates.
    _shutdown_trigger: oneshot::Sender<()>,
}

impl MockServer {
    pub(crate) fn new(
        inner: Arc<ServerInner>,
        server_address: SocketAddr,
        shutdown_trigger: oneshot::Sender<()>,
    ) -> Self {
        Self {
            inner,
            server_address,
            _shutdown_trigger: shutdown_trigger,
        }
    }

    /// Start a plain-HTTP server with the default configuration on a random
    /// loopback port.
    pub async fn start() -> Self {
        Self::builder().start().await
    }

    /// Start a server with a custom [`ServerConfig`] - e.g. HTTPS, a
    /// different unmatched status code, or a tighter body cap.
    pub async fn with_config(config: ServerConfig) -> Self {
        Self::builder().config(config).start().await
    }

    /// Configure a server step by step, e.g. to run it on a listener you
    /// bound yourself.
    pub fn builder() -> MockServerBuilder {
        MockServerBuilder::new()
    }

    /// The base URL of this server, e.g. `http://127.0.0.1:4372`.
    pub fn uri(&self) -> String {
        format!("{}://{}", self.inner.scheme(), self.server_address)
    }

    /// The socket address this server listens on.
    pub fn address(&self) -> &SocketAddr {
        &self.server_address
    }

    /// Register an expectation. Requests are matched against expectations in
    /// registration order; the returned handle exposes the invocation count
    /// and identifies the expectation for
    /// [`remove_expectation`](MockServer::remove_expectation).
    pub async fn add_expectation(&self, expectation: Expectation) -> MountedExpectation {
        let mounted = MountedExpectation::new(expectation);
        self.inner
            .registry
            .write()
            .await
            .expectations
            .push(mounted.clone());
        mounted
    }

    /// Remove a previously registered expectation. Returns `true` if it was
    /// found. Identity is the registration itself, not the matcher fields:
    /// two identically built expectations are still distinct.
    pub async fn remove_expectation(&self, mounted: &MountedExpectation) -> bool {
        let mut registry = self.inner.registry.write().await;
        let before = registry.expectations.len();
        registry
            .expectations
            .retain(|candidate| !candidate.same_registration(mounted));
        registry.expectations.len() < before
    }

    /// Drop every registered expectation.
    pub async fn clear_expectations(&self) {
        self.inner.registry.write().await.expectations.clear();
    }

    /// Check that every expectation with a declared exact call count
    /// ([`Expectation::exactly`]) was served precisely that number of times.
    ///
    /// Expectations without a declared count are flexible and never fail
    /// verification. Call this at the end of the test and propagate the
    /// error to fail it.
    pub async fn verify_expectations(&self) -> Result<(), VerificationError> {
        let registry = self.inner.registry.read().await;
        let unmet: Vec<String> = registry
            .expectations
            .iter()
            .filter_map(|mounted| mounted.unmet_diagnostic())
            .collect();
        if unmet.is_empty() {
            Ok(())
        } else {
            Err(VerificationError::new(unmet))
        }
    }

    /// A copy of all requests received so far that no expectation accepted.
    pub async fn unmatched_requests(&self) -> Vec<UnmatchedRequest> {
        self.inner.registry.read().await.unmatched.clone()
    }

    /// Empty the unmatched-request log.
    pub async fn clear_unmatched_requests(&self) {
        self.inner.registry.write().await.unmatched.clear();
    }

    /// Replace the logging transport. By default everything goes to the
    /// [`log`] facade.
    pub fn with_logger(&self, logger: impl Logger + 'static) -> &Self {
        *self.inner.logger.write().unwrap() = Arc::new(logger);
        self
    }

    /// Install a responder that takes over requests no expectation accepted,
    /// instead of the default unmatched response. The request is still
    /// recorded in the unmatched log first.
    pub fn with_unmatched_responder(&self, responder: impl RespondUnmatched + 'static) -> &Self {
        *self.inner.unmatched_responder.write().unwrap() = Some(Arc::new(responder));
        self
    }

    /// Wrap the current request handler in a middleware. The middleware
    /// receives the previous handler and returns the new one; repeated calls
    /// nest, with the most recently added middleware outermost.
    ///
    /// ```rust
    /// use std::sync::Arc;
    /// use decoy::MockServer;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let server = MockServer::start().await;
    ///     server.use_middleware(|next| {
    ///         Arc::new(move |request| {
    ///             let next = next.clone();
    ///             Box::pin(async move {
    ///                 next(request).await.insert_header("x-middleware", "yes")
    ///             })
    ///         })
    ///     });
    ///
    ///     let response = reqwest::get(server.uri()).await.unwrap();
    ///     assert_eq!(response.headers()["x-middleware"], "yes");
    /// }
    /// ```
    pub fn use_middleware<F>(&self, middleware: F) -> &Self
    where
        F: FnOnce(RequestHandler) -> RequestHandler,
    {
        let mut chain = self.inner.chain.write().unwrap();
        let previous = chain
            .take()
            .expect("The root handler is installed at startup");
        *chain = Some(middleware(previous));
        self
    }

    /// An HTTP client wired to talk to this server: plain for HTTP, and for
    /// HTTPS one that accepts the server's (self-signed) certificate without
    /// verification.
    pub fn default_client(&self) -> reqwest::Client {
        match self.inner.config.protocol {
            Protocol::Http => reqwest::Client::new(),
            Protocol::Https => reqwest::Client::builder()
                .use_rustls_tls()
                .danger_accept_invalid_certs(true)
                .build()
                .expect("Failed to build the default HTTPS client"),
        }
    }

    /// An HTTPS client for mutual-TLS scenarios: it presents `identity`
    /// during the handshake and trusts `root_certificates` (which should
    /// include the issuer of the server's certificate).
    ///
    /// Server-certificate verification is enforced only when the server
    /// itself requires client certificates; otherwise the client accepts any
    /// server certificate, mirroring [`default_client`](MockServer::default_client).
    pub fn mtls_client(
        &self,
        identity: reqwest::Identity,
        root_certificates: Vec<reqwest::Certificate>,
    ) -> reqwest::Client {
        let mut builder = reqwest::Client::builder().use_rustls_tls().identity(identity);
        for certificate in root_certificates {
            builder = builder.add_root_certificate(certificate);
        }
        let require_client_cert = self
            .inner
            .config
            .tls
            .as_ref()
            .map(|options| options.require_client_cert)
            .unwrap_or(false);
        if !require_client_cert {
            builder = builder.danger_accept_invalid_certs(true);
        }
        builder.build().expect("Failed to build the mTLS client")
    }

    /// Shut the server down and release its port. Equivalent to dropping the
    /// handle; spelled out for teardown code that wants to be explicit.
    pub fn close(self) {}
}
