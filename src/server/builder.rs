use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_rustls::TlsAcceptor;

use crate::config::{Protocol, ServerConfig};
use crate::server::hyper::run_server;
use crate::server::tls::build_server_config;
use crate::server::{MockServer, ServerInner};

/// A builder providing a fluent API to assemble a [`MockServer`] step-by-step.
/// Use [`MockServer::builder`] to get started.
pub struct MockServerBuilder {
    config: ServerConfig,
    listener: Option<std::net::TcpListener>,
}

impl MockServerBuilder {
    pub(super) fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            listener: None,
        }
    }

    /// Use a custom [`ServerConfig`] instead of the defaults.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Each [`MockServer`] is, by default, started on a random port available
    /// on your local machine. With `listener` you can run it on a specific
    /// port you have already bound.
    ///
    /// ```rust
    /// use decoy::MockServer;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    ///     let expected_address = listener.local_addr().unwrap();
    ///
    ///     let server = MockServer::builder().listener(listener).start().await;
    ///
    ///     assert_eq!(&expected_address, server.address());
    /// }
    /// ```
    pub fn listener(mut self, listener: std::net::TcpListener) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Finalise the builder and launch the [`MockServer`] instance.
    ///
    /// The listening server runs on a dedicated thread with its own
    /// single-threaded runtime, so `start` works from any async test runtime.
    pub async fn start(self) -> MockServer {
        let Self { config, listener } = self;
        let listener = listener.unwrap_or_else(|| {
            std::net::TcpListener::bind("127.0.0.1:0")
                .expect("Failed to bind an OS port for the mock server.")
        });
        let server_address = listener
            .local_addr()
            .expect("Failed to get the server address.");

        // Assembling the TLS configuration may generate a certificate; doing
        // it here surfaces failures before the background thread exists.
        let tls_acceptor = match config.protocol {
            Protocol::Https => {
                let options = config.tls.clone().unwrap_or_default();
                Some(TlsAcceptor::from(Arc::new(build_server_config(options))))
            }
            Protocol::Http => None,
        };

        let inner = ServerInner::new(config);
        let (shutdown_trigger, shutdown_receiver) = oneshot::channel();
        let server_inner = inner.clone();
        std::thread::spawn(move || {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .expect("Cannot build local tokio runtime");
            runtime.block_on(run_server(
                listener,
                server_inner,
                tls_acceptor,
                shutdown_receiver,
            ));
        });
        for _ in 0..40 {
            if std::net::TcpStream::connect_timeout(&server_address, Duration::from_millis(25))
                .is_ok()
            {
                break;
            }
            futures_timer::Delay::new(Duration::from_millis(25)).await;
        }

        MockServer::new(inner, server_address, shutdown_trigger)
    }
}
