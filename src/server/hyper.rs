//! The actual HTTP server: accept loop, TLS handshakes, body collection and
//! serialization of [`ResponseDefinition`]s into wire responses.
use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use http::StatusCode;
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use log::Level;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, ReadBuf};
use tokio::sync::{oneshot, Notify};
use tokio_rustls::TlsAcceptor;

use crate::request::Request;
use crate::respond::ResponseDefinition;
use crate::server::ServerInner;

type DynError = Box<dyn std::error::Error + Send + Sync>;

/// Accept connections until the shutdown trigger fires (or gets dropped,
/// which happens when the owning `MockServer` goes out of scope).
pub(crate) async fn run_server(
    listener: std::net::TcpListener,
    inner: Arc<ServerInner>,
    tls_acceptor: Option<TlsAcceptor>,
    shutdown_signal: oneshot::Receiver<()>,
) {
    listener
        .set_nonblocking(true)
        .expect("Failed to switch the listener to non-blocking mode");
    let listener = tokio::net::TcpListener::from_std(listener)
        .expect("Failed to register the listener with the runtime");

    tokio::pin!(shutdown_signal);
    loop {
        tokio::select! {
            _ = &mut shutdown_signal => break,
            accepted = listener.accept() => {
                let (stream, _) = match accepted {
                    Ok(accepted) => accepted,
                    Err(error) => {
                        inner.log(Level::Debug, format_args!("Failed to accept a connection: {error}"));
                        continue;
                    }
                };
                let inner = inner.clone();
                let tls_acceptor = tls_acceptor.clone();
                tokio::task::spawn(async move {
                    match tls_acceptor {
                        Some(acceptor) => match acceptor.accept(stream).await {
                            Ok(stream) => serve_connection(stream, inner).await,
                            // A failed handshake is a connection-level event:
                            // the client gets the TLS alert, nothing is
                            // recorded in the unmatched log.
                            Err(error) => inner.log(
                                Level::Debug,
                                format_args!("TLS handshake failed: {error}"),
                            ),
                        },
                        None => serve_connection(stream, inner).await,
                    }
                });
            }
        }
    }
}

async fn serve_connection<S>(stream: S, inner: Arc<ServerInner>)
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    // The accept task keeps a handle to the socket so it can take it back
    // from hyper when a timeout simulation is requested.
    let stream = SharedStream::new(stream);
    let timeout_requested = Arc::new(Notify::new());

    let service_inner = inner.clone();
    let service_notify = timeout_requested.clone();
    let service = service_fn(move |request: hyper::Request<Incoming>| {
        let inner = service_inner.clone();
        let timeout_requested = service_notify.clone();
        async move { Ok::<_, Infallible>(handle_request(inner, request, timeout_requested).await) }
    });

    let connection = hyper::server::conn::http1::Builder::new()
        .serve_connection(TokioIo::new(stream.clone()), service);
    tokio::pin!(connection);

    tokio::select! {
        result = &mut connection => {
            if let Err(error) = result {
                // Expected whenever a client hangs up mid-request.
                inner.log(Level::Debug, format_args!("Connection terminated: {error}"));
            }
        }
        _ = timeout_requested.notified() => {
            // A timeout simulation: stop driving HTTP without writing a
            // byte and hold the raw socket until the client gives up, so
            // the wait never outlives the connection.
            wait_for_disconnect(stream).await;
        }
    }
}

/// Read the raw socket until the peer closes it; whatever the client still
/// sends is discarded. Only called once hyper is no longer being polled for
/// this connection.
async fn wait_for_disconnect<S>(mut stream: SharedStream<S>)
where
    S: AsyncRead + Unpin,
{
    let mut buffer = [0u8; 1024];
    loop {
        match stream.read(&mut buffer).await {
            // EOF or a reset: the client is gone.
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
    }
}

async fn handle_request(
    inner: Arc<ServerInner>,
    request: hyper::Request<Incoming>,
    timeout_requested: Arc<Notify>,
) -> hyper::Response<Full<Bytes>> {
    let (parts, body) = request.into_parts();
    let body = match read_body(body, inner.config.max_body_size).await {
        Ok(body) => body,
        Err(error) => {
            // Oversized or broken bodies are rejected before any expectation
            // gets to see the request: nothing is matched, nothing counted.
            inner.log(
                Level::Warn,
                format_args!("Failed to read the request body: {error}"),
            );
            let mut response =
                hyper::Response::new(Full::new(Bytes::from_static(b"failed to read request body")));
            *response.status_mut() = StatusCode::BAD_REQUEST;
            return response;
        }
    };

    let request = Request::from_parts(parts, body, inner.scheme());
    let handler = inner.handler();
    let response = handler(request).await;
    if response.simulates_timeout() {
        // Hand the connection back to the accept task: it watches the socket
        // for the client hanging up while this future stays parked, so not a
        // single response byte is ever written.
        timeout_requested.notify_one();
        std::future::pending::<()>().await;
    }
    into_hyper_response(response)
}

async fn read_body(body: Incoming, limit: usize) -> Result<Vec<u8>, DynError> {
    let collected = if limit == 0 {
        body.collect().await?
    } else {
        Limited::new(body, limit).collect().await?
    };
    Ok(collected.to_bytes().to_vec())
}

fn into_hyper_response(definition: ResponseDefinition) -> hyper::Response<Full<Bytes>> {
    let mut builder = http::response::Builder::new().status(definition.status());
    let headers = builder
        .headers_mut()
        .expect("Response builder cannot be in an error state");
    for (name, value) in definition.headers() {
        headers.append(name, value.clone());
    }
    builder
        .body(Full::new(Bytes::from(definition.body().to_vec())))
        .expect("Failed to build the response")
}

/// A socket handle that can be given to hyper while the accept task keeps a
/// clone for itself.
///
/// Both sides poll the same underlying stream behind a mutex; the accept task
/// only touches it after it has stopped polling the hyper connection, so the
/// lock is never contended across an await point.
struct SharedStream<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> SharedStream<S> {
    fn new(stream: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(stream)),
        }
    }
}

impl<S> Clone for SharedStream<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: AsyncRead + Unpin> AsyncRead for SharedStream<S> {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let mut inner = self.inner.lock().unwrap();
        Pin::new(&mut *inner).poll_read(cx, buf)
    }
}

impl<S: AsyncWrite + Unpin> AsyncWrite for SharedStream<S> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut inner = self.inner.lock().unwrap();
        Pin::new(&mut *inner).poll_write(cx, buf)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut inner = self.inner.lock().unwrap();
        Pin::new(&mut *inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let mut inner = self.inner.lock().unwrap();
        Pin::new(&mut *inner).poll_shutdown(cx)
    }

    fn poll_write_vectored(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        bufs: &[io::IoSlice<'_>],
    ) -> Poll<io::Result<usize>> {
        let mut inner = self.inner.lock().unwrap();
        Pin::new(&mut *inner).poll_write_vectored(cx, bufs)
    }

    fn is_write_vectored(&self) -> bool {
        self.inner.lock().unwrap().is_write_vectored()
    }
}
