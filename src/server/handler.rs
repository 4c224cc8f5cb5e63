//! The per-request dispatcher and the middleware chain around it.
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};

use log::Level;

use crate::request::{Request, UnmatchedRequest};
use crate::respond::ResponseDefinition;
use crate::server::ServerInner;

/// The future produced by a [`RequestHandler`].
pub type HandlerFuture = Pin<Box<dyn Future<Output = ResponseDefinition> + Send + 'static>>;

/// A request handler, as seen by middleware: a function from a parsed
/// [`Request`] to a [`ResponseDefinition`].
///
/// [`MockServer::use_middleware`](crate::MockServer::use_middleware) composes
/// a new handler around the previous one; the innermost handler is the
/// dispatcher that scans the registered expectations.
pub type RequestHandler = Arc<dyn Fn(Request) -> HandlerFuture + Send + Sync>;

/// The innermost handler: matches the request against the expectation
/// registry and serves the selected response.
///
/// Holds a `Weak` reference so the handler chain stored inside the server
/// does not keep the server alive.
pub(crate) fn dispatcher(inner: Weak<ServerInner>) -> RequestHandler {
    Arc::new(move |request| {
        let inner = inner.clone();
        Box::pin(async move {
            match inner.upgrade() {
                Some(inner) => dispatch(inner, request).await,
                // The server is shutting down; the connection is about to die
                // anyway.
                None => ResponseDefinition::new(500),
            }
        })
    })
}

enum Outcome {
    Matched(ResponseDefinition),
    Unmatched(UnmatchedRequest),
}

async fn dispatch(inner: Arc<ServerInner>, request: Request) -> ResponseDefinition {
    if inner.config.verbose_logging {
        inner.log(Level::Debug, format_args!("Incoming request:\n{request}"));
    }

    let outcome = {
        let mut registry = inner.registry.write().await;
        let mut selected = None;
        for mounted in &registry.expectations {
            if mounted.expectation().matches(&request) {
                if let Some(response) = mounted.select_response() {
                    selected = Some(response);
                    break;
                }
                // Call cap reached: skip and keep scanning later
                // expectations.
            }
        }
        match selected {
            Some(response) => Outcome::Matched(response),
            None => {
                let snapshot = UnmatchedRequest::from_request(&request);
                registry.unmatched.push(snapshot.clone());
                Outcome::Unmatched(snapshot)
            }
        }
    };
    // The registry lock is released before any of the waits below, so a slow
    // response never serialises unrelated requests.

    match outcome {
        Outcome::Matched(response) => {
            if response.simulates_timeout() {
                if inner.config.verbose_logging {
                    inner.log(
                        Level::Debug,
                        format_args!("Matched expectation, simulating a timeout"),
                    );
                }
                // The connection layer never serializes this response: it
                // stops serving and parks the socket until the client
                // disconnects. The invocation was already counted during
                // selection.
                return response;
            }
            if let Some(delay) = response.delay() {
                tokio::time::sleep(delay).await;
            }
            if inner.config.verbose_logging {
                inner.log(
                    Level::Debug,
                    format_args!("Matched expectation, responding with status {}", response.status()),
                );
            }
            response
        }
        Outcome::Unmatched(snapshot) => {
            if inner.config.log_unmatched {
                inner.log(Level::Warn, format_args!("Unmatched request:\n{request}"));
            }
            match inner.unmatched_responder() {
                Some(responder) => responder.respond(&request, &snapshot),
                None => ResponseDefinition::new(inner.config.unmatched_status_code.as_u16())
                    .set_body_string(inner.config.unmatched_status_message.clone()),
            }
        }
    }
}
