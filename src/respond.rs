use std::time::Duration;

use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use serde::Serialize;

use crate::request::{Request, UnmatchedRequest};

/// The blueprint for one response served by a [`MockServer`](crate::MockServer).
///
/// An [`Expectation`](crate::Expectation) carries an ordered list of
/// `ResponseDefinition`s; the n-th successful dispatch serves the n-th
/// definition and the last one repeats forever. A `ResponseDefinition` is also
/// what a [`RespondUnmatched`] implementation returns for requests nothing
/// matched.
#[derive(Clone, Debug)]
pub struct ResponseDefinition {
    status_code: StatusCode,
    headers: HeaderMap,
    body: Vec<u8>,
    delay: Option<Duration>,
    timeout_simulation: bool,
}

impl Default for ResponseDefinition {
    fn default() -> Self {
        Self::new(200)
    }
}

// This is a testing crate: misuses such as an out-of-range status code are
// programming mistakes in the test itself, so the conversion helpers panic
// instead of returning `Result` and every method accepts the widest
// convenient input type.
impl ResponseDefinition {
    /// Start building a response with the given status code.
    ///
    /// `0` counts as "unspecified" and becomes 200; any other value that is
    /// not a valid status code panics.
    pub fn new(status_code: u16) -> Self {
        Self {
            status_code: convert_status_code(status_code),
            headers: HeaderMap::new(),
            body: Vec::new(),
            delay: None,
            timeout_simulation: false,
        }
    }

    /// Replace the status code. `0` counts as "unspecified" and becomes 200.
    pub fn set_status(mut self, status_code: u16) -> Self {
        self.status_code = convert_status_code(status_code);
        self
    }

    /// Append a header value, keeping any values already present under `key`.
    pub fn append_header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        <K as TryInto<HeaderName>>::Error: std::fmt::Debug,
        V: TryInto<HeaderValue>,
        <V as TryInto<HeaderValue>>::Error: std::fmt::Debug,
    {
        let key = key.try_into().expect("Failed to convert into a header name.");
        let value = value
            .try_into()
            .expect("Failed to convert into a header value.");
        self.headers.append(key, value);
        self
    }

    /// Insert a header value, dropping any values already present under `key`.
    pub fn insert_header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        <K as TryInto<HeaderName>>::Error: std::fmt::Debug,
        V: TryInto<HeaderValue>,
        <V as TryInto<HeaderValue>>::Error: std::fmt::Debug,
    {
        let key = key.try_into().expect("Failed to convert into a header name.");
        let value = value
            .try_into()
            .expect("Failed to convert into a header value.");
        self.headers.insert(key, value);
        self
    }

    /// Set the response body from raw bytes. No `Content-Type` is implied.
    pub fn set_body_bytes<B>(mut self, body: B) -> Self
    where
        B: Into<Vec<u8>>,
    {
        self.body = body.into();
        self
    }

    /// Set the response body to a string and the `Content-Type` to
    /// `text/plain`.
    pub fn set_body_string<T>(self, body: T) -> Self
    where
        T: Into<String>,
    {
        self.set_body_bytes(body.into().into_bytes())
            .insert_header("content-type", "text/plain")
    }

    /// Set the response body from a JSON-serializable value and the
    /// `Content-Type` to `application/json`.
    pub fn set_body_json<B: Serialize>(self, body: B) -> Self {
        let body = serde_json::to_vec(&body).expect("Failed to convert into a JSON body.");
        self.set_body_bytes(body)
            .insert_header("content-type", "application/json")
    }

    /// Wait for `delay` before the response is written.
    ///
    /// The server releases its internal locks before sleeping, so a delayed
    /// response never holds up concurrent requests.
    pub fn set_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Never answer this request: the server keeps the connection open
    /// without writing a status line, headers or body until the client gives
    /// up. Overrides the body, status and delay of this definition.
    pub fn set_timeout_simulation(mut self) -> Self {
        self.timeout_simulation = true;
        self
    }

    pub(crate) fn status(&self) -> StatusCode {
        self.status_code
    }

    pub(crate) fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub(crate) fn body(&self) -> &[u8] {
        &self.body
    }

    pub(crate) fn delay(&self) -> Option<Duration> {
        self.delay.filter(|delay| !delay.is_zero())
    }

    pub(crate) fn simulates_timeout(&self) -> bool {
        self.timeout_simulation
    }
}

fn convert_status_code(status_code: u16) -> StatusCode {
    if status_code == 0 {
        // 0 means "use the default".
        return StatusCode::OK;
    }
    StatusCode::try_from(status_code).expect("Failed to convert into a status code.")
}

/// Anything that implements `RespondUnmatched` can be installed with
/// [`MockServer::with_unmatched_responder`](crate::MockServer::with_unmatched_responder)
/// to take over requests that no expectation accepted.
///
/// Closures of the right shape implement the trait out of the box:
///
/// ```rust
/// use decoy::{MockServer, Request, ResponseDefinition, UnmatchedRequest};
///
/// #[tokio::main]
/// async fn main() {
///     let server = MockServer::start().await;
///     server.with_unmatched_responder(|_request: &Request, unmatched: &UnmatchedRequest| {
///         ResponseDefinition::new(404)
///             .set_body_string(format!("nothing registered for {}", unmatched.uri))
///     });
///
///     let response = reqwest::get(format!("{}/missing", server.uri())).await.unwrap();
///     assert_eq!(response.status(), 404);
/// }
/// ```
pub trait RespondUnmatched: Send + Sync {
    /// Build the response for a request that matched no expectation.
    ///
    /// The `unmatched` snapshot is the same record that gets appended to the
    /// server's unmatched-request log.
    fn respond(&self, request: &Request, unmatched: &UnmatchedRequest) -> ResponseDefinition;
}

impl<F> RespondUnmatched for F
where
    F: Fn(&Request, &UnmatchedRequest) -> ResponseDefinition,
    F: Send + Sync,
{
    fn respond(&self, request: &Request, unmatched: &UnmatchedRequest) -> ResponseDefinition {
        (self)(request, unmatched)
    }
}
