use std::fmt;
use std::time::SystemTime;

use http::request::Parts;
use http::{header, HeaderMap, Method};
use url::Url;

/// An incoming request to an instance of [`MockServer`](crate::MockServer).
///
/// The HTTP layer hands over the request only after the body has been fully
/// read (and bounded by the configured size cap), so matchers get an
/// immutable, self-contained view: no matcher ever has to await or consume
/// anything.
#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    pub url: Url,
    pub headers: HeaderMap,
    pub body: Vec<u8>,
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {}", self.method, self.url)?;
        for (name, value) in &self.headers {
            writeln!(f, "{}: {}", name, String::from_utf8_lossy(value.as_bytes()))?;
        }
        writeln!(f, "{}", String::from_utf8_lossy(&self.body))
    }
}

impl Request {
    pub(crate) fn from_parts(parts: Parts, body: Vec<u8>, scheme: &str) -> Self {
        let host = parts
            .headers
            .get(header::HOST)
            .and_then(|value| value.to_str().ok())
            .unwrap_or("localhost");
        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        let url = Url::parse(&format!("{scheme}://{host}{path_and_query}"))
            .expect("Failed to rebuild the request URL");

        Self {
            method: parts.method,
            url,
            headers: parts.headers,
            body,
        }
    }

    /// The request-URI: path plus query string, without scheme and host.
    pub(crate) fn request_uri(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }
}

/// A snapshot of a request that no registered expectation accepted.
///
/// Unmatched requests are appended to a per-server log which can be inspected
/// with [`MockServer::unmatched_requests`](crate::MockServer::unmatched_requests)
/// and emptied with
/// [`MockServer::clear_unmatched_requests`](crate::MockServer::clear_unmatched_requests).
#[derive(Clone, Debug)]
pub struct UnmatchedRequest {
    pub method: Method,
    /// Path and query string of the request, e.g. `/users/42?verbose=true`.
    pub uri: String,
    pub headers: HeaderMap,
    /// The request body, decoded lossily as UTF-8.
    pub body: String,
    /// Wall-clock time at which the request was dispatched.
    pub received_at: SystemTime,
}

impl UnmatchedRequest {
    pub(crate) fn from_request(request: &Request) -> Self {
        Self {
            method: request.method.clone(),
            uri: request.request_uri(),
            headers: request.headers.clone(),
            body: String::from_utf8_lossy(&request.body).into_owned(),
            received_at: SystemTime::now(),
        }
    }
}
