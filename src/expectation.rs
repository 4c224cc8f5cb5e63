use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use assert_json_diff::{assert_json_matches_no_panic, CompareMode};
use http::{HeaderName, Method};
use log::debug;
use regex::Regex;
use serde_json::Value;

use crate::error::BuilderError;
use crate::request::Request;
use crate::respond::ResponseDefinition;

/// How the request path is matched.
///
/// `Expectation::path` decides between the variants: a string containing
/// `{name}` placeholders or regex metacharacters is compiled as an anchored
/// pattern, anything else is compared literally.
pub(crate) enum PathSpec {
    /// No path constraint.
    Any,
    /// Exact comparison against the request path.
    Literal(String),
    /// Anchored regular expression, possibly with named capture groups.
    Pattern(Regex),
}

impl PathSpec {
    fn parse(path: &str) -> Result<Self, BuilderError> {
        static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
        let placeholder = PLACEHOLDER
            .get_or_init(|| Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap());

        let compile = |pattern: String| {
            Regex::new(&pattern).map_err(|source| BuilderError::InvalidPathPattern {
                pattern: path.to_string(),
                source,
            })
        };

        if path.contains('{') || path.contains('}') {
            // "/users/{id}" becomes "^/users/(?P<id>[^/]+)$".
            let rewritten = placeholder.replace_all(path, "(?P<$1>[^/]+)");
            Ok(Self::Pattern(compile(anchored(&rewritten))?))
        } else if path.contains(['.', '^', '$', '*', '+', '?', '(', ')', '[', ']', '|', '\\']) {
            Ok(Self::Pattern(compile(anchored(path))?))
        } else {
            Ok(Self::Literal(path.to_string()))
        }
    }

    fn has_capture_group(&self, name: &str) -> bool {
        match self {
            Self::Pattern(regex) => regex.capture_names().flatten().any(|group| group == name),
            _ => false,
        }
    }

    pub(crate) fn description(&self) -> &str {
        match self {
            Self::Any => "*",
            Self::Literal(path) => path,
            Self::Pattern(regex) => regex.as_str(),
        }
    }
}

fn anchored(pattern: &str) -> String {
    let mut anchored = String::with_capacity(pattern.len() + 2);
    if !pattern.starts_with('^') {
        anchored.push('^');
    }
    anchored.push_str(pattern);
    if !pattern.ends_with('$') {
        anchored.push('$');
    }
    anchored
}

/// How the request body is matched.
///
/// Exactly one mode is in force at any time: installing a mode replaces
/// whatever was there before, so "exact bytes" and "JSON subset" can never be
/// active together.
pub(crate) enum BodyExpectation {
    /// The body is not matched.
    None,
    /// Byte-for-byte comparison. An empty expected body matches anything.
    Exact(Vec<u8>),
    /// Arbitrary predicate over the raw body bytes. JSON equality, JSON
    /// subset and substring checks are all expressed this way.
    Predicate(Box<dyn Fn(&[u8]) -> bool + Send + Sync>),
}

impl fmt::Debug for BodyExpectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Closures do not implement `Debug`; summarise instead.
        match self {
            Self::None => f.write_str("None"),
            Self::Exact(bytes) => write!(f, "Exact({} bytes)", bytes.len()),
            Self::Predicate(_) => f.write_str("Predicate"),
        }
    }
}

/// A declarative rule pairing a request matcher with one or more responses.
///
/// Build an `Expectation` with the fluent methods below, then hand it to
/// [`MockServer::add_expectation`](crate::MockServer::add_expectation). The
/// first registered expectation that accepts an incoming request serves its
/// next response.
///
/// ```rust
/// use decoy::{Expectation, MockServer};
///
/// #[tokio::main]
/// async fn main() {
///     let server = MockServer::start().await;
///     server
///         .add_expectation(
///             Expectation::new("POST")
///                 .path("/hello")
///                 .unwrap()
///                 .body_string("world")
///                 .respond_with_string("ok", 200),
///         )
///         .await;
///
///     let client = reqwest::Client::new();
///     let response = client
///         .post(format!("{}/hello", server.uri()))
///         .body("world")
///         .send()
///         .await
///         .unwrap();
///     assert_eq!(response.status(), 200);
///     assert_eq!(response.text().await.unwrap(), "ok");
/// }
/// ```
///
/// ## Response sequences
///
/// An expectation may carry several responses, served in order; once the list
/// is exhausted the last response repeats. The builder always edits the
/// "current" response: [`next_response`](Expectation::next_response) commits
/// it and starts the next one.
///
/// ```rust
/// use decoy::Expectation;
///
/// let expectation = Expectation::new("GET")
///     .path("/seq")
///     .unwrap()
///     .with_response_header("x-step", "1")
///     .respond_with_string("one", 200)
///     .next_response()
///     .with_response_header("x-step", "2")
///     .respond_with_string("two", 201);
/// ```
pub struct Expectation {
    pub(crate) method: Method,
    pub(crate) path: PathSpec,
    pub(crate) path_variables: Vec<(String, String)>,
    pub(crate) query_params: Vec<(String, String)>,
    // Header names are kept as (lowercase) `HeaderName`s so that request
    // lookups are case-insensitive without any per-request normalisation.
    pub(crate) headers: Vec<(HeaderName, String)>,
    pub(crate) body: BodyExpectation,
    pub(crate) responses: Vec<ResponseDefinition>,
    pub(crate) max_calls: Option<u64>,
    /// Index of the response currently being edited by the builder.
    create_cursor: usize,
}

impl fmt::Debug for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Expectation")
            .field("method", &self.method)
            .field("path", &self.path.description())
            .field("body", &self.body)
            .field("responses", &self.responses.len())
            .field("max_calls", &self.max_calls)
            .finish()
    }
}

// The infallible builder methods take the widest convenient input and panic
// on conversion failures (e.g. an invalid HTTP method): in a test suite those
// are bugs in the test, not conditions to recover from. Methods whose *input
// data* can legitimately be broken - path patterns, expected JSON documents,
// fixture files - return `Result` instead.
impl Expectation {
    /// Start building an expectation for requests with the given HTTP method.
    pub fn new<M: AsRef<str>>(method: M) -> Self {
        let method = Method::from_str(&method.as_ref().to_ascii_uppercase())
            .expect("Failed to convert into an HTTP method.");
        Self {
            method,
            path: PathSpec::Any,
            path_variables: Vec::new(),
            query_params: Vec::new(),
            headers: Vec::new(),
            body: BodyExpectation::None,
            responses: Vec::new(),
            max_calls: None,
            create_cursor: 0,
        }
    }

    /// Constrain the request path.
    ///
    /// Strings containing `{name}` placeholders are compiled into anchored
    /// regular expressions with one named capture group per placeholder:
    /// `"/users/{id}"` matches `/users/42` and captures `id = "42"`. Strings
    /// containing other regex metacharacters are treated as raw regular
    /// expressions and anchored as a whole. Everything else is compared
    /// literally against the request path.
    pub fn path<P: AsRef<str>>(mut self, path: P) -> Result<Self, BuilderError> {
        self.path = PathSpec::parse(path.as_ref())?;
        for (name, _) in &self.path_variables {
            if !self.path.has_capture_group(name) {
                return Err(BuilderError::UnknownPathVariable { name: name.clone() });
            }
        }
        Ok(self)
    }

    /// Require the named capture group of the path pattern to equal `value`.
    ///
    /// The group must exist in the pattern by the time the expectation is
    /// complete; declaring a variable for a group the pattern does not define
    /// is a builder error.
    pub fn path_variable<K, V>(mut self, name: K, value: V) -> Result<Self, BuilderError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        let name = name.into();
        if !matches!(self.path, PathSpec::Any) && !self.path.has_capture_group(&name) {
            return Err(BuilderError::UnknownPathVariable { name });
        }
        self.path_variables.push((name, value.into()));
        Ok(self)
    }

    /// Declare several path variables at once.
    pub fn path_variables<K, V>(
        mut self,
        variables: impl IntoIterator<Item = (K, V)>,
    ) -> Result<Self, BuilderError>
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (name, value) in variables {
            self = self.path_variable(name, value)?;
        }
        Ok(self)
    }

    /// Require the query parameter `key` to be present with exactly `value`.
    /// Query parameters not declared on the expectation are ignored.
    pub fn query_param<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        self.query_params.push((key.into(), value.into()));
        self
    }

    /// Declare several required query parameters at once.
    pub fn query_params<K, V>(mut self, params: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in params {
            self = self.query_param(key, value);
        }
        self
    }

    /// Require the header `key` to be present with exactly `value`. The
    /// lookup is case-insensitive; headers not declared on the expectation
    /// are ignored.
    pub fn header<K, V>(mut self, key: K, value: V) -> Self
    where
        K: TryInto<HeaderName>,
        <K as TryInto<HeaderName>>::Error: std::fmt::Debug,
        V: Into<String>,
    {
        let key = key.try_into().expect("Failed to convert into a header name.");
        self.headers.push((key, value.into()));
        self
    }

    /// Declare several required headers at once.
    pub fn headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: TryInto<HeaderName>,
        <K as TryInto<HeaderName>>::Error: std::fmt::Debug,
        V: Into<String>,
    {
        for (key, value) in headers {
            self = self.header(key, value);
        }
        self
    }

    /// Require the request body to equal `body` byte for byte. An empty
    /// expected body leaves the body unchecked.
    pub fn body<B: Into<Vec<u8>>>(mut self, body: B) -> Self {
        self.body = BodyExpectation::Exact(body.into());
        self
    }

    /// Require the request body to equal `body` byte for byte.
    pub fn body_string<T: Into<String>>(self, body: T) -> Self {
        self.body(body.into().into_bytes())
    }

    /// Load the expected request body from a file, eagerly; matches like
    /// [`body`](Expectation::body).
    pub fn body_from_file<P: AsRef<Path>>(self, path: P) -> Result<Self, BuilderError> {
        let body = std::fs::read(path.as_ref()).map_err(|source| BuilderError::Fixture {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Ok(self.body(body))
    }

    /// Require the request body to be JSON equal to `expected`.
    ///
    /// The expected document is parsed once, up front; the actual body is
    /// parsed on every request and compared structurally, so key order and
    /// whitespace do not matter.
    pub fn body_json<T: AsRef<str>>(mut self, expected: T) -> Result<Self, BuilderError> {
        let expected: Value = serde_json::from_str(expected.as_ref())?;
        self.body = BodyExpectation::Predicate(Box::new(move |actual| {
            serde_json::from_slice::<Value>(actual)
                .map(|actual| actual == expected)
                .unwrap_or(false)
        }));
        Ok(self)
    }

    /// Require the request body to be a JSON document containing every
    /// key/value pair of `expected`, recursively; extra fields are allowed.
    ///
    /// `{"name":"test"}` matches `{"name":"test","age":30}`.
    pub fn partial_json<T: AsRef<str>>(mut self, expected: T) -> Result<Self, BuilderError> {
        let expected: Value = serde_json::from_str(expected.as_ref())?;
        self.body = BodyExpectation::Predicate(Box::new(move |actual| {
            let Ok(actual) = serde_json::from_slice::<Value>(actual) else {
                return false;
            };
            let config = assert_json_diff::Config::new(CompareMode::Inclusive);
            assert_json_matches_no_panic(&actual, &expected, config).is_ok()
        }));
        Ok(self)
    }

    /// Require the request body to contain `substring`.
    pub fn body_contains<T: Into<String>>(mut self, substring: T) -> Self {
        let substring = substring.into();
        self.body = BodyExpectation::Predicate(Box::new(move |actual| {
            match std::str::from_utf8(actual) {
                Ok(actual) => actual.contains(&substring),
                Err(error) => {
                    debug!("can't convert body from byte slice to string: {error}");
                    false
                }
            }
        }));
        self
    }

    /// Match the request body with an arbitrary predicate.
    pub fn match_body_with<F>(mut self, matcher: F) -> Self
    where
        F: Fn(&[u8]) -> bool + Send + Sync + 'static,
    {
        self.body = BodyExpectation::Predicate(Box::new(matcher));
        self
    }

    /// Declare that this expectation must be served exactly `calls` times.
    ///
    /// The cap gates dispatch - once reached, the expectation is skipped and
    /// later expectations (or the unmatched path) take over - and is checked
    /// by [`MockServer::verify_expectations`](crate::MockServer::verify_expectations).
    pub fn exactly(mut self, calls: u64) -> Self {
        self.max_calls = Some(calls);
        self
    }

    /// Shorthand for [`exactly(1)`](Expectation::exactly).
    pub fn once(self) -> Self {
        self.exactly(1)
    }

    /// Set the body and status code of the response currently being edited.
    pub fn respond_with<B: Into<Vec<u8>>>(self, body: B, status_code: u16) -> Self {
        self.edit_current_response(|response| {
            response.set_status(status_code).set_body_bytes(body)
        })
    }

    /// Set a string body and status code on the response currently being
    /// edited.
    pub fn respond_with_string<T: Into<String>>(self, body: T, status_code: u16) -> Self {
        self.edit_current_response(|response| {
            response.set_status(status_code).set_body_string(body)
        })
    }

    /// Load the response body from a file, eagerly.
    pub fn respond_from_file<P: AsRef<Path>>(
        self,
        path: P,
        status_code: u16,
    ) -> Result<Self, BuilderError> {
        let body = std::fs::read(path.as_ref()).map_err(|source| BuilderError::Fixture {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Ok(self.respond_with(body, status_code))
    }

    /// Set a header on the response currently being edited.
    pub fn with_response_header<K, V>(self, key: K, value: V) -> Self
    where
        K: TryInto<http::HeaderName>,
        <K as TryInto<http::HeaderName>>::Error: std::fmt::Debug,
        V: TryInto<http::HeaderValue>,
        <V as TryInto<http::HeaderValue>>::Error: std::fmt::Debug,
    {
        self.edit_current_response(|response| response.insert_header(key, value))
    }

    /// Set several headers on the response currently being edited.
    pub fn with_response_headers<K, V>(mut self, headers: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: TryInto<http::HeaderName>,
        <K as TryInto<http::HeaderName>>::Error: std::fmt::Debug,
        V: TryInto<http::HeaderValue>,
        <V as TryInto<http::HeaderValue>>::Error: std::fmt::Debug,
    {
        for (key, value) in headers {
            self = self.with_response_header(key, value);
        }
        self
    }

    /// Delay the response currently being edited.
    pub fn with_response_delay(self, delay: Duration) -> Self {
        self.edit_current_response(|response| response.set_delay(delay))
    }

    /// Turn the response currently being edited into a timeout simulation:
    /// the server will accept the request but never answer it.
    pub fn simulate_timeout(self) -> Self {
        self.edit_current_response(ResponseDefinition::set_timeout_simulation)
    }

    /// Commit the response currently being edited and start the next one.
    ///
    /// All response-level setters target the current response; this is the
    /// only way to move on. If the cursor walks past the end of the list a
    /// fresh default response (200, empty) is appended.
    pub fn next_response(mut self) -> Self {
        if self.responses.is_empty() {
            self.responses.push(ResponseDefinition::default());
        }
        self.create_cursor += 1;
        if self.create_cursor >= self.responses.len() {
            self.responses.push(ResponseDefinition::default());
        }
        self
    }

    fn edit_current_response(
        mut self,
        edit: impl FnOnce(ResponseDefinition) -> ResponseDefinition,
    ) -> Self {
        if self.responses.is_empty() {
            self.responses.push(ResponseDefinition::default());
        }
        let cursor = self.create_cursor.min(self.responses.len() - 1);
        let current = std::mem::take(&mut self.responses[cursor]);
        self.responses[cursor] = edit(current);
        self
    }

    /// The pure request predicate: does this expectation accept `request`?
    ///
    /// Matching never mutates anything; call counting and response selection
    /// happen separately, under the server's registry lock.
    pub(crate) fn matches(&self, request: &Request) -> bool {
        if request.method != self.method {
            return false;
        }

        match &self.path {
            PathSpec::Any => {}
            PathSpec::Literal(path) => {
                if request.url.path() != path {
                    return false;
                }
            }
            PathSpec::Pattern(pattern) => {
                let Some(captures) = pattern.captures(request.url.path()) else {
                    return false;
                };
                for (name, expected) in &self.path_variables {
                    if captures.name(name).map(|capture| capture.as_str())
                        != Some(expected.as_str())
                    {
                        return false;
                    }
                }
            }
        }

        for (key, expected) in &self.query_params {
            let first_value = request
                .url
                .query_pairs()
                .find(|(name, _)| name == key)
                .map(|(_, value)| value.into_owned());
            if first_value.as_deref() != Some(expected.as_str()) {
                return false;
            }
        }

        for (name, expected) in &self.headers {
            match request.headers.get(name).and_then(|value| value.to_str().ok()) {
                Some(value) if value == expected => {}
                _ => return false,
            }
        }

        match &self.body {
            BodyExpectation::None => true,
            BodyExpectation::Exact(expected) => {
                expected.is_empty() || *expected == request.body
            }
            BodyExpectation::Predicate(predicate) => predicate(&request.body),
        }
    }
}
