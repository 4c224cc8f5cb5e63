use std::path::PathBuf;

use thiserror::Error;

/// An error raised while assembling an [`Expectation`](crate::Expectation).
///
/// Builder errors stop further configuration: the fallible builder methods
/// return `Result` so that a broken path pattern, an unparsable expected JSON
/// document or a missing fixture file surfaces at build time instead of
/// producing an expectation that can never match.
#[derive(Debug, Error)]
pub enum BuilderError {
    /// The path string could not be compiled into a regular expression.
    #[error("invalid path pattern {pattern:?}: {source}")]
    InvalidPathPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    /// The expected JSON document supplied to a body matcher is not valid JSON.
    #[error("invalid expected JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    /// A fixture file could not be read.
    #[error("unable to read fixture {path:?}: {source}")]
    Fixture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// A path variable was declared for a capture group that does not exist
    /// in the path pattern.
    #[error("path variable {name:?} is not a named capture group in the path pattern")]
    UnknownPathVariable { name: String },
}

/// The composite error returned by
/// [`MockServer::verify_expectations`](crate::MockServer::verify_expectations)
/// when one or more expectations with a declared call count were not matched
/// exactly that number of times.
#[derive(Debug, Error)]
#[error("unmet expectations found:\n  {}", .unmet.join("\n  "))]
pub struct VerificationError {
    unmet: Vec<String>,
}

impl VerificationError {
    pub(crate) fn new(unmet: Vec<String>) -> Self {
        Self { unmet }
    }

    /// One diagnostic line per unmet expectation, in registration order.
    pub fn unmet(&self) -> &[String] {
        &self.unmet
    }
}
