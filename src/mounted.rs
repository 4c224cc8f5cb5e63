use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::expectation::Expectation;
use crate::respond::ResponseDefinition;

/// The handle returned by
/// [`MockServer::add_expectation`](crate::MockServer::add_expectation).
///
/// It is a cheap clone of the registered expectation: use it to read the
/// [`invocation_count`](MountedExpectation::invocation_count) from the test,
/// or to remove the expectation again with
/// [`MockServer::remove_expectation`](crate::MockServer::remove_expectation)
/// (removal goes by identity, not by equality of the matcher fields).
#[derive(Clone)]
pub struct MountedExpectation {
    inner: Arc<MountedInner>,
}

struct MountedInner {
    expectation: Expectation,
    /// Successful dispatches so far. Only the dispatcher writes to it, while
    /// holding the registry write lock; the atomic lets tests read it without
    /// touching the lock.
    invocation_count: AtomicU64,
    /// The next response to serve, clamped to the last index once the
    /// sequence is exhausted (repeat-last).
    next_response_index: AtomicUsize,
}

impl MountedExpectation {
    pub(crate) fn new(expectation: Expectation) -> Self {
        Self {
            inner: Arc::new(MountedInner {
                expectation,
                invocation_count: AtomicU64::new(0),
                next_response_index: AtomicUsize::new(0),
            }),
        }
    }

    /// How many requests this expectation has served so far.
    pub fn invocation_count(&self) -> u64 {
        self.inner.invocation_count.load(Ordering::Acquire)
    }

    pub(crate) fn expectation(&self) -> &Expectation {
        &self.inner.expectation
    }

    pub(crate) fn same_registration(&self, other: &MountedExpectation) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Yield the next response of the sequence and advance the cursor, or
    /// `None` when the call cap has been reached - the dispatcher then moves
    /// on to later expectations.
    ///
    /// Callers must hold the registry write lock: the load/store pairs below
    /// rely on it for exclusion.
    pub(crate) fn select_response(&self) -> Option<ResponseDefinition> {
        let count = self.inner.invocation_count.load(Ordering::Acquire);
        if let Some(max_calls) = self.inner.expectation.max_calls {
            if count >= max_calls {
                return None;
            }
        }

        let responses = &self.inner.expectation.responses;
        let index = self.inner.next_response_index.load(Ordering::Acquire);
        // An expectation without responses serves the implicit default:
        // 200, no headers, empty body.
        let response = responses.get(index).cloned().unwrap_or_default();

        self.inner.invocation_count.store(count + 1, Ordering::Release);
        if index + 1 < responses.len() {
            self.inner
                .next_response_index
                .store(index + 1, Ordering::Release);
        }
        Some(response)
    }

    /// A diagnostic line when the declared call count was not met, `None`
    /// when satisfied or when no exact count was declared.
    pub(crate) fn unmet_diagnostic(&self) -> Option<String> {
        let expected = self.inner.expectation.max_calls?;
        let count = self.invocation_count();
        if count == expected {
            return None;
        }
        Some(format!(
            "{} {} (called: {}, expected: {})",
            self.inner.expectation.method,
            self.inner.expectation.path.description(),
            count,
            expected,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Expectation;

    #[test]
    fn responses_are_served_in_order_and_the_last_one_repeats() {
        let mounted = MountedExpectation::new(
            Expectation::new("GET")
                .respond_with_string("one", 200)
                .next_response()
                .respond_with_string("two", 201),
        );

        let bodies: Vec<Vec<u8>> = (0..4)
            .map(|_| mounted.select_response().unwrap().body().to_vec())
            .collect();
        assert_eq!(bodies, [&b"one"[..], b"two", b"two", b"two"]);
        assert_eq!(mounted.invocation_count(), 4);
    }

    #[test]
    fn an_expectation_without_responses_serves_the_implicit_default() {
        let mounted = MountedExpectation::new(Expectation::new("GET"));
        let response = mounted.select_response().unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);
        assert!(response.body().is_empty());
        assert_eq!(mounted.invocation_count(), 1);
    }

    #[test]
    fn the_call_cap_stops_selection_without_counting_further() {
        let mounted = MountedExpectation::new(
            Expectation::new("GET").respond_with_string("ok", 200).exactly(2),
        );
        assert!(mounted.select_response().is_some());
        assert!(mounted.select_response().is_some());
        assert!(mounted.select_response().is_none());
        assert_eq!(mounted.invocation_count(), 2);
    }

    #[test]
    fn unmet_diagnostics_report_actual_and_expected_counts() {
        let mounted = MountedExpectation::new(
            Expectation::new("GET").path("/cap").unwrap().exactly(2),
        );
        mounted.select_response();
        assert_eq!(
            mounted.unmet_diagnostic().unwrap(),
            "GET /cap (called: 1, expected: 2)"
        );

        mounted.select_response();
        assert!(mounted.unmet_diagnostic().is_none());

        let flexible = MountedExpectation::new(Expectation::new("GET"));
        assert!(flexible.unmet_diagnostic().is_none());
    }
}
