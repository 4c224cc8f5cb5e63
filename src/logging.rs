use std::fmt;

use log::Level;

/// The logging seam of a [`MockServer`](crate::MockServer).
///
/// By default everything the server reports (unmatched requests, verbose
/// request traces, body read failures) is forwarded to the [`log`] facade.
/// Inject your own implementation with
/// [`MockServer::with_logger`](crate::MockServer::with_logger) to capture the
/// output in a test, e.g. into a shared buffer.
pub trait Logger: Send + Sync {
    fn log(&self, level: Level, message: fmt::Arguments<'_>);
}

/// Forwards to the `log` facade, which is where records end up unless a
/// custom [`Logger`] is installed.
pub(crate) struct FacadeLogger;

impl Logger for FacadeLogger {
    fn log(&self, level: Level, message: fmt::Arguments<'_>) {
        log::log!(level, "{message}");
    }
}
