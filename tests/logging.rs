use std::fmt;
use std::sync::{Arc, Mutex};

use decoy::{Expectation, Logger, MockServer, ServerConfig};

/// Collects everything the server logs into a shared buffer.
struct BufferLogger(Arc<Mutex<String>>);

impl Logger for BufferLogger {
    fn log(&self, _level: log::Level, message: fmt::Arguments<'_>) {
        let mut buffer = self.0.lock().unwrap();
        buffer.push_str(&message.to_string());
        buffer.push('\n');
    }
}

#[tokio::test]
async fn verbose_and_unmatched_traffic_goes_through_the_injected_logger() {
    // Arrange
    let buffer = Arc::new(Mutex::new(String::new()));
    let config = ServerConfig {
        verbose_logging: true,
        ..ServerConfig::default()
    };
    let server = MockServer::with_config(config).await;
    server.with_logger(BufferLogger(buffer.clone()));
    server
        .add_expectation(
            Expectation::new("GET")
                .path("/exists")
                .unwrap()
                .respond_with_string("ok", 200),
        )
        .await;

    // Act - one matched and one unmatched request
    let response = reqwest::get(format!("{}/exists", server.uri())).await.unwrap();
    assert_eq!(response.text().await.unwrap(), "ok");
    let response = reqwest::get(format!("{}/missing", server.uri())).await.unwrap();
    assert_eq!(response.status(), 418);

    // Assert
    let logs = buffer.lock().unwrap().clone();
    assert!(logs.contains("Incoming request:"), "missing trace in: {logs}");
    assert!(logs.contains("GET http://"), "missing request line in: {logs}");
    assert!(
        logs.contains("Matched expectation, responding with status 200"),
        "missing match trace in: {logs}"
    );
    assert!(logs.contains("Unmatched request:"), "missing unmatched log in: {logs}");
}

#[tokio::test]
async fn unmatched_logging_can_be_disabled() {
    // Arrange
    let buffer = Arc::new(Mutex::new(String::new()));
    let config = ServerConfig {
        log_unmatched: false,
        ..ServerConfig::default()
    };
    let server = MockServer::with_config(config).await;
    server.with_logger(BufferLogger(buffer.clone()));

    // Act
    reqwest::get(format!("{}/missing", server.uri())).await.unwrap();

    // Assert - the request is still recorded, just not logged
    assert!(!buffer.lock().unwrap().contains("Unmatched request:"));
    assert_eq!(server.unmatched_requests().await.len(), 1);
}
