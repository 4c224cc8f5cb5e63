use std::time::{Duration, Instant};

use decoy::{Expectation, MockServer};
use reqwest::Client;

#[tokio::test]
async fn a_delayed_response_arrives_after_the_delay() {
    // Arrange
    let server = MockServer::start().await;
    server
        .add_expectation(
            Expectation::new("GET")
                .path("/slow")
                .unwrap()
                .respond_with_string("eventually", 200)
                .with_response_delay(Duration::from_millis(300)),
        )
        .await;

    // Act
    let started = Instant::now();
    let response = reqwest::get(format!("{}/slow", server.uri())).await.unwrap();

    // Assert
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "eventually");
}

#[tokio::test(flavor = "multi_thread")]
async fn a_delayed_response_does_not_block_unrelated_requests() {
    // Arrange
    let server = MockServer::start().await;
    server
        .add_expectation(
            Expectation::new("GET")
                .path("/slow")
                .unwrap()
                .respond_with_string("slow", 200)
                .with_response_delay(Duration::from_secs(1)),
        )
        .await;
    server
        .add_expectation(
            Expectation::new("GET")
                .path("/fast")
                .unwrap()
                .respond_with_string("fast", 200),
        )
        .await;

    // Act - both requests in flight at the same time
    let slow_uri = format!("{}/slow", server.uri());
    let fast_uri = format!("{}/fast", server.uri());
    let started = Instant::now();
    let fast = tokio::spawn(async move {
        let response = reqwest::get(fast_uri).await.unwrap();
        (response.status(), Instant::now())
    });
    let slow = tokio::spawn(async move {
        let response = reqwest::get(slow_uri).await.unwrap();
        (response.status(), Instant::now())
    });
    let (fast_status, fast_done) = fast.await.unwrap();
    let (slow_status, slow_done) = slow.await.unwrap();

    // Assert - the fast request completes while the slow one still sleeps
    assert_eq!(fast_status, 200);
    assert_eq!(slow_status, 200);
    assert!(fast_done.duration_since(started) < Duration::from_millis(500));
    assert!(slow_done.duration_since(started) >= Duration::from_secs(1));
    // Total wall time is governed by the slow request alone.
    assert!(started.elapsed() < Duration::from_secs(2));
}

#[tokio::test]
async fn requests_time_out_if_the_server_takes_too_long() {
    // Arrange
    let server = MockServer::start().await;
    server
        .add_expectation(
            Expectation::new("GET")
                .path("/slow")
                .unwrap()
                .respond_with_string("too late", 200)
                .with_response_delay(Duration::from_secs(60)),
        )
        .await;

    // Act
    let outcome = Client::builder()
        .timeout(Duration::from_secs(1))
        .build()
        .unwrap()
        .get(format!("{}/slow", server.uri()))
        .send()
        .await;

    // Assert
    assert!(outcome.is_err());
}

#[tokio::test]
async fn timeout_simulation_never_answers_but_still_counts() {
    // Arrange
    let server = MockServer::start().await;
    let mounted = server
        .add_expectation(
            Expectation::new("GET")
                .path("/t")
                .unwrap()
                .simulate_timeout(),
        )
        .await;

    // Act
    let started = Instant::now();
    let outcome = Client::builder()
        .timeout(Duration::from_millis(100))
        .build()
        .unwrap()
        .get(format!("{}/t", server.uri()))
        .send()
        .await;

    // Assert - the client gave up, no response was ever written, and the
    // invocation was counted before the wait began
    let error = outcome.unwrap_err();
    assert!(error.is_timeout());
    assert!(started.elapsed() >= Duration::from_millis(100));
    assert_eq!(mounted.invocation_count(), 1);
}

#[tokio::test]
async fn timeout_simulation_releases_the_connection_once_the_client_hangs_up() {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    // Arrange
    let server = MockServer::start().await;
    let mounted = server
        .add_expectation(
            Expectation::new("GET")
                .path("/t")
                .unwrap()
                .simulate_timeout(),
        )
        .await;

    // Act - speak raw HTTP so we control the socket directly
    let mut stream = tokio::net::TcpStream::connect(*server.address()).await.unwrap();
    stream
        .write_all(b"GET /t HTTP/1.1\r\nhost: 127.0.0.1\r\n\r\n")
        .await
        .unwrap();
    // Wait until the request has been dispatched and is parked server-side.
    let mut polls = 0;
    while mounted.invocation_count() == 0 {
        assert!(polls < 250, "the request was never dispatched");
        polls += 1;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    // The client gives up: half-close the connection.
    stream.shutdown().await.unwrap();

    // Assert - the server notices the disconnect and tears the connection
    // down instead of keeping it parked: our read sees EOF, not a hang.
    let mut buffer = [0u8; 64];
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buffer))
        .await
        .expect("the server kept the connection parked after the client hung up");
    assert_eq!(read.unwrap(), 0, "no response bytes may be written");
}

#[tokio::test(flavor = "multi_thread")]
async fn timeout_simulation_leaves_other_requests_unaffected() {
    // Arrange
    let server = MockServer::start().await;
    server
        .add_expectation(
            Expectation::new("GET")
                .path("/stuck")
                .unwrap()
                .simulate_timeout(),
        )
        .await;
    server
        .add_expectation(
            Expectation::new("GET")
                .path("/alive")
                .unwrap()
                .respond_with_string("alive", 200),
        )
        .await;

    // Act - fire the stuck request, then immediately a healthy one
    let stuck_uri = format!("{}/stuck", server.uri());
    let stuck = tokio::spawn(async move {
        Client::builder()
            .timeout(Duration::from_millis(500))
            .build()
            .unwrap()
            .get(stuck_uri)
            .send()
            .await
    });
    let response = reqwest::get(format!("{}/alive", server.uri())).await.unwrap();

    // Assert
    assert_eq!(response.status(), 200);
    assert!(stuck.await.unwrap().is_err());
}
