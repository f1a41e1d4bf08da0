//! End-to-end client tests against a loopback TCP server (TLS disabled).

use std::time::{Duration, Instant};

use ldt_client::prelude::*;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

async fn server() -> (TcpListener, Endpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, Endpoint::new("127.0.0.1", port).unwrap())
}

/// Endpoint nothing listens on.
async fn refused() -> Endpoint {
    let (listener, endpoint) = server().await;
    drop(listener);
    endpoint
}

fn client(cooldown: Duration) -> LdtClient {
    LdtClient::builder()
        .tls(TlsMode::Disabled)
        .cooldown(cooldown)
        .connect_timeout(Duration::from_secs(2))
        .spawn()
        .unwrap()
}

async fn next(events: &mut UnboundedReceiver<ClientEvent>) -> ClientEvent {
    timeout(WAIT, events.recv())
        .await
        .expect("event within timeout")
        .expect("event channel open")
}

async fn accept(listener: &TcpListener) -> TcpStream {
    let (stream, _) = timeout(WAIT, listener.accept()).await.unwrap().unwrap();
    stream
}

#[tokio::test]
async fn test_receive_send_and_clean_close() {
    let (listener, endpoint) = server().await;
    let client = client(Duration::from_secs(10));
    let mut events = client.events().await.unwrap();

    client.start(endpoint.clone()).await.unwrap();
    let mut peer = accept(&listener).await;
    assert!(matches!(next(&mut events).await, ClientEvent::Connected { .. }));
    assert!(client.is_connected().await);

    // One frame split across writes, then two in one write.
    peer.write_all(b"200 / o").await.unwrap();
    peer.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    peer.write_all(b"k\r\n100 / 52.1 / 13.4\r\n101 / x\r\n")
        .await
        .unwrap();

    let mut seen = Vec::new();
    while seen.len() < 3 {
        match next(&mut events).await {
            ClientEvent::Message { message, .. } => {
                seen.push((message.status_or_route(), message.body().to_owned()))
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }
    assert_eq!(
        seen,
        vec![
            (200, "ok".to_owned()),
            (100, "52.1 / 13.4".to_owned()),
            (101, "x".to_owned()),
        ]
    );

    client.send_request("location", "52.1 / 13.4").await.unwrap();
    client.send("7 / raw").await.unwrap();
    let mut lines = BufReader::new(&mut peer).lines();
    assert_eq!(
        timeout(WAIT, lines.next_line()).await.unwrap().unwrap(),
        Some("location / 52.1 / 13.4".to_owned())
    );
    assert_eq!(
        timeout(WAIT, lines.next_line()).await.unwrap().unwrap(),
        Some("7 / raw".to_owned())
    );

    drop(lines);
    drop(peer);
    assert!(matches!(
        next(&mut events).await,
        ClientEvent::Disconnected { error: None, .. }
    ));

    // A clean close is terminal until the next explicit start.
    let status = client.status().await.unwrap();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert!(status.can_retry);
    assert_eq!(status.endpoint, Some(endpoint));
}

#[tokio::test]
async fn test_malformed_frames_do_not_disconnect() {
    let (listener, endpoint) = server().await;
    let client = client(Duration::from_secs(10));
    let mut events = client.events().await.unwrap();

    client.start(endpoint).await.unwrap();
    let mut peer = accept(&listener).await;
    next(&mut events).await;

    peer.write_all(b"abc / nope\r\n0 / zero\r\n204 / fine\r\n")
        .await
        .unwrap();
    match next(&mut events).await {
        ClientEvent::Message { message, .. } => {
            assert_eq!(message.status_or_route(), 204);
            assert_eq!(message.body(), "fine");
        }
        other => panic!("unexpected event: {other:?}"),
    }
    assert!(client.is_connected().await);
}

#[tokio::test]
async fn test_error_close_retries_after_cooldown() {
    let cooldown = Duration::from_millis(300);
    let client = client(cooldown);
    let mut events = client.events().await.unwrap();
    let endpoint = refused().await;

    let started = Instant::now();
    client.start(endpoint.clone()).await.unwrap();
    assert!(matches!(
        next(&mut events).await,
        ClientEvent::Disconnected { error: Some(_), .. }
    ));
    assert!(!client.status().await.unwrap().can_retry);

    // Manual start inside the window does nothing.
    client.start(endpoint).await.unwrap();

    assert!(matches!(
        next(&mut events).await,
        ClientEvent::Disconnected { error: Some(_), .. }
    ));
    assert!(started.elapsed() >= cooldown);
    assert_eq!(client.status().await.unwrap().attempt, AttemptId::new(2));
}

#[tokio::test]
async fn test_reset_retry_skips_cooldown() {
    let client = client(Duration::from_secs(60));
    let mut events = client.events().await.unwrap();

    client.start(refused().await).await.unwrap();
    next(&mut events).await;

    client.reset_retry().await.unwrap();
    assert!(matches!(
        next(&mut events).await,
        ClientEvent::Disconnected { error: Some(_), .. }
    ));
    assert_eq!(client.status().await.unwrap().attempt, AttemptId::new(2));
}

#[tokio::test]
async fn test_stop_suppresses_disconnected() {
    let (listener, endpoint) = server().await;
    let client = client(Duration::from_secs(10));
    let mut events = client.events().await.unwrap();

    client.start(endpoint).await.unwrap();
    let _peer = accept(&listener).await;
    next(&mut events).await;

    client.stop().await.unwrap();
    assert_eq!(
        client.state().await.unwrap(),
        ConnectionState::Disconnected
    );
    let quiet = timeout(Duration::from_millis(200), events.recv()).await;
    assert!(quiet.is_err(), "no event expected after stop: {quiet:?}");

    assert!(matches!(
        client.send("1 / x").await,
        Err(ClientError::Supervisor(SupervisorError::NotConnected))
    ));
}

#[tokio::test]
async fn test_reconnect_after_stop() {
    let (listener, endpoint) = server().await;
    let client = client(Duration::from_secs(10));
    let mut events = client.events().await.unwrap();

    client.start(endpoint.clone()).await.unwrap();
    let _first = accept(&listener).await;
    next(&mut events).await;
    client.stop().await.unwrap();

    client.start(endpoint).await.unwrap();
    let _second = accept(&listener).await;
    assert!(matches!(next(&mut events).await, ClientEvent::Connected { .. }));
    assert_eq!(client.status().await.unwrap().attempt, AttemptId::new(2));
}
