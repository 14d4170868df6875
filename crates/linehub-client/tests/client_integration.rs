//! Integration tests for the client over loopback TCP.
//!
//! The "hub" in these tests is a raw `TcpListener` speaking the CRLF wire
//! format directly, so only the client side of the protocol is under test.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;

use linehub_client::{Client, ClientConfig, ClientEvent, ClientState};

/// Generous guard so a regression hangs the test, not the suite.
const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// A config tuned for loopback: fast attempts, fast retries.
fn local_config() -> ClientConfig {
    ClientConfig {
        connect_timeout: Duration::from_secs(1),
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(100),
        max_attempts: Some(3),
        ..Default::default()
    }
}

async fn next_event(rx: &mut mpsc::Receiver<ClientEvent>) -> ClientEvent {
    timeout(TEST_TIMEOUT, rx.recv())
        .await
        .expect("timed out waiting for client event")
        .expect("client event channel closed unexpectedly")
}

/// Binds a listener, points a client at it, and completes the accept.
async fn connected_pair() -> (Client, mpsc::Receiver<ClientEvent>, TcpStream) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (client, mut events) = Client::new(local_config());
    client.connect(addr);

    let (server_side, _) = timeout(TEST_TIMEOUT, listener.accept())
        .await
        .expect("timed out waiting for accept")
        .unwrap();
    match next_event(&mut events).await {
        ClientEvent::Connected { .. } => {}
        other => panic!("expected Connected, got {other:?}"),
    }
    (client, events, server_side)
}

/// Returns an address that refuses connections: bind, read the port, drop.
async fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

#[tokio::test]
async fn client_connects_and_receives_frames() {
    let (client, mut events, mut server) = connected_pair().await;
    assert!(client.is_connected());

    server.write_all(b"welcome\r\n").await.unwrap();

    match next_event(&mut events).await {
        ClientEvent::Received { .. } => {}
        other => panic!("expected Received, got {other:?}"),
    }
    assert_eq!(client.pop_received().as_deref(), Some("welcome"));
    assert_eq!(client.pop_received(), None);

    client.close().await;
}

#[tokio::test]
async fn client_sends_go_out_in_order() {
    let (client, _events, server) = connected_pair().await;

    for i in 0..10 {
        client.send(format!("line-{i}"));
    }

    let mut lines = BufReader::new(server).lines();
    for i in 0..10 {
        let line = timeout(TEST_TIMEOUT, lines.next_line())
            .await
            .expect("timed out reading line")
            .unwrap()
            .expect("stream ended early");
        assert_eq!(line, format!("line-{i}"));
    }

    client.close().await;
}

#[tokio::test]
async fn exhausted_attempt_budget_reports_terminal_failure() {
    let addr = dead_addr().await;
    let (client, mut events) = Client::new(local_config());
    client.connect(addr);

    match next_event(&mut events).await {
        ClientEvent::ConnectFailed { attempts } => assert_eq!(attempts, 3),
        other => panic!("expected ConnectFailed, got {other:?}"),
    }
    assert_eq!(client.state(), ClientState::Idle);
}

#[tokio::test]
async fn no_connected_event_fires_after_close() {
    let addr = dead_addr().await;
    let (client, mut events) = Client::new(ClientConfig {
        initial_backoff: Duration::from_millis(20),
        max_backoff: Duration::from_millis(20),
        max_attempts: None,
        ..local_config()
    });
    client.connect(addr);

    // Let at least one attempt fail, then cancel the connector.
    tokio::time::sleep(Duration::from_millis(50)).await;
    client.close().await;

    // Reviving the address afterwards must not produce a connection: the
    // connector was told to stand down.
    let listener = TcpListener::bind(addr).await.unwrap();
    let late_accept = timeout(Duration::from_millis(300), listener.accept()).await;
    assert!(late_accept.is_err(), "a cancelled connector dialed in");

    let late_event = timeout(Duration::from_millis(100), events.recv()).await;
    assert!(
        late_event.is_err(),
        "expected silence after close, got {late_event:?}"
    );
    assert_eq!(client.state(), ClientState::Idle);
}

#[tokio::test]
async fn server_side_close_produces_one_disconnected_event() {
    let (client, mut events, server) = connected_pair().await;

    drop(server);

    match next_event(&mut events).await {
        ClientEvent::Disconnected { .. } => {}
        other => panic!("expected Disconnected, got {other:?}"),
    }
    assert_eq!(client.state(), ClientState::Idle);

    // No second notification for the same connection.
    let extra = timeout(Duration::from_millis(200), events.recv()).await;
    assert!(extra.is_err(), "expected silence, got {extra:?}");
}

#[tokio::test]
async fn close_tears_down_a_live_connection() {
    let (client, mut events, server) = connected_pair().await;

    timeout(TEST_TIMEOUT, client.close())
        .await
        .expect("close() did not return");
    assert_eq!(client.state(), ClientState::Idle);

    match next_event(&mut events).await {
        ClientEvent::Disconnected { .. } => {}
        other => panic!("expected Disconnected, got {other:?}"),
    }

    // The server observes EOF.
    let mut lines = BufReader::new(server).lines();
    let line = timeout(TEST_TIMEOUT, lines.next_line())
        .await
        .expect("timed out waiting for EOF")
        .unwrap();
    assert_eq!(line, None);
}

#[tokio::test]
async fn client_can_reconnect_after_disconnect() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let (client, mut events) = Client::new(local_config());
    client.connect(addr);
    let (first, _) = timeout(TEST_TIMEOUT, listener.accept()).await.unwrap().unwrap();
    match next_event(&mut events).await {
        ClientEvent::Connected { .. } => {}
        other => panic!("expected Connected, got {other:?}"),
    }

    drop(first);
    match next_event(&mut events).await {
        ClientEvent::Disconnected { .. } => {}
        other => panic!("expected Disconnected, got {other:?}"),
    }

    // The client is Idle again; a fresh connect must succeed.
    client.connect(addr);
    let (second, _) = timeout(TEST_TIMEOUT, listener.accept()).await.unwrap().unwrap();
    match next_event(&mut events).await {
        ClientEvent::Connected { .. } => {}
        other => panic!("expected second Connected, got {other:?}"),
    }

    drop(second);
    client.close().await;
}
