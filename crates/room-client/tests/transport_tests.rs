//! Integration tests for the retrying signaling transport.
//!
//! Runs the transport against the in-memory signaling server and checks the
//! event sequence it emits around connects, failures and closes.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]

use room_client::errors::TransportError;
use room_client::transport::{
    ReconnectPolicy, RetryingTransport, TransportEvent, NORMAL_CLOSE_CODE, NORMAL_CLOSE_REASON,
};
use room_test_utils::{fast_reconnect, MockSignalingServer, WAIT_TIMEOUT};
use serde_json::json;
use signaling_protocol::codec;
use signaling_protocol::message::Message;
use std::time::Duration;
use tokio::sync::mpsc;

const URL: &str = "wss://sfu.test:4443/?roomId=transport&peerId=tester";

async fn next_event(events: &mut mpsc::UnboundedReceiver<TransportEvent>) -> Option<TransportEvent> {
    tokio::time::timeout(WAIT_TIMEOUT, events.recv())
        .await
        .expect("timed out waiting for a transport event")
}

// ============================================================================
// Connection lifecycle
// ============================================================================

#[tokio::test]
async fn test_open_then_messages_in_order() {
    let server = MockSignalingServer::default();
    let (_transport, mut events) =
        RetryingTransport::connect(URL, server.connector(), fast_reconnect());

    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Open));

    server.send_raw("first");
    server.send_raw("second");

    assert_eq!(
        next_event(&mut events).await,
        Some(TransportEvent::Message("first".to_string()))
    );
    assert_eq!(
        next_event(&mut events).await,
        Some(TransportEvent::Message("second".to_string()))
    );
}

#[tokio::test]
async fn test_send_reaches_server() {
    let server = MockSignalingServer::default();
    let (transport, mut events) =
        RetryingTransport::connect(URL, server.connector(), fast_reconnect());
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Open));

    let frame = codec::encode(&Message::request(7, "ping", json!({ "n": 1 }))).unwrap();
    let first = transport.send(frame.clone()).unwrap();
    let second = transport.send(frame).unwrap();
    assert!(second > first, "tickets are increasing");

    let request = server.wait_for_request("ping").await;
    assert_eq!(request.id, 7);
    assert_eq!(request.data, json!({ "n": 1 }));
}

#[tokio::test]
async fn test_failed_before_first_connect() {
    let server = MockSignalingServer::builder().fail_connects(1).build();
    let (_transport, mut events) =
        RetryingTransport::connect(URL, server.connector(), fast_reconnect());

    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Failed));
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Open));
    assert_eq!(server.connection_count(), 2);
}

#[tokio::test]
async fn test_disconnected_after_connect_then_reopens() {
    let server = MockSignalingServer::default();
    let (_transport, mut events) =
        RetryingTransport::connect(URL, server.connector(), fast_reconnect());
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Open));

    server.drop_connection();

    assert_eq!(
        next_event(&mut events).await,
        Some(TransportEvent::Disconnected)
    );
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Open));
    assert_eq!(server.connection_count(), 2);
}

#[tokio::test]
async fn test_failure_after_connect_is_disconnected_even_if_reconnect_fails() {
    let server = MockSignalingServer::default();
    let (_transport, mut events) =
        RetryingTransport::connect(URL, server.connector(), fast_reconnect());
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Open));

    server.fail_next_connects(1);
    server.drop_connection();

    assert_eq!(
        next_event(&mut events).await,
        Some(TransportEvent::Disconnected)
    );
    assert_eq!(
        next_event(&mut events).await,
        Some(TransportEvent::Disconnected)
    );
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Open));
}

#[tokio::test(start_paused = true)]
async fn test_send_refused_between_sockets() {
    let server = MockSignalingServer::builder().fail_connects(1).build();
    let policy = ReconnectPolicy {
        max_retries: 5,
        factor: 2,
        min_timeout: Duration::from_secs(1),
        max_timeout: Duration::from_secs(1),
    };
    let (transport, mut events) = RetryingTransport::connect(URL, server.connector(), policy);

    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Failed));
    assert!(!transport.is_connected());
    assert_eq!(
        transport.send("early".to_string()),
        Err(TransportError::NotConnected)
    );

    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Open));
    assert!(transport.is_connected());

    server.drop_connection();
    assert_eq!(
        next_event(&mut events).await,
        Some(TransportEvent::Disconnected)
    );
    assert_eq!(
        transport.send("late".to_string()),
        Err(TransportError::NotConnected)
    );

    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Open));
    let frame = codec::encode(&Message::request(3, "ping", json!({}))).unwrap();
    transport.send(frame).unwrap();
    assert_eq!(server.wait_for_request("ping").await.id, 3);
    assert_eq!(server.requests().len(), 1);
}

// ============================================================================
// Terminal close
// ============================================================================

#[tokio::test]
async fn test_server_close_emits_closed_once() {
    let server = MockSignalingServer::default();
    let (transport, mut events) =
        RetryingTransport::connect(URL, server.connector(), fast_reconnect());
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Open));

    server.close_connection();

    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Closed));
    assert_eq!(next_event(&mut events).await, None);
    assert!(transport.is_closed());
    assert_eq!(server.connection_count(), 1, "no reconnect after a clean close");
}

#[tokio::test]
async fn test_retries_exhausted_emits_closed() {
    let server = MockSignalingServer::builder().fail_connects(100).build();
    let (transport, mut events) =
        RetryingTransport::connect(URL, server.connector(), fast_reconnect());

    let mut seen = Vec::new();
    while let Some(event) = next_event(&mut events).await {
        seen.push(event);
    }

    assert_eq!(
        seen,
        vec![
            TransportEvent::Failed,
            TransportEvent::Failed,
            TransportEvent::Failed,
            TransportEvent::Closed,
        ]
    );
    // Initial attempt plus three retries.
    assert_eq!(server.connection_count(), 4);
    assert!(transport.is_closed());
    assert_eq!(transport.send("late".to_string()), Err(TransportError::Closed));
}

#[tokio::test]
async fn test_explicit_close_emits_nothing_further() {
    let server = MockSignalingServer::default();
    let (transport, mut events) =
        RetryingTransport::connect(URL, server.connector(), fast_reconnect());
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Open));

    transport.close().await;
    transport.close().await;

    assert_eq!(next_event(&mut events).await, None);
    assert!(transport.is_closed());
    assert_eq!(transport.send("late".to_string()), Err(TransportError::Closed));

    let deadline = tokio::time::Instant::now() + WAIT_TIMEOUT;
    while server.client_closes().is_empty() {
        assert!(tokio::time::Instant::now() < deadline, "close frame never arrived");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(
        server.client_closes(),
        vec![(NORMAL_CLOSE_CODE, NORMAL_CLOSE_REASON.to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_close_cancels_pending_reconnect() {
    let server = MockSignalingServer::builder().fail_connects(1).build();
    let policy = ReconnectPolicy {
        max_retries: 5,
        factor: 2,
        min_timeout: Duration::from_secs(60),
        max_timeout: Duration::from_secs(60),
    };
    let (transport, mut events) = RetryingTransport::connect(URL, server.connector(), policy);
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Failed));

    transport.close().await;

    assert_eq!(next_event(&mut events).await, None);
    tokio::time::advance(Duration::from_secs(120)).await;
    assert_eq!(server.connection_count(), 1);
}

// ============================================================================
// Backoff timing
// ============================================================================

#[tokio::test(start_paused = true)]
async fn test_backoff_delays_grow_by_factor() {
    let server = MockSignalingServer::builder().fail_connects(3).build();
    let policy = ReconnectPolicy {
        max_retries: 10,
        factor: 2,
        min_timeout: Duration::from_secs(1),
        max_timeout: Duration::from_secs(8),
    };
    let started = tokio::time::Instant::now();
    let (_transport, mut events) = RetryingTransport::connect(URL, server.connector(), policy);

    for _ in 0..3 {
        assert_eq!(next_event(&mut events).await, Some(TransportEvent::Failed));
    }
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Open));

    // 1 s + 2 s + 4 s of backoff before the fourth attempt.
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_secs(7), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(8), "elapsed {elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn test_backoff_resets_after_successful_connect() {
    let server = MockSignalingServer::builder().fail_connects(2).build();
    let policy = ReconnectPolicy {
        max_retries: 10,
        factor: 2,
        min_timeout: Duration::from_secs(1),
        max_timeout: Duration::from_secs(8),
    };
    let (_transport, mut events) = RetryingTransport::connect(URL, server.connector(), policy);
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Failed));
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Failed));
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Open));

    let dropped_at = tokio::time::Instant::now();
    server.drop_connection();
    assert_eq!(
        next_event(&mut events).await,
        Some(TransportEvent::Disconnected)
    );
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Open));

    let elapsed = dropped_at.elapsed();
    assert!(elapsed >= Duration::from_secs(1), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "elapsed {elapsed:?}");
}
