#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
//! Integration tests for the connection manager: request/ack correlation,
//! failure surfaces, reconnection with backoff, and shutdown.

mod common;

use common::{
    next_event, seeded_store, test_config, wait_for_event, AckScript, MockConnector, MockServer,
    TEST_ROOM_ID,
};
use std::time::Duration;

use encore_client::{CreateRoomParams, EncoreClient, EncoreError, EncoreEvent};

#[tokio::test]
async fn rejected_request_surfaces_reason_and_leaves_state_untouched() {
    let server = MockServer::new();
    server.script_err("joinRoom", "wrong password");
    let (client, mut events) = EncoreClient::start(
        MockConnector::new(&server),
        seeded_store("Alice"),
        test_config(),
    )
    .unwrap();
    wait_for_event(&mut events, |e| {
        matches!(e, EncoreEvent::SessionResolved { .. })
    })
    .await;

    let err = client.join_room(TEST_ROOM_ID, None).await.unwrap_err();
    match err {
        EncoreError::Rejected { reason } => assert_eq!(reason, "wrong password"),
        other => panic!("expected Rejected, got {other:?}"),
    }
    // A failed request leaves prior state untouched.
    assert!(client.snapshot().is_none());

    client.shutdown().await;
}

#[tokio::test]
async fn unacknowledged_request_times_out() {
    let server = MockServer::new();
    server.script("joinRoom", AckScript::Ignore);
    let (client, mut events) = EncoreClient::start(
        MockConnector::new(&server),
        seeded_store("Alice"),
        test_config(),
    )
    .unwrap();
    wait_for_event(&mut events, |e| {
        matches!(e, EncoreEvent::SessionResolved { .. })
    })
    .await;

    let err = client.join_room(TEST_ROOM_ID, None).await.unwrap_err();
    assert!(matches!(err, EncoreError::Timeout));

    client.shutdown().await;
}

#[tokio::test]
async fn validation_errors_never_reach_the_wire() {
    let server = MockServer::new();
    let (client, mut events) = EncoreClient::start(
        MockConnector::new(&server),
        seeded_store("Alice"),
        test_config(),
    )
    .unwrap();
    wait_for_event(&mut events, |e| {
        matches!(e, EncoreEvent::SessionResolved { .. })
    })
    .await;

    // Empty room name.
    let err = client
        .create_room(CreateRoomParams::new("   "))
        .await
        .unwrap_err();
    assert!(matches!(err, EncoreError::Invalid(_)));

    // No playlist loaded.
    let err = client
        .create_room(CreateRoomParams::new("friday"))
        .await
        .unwrap_err();
    assert!(matches!(err, EncoreError::Invalid(_)));

    // Empty chat message, and not in a room anyway.
    let err = client.send_message("  ").await.unwrap_err();
    assert!(matches!(err, EncoreError::Invalid(_)));
    let err = client.send_message("hello").await.unwrap_err();
    assert!(matches!(err, EncoreError::NotInRoom));

    assert!(server.sent_of_type("createRoom").is_empty());
    assert!(server.sent_of_type("sendMessage").is_empty());

    client.shutdown().await;
}

#[tokio::test]
async fn failed_connects_back_off_then_succeed() {
    let server = MockServer::new();
    server.fail_next_connects(2);
    let (client, mut events) = EncoreClient::start(
        MockConnector::new(&server),
        seeded_store("Alice"),
        test_config(),
    )
    .unwrap();

    let first = next_event(&mut events).await;
    assert!(matches!(first, EncoreEvent::Reconnecting { attempt: 1 }));
    let second = next_event(&mut events).await;
    assert!(matches!(second, EncoreEvent::Reconnecting { attempt: 2 }));
    assert!(matches!(next_event(&mut events).await, EncoreEvent::Connected));
    wait_for_event(&mut events, |e| {
        matches!(e, EncoreEvent::SessionResolved { .. })
    })
    .await;

    assert_eq!(server.connect_count(), 1);
    assert!(client.is_connected());

    client.shutdown().await;
}

#[tokio::test]
async fn transport_error_triggers_reconnect() {
    let server = MockServer::new();
    let (client, mut events) = EncoreClient::start(
        MockConnector::new(&server),
        seeded_store("Alice"),
        test_config(),
    )
    .unwrap();
    wait_for_event(&mut events, |e| {
        matches!(e, EncoreEvent::SessionResolved { .. })
    })
    .await;

    server.break_connection("wire cut");

    wait_for_event(&mut events, |e| {
        matches!(e, EncoreEvent::Reconnecting { attempt: 1 })
    })
    .await;
    wait_for_event(&mut events, |e| matches!(e, EncoreEvent::Connected)).await;
    wait_for_event(&mut events, |e| {
        matches!(e, EncoreEvent::SessionResolved { .. })
    })
    .await;
    assert_eq!(server.connect_count(), 2);

    client.shutdown().await;
}

#[tokio::test]
async fn retries_exhausted_goes_down_for_good() {
    let server = MockServer::new();
    let config = test_config().with_max_reconnect_attempts(Some(2));
    let (client, mut events) =
        EncoreClient::start(MockConnector::new(&server), seeded_store("Alice"), config).unwrap();
    wait_for_event(&mut events, |e| {
        matches!(e, EncoreEvent::SessionResolved { .. })
    })
    .await;

    // Every future dial fails; two attempts are allowed.
    server.fail_next_connects(u32::MAX);
    server.drop_connection();

    wait_for_event(&mut events, |e| {
        matches!(e, EncoreEvent::Reconnecting { attempt: 1 })
    })
    .await;
    wait_for_event(&mut events, |e| {
        matches!(e, EncoreEvent::Reconnecting { attempt: 2 })
    })
    .await;
    let down = wait_for_event(&mut events, |e| {
        matches!(e, EncoreEvent::Disconnected { .. })
    })
    .await;
    let EncoreEvent::Disconnected { reason } = down else {
        unreachable!()
    };
    assert!(reason.is_some());
    assert!(!client.is_connected());

    client.shutdown().await;
}

#[tokio::test]
async fn malformed_server_frames_are_skipped() {
    let server = MockServer::new();
    let (client, mut events) = EncoreClient::start(
        MockConnector::new(&server),
        seeded_store("Alice"),
        test_config(),
    )
    .unwrap();
    wait_for_event(&mut events, |e| {
        matches!(e, EncoreEvent::SessionResolved { .. })
    })
    .await;

    server.push_raw("not json at all");
    server.push_raw(r#"{"type":"noSuchPush","data":{}}"#);

    // The connection survives garbage; a valid request still round-trips.
    let snapshot = client.join_room(TEST_ROOM_ID, None).await.unwrap();
    assert_eq!(snapshot.room.id, TEST_ROOM_ID);

    client.shutdown().await;
}

#[tokio::test]
async fn shutdown_delivers_disconnected_and_fails_later_requests() {
    let server = MockServer::new();
    let (client, mut events) = EncoreClient::start(
        MockConnector::new(&server),
        seeded_store("Alice"),
        test_config(),
    )
    .unwrap();
    wait_for_event(&mut events, |e| {
        matches!(e, EncoreEvent::SessionResolved { .. })
    })
    .await;

    client.shutdown().await;

    let down = wait_for_event(&mut events, |e| {
        matches!(e, EncoreEvent::Disconnected { .. })
    })
    .await;
    let EncoreEvent::Disconnected { reason } = down else {
        unreachable!()
    };
    assert_eq!(reason.as_deref(), Some("client shut down"));

    let err = client.join_room(TEST_ROOM_ID, None).await.unwrap_err();
    assert!(matches!(err, EncoreError::NotConnected));

    // Double shutdown must not panic.
    client.shutdown().await;
}

#[tokio::test]
async fn pong_pushes_resync_the_clock() {
    let server = MockServer::new();
    let config = test_config().with_ping_interval(Duration::from_millis(50));
    let (client, mut events) =
        EncoreClient::start(MockConnector::new(&server), seeded_store("Alice"), config).unwrap();
    wait_for_event(&mut events, |e| {
        matches!(e, EncoreEvent::SessionResolved { .. })
    })
    .await;

    // Wait for at least one ping round-trip.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(!server.sent_of_type("ping").is_empty());

    // The clock tracks the mock server timeline.
    let remaining = client.remaining_ms(common::TEST_SERVER_NOW + 5_000);
    assert!((3_000..=5_000).contains(&remaining));

    client.shutdown().await;
}
