//! Connection loss and recovery as seen by the session.

mod common;

use common::{eventually, fast_config, open_session, service, service_with};
use duet_node::{EditorClient, SERVER_PEER_ID};
use duet_peer::ConnectionState;
use duet_realtime::EventKind;
use duet_session::{ConnectionStatus, SessionStatus};
use std::time::Duration;

fn status_of(service: &duet_node::DuetService, session_id: &str, user_id: &str) -> ConnectionStatus {
    service
        .sessions()
        .participant(session_id, user_id)
        .unwrap()
        .connection_status
}

#[tokio::test]
async fn test_lost_connection_keeps_participant() {
    let (service, network) = service();
    let session = open_session(&service, "alice", &["bob"]).await;
    service.sessions().start_session(&session.id, "alice").unwrap();
    let mut alice = EditorClient::connect(&service, &session.id, "alice").await.unwrap();
    let _bob = EditorClient::connect(&service, &session.id, "bob").await.unwrap();

    network.sever(SERVER_PEER_ID, "bob");
    // The relay of this commit fails for bob only.
    alice.insert(0, "x").await.unwrap();
    alice.flush(Duration::from_secs(2)).await.unwrap();
    assert_eq!(alice.content(), "x");

    let lost = eventually(Duration::from_secs(3), || {
        status_of(&service, &session.id, "bob") == ConnectionStatus::Disconnected
    })
    .await;
    assert!(lost, "bob was never marked disconnected");

    // Offline, not gone.
    let participants = service.sessions().participants(&session.id).unwrap();
    assert_eq!(participants.len(), 2);
    assert_eq!(
        service.sessions().get_session(&session.id).unwrap().status,
        SessionStatus::Active
    );
    assert_eq!(status_of(&service, &session.id, "alice"), ConnectionStatus::Connected);

    let server = service.server(&session.id).unwrap();
    assert_eq!(server.connection("bob").unwrap().state, ConnectionState::Failed);

    let lost_events = service
        .events()
        .events_of_kind(&session.id, EventKind::ConnectionLost);
    assert_eq!(lost_events.len(), 1);
    assert_eq!(lost_events[0].user_id.as_deref(), Some("bob"));
}

#[tokio::test]
async fn test_connection_recovers_within_backoff() {
    let mut config = fast_config();
    config.peer.reconnect_initial_delay_ms = 20;
    config.peer.reconnect_max_delay_ms = 50;
    config.peer.reconnect_max_attempts = 10;
    let (service, network) = service_with(config);

    let session = open_session(&service, "alice", &["bob"]).await;
    let mut alice = EditorClient::connect(&service, &session.id, "alice").await.unwrap();
    let mut bob = EditorClient::connect(&service, &session.id, "bob").await.unwrap();

    network.sever(SERVER_PEER_ID, "bob");
    alice.insert(0, "hi").await.unwrap();

    let reconnecting = eventually(Duration::from_secs(2), || {
        status_of(&service, &session.id, "bob") == ConnectionStatus::Reconnecting
    })
    .await;
    assert!(reconnecting);

    network.restore(SERVER_PEER_ID, "bob");
    let restored = eventually(Duration::from_secs(3), || {
        status_of(&service, &session.id, "bob") == ConnectionStatus::Connected
    })
    .await;
    assert!(restored);

    // The commit relayed while severed is recovered from the log. Bob's
    // edit was authored before it, so it lands after the committed text.
    bob.insert(0, "> ").await.unwrap();
    bob.flush(Duration::from_secs(2)).await.unwrap();
    alice.settle(2, Duration::from_secs(2)).await.unwrap();
    assert_eq!(bob.content(), alice.content());
    assert_eq!(alice.content(), "hi> ");

    assert_eq!(
        service
            .events()
            .events_of_kind(&session.id, EventKind::ConnectionRestored)
            .len(),
        1
    );
}

#[tokio::test]
async fn test_slow_participant_does_not_delay_commits() {
    let (service, network) = service();
    let session = open_session(&service, "alice", &["bob"]).await;
    let mut alice = EditorClient::connect(&service, &session.id, "alice").await.unwrap();
    let mut bob = EditorClient::connect(&service, &session.id, "bob").await.unwrap();
    network.set_latency(SERVER_PEER_ID, "bob", Duration::from_millis(100));

    let started = tokio::time::Instant::now();
    for (i, text) in ["a", "b", "c", "d"].into_iter().enumerate() {
        alice.insert(i, text).await.unwrap();
    }
    alice.flush(Duration::from_secs(2)).await.unwrap();
    assert!(
        started.elapsed() < Duration::from_millis(250),
        "alice waited {:?} for her own commits",
        started.elapsed()
    );
    assert_eq!(alice.content(), "abcd");

    // Bob's commits trail behind but arrive in order.
    bob.settle(4, Duration::from_secs(3)).await.unwrap();
    assert_eq!(bob.content(), "abcd");
    assert_eq!(
        service.server(&session.id).unwrap().connection("bob").unwrap().state,
        ConnectionState::Connected
    );
}
