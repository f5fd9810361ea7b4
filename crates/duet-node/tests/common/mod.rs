//! Shared fixtures for node integration tests.

#![allow(dead_code)]

use duet_node::{DuetService, NodeCapabilities, NodeConfig};
use duet_peer::LoopbackNetwork;
use duet_session::{Session, SessionType, SettingsOverride};
use duet_types::UserIdentity;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

/// Node configuration with timings suited to in-process tests.
pub fn fast_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.peer.signaling_timeout_ms = 1_000;
    config.peer.connect_timeout_ms = 300;
    config.peer.send_timeout_ms = 300;
    config.peer.quality_sample_interval_ms = 20;
    config.peer.poor_quality_grace_ms = 0;
    config.peer.reconnect_initial_delay_ms = 5;
    config.peer.reconnect_max_delay_ms = 20;
    config.peer.reconnect_max_attempts = 3;
    config
}

pub fn service_with(config: NodeConfig) -> (DuetService, Arc<LoopbackNetwork>) {
    let network = LoopbackNetwork::new();
    let service = DuetService::new(config, NodeCapabilities::loopback(&network)).unwrap();
    (service, network)
}

pub fn service() -> (DuetService, Arc<LoopbackNetwork>) {
    service_with(fast_config())
}

pub fn user(id: &str) -> UserIdentity {
    let mut name = id.to_string();
    name[..1].make_ascii_uppercase();
    UserIdentity::new(id, name)
}

/// Opens a public session owned by `owner` and joins `others`.
pub async fn open_session(service: &DuetService, owner: &str, others: &[&str]) -> Session {
    let overrides = SettingsOverride {
        is_public: Some(true),
        ..Default::default()
    };
    let session = service
        .open_session(&user(owner), "Pairing", SessionType::GroupProject, &overrides)
        .unwrap();
    for id in others {
        service.join_session(&session.id, &user(id), None).await.unwrap();
    }
    session
}

/// Polls `condition` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("timed out")
}
