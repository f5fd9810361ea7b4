//! In-process collaboration run over the loopback peer adapter.
//!
//! Several editors join one session, make random concurrent edits through
//! the server peer and wait until every replica has caught up. The report
//! says whether all replicas converged on the authoritative document.

use duet_peer::LoopbackNetwork;
use duet_session::{SessionType, SettingsOverride};
use duet_types::UserIdentity;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use std::time::Duration;
use tracing::info;

use crate::client::EditorClient;
use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::service::{DuetService, NodeCapabilities};

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz ";

/// Parameters of a simulation run.
#[derive(Debug, Clone)]
pub struct SimulationConfig {
    pub participants: usize,
    pub edits_per_participant: usize,
    pub seed: u64,
    /// Bound on waiting for replicas to converge.
    pub settle_timeout: Duration,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            participants: 3,
            edits_per_participant: 20,
            seed: 7,
            settle_timeout: Duration::from_secs(10),
        }
    }
}

/// Outcome of a simulation run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SimulationReport {
    pub session_id: String,
    pub participants: usize,
    pub document: String,
    pub version: u64,
    pub converged: bool,
    pub event_count: usize,
}

/// Runs the simulation on a fresh service.
pub async fn run_simulation(config: &NodeConfig, sim: &SimulationConfig) -> Result<SimulationReport, NodeError> {
    let network = LoopbackNetwork::new();
    let service = DuetService::new(config.clone(), NodeCapabilities::loopback(&network))?;

    let owner = UserIdentity::new("user-0", "User 0");
    let overrides = SettingsOverride {
        is_public: Some(true),
        ..Default::default()
    };
    let session = service.open_session(&owner, "Simulation", SessionType::StudyGroup, &overrides)?;
    let count = sim.participants.clamp(1, session.max_participants());

    for i in 1..count {
        let user = UserIdentity::new(format!("user-{i}"), format!("User {i}"));
        service.join_session(&session.id, &user, None).await?;
    }
    service.sessions().start_session(&session.id, &owner.id)?;

    let mut clients = Vec::with_capacity(count);
    for i in 0..count {
        clients.push(EditorClient::connect(&service, &session.id, &format!("user-{i}")).await?);
    }

    let mut handles = Vec::with_capacity(count);
    for (i, client) in clients.into_iter().enumerate() {
        let edits = sim.edits_per_participant;
        let seed = sim.seed.wrapping_add(i as u64);
        let timeout = sim.settle_timeout;
        handles.push(tokio::spawn(random_edits(client, edits, seed, timeout)));
    }

    let mut clients = Vec::with_capacity(count);
    for handle in handles {
        let client = handle.await.map_err(|e| NodeError::Task(e.to_string()))??;
        clients.push(client);
    }

    let authority = service.sessions().document_snapshot(&session.id)?;
    for client in &mut clients {
        client.settle(authority.version, sim.settle_timeout).await?;
    }
    let converged = clients.iter().all(|c| c.content() == authority.content);

    for client in clients {
        client.close();
    }
    let event_count = service.events().events(&session.id).len();
    service.shutdown();

    info!(
        session_id = %session.id,
        participants = count,
        version = authority.version,
        converged,
        "Simulation finished"
    );
    Ok(SimulationReport {
        session_id: session.id,
        participants: count,
        document: authority.content,
        version: authority.version,
        converged,
        event_count,
    })
}

async fn random_edits(
    mut client: EditorClient,
    edits: usize,
    seed: u64,
    timeout: Duration,
) -> Result<EditorClient, NodeError> {
    let mut rng = StdRng::seed_from_u64(seed);
    for _ in 0..edits {
        client.pump().await?;
        let len = client.content().chars().count();
        if len > 0 && rng.gen_bool(0.3) {
            let position = rng.gen_range(0..len);
            let length = rng.gen_range(1..=(len - position).min(3));
            client.delete(position, length).await?;
        } else {
            let position = rng.gen_range(0..=len);
            let text: String = (0..rng.gen_range(1..=3))
                .map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char)
                .collect();
            client.insert(position, &text).await?;
        }
        tokio::time::sleep(Duration::from_millis(rng.gen_range(0..3))).await;
    }
    client.flush(timeout).await?;
    Ok(client)
}
