use std::time::Duration;

use libp2p::{
    gossipsub, identify,
    identity::Keypair,
    mdns,
    request_response::{self, ProtocolSupport},
    swarm::NetworkBehaviour,
    PeerId,
};

use super::protocol::{SessionRequest, SessionResponse, SESSION_PROTOCOL};

pub type BehaviourError = Box<dyn std::error::Error + Send + Sync>;

/// Network behaviour of a stage participant
///
/// This behaviour combines:
/// - mDNS: local discovery of other participants
/// - Gossipsub: presence announcements on the `-stat` / `-hand` channel topics
/// - Request-Response: stage invitations and session teardown
/// - Identify: agent version exchange
#[derive(NetworkBehaviour)]
pub struct StageBehaviour {
    pub mdns: mdns::tokio::Behaviour,
    pub gossipsub: gossipsub::Behaviour,
    pub session: request_response::json::Behaviour<SessionRequest, SessionResponse>,
    pub identify: identify::Behaviour,
}

impl StageBehaviour {
    /// # Arguments
    ///
    /// * `key` - The local keypair, also used to sign gossip messages
    /// * `agent` - Agent version, e.g. "lscritique/0.1.0/<persona>"
    /// * `heartbeat` - Gossipsub heartbeat, kept below the announce interval
    pub fn new(key: &Keypair, agent: &str, heartbeat: Duration) -> Result<Self, BehaviourError> {
        let local_peer_id = PeerId::from(key.public());

        let mdns = mdns::tokio::Behaviour::new(mdns::Config::default(), local_peer_id)?;

        let gossipsub_config = gossipsub::ConfigBuilder::default()
            .heartbeat_interval(heartbeat)
            .validation_mode(gossipsub::ValidationMode::Strict)
            .build()?;
        let gossipsub = gossipsub::Behaviour::new(
            gossipsub::MessageAuthenticity::Signed(key.clone()),
            gossipsub_config,
        )?;

        let session = request_response::json::Behaviour::new(
            [(SESSION_PROTOCOL, ProtocolSupport::Full)],
            request_response::Config::default().with_request_timeout(Duration::from_secs(30)),
        );

        let identify = identify::Behaviour::new(
            identify::Config::new("/lscritique/id/1.0.0".to_string(), key.public())
                .with_agent_version(agent.to_string()),
        );

        Ok(Self {
            mdns,
            gossipsub,
            session,
            identify,
        })
    }
}
