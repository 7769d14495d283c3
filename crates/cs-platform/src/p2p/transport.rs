use std::sync::Mutex;
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use libp2p::{identity, noise, tcp, yamux, Multiaddr, PeerId, SwarmBuilder};
use log::info;
use tokio::sync::mpsc;

use cs_core::ids::{InvitationId, PeerRef};
use cs_core::ports::{DiscoveryPort, SessionPort, TransportEvent, TransportEventsPort};
use cs_core::presence::{ChannelKind, DiscoveryInfo, DEFAULT_SERVICE_BASE};
use cs_core::NetworkSettings;

use super::behaviour::StageBehaviour;
use super::swarm::{NetworkCommand, NetworkManager};

const COMMAND_BUFFER: usize = 64;
const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone)]
pub struct TransportSettings {
    /// Channel topics are `<service_base>-stat` and `<service_base>-hand`.
    pub service_base: String,
    pub network: NetworkSettings,
    /// Identify agent version.
    pub agent: String,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            service_base: DEFAULT_SERVICE_BASE.to_string(),
            network: NetworkSettings::default(),
            agent: format!("lscritique/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// libp2p transport of one stage participant
///
/// 所有端口调用只把命令放入队列;执行中的失败以 `TransportEvent::Fault` 上报。
/// 每次启动使用新的临时身份。
pub struct Libp2pStageTransport {
    local_peer: PeerRef,
    command_tx: mpsc::Sender<NetworkCommand>,
    event_rx: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
}

impl Libp2pStageTransport {
    /// Build the swarm, start listening and spawn the network loop.
    /// Must be called inside a tokio runtime.
    pub fn spawn(settings: TransportSettings) -> Result<Self> {
        let keypair = identity::Keypair::generate_ed25519();
        let local_peer_id = PeerId::from(keypair.public());
        let heartbeat = heartbeat_for(settings.network.announce_interval);
        let agent = settings.agent.clone();

        let mut swarm = SwarmBuilder::with_existing_identity(keypair)
            .with_tokio()
            .with_tcp(
                tcp::Config::default().nodelay(true),
                noise::Config::new,
                yamux::Config::default,
            )
            .map_err(|e| anyhow!("failed to configure tcp transport: {e}"))?
            .with_behaviour(|key| StageBehaviour::new(key, &agent, heartbeat))
            .map_err(|e| anyhow!("failed to create stage behaviour: {e}"))?
            .with_swarm_config(|cfg| {
                cfg.with_idle_connection_timeout(settings.network.idle_connection_timeout)
            })
            .build();

        let listen_addr: Multiaddr = format!("/ip4/0.0.0.0/tcp/{}", settings.network.listen_port)
            .parse()
            .map_err(|e| anyhow!("failed to parse listen address: {e}"))?;
        swarm
            .listen_on(listen_addr)
            .map_err(|e| anyhow!("failed to listen on tcp: {e}"))?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_BUFFER);
        let (event_tx, event_rx) = mpsc::channel(EVENT_BUFFER);
        let manager = NetworkManager::new(
            swarm,
            command_rx,
            event_tx,
            settings.service_base,
            &settings.network,
        );
        tokio::spawn(manager.run());
        info!("libp2p stage transport started as {local_peer_id}");

        Ok(Self {
            local_peer: PeerRef::new(local_peer_id.to_string()),
            command_tx,
            event_rx: Mutex::new(Some(event_rx)),
        })
    }

    pub fn local_peer(&self) -> &PeerRef {
        &self.local_peer
    }

    async fn send(&self, command: NetworkCommand) -> Result<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| anyhow!("network manager stopped"))
    }

    fn parse_peer(peer: &PeerRef) -> Result<PeerId> {
        peer.as_str()
            .parse()
            .map_err(|e| anyhow!("invalid peer id {peer}: {e}"))
    }
}

/// Gossipsub heartbeat: half the announce interval, at least 100ms.
fn heartbeat_for(announce_interval: Duration) -> Duration {
    (announce_interval / 2).max(Duration::from_millis(100))
}

#[async_trait]
impl DiscoveryPort for Libp2pStageTransport {
    async fn start_advertising(&self, channel: ChannelKind, info: DiscoveryInfo) -> Result<()> {
        self.send(NetworkCommand::Advertise { channel, info }).await
    }

    async fn stop_advertising(&self, channel: ChannelKind) -> Result<()> {
        self.send(NetworkCommand::StopAdvertising { channel }).await
    }

    async fn start_browsing(&self, channel: ChannelKind) -> Result<()> {
        self.send(NetworkCommand::Browse { channel }).await
    }

    async fn stop_browsing(&self, channel: ChannelKind) -> Result<()> {
        self.send(NetworkCommand::StopBrowsing { channel }).await
    }
}

#[async_trait]
impl SessionPort for Libp2pStageTransport {
    async fn invite(&self, peer: &PeerRef, context: Vec<u8>, timeout: Duration) -> Result<()> {
        let peer = Self::parse_peer(peer)?;
        self.send(NetworkCommand::Invite {
            peer,
            context,
            timeout,
        })
        .await
    }

    async fn respond_invitation(&self, invitation: InvitationId, accept: bool) -> Result<()> {
        self.send(NetworkCommand::Respond { invitation, accept })
            .await
    }

    async fn disconnect(&self) -> Result<()> {
        self.send(NetworkCommand::Disconnect).await
    }
}

#[async_trait]
impl TransportEventsPort for Libp2pStageTransport {
    async fn subscribe_events(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        let mut guard = self
            .event_rx
            .lock()
            .map_err(|_| anyhow!("transport event receiver mutex poisoned"))?;
        guard
            .take()
            .ok_or_else(|| anyhow!("transport event receiver already taken"))
    }
}
