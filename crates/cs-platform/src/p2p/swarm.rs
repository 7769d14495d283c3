use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::time::{Duration, Instant};

use futures::StreamExt;
use libp2p::{
    gossipsub::{self, IdentTopic, TopicHash},
    identify, mdns,
    request_response::{self, OutboundRequestId, ResponseChannel},
    swarm::SwarmEvent,
    PeerId, Swarm,
};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use cs_core::ids::{InvitationId, PeerRef};
use cs_core::ports::TransportEvent;
use cs_core::presence::{ChannelKind, DiscoveryInfo};
use cs_core::session::SessionState;
use cs_core::NetworkSettings;

use super::behaviour::{StageBehaviour, StageBehaviourEvent};
use super::presence::{PresenceCache, PresenceChange};
use super::protocol::{PresenceAnnouncement, SessionRequest, SessionResponse};

const SWEEP_INTERVAL: Duration = Duration::from_millis(250);

/// Commands sent to NetworkManager
#[derive(Debug)]
pub enum NetworkCommand {
    Advertise {
        channel: ChannelKind,
        info: DiscoveryInfo,
    },
    StopAdvertising {
        channel: ChannelKind,
    },
    Browse {
        channel: ChannelKind,
    },
    StopBrowsing {
        channel: ChannelKind,
    },
    Invite {
        peer: PeerId,
        context: Vec<u8>,
        timeout: Duration,
    },
    Respond {
        invitation: InvitationId,
        accept: bool,
    },
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Session {
    Idle,
    Inviting {
        peer: PeerId,
        request: OutboundRequestId,
        deadline: Instant,
    },
    Connected {
        peer: PeerId,
    },
}

impl Session {
    fn peer(&self) -> Option<PeerId> {
        match self {
            Session::Idle => None,
            Session::Inviting { peer, .. } | Session::Connected { peer } => Some(*peer),
        }
    }
}

fn peer_ref(peer: &PeerId) -> PeerRef {
    PeerRef::new(peer.to_string())
}

/// Network manager that handles the libp2p swarm event loop
///
/// 单任务持有 swarm:命令、swarm 事件、周期性公告与 TTL 清扫在同一个
/// select 循环中串行处理。
pub struct NetworkManager {
    swarm: Swarm<StageBehaviour>,
    command_rx: mpsc::Receiver<NetworkCommand>,
    event_tx: mpsc::Sender<TransportEvent>,
    service_base: String,
    topics: HashMap<TopicHash, ChannelKind>,
    adverts: HashMap<ChannelKind, DiscoveryInfo>,
    browsing: HashSet<ChannelKind>,
    presence: PresenceCache,
    session: Session,
    inbound: HashMap<InvitationId, (PeerId, ResponseChannel<SessionResponse>)>,
    next_invitation: u64,
    announce_interval: Duration,
}

impl NetworkManager {
    pub fn new(
        swarm: Swarm<StageBehaviour>,
        command_rx: mpsc::Receiver<NetworkCommand>,
        event_tx: mpsc::Sender<TransportEvent>,
        service_base: String,
        settings: &NetworkSettings,
    ) -> Self {
        let topics = ChannelKind::ALL
            .into_iter()
            .map(|channel| {
                (
                    IdentTopic::new(channel.service_name(&service_base)).hash(),
                    channel,
                )
            })
            .collect();

        Self {
            swarm,
            command_rx,
            event_tx,
            service_base,
            topics,
            adverts: HashMap::new(),
            browsing: HashSet::new(),
            presence: PresenceCache::new(settings.presence_ttl),
            session: Session::Idle,
            inbound: HashMap::new(),
            next_invitation: 0,
            announce_interval: settings.announce_interval,
        }
    }

    pub async fn run(mut self) {
        info!("Local peer ID: {}", self.swarm.local_peer_id());

        let mut announce = tokio::time::interval(self.announce_interval);
        announce.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut sweep = tokio::time::interval(SWEEP_INTERVAL);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = self.swarm.select_next_some() => {
                    self.handle_swarm_event(event).await;
                }

                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => {
                        info!("network command channel closed, stopping swarm loop");
                        break;
                    }
                },

                _ = announce.tick() => {
                    self.announce_all().await;
                }

                _ = sweep.tick() => {
                    self.sweep().await;
                }
            }
        }
    }

    fn topic(&self, channel: ChannelKind) -> IdentTopic {
        IdentTopic::new(channel.service_name(&self.service_base))
    }

    async fn emit(&mut self, event: TransportEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!("transport event receiver dropped");
        }
    }

    async fn fault(&mut self, operation: &str, message: impl Display) {
        let message = message.to_string();
        warn!("{operation} failed: {message}");
        self.emit(TransportEvent::Fault {
            operation: operation.to_string(),
            message,
        })
        .await;
    }

    async fn report(&mut self, change: PresenceChange) {
        let event = match change {
            PresenceChange::Found {
                channel,
                peer,
                info,
            } => TransportEvent::PeerFound {
                channel,
                peer,
                info,
            },
            PresenceChange::Lost { channel, peer } => TransportEvent::PeerLost { channel, peer },
        };
        self.emit(event).await;
    }

    async fn session_changed(&mut self, peer: &PeerId, state: SessionState) {
        self.emit(TransportEvent::SessionChanged {
            peer: peer_ref(peer),
            state,
        })
        .await;
    }

    async fn handle_command(&mut self, command: NetworkCommand) {
        match command {
            NetworkCommand::Advertise { channel, info } => {
                self.adverts.insert(channel, info.clone());
                self.publish(channel, &PresenceAnnouncement::advert(info))
                    .await;
            }
            NetworkCommand::StopAdvertising { channel } => {
                if self.adverts.remove(&channel).is_some() {
                    self.publish(channel, &PresenceAnnouncement::withdrawal())
                        .await;
                }
            }
            NetworkCommand::Browse { channel } => {
                let topic = self.topic(channel);
                if let Err(e) = self.swarm.behaviour_mut().gossipsub.subscribe(&topic) {
                    self.fault("start_browsing", e).await;
                    return;
                }
                self.browsing.insert(channel);
                // Visible advertisers are reported again on their next announcement.
                self.presence.forget_channel(channel);
            }
            NetworkCommand::StopBrowsing { channel } => {
                let topic = self.topic(channel);
                let _ = self.swarm.behaviour_mut().gossipsub.unsubscribe(&topic);
                self.browsing.remove(&channel);
                self.presence.forget_channel(channel);
            }
            NetworkCommand::Invite {
                peer,
                context,
                timeout,
            } => {
                self.invite(peer, context, timeout).await;
            }
            NetworkCommand::Respond { invitation, accept } => {
                self.respond(invitation, accept).await;
            }
            NetworkCommand::Disconnect => {
                self.leave_session().await;
            }
        }
    }

    async fn publish(&mut self, channel: ChannelKind, announcement: &PresenceAnnouncement) {
        let bytes = match announcement.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                self.fault("start_advertising", e).await;
                return;
            }
        };
        let topic = self.topic(channel);
        if let Err(e) = self.swarm.behaviour_mut().gossipsub.publish(topic, bytes) {
            // No subscriber yet is the normal state before browsers connect.
            debug!("announcement on {channel} not published: {e}");
        }
    }

    async fn announce_all(&mut self) {
        let adverts: Vec<(ChannelKind, DiscoveryInfo)> = self
            .adverts
            .iter()
            .map(|(channel, info)| (*channel, info.clone()))
            .collect();
        for (channel, info) in adverts {
            self.publish(channel, &PresenceAnnouncement::advert(info))
                .await;
        }
    }

    async fn sweep(&mut self) {
        let now = Instant::now();
        for change in self.presence.expire(now) {
            self.report(change).await;
        }

        if let Session::Inviting { peer, deadline, .. } = self.session {
            if now >= deadline {
                debug!("invitation to {peer} timed out");
                self.leave_session().await;
            }
        }
    }

    async fn invite(&mut self, peer: PeerId, context: Vec<u8>, timeout: Duration) {
        if self.session.peer().is_some() {
            self.leave_session().await;
        }

        let request = self
            .swarm
            .behaviour_mut()
            .session
            .send_request(&peer, SessionRequest::Invite { context });
        self.session = Session::Inviting {
            peer,
            request,
            deadline: Instant::now() + timeout,
        };
        self.session_changed(&peer, SessionState::Connecting).await;
    }

    async fn respond(&mut self, invitation: InvitationId, accept: bool) {
        let Some((peer, channel)) = self.inbound.remove(&invitation) else {
            self.fault(
                "respond_invitation",
                format!("unknown invitation {invitation}"),
            )
            .await;
            return;
        };

        let response = if accept {
            SessionResponse::Accepted
        } else {
            SessionResponse::Declined
        };
        if self
            .swarm
            .behaviour_mut()
            .session
            .send_response(channel, response)
            .is_err()
        {
            debug!("{peer} stopped waiting for {invitation}");
            if accept {
                self.session_changed(&peer, SessionState::NotConnected)
                    .await;
            }
            return;
        }

        if accept {
            if self.session.peer().is_some_and(|current| current != peer) {
                self.leave_session().await;
            }
            self.session = Session::Connected { peer };
            self.session_changed(&peer, SessionState::Connecting).await;
            self.session_changed(&peer, SessionState::Connected).await;
        }
    }

    async fn leave_session(&mut self) {
        let peer = match std::mem::replace(&mut self.session, Session::Idle) {
            Session::Idle => return,
            Session::Inviting { peer, .. } | Session::Connected { peer } => peer,
        };
        self.swarm
            .behaviour_mut()
            .session
            .send_request(&peer, SessionRequest::Leave);
        self.session_changed(&peer, SessionState::NotConnected)
            .await;
    }

    async fn handle_swarm_event(&mut self, event: SwarmEvent<StageBehaviourEvent>) {
        match event {
            SwarmEvent::NewListenAddr { address, .. } => {
                info!("Listening on {}", address);
            }

            SwarmEvent::Behaviour(StageBehaviourEvent::Mdns(event)) => {
                self.handle_mdns(event);
            }

            SwarmEvent::Behaviour(StageBehaviourEvent::Gossipsub(event)) => {
                self.handle_gossip(event).await;
            }

            SwarmEvent::Behaviour(StageBehaviourEvent::Session(event)) => {
                self.handle_session(event).await;
            }

            SwarmEvent::Behaviour(StageBehaviourEvent::Identify(identify::Event::Received {
                peer_id,
                info,
                ..
            })) => {
                debug!("Identified peer {}: {}", peer_id, info.agent_version);
            }

            SwarmEvent::ConnectionEstablished { peer_id, .. } => {
                debug!("Connection established with {}", peer_id);
                self.swarm
                    .behaviour_mut()
                    .gossipsub
                    .add_explicit_peer(&peer_id);
            }

            SwarmEvent::ConnectionClosed {
                peer_id,
                num_established,
                ..
            } => {
                debug!("Connection closed with {}", peer_id);
                if num_established == 0 {
                    self.peer_disconnected(peer_id).await;
                }
            }

            SwarmEvent::OutgoingConnectionError { peer_id, error, .. } => {
                warn!("Outgoing connection error to {:?}: {}", peer_id, error);
            }

            SwarmEvent::IncomingConnectionError { error, .. } => {
                warn!("Incoming connection error: {}", error);
            }

            _ => {}
        }
    }

    fn handle_mdns(&mut self, event: mdns::Event) {
        match event {
            mdns::Event::Discovered(peers) => {
                for (peer_id, addr) in peers {
                    debug!("mDNS discovered: {} at {}", peer_id, addr);
                    self.swarm.add_peer_address(peer_id, addr.clone());
                    if self.swarm.is_connected(&peer_id) {
                        continue;
                    }
                    if let Err(e) = self.swarm.dial(addr) {
                        warn!("Failed to dial {}: {}", peer_id, e);
                    }
                }
            }
            mdns::Event::Expired(peers) => {
                // Presence loss is driven by the announcement TTL.
                for (peer_id, _) in peers {
                    debug!("mDNS peer expired: {}", peer_id);
                }
            }
        }
    }

    async fn handle_gossip(&mut self, event: gossipsub::Event) {
        match event {
            gossipsub::Event::Message {
                propagation_source,
                message,
                ..
            } => {
                let Some(channel) = self.topics.get(&message.topic).copied() else {
                    return;
                };
                if !self.browsing.contains(&channel) {
                    return;
                }
                let announcement = match PresenceAnnouncement::from_bytes(&message.data) {
                    Ok(announcement) => announcement,
                    Err(e) => {
                        warn!("Failed to parse announcement on {channel}: {e}");
                        return;
                    }
                };

                let peer = peer_ref(&message.source.unwrap_or(propagation_source));
                let change = if announcement.withdrawn {
                    self.presence.withdraw(channel, &peer)
                } else {
                    self.presence
                        .observe(channel, peer, announcement.info, Instant::now())
                };
                if let Some(change) = change {
                    self.report(change).await;
                }
            }
            gossipsub::Event::Subscribed { peer_id, topic } => {
                let Some(channel) = self.topics.get(&topic).copied() else {
                    return;
                };
                // A new browser gets our record without waiting for the next tick.
                if let Some(info) = self.adverts.get(&channel).cloned() {
                    debug!("Peer {} browses {}, announcing", peer_id, channel);
                    self.publish(channel, &PresenceAnnouncement::advert(info))
                        .await;
                }
            }
            _ => {}
        }
    }

    async fn handle_session(
        &mut self,
        event: request_response::Event<SessionRequest, SessionResponse>,
    ) {
        match event {
            request_response::Event::Message { peer, message, .. } => match message {
                request_response::Message::Request {
                    request, channel, ..
                } => self.handle_request(peer, request, channel).await,
                request_response::Message::Response {
                    request_id,
                    response,
                } => self.handle_response(request_id, response).await,
            },
            request_response::Event::OutboundFailure {
                peer,
                request_id,
                error,
                ..
            } => {
                debug!("Session request to {} failed: {}", peer, error);
                if let Session::Inviting { request, .. } = self.session {
                    if request == request_id {
                        self.session = Session::Idle;
                        self.session_changed(&peer, SessionState::NotConnected)
                            .await;
                    }
                }
            }
            request_response::Event::InboundFailure { peer, error, .. } => {
                debug!("Session request from {} failed: {}", peer, error);
            }
            request_response::Event::ResponseSent { .. } => {}
        }
    }

    async fn handle_request(
        &mut self,
        peer: PeerId,
        request: SessionRequest,
        channel: ResponseChannel<SessionResponse>,
    ) {
        match request {
            SessionRequest::Invite { context } => {
                self.next_invitation += 1;
                let invitation = InvitationId::new(self.next_invitation);
                debug!("Invitation {} from {}", invitation, peer);
                self.inbound.insert(invitation, (peer, channel));
                self.emit(TransportEvent::InvitationReceived {
                    invitation,
                    peer: peer_ref(&peer),
                    context: Some(context),
                })
                .await;
            }
            SessionRequest::Leave => {
                let _ = self
                    .swarm
                    .behaviour_mut()
                    .session
                    .send_response(channel, SessionResponse::Ack);
                let voided = self.drop_inbound_from(&peer);
                let was_partner = self.session.peer() == Some(peer);
                if was_partner {
                    self.session = Session::Idle;
                }
                if was_partner || voided {
                    self.session_changed(&peer, SessionState::NotConnected)
                        .await;
                }
            }
        }
    }

    async fn handle_response(&mut self, request_id: OutboundRequestId, response: SessionResponse) {
        let Session::Inviting { peer, request, .. } = self.session else {
            return;
        };
        if request != request_id {
            return;
        }

        match response {
            SessionResponse::Accepted => {
                self.session = Session::Connected { peer };
                self.session_changed(&peer, SessionState::Connected).await;
            }
            SessionResponse::Declined | SessionResponse::Ack => {
                self.session = Session::Idle;
                self.session_changed(&peer, SessionState::NotConnected)
                    .await;
            }
        }
    }

    async fn peer_disconnected(&mut self, peer_id: PeerId) {
        for change in self.presence.peer_disconnected(&peer_ref(&peer_id)) {
            self.report(change).await;
        }
        self.drop_inbound_from(&peer_id);
        if self.session.peer() == Some(peer_id) {
            self.session = Session::Idle;
            self.session_changed(&peer_id, SessionState::NotConnected)
                .await;
        }
    }

    /// Void pending invitations from `peer`. Returns whether any existed.
    fn drop_inbound_from(&mut self, peer: &PeerId) -> bool {
        let before = self.inbound.len();
        self.inbound.retain(|_, (from, _)| from != peer);
        self.inbound.len() != before
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send<T: Send>(_: &T) {}

    // `run` is handed to `tokio::spawn`, so its future must stay `Send`.
    fn run_future_is_send(manager: NetworkManager) {
        let run = manager.run();
        assert_send(&run);
    }

    #[test]
    fn test_manager_run_future_is_send() {
        let _check: fn(NetworkManager) = run_future_is_send;
    }
}
