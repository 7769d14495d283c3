//! In-memory air
//!
//! 进程内的广播介质:一个共享的 hub,多个节点。所有投递在调用方的上下文中
//! 同步完成,顺序与调用顺序一致。
//!
//! - 广告者停止广播时,曾看到它的浏览者立即收到 `PeerLost`
//! - 邀请在超时前未被答复时,邀请方收到 `NotConnected`
//! - [`InMemoryAir::detach`] 模拟设备消失:广播丢失,会话断开

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use log::{debug, warn};
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};

use cs_core::ids::{InvitationId, PeerRef};
use cs_core::ports::{DiscoveryPort, SessionPort, TransportEvent, TransportEventsPort};
use cs_core::presence::{ChannelKind, DiscoveryInfo};
use cs_core::session::SessionState;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AirError {
    #[error("air node {0} is detached")]
    Detached(PeerRef),

    #[error("unknown invitation {0}")]
    UnknownInvitation(InvitationId),
}

/// Shared hub. Cloning shares the same air.
#[derive(Clone, Default)]
pub struct InMemoryAir {
    inner: Arc<Mutex<AirState>>,
}

#[derive(Default)]
struct AirState {
    nodes: HashMap<PeerRef, NodeState>,
    next_invitation: u64,
}

#[derive(Default)]
struct NodeState {
    attached: bool,
    subscribers: Vec<mpsc::Sender<TransportEvent>>,
    adverts: HashMap<ChannelKind, DiscoveryInfo>,
    browsing: HashSet<ChannelKind>,
    /// Advertisers this node has been told about.
    seen: HashSet<(ChannelKind, PeerRef)>,
    session: Option<(PeerRef, SessionState)>,
    /// Invitation this node sent and is waiting on.
    outgoing: Option<InvitationId>,
    /// Invitations received and not answered yet.
    incoming: HashMap<InvitationId, PeerRef>,
}

impl InMemoryAir {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, AirState> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Attach a new node. Names are made unique by suffixing.
    pub fn join(&self, name: &str) -> AirNode {
        let mut state = self.state();
        let mut id = PeerRef::new(name);
        let mut suffix = 1;
        while state.nodes.contains_key(&id) {
            suffix += 1;
            id = PeerRef::new(format!("{name}-{suffix}"));
        }
        state.nodes.insert(
            id.clone(),
            NodeState {
                attached: true,
                ..NodeState::default()
            },
        );
        debug!("air: {id} joined");

        AirNode {
            id,
            air: self.clone(),
        }
    }

    /// Make a node vanish: its advertisements are lost, its session drops and
    /// every later operation on it fails.
    pub fn detach(&self, peer: &PeerRef) {
        let mut state = self.state();
        let Some(node) = state.nodes.get_mut(peer) else {
            return;
        };
        if !node.attached {
            return;
        }
        node.attached = false;
        node.subscribers.clear();
        node.browsing.clear();
        node.seen.clear();
        node.incoming.clear();
        node.outgoing = None;
        node.session = None;
        let channels: Vec<ChannelKind> = node.adverts.drain().map(|(channel, _)| channel).collect();

        for channel in channels {
            state.report_lost(peer, channel);
        }

        let partners: Vec<PeerRef> = state
            .nodes
            .iter_mut()
            .filter_map(|(id, node)| {
                let with_peer = node
                    .session
                    .as_ref()
                    .is_some_and(|(partner, _)| partner == peer);
                if with_peer {
                    node.session = None;
                    node.outgoing = None;
                    Some(id.clone())
                } else {
                    None
                }
            })
            .collect();
        for partner in partners {
            state.deliver(
                &partner,
                TransportEvent::SessionChanged {
                    peer: peer.clone(),
                    state: SessionState::NotConnected,
                },
            );
        }
        debug!("air: {peer} detached");
    }

    pub fn is_attached(&self, peer: &PeerRef) -> bool {
        self.state()
            .nodes
            .get(peer)
            .is_some_and(|node| node.attached)
    }

    fn expire_invite(&self, inviter: &PeerRef, invitee: &PeerRef, invitation: InvitationId) {
        let mut state = self.state();
        let Some(node) = state.nodes.get_mut(inviter) else {
            return;
        };
        if node.outgoing != Some(invitation) {
            return;
        }
        node.outgoing = None;
        node.session = None;
        if let Some(target) = state.nodes.get_mut(invitee) {
            target.incoming.remove(&invitation);
        }
        debug!("air: invitation {invitation} from {inviter} timed out");
        state.deliver(
            inviter,
            TransportEvent::SessionChanged {
                peer: invitee.clone(),
                state: SessionState::NotConnected,
            },
        );
    }
}

impl AirState {
    fn attached_mut(&mut self, me: &PeerRef) -> Result<&mut NodeState, AirError> {
        self.nodes
            .get_mut(me)
            .filter(|node| node.attached)
            .ok_or_else(|| AirError::Detached(me.clone()))
    }

    fn deliver(&mut self, to: &PeerRef, event: TransportEvent) {
        let Some(node) = self.nodes.get_mut(to) else {
            return;
        };
        if !node.attached {
            return;
        }
        node.subscribers
            .retain(|subscriber| match subscriber.try_send(event.clone()) {
                Ok(()) => true,
                Err(TrySendError::Full(_)) => {
                    warn!("air: subscriber of {to} is full, event dropped");
                    true
                }
                Err(TrySendError::Closed(_)) => false,
            });
    }

    fn report_found(
        &mut self,
        browser: &PeerRef,
        channel: ChannelKind,
        advertiser: &PeerRef,
        info: DiscoveryInfo,
    ) {
        if let Some(node) = self.nodes.get_mut(browser) {
            node.seen.insert((channel, advertiser.clone()));
        }
        self.deliver(
            browser,
            TransportEvent::PeerFound {
                channel,
                peer: advertiser.clone(),
                info,
            },
        );
    }

    fn report_lost(&mut self, advertiser: &PeerRef, channel: ChannelKind) {
        let key = (channel, advertiser.clone());
        let browsers: Vec<PeerRef> = self
            .nodes
            .iter_mut()
            .filter_map(|(id, node)| node.seen.remove(&key).then(|| id.clone()))
            .collect();
        for browser in browsers {
            self.deliver(
                &browser,
                TransportEvent::PeerLost {
                    channel,
                    peer: advertiser.clone(),
                },
            );
        }
    }

    fn advertise(&mut self, me: &PeerRef, channel: ChannelKind, info: DiscoveryInfo) -> Result<()> {
        let node = self.attached_mut(me)?;
        if node.adverts.get(&channel) == Some(&info) {
            return Ok(());
        }
        node.adverts.insert(channel, info.clone());

        let browsers: Vec<PeerRef> = self
            .nodes
            .iter()
            .filter(|(id, node)| *id != me && node.attached && node.browsing.contains(&channel))
            .map(|(id, _)| id.clone())
            .collect();
        for browser in browsers {
            self.report_found(&browser, channel, me, info.clone());
        }
        Ok(())
    }

    fn stop_advertising(&mut self, me: &PeerRef, channel: ChannelKind) -> Result<()> {
        if self.attached_mut(me)?.adverts.remove(&channel).is_some() {
            self.report_lost(me, channel);
        }
        Ok(())
    }

    fn browse(&mut self, me: &PeerRef, channel: ChannelKind) -> Result<()> {
        self.attached_mut(me)?.browsing.insert(channel);

        let advertisers: Vec<(PeerRef, DiscoveryInfo)> = self
            .nodes
            .iter()
            .filter(|(id, node)| *id != me && node.attached)
            .filter_map(|(id, node)| {
                node.adverts
                    .get(&channel)
                    .map(|info| (id.clone(), info.clone()))
            })
            .collect();
        for (advertiser, info) in advertisers {
            self.report_found(me, channel, &advertiser, info);
        }
        Ok(())
    }

    fn stop_browsing(&mut self, me: &PeerRef, channel: ChannelKind) -> Result<()> {
        let node = self.attached_mut(me)?;
        node.browsing.remove(&channel);
        node.seen.retain(|(seen_channel, _)| *seen_channel != channel);
        Ok(())
    }

    fn invite(
        &mut self,
        me: &PeerRef,
        peer: &PeerRef,
        context: Vec<u8>,
    ) -> Result<Option<InvitationId>> {
        self.attached_mut(me)?;
        let reachable = peer != me && self.nodes.get(peer).is_some_and(|node| node.attached);
        if !reachable {
            debug!("air: {peer} unreachable from {me}");
            self.deliver(
                me,
                TransportEvent::SessionChanged {
                    peer: peer.clone(),
                    state: SessionState::NotConnected,
                },
            );
            return Ok(None);
        }

        self.next_invitation += 1;
        let invitation = InvitationId::new(self.next_invitation);

        let node = self.attached_mut(me)?;
        node.session = Some((peer.clone(), SessionState::Connecting));
        node.outgoing = Some(invitation);
        if let Some(target) = self.nodes.get_mut(peer) {
            target.incoming.insert(invitation, me.clone());
        }

        self.deliver(
            peer,
            TransportEvent::InvitationReceived {
                invitation,
                peer: me.clone(),
                context: Some(context),
            },
        );
        self.deliver(
            me,
            TransportEvent::SessionChanged {
                peer: peer.clone(),
                state: SessionState::Connecting,
            },
        );
        Ok(Some(invitation))
    }

    fn respond(&mut self, me: &PeerRef, invitation: InvitationId, accept: bool) -> Result<()> {
        let inviter = self
            .attached_mut(me)?
            .incoming
            .remove(&invitation)
            .ok_or(AirError::UnknownInvitation(invitation))?;

        let still_waiting = self
            .nodes
            .get(&inviter)
            .is_some_and(|node| node.attached && node.outgoing == Some(invitation));
        if !still_waiting {
            debug!("air: invitation {invitation} no longer pending");
            if accept {
                self.deliver(
                    me,
                    TransportEvent::SessionChanged {
                        peer: inviter,
                        state: SessionState::NotConnected,
                    },
                );
            }
            return Ok(());
        }

        if let Some(node) = self.nodes.get_mut(&inviter) {
            node.outgoing = None;
            node.session = accept.then(|| (me.clone(), SessionState::Connected));
        }

        if accept {
            self.attached_mut(me)?.session = Some((inviter.clone(), SessionState::Connected));
            for state in [SessionState::Connecting, SessionState::Connected] {
                self.deliver(
                    me,
                    TransportEvent::SessionChanged {
                        peer: inviter.clone(),
                        state,
                    },
                );
            }
            self.deliver(
                &inviter,
                TransportEvent::SessionChanged {
                    peer: me.clone(),
                    state: SessionState::Connected,
                },
            );
        } else {
            self.deliver(
                &inviter,
                TransportEvent::SessionChanged {
                    peer: me.clone(),
                    state: SessionState::NotConnected,
                },
            );
        }
        Ok(())
    }

    fn disconnect(&mut self, me: &PeerRef) -> Result<()> {
        let node = self.attached_mut(me)?;
        let Some((partner, _)) = node.session.take() else {
            return Ok(());
        };
        let outgoing = node.outgoing.take();

        if let Some(other) = self.nodes.get_mut(&partner) {
            if let Some(invitation) = outgoing {
                other.incoming.remove(&invitation);
            }
            let with_me = other
                .session
                .as_ref()
                .is_some_and(|(peer, _)| peer == me);
            if with_me {
                other.session = None;
                self.deliver(
                    &partner,
                    TransportEvent::SessionChanged {
                        peer: me.clone(),
                        state: SessionState::NotConnected,
                    },
                );
            }
        }

        self.deliver(
            me,
            TransportEvent::SessionChanged {
                peer: partner,
                state: SessionState::NotConnected,
            },
        );
        Ok(())
    }
}

/// One device on the air. Implements every transport port.
#[derive(Clone)]
pub struct AirNode {
    id: PeerRef,
    air: InMemoryAir,
}

impl AirNode {
    pub fn peer(&self) -> &PeerRef {
        &self.id
    }

    pub fn detach(&self) {
        self.air.detach(&self.id);
    }
}

impl std::fmt::Debug for AirNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AirNode").field("id", &self.id).finish()
    }
}

#[async_trait]
impl DiscoveryPort for AirNode {
    async fn start_advertising(&self, channel: ChannelKind, info: DiscoveryInfo) -> Result<()> {
        self.air.state().advertise(&self.id, channel, info)
    }

    async fn stop_advertising(&self, channel: ChannelKind) -> Result<()> {
        self.air.state().stop_advertising(&self.id, channel)
    }

    async fn start_browsing(&self, channel: ChannelKind) -> Result<()> {
        self.air.state().browse(&self.id, channel)
    }

    async fn stop_browsing(&self, channel: ChannelKind) -> Result<()> {
        self.air.state().stop_browsing(&self.id, channel)
    }
}

#[async_trait]
impl SessionPort for AirNode {
    async fn invite(&self, peer: &PeerRef, context: Vec<u8>, timeout: Duration) -> Result<()> {
        let invitation = self.air.state().invite(&self.id, peer, context)?;

        if let Some(invitation) = invitation {
            let air = self.air.clone();
            let inviter = self.id.clone();
            let invitee = peer.clone();
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                air.expire_invite(&inviter, &invitee, invitation);
            });
        }
        Ok(())
    }

    async fn respond_invitation(&self, invitation: InvitationId, accept: bool) -> Result<()> {
        self.air.state().respond(&self.id, invitation, accept)
    }

    async fn disconnect(&self) -> Result<()> {
        self.air.state().disconnect(&self.id)
    }
}

#[async_trait]
impl TransportEventsPort for AirNode {
    async fn subscribe_events(&self) -> Result<mpsc::Receiver<TransportEvent>> {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.air.state().attached_mut(&self.id)?.subscribers.push(tx);
        Ok(rx)
    }
}
