use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::ids::{InvitationId, PeerRef};
use crate::presence::{ChannelKind, DiscoveryInfo};
use crate::session::SessionState;
use crate::stage::StageEvent;

/// Observations reported by a transport
///
/// 传输层上报的观察结果。除 `Fault` 外都会转换为状态机事件。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    PeerFound {
        channel: ChannelKind,
        peer: PeerRef,
        info: DiscoveryInfo,
    },
    PeerLost {
        channel: ChannelKind,
        peer: PeerRef,
    },
    InvitationReceived {
        invitation: InvitationId,
        peer: PeerRef,
        context: Option<Vec<u8>>,
    },
    SessionChanged {
        peer: PeerRef,
        state: SessionState,
    },
    /// A transport operation failed after it was accepted. Logged, never fatal.
    Fault {
        operation: String,
        message: String,
    },
}

impl TransportEvent {
    /// The state machine input, or `None` for faults.
    pub fn into_stage_event(self) -> Option<StageEvent> {
        match self {
            TransportEvent::PeerFound {
                channel,
                peer,
                info,
            } => Some(StageEvent::PeerFound {
                channel,
                peer,
                info,
            }),
            TransportEvent::PeerLost { channel, peer } => {
                Some(StageEvent::PeerLost { channel, peer })
            }
            TransportEvent::InvitationReceived {
                invitation,
                peer,
                context,
            } => Some(StageEvent::InvitationReceived {
                invitation,
                peer,
                context,
            }),
            TransportEvent::SessionChanged { peer, state } => {
                Some(StageEvent::SessionChanged { peer, state })
            }
            TransportEvent::Fault { .. } => None,
        }
    }
}

/// Event subscription of a transport.
#[async_trait]
pub trait TransportEventsPort: Send + Sync {
    /// Subscribe to transport events.
    async fn subscribe_events(&self) -> Result<mpsc::Receiver<TransportEvent>>;
}
