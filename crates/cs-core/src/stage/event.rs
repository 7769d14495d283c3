use crate::ids::{InvitationId, PeerRef};
use crate::presence::{ChannelKind, DiscoveryInfo};
use crate::session::SessionState;

use super::state::HandRaiseTicket;
use super::timer::StageTimer;

/// Inputs of the stage state machine: local intents, transport observations and
/// timer fires
///
/// 状态机输入:本地意图、传输层观察结果、定时器触发。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageEvent {
    Start,
    RaiseHand {
        ticket: HandRaiseTicket,
    },
    DropHand,
    DroppingHand,
    ReleaseStage,
    Shutdown,

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

    TimerFired {
        timer: StageTimer,
        generation: u64,
    },
}

impl StageEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StageEvent::Start => "start",
            StageEvent::RaiseHand { .. } => "raise_hand",
            StageEvent::DropHand => "drop_hand",
            StageEvent::DroppingHand => "dropping_hand",
            StageEvent::ReleaseStage => "release_stage",
            StageEvent::Shutdown => "shutdown",
            StageEvent::PeerFound { .. } => "peer_found",
            StageEvent::PeerLost { .. } => "peer_lost",
            StageEvent::InvitationReceived { .. } => "invitation_received",
            StageEvent::SessionChanged { .. } => "session_changed",
            StageEvent::TimerFired { .. } => "timer_fired",
        }
    }
}
