use std::time::Duration;

use crate::ids::{InvitationId, PeerRef};
use crate::presence::{ChannelKind, PresenceRecord};
use crate::session::InviteContext;

use super::state::{HandRaiseTicket, StageSnapshot};
use super::timer::{StageTimer, TimerSlot};

/// Effects produced by a transition, executed in order by the caller
///
/// 状态转换产生的副作用,由调用方按顺序执行。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageAction {
    /// 记录状态转换日志 (用于审计)
    LogTransition {
        old_state: String,
        event: String,
        new_state: String,
    },

    StartAdvertising {
        channel: ChannelKind,
        record: PresenceRecord,
    },
    StopAdvertising {
        channel: ChannelKind,
    },
    StartBrowsing {
        channel: ChannelKind,
    },
    StopBrowsing {
        channel: ChannelKind,
    },

    Invite {
        peer: PeerRef,
        context: InviteContext,
        timeout: Duration,
    },
    RespondInvitation {
        invitation: InvitationId,
        accept: bool,
    },
    Disconnect,

    ScheduleTimer {
        timer: StageTimer,
        after: Duration,
        generation: u64,
    },
    CancelTimer {
        slot: TimerSlot,
    },

    /// 举手请求的最终结果
    ResolveHandRaise {
        ticket: HandRaiseTicket,
        chosen: bool,
    },

    /// 通知外部观察者舞台变化
    Notify(StageSnapshot),
}
