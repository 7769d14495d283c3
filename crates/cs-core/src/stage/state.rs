use serde::{Deserialize, Serialize};

use crate::ids::{PeerRef, PersonaId};
use crate::presence::FreshnessGate;
use crate::session::SessionState;

/// Caller-assigned handle that pairs a hand-raise request with its resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HandRaiseTicket(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Lifecycle {
    /// Constructed, `start` not called yet.
    #[default]
    Idle,
    Running,
    /// Torn down; every later event is ignored.
    Closed,
}

/// The one point-to-point session this participant may hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionLink {
    pub peer: PeerRef,
    pub state: SessionState,
}

/// Stage state owned by the state machine
///
/// 舞台状态,仅由状态机修改。
///
/// 不变量: `presenting.is_some()` 时 `available == false`。
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StageState {
    pub lifecycle: Lifecycle,
    pub available: bool,
    /// Who holds the stage. Known directly by the moderator, inferred by students
    /// from the last trusted status record.
    pub presenting: Option<PersonaId>,
    /// Whose work the holder is critiquing.
    pub critique_for: Option<PersonaId>,
    /// The moderator's candidate (moderator) or the tracked moderator (student).
    pub connected_peer: Option<PeerRef>,
    /// Candidate awaiting session confirmation (moderator only).
    pub pending_presenting: Option<PersonaId>,
    /// Pending local hand-raise (student only).
    pub hand_raise: Option<HandRaiseTicket>,
    pub session: Option<SessionLink>,
    /// Staleness filter for status records (student only).
    pub freshness: FreshnessGate,
}

impl StageState {
    pub fn last_connect_time(&self) -> Option<i64> {
        self.freshness.last_accepted()
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle == Lifecycle::Running
    }

    pub fn session_with(&self, peer: &PeerRef) -> Option<SessionState> {
        self.session
            .as_ref()
            .filter(|link| &link.peer == peer)
            .map(|link| link.state)
    }

    pub fn snapshot(&self) -> StageSnapshot {
        StageSnapshot {
            available: self.available,
            holder: self.presenting.clone(),
            critique_for: self.critique_for.clone(),
            candidate: self.pending_presenting.clone(),
            hand_raised: self.hand_raise.is_some(),
            closed: self.lifecycle == Lifecycle::Closed,
        }
    }

    /// Compact form used in transition logs.
    pub fn summary(&self) -> String {
        format!(
            "{:?} available={} holder={} critique_for={} candidate={} peer={} hand={} session={}",
            self.lifecycle,
            self.available,
            display_opt(&self.presenting),
            display_opt(&self.critique_for),
            display_opt(&self.pending_presenting),
            display_opt(&self.connected_peer),
            self.hand_raise.is_some(),
            self.session
                .as_ref()
                .map(|link| format!("{}@{}", link.state, link.peer))
                .unwrap_or_else(|| "-".to_string()),
        )
    }
}

fn display_opt<T: std::fmt::Display>(value: &Option<T>) -> String {
    value
        .as_ref()
        .map(|v| v.to_string())
        .unwrap_or_else(|| "-".to_string())
}

/// Outward view of the stage, delivered with every notification
///
/// `onStageChanged(available, holder, critique_for)` 的载荷,
/// 附带候选人与举手状态供界面区分 "授予中" 与 "请求中"。
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageSnapshot {
    pub available: bool,
    pub holder: Option<PersonaId>,
    pub critique_for: Option<PersonaId>,
    pub candidate: Option<PersonaId>,
    pub hand_raised: bool,
    pub closed: bool,
}
