//! Session layer domain types
//!
//! 邀请上下文令牌与点对点会话状态。

pub mod context;

pub use context::{ContextError, InviteContext};

use serde::{Deserialize, Serialize};

/// Connection state of the point-to-point session with one peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    NotConnected,
    Connecting,
    Connected,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::NotConnected => write!(f, "not-connected"),
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Connected => write!(f, "connected"),
        }
    }
}
