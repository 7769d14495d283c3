use serde::{Deserialize, Serialize};

use crate::participant::Role;

/// Base identifier every channel name is derived from.
pub const DEFAULT_SERVICE_BASE: &str = "lscritique";

/// One of the two role-asymmetric discovery channels
///
/// 两个按角色区分的发现通道:
/// - `Status`: 主持人广播舞台状态,学生浏览
/// - `Hand`: 学生广播举手请求,主持人浏览
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelKind {
    Status,
    Hand,
}

impl ChannelKind {
    pub const ALL: [ChannelKind; 2] = [ChannelKind::Status, ChannelKind::Hand];

    pub fn suffix(&self) -> &'static str {
        match self {
            ChannelKind::Status => "-stat",
            ChannelKind::Hand => "-hand",
        }
    }

    /// Full namespaced channel name, e.g. `lscritique-stat`.
    pub fn service_name(&self, base: &str) -> String {
        format!("{}{}", base, self.suffix())
    }

    /// Parse a full channel name back into its kind, given the base.
    pub fn from_service_name(base: &str, name: &str) -> Option<Self> {
        let suffix = name.strip_prefix(base)?;
        Self::ALL.into_iter().find(|kind| kind.suffix() == suffix)
    }

    /// The channel a participant of `role` advertises on.
    pub fn advertised_by(role: Role) -> Self {
        match role {
            Role::Moderator => ChannelKind::Status,
            Role::Student => ChannelKind::Hand,
        }
    }

    /// The channel a participant of `role` browses.
    pub fn browsed_by(role: Role) -> Self {
        match role {
            Role::Moderator => ChannelKind::Hand,
            Role::Student => ChannelKind::Status,
        }
    }
}

impl std::fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChannelKind::Status => write!(f, "status"),
            ChannelKind::Hand => write!(f, "hand"),
        }
    }
}
