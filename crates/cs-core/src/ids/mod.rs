//! ID type wrappers for type safety.
//!
//! 身份标识类型。课程、评审与人物标识来自外部名册,在一次评审会话内不可变;
//! `PeerRef` 是传输层对端的不透明引用 (libp2p PeerId 字符串或内存节点名)。

mod id_macro;

use id_macro::impl_id;
use serde::{Deserialize, Serialize};

/// Stable identifier of a human participant, unique per course.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PersonaId(String);

/// Course scope of the discovery namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CourseId(String);

/// Critique scope of the discovery namespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CritiqueId(String);

/// Opaque reference to a remote peer as seen by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PeerRef(String);

impl_id!(PersonaId, CourseId, CritiqueId, PeerRef);

/// Transport-assigned handle of one inbound invitation awaiting an answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvitationId(u64);

impl InvitationId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl std::fmt::Display for InvitationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "inv-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_persona_id_compares_with_str() {
        let id = PersonaId::new("alice");
        assert_eq!(id.as_str(), "alice");
        assert!(id == "alice");
        assert!(!id.is_empty());
    }

    #[test]
    fn test_peer_ref_display_is_full() {
        let peer = PeerRef::from("12D3KooWVeryLongPeerIdString");
        assert_eq!(format!("{}", peer), "12D3KooWVeryLongPeerIdString");
    }

    #[test]
    fn test_invitation_id_display() {
        assert_eq!(InvitationId::new(7).to_string(), "inv-7");
    }
}
