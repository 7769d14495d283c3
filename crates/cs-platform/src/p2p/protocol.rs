use libp2p::StreamProtocol;
use serde::{Deserialize, Serialize};

use cs_core::presence::DiscoveryInfo;

/// Request-response protocol carrying stage invitations.
pub const SESSION_PROTOCOL: StreamProtocol = StreamProtocol::new("/lscritique/session/1.0.0");

/// Session requests between two stage participants
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionRequest {
    /// Invite the receiver onto the stage. `context` is the invite token.
    Invite { context: Vec<u8> },
    /// The sender leaves the session.
    Leave,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionResponse {
    Accepted,
    Declined,
    Ack,
}

/// Presence announcement published on a channel topic
///
/// 通道主题上发布的在线公告。`withdrawn` 表示广告者停止了广播,
/// 浏览者无需等待 TTL 即可上报丢失。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceAnnouncement {
    pub info: DiscoveryInfo,
    #[serde(default)]
    pub withdrawn: bool,
}

impl PresenceAnnouncement {
    pub fn advert(info: DiscoveryInfo) -> Self {
        Self {
            info,
            withdrawn: false,
        }
    }

    pub fn withdrawal() -> Self {
        Self {
            info: DiscoveryInfo::new(),
            withdrawn: true,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_withdrawal_flag_defaults_to_false() {
        let announcement =
            PresenceAnnouncement::from_bytes(br#"{"info":{"courseId":"c1"}}"#).unwrap();
        assert!(!announcement.withdrawn);
        assert_eq!(announcement.info.get("courseId").map(String::as_str), Some("c1"));
    }

    #[test]
    fn test_garbage_is_rejected() {
        assert!(PresenceAnnouncement::from_bytes(b"not json").is_err());
    }

    #[test]
    fn test_session_request_wire_shape() {
        let json = serde_json::to_string(&SessionRequest::Invite {
            context: b"c:k:p".to_vec(),
        })
        .unwrap();
        assert!(json.starts_with(r#"{"Invite":"#));
        assert_eq!(serde_json::to_string(&SessionRequest::Leave).unwrap(), r#""Leave""#);
    }
}
