//! libp2p stage transport
//!
//! - mDNS 发现局域网内的其他参与者并建立连接
//! - gossipsub 主题 `<base>-stat` / `<base>-hand` 承载在线公告
//! - request-response 协议承载邀请与离开会话

mod behaviour;
mod presence;
mod protocol;
mod swarm;
mod transport;

pub use presence::{PresenceCache, PresenceChange};
pub use protocol::{PresenceAnnouncement, SessionRequest, SessionResponse, SESSION_PROTOCOL};
pub use transport::{Libp2pStageTransport, TransportSettings};
