//! Presence broadcasts
//!
//! 在发现广播中携带的小型键值负载:编码、解码、校验,以及学生端用于
//! 过滤陈旧/幽灵广播的新鲜度判定。
//!
//! # Wire schema / 线上格式
//!
//! ```text
//! courseId          = "<course>"
//! critiqueId        = "<critique>"
//! personaId         = "<persona>"        (optional)
//! critiquePersonaId = "<persona>"        (optional)
//! timeStamp         = "<integer seconds>"
//! ```

pub mod channel;
pub mod codec;
pub mod freshness;

pub use channel::{ChannelKind, DEFAULT_SERVICE_BASE};
pub use codec::{encode, DiscoveryInfo, PresenceError, PresenceRecord};
pub use freshness::{ClockTrust, Freshness, FreshnessGate, PhantomReason};
