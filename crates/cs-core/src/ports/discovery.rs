use anyhow::Result;
use async_trait::async_trait;

use crate::presence::{ChannelKind, DiscoveryInfo};

/// Presence broadcasts on the two stage channels
///
/// 发现广播端口。所有操作幂等:重复 `start_advertising` 以新记录替换旧记录,
/// 停止未启动的服务不是错误。
#[async_trait]
pub trait DiscoveryPort: Send + Sync {
    /// Advertise `info` on `channel`, replacing any previous advertisement.
    async fn start_advertising(&self, channel: ChannelKind, info: DiscoveryInfo) -> Result<()>;

    async fn stop_advertising(&self, channel: ChannelKind) -> Result<()>;

    /// Browse `channel`. Every advertiser currently visible is reported again.
    async fn start_browsing(&self, channel: ChannelKind) -> Result<()>;

    async fn stop_browsing(&self, channel: ChannelKind) -> Result<()>;
}

#[cfg(test)]
mockall::mock! {
    pub Discovery {}

    #[async_trait]
    impl DiscoveryPort for Discovery {
        async fn start_advertising(&self, channel: ChannelKind, info: DiscoveryInfo) -> Result<()>;
        async fn stop_advertising(&self, channel: ChannelKind) -> Result<()>;
        async fn start_browsing(&self, channel: ChannelKind) -> Result<()>;
        async fn stop_browsing(&self, channel: ChannelKind) -> Result<()>;
    }
}
