use async_trait::async_trait;
use tokio::sync::mpsc;

use cs_core::stage::StageSnapshot;

/// Resolution of one hand-raise request: `true` when the stage was granted.
pub type HandRaiseCallback = Box<dyn FnOnce(bool) + Send + 'static>;

/// Public operations of one participant's stage
///
/// 每个参与者一个实例。所有操作只是把意图投递给串行任务,
/// 结果通过回调或 [`StageEventPort`] 返回。
#[async_trait]
pub trait StageFacade: Send + Sync {
    async fn start(&self) -> anyhow::Result<()>;

    /// The callback is invoked exactly once.
    async fn raise_hand(&self, callback: HandRaiseCallback) -> anyhow::Result<()>;

    async fn drop_hand(&self) -> anyhow::Result<()>;

    async fn dropping_hand(&self) -> anyhow::Result<()>;

    async fn release_stage(&self) -> anyhow::Result<()>;

    /// Stop every channel, leave the session and deny any pending hand-raise.
    async fn teardown(&self) -> anyhow::Result<()>;

    fn snapshot(&self) -> StageSnapshot;
}

#[async_trait]
pub trait StageEventPort: Send + Sync {
    /// Every stage notification from now on.
    async fn subscribe(&self) -> anyhow::Result<mpsc::Receiver<StageSnapshot>>;
}
