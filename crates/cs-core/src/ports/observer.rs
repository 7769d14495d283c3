use crate::stage::StageSnapshot;

/// Receives `onStageChanged(available, holder, critique_for)` notifications.
///
/// 在仲裁任务内同步调用,实现方不得阻塞。
pub trait StageObserverPort: Send + Sync {
    fn on_stage_changed(&self, snapshot: &StageSnapshot);
}
