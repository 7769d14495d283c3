//! Stage arbitration
//!
//! 舞台仲裁:一个主持人与若干学生竞争同一个独占舞台。
//!
//! - [`StageStateMachine`] 纯状态机,输入 [`StageEvent`],输出 [`StageAction`]
//! - [`ModeratorStage`] / [`StudentStage`] 角色策略
//! - [`TimerBook`] 定时器代数,过期触发无效

mod action;
mod event;
mod machine;
mod moderator;
mod outlook;
mod policy;
mod state;
mod strategy;
mod student;
mod timer;

pub use action::StageAction;
pub use event::StageEvent;
pub use machine::{StageStateMachine, TicketCounter};
pub use moderator::ModeratorStage;
pub use outlook::{StageOutlook, TurnKind};
pub use policy::StagePolicy;
pub use state::{HandRaiseTicket, Lifecycle, SessionLink, StageSnapshot, StageState};
pub use strategy::{StageParticipant, Transition};
pub use student::StudentStage;
pub use timer::{StageTimer, TimerBook, TimerSlot};
