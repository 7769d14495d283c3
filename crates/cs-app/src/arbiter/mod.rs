//! Stage arbiter
//!
//! ```text
//! Local intents / Transport events / Timer fires
//!   ↓
//! StageArbiter (one serial task per participant)
//!   ↓
//! StageStateMachine (pure transitions)
//!   ↓
//! StageActions (executed in order by the arbiter)
//!   ↓
//! Discovery / Session / Observer side effects
//! ```

mod facade;
mod runtime;

pub use facade::{HandRaiseCallback, StageEventPort, StageFacade};
pub use runtime::{ArbiterConfig, ArbiterError, StageArbiter};
