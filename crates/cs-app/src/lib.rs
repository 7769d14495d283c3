//! Critique stage orchestration layer
//!
//! This crate runs one [`arbiter::StageArbiter`] per participant: a serial task
//! that feeds local intents, transport observations and timer fires into the
//! stage state machine and executes the effects it returns.

pub mod arbiter;
pub mod deps;

pub use arbiter::{
    ArbiterConfig, ArbiterError, HandRaiseCallback, StageArbiter, StageEventPort, StageFacade,
};
pub use deps::StageDeps;
