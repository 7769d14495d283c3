//! # cs-core
//!
//! Core domain models and the stage arbitration protocol for critique sessions.
//!
//! This crate contains pure protocol logic without any infrastructure dependencies:
//! the presence codec, the invitation context token, the freshness gate and the
//! stage state machine with its moderator and student strategies. All I/O happens
//! behind the traits in [`ports`].

pub mod config;
pub mod ids;
pub mod participant;
pub mod ports;
pub mod presence;
pub mod session;
pub mod stage;

// Re-export commonly used types at the crate root
pub use config::{AppConfig, ConfigError, NetworkSettings, StageSettings};
pub use ids::{CourseId, CritiqueId, InvitationId, PeerRef, PersonaId};
pub use participant::{Participant, Role};
pub use ports::TransportEvent;
pub use presence::{ChannelKind, ClockTrust, DiscoveryInfo, PresenceRecord};
pub use session::{InviteContext, SessionState};
pub use stage::{
    HandRaiseTicket, StageAction, StageEvent, StageOutlook, StagePolicy, StageSnapshot,
    StageStateMachine, StageTimer, TimerSlot, TurnKind,
};
