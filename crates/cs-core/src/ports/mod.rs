//! Port interfaces for the stage arbiter
//!
//! Ports define the contract between the arbiter and the transports that carry
//! presence broadcasts and point-to-point sessions. The arbiter only depends on
//! these traits; concrete adapters live in the platform crate.

mod clock;
mod discovery;
mod observer;
mod session;
mod transport_events;

pub use clock::ClockPort;
pub use discovery::DiscoveryPort;
pub use observer::StageObserverPort;
pub use session::SessionPort;
pub use transport_events::{TransportEvent, TransportEventsPort};
