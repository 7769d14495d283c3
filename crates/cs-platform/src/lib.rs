//! Transport adapters for the critique stage.
//!
//! - [`p2p`]: libp2p transport with mDNS discovery, gossipsub presence channels and a
//!   request-response session protocol
//! - [`air`]: in-memory broadcast medium for tests and the loopback demo
//! - [`clock`]: wall clocks for status record timestamps

pub mod air;
pub mod clock;
pub mod p2p;

pub use air::{AirError, AirNode, InMemoryAir};
pub use clock::{MonotonicClock, SystemClock};
pub use p2p::{Libp2pStageTransport, TransportSettings};
