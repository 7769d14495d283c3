pub mod config;
pub mod run;
pub mod tracing;
pub mod wiring;

pub use config::{apply_cli_overrides, load_config, resolve_participant};
pub use run::run_app;
pub use wiring::{spawn_on_air, wire_libp2p, wire_loopback, Loopback};
