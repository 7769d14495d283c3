//! # Dependency Wiring / 依赖装配
//!
//! Builds the transport adapters and hands them to [`StageArbiter::spawn`]
//! as trait objects. The only place that knows concrete adapter types.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;

use cs_app::{ArbiterConfig, StageArbiter, StageDeps};
use cs_core::config::{AppConfig, StageSettings};
use cs_core::ports::{ClockPort, StageObserverPort};
use cs_core::Participant;
use cs_platform::{InMemoryAir, Libp2pStageTransport, SystemClock, TransportSettings};

use crate::observer::TracingObserver;

/// Persona of the moderator that hosts a loopback session.
pub const LOOPBACK_MODERATOR: &str = "moderator";

/// Stage participant on the LAN.
pub async fn wire_libp2p(
    config: &AppConfig,
    participant: Participant,
    observer: Arc<dyn StageObserverPort>,
) -> Result<StageArbiter> {
    let settings = TransportSettings {
        service_base: config.stage.service_base.clone(),
        network: config.network.clone(),
        agent: format!(
            "lscritique/{}/{}",
            env!("CARGO_PKG_VERSION"),
            participant.persona_id
        ),
    };
    let transport =
        Arc::new(Libp2pStageTransport::spawn(settings).context("Failed to start libp2p transport")?);
    info!(peer = %transport.local_peer(), "libp2p transport ready");

    let deps = StageDeps {
        discovery: transport.clone(),
        session: transport.clone(),
        transport_events: transport,
        clock: Arc::new(SystemClock),
        observer,
    };
    StageArbiter::spawn(participant, ArbiterConfig::from_settings(&config.stage), deps).await
}

/// One participant on a shared in-memory air.
pub async fn spawn_on_air(
    air: &InMemoryAir,
    participant: Participant,
    settings: &StageSettings,
    clock: Arc<dyn ClockPort>,
    observer: Arc<dyn StageObserverPort>,
) -> Result<StageArbiter> {
    let node = Arc::new(air.join(participant.persona_id.as_str()));
    let deps = StageDeps {
        discovery: node.clone(),
        session: node.clone(),
        transport_events: node,
        clock,
        observer,
    };
    StageArbiter::spawn(participant, ArbiterConfig::from_settings(settings), deps).await
}

/// Local participant plus, for a student, a moderator hosting the stage.
pub struct Loopback {
    pub air: InMemoryAir,
    pub local: StageArbiter,
    pub host: Option<StageArbiter>,
}

impl Loopback {
    /// Start every arbiter. The host goes first so the stage is already open.
    pub async fn start(&self) -> Result<()> {
        if let Some(host) = &self.host {
            host.start().await?;
        }
        self.local.start().await
    }

    pub async fn teardown(&self) -> Result<()> {
        self.local.teardown().await?;
        if let Some(host) = &self.host {
            host.teardown().await?;
        }
        Ok(())
    }
}

pub async fn wire_loopback(
    config: &AppConfig,
    participant: Participant,
    observer: Arc<dyn StageObserverPort>,
) -> Result<Loopback> {
    let air = InMemoryAir::new();
    let clock: Arc<dyn ClockPort> = Arc::new(SystemClock);

    let host = if participant.is_moderator() {
        None
    } else {
        let moderator = Participant::moderator(
            LOOPBACK_MODERATOR,
            participant.course_id.clone(),
            participant.critique_id.clone(),
        );
        let host_observer = Arc::new(TracingObserver::new(moderator.clone()));
        Some(spawn_on_air(&air, moderator, &config.stage, clock.clone(), host_observer).await?)
    };
    let local = spawn_on_air(&air, participant, &config.stage, clock, observer).await?;

    Ok(Loopback { air, local, host })
}
