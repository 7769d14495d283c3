//! # Arbiter Dependencies / 仲裁器依赖
//!
//! Parameter grouping for [`crate::StageArbiter::spawn`]. Not a builder: every
//! field is supplied by the caller.
//! 仅用于参数打包,无默认值。

use std::sync::Arc;

use cs_core::ports::{ClockPort, DiscoveryPort, SessionPort, StageObserverPort, TransportEventsPort};

pub struct StageDeps {
    // Transport / 传输
    pub discovery: Arc<dyn DiscoveryPort>,
    pub session: Arc<dyn SessionPort>,
    pub transport_events: Arc<dyn TransportEventsPort>,

    // Time / 时间
    pub clock: Arc<dyn ClockPort>,

    // Outward notification / 外部通知
    pub observer: Arc<dyn StageObserverPort>,
}
