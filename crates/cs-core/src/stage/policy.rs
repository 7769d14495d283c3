use std::time::Duration;

use crate::config::StageSettings;
use crate::presence::ClockTrust;

/// Stage protocol timing policy
///
/// 舞台协议的时间策略。`grant_ceiling` 恒为两倍的 `service_timeout`。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePolicy {
    /// Single restart delay and invitation timeout.
    pub service_timeout: Duration,
    /// Records older than this are phantoms.
    pub phantom_age: Duration,
    pub clock_trust: ClockTrust,
}

impl Default for StagePolicy {
    fn default() -> Self {
        Self::from_settings(&StageSettings::default())
    }
}

impl StagePolicy {
    pub fn from_settings(settings: &StageSettings) -> Self {
        Self {
            service_timeout: settings.service_timeout.max(Duration::from_millis(1)),
            phantom_age: settings.phantom_age,
            clock_trust: settings.clock_trust,
        }
    }

    /// Ceiling for a pending grant or hand-raise.
    pub fn grant_ceiling(&self) -> Duration {
        self.service_timeout * 2
    }

    pub fn phantom_age_secs(&self) -> i64 {
        self.phantom_age.as_secs().min(i64::MAX as u64) as i64
    }
}
