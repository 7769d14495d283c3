//! Student-side staleness filter for moderator status broadcasts.
//!
//! A status record is a phantom when it is older than the last accepted one, or
//! older than the phantom age relative to the observer's clock. How "older than
//! the clock" is judged depends on [`ClockTrust`].

use serde::{Deserialize, Serialize};

/// How far the observer trusts the sender's wall clock
///
/// 时钟信任策略:
/// - `Local`: 直接比较 `now - ts`,假设设备时钟一致
/// - `SkewCompensated`: 学习会话内的最小偏移 `min(now - ts)`,以偏移校正后的年龄判断
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockTrust {
    Local,
    #[default]
    SkewCompensated,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhantomReason {
    /// Older than the last accepted record.
    OlderThanAccepted { timestamp: i64, last_accepted: i64 },
    /// Older than the phantom age. The gate is reset.
    Expired { age_secs: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Phantom(PhantomReason),
}

impl Freshness {
    pub fn is_fresh(&self) -> bool {
        matches!(self, Freshness::Fresh)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FreshnessGate {
    last_accepted: Option<i64>,
    offset_secs: Option<i64>,
}

impl FreshnessGate {
    pub fn last_accepted(&self) -> Option<i64> {
        self.last_accepted
    }

    pub fn reset(&mut self) {
        self.last_accepted = None;
        self.offset_secs = None;
    }

    /// Judge one record timestamp and update the gate.
    ///
    /// The first record after a reset is always accepted.
    pub fn assess(
        &mut self,
        timestamp: i64,
        now_secs: i64,
        max_age_secs: i64,
        trust: ClockTrust,
    ) -> Freshness {
        let Some(last_accepted) = self.last_accepted else {
            self.accept(timestamp, now_secs);
            return Freshness::Fresh;
        };

        let age_secs = self.age_of(timestamp, now_secs, trust);
        if age_secs > max_age_secs {
            self.reset();
            return Freshness::Phantom(PhantomReason::Expired { age_secs });
        }

        if timestamp < last_accepted {
            return Freshness::Phantom(PhantomReason::OlderThanAccepted {
                timestamp,
                last_accepted,
            });
        }

        self.accept(timestamp, now_secs);
        Freshness::Fresh
    }

    fn age_of(&self, timestamp: i64, now_secs: i64, trust: ClockTrust) -> i64 {
        let raw = now_secs.saturating_sub(timestamp);
        match trust {
            ClockTrust::Local => raw,
            ClockTrust::SkewCompensated => raw.saturating_sub(self.offset_secs.unwrap_or(0)),
        }
    }

    fn accept(&mut self, timestamp: i64, now_secs: i64) {
        let observed = now_secs.saturating_sub(timestamp);
        self.offset_secs = Some(match self.offset_secs {
            Some(offset) => offset.min(observed),
            None => observed,
        });
        self.last_accepted = Some(timestamp);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MAX_AGE: i64 = 10;

    #[test]
    fn test_first_record_is_always_accepted() {
        let mut gate = FreshnessGate::default();
        assert!(gate
            .assess(100, 500, MAX_AGE, ClockTrust::Local)
            .is_fresh());
        assert_eq!(gate.last_accepted(), Some(100));
    }

    #[test]
    fn test_out_of_order_record_is_phantom() {
        let mut gate = FreshnessGate::default();
        gate.assess(1_002, 1_003, MAX_AGE, ClockTrust::Local);

        let verdict = gate.assess(1_001, 1_003, MAX_AGE, ClockTrust::Local);
        assert_eq!(
            verdict,
            Freshness::Phantom(PhantomReason::OlderThanAccepted {
                timestamp: 1_001,
                last_accepted: 1_002,
            })
        );
        assert_eq!(gate.last_accepted(), Some(1_002));
    }

    #[test]
    fn test_equal_timestamp_is_not_phantom() {
        let mut gate = FreshnessGate::default();
        gate.assess(1_000, 1_000, MAX_AGE, ClockTrust::Local);
        assert!(gate
            .assess(1_000, 1_001, MAX_AGE, ClockTrust::Local)
            .is_fresh());
    }

    #[test]
    fn test_expired_record_resets_gate() {
        let mut gate = FreshnessGate::default();
        gate.assess(1_000, 1_000, MAX_AGE, ClockTrust::Local);

        let verdict = gate.assess(1_005, 1_016, MAX_AGE, ClockTrust::Local);
        assert_eq!(
            verdict,
            Freshness::Phantom(PhantomReason::Expired { age_secs: 11 })
        );
        assert_eq!(gate.last_accepted(), None);

        // after the reset the same record is taken at face value
        assert!(gate
            .assess(1_005, 1_016, MAX_AGE, ClockTrust::Local)
            .is_fresh());
    }

    #[test]
    fn test_skew_compensation_tolerates_lagging_sender_clock() {
        // sender clock runs 60s behind the observer
        let mut local = FreshnessGate::default();
        let mut compensated = FreshnessGate::default();

        local.assess(1_000, 1_060, MAX_AGE, ClockTrust::Local);
        compensated.assess(1_000, 1_060, MAX_AGE, ClockTrust::SkewCompensated);

        assert!(!local
            .assess(1_008, 1_068, MAX_AGE, ClockTrust::Local)
            .is_fresh());
        assert!(compensated
            .assess(1_008, 1_068, MAX_AGE, ClockTrust::SkewCompensated)
            .is_fresh());
    }

    #[test]
    fn test_skew_compensation_still_expires_old_records() {
        let mut gate = FreshnessGate::default();
        gate.assess(1_000, 1_001, MAX_AGE, ClockTrust::SkewCompensated);

        // same advertisement seen again 30s later
        let verdict = gate.assess(1_000, 1_031, MAX_AGE, ClockTrust::SkewCompensated);
        assert!(matches!(
            verdict,
            Freshness::Phantom(PhantomReason::Expired { .. })
        ));
    }
}
