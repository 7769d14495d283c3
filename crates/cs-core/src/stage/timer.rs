//! Deferred actions and their generation book-keeping.
//!
//! Every scheduled timer belongs to a slot. Arming a slot supersedes whatever was
//! armed there before; a fire only counts if it carries the slot's current
//! generation, so superseded deferred actions are inert.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::policy::StagePolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimerSlot {
    /// Delayed advertise/browse restarts.
    Channels,
    /// Moderator's pending grant ceiling.
    Grant,
    /// Student's pending hand-raise ceiling.
    HandRaise,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StageTimer {
    /// Moderator: advertise status, browse hands if still available.
    RestartServices,
    /// Moderator: advertise status with the confirmed holder.
    Readvertise,
    /// Student: browse status again.
    ResumeBrowsing,
    GrantCeiling,
    HandRaiseCeiling,
}

impl StageTimer {
    pub fn slot(&self) -> TimerSlot {
        match self {
            StageTimer::RestartServices | StageTimer::Readvertise | StageTimer::ResumeBrowsing => {
                TimerSlot::Channels
            }
            StageTimer::GrantCeiling => TimerSlot::Grant,
            StageTimer::HandRaiseCeiling => TimerSlot::HandRaise,
        }
    }

    /// Delay this timer is normally scheduled with.
    pub fn delay(&self, policy: &StagePolicy) -> Duration {
        match self {
            StageTimer::RestartServices | StageTimer::ResumeBrowsing => policy.service_timeout,
            StageTimer::Readvertise | StageTimer::GrantCeiling | StageTimer::HandRaiseCeiling => {
                policy.grant_ceiling()
            }
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimerBook {
    next_generation: u64,
    armed: HashMap<TimerSlot, (StageTimer, u64)>,
}

impl TimerBook {
    /// Arm `timer` in its slot and return the generation the fire must carry.
    pub fn arm(&mut self, timer: StageTimer) -> u64 {
        self.next_generation += 1;
        self.armed
            .insert(timer.slot(), (timer, self.next_generation));
        self.next_generation
    }

    /// Returns true if something was armed in the slot.
    pub fn disarm(&mut self, slot: TimerSlot) -> bool {
        self.armed.remove(&slot).is_some()
    }

    pub fn armed(&self, slot: TimerSlot) -> Option<StageTimer> {
        self.armed.get(&slot).map(|(timer, _)| *timer)
    }

    /// Consume a fire. Stale or unknown fires return false and change nothing.
    pub fn take_if_current(&mut self, timer: StageTimer, generation: u64) -> bool {
        let slot = timer.slot();
        match self.armed.get(&slot) {
            Some(&(armed, current)) if armed == timer && current == generation => {
                self.armed.remove(&slot);
                true
            }
            _ => false,
        }
    }

    pub fn armed_slots(&self) -> Vec<TimerSlot> {
        self.armed.keys().copied().collect()
    }
}
