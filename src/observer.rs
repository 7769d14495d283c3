//! Stage observers used by the binary.

use cs_core::ports::StageObserverPort;
use cs_core::{Participant, StageSnapshot};
use tracing::info;

use crate::console::outlook_line;

/// Prints every stage change as one line on stdout.
pub struct ConsoleObserver {
    participant: Participant,
}

impl ConsoleObserver {
    pub fn new(participant: Participant) -> Self {
        Self { participant }
    }
}

impl StageObserverPort for ConsoleObserver {
    fn on_stage_changed(&self, snapshot: &StageSnapshot) {
        println!("{}", outlook_line(&self.participant, snapshot));
    }
}

/// Records stage changes in the log only, for participants nobody types for.
pub struct TracingObserver {
    participant: Participant,
}

impl TracingObserver {
    pub fn new(participant: Participant) -> Self {
        Self { participant }
    }
}

impl StageObserverPort for TracingObserver {
    fn on_stage_changed(&self, snapshot: &StageSnapshot) {
        info!(
            persona = %self.participant.persona_id,
            available = snapshot.available,
            holder = ?snapshot.holder,
            critique_for = ?snapshot.critique_for,
            "stage changed"
        );
    }
}
