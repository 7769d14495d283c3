//! Stage state machine
//!
//! 舞台仲裁状态机:纯函数式转换 `(state, event) -> (state, actions)`,
//! 不执行任何 I/O。角色相关规则委托给 [`StageParticipant`] 策略。

use tracing::debug;

use crate::participant::{Participant, Role};
use crate::presence::{ChannelKind, PresenceRecord};

use super::action::StageAction;
use super::event::StageEvent;
use super::moderator::ModeratorStage;
use super::policy::StagePolicy;
use super::state::{HandRaiseTicket, Lifecycle, StageSnapshot, StageState};
use super::strategy::{StageParticipant, Transition};
use super::student::StudentStage;
use super::timer::TimerBook;

#[derive(Debug)]
pub struct StageStateMachine {
    participant: Participant,
    policy: StagePolicy,
    state: StageState,
    timers: TimerBook,
    strategy: Box<dyn StageParticipant>,
}

impl StageStateMachine {
    /// Build a machine whose strategy follows the participant's role.
    pub fn new(participant: Participant, policy: StagePolicy) -> Self {
        let strategy: Box<dyn StageParticipant> = match participant.role {
            Role::Moderator => Box::new(ModeratorStage),
            Role::Student => Box::new(StudentStage),
        };
        Self::with_strategy(participant, policy, strategy)
    }

    pub fn with_strategy(
        participant: Participant,
        policy: StagePolicy,
        strategy: Box<dyn StageParticipant>,
    ) -> Self {
        Self {
            participant,
            policy,
            state: StageState::default(),
            timers: TimerBook::default(),
            strategy,
        }
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    pub fn policy(&self) -> &StagePolicy {
        &self.policy
    }

    pub fn state(&self) -> &StageState {
        &self.state
    }

    pub fn snapshot(&self) -> StageSnapshot {
        self.state.snapshot()
    }

    /// 处理事件,返回新的快照与待执行动作
    ///
    /// The first action is always a [`StageAction::LogTransition`].
    pub fn handle_event(
        &mut self,
        event: StageEvent,
        now_secs: i64,
    ) -> (StageSnapshot, Vec<StageAction>) {
        let old_state = self.state.summary();
        let event_debug = format!("{:?}", event);

        let actions = self.transition(event, now_secs);

        // 记录状态转换 (用于审计)
        let log_action = StageAction::LogTransition {
            old_state,
            event: event_debug,
            new_state: self.state.summary(),
        };

        let mut all_actions = vec![log_action];
        all_actions.extend(actions);
        (self.state.snapshot(), all_actions)
    }

    /// 状态转换逻辑 (核心实现)
    fn transition(&mut self, event: StageEvent, now_secs: i64) -> Vec<StageAction> {
        let strategy = &self.strategy;
        let mut t = Transition::new(
            &mut self.state,
            &self.participant,
            &self.policy,
            &mut self.timers,
            now_secs,
        );

        match (t.state.lifecycle, event) {
            (Lifecycle::Closed, StageEvent::RaiseHand { ticket }) => t.deny(ticket),
            (Lifecycle::Closed, event) => {
                debug!(event = event.name(), "stage closed, event ignored");
            }

            (Lifecycle::Idle, StageEvent::Start) => {
                t.state.lifecycle = Lifecycle::Running;
                strategy.start(&mut t);
            }
            (Lifecycle::Running, StageEvent::Start) => {
                debug!("already started");
            }
            (_, StageEvent::Shutdown) => Self::shut_down(&mut t),
            (Lifecycle::Idle, StageEvent::RaiseHand { ticket }) => {
                debug!("not started, hand-raise denied");
                t.deny(ticket);
            }
            (Lifecycle::Idle, event) => {
                debug!(event = event.name(), "not started, event ignored");
            }

            (Lifecycle::Running, StageEvent::RaiseHand { ticket }) => {
                strategy.raise_hand(&mut t, ticket)
            }
            (Lifecycle::Running, StageEvent::DropHand) => strategy.drop_hand(&mut t),
            (Lifecycle::Running, StageEvent::DroppingHand) => strategy.dropping_hand(&mut t),
            (Lifecycle::Running, StageEvent::ReleaseStage) => strategy.release_stage(&mut t),

            (Lifecycle::Running, StageEvent::PeerFound {
                channel,
                peer,
                info,
            }) => {
                if !Self::browses(t.participant, channel) {
                    debug!(%channel, %peer, "record on a channel not browsed, ignored");
                } else {
                    match PresenceRecord::from_discovery_info(&info)
                        .and_then(|record| record.validate(t.participant).map(|()| record))
                    {
                        Ok(record) => strategy.peer_found(&mut t, &peer, record),
                        Err(err) => {
                            debug!(%peer, error = %err, "presence record rejected");
                        }
                    }
                }
            }
            (Lifecycle::Running, StageEvent::PeerLost { channel, peer }) => {
                if Self::browses(t.participant, channel) {
                    strategy.peer_lost(&mut t, &peer);
                }
            }
            (Lifecycle::Running, StageEvent::InvitationReceived {
                invitation,
                peer,
                context,
            }) => strategy.invitation(&mut t, invitation, &peer, context.as_deref()),
            (Lifecycle::Running, StageEvent::SessionChanged { peer, state }) => {
                strategy.session_changed(&mut t, &peer, state)
            }
            (Lifecycle::Running, StageEvent::TimerFired { timer, generation }) => {
                if t.take_timer(timer, generation) {
                    strategy.timer_fired(&mut t, timer);
                } else {
                    debug!(?timer, generation, "superseded timer fire ignored");
                }
            }
        }

        t.finish()
    }

    fn browses(participant: &Participant, channel: ChannelKind) -> bool {
        ChannelKind::browsed_by(participant.role) == channel
    }

    /// Teardown: every pending request is denied and every channel stopped.
    fn shut_down(t: &mut Transition<'_>) {
        t.resolve_hand(false);
        t.cancel_all();
        for channel in ChannelKind::ALL {
            t.emit(StageAction::StopAdvertising { channel });
            t.emit(StageAction::StopBrowsing { channel });
        }
        t.disconnect();
        t.state.available = false;
        t.state.pending_presenting = None;
        t.state.lifecycle = Lifecycle::Closed;
        t.notify();
    }
}

/// Ticket issued by the facade for the next hand-raise.
#[derive(Debug, Default)]
pub struct TicketCounter(u64);

impl TicketCounter {
    pub fn next(&mut self) -> HandRaiseTicket {
        self.0 += 1;
        HandRaiseTicket(self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{InvitationId, PeerRef, PersonaId};
    use crate::presence::DiscoveryInfo;
    use crate::session::SessionState;
    use crate::stage::StageTimer;

    const NOW: i64 = 1_700_000_000;

    fn student() -> StageStateMachine {
        StageStateMachine::new(
            Participant::student("alice", "101", "7"),
            StagePolicy::default(),
        )
    }

    fn moderator() -> StageStateMachine {
        StageStateMachine::new(
            Participant::moderator("mod", "101", "7"),
            StagePolicy::default(),
        )
    }

    fn open_status(ts: i64) -> DiscoveryInfo {
        PresenceRecord {
            course_id: "101".into(),
            critique_id: "7".into(),
            persona_id: None,
            critique_for: None,
            timestamp: Some(ts),
        }
        .to_discovery_info()
    }

    #[test]
    fn test_every_transition_starts_with_log() {
        let mut sm = moderator();
        let (_, actions) = sm.handle_event(StageEvent::Start, NOW);
        match &actions[0] {
            StageAction::LogTransition {
                old_state,
                event,
                new_state,
            } => {
                assert!(old_state.starts_with("Idle"));
                assert_eq!(event, "Start");
                assert!(new_state.starts_with("Running"));
            }
            other => panic!("expected LogTransition, got {:?}", other),
        }
    }

    #[test]
    fn test_events_before_start_are_ignored() {
        let mut sm = student();
        let (snapshot, actions) = sm.handle_event(
            StageEvent::PeerFound {
                channel: ChannelKind::Status,
                peer: PeerRef::new("m"),
                info: open_status(NOW),
            },
            NOW,
        );
        assert!(!snapshot.available);
        assert_eq!(actions.len(), 1);

        let (_, actions) = sm.handle_event(
            StageEvent::RaiseHand {
                ticket: HandRaiseTicket(9),
            },
            NOW,
        );
        assert!(actions.contains(&StageAction::ResolveHandRaise {
            ticket: HandRaiseTicket(9),
            chosen: false,
        }));
    }

    #[test]
    fn test_start_twice_is_idempotent() {
        let mut sm = moderator();
        sm.handle_event(StageEvent::Start, NOW);
        let (_, actions) = sm.handle_event(StageEvent::Start, NOW);
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_wrong_channel_is_ignored() {
        let mut sm = student();
        sm.handle_event(StageEvent::Start, NOW);
        let (snapshot, actions) = sm.handle_event(
            StageEvent::PeerFound {
                channel: ChannelKind::Hand,
                peer: PeerRef::new("m"),
                info: open_status(NOW),
            },
            NOW,
        );
        assert!(!snapshot.available);
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_out_of_scope_record_is_rejected() {
        let mut sm = student();
        sm.handle_event(StageEvent::Start, NOW);
        let mut info = open_status(NOW);
        info.insert("critiqueId".to_string(), "8".to_string());
        let (snapshot, _) = sm.handle_event(
            StageEvent::PeerFound {
                channel: ChannelKind::Status,
                peer: PeerRef::new("m"),
                info,
            },
            NOW,
        );
        assert!(!snapshot.available);
    }

    #[test]
    fn test_status_without_timestamp_is_rejected() {
        let mut sm = student();
        sm.handle_event(StageEvent::Start, NOW);
        let mut info = open_status(NOW);
        info.remove("timeStamp");
        let (snapshot, _) = sm.handle_event(
            StageEvent::PeerFound {
                channel: ChannelKind::Status,
                peer: PeerRef::new("m"),
                info,
            },
            NOW,
        );
        assert!(!snapshot.available);
        assert_eq!(sm.state().last_connect_time(), None);
    }

    #[test]
    fn test_shutdown_denies_pending_hand_and_closes() {
        let mut sm = student();
        sm.handle_event(StageEvent::Start, NOW);
        sm.handle_event(
            StageEvent::PeerFound {
                channel: ChannelKind::Status,
                peer: PeerRef::new("m"),
                info: open_status(NOW),
            },
            NOW,
        );
        sm.handle_event(
            StageEvent::RaiseHand {
                ticket: HandRaiseTicket(1),
            },
            NOW,
        );

        let (snapshot, actions) = sm.handle_event(StageEvent::Shutdown, NOW);
        assert!(snapshot.closed);
        assert!(!snapshot.available);
        assert!(!snapshot.hand_raised);
        assert!(actions.contains(&StageAction::ResolveHandRaise {
            ticket: HandRaiseTicket(1),
            chosen: false,
        }));
        assert!(actions.contains(&StageAction::Disconnect));
        assert!(actions
            .iter()
            .any(|a| matches!(a, StageAction::CancelTimer { .. })));
    }

    #[test]
    fn test_closed_machine_ignores_everything_but_denies_hands() {
        let mut sm = moderator();
        sm.handle_event(StageEvent::Start, NOW);
        sm.handle_event(StageEvent::Shutdown, NOW);

        let (snapshot, actions) = sm.handle_event(
            StageEvent::SessionChanged {
                peer: PeerRef::new("p"),
                state: SessionState::Connected,
            },
            NOW,
        );
        assert!(snapshot.closed);
        assert_eq!(actions.len(), 1);

        let (_, actions) = sm.handle_event(
            StageEvent::RaiseHand {
                ticket: HandRaiseTicket(2),
            },
            NOW,
        );
        assert!(actions.contains(&StageAction::ResolveHandRaise {
            ticket: HandRaiseTicket(2),
            chosen: false,
        }));

        let (_, actions) = sm.handle_event(StageEvent::Start, NOW);
        assert_eq!(actions.len(), 1, "a closed stage cannot restart");
    }

    #[test]
    fn test_unknown_timer_generation_is_inert() {
        let mut sm = moderator();
        sm.handle_event(StageEvent::Start, NOW);
        let (_, actions) = sm.handle_event(
            StageEvent::TimerFired {
                timer: StageTimer::RestartServices,
                generation: 42,
            },
            NOW,
        );
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_student_phantom_sequence() {
        // t1 < t2: the newer record wins and the older one can no longer apply
        let mut sm = student();
        sm.handle_event(StageEvent::Start, NOW);
        let held = PresenceRecord {
            course_id: "101".into(),
            critique_id: "7".into(),
            persona_id: Some(PersonaId::new("bob")),
            critique_for: None,
            timestamp: Some(NOW + 5),
        }
        .to_discovery_info();

        sm.handle_event(
            StageEvent::PeerFound {
                channel: ChannelKind::Status,
                peer: PeerRef::new("m"),
                info: held,
            },
            NOW + 5,
        );
        let (snapshot, _) = sm.handle_event(
            StageEvent::PeerFound {
                channel: ChannelKind::Status,
                peer: PeerRef::new("m"),
                info: open_status(NOW + 1),
            },
            NOW + 6,
        );
        assert_eq!(snapshot.holder, Some(PersonaId::new("bob")));
        assert!(!snapshot.available);
        assert_eq!(sm.state().last_connect_time(), Some(NOW + 5));
    }

    #[test]
    fn test_invitation_before_start_is_ignored() {
        let mut sm = student();
        let (_, actions) = sm.handle_event(
            StageEvent::InvitationReceived {
                invitation: InvitationId::new(3),
                peer: PeerRef::new("m"),
                context: Some(b"101:7:mod".to_vec()),
            },
            NOW,
        );
        assert_eq!(actions.len(), 1);
    }

    #[test]
    fn test_ticket_counter_is_monotonic() {
        let mut counter = TicketCounter::default();
        assert_eq!(counter.next(), HandRaiseTicket(1));
        assert_eq!(counter.next(), HandRaiseTicket(2));
    }
}
