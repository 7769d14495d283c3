//! Student strategy
//!
//! ```text
//! Browsing ──open record──▶ StageAvailable ──raise──▶ Requesting ──connected──▶ OnStage
//!    ▲                           ▲                         │                        │
//!    │                           └──── denied / ceiling ◀──┘                        │
//!    └──────────────────────────── not-connected / drop ◀───────────────────────────┘
//! ```
//!
//! Status records pass the freshness gate before they are interpreted; a
//! phantom stops browsing and resumes it one service timeout later.

use tracing::{debug, info, warn};

use crate::ids::{InvitationId, PeerRef, PersonaId};
use crate::participant::Role;
use crate::presence::{Freshness, PresenceRecord};
use crate::session::{InviteContext, SessionState};

use super::state::HandRaiseTicket;
use super::strategy::{StageParticipant, Transition};
use super::timer::{StageTimer, TimerSlot};

#[derive(Debug, Default, Clone, Copy)]
pub struct StudentStage;

/// What a trusted status record says about the stage.
#[derive(Debug, PartialEq, Eq)]
struct StatusView {
    available: bool,
    presenting: Option<PersonaId>,
    critique_for: Option<PersonaId>,
}

impl StudentStage {
    fn interpret(t: &Transition<'_>, record: &PresenceRecord) -> StatusView {
        match (&record.persona_id, &record.critique_for) {
            (None, None) => StatusView {
                available: true,
                presenting: None,
                critique_for: None,
            },
            (None, Some(subject)) => StatusView {
                // a critique of my own work is not mine to take
                available: !t.is_me(subject),
                presenting: None,
                critique_for: Some(subject.clone()),
            },
            (Some(holder), critique_for) if t.is_me(holder) => StatusView {
                available: false,
                presenting: None,
                critique_for: critique_for.clone(),
            },
            (Some(holder), critique_for) => StatusView {
                available: false,
                presenting: Some(holder.clone()),
                critique_for: critique_for.clone(),
            },
        }
    }

    fn lower_hand(t: &mut Transition<'_>, chosen: bool) {
        t.resolve_hand(chosen);
        t.stop_advertising();
    }

    fn leave_stage(t: &mut Transition<'_>) {
        info!("leaving stage");
        t.state.presenting = None;
        t.state.critique_for = None;
        t.state.available = false;
        t.state.connected_peer = None;

        t.stop_channels();
        t.disconnect();
        t.schedule(StageTimer::ResumeBrowsing);
        t.notify();
    }
}

impl StageParticipant for StudentStage {
    fn role(&self) -> Role {
        Role::Student
    }

    fn start(&self, t: &mut Transition<'_>) {
        t.state.available = false;
        t.start_browsing();
        t.notify();
    }

    fn raise_hand(&self, t: &mut Transition<'_>, ticket: HandRaiseTicket) {
        if !t.state.available || t.state.hand_raise.is_some() {
            debug!("stage unavailable, hand-raise denied");
            t.deny(ticket);
            return;
        }

        t.state.hand_raise = Some(ticket);
        t.state.available = false;
        t.start_advertising();
        t.schedule(StageTimer::HandRaiseCeiling);
        t.notify();
    }

    fn drop_hand(&self, t: &mut Transition<'_>) {
        if t.state.hand_raise.is_some() {
            t.resolve_hand(false);
        }
        t.state.presenting = None;
        t.state.critique_for = None;
        t.state.available = false;
        t.state.connected_peer = None;

        t.stop_channels();
        t.disconnect();
        // restart the browser so the current status is reported again
        t.cancel(TimerSlot::Channels);
        t.start_browsing();
        t.notify();
    }

    fn release_stage(&self, _t: &mut Transition<'_>) {
        warn!("release_stage is moderator-only, ignored");
    }

    fn peer_found(&self, t: &mut Transition<'_>, peer: &PeerRef, record: PresenceRecord) {
        let Some(timestamp) = record.timestamp else {
            return;
        };

        let max_age = t.policy.phantom_age_secs();
        let trust = t.policy.clock_trust;
        let now = t.now_secs();
        if let Freshness::Phantom(reason) =
            t.state.freshness.assess(timestamp, now, max_age, trust)
        {
            debug!(%peer, ?reason, "phantom status record discarded");
            t.stop_browsing();
            t.schedule(StageTimer::ResumeBrowsing);
            return;
        }

        if t.on_stage() {
            // the session is authoritative while on stage
            t.state.connected_peer = Some(peer.clone());
            return;
        }

        let view = Self::interpret(t, &record);
        let names_me = record
            .persona_id
            .as_ref()
            .is_some_and(|holder| t.is_me(holder));

        if t.state.hand_raise.is_some() {
            if view.available || names_me {
                // still in the running; the session will settle it
                t.state.connected_peer = Some(peer.clone());
                return;
            }
            info!(holder = ?view.presenting, "stage went elsewhere, hand-raise denied");
            Self::lower_hand(t, false);
            t.notify();
        }

        let unchanged = t.state.available == view.available
            && t.state.presenting == view.presenting
            && t.state.critique_for == view.critique_for
            && t.state.connected_peer.as_ref() == Some(peer);

        t.state.available = view.available;
        t.state.presenting = view.presenting;
        t.state.critique_for = view.critique_for;
        t.state.connected_peer = Some(peer.clone());

        if !unchanged {
            t.notify();
        }
    }

    fn peer_lost(&self, t: &mut Transition<'_>, peer: &PeerRef) {
        if t.on_stage() {
            return;
        }

        // The moderator stops advertising while it grants the stage to us.
        let session_live = matches!(
            t.state.session_with(peer),
            Some(SessionState::Connecting | SessionState::Connected)
        );
        if t.state.hand_raise.is_some() && session_live {
            debug!(%peer, "moderator quiet while granting");
            return;
        }

        if t.state.connected_peer.as_ref() == Some(peer) {
            t.state.presenting = None;
            t.state.critique_for = None;
            t.state.available = false;
            t.state.connected_peer = None;
            t.notify();
        }

        if t.state.hand_raise.is_some() {
            info!(%peer, "moderator went away while hand raised, denied");
            Self::lower_hand(t, false);
            t.state.available = false;
            t.notify();
        }
    }

    fn invitation(
        &self,
        t: &mut Transition<'_>,
        invitation: InvitationId,
        peer: &PeerRef,
        context: Option<&[u8]>,
    ) {
        if let Err(err) = InviteContext::validate_for(context, t.participant) {
            warn!(%invitation, %peer, error = %err, "invitation rejected");
            t.respond(invitation, false);
            return;
        }

        let busy_elsewhere = t
            .state
            .session
            .as_ref()
            .is_some_and(|link| &link.peer != peer && link.state == SessionState::Connected);
        if busy_elsewhere {
            warn!(%invitation, %peer, "already in a session, invitation declined");
            t.respond(invitation, false);
            return;
        }

        if t.state.hand_raise.is_none() {
            debug!(%invitation, %peer, "accepting invitation without a raised hand");
        }
        t.respond(invitation, true);
        t.track_session(peer, SessionState::Connecting);
    }

    fn session_changed(&self, t: &mut Transition<'_>, peer: &PeerRef, state: SessionState) {
        if t.state.session_with(peer).is_none() {
            debug!(%peer, %state, "session change for untracked peer ignored");
            return;
        }

        match state {
            SessionState::Connecting => t.track_session(peer, state),
            SessionState::Connected => {
                t.track_session(peer, state);
                if t.state.hand_raise.is_some() {
                    info!("stage granted");
                    t.state.presenting = Some(t.participant.persona_id.clone());
                    t.state.available = false;
                    t.state.connected_peer = Some(peer.clone());
                    Self::lower_hand(t, true);

                    t.stop_browsing();
                    t.schedule(StageTimer::ResumeBrowsing);
                    t.notify();
                } else if !t.on_stage() {
                    warn!(%peer, "stray session without a raised hand, disconnecting");
                    t.disconnect();
                }
            }
            SessionState::NotConnected => {
                t.state.session = None;
                if t.state.hand_raise.is_some() {
                    info!("session failed, hand-raise denied");
                    Self::lower_hand(t, false);
                    t.state.presenting = None;
                    t.state.available = false;
                    t.notify();
                } else if t.on_stage() {
                    Self::leave_stage(t);
                }
            }
        }
    }

    fn timer_fired(&self, t: &mut Transition<'_>, timer: StageTimer) {
        match timer {
            StageTimer::ResumeBrowsing => t.start_browsing(),
            StageTimer::HandRaiseCeiling => {
                if t.state.hand_raise.is_none() {
                    return;
                }
                warn!("hand-raise not answered in time, denied");
                Self::lower_hand(t, false);
                t.state.presenting = None;
                t.state.available = t.state.connected_peer.is_some();
                t.notify();
            }
            StageTimer::RestartServices | StageTimer::Readvertise | StageTimer::GrantCeiling => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::Participant;
    use crate::presence::{ChannelKind, DiscoveryInfo, PresenceRecord};
    use crate::stage::{
        StageAction, StageEvent, StageOutlook, StagePolicy, StageSnapshot, StageStateMachine,
    };

    const NOW: i64 = 1_700_000_000;
    const MODERATOR: &str = "peer-mod";

    fn machine() -> StageStateMachine {
        let mut sm = StageStateMachine::new(
            Participant::student("alice", "101", "7"),
            StagePolicy::default(),
        );
        sm.handle_event(StageEvent::Start, NOW);
        sm
    }

    fn status(holder: Option<&str>, critique_for: Option<&str>, ts: i64) -> DiscoveryInfo {
        PresenceRecord {
            course_id: "101".into(),
            critique_id: "7".into(),
            persona_id: holder.map(PersonaId::new),
            critique_for: critique_for.map(PersonaId::new),
            timestamp: Some(ts),
        }
        .to_discovery_info()
    }

    fn observe(
        sm: &mut StageStateMachine,
        info: DiscoveryInfo,
        now: i64,
    ) -> (StageSnapshot, Vec<StageAction>) {
        sm.handle_event(
            StageEvent::PeerFound {
                channel: ChannelKind::Status,
                peer: PeerRef::new(MODERATOR),
                info,
            },
            now,
        )
    }

    fn session(sm: &mut StageStateMachine, state: SessionState) -> (StageSnapshot, Vec<StageAction>) {
        sm.handle_event(
            StageEvent::SessionChanged {
                peer: PeerRef::new(MODERATOR),
                state,
            },
            NOW,
        )
    }

    fn invite(sm: &mut StageStateMachine, context: &str) -> Vec<StageAction> {
        sm.handle_event(
            StageEvent::InvitationReceived {
                invitation: InvitationId::new(1),
                peer: PeerRef::new(MODERATOR),
                context: Some(context.as_bytes().to_vec()),
            },
            NOW,
        )
        .1
    }

    fn raise(sm: &mut StageStateMachine, ticket: u64) -> Vec<StageAction> {
        sm.handle_event(
            StageEvent::RaiseHand {
                ticket: HandRaiseTicket(ticket),
            },
            NOW,
        )
        .1
    }

    fn resolved(actions: &[StageAction], ticket: u64, chosen: bool) -> bool {
        actions.iter().any(|a| {
            matches!(a, StageAction::ResolveHandRaise { ticket: t, chosen: c }
                if *t == HandRaiseTicket(ticket) && *c == chosen)
        })
    }

    #[test]
    fn start_browses_status_with_no_view() {
        let mut sm = StageStateMachine::new(
            Participant::student("alice", "101", "7"),
            StagePolicy::default(),
        );
        let (snapshot, actions) = sm.handle_event(StageEvent::Start, NOW);
        assert!(!snapshot.available);
        assert!(actions.iter().any(|a| matches!(
            a,
            StageAction::StartBrowsing {
                channel: ChannelKind::Status
            }
        )));
    }

    #[test]
    fn open_record_makes_stage_available() {
        let mut sm = machine();
        let (snapshot, actions) = observe(&mut sm, status(None, None, NOW), NOW);
        assert!(snapshot.available);
        assert_eq!(snapshot.holder, None);
        assert!(actions.iter().any(|a| matches!(a, StageAction::Notify(_))));
        assert_eq!(sm.state().last_connect_time(), Some(NOW));
    }

    #[test]
    fn repeated_identical_record_does_not_notify() {
        let mut sm = machine();
        observe(&mut sm, status(None, None, NOW), NOW);
        let (_, actions) = observe(&mut sm, status(None, None, NOW), NOW + 1);
        assert!(!actions.iter().any(|a| matches!(a, StageAction::Notify(_))));
    }

    #[test]
    fn holder_record_means_watching() {
        let mut sm = machine();
        let (snapshot, _) = observe(&mut sm, status(Some("bob"), None, NOW), NOW);
        assert!(!snapshot.available);
        assert_eq!(snapshot.holder, Some(PersonaId::new("bob")));
    }

    #[test]
    fn critique_of_other_is_open_and_critique_of_me_is_not() {
        let mut sm = machine();
        let (snapshot, _) = observe(&mut sm, status(None, Some("bob"), NOW), NOW);
        assert!(snapshot.available);
        assert_eq!(snapshot.critique_for, Some(PersonaId::new("bob")));

        let (snapshot, _) = observe(&mut sm, status(None, Some("alice"), NOW + 1), NOW + 1);
        assert!(!snapshot.available);
        assert_eq!(snapshot.holder, None);
        assert_eq!(snapshot.critique_for, Some(PersonaId::new("alice")));
    }

    #[test]
    fn out_of_order_record_is_discarded_and_browsing_restarts() {
        let mut sm = machine();
        observe(&mut sm, status(Some("bob"), None, NOW + 2), NOW + 2);
        let (snapshot, actions) = observe(&mut sm, status(None, None, NOW + 1), NOW + 2);

        assert_eq!(snapshot.holder, Some(PersonaId::new("bob")));
        assert!(actions.iter().any(|a| matches!(
            a,
            StageAction::StopBrowsing {
                channel: ChannelKind::Status
            }
        )));
        assert!(actions.iter().any(|a| matches!(
            a,
            StageAction::ScheduleTimer {
                timer: StageTimer::ResumeBrowsing,
                ..
            }
        )));
    }

    #[test]
    fn expired_record_resets_freshness() {
        let mut sm = machine();
        observe(&mut sm, status(None, None, NOW), NOW);
        let (snapshot, _) = observe(&mut sm, status(Some("bob"), None, NOW + 1), NOW + 30);
        assert!(snapshot.available, "expired record must not apply");
        assert_eq!(sm.state().last_connect_time(), None);
    }

    #[test]
    fn raise_on_unavailable_stage_is_denied_immediately() {
        let mut sm = machine();
        observe(&mut sm, status(Some("bob"), Some("carol"), NOW), NOW);
        let actions = raise(&mut sm, 4);
        assert!(resolved(&actions, 4, false));
        assert!(!actions
            .iter()
            .any(|a| matches!(a, StageAction::StartAdvertising { .. })));
    }

    #[test]
    fn raise_advertises_hand_and_arms_ceiling() {
        let mut sm = machine();
        observe(&mut sm, status(None, None, NOW), NOW);
        let actions = raise(&mut sm, 1);

        assert!(actions.iter().any(|a| matches!(
            a,
            StageAction::StartAdvertising { channel: ChannelKind::Hand, record }
                if record.persona_id == Some(PersonaId::new("alice")) && record.critique_for.is_none()
        )));
        assert!(actions.iter().any(|a| matches!(
            a,
            StageAction::ScheduleTimer {
                timer: StageTimer::HandRaiseCeiling,
                ..
            }
        )));
        assert!(!sm.snapshot().available);
        assert!(sm.snapshot().hand_raised);
    }

    #[test]
    fn invitation_then_connected_puts_me_on_stage() {
        let mut sm = machine();
        observe(&mut sm, status(None, None, NOW), NOW);
        raise(&mut sm, 1);

        let actions = invite(&mut sm, "101:7:mod");
        assert!(actions.iter().any(|a| matches!(
            a,
            StageAction::RespondInvitation { accept: true, .. }
        )));

        let (snapshot, actions) = session(&mut sm, SessionState::Connected);
        assert!(resolved(&actions, 1, true));
        assert_eq!(snapshot.holder, Some(PersonaId::new("alice")));
        assert!(!snapshot.available);
        assert!(!snapshot.hand_raised);
        assert!(actions.iter().any(|a| matches!(
            a,
            StageAction::StopAdvertising {
                channel: ChannelKind::Hand
            }
        )));
    }

    #[test]
    fn moderator_going_quiet_during_grant_does_not_deny() {
        let mut sm = machine();
        observe(&mut sm, status(None, None, NOW), NOW);
        raise(&mut sm, 1);
        invite(&mut sm, "101:7:mod");

        let (_, actions) = sm.handle_event(
            StageEvent::PeerLost {
                channel: ChannelKind::Status,
                peer: PeerRef::new(MODERATOR),
            },
            NOW,
        );
        assert!(!resolved(&actions, 1, false));
        assert!(sm.snapshot().hand_raised);
    }

    #[test]
    fn moderator_lost_without_session_denies() {
        let mut sm = machine();
        observe(&mut sm, status(None, None, NOW), NOW);
        raise(&mut sm, 1);
        let (snapshot, actions) = sm.handle_event(
            StageEvent::PeerLost {
                channel: ChannelKind::Status,
                peer: PeerRef::new(MODERATOR),
            },
            NOW,
        );
        assert!(resolved(&actions, 1, false));
        assert!(!snapshot.available);
        assert!(!snapshot.hand_raised);
    }

    #[test]
    fn session_failure_while_requesting_denies() {
        let mut sm = machine();
        observe(&mut sm, status(None, None, NOW), NOW);
        raise(&mut sm, 1);
        invite(&mut sm, "101:7:mod");
        let (snapshot, actions) = session(&mut sm, SessionState::NotConnected);
        assert!(resolved(&actions, 1, false));
        assert_eq!(snapshot.holder, None);
    }

    #[test]
    fn someone_else_granted_denies_pending_hand() {
        let mut sm = machine();
        observe(&mut sm, status(None, None, NOW), NOW);
        raise(&mut sm, 1);
        let (snapshot, actions) = observe(&mut sm, status(Some("bob"), None, NOW + 3), NOW + 3);
        assert!(resolved(&actions, 1, false));
        assert_eq!(snapshot.holder, Some(PersonaId::new("bob")));
        assert!(actions.iter().any(|a| matches!(
            a,
            StageAction::StopAdvertising {
                channel: ChannelKind::Hand
            }
        )));
    }

    #[test]
    fn hand_raise_ceiling_denies() {
        let mut sm = machine();
        observe(&mut sm, status(None, None, NOW), NOW);
        let actions = raise(&mut sm, 1);
        let generation = actions
            .iter()
            .find_map(|a| match a {
                StageAction::ScheduleTimer {
                    timer: StageTimer::HandRaiseCeiling,
                    generation,
                    ..
                } => Some(*generation),
                _ => None,
            })
            .unwrap();

        let (snapshot, actions) = sm.handle_event(
            StageEvent::TimerFired {
                timer: StageTimer::HandRaiseCeiling,
                generation,
            },
            NOW + 10,
        );
        assert!(resolved(&actions, 1, false));
        assert!(snapshot.available, "moderator still visible, stage open");
        assert!(!snapshot.hand_raised);
    }

    #[test]
    fn invalid_context_is_rejected() {
        let mut sm = machine();
        for context in ["101:7", "101:8:mod", "101:7:", "a:b:c:d"] {
            let actions = invite(&mut sm, context);
            assert!(
                actions.iter().any(|a| matches!(
                    a,
                    StageAction::RespondInvitation { accept: false, .. }
                )),
                "context {context} should be rejected"
            );
        }
        assert!(sm.state().session.is_none());
    }

    #[test]
    fn on_stage_session_loss_leaves_stage() {
        let mut sm = machine();
        observe(&mut sm, status(None, None, NOW), NOW);
        raise(&mut sm, 1);
        invite(&mut sm, "101:7:mod");
        session(&mut sm, SessionState::Connected);

        let (snapshot, actions) = session(&mut sm, SessionState::NotConnected);
        assert_eq!(snapshot.holder, None);
        assert!(!snapshot.available);
        assert!(actions
            .iter()
            .any(|a| matches!(a, StageAction::Disconnect)));
        assert!(actions.iter().any(|a| matches!(
            a,
            StageAction::ScheduleTimer {
                timer: StageTimer::ResumeBrowsing,
                ..
            }
        )));
    }

    #[test]
    fn on_stage_ignores_status_loss() {
        let mut sm = machine();
        observe(&mut sm, status(None, None, NOW), NOW);
        raise(&mut sm, 1);
        invite(&mut sm, "101:7:mod");
        session(&mut sm, SessionState::Connected);

        let (snapshot, _) = sm.handle_event(
            StageEvent::PeerLost {
                channel: ChannelKind::Status,
                peer: PeerRef::new(MODERATOR),
            },
            NOW,
        );
        assert_eq!(snapshot.holder, Some(PersonaId::new("alice")));
    }

    #[test]
    fn stray_connection_is_disconnected() {
        let mut sm = machine();
        observe(&mut sm, status(None, None, NOW), NOW);
        invite(&mut sm, "101:7:mod");
        let (snapshot, actions) = session(&mut sm, SessionState::Connected);
        assert_eq!(snapshot.holder, None);
        assert!(actions
            .iter()
            .any(|a| matches!(a, StageAction::Disconnect)));
    }

    #[test]
    fn drop_hand_restarts_browser() {
        let mut sm = machine();
        observe(&mut sm, status(None, None, NOW), NOW);
        let (snapshot, actions) = sm.handle_event(StageEvent::DropHand, NOW);
        assert!(!snapshot.available);
        let stop = actions
            .iter()
            .position(|a| matches!(a, StageAction::StopBrowsing { .. }));
        let start = actions
            .iter()
            .position(|a| matches!(a, StageAction::StartBrowsing { .. }));
        assert!(stop.is_some() && start.is_some() && stop < start);
    }

    #[test]
    fn holder_critiquing_my_work_reads_as_critique_of_mine() {
        let mut sm = machine();
        observe(&mut sm, status(None, None, NOW), NOW);
        raise(&mut sm, 2);

        let record = status(Some("bob"), Some("alice"), NOW + 1);
        let (snapshot, actions) = observe(&mut sm, record, NOW + 1);
        assert!(resolved(&actions, 2, false));
        assert!(!snapshot.available);
        assert_eq!(
            snapshot.outlook(sm.participant()),
            StageOutlook::CritiqueOfMine {
                critic: Some(PersonaId::new("bob"))
            }
        );
    }

    #[test]
    fn release_stage_is_ignored() {
        let mut sm = machine();
        observe(&mut sm, status(None, None, NOW), NOW);
        let (snapshot, actions) = sm.handle_event(StageEvent::ReleaseStage, NOW);
        assert!(snapshot.available);
        assert_eq!(actions.len(), 1);
    }
}
