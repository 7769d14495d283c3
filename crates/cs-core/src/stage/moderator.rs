//! Moderator strategy
//!
//! ```text
//! StageOpen ──hand found──▶ Granting ──session connected──▶ Held(candidate)
//!     ▲                        │                               │
//!     └──── lost / not-connected / grant ceiling ◀─────────────┘
//! ```

use tracing::{debug, info, warn};

use crate::ids::{InvitationId, PeerRef};
use crate::participant::Role;
use crate::presence::PresenceRecord;
use crate::session::SessionState;

use super::state::HandRaiseTicket;
use super::strategy::{StageParticipant, Transition};
use super::timer::{StageTimer, TimerSlot};

#[derive(Debug, Default, Clone, Copy)]
pub struct ModeratorStage;

impl ModeratorStage {
    /// Back to `StageOpen`.
    ///
    /// A departing holder other than the moderator becomes the critique subject
    /// unless a critique is already designated.
    fn reopen(&self, t: &mut Transition<'_>) {
        if let Some(holder) = t.state.presenting.take() {
            if !t.is_me(&holder) && t.state.critique_for.is_none() {
                info!(subject = %holder, "critique designated");
                t.state.critique_for = Some(holder);
            }
        }
        t.state.pending_presenting = None;
        t.state.connected_peer = None;
        t.state.available = true;

        t.cancel(TimerSlot::Grant);
        t.stop_channels();
        t.disconnect();
        t.schedule(StageTimer::RestartServices);
        t.notify();
    }

    fn is_candidate_peer(t: &Transition<'_>, peer: &PeerRef) -> bool {
        t.state.connected_peer.as_ref() == Some(peer)
    }
}

impl StageParticipant for ModeratorStage {
    fn role(&self) -> Role {
        Role::Moderator
    }

    fn start(&self, t: &mut Transition<'_>) {
        t.state.available = true;
        t.start_advertising();
        t.start_browsing();
        t.notify();
    }

    fn raise_hand(&self, t: &mut Transition<'_>, ticket: HandRaiseTicket) {
        if !t.state.available {
            t.deny(ticket);
            return;
        }

        t.state.presenting = Some(t.participant.persona_id.clone());
        t.state.available = false;
        t.emit(super::StageAction::ResolveHandRaise {
            ticket,
            chosen: true,
        });

        t.stop_channels();
        t.disconnect();
        t.schedule(StageTimer::RestartServices);
        t.notify();
    }

    fn drop_hand(&self, t: &mut Transition<'_>) {
        t.stop_advertising();
        self.reopen(t);
    }

    fn release_stage(&self, t: &mut Transition<'_>) {
        t.state.critique_for = None;
        self.reopen(t);
    }

    fn peer_found(&self, t: &mut Transition<'_>, peer: &PeerRef, record: PresenceRecord) {
        let Some(candidate) = record.persona_id else {
            return;
        };
        if !t.state.available || t.state.connected_peer.is_some() {
            debug!(%candidate, %peer, "hand ignored, stage not open");
            return;
        }

        info!(%candidate, %peer, "granting stage");
        t.state.pending_presenting = Some(candidate);
        t.state.available = false;
        t.state.connected_peer = Some(peer.clone());

        t.invite(peer.clone());
        t.stop_advertising();
        t.schedule(StageTimer::GrantCeiling);
        t.notify();
    }

    fn peer_lost(&self, t: &mut Transition<'_>, peer: &PeerRef) {
        // Once the holder is confirmed only the session decides.
        let granting =
            t.state.pending_presenting.is_some() && t.state.presenting.is_none();
        if granting && Self::is_candidate_peer(t, peer) {
            info!(%peer, "candidate withdrew before confirmation");
            self.reopen(t);
        }
    }

    fn invitation(
        &self,
        t: &mut Transition<'_>,
        invitation: InvitationId,
        peer: &PeerRef,
        _context: Option<&[u8]>,
    ) {
        debug!(%invitation, %peer, "moderator declines inbound invitation");
        t.respond(invitation, false);
    }

    fn session_changed(&self, t: &mut Transition<'_>, peer: &PeerRef, state: SessionState) {
        if !Self::is_candidate_peer(t, peer) {
            return;
        }

        match state {
            SessionState::Connecting => t.track_session(peer, state),
            SessionState::Connected => {
                t.track_session(peer, state);
                let Some(candidate) = t.state.pending_presenting.take() else {
                    return;
                };
                info!(holder = %candidate, "stage held");
                t.state.presenting = Some(candidate);
                t.state.available = false;

                t.cancel(TimerSlot::Grant);
                t.stop_channels();
                t.schedule(StageTimer::Readvertise);
                t.notify();
            }
            SessionState::NotConnected => {
                info!(%peer, "session with stage peer ended");
                self.reopen(t);
            }
        }
    }

    fn timer_fired(&self, t: &mut Transition<'_>, timer: StageTimer) {
        match timer {
            StageTimer::RestartServices => {
                t.start_advertising();
                if t.state.available {
                    t.start_browsing();
                }
            }
            StageTimer::Readvertise => t.start_advertising(),
            StageTimer::GrantCeiling => {
                let confirmed = t
                    .state
                    .connected_peer
                    .as_ref()
                    .and_then(|peer| t.state.session_with(peer))
                    == Some(SessionState::Connected);
                if t.state.pending_presenting.is_some() && !confirmed {
                    warn!("grant not confirmed in time, reopening stage");
                    self.reopen(t);
                }
            }
            StageTimer::ResumeBrowsing | StageTimer::HandRaiseCeiling => {}
        }
    }
}
