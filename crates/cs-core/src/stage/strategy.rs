//! Role strategies
//!
//! 角色策略:主持人与学生对同一组输入有不同的转换规则,
//! 二者实现同一个 [`StageParticipant`] 接口,由状态机按角色组合。

use crate::ids::{InvitationId, PeerRef};
use crate::participant::{Participant, Role};
use crate::presence::{encode, ChannelKind, PresenceRecord};
use crate::session::{InviteContext, SessionState};

use super::action::StageAction;
use super::policy::StagePolicy;
use super::state::{HandRaiseTicket, SessionLink, StageState};
use super::timer::{StageTimer, TimerBook, TimerSlot};

/// Role-specific transition handlers.
///
/// Handlers mutate the state through the [`Transition`] and record effects on it;
/// they never perform I/O.
pub trait StageParticipant: Send + Sync + std::fmt::Debug {
    fn role(&self) -> Role;

    fn start(&self, t: &mut Transition<'_>);

    fn raise_hand(&self, t: &mut Transition<'_>, ticket: HandRaiseTicket);

    fn drop_hand(&self, t: &mut Transition<'_>);

    /// Graceful pre-stop while the turn's artifact is still being handled.
    fn dropping_hand(&self, t: &mut Transition<'_>) {
        t.stop_channels();
        t.disconnect();
    }

    fn release_stage(&self, t: &mut Transition<'_>);

    /// A validated record on the browsed channel.
    fn peer_found(&self, t: &mut Transition<'_>, peer: &PeerRef, record: PresenceRecord);

    /// An advertiser on the browsed channel went away.
    fn peer_lost(&self, t: &mut Transition<'_>, peer: &PeerRef);

    fn invitation(
        &self,
        t: &mut Transition<'_>,
        invitation: InvitationId,
        peer: &PeerRef,
        context: Option<&[u8]>,
    );

    fn session_changed(&self, t: &mut Transition<'_>, peer: &PeerRef, state: SessionState);

    /// A current (non-superseded) timer fire.
    fn timer_fired(&self, t: &mut Transition<'_>, timer: StageTimer);
}

/// One transition in progress: mutable state plus the effects recorded so far.
pub struct Transition<'a> {
    pub state: &'a mut StageState,
    pub participant: &'a Participant,
    pub policy: &'a StagePolicy,
    timers: &'a mut TimerBook,
    now_secs: i64,
    actions: Vec<StageAction>,
    notify: bool,
}

impl<'a> Transition<'a> {
    pub(crate) fn new(
        state: &'a mut StageState,
        participant: &'a Participant,
        policy: &'a StagePolicy,
        timers: &'a mut TimerBook,
        now_secs: i64,
    ) -> Self {
        Self {
            state,
            participant,
            policy,
            timers,
            now_secs,
            actions: Vec::new(),
            notify: false,
        }
    }

    pub fn now_secs(&self) -> i64 {
        self.now_secs
    }

    pub fn emit(&mut self, action: StageAction) {
        self.actions.push(action);
    }

    /// Request an outward notification once the transition completes.
    pub fn notify(&mut self) {
        self.notify = true;
    }

    pub fn is_me(&self, persona: &crate::ids::PersonaId) -> bool {
        self.participant.is_me(persona)
    }

    /// True when the local participant holds the stage.
    pub fn on_stage(&self) -> bool {
        self.state
            .presenting
            .as_ref()
            .is_some_and(|holder| self.participant.is_me(holder))
    }

    pub fn schedule(&mut self, timer: StageTimer) {
        let after = timer.delay(self.policy);
        let generation = self.timers.arm(timer);
        self.emit(StageAction::ScheduleTimer {
            timer,
            after,
            generation,
        });
    }

    pub fn cancel(&mut self, slot: TimerSlot) {
        if self.timers.disarm(slot) {
            self.emit(StageAction::CancelTimer { slot });
        }
    }

    /// Consume a timer fire; false when it was superseded.
    pub(crate) fn take_timer(&mut self, timer: StageTimer, generation: u64) -> bool {
        self.timers.take_if_current(timer, generation)
    }

    pub(crate) fn cancel_all(&mut self) {
        for slot in self.timers.armed_slots() {
            self.cancel(slot);
        }
    }

    fn advertised_channel(&self) -> ChannelKind {
        ChannelKind::advertised_by(self.participant.role)
    }

    fn browsed_channel(&self) -> ChannelKind {
        ChannelKind::browsed_by(self.participant.role)
    }

    /// Advertise a fresh record built from the current state.
    pub fn start_advertising(&mut self) {
        let record = encode(self.participant, &*self.state, self.now_secs);
        let channel = self.advertised_channel();
        self.emit(StageAction::StartAdvertising { channel, record });
    }

    pub fn stop_advertising(&mut self) {
        let channel = self.advertised_channel();
        self.emit(StageAction::StopAdvertising { channel });
    }

    pub fn start_browsing(&mut self) {
        let channel = self.browsed_channel();
        self.emit(StageAction::StartBrowsing { channel });
    }

    pub fn stop_browsing(&mut self) {
        let channel = self.browsed_channel();
        self.emit(StageAction::StopBrowsing { channel });
    }

    pub fn stop_channels(&mut self) {
        self.stop_advertising();
        self.stop_browsing();
    }

    pub fn invite(&mut self, peer: PeerRef) {
        self.emit(StageAction::Invite {
            peer,
            context: InviteContext::for_participant(self.participant),
            timeout: self.policy.service_timeout,
        });
    }

    pub fn respond(&mut self, invitation: InvitationId, accept: bool) {
        self.emit(StageAction::RespondInvitation { invitation, accept });
    }

    pub fn track_session(&mut self, peer: &PeerRef, state: SessionState) {
        self.state.session = Some(SessionLink {
            peer: peer.clone(),
            state,
        });
    }

    pub fn disconnect(&mut self) {
        self.state.session = None;
        self.emit(StageAction::Disconnect);
    }

    /// Resolve the pending hand-raise, if any.
    pub fn resolve_hand(&mut self, chosen: bool) {
        if let Some(ticket) = self.state.hand_raise.take() {
            self.cancel(TimerSlot::HandRaise);
            self.emit(StageAction::ResolveHandRaise { ticket, chosen });
        }
    }

    /// Deny a request that never became pending.
    pub fn deny(&mut self, ticket: HandRaiseTicket) {
        self.emit(StageAction::ResolveHandRaise {
            ticket,
            chosen: false,
        });
    }

    pub(crate) fn finish(self) -> Vec<StageAction> {
        let mut actions = self.actions;
        if self.notify {
            actions.push(StageAction::Notify(self.state.snapshot()));
        }
        actions
    }
}
