//! Serial arbiter task
//!
//! 每个参与者一个串行任务:本地意图、传输事件与定时器触发都在同一个
//! 任务中逐个处理,状态机从不并发执行两次转换。

use std::collections::{HashMap, VecDeque};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::AbortHandle;
use tracing::{debug, info, info_span, warn, Instrument};

use cs_core::config::StageSettings;
use cs_core::participant::Participant;
use cs_core::ports::TransportEvent;
use cs_core::session::SessionState;
use cs_core::stage::{
    HandRaiseTicket, StageAction, StageEvent, StageOutlook, StagePolicy, StageSnapshot,
    StageStateMachine, StageTimer, TicketCounter, TimerSlot,
};

use super::facade::{HandRaiseCallback, StageEventPort, StageFacade};
use crate::deps::StageDeps;

/// 仲裁器配置
#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    pub policy: StagePolicy,
    /// 命令队列容量
    pub command_buffer: usize,
    /// 每个订阅者的通知队列容量
    pub subscriber_buffer: usize,
}

impl Default for ArbiterConfig {
    fn default() -> Self {
        Self::from_settings(&StageSettings::default())
    }
}

impl ArbiterConfig {
    pub fn from_settings(settings: &StageSettings) -> Self {
        Self {
            policy: StagePolicy::from_settings(settings),
            command_buffer: 64,
            subscriber_buffer: 100,
        }
    }
}

#[derive(Debug, Error)]
pub enum ArbiterError {
    #[error("stage arbiter is closed")]
    Closed,
}

enum ArbiterCommand {
    Start,
    RaiseHand(HandRaiseCallback),
    DropHand,
    DroppingHand,
    ReleaseStage,
    Teardown(oneshot::Sender<()>),
}

/// Handle to one participant's stage
///
/// 可克隆的句柄;最后一个句柄被丢弃时,串行任务按 teardown 处理后退出。
#[derive(Clone)]
pub struct StageArbiter {
    participant: Participant,
    command_tx: mpsc::Sender<ArbiterCommand>,
    snapshot_rx: watch::Receiver<StageSnapshot>,
    /// 舞台通知订阅者
    event_senders: Arc<Mutex<Vec<mpsc::Sender<StageSnapshot>>>>,
    subscriber_buffer: usize,
}

impl StageArbiter {
    /// Subscribe to the transport and spawn the serial task. `start` must still
    /// be called before the stage does anything.
    pub async fn spawn(
        participant: Participant,
        config: ArbiterConfig,
        deps: StageDeps,
    ) -> Result<Self> {
        let transport_rx = deps
            .transport_events
            .subscribe_events()
            .await
            .context("Failed to subscribe to transport events")?;

        let (command_tx, command_rx) = mpsc::channel(config.command_buffer.max(1));
        let (snapshot_tx, snapshot_rx) = watch::channel(StageSnapshot::default());
        let (timer_tx, timer_rx) = mpsc::channel(16);
        let event_senders = Arc::new(Mutex::new(Vec::new()));

        let span = info_span!(
            "stage.arbiter",
            persona = %participant.persona_id,
            role = %participant.role
        );
        let worker = ArbiterWorker {
            machine: StageStateMachine::new(participant.clone(), config.policy.clone()),
            deps,
            tickets: TicketCounter::default(),
            callbacks: HashMap::new(),
            timers: HashMap::new(),
            timer_tx,
            snapshot_tx,
            event_senders: event_senders.clone(),
            pending: VecDeque::new(),
        };
        tokio::spawn(
            worker
                .run(command_rx, transport_rx, timer_rx)
                .instrument(span),
        );

        Ok(Self {
            participant,
            command_tx,
            snapshot_rx,
            event_senders,
            subscriber_buffer: config.subscriber_buffer.max(1),
        })
    }

    pub fn participant(&self) -> &Participant {
        &self.participant
    }

    /// State after the last completed transition.
    pub fn snapshot(&self) -> StageSnapshot {
        self.snapshot_rx.borrow().clone()
    }

    pub fn outlook(&self) -> StageOutlook {
        self.snapshot().outlook(&self.participant)
    }

    /// Receiver that always holds the latest snapshot.
    pub fn watch(&self) -> watch::Receiver<StageSnapshot> {
        self.snapshot_rx.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.command_tx.is_closed()
    }

    async fn send(&self, command: ArbiterCommand) -> Result<(), ArbiterError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| ArbiterError::Closed)
    }

    pub async fn start(&self) -> Result<()> {
        let span = info_span!("stage.start", persona = %self.participant.persona_id);
        self.send(ArbiterCommand::Start).instrument(span).await?;
        Ok(())
    }

    /// Ask for the stage. `callback` runs exactly once on the arbiter task with
    /// the outcome; a closed arbiter denies immediately.
    pub async fn raise_hand<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let span = info_span!("stage.raise_hand", persona = %self.participant.persona_id);
        if let Err(mpsc::error::SendError(command)) = self
            .command_tx
            .send(ArbiterCommand::RaiseHand(Box::new(callback)))
            .instrument(span)
            .await
        {
            debug!("arbiter closed, hand-raise denied");
            if let ArbiterCommand::RaiseHand(callback) = command {
                callback(false);
            }
        }
        Ok(())
    }

    /// [`StageArbiter::raise_hand`] that waits for the outcome.
    pub async fn raise_hand_and_wait(&self) -> Result<bool> {
        let (result_tx, result_rx) = oneshot::channel();
        self.raise_hand(move |chosen| {
            let _ = result_tx.send(chosen);
        })
        .await?;
        result_rx
            .await
            .map_err(|_| anyhow::Error::from(ArbiterError::Closed))
    }

    pub async fn drop_hand(&self) -> Result<()> {
        let span = info_span!("stage.drop_hand", persona = %self.participant.persona_id);
        self.send(ArbiterCommand::DropHand).instrument(span).await?;
        Ok(())
    }

    pub async fn dropping_hand(&self) -> Result<()> {
        let span = info_span!("stage.dropping_hand", persona = %self.participant.persona_id);
        self.send(ArbiterCommand::DroppingHand)
            .instrument(span)
            .await?;
        Ok(())
    }

    pub async fn release_stage(&self) -> Result<()> {
        let span = info_span!("stage.release_stage", persona = %self.participant.persona_id);
        self.send(ArbiterCommand::ReleaseStage)
            .instrument(span)
            .await?;
        Ok(())
    }

    /// Tear the stage down and wait until the serial task has stopped.
    /// Idempotent.
    pub async fn teardown(&self) -> Result<()> {
        let span = info_span!("stage.teardown", persona = %self.participant.persona_id);
        async {
            let (done_tx, done_rx) = oneshot::channel();
            if self.send(ArbiterCommand::Teardown(done_tx)).await.is_err() {
                debug!("arbiter already closed");
                return Ok(());
            }
            let _ = done_rx.await;
            info!("stage torn down");
            Ok::<(), anyhow::Error>(())
        }
        .instrument(span)
        .await
    }

    pub async fn subscribe(&self) -> Result<mpsc::Receiver<StageSnapshot>> {
        let (event_tx, event_rx) = mpsc::channel(self.subscriber_buffer);
        let mut senders = self.event_senders.lock().await;
        senders.push(event_tx);
        Ok(event_rx)
    }
}

#[async_trait]
impl StageFacade for StageArbiter {
    async fn start(&self) -> Result<()> {
        Self::start(self).await
    }

    async fn raise_hand(&self, callback: HandRaiseCallback) -> Result<()> {
        Self::raise_hand(self, callback).await
    }

    async fn drop_hand(&self) -> Result<()> {
        Self::drop_hand(self).await
    }

    async fn dropping_hand(&self) -> Result<()> {
        Self::dropping_hand(self).await
    }

    async fn release_stage(&self) -> Result<()> {
        Self::release_stage(self).await
    }

    async fn teardown(&self) -> Result<()> {
        Self::teardown(self).await
    }

    fn snapshot(&self) -> StageSnapshot {
        Self::snapshot(self)
    }
}

#[async_trait]
impl StageEventPort for StageArbiter {
    async fn subscribe(&self) -> Result<mpsc::Receiver<StageSnapshot>> {
        Self::subscribe(self).await
    }
}

/// State owned by the serial task.
struct ArbiterWorker {
    machine: StageStateMachine,
    deps: StageDeps,
    tickets: TicketCounter,
    /// 等待结果的举手回调
    callbacks: HashMap<HandRaiseTicket, HandRaiseCallback>,
    /// 定时器句柄 (slot -> generation, handle)
    timers: HashMap<TimerSlot, (u64, AbortHandle)>,
    timer_tx: mpsc::Sender<(StageTimer, u64)>,
    snapshot_tx: watch::Sender<StageSnapshot>,
    event_senders: Arc<Mutex<Vec<mpsc::Sender<StageSnapshot>>>>,
    /// Events produced while executing actions, handled after the current batch.
    pending: VecDeque<StageEvent>,
}

impl ArbiterWorker {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<ArbiterCommand>,
        mut transport: mpsc::Receiver<TransportEvent>,
        mut timer_rx: mpsc::Receiver<(StageTimer, u64)>,
    ) {
        info!("stage arbiter running");
        let mut transport_open = true;

        loop {
            tokio::select! {
                command = commands.recv() => {
                    let flow = match command {
                        Some(command) => self.handle_command(command).await,
                        None => {
                            debug!("all arbiter handles dropped");
                            self.dispatch(StageEvent::Shutdown).await;
                            ControlFlow::Break(())
                        }
                    };
                    if flow.is_break() {
                        break;
                    }
                }
                Some((timer, generation)) = timer_rx.recv() => {
                    self.forget_timer(timer.slot(), generation);
                    self.dispatch(StageEvent::TimerFired { timer, generation }).await;
                }
                event = transport.recv(), if transport_open => match event {
                    Some(event) => self.handle_transport(event).await,
                    None => {
                        warn!("transport event stream closed");
                        transport_open = false;
                    }
                },
            }
        }

        self.close();
    }

    async fn handle_command(&mut self, command: ArbiterCommand) -> ControlFlow<()> {
        let event = match command {
            ArbiterCommand::Start => StageEvent::Start,
            ArbiterCommand::RaiseHand(callback) => {
                let ticket = self.tickets.next();
                self.callbacks.insert(ticket, callback);
                StageEvent::RaiseHand { ticket }
            }
            ArbiterCommand::DropHand => StageEvent::DropHand,
            ArbiterCommand::DroppingHand => StageEvent::DroppingHand,
            ArbiterCommand::ReleaseStage => StageEvent::ReleaseStage,
            ArbiterCommand::Teardown(done) => {
                self.dispatch(StageEvent::Shutdown).await;
                let _ = done.send(());
                return ControlFlow::Break(());
            }
        };
        self.dispatch(event).await;
        ControlFlow::Continue(())
    }

    async fn handle_transport(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Fault { operation, message } => {
                warn!(%operation, %message, "transport fault");
            }
            other => {
                if let Some(event) = other.into_stage_event() {
                    self.dispatch(event).await;
                }
            }
        }
    }

    /// Run one event and every event its effects produce, to completion.
    async fn dispatch(&mut self, event: StageEvent) {
        self.pending.push_back(event);
        while let Some(event) = self.pending.pop_front() {
            let now = self.deps.clock.now_secs();
            let (snapshot, actions) = self.machine.handle_event(event, now);
            self.snapshot_tx.send_replace(snapshot);
            for action in actions {
                self.execute_action(action).await;
            }
        }
    }

    /// 执行单个动作。传输错误只记录日志,不会中断仲裁。
    async fn execute_action(&mut self, action: StageAction) {
        match action {
            StageAction::LogTransition {
                old_state,
                event,
                new_state,
            } => {
                debug!(%old_state, %event, %new_state, "stage transition");
            }
            StageAction::StartAdvertising { channel, record } => {
                let result = self
                    .deps
                    .discovery
                    .start_advertising(channel, record.to_discovery_info())
                    .await;
                report("start_advertising", result);
            }
            StageAction::StopAdvertising { channel } => {
                report(
                    "stop_advertising",
                    self.deps.discovery.stop_advertising(channel).await,
                );
            }
            StageAction::StartBrowsing { channel } => {
                report(
                    "start_browsing",
                    self.deps.discovery.start_browsing(channel).await,
                );
            }
            StageAction::StopBrowsing { channel } => {
                report(
                    "stop_browsing",
                    self.deps.discovery.stop_browsing(channel).await,
                );
            }
            StageAction::Invite {
                peer,
                context,
                timeout,
            } => {
                info!(%peer, %context, "inviting");
                if let Err(err) = self.deps.session.invite(&peer, context.encode(), timeout).await {
                    warn!(%peer, error = %err, "invite failed");
                    self.pending.push_back(StageEvent::SessionChanged {
                        peer,
                        state: SessionState::NotConnected,
                    });
                }
            }
            StageAction::RespondInvitation { invitation, accept } => {
                report(
                    "respond_invitation",
                    self.deps.session.respond_invitation(invitation, accept).await,
                );
            }
            StageAction::Disconnect => {
                report("disconnect", self.deps.session.disconnect().await);
            }
            StageAction::ScheduleTimer {
                timer,
                after,
                generation,
            } => self.start_timer(timer, after, generation),
            StageAction::CancelTimer { slot } => {
                if let Some((_, handle)) = self.timers.remove(&slot) {
                    handle.abort();
                }
            }
            StageAction::ResolveHandRaise { ticket, chosen } => {
                match self.callbacks.remove(&ticket) {
                    Some(callback) => {
                        info!(ticket = ticket.0, chosen, "hand-raise resolved");
                        callback(chosen);
                    }
                    None => debug!(ticket = ticket.0, "no callback for hand-raise ticket"),
                }
            }
            StageAction::Notify(snapshot) => self.notify(snapshot).await,
        }
    }

    fn start_timer(&mut self, timer: StageTimer, after: Duration, generation: u64) {
        let slot = timer.slot();
        if let Some((_, handle)) = self.timers.remove(&slot) {
            handle.abort();
        }

        let timer_tx = self.timer_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            let _ = timer_tx.send((timer, generation)).await;
        });
        self.timers.insert(slot, (generation, handle.abort_handle()));
    }

    fn forget_timer(&mut self, slot: TimerSlot, generation: u64) {
        if self
            .timers
            .get(&slot)
            .is_some_and(|(armed, _)| *armed == generation)
        {
            self.timers.remove(&slot);
        }
    }

    async fn notify(&mut self, snapshot: StageSnapshot) {
        self.deps.observer.on_stage_changed(&snapshot);

        let mut senders = self.event_senders.lock().await;
        senders.retain(|sender| match sender.try_send(snapshot.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("stage subscriber lagging, notification dropped");
                true
            }
            Err(TrySendError::Closed(_)) => {
                debug!("stage subscriber dropped");
                false
            }
        });
    }

    fn close(&mut self) {
        for (_, (_, handle)) in self.timers.drain() {
            handle.abort();
        }
        for (_, callback) in self.callbacks.drain() {
            callback(false);
        }
        info!("stage arbiter stopped");
    }
}

fn report(operation: &str, result: Result<()>) {
    if let Err(err) = result {
        warn!(operation, error = %err, "transport operation failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_settings() {
        let settings = StageSettings {
            service_timeout: Duration::from_secs(2),
            ..StageSettings::default()
        };
        let config = ArbiterConfig::from_settings(&settings);
        assert_eq!(config.policy.service_timeout, Duration::from_secs(2));
        assert_eq!(config.policy.grant_ceiling(), Duration::from_secs(4));
        assert!(config.command_buffer > 0);
    }
}
