//! # State Publisher
//!
//! Top-level driver. Sequences the session, the polling scheduler and the
//! shared channel into one tick-driven state machine and exposes the latest
//! telemetry snapshot to the UI loop.
//!
//! ```text
//!                 ┌─────────────────────── auto-reconnect ───────────────────┐
//!                 ▼                                                          │
//!          ┌────────────┐   connected + armed   ┌───────────┐   link lost   │
//!   ──────►│ Connecting │ ─────────────────────►│ Streaming │ ──────────────┘
//!          └────────────┘                       └───────────┘
//!            │ timeout / rejected /                   │ link lost (manual mode)
//!            │ busy exhausted                         ▼
//!            ▼                               ┌──────────────────┐
//!          ┌──────────────────┐  confirm     │ AwaitingOperator │
//!          │ AwaitingOperator │ ───────────► └──────────────────┘
//!          └──────────────────┘  (Connecting)
//!
//!   cancel, from any phase ──► Cancelled (link released)
//! ```
//!
//! Each [`StatePublisher::tick`] performs at most one bounded wait per
//! notification, so the caller's tick loop stays responsive to cancellation.
//!
//! A disconnect the service answers with busy leaves the session short of
//! `Idle`. The next connect attempt first retries the disconnect on the
//! retry policy's backoff; [`StatePublisher::cancel`] retries it in place,
//! up to `max_busy_retries` times.

use heapless::Deque;
use log::{debug, info, warn};
use serde::Serialize;

use crate::channel::{ChannelStats, Decoded};
use crate::config::LinkConfig;
use crate::polling::PollingScheduler;
use crate::protocol::{ConnectionRole, DeviceStatusSnapshot, TelemetryPacket};
use crate::session::{ConnectionState, SessionError, TransportSession};
use crate::traits::{IrService, WaitOutcome};

/// Capacity of the pending event queue; the oldest event is dropped on overflow
pub const EVENT_QUEUE_LEN: usize = 16;

/// Abstract operator input, one per tick at most
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum OperatorAction {
    /// Retry after a failure, or reconnect while streaming
    Confirm,
    /// Stop and release the link
    Cancel,
    QueryStatus,
    QueryRole,
}

/// Publisher phase as seen by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Phase {
    Connecting,
    AwaitingOperator,
    Streaming,
    Cancelled,
}

/// What ended the last connect attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FailureReason {
    /// No connection within the attempt budget
    Timeout,
    /// The service gave up on the attempt
    NotConnected,
    /// The service refused the request
    Rejected(u32),
    /// Busy replies exceeded the retry policy
    BusyExhausted,
    /// Link dropped and auto-reconnect is off
    LinkLost,
    Session(SessionError),
}

/// Something the UI may want to render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublisherEvent {
    AttemptStarted { attempt: u32 },
    Busy { retry_in_ms: u32 },
    Connected,
    PollingArmed { period_ms: u8 },
    PollingFailed(SessionError),
    AttemptFailed(FailureReason),
    LinkLost,
    Status(DeviceStatusSnapshot),
    Role(ConnectionRole),
    QueryFailed(SessionError),
    Cancelled,
}

/// Result of one tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PublisherOutcome {
    Running,
    /// Operator abort; a normal terminal outcome
    Cancelled,
}

/// Statistics about the link
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkStats {
    /// Connect requests accepted by the service
    pub attempts: u32,
    /// Attempts that reached `Connected`
    pub connections: u32,
    /// Connections after the first one
    pub reconnects: u32,
    /// Busy replies to connect requests
    pub busy_retries: u32,
    /// Links lost while streaming
    pub link_losses: u32,
    /// Snapshots published
    pub published: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    /// Issue the connect request once `now >= not_before_ms`
    Request { not_before_ms: u64 },
    /// Request accepted; waiting for the link until `deadline_ms`
    AwaitLink { deadline_ms: u64 },
}

pub struct StatePublisher<S: IrService> {
    session: TransportSession<S>,
    polling: PollingScheduler,
    config: LinkConfig,
    phase: Phase,
    step: Step,
    busy_retries: u32,
    cleanup_retries: u32,
    arm_failures: u8,
    snapshot: Option<TelemetryPacket>,
    last_failure: Option<FailureReason>,
    stats: LinkStats,
    events: Deque<PublisherEvent, EVENT_QUEUE_LEN>,
}

impl<S: IrService> StatePublisher<S> {
    /// Start in `Connecting`; the first tick issues the request
    pub fn new(session: TransportSession<S>, config: LinkConfig) -> Self {
        Self {
            session,
            polling: PollingScheduler::new(),
            config,
            phase: Phase::Connecting,
            step: Step::Request { not_before_ms: 0 },
            busy_retries: 0,
            cleanup_retries: 0,
            arm_failures: 0,
            snapshot: None,
            last_failure: None,
            stats: LinkStats::default(),
            events: Deque::new(),
        }
    }

    /// Advance the state machine by one tick
    pub fn tick(&mut self, action: Option<OperatorAction>) -> PublisherOutcome {
        if self.phase == Phase::Cancelled {
            return PublisherOutcome::Cancelled;
        }

        match action {
            Some(OperatorAction::Cancel) => {
                self.cancel();
                return PublisherOutcome::Cancelled;
            }
            Some(OperatorAction::QueryStatus) => self.report_status(),
            Some(OperatorAction::QueryRole) => self.report_role(),
            Some(OperatorAction::Confirm) => match self.phase {
                Phase::AwaitingOperator => self.begin_connect(),
                Phase::Streaming => self.reconnect(),
                Phase::Connecting | Phase::Cancelled => {}
            },
            None => {}
        }

        match self.phase {
            Phase::Connecting => self.tick_connecting(),
            Phase::Streaming => self.tick_streaming(),
            Phase::AwaitingOperator | Phase::Cancelled => {}
        }

        PublisherOutcome::Running
    }

    /// Release the link and stop; later ticks report `Cancelled`
    pub fn cancel(&mut self) {
        if self.phase == Phase::Cancelled {
            return;
        }
        let mut retry = 0;
        loop {
            match self.session.disconnect(self.config.disconnect_timeout_ms) {
                Ok(()) => break,
                Err(SessionError::Busy) if retry < u32::from(self.config.retry.max_busy_retries) => {
                    let delay = self.config.retry.delay_ms(retry);
                    retry += 1;
                    debug!("Disconnect on cancel busy, retry {} in {} ms", retry, delay);
                    if let Err(e) = self.session.wait_for_status_change(delay) {
                        warn!("Backoff wait failed: {}", e);
                    }
                }
                Err(e) => {
                    warn!("Disconnect on cancel failed: {}", e);
                    break;
                }
            }
        }
        self.polling.disarm();
        self.set_phase(Phase::Cancelled);
        self.push_event(PublisherEvent::Cancelled);
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Newest telemetry; `None` until the current link produced a packet
    pub fn snapshot(&self) -> Option<&TelemetryPacket> {
        self.snapshot.as_ref()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.session.query_status()
    }

    pub fn last_failure(&self) -> Option<FailureReason> {
        self.last_failure
    }

    pub fn stats(&self) -> LinkStats {
        self.stats
    }

    pub fn channel_stats(&self) -> ChannelStats {
        self.session.channel_stats()
    }

    pub fn polling(&self) -> &PollingScheduler {
        &self.polling
    }

    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Pop the oldest pending event
    pub fn take_event(&mut self) -> Option<PublisherEvent> {
        self.events.pop_front()
    }

    pub fn session(&self) -> &TransportSession<S> {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut TransportSession<S> {
        &mut self.session
    }

    /// Give the session back for teardown
    pub fn into_session(self) -> TransportSession<S> {
        self.session
    }

    // -----------------------------------------------------------------------
    // Connecting
    // -----------------------------------------------------------------------

    fn begin_connect(&mut self) {
        self.busy_retries = 0;
        self.arm_failures = 0;
        self.snapshot = None;
        self.step = Step::Request { not_before_ms: 0 };
        self.set_phase(Phase::Connecting);
    }

    fn reconnect(&mut self) {
        info!("Restarting connection");
        self.polling.disarm();
        self.begin_connect();
        self.release_link();
    }

    fn tick_connecting(&mut self) {
        match self.step {
            Step::Request { not_before_ms } => {
                if !self.backoff_elapsed(not_before_ms) {
                    return;
                }
                // A busy cleanup disconnect left the previous attempt open
                if self.session.query_status() != ConnectionState::Idle && !self.release_link() {
                    return;
                }
                let now = self.session.now_ms();
                self.issue_request(now);
            }
            Step::AwaitLink { deadline_ms } => self.await_link(deadline_ms),
        }
    }

    /// Sleep out a backoff in bounded slices; `true` once it has passed
    fn backoff_elapsed(&mut self, not_before_ms: u64) -> bool {
        let now = self.session.now_ms();
        if now >= not_before_ms {
            return true;
        }
        let budget = (not_before_ms - now).min(u64::from(self.config.status_wait_ms)) as u32;
        if let Err(e) = self.session.wait_for_status_change(budget) {
            warn!("Backoff wait failed: {}", e);
        }
        self.session.now_ms() >= not_before_ms
    }

    /// Disconnect whatever link or attempt the session holds
    ///
    /// Returns `false` when the service was busy; the next request is then
    /// held back by the retry policy and preceded by another disconnect.
    fn release_link(&mut self) -> bool {
        match self.session.disconnect(self.config.disconnect_timeout_ms) {
            Ok(()) => {
                self.cleanup_retries = 0;
                true
            }
            Err(SessionError::Busy) => {
                let delay = self.config.retry.delay_ms(self.cleanup_retries);
                self.cleanup_retries = self.cleanup_retries.saturating_add(1);
                debug!("Disconnect busy, retry {} in {} ms", self.cleanup_retries, delay);
                self.push_event(PublisherEvent::Busy { retry_in_ms: delay });
                self.step = Step::Request {
                    not_before_ms: self.session.now_ms() + u64::from(delay),
                };
                false
            }
            Err(e) => {
                // Any other failure still leaves the session `Idle`
                warn!("Disconnect failed: {}", e);
                self.cleanup_retries = 0;
                true
            }
        }
    }

    fn issue_request(&mut self, now: u64) {
        match self.session.request_connection(self.config.device_id) {
            Ok(()) => {
                self.stats.attempts = self.stats.attempts.wrapping_add(1);
                info!("Connect attempt {} started", self.stats.attempts);
                self.push_event(PublisherEvent::AttemptStarted {
                    attempt: self.stats.attempts,
                });
                self.step = Step::AwaitLink {
                    deadline_ms: now + u64::from(self.config.connect_timeout_ms),
                };
            }
            Err(SessionError::Busy) => {
                self.stats.busy_retries = self.stats.busy_retries.wrapping_add(1);
                if self.busy_retries >= u32::from(self.config.retry.max_busy_retries) {
                    self.fail(FailureReason::BusyExhausted);
                    return;
                }
                let delay = self.config.retry.delay_ms(self.busy_retries);
                self.busy_retries += 1;
                debug!("Connect request busy, retry {} in {} ms", self.busy_retries, delay);
                self.push_event(PublisherEvent::Busy { retry_in_ms: delay });
                self.step = Step::Request {
                    not_before_ms: now + u64::from(delay),
                };
            }
            Err(SessionError::ServiceRejected(code)) => self.fail(FailureReason::Rejected(code)),
            Err(e) => self.fail(FailureReason::Session(e)),
        }
    }

    fn await_link(&mut self, deadline_ms: u64) {
        let remaining = deadline_ms.saturating_sub(self.session.now_ms());
        let budget = remaining.min(u64::from(self.config.status_wait_ms)) as u32;

        if let Err(e) = self.session.wait_for_status_change(budget) {
            self.abandon_attempt();
            self.fail(FailureReason::Session(e));
            return;
        }

        // Re-check after a timeout as well; the notification may have fired
        // before the wait started.
        match self.session.refresh_status() {
            Ok(ConnectionState::Connected) => self.on_connected(),
            Ok(ConnectionState::Failed) => {
                self.abandon_attempt();
                self.fail(FailureReason::NotConnected);
            }
            Ok(_) if self.session.now_ms() >= deadline_ms => {
                self.abandon_attempt();
                self.fail(FailureReason::Timeout);
            }
            Ok(_) => {}
            Err(e) => {
                self.abandon_attempt();
                self.fail(FailureReason::Session(e));
            }
        }
    }

    fn abandon_attempt(&mut self) {
        info!("Connection failed, disconnecting");
        if !self.release_link() {
            warn!("Half-open attempt kept; cleared before the next request");
        }
    }

    fn on_connected(&mut self) {
        self.stats.connections = self.stats.connections.wrapping_add(1);
        if self.stats.connections > 1 {
            self.stats.reconnects = self.stats.reconnects.wrapping_add(1);
        }
        self.last_failure = None;
        self.snapshot = None;
        self.push_event(PublisherEvent::Connected);
        self.set_phase(Phase::Streaming);
        self.arm_polling();
    }

    fn fail(&mut self, reason: FailureReason) {
        warn!("Connect attempt failed: {:?}", reason);
        self.last_failure = Some(reason);
        self.push_event(PublisherEvent::AttemptFailed(reason));
        self.set_phase(Phase::AwaitingOperator);
    }

    // -----------------------------------------------------------------------
    // Streaming
    // -----------------------------------------------------------------------

    fn arm_polling(&mut self) {
        match self.polling.arm(&mut self.session, self.config.polling_period_ms) {
            Ok(()) => {
                self.arm_failures = 0;
                self.push_event(PublisherEvent::PollingArmed {
                    period_ms: self.config.polling_period_ms,
                });
            }
            Err(e) => {
                self.arm_failures = self.arm_failures.saturating_add(1);
                self.push_event(PublisherEvent::PollingFailed(e));
                if self.arm_failures >= self.config.max_arm_attempts {
                    self.polling.disarm();
                    self.abandon_attempt();
                    self.fail(FailureReason::Session(e));
                }
            }
        }
    }

    fn tick_streaming(&mut self) {
        if !self.polling.is_armed() {
            self.arm_polling();
            if self.phase != Phase::Streaming {
                return;
            }
        }

        match self.session.wait_for_status_change(0) {
            Ok(WaitOutcome::Signaled) => {
                if !self.link_still_up() {
                    return;
                }
            }
            Ok(WaitOutcome::TimedOut) => {}
            Err(e) => warn!("Status wait failed: {}", e),
        }

        match self.session.wait_for_packet(self.config.packet_wait_ms) {
            Ok(WaitOutcome::Signaled) => self.drain_packets(),
            Ok(WaitOutcome::TimedOut) => {}
            Err(e) => warn!("Packet wait failed: {}", e),
        }
    }

    fn drain_packets(&mut self) {
        let mut latest = None;
        // One pass over every slot is enough to catch up with the writer
        for _ in 0..=self.session.geometry().slot_count {
            match self.session.decode_next() {
                Decoded::Packet(packet) => latest = Some(packet),
                Decoded::Corrupt { declared_len } => {
                    debug!("Skipped corrupt packet (declared {} bytes)", declared_len);
                }
                Decoded::Empty => break,
            }
        }

        let Some(packet) = latest else {
            return;
        };
        // A packet notification says nothing about the link; check it
        if !self.link_still_up() {
            return;
        }
        self.snapshot = Some(packet);
        self.stats.published = self.stats.published.wrapping_add(1);
    }

    /// Refresh the link state, handling a loss. Returns `false` if lost.
    fn link_still_up(&mut self) -> bool {
        match self.session.refresh_status() {
            Ok(ConnectionState::Connected) => true,
            Ok(_) => {
                self.on_link_lost();
                false
            }
            Err(e) => {
                warn!("Status query failed: {}", e);
                true
            }
        }
    }

    fn on_link_lost(&mut self) {
        warn!("Link lost");
        self.stats.link_losses = self.stats.link_losses.wrapping_add(1);
        self.polling.disarm();
        self.snapshot = None;
        self.push_event(PublisherEvent::LinkLost);

        if self.config.auto_reconnect {
            self.begin_connect();
        } else {
            self.last_failure = Some(FailureReason::LinkLost);
            self.set_phase(Phase::AwaitingOperator);
        }
    }

    // -----------------------------------------------------------------------
    // Operator queries
    // -----------------------------------------------------------------------

    fn report_status(&mut self) {
        match self.session.status_snapshot() {
            Ok(status) => self.push_event(PublisherEvent::Status(status)),
            Err(e) => self.push_event(PublisherEvent::QueryFailed(e)),
        }
    }

    fn report_role(&mut self) {
        match self.session.query_role() {
            Ok(role) => self.push_event(PublisherEvent::Role(role)),
            Err(e) => self.push_event(PublisherEvent::QueryFailed(e)),
        }
    }

    // -----------------------------------------------------------------------
    // Internal
    // -----------------------------------------------------------------------

    fn set_phase(&mut self, next: Phase) {
        if next != self.phase {
            info!("Publisher: {:?} -> {:?}", self.phase, next);
            self.phase = next;
        }
    }

    fn push_event(&mut self, event: PublisherEvent) {
        if self.events.is_full() {
            self.events.pop_front();
        }
        // Cannot fail after the pop above
        let _ = self.events.push_back(event);
    }
}
