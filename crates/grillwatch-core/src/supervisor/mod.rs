// ── Connection supervisor ──
//
// One task per grill. Owns the socket, the retry ladder, and the
// displayed `ConnectionState`; nothing else mutates either. Operators
// steer it with enable/disable through a control channel and observe it
// through `watch` receivers.

mod connector;
mod ladder;

pub use connector::{Connector, FrameStream, TcpConnector};

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::activity::ActivityLog;
use crate::config::RetryPolicy;
use crate::diagnostics::{DeviceCounter, DiagnosticsStore};
use crate::model::{ConnectionState, Device, DisableReason, Telemetry};
use crate::packet::PacketDecoder;
use crate::presence::{PresenceGate, PresenceSubscription};

use self::ladder::{NextStep, RetryLadder};

/// Everything one supervisor needs, handed over at construction.
///
/// Each supervisor owns its own context; nothing is captured from the
/// caller's loop.
#[derive(Debug)]
pub struct SupervisorContext<C> {
    pub device: Arc<Device>,
    pub connector: Arc<C>,
    pub diagnostics: Arc<DiagnosticsStore>,
    pub presence: Arc<PresenceGate>,
    pub activity: Arc<ActivityLog>,
    pub policy: RetryPolicy,
    pub decoder: PacketDecoder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Enable,
    Disable,
}

// ── SupervisorHandle ────────────────────────────────────────────────

/// Cheap, cloneable handle to a running supervisor.
///
/// The supervisor stops when its cancellation token fires or when every
/// handle has been dropped.
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
    device: Arc<Device>,
    control: mpsc::UnboundedSender<Control>,
    state: watch::Receiver<ConnectionState>,
    telemetry: watch::Receiver<Option<Arc<Telemetry>>>,
}

impl SupervisorHandle {
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    pub fn serial(&self) -> &str {
        self.device.serial()
    }

    /// Ask the supervisor to leave `Disabled`.
    pub fn enable(&self) {
        let _ = self.control.send(Control::Enable);
    }

    /// Ask the supervisor to stop: pending timers and open sockets are
    /// dropped before it does anything else.
    pub fn disable(&self) {
        let _ = self.control.send(Control::Disable);
    }

    /// Map the operator's on/off switch onto enable/disable.
    pub fn set_enabled(&self, enabled: bool) {
        if enabled {
            self.enable();
        } else {
            self.disable();
        }
    }

    /// The "connection enabled" indicator, derived from the state.
    pub fn is_enabled(&self) -> bool {
        self.state.borrow().is_enabled()
    }

    pub fn current_state(&self) -> ConnectionState {
        self.state.borrow().clone()
    }

    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    pub fn latest(&self) -> Option<Arc<Telemetry>> {
        self.telemetry.borrow().clone()
    }

    pub fn telemetry(&self) -> watch::Receiver<Option<Arc<Telemetry>>> {
        self.telemetry.clone()
    }
}

/// Start a supervisor task.
///
/// `start_enabled` resumes a connection the operator left on; otherwise
/// the supervisor waits in `Disabled` for an enable.
pub fn spawn<C: Connector>(
    ctx: SupervisorContext<C>,
    start_enabled: bool,
    cancel: CancellationToken,
) -> (SupervisorHandle, JoinHandle<()>) {
    let (control_tx, control_rx) = mpsc::unbounded_channel();
    let (state_tx, state_rx) = watch::channel(ConnectionState::INITIAL);
    let (telemetry_tx, telemetry_rx) = watch::channel(None);

    let handle = SupervisorHandle {
        device: Arc::clone(&ctx.device),
        control: control_tx,
        state: state_rx,
        telemetry: telemetry_rx,
    };

    let presence = ctx.presence.on_became_reachable(ctx.device.serial());
    let ladder = RetryLadder::new(ctx.policy.clone());
    let supervisor = Supervisor {
        ctx,
        ladder,
        control: control_rx,
        presence,
        state: state_tx,
        telemetry: telemetry_tx,
        cancel,
    };

    let task = tokio::spawn(supervisor.run(start_enabled));
    (handle, task)
}

// ── Supervisor task ─────────────────────────────────────────────────

/// Where the run loop goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Disabled(DisableReason),
    Attempt,
    Wait(Duration),
    Stop,
}

/// Why an await inside an attempt was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupt {
    Disable,
    Stop,
}

impl From<Interrupt> for Phase {
    fn from(interrupt: Interrupt) -> Self {
        match interrupt {
            Interrupt::Disable => Phase::Disabled(DisableReason::Manual),
            Interrupt::Stop => Phase::Stop,
        }
    }
}

struct Supervisor<C: Connector> {
    ctx: SupervisorContext<C>,
    ladder: RetryLadder,
    control: mpsc::UnboundedReceiver<Control>,
    presence: PresenceSubscription,
    state: watch::Sender<ConnectionState>,
    telemetry: watch::Sender<Option<Arc<Telemetry>>>,
    cancel: CancellationToken,
}

impl<C: Connector> Supervisor<C> {
    fn serial(&self) -> &str {
        self.ctx.device.serial()
    }

    async fn run(mut self, start_enabled: bool) {
        let serial = self.serial().to_owned();
        self.ctx.diagnostics.register_device(&serial);

        let mut phase = if start_enabled {
            self.enter_enabled();
            Phase::Attempt
        } else {
            Phase::Disabled(DisableReason::Manual)
        };

        loop {
            phase = match phase {
                Phase::Disabled(reason) => self.disabled(reason).await,
                Phase::Attempt => self.attempt().await,
                Phase::Wait(delay) => self.wait(delay).await,
                Phase::Stop => break,
            };
        }
        debug!(serial, "supervisor stopped");
    }

    // ── Phases ──────────────────────────────────────────────────────

    /// Sit in `Disabled` until enabled, nudged (auto-disable only), or stopped.
    async fn disabled(&mut self, mut reason: DisableReason) -> Phase {
        if reason == DisableReason::BudgetExhausted {
            // Only presence changes from here on may revive the connection.
            self.presence.discard_pending();
        }
        self.enter_disabled(reason);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Phase::Stop,
                control = self.control.recv() => match control {
                    Some(Control::Enable) => {
                        info!(serial = %self.serial(), "connection enabled");
                        self.enter_enabled();
                        return Phase::Attempt;
                    }
                    Some(Control::Disable) if reason == DisableReason::BudgetExhausted => {
                        // The operator has now turned it off explicitly.
                        reason = DisableReason::Manual;
                        self.enter_disabled(reason);
                    }
                    Some(Control::Disable) => {}
                    None => return Phase::Stop,
                },
                () = self.presence.became_reachable(), if reason == DisableReason::BudgetExhausted => {
                    info!(serial = %self.serial(), "presence returned; re-enabling");
                    self.ctx.activity.record(self.serial(), "presence returned, reconnecting");
                    self.enter_enabled();
                    return Phase::Attempt;
                }
            }
        }
    }

    /// Sleep out a retry delay. Presence coming back cuts it short.
    async fn wait(&mut self, delay: Duration) -> Phase {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Phase::Stop,
                control = self.control.recv() => match control {
                    Some(Control::Disable) => return Phase::Disabled(DisableReason::Manual),
                    Some(Control::Enable) => {}
                    None => return Phase::Stop,
                },
                () = self.presence.became_reachable() => {
                    debug!(serial = %self.serial(), "presence nudge; retrying now");
                    return Phase::Attempt;
                }
                () = &mut sleep => return Phase::Attempt,
            }
        }
    }

    /// One gated connection attempt, and the session that follows if it opens.
    async fn attempt(&mut self) -> Phase {
        let serial = self.serial().to_owned();

        if !self.ctx.presence.may_attempt(&serial) {
            let Some(delay) = self.ladder.gated_delay(Instant::now()) else {
                return self.exhausted();
            };
            debug!(serial, delay_ms = delay.as_millis(), "presence gate closed; rescheduling");
            self.reschedule_gated(delay);
            return Phase::Wait(delay);
        }

        let attempts = self
            .ctx
            .diagnostics
            .increment_device(&serial, DeviceCounter::ConnectionAttempts);
        debug!(serial, attempt = attempts, "opening telemetry socket");

        // In backoff, neither the connect nor the wait for a first frame
        // may outlive the budget.
        let give_up_at = self.ladder.budget_deadline();
        let connector = Arc::clone(&self.ctx.connector);
        let device = Arc::clone(&self.ctx.device);
        let connected = self
            .interruptible(async move {
                let connect = connector.connect(&device);
                match give_up_at {
                    Some(at) => tokio::time::timeout_at(at, connect)
                        .await
                        .unwrap_or_else(|_| {
                            Err(grillwatch_api::Error::Connect {
                                kind: grillwatch_api::ConnectErrorKind::Timeout,
                                reason: "retry budget spent".into(),
                            })
                        }),
                    None => connect.await,
                }
            })
            .await;

        let stream = match connected {
            Err(interrupt) => return interrupt.into(),
            Ok(Err(e)) => {
                warn!(serial, error = %e, "telemetry connect failed");
                self.ctx.activity.record(&serial, format!("connect failed: {e}"));
                return self.schedule_retry();
            }
            Ok(Ok(stream)) => stream,
        };

        self.set_state(ConnectionState::Connecting);
        self.ctx.activity.record(&serial, "socket open, waiting for data");

        let ended = self.stream_session(stream, give_up_at).await;
        self.ctx.diagnostics.flush_liveness(&serial);
        match ended {
            Ok(reason) => {
                warn!(serial, reason, "telemetry stream lost");
                self.ctx.activity.record(&serial, format!("connection lost: {reason}"));
                self.schedule_retry()
            }
            Err(interrupt) => interrupt.into(),
        }
    }

    /// Read frames until the stream dies. Returns why it died.
    ///
    /// Until the first frame arrives the silence limit is also capped at
    /// `give_up_at`.
    async fn stream_session(
        &mut self,
        mut stream: C::Stream,
        give_up_at: Option<Instant>,
    ) -> Result<String, Interrupt> {
        let heartbeat = self.ctx.policy.heartbeat_timeout;
        let mut connected = false;

        loop {
            let started = Instant::now();
            let limit = match give_up_at {
                Some(at) if !connected => (started + heartbeat).min(at),
                _ => started + heartbeat,
            };
            let next = self
                .interruptible(tokio::time::timeout_at(limit, stream.next_frame()))
                .await?;

            let frame = match next {
                Err(_) => {
                    let silent = limit.saturating_duration_since(started);
                    return Ok(format!("no data for {}s", silent.as_secs()));
                }
                Ok(None) => return Ok("closed by relay".to_owned()),
                Ok(Some(Err(e))) => return Ok(e.to_string()),
                Ok(Some(Ok(frame))) => frame,
            };

            let reading = match self.ctx.decoder.decode(&frame) {
                Ok(reading) => reading,
                Err(e) => return Ok(format!("undecodable frame: {e}")),
            };

            let received_at = Utc::now();
            let serial = self.serial().to_owned();
            if !connected {
                connected = true;
                self.ladder.reset();
                self.ctx.diagnostics.clear_backoff(&serial);
                self.set_state(ConnectionState::Connected);
                info!(serial, "telemetry connected");
                self.ctx.activity.record(&serial, "connected");
            }
            self.ctx.diagnostics.record_data_received(&serial, received_at);
            self.telemetry.send_replace(Some(Arc::new(Telemetry {
                reading,
                received_at,
            })));
        }
    }

    // ── Transitions ─────────────────────────────────────────────────

    /// Climb the ladder after a failure and publish the new state.
    fn schedule_retry(&mut self) -> Phase {
        let serial = self.serial().to_owned();
        match self.ladder.on_failure(Instant::now()) {
            NextStep::Rapid { attempt, delay } => {
                debug!(serial, attempt, delay_ms = delay.as_millis(), "rapid retry scheduled");
                self.set_state(ConnectionState::RapidRetry { attempt });
                Phase::Wait(delay)
            }
            NextStep::Backoff { attempt, delay } => {
                let next_attempt_at = due_at(delay);
                self.ctx
                    .diagnostics
                    .increment_device(&serial, DeviceCounter::BackoffCounter);
                self.ctx.diagnostics.set_next_backoff(&serial, next_attempt_at);
                info!(serial, attempt, delay_ms = delay.as_millis(), "backing off");
                self.ctx
                    .activity
                    .record(&serial, format!("backoff {attempt}, retrying in {}s", delay.as_secs()));
                self.set_state(ConnectionState::Backoff {
                    attempt,
                    next_attempt_at,
                });
                Phase::Wait(delay)
            }
            NextStep::Exhausted => self.exhausted(),
        }
    }

    fn exhausted(&self) -> Phase {
        let serial = self.serial();
        warn!(serial, "retry budget exhausted; disabling connection");
        self.ctx
            .activity
            .record(serial, "retries exhausted, connection disabled");
        Phase::Disabled(DisableReason::BudgetExhausted)
    }

    /// A gated tick: same delay again, no counters touched.
    fn reschedule_gated(&mut self, delay: Duration) {
        let current = self.state.borrow().clone();
        if let ConnectionState::Backoff { attempt, .. } = current {
            let next_attempt_at = due_at(delay);
            self.ctx
                .diagnostics
                .set_next_backoff(self.ctx.device.serial(), next_attempt_at);
            self.set_state(ConnectionState::Backoff {
                attempt,
                next_attempt_at,
            });
        }
    }

    fn enter_enabled(&mut self) {
        self.ladder.reset();
        self.ctx.diagnostics.set_enabled(self.ctx.device.serial(), true);
        self.set_state(ConnectionState::Connecting);
    }

    fn enter_disabled(&mut self, reason: DisableReason) {
        let serial = self.serial().to_owned();
        self.ctx.diagnostics.set_enabled(&serial, false);
        self.ctx.diagnostics.clear_next_backoff(&serial);
        if reason == DisableReason::Manual && self.state.borrow().is_enabled() {
            info!(serial, "connection disabled");
            self.ctx.activity.record(&serial, "connection disabled");
        }
        self.set_state(ConnectionState::Disabled { reason });
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(serial = %self.serial(), %state, "state change");
        self.state.send_replace(state);
    }

    /// Await `fut` unless a disable or shutdown arrives first.
    async fn interruptible<F: Future>(&mut self, fut: F) -> Result<F::Output, Interrupt> {
        tokio::pin!(fut);
        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => return Err(Interrupt::Stop),
                control = self.control.recv() => match control {
                    Some(Control::Disable) => return Err(Interrupt::Disable),
                    Some(Control::Enable) => {}
                    None => return Err(Interrupt::Stop),
                },
                out = &mut fut => return Ok(out),
            }
        }
    }
}

fn due_at(delay: Duration) -> DateTime<Utc> {
    let now = Utc::now();
    chrono::Duration::from_std(delay).map_or(now, |d| now + d)
}

#[cfg(test)]
mod tests;
