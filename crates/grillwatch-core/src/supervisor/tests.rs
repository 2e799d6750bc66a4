#![allow(clippy::unwrap_used)]

use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use pretty_assertions::assert_eq;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use grillwatch_api::{ConnectErrorKind, FRAME_LEN};

use super::*;
use crate::presence::TrackerRegistry;

// ── Scripted socket ─────────────────────────────────────────────────

#[derive(Debug, Clone)]
enum Outcome {
    Refuse,
    /// Yield these frames, then either close or go silent.
    Stream { frames: Vec<Bytes>, hang: bool },
}

struct ScriptedConnector {
    script: Mutex<VecDeque<Outcome>>,
    fallback: Outcome,
    attempts: AtomicUsize,
}

impl ScriptedConnector {
    fn new(script: impl IntoIterator<Item = Outcome>, fallback: Outcome) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            fallback,
            attempts: AtomicUsize::new(0),
        })
    }

    fn always_refuse() -> Arc<Self> {
        Self::new([], Outcome::Refuse)
    }

    fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

struct ScriptedStream {
    frames: VecDeque<Bytes>,
    hang: bool,
}

impl FrameStream for ScriptedStream {
    fn next_frame(
        &mut self,
    ) -> impl Future<Output = Option<Result<Bytes, grillwatch_api::Error>>> + Send {
        async move {
            // Let observers see each transition.
            tokio::task::yield_now().await;
            if let Some(frame) = self.frames.pop_front() {
                return Some(Ok(frame));
            }
            if self.hang {
                std::future::pending::<()>().await;
            }
            None
        }
    }
}

impl Connector for ScriptedConnector {
    type Stream = ScriptedStream;

    fn connect(
        &self,
        _device: &Device,
    ) -> impl Future<Output = Result<ScriptedStream, grillwatch_api::Error>> + Send {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        async move {
            tokio::task::yield_now().await;
            match outcome {
                Outcome::Refuse => Err(grillwatch_api::Error::Connect {
                    kind: ConnectErrorKind::Refused,
                    reason: "scripted refusal".into(),
                }),
                Outcome::Stream { frames, hang } => Ok(ScriptedStream {
                    frames: frames.into(),
                    hang,
                }),
            }
        }
    }
}

fn good_frame() -> Bytes {
    let mut frame = vec![0u8; FRAME_LEN];
    frame[..2].copy_from_slice(&crate::packet::HEADER);
    frame[6..8].copy_from_slice(&[0x18, 0x53]);
    Bytes::from(frame)
}

fn bad_header_frame() -> Bytes {
    Bytes::from(vec![0u8; FRAME_LEN])
}

/// Accepts the socket and never sends a frame.
fn silent_stream() -> Outcome {
    Outcome::Stream {
        frames: vec![],
        hang: true,
    }
}

fn live_stream() -> Outcome {
    Outcome::Stream {
        frames: vec![good_frame()],
        hang: true,
    }
}

// ── Harness ─────────────────────────────────────────────────────────

const SERIAL: &str = "G32-TEST";

struct Harness {
    handle: SupervisorHandle,
    task: JoinHandle<()>,
    cancel: CancellationToken,
    connector: Arc<ScriptedConnector>,
    diagnostics: Arc<DiagnosticsStore>,
    registry: Arc<TrackerRegistry>,
    gate: Arc<PresenceGate>,
}

impl Harness {
    fn start(connector: Arc<ScriptedConnector>, policy: RetryPolicy, enabled: bool) -> Self {
        Self::start_with(connector, policy, enabled, |_, _| {})
    }

    fn start_with(
        connector: Arc<ScriptedConnector>,
        policy: RetryPolicy,
        enabled: bool,
        setup: impl FnOnce(&TrackerRegistry, &PresenceGate),
    ) -> Self {
        let registry = Arc::new(TrackerRegistry::new());
        let gate = Arc::new(PresenceGate::new(registry.clone()));
        setup(&registry, &gate);

        let diagnostics = Arc::new(DiagnosticsStore::in_memory());
        let cancel = CancellationToken::new();
        let ctx = SupervisorContext {
            device: Arc::new(Device::new(
                SERIAL,
                crate::model::DeviceMeta::default(),
                "token".to_owned().into(),
            )),
            connector: connector.clone(),
            diagnostics: diagnostics.clone(),
            presence: gate.clone(),
            activity: Arc::new(ActivityLog::new(true)),
            policy,
            decoder: PacketDecoder::default(),
        };
        let (handle, task) = spawn(ctx, enabled, cancel.clone());

        Self {
            handle,
            task,
            cancel,
            connector,
            diagnostics,
            registry,
            gate,
        }
    }

    fn attempts_recorded(&self) -> u64 {
        self.diagnostics
            .get_device(SERIAL, DeviceCounter::ConnectionAttempts)
    }

    async fn shutdown(self) {
        self.cancel.cancel();
        self.task.await.unwrap();
    }
}

/// Record every published state (except `Connecting`) until `stop` matches.
async fn collect_until(
    rx: &mut watch::Receiver<ConnectionState>,
    stop: impl Fn(&ConnectionState) -> bool,
) -> Vec<ConnectionState> {
    let mut seen = Vec::new();
    loop {
        rx.changed().await.unwrap();
        let state = rx.borrow_and_update().clone();
        let done = stop(&state);
        if state != ConnectionState::Connecting {
            seen.push(state);
        }
        if done {
            return seen;
        }
    }
}

/// Strip timestamps so sequences compare cleanly.
fn labels(states: &[ConnectionState]) -> Vec<String> {
    states
        .iter()
        .map(|s| match s {
            ConnectionState::Backoff { attempt, .. } => format!("backoff {attempt}"),
            other => other.to_string(),
        })
        .collect()
}

fn quick_policy() -> RetryPolicy {
    RetryPolicy {
        rapid_attempts: 1,
        rapid_delay: Duration::from_secs(1),
        backoff_initial: Duration::from_secs(10),
        backoff_max: Duration::from_secs(10),
        backoff_budget: Duration::from_secs(15),
        ..RetryPolicy::default()
    }
}

// ── Retry ladder ────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn refused_connects_walk_rapid_retries_then_backoff() {
    let h = Harness::start(ScriptedConnector::always_refuse(), RetryPolicy::default(), true);
    let mut rx = h.handle.state();

    let seen = collect_until(&mut rx, |s| matches!(s, ConnectionState::Backoff { .. })).await;

    assert_eq!(
        labels(&seen),
        vec![
            "rapid retry 1",
            "rapid retry 2",
            "rapid retry 3",
            "rapid retry 4",
            "rapid retry 5",
            "backoff 1",
        ]
    );
    // The initial attempt plus five rapid ones.
    assert_eq!(h.connector.attempts(), 6);
    assert_eq!(h.attempts_recorded(), 6);
    assert_eq!(
        h.diagnostics.get_device(SERIAL, DeviceCounter::BackoffCounter),
        1
    );
    assert!(h.diagnostics.snapshot(SERIAL).next_backoff_at.is_some());
    assert!(h.handle.is_enabled());

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn exhausted_budget_disables_exactly_once() {
    let h = Harness::start(ScriptedConnector::always_refuse(), RetryPolicy::default(), true);
    let mut rx = h.handle.state();

    let seen = collect_until(&mut rx, |s| !s.is_enabled()).await;

    let backoffs: Vec<String> = labels(&seen)
        .into_iter()
        .filter(|l| l.starts_with("backoff"))
        .collect();
    assert_eq!(backoffs.len(), 8);
    assert_eq!(
        seen.last(),
        Some(&ConnectionState::Disabled {
            reason: DisableReason::BudgetExhausted
        })
    );
    assert!(!h.handle.is_enabled());
    assert_eq!(h.diagnostics.enabled(SERIAL), Some(false));

    // 1 initial + 5 rapid + 8 backoff attempts.
    let attempts = h.attempts_recorded();
    assert_eq!(attempts, 14);

    tokio::time::sleep(Duration::from_secs(4 * 3600)).await;

    assert!(!rx.has_changed().unwrap(), "state must stay put after auto-disable");
    assert_eq!(h.attempts_recorded(), attempts);
    assert_eq!(h.connector.attempts(), 14);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn silent_relay_cannot_stretch_the_backoff_budget() {
    let connector = ScriptedConnector::new([], silent_stream());
    let h = Harness::start(connector, RetryPolicy::default(), true);
    let mut rx = h.handle.state();

    collect_until(&mut rx, |s| matches!(s, ConnectionState::Backoff { .. })).await;
    let entered = tokio::time::Instant::now();
    let seen = collect_until(&mut rx, |s| !s.is_enabled()).await;
    let elapsed = entered.elapsed();

    assert!(
        elapsed <= RetryPolicy::default().backoff_budget,
        "backoff ran for {elapsed:?}"
    );
    assert_eq!(
        seen.last(),
        Some(&ConnectionState::Disabled {
            reason: DisableReason::BudgetExhausted
        })
    );
    // 1 initial + 5 rapid + 6 backoff attempts, each waiting out the heartbeat.
    assert_eq!(h.attempts_recorded(), 12);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn first_frame_connects_and_resets_the_ladder() {
    let connector = ScriptedConnector::new(
        [
            Outcome::Refuse,
            Outcome::Refuse,
            Outcome::Stream {
                frames: vec![good_frame()],
                hang: false,
            },
        ],
        Outcome::Refuse,
    );
    let h = Harness::start(connector, RetryPolicy::default(), true);
    let mut rx = h.handle.state();

    let mut seen = collect_until(&mut rx, |s| *s == ConnectionState::Connected).await;
    seen.extend(collect_until(&mut rx, ConnectionState::is_retrying).await);

    assert_eq!(
        labels(&seen),
        vec!["rapid retry 1", "rapid retry 2", "connected", "rapid retry 1"]
    );

    let telemetry = h.handle.latest().unwrap();
    assert_eq!(telemetry.reading.zones[0], Some(185.3));
    let diag = h.diagnostics.snapshot(SERIAL);
    assert_eq!(diag.last_data_received_at, Some(telemetry.received_at));
    assert_eq!(diag.backoff_counter, 0);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn bad_frame_before_first_packet_never_reports_connected() {
    let connector = ScriptedConnector::new(
        [Outcome::Stream {
            frames: vec![bad_header_frame()],
            hang: false,
        }],
        Outcome::Refuse,
    );
    let h = Harness::start(connector, RetryPolicy::default(), true);
    let mut rx = h.handle.state();

    let seen = collect_until(&mut rx, ConnectionState::is_retrying).await;

    assert_eq!(labels(&seen), vec!["rapid retry 1"]);
    assert!(h.handle.latest().is_none());

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn silent_socket_times_out_as_a_loss() {
    let connector = ScriptedConnector::new([live_stream()], Outcome::Refuse);
    let h = Harness::start(connector, RetryPolicy::default(), true);
    let mut rx = h.handle.state();

    collect_until(&mut rx, |s| *s == ConnectionState::Connected).await;
    let started = tokio::time::Instant::now();
    let seen = collect_until(&mut rx, ConnectionState::is_retrying).await;

    assert_eq!(labels(&seen), vec!["rapid retry 1"]);
    assert!(started.elapsed() >= RetryPolicy::default().heartbeat_timeout);

    h.shutdown().await;
}

// ── Gating ──────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn gated_ticks_make_no_attempts() {
    let connector = ScriptedConnector::new([live_stream()], Outcome::Refuse);
    let h = Harness::start_with(connector, RetryPolicy::default(), true, |_, gate| {
        gate.link(SERIAL, "phone");
    });

    tokio::time::sleep(Duration::from_secs(600)).await;

    assert_eq!(h.connector.attempts(), 0);
    assert_eq!(h.attempts_recorded(), 0);
    assert_eq!(h.handle.current_state(), ConnectionState::Connecting);

    // Presence returning nudges an immediate attempt.
    h.registry.set_reachable("phone", true);
    let mut rx = h.handle.state();
    rx.wait_for(ConnectionState::is_connected).await.unwrap();
    assert_eq!(h.connector.attempts(), 1);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn unlinking_opens_the_gate_on_next_tick() {
    let connector = ScriptedConnector::new([live_stream()], Outcome::Refuse);
    let h = Harness::start_with(connector, RetryPolicy::default(), true, |_, gate| {
        gate.link(SERIAL, "phone");
    });

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.connector.attempts(), 0);

    h.gate.unlink(SERIAL);
    let mut rx = h.handle.state();
    rx.wait_for(ConnectionState::is_connected).await.unwrap();
    assert_eq!(h.connector.attempts(), 1);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn presence_revives_auto_disable_but_not_manual_disable() {
    let connector = ScriptedConnector::new(
        [Outcome::Refuse, Outcome::Refuse, Outcome::Refuse],
        live_stream(),
    );
    let h = Harness::start_with(connector, quick_policy(), true, |registry, gate| {
        registry.set_reachable("phone", true);
        gate.link(SERIAL, "phone");
    });
    let mut rx = h.handle.state();

    let seen = collect_until(&mut rx, |s| !s.is_enabled()).await;
    assert_eq!(
        labels(&seen),
        vec!["rapid retry 1", "backoff 1", "disabled (retries exhausted)"]
    );

    h.registry.set_reachable("phone", false);
    h.registry.set_reachable("phone", true);
    rx.wait_for(ConnectionState::is_connected).await.unwrap();
    assert_eq!(h.connector.attempts(), 4);

    h.handle.disable();
    rx.wait_for(|s| {
        *s == ConnectionState::Disabled {
            reason: DisableReason::Manual,
        }
    })
    .await
    .unwrap();

    h.registry.set_reachable("phone", false);
    h.registry.set_reachable("phone", true);
    tokio::time::sleep(Duration::from_secs(3600)).await;

    assert!(!h.handle.is_enabled());
    assert_eq!(h.connector.attempts(), 4);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn presence_flicker_before_auto_disable_is_ignored() {
    let connector = ScriptedConnector::new([], silent_stream());
    let h = Harness::start_with(connector, quick_policy(), true, |registry, gate| {
        registry.set_reachable("phone", true);
        gate.link(SERIAL, "phone");
    });
    let mut rx = h.handle.state();

    collect_until(&mut rx, |s| matches!(s, ConnectionState::Backoff { .. })).await;

    // The last attempt is open and hangs until the budget runs out.
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(h.connector.attempts(), 3);
    h.registry.set_reachable("phone", false);
    h.registry.set_reachable("phone", true);

    rx.wait_for(|s| !s.is_enabled()).await.unwrap();
    tokio::time::sleep(Duration::from_secs(3600)).await;

    assert_eq!(
        h.handle.current_state(),
        ConnectionState::Disabled {
            reason: DisableReason::BudgetExhausted
        }
    );
    assert_eq!(h.connector.attempts(), 3);
    assert_eq!(h.attempts_recorded(), 3);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn gated_backoff_tick_keeps_counters_and_moves_due_time() {
    let h = Harness::start_with(
        ScriptedConnector::always_refuse(),
        RetryPolicy::default(),
        true,
        |registry, gate| {
            registry.set_reachable("phone", true);
            gate.link(SERIAL, "phone");
        },
    );
    let mut rx = h.handle.state();

    let seen = collect_until(&mut rx, |s| matches!(s, ConnectionState::Backoff { .. })).await;
    let Some(ConnectionState::Backoff {
        next_attempt_at: first_due,
        ..
    }) = seen.last().cloned()
    else {
        unreachable!()
    };
    let attempts = h.connector.attempts();

    h.registry.set_reachable("phone", false);
    let seen = collect_until(&mut rx, |s| matches!(s, ConnectionState::Backoff { .. })).await;

    assert_eq!(labels(&seen), vec!["backoff 1"]);
    let Some(ConnectionState::Backoff {
        next_attempt_at: moved_due,
        ..
    }) = seen.last().cloned()
    else {
        unreachable!()
    };
    assert!(moved_due > first_due);
    assert_eq!(h.connector.attempts(), attempts);
    assert_eq!(h.attempts_recorded(), u64::try_from(attempts).unwrap());
    assert_eq!(
        h.diagnostics.get_device(SERIAL, DeviceCounter::BackoffCounter),
        1
    );
    assert_eq!(h.diagnostics.snapshot(SERIAL).next_backoff_at, Some(moved_due));

    // Gated ticks still spend the budget.
    tokio::time::sleep(Duration::from_secs(1800)).await;
    assert_eq!(
        h.handle.current_state(),
        ConnectionState::Disabled {
            reason: DisableReason::BudgetExhausted
        }
    );
    assert_eq!(h.connector.attempts(), attempts);

    h.shutdown().await;
}

// ── Operator control ────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn disable_cancels_pending_backoff() {
    let h = Harness::start(ScriptedConnector::always_refuse(), RetryPolicy::default(), true);
    let mut rx = h.handle.state();

    collect_until(&mut rx, |s| matches!(s, ConnectionState::Backoff { .. })).await;
    let attempts = h.connector.attempts();

    h.handle.disable();
    rx.wait_for(|s| !s.is_enabled()).await.unwrap();
    assert!(h.diagnostics.snapshot(SERIAL).next_backoff_at.is_none());

    tokio::time::sleep(Duration::from_secs(3600)).await;

    assert_eq!(h.connector.attempts(), attempts);
    assert_eq!(
        h.handle.current_state(),
        ConnectionState::Disabled {
            reason: DisableReason::Manual
        }
    );

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn starts_disabled_until_enabled() {
    let connector = ScriptedConnector::new([], live_stream());
    let h = Harness::start(connector, RetryPolicy::default(), false);

    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(h.connector.attempts(), 0);
    assert_eq!(h.handle.current_state(), ConnectionState::INITIAL);

    h.handle.set_enabled(true);
    let mut rx = h.handle.state();
    rx.wait_for(ConnectionState::is_connected).await.unwrap();
    assert_eq!(h.diagnostics.enabled(SERIAL), Some(true));

    h.handle.set_enabled(false);
    rx.wait_for(|s| !s.is_enabled()).await.unwrap();
    assert_eq!(h.diagnostics.enabled(SERIAL), Some(false));

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn cancellation_stops_the_task() {
    let h = Harness::start(ScriptedConnector::always_refuse(), RetryPolicy::default(), true);
    tokio::time::sleep(Duration::from_secs(5)).await;

    let task = h.task;
    h.cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .unwrap()
        .unwrap();
}
