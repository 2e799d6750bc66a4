//! Live telemetry: one supervised stream per grill, printed as events arrive.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{Interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use grillwatch_core::{
    ActivityEntry, ConnectionState, SessionManager, SupervisorHandle, Telemetry, TrackerRegistry,
};

use crate::cli::{GlobalOpts, OutputFormat, WatchArgs};
use crate::config;
use crate::error::CliError;
use crate::output;

use super::util;

const EVENT_BUFFER: usize = 256;

#[derive(Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum WatchEvent {
    State {
        serial: String,
        at: DateTime<Utc>,
        #[serde(flatten)]
        state: ConnectionState,
    },
    Reading {
        serial: String,
        telemetry: Arc<Telemetry>,
    },
}

impl WatchEvent {
    fn serial(&self) -> &str {
        match self {
            Self::State { serial, .. } | Self::Reading { serial, .. } => serial,
        }
    }
}

/// How events are written to stdout.
struct Printer {
    format: OutputFormat,
    color: bool,
    quiet: bool,
    readings_only: bool,
    only: HashSet<String>,
}

impl Printer {
    fn wants(&self, event: &WatchEvent) -> bool {
        if self.readings_only && matches!(event, WatchEvent::State { .. }) {
            return false;
        }
        self.only.is_empty() || self.only.contains(event.serial())
    }

    fn render(&self, event: &WatchEvent) -> Result<String, CliError> {
        Ok(match self.format {
            // One object per line, pretty or not
            OutputFormat::Json | OutputFormat::JsonCompact => serde_json::to_string(event)?,
            OutputFormat::Plain => match event {
                WatchEvent::State { serial, state, .. } => format!("{serial}\t{state}"),
                WatchEvent::Reading { serial, telemetry } => {
                    format!("{serial}\t{}", telemetry.reading.raw_hex())
                }
            },
            OutputFormat::Table => match event {
                WatchEvent::State { serial, at, state } => format!(
                    "{}  {serial}  {}",
                    clock(*at),
                    output::state_label(state, self.color)
                ),
                WatchEvent::Reading { serial, telemetry } => {
                    format!("{}  {serial}  {}", clock(telemetry.received_at), reading_line(telemetry))
                }
            },
        })
    }

    fn print(&self, event: &WatchEvent) -> Result<(), CliError> {
        if self.wants(event) {
            output::print_output(&self.render(event)?, self.quiet);
        }
        Ok(())
    }
}

fn clock(at: DateTime<Utc>) -> String {
    at.with_timezone(&Local).format("%H:%M:%S").to_string()
}

fn temps(values: &[Option<f64>; 4]) -> String {
    values
        .iter()
        .map(|t| output::temperature(*t))
        .collect::<Vec<_>>()
        .join(" ")
}

fn reading_line(telemetry: &Telemetry) -> String {
    let r = &telemetry.reading;
    let mut line = format!(
        "zones {}  probes {}  gas {}%",
        temps(&r.zones),
        temps(&r.probes),
        r.gas_level
    );
    if r.gas_low {
        line.push_str(" LOW");
    }
    if r.firebox_open {
        line.push_str("  lid open");
    }
    if r.light_on {
        line.push_str("  light on");
    }
    line
}

/// Relay one supervisor's state and telemetry changes into `tx`.
async fn forward(handle: SupervisorHandle, tx: mpsc::Sender<WatchEvent>) {
    let serial = handle.serial().to_owned();
    let mut state = handle.state();
    let mut telemetry = handle.telemetry();

    let initial = WatchEvent::State {
        serial: serial.clone(),
        at: Utc::now(),
        state: state.borrow_and_update().clone(),
    };
    if tx.send(initial).await.is_err() {
        return;
    }
    let latest = telemetry.borrow_and_update().clone();
    if let Some(latest) = latest {
        let event = WatchEvent::Reading {
            serial: serial.clone(),
            telemetry: latest,
        };
        if tx.send(event).await.is_err() {
            return;
        }
    }

    loop {
        let event = tokio::select! {
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                WatchEvent::State {
                    serial: serial.clone(),
                    at: Utc::now(),
                    state: state.borrow_and_update().clone(),
                }
            }
            changed = telemetry.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(latest) = telemetry.borrow_and_update().clone() else {
                    continue;
                };
                WatchEvent::Reading { serial: serial.clone(), telemetry: latest }
            }
        };
        if tx.send(event).await.is_err() {
            break;
        }
    }
    debug!(serial, "forwarder stopped");
}

async fn next_tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn deadline(duration: Option<Duration>) {
    match duration {
        Some(d) => tokio::time::sleep(d).await,
        None => std::future::pending().await,
    }
}

fn render_activity(entries: &[ActivityEntry], format: &OutputFormat) -> Result<String, CliError> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(entries)?,
        OutputFormat::JsonCompact => serde_json::to_string(entries)?,
        OutputFormat::Table | OutputFormat::Plain => entries
            .iter()
            .rev()
            .map(|e| format!("{}  {}  {}", clock(e.at), e.serial, e.message))
            .collect::<Vec<_>>()
            .join("\n"),
    })
}

#[allow(clippy::too_many_lines)]
pub async fn handle(args: WatchArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (profile_name, mut session) = config::resolve_session_config(global)?;
    if args.activity {
        session.activity_log = true;
    }

    // Without a live presence source, configured trackers are present
    // unless named with --away.
    let registry = Arc::new(TrackerRegistry::new());
    for tracker in session.trackers.values() {
        registry.set_reachable(tracker, !args.away.contains(tracker));
    }
    for away in &args.away {
        if !session.trackers.values().any(|t| t == away) {
            warn!(tracker = %away, "--away names a tracker no grill is linked to");
        }
    }

    let store = Arc::new(util::open_store(global)?);
    let manager = SessionManager::connect(session, store, registry)?;

    if let Err(e) = manager.start().await {
        manager.shutdown().await;
        return Err(CliError::for_profile(e, &profile_name));
    }

    let email = manager.config().credentials.email.clone();
    if !global.quiet {
        let who = manager
            .user()
            .await
            .map_or_else(|| email.clone(), |u| u.display_title(&email));
        eprintln!("Watching as {who} (Ctrl-C to stop)");
    }

    let printer = Printer {
        format: global.output.clone(),
        color: output::should_color(&global.color),
        quiet: global.quiet,
        readings_only: args.readings_only,
        only: args.serials.iter().cloned().collect(),
    };

    let handles = manager.supervisors();
    for serial in &printer.only {
        if !handles.iter().any(|h| h.serial() == serial) {
            warn!(serial, "grill is not registered to this account");
        }
    }

    let (tx, mut rx) = mpsc::channel(EVENT_BUFFER);
    let mut forwarders = JoinSet::new();
    for handle in handles {
        forwarders.spawn(forward(handle, tx.clone()));
    }

    let mut resync = args.resync.map(|period| {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        interval
    });

    let stop = deadline(args.duration);
    tokio::pin!(stop);
    let signal = util::shutdown_signal();
    tokio::pin!(signal);

    let result = loop {
        tokio::select! {
            biased;

            res = &mut signal => {
                if let Err(e) = res {
                    warn!(error = %e, "signal handler failed; stopping");
                }
                info!("interrupted");
                break Ok(());
            }
            () = &mut stop => {
                info!("watch duration elapsed");
                break Ok(());
            }
            () = next_tick(resync.as_mut()) => {
                match manager.resync().await {
                    Ok(summary) => {
                        for serial in &summary.added {
                            if let Some(handle) = manager.supervisor(serial) {
                                forwarders.spawn(forward(handle, tx.clone()));
                            }
                        }
                        if !summary.added.is_empty() || !summary.removed.is_empty() {
                            info!(added = ?summary.added, removed = ?summary.removed, "grill list changed");
                        }
                    }
                    Err(e) if e.is_transient() => warn!(error = %e, "resync failed; keeping current grills"),
                    Err(e) => break Err(CliError::for_profile(e, &profile_name)),
                }
            }
            Some(event) = rx.recv() => {
                if let Err(e) = printer.print(&event) {
                    break Err(e);
                }
            }
        }
    };

    forwarders.abort_all();
    manager.shutdown().await;

    if args.activity {
        let entries = manager.activity().entries();
        let out = render_activity(&entries, &global.output)?;
        output::print_output(&out, global.quiet);
    }

    result
}
