// ── Presence gating ──
//
// A grill can be linked to a presence tracker (a phone on the home
// network, a Bluetooth beacon, anything that says "someone is near the
// grill"). While the tracker is away the supervisor skips connection
// attempts; when it comes back the supervisor is nudged to retry at once.
// Unlinked grills are never gated.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::{debug, warn};

const PRESENCE_CHANNEL_CAPACITY: usize = 64;

/// A tracker changed reachability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceEvent {
    pub tracker: String,
    pub reachable: bool,
}

/// Source of truth for tracker reachability.
pub trait PresenceOracle: Send + Sync {
    /// Current reachability. Unknown trackers are unreachable.
    fn is_reachable(&self, tracker: &str) -> bool;

    /// Stream of reachability transitions.
    fn subscribe(&self) -> broadcast::Receiver<PresenceEvent>;
}

// ── TrackerRegistry ─────────────────────────────────────────────────

/// In-process presence oracle fed by whoever knows tracker state.
#[derive(Debug)]
pub struct TrackerRegistry {
    states: DashMap<String, bool>,
    events: broadcast::Sender<PresenceEvent>,
}

impl Default for TrackerRegistry {
    fn default() -> Self {
        let (events, _) = broadcast::channel(PRESENCE_CHANNEL_CAPACITY);
        Self {
            states: DashMap::new(),
            events,
        }
    }
}

impl TrackerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report a tracker's reachability. Emits an event only on change.
    pub fn set_reachable(&self, tracker: &str, reachable: bool) {
        let previous = self.states.insert(tracker.to_owned(), reachable);
        if previous == Some(reachable) {
            return;
        }
        debug!(tracker, reachable, "tracker presence changed");
        let _ = self.events.send(PresenceEvent {
            tracker: tracker.to_owned(),
            reachable,
        });
    }
}

impl PresenceOracle for TrackerRegistry {
    fn is_reachable(&self, tracker: &str) -> bool {
        self.states.get(tracker).is_some_and(|r| *r)
    }

    fn subscribe(&self) -> broadcast::Receiver<PresenceEvent> {
        self.events.subscribe()
    }
}

// ── PresenceGate ────────────────────────────────────────────────────

/// Answers "may this grill try to connect right now?".
///
/// Links are read on every check, so `link`/`unlink` take effect on the
/// next attempt without restarting anything.
pub struct PresenceGate {
    oracle: Arc<dyn PresenceOracle>,
    links: Arc<DashMap<String, String>>,
}

impl std::fmt::Debug for PresenceGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceGate")
            .field("links", &self.links.len())
            .finish_non_exhaustive()
    }
}

impl PresenceGate {
    pub fn new(oracle: Arc<dyn PresenceOracle>) -> Self {
        Self {
            oracle,
            links: Arc::new(DashMap::new()),
        }
    }

    /// Gate `serial` on `tracker`.
    pub fn link(&self, serial: &str, tracker: &str) {
        debug!(serial, tracker, "linking presence tracker");
        self.links.insert(serial.to_owned(), tracker.to_owned());
    }

    /// Stop gating `serial`.
    pub fn unlink(&self, serial: &str) {
        if self.links.remove(serial).is_some() {
            debug!(serial, "unlinked presence tracker");
        }
    }

    pub fn tracker_for(&self, serial: &str) -> Option<String> {
        self.links.get(serial).map(|t| t.value().clone())
    }

    pub fn may_attempt(&self, serial: &str) -> bool {
        match self.links.get(serial) {
            Some(tracker) => self.oracle.is_reachable(tracker.value()),
            None => true,
        }
    }

    /// Subscribe to "`serial`'s tracker became reachable" transitions.
    pub fn on_became_reachable(&self, serial: &str) -> PresenceSubscription {
        PresenceSubscription {
            serial: serial.to_owned(),
            links: Arc::clone(&self.links),
            oracle: Arc::clone(&self.oracle),
            events: Some(self.oracle.subscribe()),
        }
    }
}

/// Per-grill view of the presence event stream.
pub struct PresenceSubscription {
    serial: String,
    links: Arc<DashMap<String, String>>,
    oracle: Arc<dyn PresenceOracle>,
    events: Option<broadcast::Receiver<PresenceEvent>>,
}

impl std::fmt::Debug for PresenceSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PresenceSubscription")
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

impl PresenceSubscription {
    /// Resolves when the tracker currently linked to this grill turns
    /// reachable. Never resolves once the oracle is gone.
    pub async fn became_reachable(&mut self) {
        loop {
            let Some(events) = self.events.as_mut() else {
                return std::future::pending().await;
            };
            match events.recv().await {
                Ok(event) if event.reachable && self.is_linked_to(&event.tracker) => return,
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(serial = %self.serial, skipped, "presence events lagged");
                    if self.currently_reachable() {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Closed) => self.events = None,
            }
        }
    }

    /// Forget transitions that have already happened; only later ones
    /// will resolve [`became_reachable`](Self::became_reachable).
    pub fn discard_pending(&mut self) {
        if let Some(events) = self.events.as_mut() {
            *events = events.resubscribe();
        }
    }

    fn is_linked_to(&self, tracker: &str) -> bool {
        self.links
            .get(&self.serial)
            .is_some_and(|linked| linked.value() == tracker)
    }

    fn currently_reachable(&self) -> bool {
        self.links
            .get(&self.serial)
            .is_some_and(|linked| self.oracle.is_reachable(linked.value()))
    }
}
