// ── Diagnostics store ──
//
// Process-wide and per-grill counters, written through to a persistent
// key-value backend on every mutation (liveness timestamps at most once a
// minute while frames flow). Stored values are loaded exactly
// once per process: the process-wide counters behind a `OnceLock` that
// every accessor passes through, each grill's counters on first touch.

mod kv;

pub use kv::{JsonFileStore, KeyValueStore, MemoryStore};

use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use strum::{Display, EnumIter, IntoEnumIterator, IntoStaticStr};
use tracing::{debug, warn};

use crate::error::CoreError;

/// Counters shared by every grill in the process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum GlobalCounter {
    LoginCalls,
    GrillListCalls,
}

/// Counters kept per grill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum DeviceCounter {
    ConnectionAttempts,
    /// Backoff attempts since the last successful connection.
    BackoffCounter,
}

const NEXT_BACKOFF_AT: &str = "next_backoff_at";
const LAST_DATA_RECEIVED_AT: &str = "last_data_received_at";
const ENABLED: &str = "enabled";

/// Minimum spacing between persisted liveness timestamps while data flows.
const LIVENESS_PERSIST_SECS: i64 = 60;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GlobalDiagnostics {
    pub login_calls: u64,
    pub grill_list_calls: u64,
}

/// Everything recorded for one grill.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeviceDiagnostics {
    pub connection_attempts: u64,
    pub backoff_counter: u64,
    pub next_backoff_at: Option<DateTime<Utc>>,
    pub last_data_received_at: Option<DateTime<Utc>>,
    /// Last operator/auto decision; `None` if never recorded.
    pub enabled: Option<bool>,
}

impl DeviceDiagnostics {
    fn counter(&self, counter: DeviceCounter) -> u64 {
        match counter {
            DeviceCounter::ConnectionAttempts => self.connection_attempts,
            DeviceCounter::BackoffCounter => self.backoff_counter,
        }
    }

    fn counter_mut(&mut self, counter: DeviceCounter) -> &mut u64 {
        match counter {
            DeviceCounter::ConnectionAttempts => &mut self.connection_attempts,
            DeviceCounter::BackoffCounter => &mut self.backoff_counter,
        }
    }
}

/// Synchronized, persistent diagnostic counters.
pub struct DiagnosticsStore {
    backend: Arc<dyn KeyValueStore>,
    restored: OnceLock<()>,
    globals: Mutex<HashMap<GlobalCounter, u64>>,
    devices: DashMap<String, DeviceDiagnostics>,
    /// Last liveness timestamp written to the backend, per grill.
    liveness_persisted: DashMap<String, DateTime<Utc>>,
}

impl std::fmt::Debug for DiagnosticsStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagnosticsStore")
            .field("restored", &self.restored.get().is_some())
            .field("devices", &self.devices.len())
            .finish_non_exhaustive()
    }
}

impl DiagnosticsStore {
    pub fn new(backend: Arc<dyn KeyValueStore>) -> Self {
        Self {
            backend,
            restored: OnceLock::new(),
            globals: Mutex::new(HashMap::new()),
            devices: DashMap::new(),
            liveness_persisted: DashMap::new(),
        }
    }

    /// A store with no persistence behind it.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    // ── Restore ─────────────────────────────────────────────────────

    /// Load the process-wide counters from the backend.
    ///
    /// Runs once per store no matter how many callers race here;
    /// concurrent callers wait for the first one to finish. Every other
    /// accessor calls this first, so a counter is never incremented
    /// before its stored value is in place.
    pub fn restore_once(&self) {
        self.restored.get_or_init(|| {
            let mut globals = self.lock_globals();
            for counter in GlobalCounter::iter() {
                let stored = self.read_u64(&global_key(counter));
                globals.insert(counter, stored);
            }
            debug!(?globals, "restored process-wide diagnostics");
        });
    }

    /// Make sure `serial`'s stored counters are loaded.
    pub fn register_device(&self, serial: &str) {
        self.restore_once();
        self.devices
            .entry(serial.to_owned())
            .or_insert_with(|| self.load_device(serial));
    }

    // ── Process-wide counters ───────────────────────────────────────

    /// Add one to `counter` and persist it. Returns the new value.
    pub fn increment_global(&self, counter: GlobalCounter) -> u64 {
        self.restore_once();
        let mut globals = self.lock_globals();
        let value = globals.entry(counter).or_insert(0);
        *value += 1;
        let value = *value;
        self.persist(&global_key(counter), &value.to_string());
        value
    }

    pub fn get_global(&self, counter: GlobalCounter) -> u64 {
        self.restore_once();
        self.lock_globals().get(&counter).copied().unwrap_or(0)
    }

    pub fn globals(&self) -> GlobalDiagnostics {
        GlobalDiagnostics {
            login_calls: self.get_global(GlobalCounter::LoginCalls),
            grill_list_calls: self.get_global(GlobalCounter::GrillListCalls),
        }
    }

    // ── Per-grill counters ──────────────────────────────────────────

    /// Add one to `serial`'s `counter` and persist it. Returns the new value.
    pub fn increment_device(&self, serial: &str, counter: DeviceCounter) -> u64 {
        self.with_device(serial, |diag| {
            let value = diag.counter_mut(counter);
            *value += 1;
            let value = *value;
            self.persist(&device_key(serial, counter.into()), &value.to_string());
            value
        })
    }

    pub fn get_device(&self, serial: &str, counter: DeviceCounter) -> u64 {
        self.with_device(serial, |diag| diag.counter(counter))
    }

    /// Record when the next backoff attempt is due.
    pub fn set_next_backoff(&self, serial: &str, at: DateTime<Utc>) {
        self.with_device(serial, |diag| {
            diag.next_backoff_at = Some(at);
            self.persist(&device_key(serial, NEXT_BACKOFF_AT), &at.to_rfc3339());
        });
    }

    /// Zero the backoff counter and forget the next attempt time.
    pub fn clear_backoff(&self, serial: &str) {
        self.with_device(serial, |diag| {
            diag.backoff_counter = 0;
            diag.next_backoff_at = None;
            self.persist(&device_key(serial, DeviceCounter::BackoffCounter.into()), "0");
            self.forget(&device_key(serial, NEXT_BACKOFF_AT));
        });
    }

    /// Forget the next attempt time but keep the counter.
    pub fn clear_next_backoff(&self, serial: &str) {
        self.with_device(serial, |diag| {
            if diag.next_backoff_at.take().is_some() {
                self.forget(&device_key(serial, NEXT_BACKOFF_AT));
            }
        });
    }

    /// Note a frame from `serial`. Memory is always current; the backend
    /// sees the first frame of a run and then at most one write a minute.
    /// Call [`flush_liveness`](Self::flush_liveness) when the stream ends.
    pub fn record_data_received(&self, serial: &str, at: DateTime<Utc>) {
        self.with_device(serial, |diag| diag.last_data_received_at = Some(at));
        let due = self
            .liveness_persisted
            .get(serial)
            .is_none_or(|last| at - *last >= chrono::TimeDelta::seconds(LIVENESS_PERSIST_SECS));
        if due {
            self.flush_liveness(serial);
        }
    }

    /// Write the in-memory liveness timestamp through to the backend.
    pub fn flush_liveness(&self, serial: &str) {
        let Some(at) = self.with_device(serial, |diag| diag.last_data_received_at) else {
            return;
        };
        if self.liveness_persisted.insert(serial.to_owned(), at) == Some(at) {
            return;
        }
        self.persist(&device_key(serial, LAST_DATA_RECEIVED_AT), &at.to_rfc3339());
    }

    /// Remember whether the connection was left enabled, for startup resume.
    pub fn set_enabled(&self, serial: &str, enabled: bool) {
        self.with_device(serial, |diag| {
            diag.enabled = Some(enabled);
            self.persist(&device_key(serial, ENABLED), &enabled.to_string());
        });
    }

    pub fn enabled(&self, serial: &str) -> Option<bool> {
        self.with_device(serial, |diag| diag.enabled)
    }

    pub fn snapshot(&self, serial: &str) -> DeviceDiagnostics {
        self.with_device(serial, |diag| diag.clone())
    }

    /// Serials with anything recorded in the backend or in memory.
    pub fn known_devices(&self) -> Result<Vec<String>, CoreError> {
        let mut serials: Vec<String> = self
            .backend
            .keys()?
            .iter()
            .filter_map(|key| key.strip_prefix("device."))
            .filter_map(|rest| rest.rsplit_once('.').map(|(serial, _)| serial.to_owned()))
            .chain(self.devices.iter().map(|e| e.key().clone()))
            .collect();
        serials.sort();
        serials.dedup();
        Ok(serials)
    }

    // ── Internals ───────────────────────────────────────────────────

    fn with_device<T>(&self, serial: &str, f: impl FnOnce(&mut DeviceDiagnostics) -> T) -> T {
        self.restore_once();
        let mut entry = self
            .devices
            .entry(serial.to_owned())
            .or_insert_with(|| self.load_device(serial));
        f(entry.value_mut())
    }

    fn load_device(&self, serial: &str) -> DeviceDiagnostics {
        let diag = DeviceDiagnostics {
            connection_attempts: self
                .read_u64(&device_key(serial, DeviceCounter::ConnectionAttempts.into())),
            backoff_counter: self.read_u64(&device_key(serial, DeviceCounter::BackoffCounter.into())),
            next_backoff_at: self.read_parsed(&device_key(serial, NEXT_BACKOFF_AT)),
            last_data_received_at: self.read_parsed(&device_key(serial, LAST_DATA_RECEIVED_AT)),
            enabled: self.read_parsed(&device_key(serial, ENABLED)),
        };
        debug!(serial, ?diag, "restored grill diagnostics");
        diag
    }

    fn lock_globals(&self) -> std::sync::MutexGuard<'_, HashMap<GlobalCounter, u64>> {
        self.globals.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_u64(&self, key: &str) -> u64 {
        self.read_parsed(key).unwrap_or(0)
    }

    fn read_parsed<T: std::str::FromStr>(&self, key: &str) -> Option<T> {
        match self.backend.get(key) {
            Ok(Some(raw)) => {
                let parsed = raw.parse().ok();
                if parsed.is_none() {
                    warn!(key, value = %raw, "ignoring unparseable stored diagnostic");
                }
                parsed
            }
            Ok(None) => None,
            Err(e) => {
                warn!(key, error = %e, "failed to read stored diagnostic");
                None
            }
        }
    }

    fn persist(&self, key: &str, value: &str) {
        if let Err(e) = self.backend.set(key, value) {
            warn!(key, error = %e, "failed to persist diagnostic");
        }
    }

    fn forget(&self, key: &str) {
        if let Err(e) = self.backend.remove(key) {
            warn!(key, error = %e, "failed to clear diagnostic");
        }
    }
}

fn global_key(counter: GlobalCounter) -> String {
    format!("global.{counter}")
}

fn device_key(serial: &str, field: &str) -> String {
    format!("device.{serial}.{field}")
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use pretty_assertions::assert_eq;

    use super::*;

    /// Counts backend reads of the login counter.
    struct CountingStore {
        inner: MemoryStore,
        login_reads: AtomicUsize,
    }

    impl KeyValueStore for CountingStore {
        fn get(&self, key: &str) -> Result<Option<String>, CoreError> {
            if key == "global.login_calls" {
                self.login_reads.fetch_add(1, Ordering::SeqCst);
                // Widen the race window.
                std::thread::sleep(std::time::Duration::from_millis(20));
            }
            self.inner.get(key)
        }

        fn set(&self, key: &str, value: &str) -> Result<(), CoreError> {
            self.inner.set(key, value)
        }

        fn remove(&self, key: &str) -> Result<(), CoreError> {
            self.inner.remove(key)
        }

        fn keys(&self) -> Result<Vec<String>, CoreError> {
            self.inner.keys()
        }
    }

    #[test]
    fn concurrent_restore_reads_backend_once() {
        let backend = Arc::new(CountingStore {
            inner: MemoryStore::with_values([("global.login_calls", "7")]),
            login_reads: AtomicUsize::new(0),
        });
        let store = DiagnosticsStore::new(backend.clone());

        std::thread::scope(|s| {
            for i in 0..16 {
                let store = &store;
                s.spawn(move || {
                    store.restore_once();
                    store.register_device(&format!("G{i}"));
                    store.increment_global(GlobalCounter::LoginCalls);
                });
            }
        });

        assert_eq!(backend.login_reads.load(Ordering::SeqCst), 1);
        assert_eq!(store.get_global(GlobalCounter::LoginCalls), 7 + 16);
        assert_eq!(
            backend.inner.get("global.login_calls").unwrap().as_deref(),
            Some("23")
        );
    }

    #[test]
    fn device_counters_restore_and_reset() {
        let at = Utc::now();
        let backend = Arc::new(MemoryStore::with_values([
            ("device.G1.connection_attempts", "4".to_owned()),
            ("device.G1.backoff_counter", "2".to_owned()),
            ("device.G1.next_backoff_at", at.to_rfc3339()),
            ("device.G1.enabled", "true".to_owned()),
        ]));
        let store = DiagnosticsStore::new(backend.clone());

        assert_eq!(store.increment_device("G1", DeviceCounter::ConnectionAttempts), 5);
        let snap = store.snapshot("G1");
        assert_eq!(snap.backoff_counter, 2);
        assert_eq!(snap.next_backoff_at, Some(at));
        assert_eq!(snap.enabled, Some(true));

        store.clear_backoff("G1");
        assert_eq!(store.get_device("G1", DeviceCounter::BackoffCounter), 0);
        assert_eq!(store.snapshot("G1").next_backoff_at, None);
        assert_eq!(backend.get("device.G1.next_backoff_at").unwrap(), None);
        assert_eq!(
            backend.get("device.G1.connection_attempts").unwrap().as_deref(),
            Some("5")
        );
    }

    #[test]
    fn known_devices_lists_stored_serials() {
        let backend = Arc::new(MemoryStore::with_values([
            ("device.G32-0001.connection_attempts", "1"),
            ("device.G32-0002.enabled", "false"),
            ("global.login_calls", "1"),
        ]));
        let store = DiagnosticsStore::new(backend);
        store.register_device("G32-0003");

        assert_eq!(
            store.known_devices().unwrap(),
            vec!["G32-0001", "G32-0002", "G32-0003"]
        );
    }

    #[test]
    fn liveness_writes_are_spaced_out() {
        let backend = Arc::new(MemoryStore::new());
        let store = DiagnosticsStore::new(backend.clone());
        let stored = || {
            backend
                .get("device.G1.last_data_received_at")
                .unwrap()
                .map(|raw| raw.parse::<DateTime<Utc>>().unwrap())
        };
        let start = Utc::now();
        let secs = chrono::TimeDelta::seconds;

        store.record_data_received("G1", start);
        assert_eq!(stored(), Some(start));

        store.record_data_received("G1", start + secs(10));
        assert_eq!(stored(), Some(start));
        assert_eq!(
            store.snapshot("G1").last_data_received_at,
            Some(start + secs(10))
        );

        store.record_data_received("G1", start + secs(60));
        assert_eq!(stored(), Some(start + secs(60)));

        store.record_data_received("G1", start + secs(75));
        store.flush_liveness("G1");
        assert_eq!(stored(), Some(start + secs(75)));
    }

    #[test]
    fn flushing_without_data_writes_nothing() {
        let backend = Arc::new(MemoryStore::new());
        let store = DiagnosticsStore::new(backend.clone());

        store.flush_liveness("G1");

        assert!(backend.keys().unwrap().is_empty());
    }

    #[test]
    fn garbage_values_fall_back_to_defaults() {
        let backend = Arc::new(MemoryStore::with_values([
            ("global.grill_list_calls", "many"),
            ("device.G1.last_data_received_at", "yesterday"),
        ]));
        let store = DiagnosticsStore::new(backend);

        assert_eq!(store.get_global(GlobalCounter::GrillListCalls), 0);
        assert_eq!(store.snapshot("G1").last_data_received_at, None);
    }
}
