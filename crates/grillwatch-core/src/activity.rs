// ── Activity log ──
//
// A short, human-readable history of connection events for display next
// to the live readings. Complements `tracing`: tracing is for operators
// reading logs, this is for whoever is looking at the grill dashboard.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Entries kept before the oldest is dropped.
pub const ACTIVITY_LOG_CAPACITY: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActivityEntry {
    pub at: DateTime<Utc>,
    pub serial: String,
    pub message: String,
}

/// Bounded, newest-first, switchable event history.
#[derive(Debug)]
pub struct ActivityLog {
    enabled: AtomicBool,
    entries: Mutex<VecDeque<ActivityEntry>>,
}

impl ActivityLog {
    pub fn new(enabled: bool) -> Self {
        Self {
            enabled: AtomicBool::new(enabled),
            entries: Mutex::new(VecDeque::with_capacity(ACTIVITY_LOG_CAPACITY)),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Relaxed)
    }

    /// Turning the log off also clears it.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Relaxed);
        if !enabled {
            self.clear();
        }
    }

    pub fn record(&self, serial: &str, message: impl Into<String>) {
        if !self.is_enabled() {
            return;
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.push_front(ActivityEntry {
            at: Utc::now(),
            serial: serial.to_owned(),
            message: message.into(),
        });
        entries.truncate(ACTIVITY_LOG_CAPACITY);
    }

    /// Newest first.
    pub fn entries(&self) -> Vec<ActivityEntry> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.iter().cloned().collect()
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_newest_fifty() {
        let log = ActivityLog::new(true);
        for i in 0..60 {
            log.record("G1", format!("event {i}"));
        }

        let entries = log.entries();
        assert_eq!(entries.len(), ACTIVITY_LOG_CAPACITY);
        assert_eq!(entries[0].message, "event 59");
        assert_eq!(entries[49].message, "event 10");
    }

    #[test]
    fn disabled_log_records_nothing() {
        let log = ActivityLog::new(true);
        log.record("G1", "kept");
        log.set_enabled(false);
        log.record("G1", "dropped");
        assert!(log.entries().is_empty());
    }
}
