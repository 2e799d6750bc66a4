// ── Runtime session configuration ──
//
// These types describe *how* to reach the cloud and how hard to retry.
// They carry credential data and tuning, but never touch disk. The CLI
// constructs a `SessionConfig` and hands it in.

use std::collections::HashMap;
use std::time::Duration;

use grillwatch_api::{Credentials, StreamEndpoint, TransportConfig};

/// Reconnect schedule for one supervisor.
///
/// After a loss the supervisor makes `rapid_attempts` quick attempts
/// `rapid_delay` apart, then falls back to an exponential backoff starting
/// at `backoff_initial` and capped at `backoff_max`. The summed backoff
/// waits may not exceed `backoff_budget`; the attempt that would exceed it
/// disables the device instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub rapid_attempts: u32,
    pub rapid_delay: Duration,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub backoff_budget: Duration,
    /// A connected socket with no frame for this long counts as lost.
    pub heartbeat_timeout: Duration,
    /// Bound on a single TCP connect + subscribe.
    pub connect_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            rapid_attempts: 5,
            rapid_delay: Duration::from_secs(2),
            backoff_initial: Duration::from_secs(30),
            backoff_max: Duration::from_secs(300),
            backoff_budget: Duration::from_secs(30 * 60),
            heartbeat_timeout: Duration::from_secs(90),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Wait before backoff attempt `attempt` (1-based):
    /// `min(initial * 2^(attempt-1), max)`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff_initial
            .saturating_mul(1_u32 << exp)
            .min(self.backoff_max)
    }
}

/// Tuning for the packet decoder.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderConfig {
    /// Lowest plausible temperature in °C; anything below decodes to `None`.
    pub min_temperature: f64,
    /// Highest plausible temperature in °C; anything above decodes to `None`.
    pub max_temperature: f64,
    /// Gas level (percent) below which a reading is flagged as low.
    pub gas_low_threshold: u8,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            min_temperature: -50.0,
            max_temperature: 600.0,
            gas_low_threshold: 10,
        }
    }
}

/// Everything the session manager needs to run.
///
/// Built by the CLI from a config profile; core never reads config files.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Cloud REST base URL.
    pub api_url: String,
    pub credentials: Credentials,
    pub transport: TransportConfig,
    pub stream: StreamEndpoint,
    pub retry: RetryPolicy,
    pub decoder: DecoderConfig,
    /// Serial number → presence tracker id.
    pub trackers: HashMap<String, String>,
    /// Whether a grill seen for the first time starts enabled.
    pub enable_new_devices: bool,
    /// Record human-readable connection events in the activity log.
    pub activity_log: bool,
}

impl SessionConfig {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            api_url: grillwatch_api::DEFAULT_API_URL.to_owned(),
            credentials,
            transport: TransportConfig::default(),
            stream: StreamEndpoint::default(),
            retry: RetryPolicy::default(),
            decoder: DecoderConfig::default(),
            trackers: HashMap::new(),
            enable_new_devices: true,
            activity_log: false,
        }
    }
}
