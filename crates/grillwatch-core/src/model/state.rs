// ── Connection state ──

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Why a supervisor is sitting in [`ConnectionState::Disabled`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisableReason {
    /// The operator switched the connection off.
    Manual,
    /// The backoff budget ran out. Presence can revive it; so can the operator.
    BudgetExhausted,
}

/// Per-grill connection state, owned by that grill's supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disabled {
        reason: DisableReason,
    },
    /// Socket attempt in flight or open but no frame decoded yet.
    Connecting,
    /// At least one frame decoded on the current socket.
    Connected,
    RapidRetry {
        attempt: u32,
    },
    Backoff {
        attempt: u32,
        next_attempt_at: DateTime<Utc>,
    },
}

impl ConnectionState {
    pub const INITIAL: Self = Self::Disabled {
        reason: DisableReason::Manual,
    };

    /// The operator-facing "connection enabled" value.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Self::Disabled { .. })
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected)
    }

    pub fn is_retrying(&self) -> bool {
        matches!(self, Self::RapidRetry { .. } | Self::Backoff { .. })
    }
}

impl Default for ConnectionState {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disabled {
                reason: DisableReason::Manual,
            } => f.write_str("disabled"),
            Self::Disabled {
                reason: DisableReason::BudgetExhausted,
            } => f.write_str("disabled (retries exhausted)"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::RapidRetry { attempt } => write!(f, "rapid retry {attempt}"),
            Self::Backoff {
                attempt,
                next_attempt_at,
            } => write!(
                f,
                "backoff {attempt} (next at {})",
                next_attempt_at.format("%H:%M:%S")
            ),
        }
    }
}
