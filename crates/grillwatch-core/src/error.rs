// ── Core error types ──
//
// User-facing errors from grillwatch-core. Consumers never see HTTP status
// codes or JSON parse failures directly. The `From<grillwatch_api::Error>`
// impl translates transport-layer errors into domain-appropriate variants.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Session errors ───────────────────────────────────────────────
    #[error("Authentication failed: {message}")]
    InvalidCredentials { message: String },

    /// The token was rejected again right after a refresh.
    #[error("Session expired and could not be renewed")]
    SessionExpired,

    #[error("Session not started -- call start() first")]
    NotStarted,

    // ── Connection errors ────────────────────────────────────────────
    #[error("Cannot reach {target}: {reason}")]
    ConnectionFailed { target: String, reason: String },

    #[error("Request timed out")]
    Timeout,

    // ── Data errors ──────────────────────────────────────────────────
    #[error("Unknown grill: {serial}")]
    UnknownDevice { serial: String },

    #[error("API error: {message}")]
    Api {
        message: String,
        /// HTTP status code (if applicable).
        status: Option<u16>,
    },

    // ── Persistence errors ───────────────────────────────────────────
    #[error("Diagnostics store error: {message}")]
    Storage { message: String },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Returns `true` for failures worth retrying later (network trouble,
    /// server hiccups) as opposed to operator-actionable ones.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::Timeout => true,
            Self::Api { status, .. } => status.is_some_and(|s| s >= 500 || s == 429),
            _ => false,
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<grillwatch_api::Error> for CoreError {
    fn from(err: grillwatch_api::Error) -> Self {
        use grillwatch_api::Error as ApiError;

        match err {
            ApiError::InvalidCredentials { message } => CoreError::InvalidCredentials { message },
            ApiError::TokenExpired => CoreError::SessionExpired,
            ApiError::Transport(ref e) => {
                if e.is_timeout() {
                    CoreError::Timeout
                } else if e.is_connect() {
                    CoreError::ConnectionFailed {
                        target: e
                            .url()
                            .map_or_else(|| "<unknown>".into(), ToString::to_string),
                        reason: e.to_string(),
                    }
                } else {
                    CoreError::Api {
                        message: e.to_string(),
                        status: e.status().map(|s| s.as_u16()),
                    }
                }
            }
            ApiError::InvalidUrl(e) => CoreError::Config {
                message: format!("Invalid URL: {e}"),
            },
            ApiError::Tls(msg) => CoreError::ConnectionFailed {
                target: String::new(),
                reason: format!("TLS error: {msg}"),
            },
            ApiError::Api { status, message } => CoreError::Api {
                message,
                status: Some(status),
            },
            ApiError::Deserialization { message, body: _ } => {
                CoreError::Internal(format!("Deserialization error: {message}"))
            }
            ApiError::Connect { kind, reason } => CoreError::ConnectionFailed {
                target: "telemetry socket".into(),
                reason: format!("{kind}: {reason}"),
            },
            ApiError::Subscribe(reason) => CoreError::ConnectionFailed {
                target: "telemetry socket".into(),
                reason,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_map_to_domain_variants() {
        let invalid: CoreError = grillwatch_api::Error::InvalidCredentials {
            message: "HTTP 401".into(),
        }
        .into();
        assert!(matches!(invalid, CoreError::InvalidCredentials { .. }));

        let expired: CoreError = grillwatch_api::Error::TokenExpired.into();
        assert!(matches!(expired, CoreError::SessionExpired));

        let server: CoreError = grillwatch_api::Error::Api {
            status: 502,
            message: "bad gateway".into(),
        }
        .into();
        assert!(server.is_transient());
    }
}
