use thiserror::Error;

/// Classification of an authentication failure.
///
/// The session layer branches on this to decide between surfacing the
/// error, refreshing the token once, or treating the failure as transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthErrorKind {
    /// Wrong email/password. Surfaced to the operator, never retried.
    InvalidCredentials,
    /// The bearer token was rejected. One refresh-and-retry is allowed.
    TokenExpired,
    /// Network trouble or a server-side hiccup.
    Transient,
}

/// Why a TCP connection to the telemetry socket failed or dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectErrorKind {
    Refused,
    Timeout,
    Reset,
}

impl std::fmt::Display for ConnectErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Refused => "refused",
            Self::Timeout => "timed out",
            Self::Reset => "reset",
        };
        f.write_str(label)
    }
}

/// Top-level error type for the `grillwatch-api` crate.
///
/// Covers the cloud REST surface (login, grill list, token refresh) and
/// the real-time TCP socket. `grillwatch-core` maps these into its own
/// diagnostics and retry decisions.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Login rejected (wrong email or password).
    #[error("Authentication failed: {message}")]
    InvalidCredentials { message: String },

    /// Bearer or refresh token rejected by the API.
    #[error("Token expired -- refresh required")]
    TokenExpired,

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// TLS setup or certificate error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── Cloud API ───────────────────────────────────────────────────
    /// Non-success HTTP status that is not an auth failure.
    #[error("API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },

    // ── Telemetry socket ────────────────────────────────────────────
    /// TCP connect or read failure.
    #[error("Telemetry socket {kind}: {reason}")]
    Connect {
        kind: ConnectErrorKind,
        reason: String,
    },

    /// Writing the subscribe message failed.
    #[error("Failed to subscribe on telemetry socket: {0}")]
    Subscribe(String),
}

impl Error {
    /// Classify this error for the session's auth handling.
    ///
    /// Returns `None` for errors that are neither auth failures nor
    /// transient (malformed responses, bad URLs, TLS setup).
    pub fn auth_kind(&self) -> Option<AuthErrorKind> {
        match self {
            Self::InvalidCredentials { .. } => Some(AuthErrorKind::InvalidCredentials),
            Self::TokenExpired => Some(AuthErrorKind::TokenExpired),
            _ if self.is_transient() => Some(AuthErrorKind::Transient),
            _ => None,
        }
    }

    /// Returns `true` if the token was rejected and a refresh might resolve it.
    pub fn is_token_expired(&self) -> bool {
        matches!(self, Self::TokenExpired)
    }

    /// Returns `true` if this is a transient error worth retrying.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect(),
            Self::Api { status, .. } => *status >= 500 || *status == 429,
            Self::Connect { .. } | Self::Subscribe(_) => true,
            _ => false,
        }
    }

    /// Build a socket error from an I/O failure, classifying the kind.
    pub fn from_io(err: &std::io::Error) -> Self {
        use std::io::ErrorKind;

        let kind = match err.kind() {
            ErrorKind::ConnectionRefused => ConnectErrorKind::Refused,
            ErrorKind::TimedOut | ErrorKind::WouldBlock => ConnectErrorKind::Timeout,
            _ => ConnectErrorKind::Reset,
        };
        Self::Connect {
            kind,
            reason: err.to_string(),
        }
    }
}
