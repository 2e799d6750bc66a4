//! CLI error types with miette diagnostics.
//!
//! Maps `CoreError` and `ConfigError` variants into user-facing errors with
//! actionable help text.

use miette::Diagnostic;
use thiserror::Error;

use grillwatch_config::ConfigError;
use grillwatch_core::CoreError;

/// Process exit codes.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const USAGE: i32 = 2;
    pub const AUTH: i32 = 3;
    pub const NOT_FOUND: i32 = 4;
    pub const CONNECTION: i32 = 7;
    pub const TIMEOUT: i32 = 8;
}

#[derive(Debug, Error, Diagnostic)]
pub enum CliError {
    // ── Connection ───────────────────────────────────────────────────
    #[error("Could not reach {target}")]
    #[diagnostic(
        code(grillwatch::connection_failed),
        help("Check your network connection and try again.\nReason: {reason}")
    )]
    ConnectionFailed { target: String, reason: String },

    #[error("Request timed out")]
    #[diagnostic(
        code(grillwatch::timeout),
        help("Increase the timeout with --timeout or check the cloud service status.")
    )]
    Timeout,

    // ── Authentication ───────────────────────────────────────────────
    #[error("Authentication failed for profile '{profile}'")]
    #[diagnostic(
        code(grillwatch::auth_failed),
        help(
            "Verify the account email and password.\n\
             Run: grillwatch config set-password --profile {profile}"
        )
    )]
    AuthFailed { profile: String },

    #[error("Session expired and could not be renewed")]
    #[diagnostic(
        code(grillwatch::session_expired),
        help("Run the command again to log in afresh.")
    )]
    SessionExpired,

    #[error("No credentials configured for profile '{profile}'")]
    #[diagnostic(
        code(grillwatch::no_credentials),
        help(
            "Configure credentials with: grillwatch config init\n\
             Or set GRILLWATCH_EMAIL and GRILLWATCH_PASSWORD."
        )
    )]
    NoCredentials { profile: String },

    // ── Resources ────────────────────────────────────────────────────
    #[error("{resource_type} '{identifier}' not found")]
    #[diagnostic(
        code(grillwatch::not_found),
        help("Run: grillwatch {list_command} to see available {resource_type}s")
    )]
    NotFound {
        resource_type: String,
        identifier: String,
        list_command: String,
    },

    // ── API ──────────────────────────────────────────────────────────
    #[error("API error: {message}")]
    #[diagnostic(code(grillwatch::api_error))]
    ApiError { message: String },

    // ── Decoding ─────────────────────────────────────────────────────
    #[error("Cannot decode frame: {reason}")]
    #[diagnostic(
        code(grillwatch::decode),
        help("Pass exactly 51 bytes as hex, starting with a33a.")
    )]
    Decode { reason: String },

    // ── Validation ───────────────────────────────────────────────────
    #[error("Invalid value for {field}: {reason}")]
    #[diagnostic(code(grillwatch::validation))]
    Validation { field: String, reason: String },

    // ── Configuration ────────────────────────────────────────────────
    #[error("Profile '{name}' not found in configuration")]
    #[diagnostic(
        code(grillwatch::profile_not_found),
        help(
            "Available profiles: {available}\n\
             Create one with: grillwatch config init"
        )
    )]
    ProfileNotFound { name: String, available: String },

    #[error("Configuration file not found")]
    #[diagnostic(
        code(grillwatch::no_config),
        help(
            "Create one with: grillwatch config init\n\
             Expected at: {path}"
        )
    )]
    NoConfig { path: String },

    #[error(transparent)]
    #[diagnostic(code(grillwatch::config))]
    Config(Box<ConfigError>),

    #[error("Diagnostics store error: {message}")]
    #[diagnostic(
        code(grillwatch::storage),
        help("Check that the store path is writable, or pass --store.")
    )]
    Storage { message: String },

    // ── IO / Serialization ────────────────────────────────────────────
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    #[diagnostic(code(grillwatch::json))]
    Json(#[from] serde_json::Error),
}

impl CliError {
    /// Map this error to an exit code for process termination.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::ConnectionFailed { .. } => exit_code::CONNECTION,
            Self::AuthFailed { .. } | Self::NoCredentials { .. } | Self::SessionExpired => {
                exit_code::AUTH
            }
            Self::NotFound { .. } | Self::ProfileNotFound { .. } => exit_code::NOT_FOUND,
            Self::Timeout => exit_code::TIMEOUT,
            Self::Validation { .. } | Self::Decode { .. } => exit_code::USAGE,
            _ => exit_code::GENERAL,
        }
    }

    /// Like `From<CoreError>`, but names the profile on credential failures.
    pub fn for_profile(err: CoreError, profile: &str) -> Self {
        match err {
            CoreError::InvalidCredentials { .. } => CliError::AuthFailed {
                profile: profile.into(),
            },
            other => other.into(),
        }
    }
}

// ── ConfigError → CliError mapping ───────────────────────────────────

impl From<ConfigError> for CliError {
    fn from(err: ConfigError) -> Self {
        match err {
            ConfigError::NoCredentials { profile } => CliError::NoCredentials { profile },
            ConfigError::Validation { field, reason } => CliError::Validation { field, reason },
            other => CliError::Config(Box::new(other)),
        }
    }
}

// ── CoreError → CliError mapping ─────────────────────────────────────

impl From<CoreError> for CliError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::ConnectionFailed { target, reason } => {
                CliError::ConnectionFailed { target, reason }
            }

            CoreError::InvalidCredentials { message: _ } => CliError::AuthFailed {
                profile: "current".into(),
            },

            CoreError::SessionExpired => CliError::SessionExpired,

            CoreError::Timeout => CliError::Timeout,

            CoreError::UnknownDevice { serial } => CliError::NotFound {
                resource_type: "grill".into(),
                identifier: serial,
                list_command: "grills".into(),
            },

            CoreError::Storage { message } => CliError::Storage { message },

            CoreError::Config { message } => CliError::Validation {
                field: "config".into(),
                reason: message,
            },

            CoreError::Api { message, .. } | CoreError::Internal(message) => {
                CliError::ApiError { message }
            }

            CoreError::NotStarted => CliError::ApiError {
                message: "session not started".into(),
            },
        }
    }
}

impl From<grillwatch_api::Error> for CliError {
    fn from(err: grillwatch_api::Error) -> Self {
        CoreError::from(err).into()
    }
}
