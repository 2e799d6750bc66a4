//! Shared configuration for the grillwatch CLI.
//!
//! TOML profiles, credential resolution (keyring + env + plaintext),
//! and translation to `grillwatch_core::SessionConfig`. The CLI adds
//! flag-aware overrides on top.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use grillwatch_api::{Credentials, StreamEndpoint, TlsMode, TransportConfig};
use grillwatch_core::{DecoderConfig, RetryPolicy, SessionConfig};

const KEYRING_SERVICE: &str = "grillwatch";
const PASSWORD_ENV: &str = "GRILLWATCH_PASSWORD";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no credentials configured for profile '{profile}'")]
    NoCredentials { profile: String },

    #[error("profile '{profile}' not found")]
    UnknownProfile { profile: String },

    #[error("keyring error: {0}")]
    Keyring(String),

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level TOML configuration.
#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    /// Default profile name.
    pub default_profile: Option<String>,

    /// Global defaults.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named account profiles.
    #[serde(default)]
    pub profiles: HashMap<String, Profile>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_profile: Some("default".into()),
            defaults: Defaults::default(),
            profiles: HashMap::new(),
        }
    }
}

impl Config {
    /// Look up `name`, or the default profile when `name` is `None`.
    pub fn profile(&self, name: Option<&str>) -> Result<(&str, &Profile), ConfigError> {
        let name = name
            .or(self.default_profile.as_deref())
            .unwrap_or("default");
        self.profiles
            .get_key_value(name)
            .map(|(k, p)| (k.as_str(), p))
            .ok_or_else(|| ConfigError::UnknownProfile {
                profile: name.into(),
            })
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct Defaults {
    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default = "default_color")]
    pub color: String,

    #[serde(default = "default_timeout")]
    pub timeout: u64,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            output: default_output(),
            color: default_color(),
            timeout: default_timeout(),
        }
    }
}

fn default_output() -> String {
    "table".into()
}
fn default_color() -> String {
    "auto".into()
}
fn default_timeout() -> u64 {
    30
}

/// A named account profile.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Profile {
    /// Account email.
    pub email: String,

    /// Password (plaintext; prefer keyring or `GRILLWATCH_PASSWORD`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// Override the cloud REST base URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,

    /// Override the telemetry relay host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_host: Option<String>,

    /// Override the telemetry relay port.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_port: Option<u16>,

    /// Path to a custom CA certificate for the REST API.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    /// HTTP timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Where persisted diagnostics live. Defaults to the platform data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics_path: Option<PathBuf>,

    /// Whether grills seen for the first time start enabled.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_new_devices: Option<bool>,

    /// Keep the in-memory activity log.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activity_log: Option<bool>,

    #[serde(default)]
    pub retry: RetryTuning,

    #[serde(default)]
    pub decoder: DecoderTuning,

    /// Serial number → presence tracker id.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub trackers: HashMap<String, String>,
}

/// Overrides for [`RetryPolicy`]. Durations in seconds.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RetryTuning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rapid_attempts: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rapid_delay: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_initial: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_max: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff_budget: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub heartbeat_timeout: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout: Option<u64>,
}

/// Overrides for [`DecoderConfig`].
#[derive(Debug, Default, Clone, PartialEq, Deserialize, Serialize)]
pub struct DecoderTuning {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_low_threshold: Option<u8>,
}

// ── Paths ───────────────────────────────────────────────────────────

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "grillwatch", "grillwatch")
}

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("config.toml"),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

/// Default location of the persisted diagnostics store.
pub fn default_diagnostics_path() -> PathBuf {
    project_dirs().map_or_else(
        || dirs_fallback().join("diagnostics.json"),
        |dirs| dirs.data_dir().join("diagnostics.json"),
    )
}

/// Diagnostics path for `profile`: its override or the default.
pub fn diagnostics_path(profile: &Profile) -> PathBuf {
    profile
        .diagnostics_path
        .clone()
        .unwrap_or_else(default_diagnostics_path)
}

fn dirs_fallback() -> PathBuf {
    let mut p = PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()));
    p.push(".config");
    p.push("grillwatch");
    p
}

// ── Config loading ──────────────────────────────────────────────────

/// Load the full Config from the canonical file + environment.
pub fn load_config() -> Result<Config, ConfigError> {
    load_config_from(&config_path())
}

/// Load from `path` layered over defaults, then `GRILLWATCH_*` env vars.
///
/// Nested keys use a double underscore, e.g.
/// `GRILLWATCH_DEFAULTS__OUTPUT=json`.
pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let figment = Figment::new()
        .merge(Serialized::defaults(Config::default()))
        .merge(Toml::file(path))
        .merge(Env::prefixed("GRILLWATCH_").split("__"));

    let config: Config = figment.extract()?;
    Ok(config)
}

/// Load config, returning a default if the file doesn't exist.
pub fn load_config_or_default() -> Config {
    load_config().unwrap_or_default()
}

// ── Config saving ───────────────────────────────────────────────────

/// Serialize config to TOML and write to the canonical config path.
pub fn save_config(cfg: &Config) -> Result<(), ConfigError> {
    save_config_to(cfg, &config_path())
}

pub fn save_config_to(cfg: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let toml_str = toml::to_string_pretty(cfg)?;
    std::fs::write(path, toml_str)?;
    Ok(())
}

// ── Credential resolution (without CLI flags) ───────────────────────

fn keyring_entry(profile_name: &str) -> Result<keyring::Entry, ConfigError> {
    keyring::Entry::new(KEYRING_SERVICE, &format!("{profile_name}/password"))
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

/// Resolve the account password: keyring, then `GRILLWATCH_PASSWORD`,
/// then plaintext in the profile.
pub fn resolve_password(profile: &Profile, profile_name: &str) -> Result<SecretString, ConfigError> {
    // 1. Keyring
    if let Ok(entry) = keyring_entry(profile_name) {
        if let Ok(pw) = entry.get_password() {
            return Ok(SecretString::from(pw));
        }
    }

    // 2. Env var
    if let Ok(pw) = std::env::var(PASSWORD_ENV) {
        return Ok(SecretString::from(pw));
    }

    // 3. Plaintext in config
    if let Some(ref pw) = profile.password {
        return Ok(SecretString::from(pw.clone()));
    }

    Err(ConfigError::NoCredentials {
        profile: profile_name.into(),
    })
}

/// Store `password` in the system keyring for `profile_name`.
pub fn store_password(profile_name: &str, password: &str) -> Result<(), ConfigError> {
    keyring_entry(profile_name)?
        .set_password(password)
        .map_err(|e| ConfigError::Keyring(e.to_string()))
}

pub fn resolve_credentials(profile: &Profile, profile_name: &str) -> Result<Credentials, ConfigError> {
    if profile.email.trim().is_empty() {
        return Err(ConfigError::NoCredentials {
            profile: profile_name.into(),
        });
    }
    let password = resolve_password(profile, profile_name)?;
    Ok(Credentials::new(profile.email.trim(), password))
}

// ── Translation ─────────────────────────────────────────────────────

/// Build a `SessionConfig` from a profile, without CLI flag overrides.
pub fn profile_to_session_config(
    profile: &Profile,
    profile_name: &str,
) -> Result<SessionConfig, ConfigError> {
    let credentials = resolve_credentials(profile, profile_name)?;
    let mut config = SessionConfig::new(credentials);

    if let Some(ref api_url) = profile.api_url {
        url::Url::parse(api_url).map_err(|_| ConfigError::Validation {
            field: "api_url".into(),
            reason: format!("invalid URL: {api_url}"),
        })?;
        config.api_url.clone_from(api_url);
    }

    config.transport = TransportConfig {
        tls: profile
            .ca_cert
            .clone()
            .map_or(TlsMode::System, TlsMode::CustomCa),
        timeout: Duration::from_secs(profile.timeout.unwrap_or_else(default_timeout)),
    };

    let default_stream = StreamEndpoint::default();
    config.stream = StreamEndpoint {
        host: profile.stream_host.clone().unwrap_or(default_stream.host),
        port: profile.stream_port.unwrap_or(default_stream.port),
    };

    config.retry = retry_policy(&profile.retry)?;
    config.decoder = decoder_config(&profile.decoder)?;
    config.trackers.clone_from(&profile.trackers);
    config.enable_new_devices = profile.enable_new_devices.unwrap_or(true);
    config.activity_log = profile.activity_log.unwrap_or(false);

    Ok(config)
}

fn retry_policy(tuning: &RetryTuning) -> Result<RetryPolicy, ConfigError> {
    let defaults = RetryPolicy::default();
    let secs = |value: Option<u64>, fallback: Duration| value.map_or(fallback, Duration::from_secs);

    let policy = RetryPolicy {
        rapid_attempts: tuning.rapid_attempts.unwrap_or(defaults.rapid_attempts),
        rapid_delay: secs(tuning.rapid_delay, defaults.rapid_delay),
        backoff_initial: secs(tuning.backoff_initial, defaults.backoff_initial),
        backoff_max: secs(tuning.backoff_max, defaults.backoff_max),
        backoff_budget: secs(tuning.backoff_budget, defaults.backoff_budget),
        heartbeat_timeout: secs(tuning.heartbeat_timeout, defaults.heartbeat_timeout),
        connect_timeout: secs(tuning.connect_timeout, defaults.connect_timeout),
    };

    if policy.backoff_initial.is_zero() {
        return Err(invalid("retry.backoff_initial", "must be at least 1 second"));
    }
    if policy.backoff_max < policy.backoff_initial {
        return Err(invalid(
            "retry.backoff_max",
            "must not be shorter than retry.backoff_initial",
        ));
    }
    if policy.heartbeat_timeout.is_zero() {
        return Err(invalid("retry.heartbeat_timeout", "must be at least 1 second"));
    }
    Ok(policy)
}

fn decoder_config(tuning: &DecoderTuning) -> Result<DecoderConfig, ConfigError> {
    let defaults = DecoderConfig::default();
    let config = DecoderConfig {
        min_temperature: tuning.min_temperature.unwrap_or(defaults.min_temperature),
        max_temperature: tuning.max_temperature.unwrap_or(defaults.max_temperature),
        gas_low_threshold: tuning.gas_low_threshold.unwrap_or(defaults.gas_low_threshold),
    };

    if config.min_temperature >= config.max_temperature {
        return Err(invalid(
            "decoder.min_temperature",
            "must be below decoder.max_temperature",
        ));
    }
    if config.gas_low_threshold > 100 {
        return Err(invalid("decoder.gas_low_threshold", "must be a percentage (0-100)"));
    }
    Ok(config)
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use secrecy::ExposeSecret;

    use super::*;

    const SAMPLE: &str = r#"
default_profile = "home"

[defaults]
output = "json"

[profiles.home]
email = "ada@example.com"
password = "from-file"
stream_port = 4600
activity_log = true

[profiles.home.retry]
rapid_attempts = 3
backoff_max = 120

[profiles.home.decoder]
max_temperature = 450.0

[profiles.home.trackers]
G32-1 = "phone.ada"
"#;

    fn write_sample(dir: &tempfile::TempDir) -> PathBuf {
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        path
    }

    fn profile(email: &str) -> Profile {
        Profile {
            email: email.into(),
            password: Some("pw".into()),
            ..Profile::default()
        }
    }

    #[test]
    fn loads_profiles_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&write_sample(&dir)).unwrap();

        assert_eq!(config.defaults.output, "json");
        assert_eq!(config.defaults.timeout, 30);
        let (name, home) = config.profile(None).unwrap();
        assert_eq!(name, "home");
        assert_eq!(home.email, "ada@example.com");
        assert_eq!(home.stream_port, Some(4600));
        assert_eq!(home.retry.rapid_attempts, Some(3));
        assert_eq!(home.trackers.get("G32-1").map(String::as_str), Some("phone.ada"));
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&dir.path().join("absent.toml")).unwrap();

        assert_eq!(config.default_profile.as_deref(), Some("default"));
        assert!(config.profiles.is_empty());
        assert!(matches!(
            config.profile(None),
            Err(ConfigError::UnknownProfile { .. })
        ));
    }

    #[test]
    fn save_then_load_keeps_profiles() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        let mut p = profile("bob@example.com");
        p.trackers.insert("G1".into(), "beacon".into());
        config.profiles.insert("default".into(), p);
        save_config_to(&config, &path).unwrap();

        let loaded = load_config_from(&path).unwrap();
        let (_, p) = loaded.profile(Some("default")).unwrap();
        assert_eq!(p.email, "bob@example.com");
        assert_eq!(p.trackers.get("G1").map(String::as_str), Some("beacon"));
    }

    #[test]
    fn profile_translates_with_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config_from(&write_sample(&dir)).unwrap();
        let (name, home) = config.profile(Some("home")).unwrap();

        let session = profile_to_session_config(home, name).unwrap();

        assert_eq!(session.credentials.email, "ada@example.com");
        assert_eq!(session.api_url, grillwatch_api::DEFAULT_API_URL);
        assert_eq!(session.stream.port, 4600);
        assert_eq!(session.stream.host, StreamEndpoint::default().host);
        assert_eq!(session.retry.rapid_attempts, 3);
        assert_eq!(session.retry.backoff_max, Duration::from_secs(120));
        assert_eq!(session.retry.backoff_initial, Duration::from_secs(30));
        assert!((session.decoder.max_temperature - 450.0).abs() < f64::EPSILON);
        assert_eq!(session.decoder.gas_low_threshold, 10);
        assert!(session.activity_log);
        assert!(session.enable_new_devices);
        assert_eq!(session.trackers.len(), 1);
    }

    #[test]
    fn plaintext_password_is_last_resort() {
        // Only meaningful when neither keyring nor env supplies one.
        if std::env::var(PASSWORD_ENV).is_ok() {
            return;
        }
        let p = profile("ada@example.com");
        let secret = resolve_password(&p, "grillwatch-test-no-keyring").unwrap();
        assert_eq!(secret.expose_secret(), "pw");
    }

    #[test]
    fn missing_email_is_no_credentials() {
        let p = profile("  ");
        assert!(matches!(
            profile_to_session_config(&p, "default"),
            Err(ConfigError::NoCredentials { .. })
        ));
    }

    #[test]
    fn rejects_bad_api_url() {
        let mut p = profile("ada@example.com");
        p.api_url = Some("not a url".into());
        let err = profile_to_session_config(&p, "default").unwrap_err();
        assert!(matches!(err, ConfigError::Validation { ref field, .. } if field == "api_url"));
    }

    #[test]
    fn rejects_inverted_temperature_range() {
        let mut p = profile("ada@example.com");
        p.decoder.min_temperature = Some(300.0);
        p.decoder.max_temperature = Some(100.0);
        assert!(matches!(
            profile_to_session_config(&p, "default"),
            Err(ConfigError::Validation { .. })
        ));
    }

    #[test]
    fn rejects_backoff_cap_below_initial() {
        let mut p = profile("ada@example.com");
        p.retry.backoff_initial = Some(60);
        p.retry.backoff_max = Some(30);
        let err = profile_to_session_config(&p, "default").unwrap_err();
        assert!(err.to_string().contains("retry.backoff_max"));
    }
}
