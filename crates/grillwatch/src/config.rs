//! CLI configuration: a thin wrapper around `grillwatch_config` shared types.
//!
//! Re-exports the shared types and adds CLI-specific resolution that
//! respects `GlobalOpts` flag overrides (--email, --timeout, --store).

use std::path::PathBuf;
use std::time::Duration;

use grillwatch_core::SessionConfig;

use crate::cli::GlobalOpts;
use crate::error::CliError;

// ── Re-exports from shared crate ────────────────────────────────────

pub use grillwatch_config::{
    Config, Profile, config_path, load_config, load_config_or_default, save_config,
};

// ── CLI-specific helpers ────────────────────────────────────────────

/// Resolve the active profile name from CLI flags and config.
pub fn active_profile_name(global: &GlobalOpts, config: &Config) -> String {
    global
        .profile
        .clone()
        .or_else(|| config.default_profile.clone())
        .unwrap_or_else(|| "default".into())
}

/// Translate the active profile + global flags into a `SessionConfig`.
///
/// Without a profile, `--email` plus `GRILLWATCH_PASSWORD` is enough.
pub fn resolve_session_config(global: &GlobalOpts) -> Result<(String, SessionConfig), CliError> {
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);

    let mut profile = match cfg.profiles.get(&profile_name) {
        Some(p) => p.clone(),
        None if global.email.is_some() => Profile::default(),
        None if cfg.profiles.is_empty() => {
            return Err(CliError::NoConfig {
                path: config_path().display().to_string(),
            });
        }
        None => {
            return Err(CliError::ProfileNotFound {
                name: profile_name,
                available: available_profiles(&cfg),
            });
        }
    };

    // Flag > env > profile
    if let Some(ref email) = global.email {
        profile.email.clone_from(email);
    }

    let mut session = grillwatch_config::profile_to_session_config(&profile, &profile_name)?;

    if let Some(timeout) = global.timeout {
        session.transport.timeout = Duration::from_secs(timeout);
    }

    Ok((profile_name, session))
}

/// Diagnostics store path: `--store` flag, then profile, then platform default.
pub fn resolve_store_path(global: &GlobalOpts) -> PathBuf {
    if let Some(ref path) = global.store {
        return path.clone();
    }
    let cfg = load_config_or_default();
    let profile_name = active_profile_name(global, &cfg);
    cfg.profiles.get(&profile_name).map_or_else(
        grillwatch_config::default_diagnostics_path,
        grillwatch_config::diagnostics_path,
    )
}

pub fn available_profiles(cfg: &Config) -> String {
    let mut names: Vec<&str> = cfg.profiles.keys().map(String::as_str).collect();
    names.sort_unstable();
    if names.is_empty() {
        "(none)".into()
    } else {
        names.join(", ")
    }
}
