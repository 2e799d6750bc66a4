//! Config subcommand handlers.

use std::collections::HashMap;

use dialoguer::{Input, Password, Select};
use serde::Serialize;

use crate::cli::{ConfigArgs, ConfigCommand, GlobalOpts, OutputFormat};
use crate::config::{self, Config, Profile};
use crate::error::CliError;
use crate::output;

use super::util::prompt_err;

// ── Helpers ─────────────────────────────────────────────────────────

/// Format config for display, masking sensitive fields.
fn format_config_redacted(cfg: &Config) -> String {
    use std::fmt::Write;
    let mut out = String::new();

    if let Some(ref default) = cfg.default_profile {
        let _ = writeln!(out, "default_profile = \"{default}\"");
    }
    let _ = writeln!(out);
    let _ = writeln!(out, "[defaults]");
    let _ = writeln!(out, "output = \"{}\"", cfg.defaults.output);
    let _ = writeln!(out, "color = \"{}\"", cfg.defaults.color);
    let _ = writeln!(out, "timeout = {}", cfg.defaults.timeout);

    let mut names: Vec<_> = cfg.profiles.keys().collect();
    names.sort();
    for name in names {
        let p = &cfg.profiles[name];
        let _ = writeln!(out);
        let _ = writeln!(out, "[profiles.{name}]");
        let _ = writeln!(out, "email = \"{}\"", p.email);
        if p.password.is_some() {
            let _ = writeln!(out, "password = \"****\"");
        }
        if let Some(ref url) = p.api_url {
            let _ = writeln!(out, "api_url = \"{url}\"");
        }
        if let Some(ref host) = p.stream_host {
            let _ = writeln!(out, "stream_host = \"{host}\"");
        }
        if let Some(port) = p.stream_port {
            let _ = writeln!(out, "stream_port = {port}");
        }
        if let Some(ref path) = p.diagnostics_path {
            let _ = writeln!(out, "diagnostics_path = \"{}\"", path.display());
        }
        if let Some(enable) = p.enable_new_devices {
            let _ = writeln!(out, "enable_new_devices = {enable}");
        }
        let mut serials: Vec<_> = p.trackers.keys().collect();
        serials.sort();
        for serial in serials {
            let _ = writeln!(out, "trackers.{serial} = \"{}\"", p.trackers[serial]);
        }
    }

    out
}

/// JSON view of the config with passwords masked.
#[derive(Serialize)]
struct RedactedConfig {
    default_profile: Option<String>,
    profiles: HashMap<String, Profile>,
}

impl From<&Config> for RedactedConfig {
    fn from(cfg: &Config) -> Self {
        let profiles = cfg
            .profiles
            .iter()
            .map(|(name, p)| {
                let mut p = p.clone();
                if p.password.is_some() {
                    p.password = Some("****".into());
                }
                (name.clone(), p)
            })
            .collect();
        Self {
            default_profile: cfg.default_profile.clone(),
            profiles,
        }
    }
}

fn save_config(cfg: &Config) -> Result<(), CliError> {
    config::save_config(cfg)?;
    Ok(())
}

fn prompt_password() -> Result<String, CliError> {
    let pass = Password::new()
        .with_prompt("Password")
        .interact()
        .map_err(prompt_err)?;
    if pass.is_empty() {
        return Err(CliError::Validation {
            field: "password".into(),
            reason: "cannot be empty".into(),
        });
    }
    Ok(pass)
}

/// Store the password in the system keyring or return it for plaintext config.
///
/// Returns `Some(password)` if the user chose plaintext, `None` if stored in keyring.
fn prompt_keyring_storage(password: &str, profile_name: &str) -> Result<Option<String>, CliError> {
    let choices = &[
        "Store in system keyring (recommended)",
        "Save to config file (plaintext)",
    ];
    let selection = Select::new()
        .with_prompt("Where to store the password?")
        .items(choices)
        .default(0)
        .interact()
        .map_err(prompt_err)?;

    if selection == 0 {
        grillwatch_config::store_password(profile_name, password)?;
        eprintln!("   ✓ Password stored in system keyring");
        Ok(None)
    } else {
        Ok(Some(password.to_owned()))
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub fn handle(args: ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    match args.command {
        ConfigCommand::Init => init(),

        ConfigCommand::Show => {
            let cfg = config::load_config()?;
            let out = match global.output {
                OutputFormat::Table | OutputFormat::Plain => {
                    format_config_redacted(&cfg)
                }
                _ => output::render_single(
                    &global.output,
                    &RedactedConfig::from(&cfg),
                    |_| String::new(),
                    |_| String::new(),
                )?,
            };
            output::print_output(&out, global.quiet);
            Ok(())
        }

        ConfigCommand::Path => {
            println!("{}", config::config_path().display());
            Ok(())
        }

        ConfigCommand::Profiles => {
            let cfg = config::load_config_or_default();
            let default = cfg.default_profile.as_deref().unwrap_or("default");
            if cfg.profiles.is_empty() {
                eprintln!("No profiles configured. Run: grillwatch config init");
            } else {
                let mut names: Vec<_> = cfg.profiles.keys().collect();
                names.sort();
                for name in names {
                    let marker = if name == default { " *" } else { "" };
                    println!("{name}{marker}");
                }
            }
            Ok(())
        }

        ConfigCommand::Use { name } => {
            let mut cfg = config::load_config_or_default();
            if !cfg.profiles.contains_key(&name) {
                return Err(CliError::ProfileNotFound {
                    available: config::available_profiles(&cfg),
                    name,
                });
            }
            cfg.default_profile = Some(name.clone());
            save_config(&cfg)?;
            eprintln!("✓ Default profile set to '{name}'");
            Ok(())
        }

        ConfigCommand::SetPassword { profile } => {
            let cfg = config::load_config_or_default();
            let profile_name = profile.unwrap_or_else(|| config::active_profile_name(global, &cfg));
            let password = prompt_password()?;
            grillwatch_config::store_password(&profile_name, &password)?;
            eprintln!("✓ Password for profile '{profile_name}' stored in system keyring");
            Ok(())
        }
    }
}

/// Interactive wizard: account email, password storage, optional endpoints.
fn init() -> Result<(), CliError> {
    let config_path = config::config_path();
    eprintln!("grillwatch configuration");
    eprintln!("   Config path: {}\n", config_path.display());

    let profile_name: String = Input::new()
        .with_prompt("Profile name")
        .default("default".into())
        .interact_text()
        .map_err(prompt_err)?;

    let email: String = Input::new()
        .with_prompt("Account email")
        .interact_text()
        .map_err(prompt_err)?;
    if email.trim().is_empty() {
        return Err(CliError::Validation {
            field: "email".into(),
            reason: "cannot be empty".into(),
        });
    }

    let password = prompt_password()?;
    let password = prompt_keyring_storage(&password, &profile_name)?;

    let api_url: String = Input::new()
        .with_prompt("Cloud API URL")
        .default(grillwatch_api::DEFAULT_API_URL.into())
        .interact_text()
        .map_err(prompt_err)?;

    let profile = Profile {
        email: email.trim().to_owned(),
        password,
        api_url: (api_url != grillwatch_api::DEFAULT_API_URL).then_some(api_url),
        ..Profile::default()
    };

    // Validate before writing; a missing password may still come from the environment
    match grillwatch_config::profile_to_session_config(&profile, &profile_name) {
        Ok(_) | Err(grillwatch_config::ConfigError::NoCredentials { .. }) => {}
        Err(e) => return Err(e.into()),
    }

    let mut cfg = config::load_config_or_default();
    cfg.profiles.insert(profile_name.clone(), profile);
    cfg.default_profile = Some(profile_name.clone());
    save_config(&cfg)?;

    eprintln!("\n✓ Configuration written to {}", config_path.display());
    eprintln!("  Active profile: {profile_name}");
    eprintln!("\n  Test it: grillwatch grills");
    Ok(())
}
