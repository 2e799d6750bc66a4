//! Grill listing.

use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tabled::Tabled;

use grillwatch_api::{CloudClient, GrillInfo};
use grillwatch_core::{GasBottle, GlobalCounter};

use crate::cli::GlobalOpts;
use crate::config;
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Serialize)]
struct GrillEntry {
    serial: String,
    nickname: Option<String>,
    firmware: Option<String>,
    gas: Option<GasBottle>,
    /// `true` when the grill has its own socket token.
    own_token: bool,
}

impl From<GrillInfo> for GrillEntry {
    fn from(info: GrillInfo) -> Self {
        Self {
            own_token: info.subscription_token.is_some(),
            serial: info.serial_number,
            nickname: info.nickname,
            firmware: info.firmware_semantic_version,
            gas: info.gasbuddy_info.map(GasBottle::from),
        }
    }
}

#[derive(Tabled)]
struct GrillRow {
    #[tabled(rename = "Serial")]
    serial: String,
    #[tabled(rename = "Nickname")]
    nickname: String,
    #[tabled(rename = "Firmware")]
    firmware: String,
    #[tabled(rename = "Gas Capacity")]
    capacity: String,
    #[tabled(rename = "Token")]
    token: String,
}

impl From<&GrillEntry> for GrillRow {
    fn from(g: &GrillEntry) -> Self {
        Self {
            serial: g.serial.clone(),
            nickname: g.nickname.clone().unwrap_or_default(),
            firmware: g.firmware.clone().unwrap_or_else(|| "-".into()),
            capacity: g
                .gas
                .as_ref()
                .and_then(|gas| gas.capacity_kg)
                .map_or_else(|| "-".into(), |kg| format!("{kg:.1} kg")),
            token: if g.own_token { "grill" } else { "session" }.into(),
        }
    }
}

fn spinner(global: &GlobalOpts, message: &'static str) -> ProgressBar {
    if global.quiet || !std::io::IsTerminal::is_terminal(&std::io::stderr()) {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::with_template("{spinner} {msg}") {
        bar.set_style(style);
    }
    bar.set_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));
    bar
}

pub async fn handle(global: &GlobalOpts) -> Result<(), CliError> {
    let (profile_name, session) = config::resolve_session_config(global)?;
    let store = util::open_store(global)?;
    let client = CloudClient::new(&session.api_url, &session.transport)?;

    let bar = spinner(global, "Logging in");
    store.increment_global(GlobalCounter::LoginCalls);
    let login = match client.login(&session.credentials).await {
        Ok(login) => login,
        Err(e) => {
            bar.finish_and_clear();
            return Err(CliError::for_profile(e.into(), &profile_name));
        }
    };

    bar.set_message("Fetching grills");
    store.increment_global(GlobalCounter::GrillListCalls);
    let grills = client.list_grills(&login.tokens.access_token).await;
    bar.finish_and_clear();

    let entries: Vec<GrillEntry> = grills?.into_iter().map(GrillEntry::from).collect();
    let out = output::render_list(&global.output, &entries, |g| GrillRow::from(g), |g| {
        g.serial.clone()
    })?;
    output::print_output(&out, global.quiet);
    Ok(())
}
