//! Persisted diagnostics: global call counters and per-grill connection history.

use chrono::{DateTime, Utc};
use serde::Serialize;
use tabled::Tabled;

use grillwatch_core::{DeviceDiagnostics, GlobalDiagnostics};

use crate::cli::{DiagnosticsArgs, GlobalOpts, OutputFormat};
use crate::error::CliError;
use crate::output;

use super::util;

#[derive(Serialize)]
struct DeviceEntry {
    serial: String,
    #[serde(flatten)]
    diagnostics: DeviceDiagnostics,
}

#[derive(Serialize)]
struct Report {
    globals: GlobalDiagnostics,
    devices: Vec<DeviceEntry>,
}

#[derive(Tabled)]
struct DeviceRow {
    #[tabled(rename = "Serial")]
    serial: String,
    #[tabled(rename = "Enabled")]
    enabled: String,
    #[tabled(rename = "Attempts")]
    attempts: u64,
    #[tabled(rename = "Backoff")]
    backoff: u64,
    #[tabled(rename = "Next Backoff")]
    next_backoff: String,
    #[tabled(rename = "Last Data")]
    last_data: String,
}

fn timestamp(at: Option<DateTime<Utc>>) -> String {
    at.map_or_else(|| "-".into(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string())
}

impl From<&DeviceEntry> for DeviceRow {
    fn from(e: &DeviceEntry) -> Self {
        let d = &e.diagnostics;
        Self {
            serial: e.serial.clone(),
            enabled: d.enabled.map_or_else(|| "-".into(), |b| b.to_string()),
            attempts: d.connection_attempts,
            backoff: d.backoff_counter,
            next_backoff: timestamp(d.next_backoff_at),
            last_data: timestamp(d.last_data_received_at),
        }
    }
}

fn detail(entry: &DeviceEntry) -> String {
    let d = &entry.diagnostics;
    [
        format!("Serial:       {}", entry.serial),
        format!(
            "Enabled:      {}",
            d.enabled.map_or_else(|| "-".into(), |b| b.to_string())
        ),
        format!("Attempts:     {}", d.connection_attempts),
        format!("Backoff:      {}", d.backoff_counter),
        format!("Next backoff: {}", timestamp(d.next_backoff_at)),
        format!("Last data:    {}", timestamp(d.last_data_received_at)),
    ]
    .join("\n")
}

pub fn handle(args: &DiagnosticsArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let store = util::open_store(global)?;
    let known = store.known_devices()?;

    if let Some(ref serial) = args.serial {
        if !known.contains(serial) {
            return Err(CliError::NotFound {
                resource_type: "grill".into(),
                identifier: serial.clone(),
                list_command: "diagnostics".into(),
            });
        }
        let entry = DeviceEntry {
            serial: serial.clone(),
            diagnostics: store.snapshot(serial),
        };
        let out = output::render_single(&global.output, &entry, detail, |e| e.serial.clone())?;
        output::print_output(&out, global.quiet);
        return Ok(());
    }

    let report = Report {
        globals: store.globals(),
        devices: known
            .into_iter()
            .map(|serial| DeviceEntry {
                diagnostics: store.snapshot(&serial),
                serial,
            })
            .collect(),
    };

    let out = match global.output {
        OutputFormat::Json => serde_json::to_string_pretty(&report)?,
        OutputFormat::JsonCompact => serde_json::to_string(&report)?,
        OutputFormat::Plain => report
            .devices
            .iter()
            .map(|e| e.serial.clone())
            .collect::<Vec<_>>()
            .join("\n"),
        OutputFormat::Table => {
            let table = output::render_list(
                &global.output,
                &report.devices,
                |e| DeviceRow::from(e),
                |e| e.serial.clone(),
            )?;
            format!(
                "Logins: {}  Grill lists: {}\n{table}",
                report.globals.login_calls, report.globals.grill_list_calls
            )
        }
    };
    output::print_output(&out, global.quiet);
    Ok(())
}
