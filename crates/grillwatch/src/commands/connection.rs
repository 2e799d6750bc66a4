//! Persisted connection switch, picked up by the next `watch`.

use crate::cli::{ConnectionArgs, ConnectionCommand, GlobalOpts};
use crate::error::CliError;

use super::util;

pub fn handle(args: &ConnectionArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let (serial, enabled) = match &args.command {
        ConnectionCommand::Enable { serial } => (serial, true),
        ConnectionCommand::Disable { serial } => (serial, false),
    };
    if serial.trim().is_empty() {
        return Err(CliError::Validation {
            field: "serial".into(),
            reason: "cannot be empty".into(),
        });
    }

    let store = util::open_store(global)?;
    store.set_enabled(serial, enabled);

    if !global.quiet {
        let verb = if enabled { "enabled" } else { "disabled" };
        eprintln!("✓ Connection to {serial} {verb}");
    }
    Ok(())
}
