//! Shared helpers for command handlers.

use std::sync::Arc;

use grillwatch_core::{DiagnosticsStore, JsonFileStore};

use crate::cli::GlobalOpts;
use crate::config;
use crate::error::CliError;

/// Open the diagnostics store selected by `--store` or the active profile.
pub fn open_store(global: &GlobalOpts) -> Result<DiagnosticsStore, CliError> {
    let path = config::resolve_store_path(global);
    tracing::debug!(path = %path.display(), "opening diagnostics store");
    let backend = JsonFileStore::open(path)?;
    Ok(DiagnosticsStore::new(Arc::new(backend)))
}

/// Map a dialoguer / interactive I/O failure into CliError.
pub fn prompt_err(e: impl std::fmt::Display) -> CliError {
    CliError::Validation {
        field: "interactive".into(),
        reason: format!("prompt failed: {e}"),
    }
}

/// Resolves on Ctrl-C, or on SIGTERM/SIGQUIT where those exist.
#[cfg(unix)]
pub async fn shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        result = tokio::signal::ctrl_c() => result?,
        _ = sigterm.recv() => {}
        _ = sigquit.recv() => {}
    }
    Ok(())
}

#[cfg(not(unix))]
pub async fn shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}
