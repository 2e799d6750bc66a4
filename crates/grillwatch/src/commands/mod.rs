//! Command handlers, one module per top-level subcommand.

pub mod config_cmd;
pub mod connection;
pub mod decode;
pub mod diagnostics;
pub mod grills;
pub mod watch;

mod util;
