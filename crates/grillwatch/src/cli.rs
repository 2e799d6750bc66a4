//! Clap derive structures for the `grillwatch` CLI.
//!
//! Defines the complete command tree, global flags, and shared types.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

// ── Top-Level CLI ────────────────────────────────────────────────────

/// grillwatch -- live telemetry from cloud-connected grills
#[derive(Debug, Parser)]
#[command(
    name = "grillwatch",
    version,
    about = "Watch grill telemetry from the command line",
    long_about = "Logs in to the grill cloud, opens one supervised telemetry stream per grill,\n\
        and prints decoded readings and connection health as they arrive.",
    propagate_version = true,
    subcommand_required = true,
    arg_required_else_help = true
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalOpts,

    #[command(subcommand)]
    pub command: Command,
}

// ── Global Options ───────────────────────────────────────────────────

#[derive(Debug, Args)]
pub struct GlobalOpts {
    /// Account profile to use
    #[arg(long, short = 'p', env = "GRILLWATCH_PROFILE", global = true)]
    pub profile: Option<String>,

    /// Account email (overrides profile)
    #[arg(long, env = "GRILLWATCH_EMAIL", global = true)]
    pub email: Option<String>,

    /// Diagnostics store file (overrides profile)
    #[arg(long, env = "GRILLWATCH_STORE", global = true)]
    pub store: Option<PathBuf>,

    /// Output format
    #[arg(
        long,
        short = 'o',
        env = "GRILLWATCH_OUTPUT",
        default_value = "table",
        global = true
    )]
    pub output: OutputFormat,

    /// When to use color output
    #[arg(long, default_value = "auto", global = true)]
    pub color: ColorMode,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(long, short = 'v', action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,

    /// HTTP request timeout in seconds (overrides profile)
    #[arg(long, env = "GRILLWATCH_TIMEOUT", global = true)]
    pub timeout: Option<u64>,
}

// ── Output & Color Enums ─────────────────────────────────────────────

#[derive(Debug, Clone, ValueEnum)]
pub enum OutputFormat {
    /// Pretty table (default, interactive)
    Table,
    /// Pretty-printed JSON
    Json,
    /// Compact single-line JSON (one event per line for `watch`)
    JsonCompact,
    /// Plain text, one value per line (scripting)
    Plain,
}

#[derive(Debug, Clone, ValueEnum)]
pub enum ColorMode {
    /// Auto-detect (color if terminal is interactive)
    Auto,
    /// Always emit color codes
    Always,
    /// Never emit color codes
    Never,
}

// ── Top-Level Command Enum ───────────────────────────────────────────

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Stream live readings and connection state until interrupted
    #[command(alias = "w")]
    Watch(WatchArgs),

    /// List grills registered to the account
    #[command(alias = "ls")]
    Grills,

    /// Decode a raw status frame given as hex (offline)
    Decode(DecodeArgs),

    /// Show persisted connection diagnostics
    #[command(alias = "diag")]
    Diagnostics(DiagnosticsArgs),

    /// Turn a grill's connection on or off for the next `watch`
    #[command(alias = "conn")]
    Connection(ConnectionArgs),

    /// Manage CLI configuration
    Config(ConfigArgs),

    /// Generate shell completions
    Completions(CompletionsArgs),
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  WATCH
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct WatchArgs {
    /// Only print these grills (serial numbers); all are still supervised
    pub serials: Vec<String>,

    /// Stop after this long (e.g. "10m", "2h")
    #[arg(long, value_parser = humantime::parse_duration)]
    pub duration: Option<Duration>,

    /// Re-list grills at this interval to pick up new ones and renewed tokens
    #[arg(long, value_parser = humantime::parse_duration)]
    pub resync: Option<Duration>,

    /// Treat this presence tracker as away (repeatable); other configured
    /// trackers count as present
    #[arg(long = "away", value_name = "TRACKER")]
    pub away: Vec<String>,

    /// Print the activity log when the watch ends
    #[arg(long)]
    pub activity: bool,

    /// Suppress connection-state lines; print readings only
    #[arg(long)]
    pub readings_only: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  DECODE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct DecodeArgs {
    /// Frame bytes as hex; whitespace and ':' separators are ignored
    pub hex: String,

    /// Lowest plausible temperature in °C
    #[arg(long, allow_hyphen_values = true)]
    pub min_temp: Option<f64>,

    /// Highest plausible temperature in °C
    #[arg(long)]
    pub max_temp: Option<f64>,

    /// Re-encode the reading and report whether it reproduces the input
    #[arg(long)]
    pub roundtrip: bool,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  DIAGNOSTICS / CONNECTION
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct DiagnosticsArgs {
    /// Show a single grill
    pub serial: Option<String>,
}

#[derive(Debug, Args)]
pub struct ConnectionArgs {
    #[command(subcommand)]
    pub command: ConnectionCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConnectionCommand {
    /// Connect to this grill on the next watch
    Enable {
        /// Grill serial number
        serial: String,
    },

    /// Leave this grill disconnected on the next watch
    Disable {
        /// Grill serial number
        serial: String,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  CONFIG
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Create initial config file with guided setup
    Init,

    /// Display current configuration (secrets masked)
    Show,

    /// Print the config file path
    Path,

    /// List configured profiles
    Profiles,

    /// Set the default profile
    Use {
        /// Profile name to set as default
        name: String,
    },

    /// Store a password in the system keyring
    SetPassword {
        /// Profile name
        #[arg(long)]
        profile: Option<String>,
    },
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
//  COMPLETIONS
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Args)]
pub struct CompletionsArgs {
    /// Shell to generate completions for
    pub shell: clap_complete::Shell,
}
