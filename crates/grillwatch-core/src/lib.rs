//! Connection supervision and telemetry decoding between `grillwatch-api`
//! and presentation consumers (the CLI, or anything else that renders
//! readings).
//!
//! - **[`SessionManager`]**: Logs in, discovers grills, and runs one
//!   supervisor per grill. [`resync()`](SessionManager::resync) picks up
//!   added/removed grills and renewed tokens; token-expired failures get a
//!   single refresh-and-retry.
//!
//! - **[`SupervisorHandle`]**: Per-grill control and observation: an
//!   enable/disable switch, a `watch` of [`ConnectionState`], and a `watch`
//!   of the latest [`Telemetry`].
//!
//! - **[`PacketDecoder`]**: Pure decoding of the 51-byte status frame into
//!   a [`Reading`]. Sentinel and implausible temperatures become `None`;
//!   only length and header mismatches fail the frame.
//!
//! - **[`DiagnosticsStore`]**: Persistent counters over a
//!   [`KeyValueStore`], restored once per process.
//!
//! - **[`PresenceGate`]**: Optional per-grill tracker links that hold off
//!   connection attempts while nobody is around.

pub mod activity;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod model;
pub mod packet;
pub mod presence;
pub mod session;
pub mod supervisor;

// ── Primary re-exports ──────────────────────────────────────────────
pub use activity::{ActivityEntry, ActivityLog};
pub use config::{DecoderConfig, RetryPolicy, SessionConfig};
pub use diagnostics::{
    DeviceCounter, DeviceDiagnostics, DiagnosticsStore, GlobalCounter, GlobalDiagnostics,
    JsonFileStore, KeyValueStore, MemoryStore,
};
pub use error::CoreError;
pub use packet::{DecodeError, PacketDecoder};
pub use presence::{PresenceEvent, PresenceGate, PresenceOracle, TrackerRegistry};
pub use session::{AuthApi, ResyncSummary, SessionManager};
pub use supervisor::{Connector, FrameStream, SupervisorHandle, TcpConnector};

pub use model::{
    ConnectionState, Device, DeviceMeta, DisableReason, GasBottle, Reading, Telemetry,
};
