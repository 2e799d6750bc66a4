// ── Domain model ──
//
// Canonical grill types shared by the supervisor, the session manager,
// and presentation consumers.

pub mod device;
pub mod reading;
pub mod state;

pub use device::{Device, DeviceMeta, GasBottle};
pub use reading::{Reading, Telemetry};
pub use state::{ConnectionState, DisableReason};
