// grillwatch-api: Async Rust client for the grill cloud REST API and the
// real-time telemetry socket

pub mod auth;
pub mod cloud;
pub mod error;
pub mod stream;
pub mod transport;

pub use auth::{AuthTokens, Credentials};
pub use cloud::models::{GasBuddyInfo, GrillInfo, UserInfo};
pub use cloud::{CloudClient, DEFAULT_API_URL, LoginSession};
pub use error::{AuthErrorKind, ConnectErrorKind, Error};
pub use stream::{FRAME_LEN, FrameCodec, StreamEndpoint, TelemetrySocket};
pub use transport::{TlsMode, TransportConfig};
