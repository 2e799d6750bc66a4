// ── Socket seam ──
//
// The supervisor opens sockets through `Connector` so the state machine
// can be driven by scripted streams in tests.

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;

use grillwatch_api::{StreamEndpoint, TelemetrySocket};

use crate::model::Device;

/// A subscribed stream of raw frames.
pub trait FrameStream: Send {
    /// Next frame, an I/O failure, or `None` once the peer closed.
    fn next_frame(&mut self) -> impl Future<Output = Option<Result<Bytes, grillwatch_api::Error>>> + Send;
}

/// Opens a subscribed frame stream for one grill.
pub trait Connector: Send + Sync + 'static {
    type Stream: FrameStream + 'static;

    fn connect(
        &self,
        device: &Device,
    ) -> impl Future<Output = Result<Self::Stream, grillwatch_api::Error>> + Send;
}

impl FrameStream for TelemetrySocket {
    fn next_frame(&mut self) -> impl Future<Output = Option<Result<Bytes, grillwatch_api::Error>>> + Send {
        TelemetrySocket::next_frame(self)
    }
}

/// Connects to the cloud telemetry relay over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    endpoint: StreamEndpoint,
    timeout: Duration,
}

impl TcpConnector {
    pub fn new(endpoint: StreamEndpoint, timeout: Duration) -> Self {
        Self { endpoint, timeout }
    }
}

impl Connector for TcpConnector {
    type Stream = TelemetrySocket;

    fn connect(
        &self,
        device: &Device,
    ) -> impl Future<Output = Result<TelemetrySocket, grillwatch_api::Error>> + Send {
        let endpoint = self.endpoint.clone();
        let serial = device.serial().to_owned();
        let token = device.token();
        let timeout = self.timeout;
        async move { TelemetrySocket::connect(&endpoint, &serial, &token, timeout).await }
    }
}
