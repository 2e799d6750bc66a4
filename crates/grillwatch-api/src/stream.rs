//! Real-time telemetry socket.
//!
//! Each grill pushes fixed-size status frames over a long-lived TCP
//! connection to the cloud relay. After connecting, the client writes a
//! single JSON subscribe line naming the grill and its token; the relay
//! then streams raw 51-byte frames with no further framing.
//!
//! This module only cuts the byte stream into frames. Interpreting the
//! frame contents is left to the caller.
//!
//! ```rust,ignore
//! let endpoint = StreamEndpoint::default();
//! let mut socket = TelemetrySocket::connect(&endpoint, "G32-0001", &token, Duration::from_secs(10)).await?;
//! while let Some(frame) = socket.next_frame().await {
//!     let frame = frame?;
//!     println!("{} bytes", frame.len());
//! }
//! ```

use std::fmt;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use futures_util::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, FramedRead};
use tracing::{debug, trace};

use crate::error::{ConnectErrorKind, Error};

/// Size of one telemetry frame on the wire.
pub const FRAME_LEN: usize = 51;

pub const DEFAULT_STREAM_HOST: &str = "socket.ottowildeapp.com";
pub const DEFAULT_STREAM_PORT: u16 = 4502;

// ── StreamEndpoint ───────────────────────────────────────────────────

/// Host and port of the telemetry relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEndpoint {
    pub host: String,
    pub port: u16,
}

impl Default for StreamEndpoint {
    fn default() -> Self {
        Self {
            host: DEFAULT_STREAM_HOST.to_owned(),
            port: DEFAULT_STREAM_PORT,
        }
    }
}

impl fmt::Display for StreamEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ── FrameCodec ───────────────────────────────────────────────────────

/// Cuts the relay byte stream into [`FRAME_LEN`]-byte frames.
///
/// A trailing partial frame at EOF is yielded as-is (shorter than
/// `FRAME_LEN`) so the consumer sees the truncation instead of losing it.
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec;

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = std::io::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < FRAME_LEN {
            src.reserve(FRAME_LEN - src.len());
            return Ok(None);
        }
        Ok(Some(src.split_to(FRAME_LEN).freeze()))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            Ok(None)
        } else {
            Ok(Some(src.split().freeze()))
        }
    }
}

// ── TelemetrySocket ──────────────────────────────────────────────────

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SubscribeMessage<'a> {
    serial_number: &'a str,
    token: &'a str,
}

/// An open, subscribed telemetry connection for one grill.
///
/// Dropping it closes the socket.
#[derive(Debug)]
pub struct TelemetrySocket {
    frames: FramedRead<TcpStream, FrameCodec>,
}

impl TelemetrySocket {
    /// Open a TCP connection to `endpoint` and subscribe to `serial`.
    ///
    /// Connect failures are classified into [`Error::Connect`]; a failure
    /// writing the subscribe line is [`Error::Subscribe`].
    pub async fn connect(
        endpoint: &StreamEndpoint,
        serial: &str,
        token: &SecretString,
        timeout: Duration,
    ) -> Result<Self, Error> {
        debug!(%endpoint, serial, "opening telemetry socket");

        let connect = TcpStream::connect((endpoint.host.as_str(), endpoint.port));
        let mut stream = match tokio::time::timeout(timeout, connect).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => return Err(Error::from_io(&e)),
            Err(_) => {
                return Err(Error::Connect {
                    kind: ConnectErrorKind::Timeout,
                    reason: format!("no answer from {endpoint} within {timeout:?}"),
                });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            trace!(error = %e, "could not set TCP_NODELAY");
        }

        let message = SubscribeMessage {
            serial_number: serial,
            token: token.expose_secret(),
        };
        let mut line =
            serde_json::to_vec(&message).map_err(|e| Error::Subscribe(e.to_string()))?;
        line.push(b'\n');

        stream
            .write_all(&line)
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;
        stream
            .flush()
            .await
            .map_err(|e| Error::Subscribe(e.to_string()))?;

        debug!(serial, "subscribed to telemetry");
        Ok(Self {
            frames: FramedRead::new(stream, FrameCodec),
        })
    }

    /// Wait for the next frame.
    ///
    /// Returns `None` once the relay closes the connection. A frame
    /// shorter than [`FRAME_LEN`] means the stream ended mid-frame.
    pub async fn next_frame(&mut self) -> Option<Result<Bytes, Error>> {
        let next = self.frames.next().await?;
        Some(match next {
            Ok(frame) => {
                trace!(frame = %hex::encode(&frame), "frame received");
                Ok(frame)
            }
            Err(e) => Err(Error::from_io(&e)),
        })
    }
}

#[allow(clippy::unwrap_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_waits_for_full_frame() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&[0xA3_u8; FRAME_LEN - 1][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0x3A; FRAME_LEN + 3]);
        let frame = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.len(), FRAME_LEN);
        assert_eq!(buf.len(), 3);
    }

    #[test]
    fn codec_yields_partial_tail_at_eof() {
        let mut codec = FrameCodec;
        let mut buf = BytesMut::from(&[0u8; FRAME_LEN + 10][..]);

        let first = codec.decode_eof(&mut buf).unwrap().unwrap();
        assert_eq!(first.len(), FRAME_LEN);

        let tail = codec.decode_eof(&mut buf).unwrap().unwrap();
        assert_eq!(tail.len(), 10);

        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn endpoint_display() {
        assert_eq!(
            StreamEndpoint::default().to_string(),
            "socket.ottowildeapp.com:4502"
        );
    }
}
