// ── Telemetry readings ──

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

/// One decoded status frame.
///
/// Replaced wholesale on every successful decode; never merged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    /// Device serial bytes as carried in the frame.
    #[serde(serialize_with = "serialize_hex")]
    pub serial: [u8; 4],
    /// Zone 1-4 temperatures in °C; `None` for absent or implausible.
    pub zones: [Option<f64>; 4],
    /// Probe 1-4 temperatures in °C; `None` for absent or implausible.
    pub probes: [Option<f64>; 4],
    /// Gas bottle weight in grams.
    pub gas_weight: u16,
    /// Gas bottle level in percent.
    pub gas_level: u8,
    pub gas_low: bool,
    pub firebox_open: bool,
    pub light_on: bool,
    /// The frame exactly as received.
    #[serde(rename = "raw_hex", serialize_with = "serialize_hex")]
    pub raw: Bytes,
}

impl Reading {
    /// Lowercase hex dump of the raw frame.
    pub fn raw_hex(&self) -> String {
        hex::encode(&self.raw)
    }
}

/// The latest reading for a grill plus when it arrived.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Telemetry {
    pub reading: Reading,
    pub received_at: DateTime<Utc>,
}

fn serialize_hex<S: Serializer, T: AsRef<[u8]>>(bytes: &T, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&hex::encode(bytes))
}
