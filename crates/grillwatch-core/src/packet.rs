//! Status frame decoder.
//!
//! Every frame is 51 bytes, big-endian:
//!
//! | Offset | Len | Field                          |
//! |--------|-----|--------------------------------|
//! | 0      | 2   | header `A3 3A`                 |
//! | 2      | 4   | device serial                  |
//! | 6      | 16  | zone 1-4 then probe 1-4 temps  |
//! | 22     | 2   | gas weight (g)                 |
//! | 24     | 1   | firebox open (`01`)            |
//! | 25     | 1   | light on (`01`)                |
//! | 26     | 5   | unknown                        |
//! | 31     | 1   | gas level (%)                  |
//! | 32     | 19  | unknown                        |
//!
//! Temperatures are two packed-BCD bytes: `18 53` reads as
//! `18*10 + 53/10 = 185.3`. Only a wrong length or header fails the whole
//! frame; a bad temperature field becomes `None` and decoding carries on.

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use grillwatch_api::FRAME_LEN;

use crate::config::DecoderConfig;
use crate::model::Reading;

pub const HEADER: [u8; 2] = [0xA3, 0x3A];

const SERIAL_OFFSET: usize = 2;
const TEMPS_OFFSET: usize = 6;
const GAS_WEIGHT_OFFSET: usize = 22;
const FIREBOX_OFFSET: usize = 24;
const LIGHT_OFFSET: usize = 25;
const GAS_LEVEL_OFFSET: usize = 31;

const TEMP_FIELDS: [&str; 8] = [
    "zone1", "zone2", "zone3", "zone4", "probe1", "probe2", "probe3", "probe4",
];

/// Byte patterns that mean "no value" in a temperature field.
const SENTINELS: [[u8; 2]; 3] = [
    [0xFF, 0xFF], // no probe inserted
    [0xEE, 0xEE], // sensor fault
    [0x00, 0x00], // slot not populated
];

/// Frame-level decode failure. Either one means the stream is out of sync.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("expected a {FRAME_LEN}-byte frame, got {0} bytes")]
    BadLength(usize),

    #[error("bad frame header {:02x}{:02x}", .0[0], .0[1])]
    BadHeader([u8; 2]),
}

/// Decodes status frames with a given plausibility range.
#[derive(Debug, Clone, Default)]
pub struct PacketDecoder {
    config: DecoderConfig,
}

impl PacketDecoder {
    pub fn new(config: DecoderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &DecoderConfig {
        &self.config
    }

    /// Decode one frame.
    pub fn decode(&self, bytes: &[u8]) -> Result<Reading, DecodeError> {
        let frame: &[u8; FRAME_LEN] = bytes
            .try_into()
            .map_err(|_| DecodeError::BadLength(bytes.len()))?;

        if frame[..2] != HEADER {
            return Err(DecodeError::BadHeader([frame[0], frame[1]]));
        }

        let mut temps = [None; 8];
        for (i, slot) in temps.iter_mut().enumerate() {
            let at = TEMPS_OFFSET + i * 2;
            *slot = self.temperature(TEMP_FIELDS[i], [frame[at], frame[at + 1]]);
        }

        let gas_level = frame[GAS_LEVEL_OFFSET];

        Ok(Reading {
            serial: [
                frame[SERIAL_OFFSET],
                frame[SERIAL_OFFSET + 1],
                frame[SERIAL_OFFSET + 2],
                frame[SERIAL_OFFSET + 3],
            ],
            zones: [temps[0], temps[1], temps[2], temps[3]],
            probes: [temps[4], temps[5], temps[6], temps[7]],
            gas_weight: u16::from_be_bytes([frame[GAS_WEIGHT_OFFSET], frame[GAS_WEIGHT_OFFSET + 1]]),
            gas_level,
            gas_low: gas_level < self.config.gas_low_threshold,
            firebox_open: frame[FIREBOX_OFFSET] == 0x01,
            light_on: frame[LIGHT_OFFSET] == 0x01,
            raw: Bytes::copy_from_slice(frame),
        })
    }

    fn temperature(&self, field: &str, bytes: [u8; 2]) -> Option<f64> {
        if SENTINELS.contains(&bytes) {
            return None;
        }

        let (Some(whole), Some(frac)) = (bcd_value(bytes[0]), bcd_value(bytes[1])) else {
            debug!(field, bytes = %hex::encode(bytes), "temperature field is not BCD");
            return None;
        };

        // whole*10 + frac/10, computed in tenths to keep the value exact.
        let tenths = u16::from(whole) * 100 + u16::from(frac);
        let value = f64::from(tenths) / 10.0;
        if value < self.config.min_temperature || value > self.config.max_temperature {
            debug!(field, value, "temperature outside plausible range");
            return None;
        }
        Some(value)
    }
}

/// Decode with the default plausibility range.
pub fn decode(bytes: &[u8]) -> Result<Reading, DecodeError> {
    PacketDecoder::default().decode(bytes)
}

/// Build the frame `reading` decodes from.
///
/// Unknown regions are taken from `reading.raw` when it holds a full
/// frame and zeroed otherwise. Temperatures that cannot be expressed
/// (`None`, negative, or 1000 °C and above) are written as the
/// "no probe" sentinel.
pub fn encode(reading: &Reading) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    if reading.raw.len() == FRAME_LEN {
        frame.copy_from_slice(&reading.raw);
    }

    frame[..2].copy_from_slice(&HEADER);
    frame[SERIAL_OFFSET..SERIAL_OFFSET + 4].copy_from_slice(&reading.serial);

    for (i, temp) in reading.zones.iter().chain(&reading.probes).enumerate() {
        let at = TEMPS_OFFSET + i * 2;
        frame[at..at + 2].copy_from_slice(&encode_temperature(*temp));
    }

    frame[GAS_WEIGHT_OFFSET..GAS_WEIGHT_OFFSET + 2]
        .copy_from_slice(&reading.gas_weight.to_be_bytes());
    frame[FIREBOX_OFFSET] = u8::from(reading.firebox_open);
    frame[LIGHT_OFFSET] = u8::from(reading.light_on);
    frame[GAS_LEVEL_OFFSET] = reading.gas_level;
    frame
}

/// Two decimal digits packed in one byte, or `None` if a nibble is > 9.
fn bcd_value(byte: u8) -> Option<u8> {
    let (hi, lo) = (byte >> 4, byte & 0x0F);
    (hi <= 9 && lo <= 9).then_some(hi * 10 + lo)
}

fn to_bcd(value: u32) -> u8 {
    let tens = u8::try_from(value / 10).unwrap_or(0);
    let ones = u8::try_from(value % 10).unwrap_or(0);
    (tens << 4) | ones
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::as_conversions
)]
fn encode_temperature(temp: Option<f64>) -> [u8; 2] {
    let Some(value) = temp.filter(|v| (0.0..1000.0).contains(v)) else {
        return SENTINELS[0];
    };
    let tenths = (value * 10.0).round() as u32;
    if tenths >= 10_000 {
        return SENTINELS[0];
    }
    [to_bcd(tenths / 100), to_bcd(tenths % 100)]
}
