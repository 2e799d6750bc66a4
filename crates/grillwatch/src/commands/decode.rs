//! Offline frame decoding.

use serde::Serialize;

use grillwatch_core::packet;
use grillwatch_core::{DecoderConfig, PacketDecoder, Reading};

use crate::cli::{DecodeArgs, GlobalOpts};
use crate::error::CliError;
use crate::output;

#[derive(Serialize)]
struct DecodeReport {
    #[serde(flatten)]
    reading: Reading,
    #[serde(skip_serializing_if = "Option::is_none")]
    roundtrip: Option<RoundTrip>,
}

#[derive(Serialize)]
struct RoundTrip {
    exact: bool,
    /// Byte offsets where the re-encoded frame differs from the input.
    differing_offsets: Vec<usize>,
}

/// Strip whitespace and `:` separators, then hex-decode.
fn parse_hex(input: &str) -> Result<Vec<u8>, CliError> {
    let cleaned: String = input
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':')
        .collect();
    hex::decode(&cleaned).map_err(|e| CliError::Decode {
        reason: format!("invalid hex: {e}"),
    })
}

fn decoder_config(args: &DecodeArgs) -> Result<DecoderConfig, CliError> {
    let mut config = DecoderConfig::default();
    if let Some(min) = args.min_temp {
        config.min_temperature = min;
    }
    if let Some(max) = args.max_temp {
        config.max_temperature = max;
    }
    if config.min_temperature >= config.max_temperature {
        return Err(CliError::Validation {
            field: "min-temp".into(),
            reason: format!(
                "must be below max-temp ({} >= {})",
                config.min_temperature, config.max_temperature
            ),
        });
    }
    Ok(config)
}

fn roundtrip(reading: &Reading, input: &[u8]) -> RoundTrip {
    let encoded = packet::encode(reading);
    let differing_offsets: Vec<usize> = encoded
        .iter()
        .zip(input)
        .enumerate()
        .filter_map(|(i, (a, b))| (a != b).then_some(i))
        .collect();
    RoundTrip {
        exact: differing_offsets.is_empty(),
        differing_offsets,
    }
}

fn temps_row(temps: &[Option<f64>; 4]) -> String {
    temps
        .iter()
        .map(|t| format!("{:>6}", output::temperature(*t)))
        .collect::<Vec<_>>()
        .join(" ")
}

fn detail(report: &DecodeReport) -> String {
    let r = &report.reading;
    let mut lines = vec![
        format!("Serial:    {}", hex::encode(r.serial)),
        format!("Zones:    {}", temps_row(&r.zones)),
        format!("Probes:   {}", temps_row(&r.probes)),
        format!(
            "Gas:       {} g, {}%{}",
            r.gas_weight,
            r.gas_level,
            if r.gas_low { " (low)" } else { "" }
        ),
        format!(
            "Firebox:   {}",
            if r.firebox_open { "open" } else { "closed" }
        ),
        format!("Light:     {}", if r.light_on { "on" } else { "off" }),
    ];
    if let Some(ref rt) = report.roundtrip {
        if rt.exact {
            lines.push("Roundtrip: exact".into());
        } else {
            let offsets: Vec<String> = rt.differing_offsets.iter().map(ToString::to_string).collect();
            lines.push(format!("Roundtrip: differs at {}", offsets.join(", ")));
        }
    }
    lines.join("\n")
}

pub fn handle(args: &DecodeArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let bytes = parse_hex(&args.hex)?;
    let decoder = PacketDecoder::new(decoder_config(args)?);
    let reading = decoder.decode(&bytes).map_err(|e| CliError::Decode {
        reason: e.to_string(),
    })?;

    let report = DecodeReport {
        roundtrip: args.roundtrip.then(|| roundtrip(&reading, &bytes)),
        reading,
    };

    let out = output::render_single(&global.output, &report, detail, |r| r.reading.raw_hex())?;
    output::print_output(&out, global.quiet);
    Ok(())
}
