//! Inbound command payloads: parse, validate, reject.
//!
//! Validation happens here, at the bridge boundary — an out-of-range or
//! unparseable value is a logged error and never reaches a pump.

use thiserror::Error;

use crate::config::PumpConfig;
use crate::protocol::PumpMode;
use crate::session::FieldCommand;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MapperError {
    #[error("unknown pump '{0}'")]
    NotFound(String),

    #[error("field '{0}' does not accept commands")]
    UnknownField(String),

    #[error("invalid {field} payload '{payload}'")]
    Validation { field: &'static str, payload: String },

    #[error("{field} value {value} outside allowed range {min}..={max}")]
    OutOfRange {
        field: &'static str,
        value: i64,
        min: u8,
        max: u8,
    },
}

fn parse_switch(field: &'static str, payload: &str) -> Result<bool, MapperError> {
    match payload.trim().to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        _ => Err(MapperError::Validation {
            field,
            payload: payload.to_string(),
        }),
    }
}

/// Hubs publish numbers as `"75"` or `"75.0"` depending on the entity; both
/// are accepted, fractions are truncated.
fn parse_level(
    field: &'static str,
    payload: &str,
    min: u8,
    max: u8,
) -> Result<u8, MapperError> {
    let value: f64 = payload.trim().parse().map_err(|_| MapperError::Validation {
        field,
        payload: payload.to_string(),
    })?;
    let value = value as i64;
    if value < i64::from(min) || value > i64::from(max) {
        return Err(MapperError::OutOfRange {
            field,
            value,
            min,
            max,
        });
    }
    Ok(value as u8)
}

/// Turn a `/set` payload into a validated command for one pump.
pub fn decode_payload(
    field: &str,
    payload: &str,
    pump: &PumpConfig,
) -> Result<FieldCommand, MapperError> {
    match field {
        "power" => Ok(FieldCommand::Power(parse_switch("power", payload)?)),
        "feed" => Ok(FieldCommand::Feed(parse_switch("feed", payload)?)),
        "flow" => Ok(FieldCommand::Flow(parse_level(
            "flow",
            payload,
            pump.flow_min,
            pump.flow_max,
        )?)),
        "frequency" => Ok(FieldCommand::Frequency(parse_level(
            "frequency",
            payload,
            pump.frequency_min,
            pump.frequency_max,
        )?)),
        "mode" => {
            let mode = PumpMode::from_display_name(payload.trim()).ok_or_else(|| {
                MapperError::Validation {
                    field: "mode",
                    payload: payload.to_string(),
                }
            })?;
            Ok(FieldCommand::Mode(mode))
        }
        other => Err(MapperError::UnknownField(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pump() -> PumpConfig {
        PumpConfig {
            name: "Tank".into(),
            address: "tank:1".into(),
            id: "tank".into(),
            passcode: 0,
            flow_min: 30,
            flow_max: 100,
            frequency_min: 5,
            frequency_max: 20,
        }
    }

    #[test]
    fn switch_payload_forms() {
        let pump = pump();
        assert_eq!(
            decode_payload("power", "ON", &pump),
            Ok(FieldCommand::Power(true))
        );
        assert_eq!(
            decode_payload("power", "off", &pump),
            Ok(FieldCommand::Power(false))
        );
        assert_eq!(
            decode_payload("feed", "1", &pump),
            Ok(FieldCommand::Feed(true))
        );
        assert!(matches!(
            decode_payload("power", "maybe", &pump),
            Err(MapperError::Validation { field: "power", .. })
        ));
    }

    #[test]
    fn flow_accepts_integer_and_float_strings() {
        let pump = pump();
        assert_eq!(
            decode_payload("flow", "75", &pump),
            Ok(FieldCommand::Flow(75))
        );
        assert_eq!(
            decode_payload("flow", "75.0", &pump),
            Ok(FieldCommand::Flow(75))
        );
    }

    #[test]
    fn out_of_range_flow_is_rejected() {
        let pump = pump();
        assert_eq!(
            decode_payload("flow", "20", &pump),
            Err(MapperError::OutOfRange {
                field: "flow",
                value: 20,
                min: 30,
                max: 100
            })
        );
        assert!(matches!(
            decode_payload("flow", "150", &pump),
            Err(MapperError::OutOfRange { .. })
        ));
    }

    #[test]
    fn mode_by_display_name() {
        let pump = pump();
        assert_eq!(
            decode_payload("mode", "Cross-flow", &pump),
            Ok(FieldCommand::Mode(PumpMode::CrossFlow))
        );
        assert!(matches!(
            decode_payload("mode", "Tsunami", &pump),
            Err(MapperError::Validation { field: "mode", .. })
        ));
    }

    #[test]
    fn connected_is_not_commandable() {
        let pump = pump();
        assert_eq!(
            decode_payload("connected", "ON", &pump),
            Err(MapperError::UnknownField("connected".into()))
        );
    }
}
