//! Command-stream line classification
//!
//! Each framed line from the control connection is classified into at most
//! one [`VantageEvent`]. The controller's line protocol is append-only:
//! firmware newer than this client may emit lines we do not understand, and
//! those must never be fatal, so anything unrecognized maps to `None`.

use crate::client::VantageEvent;
use crate::protocol::methods;

/// Classify one framed line from the control connection.
///
/// Lines are tokenized on single spaces. Numeric fields that fail to parse
/// make the whole line unrecognized.
pub fn parse_line(line: &str) -> Option<VantageEvent> {
    let tokens: Vec<&str> = line.split(' ').collect();

    // Load status, either unsolicited (S:LOAD) or a GETLOAD reply.
    if tokens[0] == "S:LOAD" || tokens[0] == "R:GETLOAD" {
        let vid = parse_u32(tokens.get(1)?)?;
        let value = parse_u32(tokens.get(2)?)?;
        return Some(VantageEvent::LoadStatusChanged { vid, value });
    }

    // Event-log lines report temperatures in millidegrees.
    if line.starts_with("EL: ") {
        let method = *tokens.get(3)?;
        if method == methods::THERMOSTAT_SET_OUTDOOR_TEMPERATURE_SW {
            let vid = parse_u32(tokens.get(2)?)?;
            let celsius = parse_f64(tokens.get(4)?)? / 1000.0;
            return Some(VantageEvent::OutdoorTemperatureChanged { vid, celsius });
        }
        if method == methods::THERMOSTAT_SET_INDOOR_TEMPERATURE_SW {
            let vid = parse_u32(tokens.get(2)?)?;
            let celsius = parse_f64(tokens.get(4)?)? / 1000.0;
            return Some(VantageEvent::IndoorTemperatureChanged { vid, celsius });
        }
        return None;
    }

    if line.starts_with("R:INVOKE") {
        // GetOutdoorTemperature replies already carry final units.
        if tokens.get(3) == Some(&methods::THERMOSTAT_GET_OUTDOOR_TEMPERATURE) {
            let vid = parse_u32(tokens.get(1)?)?;
            let celsius = parse_f64(tokens.get(2)?)?;
            return Some(VantageEvent::OutdoorTemperatureChanged { vid, celsius });
        }
        if line.contains(methods::OBJECT_IS_INTERFACE_SUPPORTED) {
            let vid = parse_u32(tokens.get(1)?)?;
            let supported = parse_i64(tokens.get(2)?)? != 0;
            let interface_id = parse_u32(tokens.get(4)?)?;
            return Some(VantageEvent::InterfaceSupportAnswer {
                vid,
                interface_id,
                supported,
            });
        }
    }

    None
}

fn parse_u32(token: &str) -> Option<u32> {
    token.trim().parse().ok()
}

fn parse_i64(token: &str) -> Option<i64> {
    token.trim().parse().ok()
}

fn parse_f64(token: &str) -> Option<f64> {
    token.trim().parse().ok()
}
