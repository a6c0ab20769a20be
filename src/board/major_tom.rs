//! Engine emulator control.
//!
//! The emulator takes `\r`-terminated AT commands on software serial 0. Engine
//! start additionally drives two board pins: the supply output ramps up
//! linearly and the cooling fan cycles on and off while the engine runs.

use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;

use super::action::{expect_params, parse_ranged, Action};
use crate::error::{BoardError, Result};
use crate::firmata::SerialChannel;

pub const OBD_SERIAL: SerialChannel = SerialChannel::Software(0);
pub const OBD_BAUD: u32 = 9600;

pub const RAMP_STEPS: u16 = 5;
pub const RAMP_STEP: Duration = Duration::from_millis(100);
/// Supply output once the ramp has finished.
pub const SUPPLY_TARGET: u16 = 1000;
/// Half period of the fan duty cycle.
pub const FAN_TOGGLE: Duration = Duration::from_secs(2);

pub const MAX_SPEED: i64 = 255;
pub const MAX_RPM: i64 = 16383;

/// Engine state carried by a MajorTom board.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct EngineState {
    pub running: bool,
}

/// Supply value written at ramp step `step` (1-based).
pub fn ramp_value(step: u16) -> u16 {
    let step = step.min(RAMP_STEPS);
    (u32::from(SUPPLY_TARGET) * u32::from(step) / u32::from(RAMP_STEPS)) as u16
}

fn dtc_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^P[0-3][A-Z0-9]{3}$").ok())
        .as_ref()
}

fn vin_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^[A-HJ-NPR-Z0-9]{17}$").ok())
        .as_ref()
}

/// Powertrain trouble code, e.g. `P0301`.
pub fn validate_dtc(raw: &str) -> Result<String> {
    let code = raw.trim().to_ascii_uppercase();
    if dtc_pattern().is_some_and(|re| re.is_match(&code)) {
        Ok(code)
    } else {
        Err(BoardError::InvalidArgument(format!(
            "'{}' is not a powertrain DTC (P0xxx-P3xxx)",
            crate::logutil::escape_log(raw)
        )))
    }
}

/// 17-character vehicle identification number. I, O and Q are not allowed.
pub fn validate_vin(raw: &str) -> Result<String> {
    let vin = raw.trim().to_ascii_uppercase();
    if vin_pattern().is_some_and(|re| re.is_match(&vin)) {
        Ok(vin)
    } else {
        Err(BoardError::InvalidArgument(format!(
            "'{}' is not a valid VIN",
            crate::logutil::escape_log(raw)
        )))
    }
}

fn at(body: impl std::fmt::Display) -> String {
    format!("AT+{}\r", body)
}

/// Build the AT command for an engine action.
pub fn at_command(action: Action, params: &[String]) -> Result<String> {
    match action {
        Action::EngineOn => Ok(at("ENGINE=ON")),
        Action::EngineOff => Ok(at("ENGINE=OFF")),
        Action::SetSpeed => {
            let [speed] = expect_params::<1>(action, params, "km/h")?;
            let speed = parse_ranged(action, "speed", speed, 0, MAX_SPEED)?;
            Ok(at(format_args!("SPEED={}", speed)))
        }
        Action::SetRpm => {
            let [rpm] = expect_params::<1>(action, params, "rpm")?;
            let rpm = parse_ranged(action, "rpm", rpm, 0, MAX_RPM)?;
            Ok(at(format_args!("RPM={}", rpm)))
        }
        Action::SetVin => {
            let [vin] = expect_params::<1>(action, params, "vin")?;
            Ok(at(format_args!("VIN={}", validate_vin(vin)?)))
        }
        Action::SetDtc => {
            let [code] = expect_params::<1>(action, params, "dtc")?;
            Ok(at(format_args!("DTC={}", validate_dtc(code)?)))
        }
        Action::ClearDtcs => Ok(at("CLRDTC")),
        other => Err(BoardError::Incompatible(format!("{} is not an engine command", other))),
    }
}
