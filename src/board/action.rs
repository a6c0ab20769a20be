//! Action kinds and parameter parsing.
//!
//! Every command a board understands is one [`Action`] variant. Which variants a
//! board accepts depends on its [`BoardKind`](super::BoardKind): the base set is
//! shared, the LED and engine sets are added by their variants.

use serde::Serialize;

use crate::error::{BoardError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    BlinkLed,
    ToggleLed,
    SetPinValue,
    Rainbow,
    Kitt,
    SetColor,
    PulseColor,
    EngineOn,
    EngineOff,
    SetSpeed,
    SetRpm,
    SetVin,
    SetDtc,
    ClearDtcs,
}

pub const BASE_ACTIONS: &[Action] = &[Action::BlinkLed, Action::ToggleLed, Action::SetPinValue];

pub const LED_ACTIONS: &[Action] = &[
    Action::Rainbow,
    Action::Kitt,
    Action::SetColor,
    Action::PulseColor,
];

pub const MAJOR_TOM_ACTIONS: &[Action] = &[
    Action::EngineOn,
    Action::EngineOff,
    Action::SetSpeed,
    Action::SetRpm,
    Action::SetVin,
    Action::SetDtc,
    Action::ClearDtcs,
];

const ALL: [&[Action]; 3] = [BASE_ACTIONS, LED_ACTIONS, MAJOR_TOM_ACTIONS];

impl Action {
    /// Wire name, as sent by remote clients and stored in programs.
    pub fn name(self) -> &'static str {
        match self {
            Action::BlinkLed => "BLINKLED",
            Action::ToggleLed => "TOGGLELED",
            Action::SetPinValue => "SETPINVALUE",
            Action::Rainbow => "RAINBOW",
            Action::Kitt => "KITT",
            Action::SetColor => "SETCOLOR",
            Action::PulseColor => "PULSECOLOR",
            Action::EngineOn => "ENGINEON",
            Action::EngineOff => "ENGINEOFF",
            Action::SetSpeed => "SETSPEED",
            Action::SetRpm => "SETRPM",
            Action::SetVin => "SETVIN",
            Action::SetDtc => "SETDTC",
            Action::ClearDtcs => "CLEARDTCS",
        }
    }

    pub fn requires_params(self) -> bool {
        match self {
            Action::SetPinValue
            | Action::Kitt
            | Action::SetColor
            | Action::PulseColor
            | Action::SetSpeed
            | Action::SetRpm
            | Action::SetVin
            | Action::SetDtc => true,
            Action::BlinkLed
            | Action::ToggleLed
            | Action::Rainbow
            | Action::EngineOn
            | Action::EngineOff
            | Action::ClearDtcs => false,
        }
    }

    /// Case-insensitive lookup by wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        ALL.iter()
            .flat_map(|set| set.iter())
            .copied()
            .find(|a| a.name().eq_ignore_ascii_case(name))
    }

    pub fn descriptor(self) -> ActionDescriptor {
        ActionDescriptor {
            name: self.name(),
            requires_params: self.requires_params(),
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Action table entry exposed in board snapshots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDescriptor {
    pub name: &'static str,
    pub requires_params: bool,
}

/// Borrow exactly `N` parameters or fail with a usage message.
pub(crate) fn expect_params<'a, const N: usize>(
    action: Action,
    params: &'a [String],
    usage: &str,
) -> Result<&'a [String; N]> {
    params.try_into().map_err(|_| {
        BoardError::InvalidArgument(format!(
            "{} expects {} parameter(s) ({}), got {}",
            action,
            N,
            usage,
            params.len()
        ))
    })
}

/// Parse an integer parameter constrained to `min..=max`.
pub(crate) fn parse_ranged(action: Action, label: &str, raw: &str, min: i64, max: i64) -> Result<i64> {
    let value: i64 = raw.trim().parse().map_err(|_| {
        BoardError::InvalidArgument(format!(
            "{} {} must be an integer, got '{}'",
            action,
            label,
            crate::logutil::escape_log(raw)
        ))
    })?;
    if value < min || value > max {
        return Err(BoardError::InvalidArgument(format!(
            "{} {} must be between {} and {}, got {}",
            action, label, min, max, value
        )));
    }
    Ok(value)
}

/// Parse an 8-bit parameter (hue, saturation, value, speed).
pub(crate) fn parse_byte(action: Action, label: &str, raw: &str) -> Result<u8> {
    let value = parse_ranged(action, label, raw, 0, 255)?;
    u8::try_from(value).map_err(|_| BoardError::InvalidArgument(format!("{} {} out of range", action, label)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn names_round_trip_case_insensitively() {
        for set in ALL {
            for action in set {
                assert_eq!(Action::from_name(action.name()), Some(*action));
            }
        }
        assert_eq!(Action::from_name("setColor"), Some(Action::SetColor));
        assert_eq!(Action::from_name("SELFDESTRUCT"), None);
    }

    #[test]
    fn parameter_metadata_per_action() {
        assert!(Action::SetColor.requires_params());
        assert!(!Action::Rainbow.requires_params());
        assert!(!Action::ClearDtcs.requires_params());
    }

    #[test]
    fn byte_parser_rejects_out_of_range() {
        assert_eq!(parse_byte(Action::SetColor, "hue", "255").expect("max"), 255);
        let err = parse_byte(Action::SetColor, "hue", "256").expect_err("too big");
        assert!(matches!(err, BoardError::InvalidArgument(_)));
        assert!(parse_byte(Action::SetColor, "hue", "-1").is_err());
        assert!(parse_byte(Action::SetColor, "hue", "red").is_err());
    }

    #[test]
    fn expect_params_checks_arity() {
        let params = strings(&["1", "2"]);
        let [a, b] = expect_params::<2>(Action::SetPinValue, &params, "pin, value").expect("two");
        assert_eq!((a.as_str(), b.as_str()), ("1", "2"));
        assert!(expect_params::<3>(Action::Kitt, &params, "h, s, v").is_err());
    }
}
