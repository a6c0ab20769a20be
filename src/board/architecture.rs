//! Built-in pin maps.

use serde::Serialize;

use crate::error::BoardError;

pub const DEFAULT_ARCHITECTURE: &str = "uno";

/// Logical pin roles for one board family.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PinMap {
    pub led: u8,
    /// Software serial receive pin.
    pub rx: u8,
    /// Software serial transmit pin.
    pub tx: u8,
    /// PWM output driving the emulated supply voltage.
    pub supply: u8,
    pub fan: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Architecture {
    pub name: &'static str,
    pub pins: PinMap,
}

pub const ARDUINO_UNO: Architecture = Architecture {
    name: "uno",
    pins: PinMap {
        led: 13,
        rx: 10,
        tx: 11,
        supply: 9,
        fan: 7,
    },
};

/// NodeMCU-style ESP8266, GPIO numbering.
pub const ESP8266: Architecture = Architecture {
    name: "esp8266",
    pins: PinMap {
        led: 2,
        rx: 13,
        tx: 15,
        supply: 5,
        fan: 4,
    },
};

pub const SUPPORTED: [Architecture; 2] = [ARDUINO_UNO, ESP8266];

/// Resolve an architecture by name or common alias.
pub fn lookup(name: &str) -> Result<Architecture, BoardError> {
    let normalized = name.trim().to_ascii_lowercase().replace(['_', ' '], "-");
    match normalized.as_str() {
        "uno" | "arduino-uno" | "arduino" => Ok(ARDUINO_UNO),
        "esp8266" | "esp-8266" | "nodemcu" => Ok(ESP8266),
        _ => Err(BoardError::ArchitectureUnsupported(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_accepts_aliases() {
        assert_eq!(lookup("Arduino_Uno").expect("uno"), ARDUINO_UNO);
        assert_eq!(lookup("NodeMCU").expect("esp"), ESP8266);
        assert_eq!(lookup(DEFAULT_ARCHITECTURE).expect("default").name, "uno");
    }

    #[test]
    fn unknown_architecture_is_rejected() {
        let err = lookup("atmega2560").expect_err("unsupported");
        assert!(matches!(err, BoardError::ArchitectureUnsupported(ref n) if n == "atmega2560"));
    }
}
