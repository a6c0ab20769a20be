//! LED strip controller commands.
//!
//! The strip firmware listens on software serial 0 for frames of the form
//! `[` code params... `]`, one raw byte per parameter.

use bytes::{BufMut, Bytes, BytesMut};

use super::action::{expect_params, parse_byte, Action};
use crate::error::{BoardError, Result};
use crate::firmata::SerialChannel;

pub const LED_SERIAL: SerialChannel = SerialChannel::Software(0);
pub const LED_BAUD: u32 = 9600;

const FRAME_START: u8 = b'[';
const FRAME_END: u8 = b']';

pub fn command_frame(code: u8, params: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(params.len() + 3);
    buf.put_u8(FRAME_START);
    buf.put_u8(code);
    buf.put_slice(params);
    buf.put_u8(FRAME_END);
    buf.freeze()
}

fn hsv(action: Action, params: &[String]) -> Result<[u8; 3]> {
    let [h, s, v] = expect_params::<3>(action, params, "hue, saturation, value")?;
    Ok([
        parse_byte(action, "hue", h)?,
        parse_byte(action, "saturation", s)?,
        parse_byte(action, "value", v)?,
    ])
}

/// Validate parameters and build the frame for an LED action. Nothing is
/// produced unless every parameter is in range.
pub fn encode(action: Action, params: &[String]) -> Result<Bytes> {
    match action {
        Action::Rainbow => Ok(command_frame(b'R', &[])),
        Action::Kitt => Ok(command_frame(b'K', &hsv(action, params)?)),
        Action::SetColor => Ok(command_frame(b'C', &hsv(action, params)?)),
        Action::PulseColor => {
            let [h, s] = expect_params::<2>(action, params, "hue, saturation")?;
            let bytes = [parse_byte(action, "hue", h)?, parse_byte(action, "saturation", s)?];
            Ok(command_frame(b'P', &bytes))
        }
        other => Err(BoardError::Incompatible(format!("{} is not an LED command", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn frames_carry_raw_parameter_bytes() {
        let frame = encode(Action::SetColor, &strings(&["16", "255", "0"])).expect("frame");
        assert_eq!(&frame[..], b"[C\x10\xff\x00]");
        let frame = encode(Action::PulseColor, &strings(&["1", "2"])).expect("frame");
        assert_eq!(&frame[..], b"[P\x01\x02]");
        assert_eq!(&encode(Action::Rainbow, &[]).expect("frame")[..], b"[R]");
    }

    #[test]
    fn out_of_range_color_is_rejected() {
        let err = encode(Action::SetColor, &strings(&["256", "0", "0"])).expect_err("range");
        assert!(matches!(err, BoardError::InvalidArgument(_)));
        assert!(encode(Action::Kitt, &strings(&["1", "2"])).is_err());
    }

    #[test]
    fn non_led_actions_are_incompatible() {
        assert!(matches!(
            encode(Action::EngineOn, &[]),
            Err(BoardError::Incompatible(_))
        ));
    }
}
