//! Board identification from the firmware file name.
//!
//! Sketches are named `<Type>_<uniqueId>.ino`; the Firmata firmware report carries
//! that name verbatim. A missing or unrecognized type prefix falls back to the
//! generic [`BoardKind::Board`] rather than failing.

use crate::board::BoardKind;

/// Stable id and variant derived from a firmware name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub id: String,
    pub board_type: BoardKind,
}

/// Parse a firmware name. Returns `None` only when no usable id remains.
pub fn parse_firmware_name(name: &str) -> Option<Identity> {
    let trimmed = name.trim();
    let base = trimmed.rsplit(|c: char| c == '/' || c == '\\').next().unwrap_or(trimmed);
    let stem = base.strip_suffix(".ino").unwrap_or(base);

    let (board_type, id) = match stem.split_once('_') {
        Some((prefix, rest)) => (
            prefix.parse::<BoardKind>().unwrap_or(BoardKind::Board),
            rest,
        ),
        None => (BoardKind::Board, stem),
    };

    if id.is_empty() || id.chars().any(|c| c.is_control() || c.is_whitespace()) {
        return None;
    }
    Some(Identity {
        id: id.to_string(),
        board_type,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_types() {
        let ident = parse_firmware_name("LedController_abc123.ino").expect("ident");
        assert_eq!(ident.id, "abc123");
        assert_eq!(ident.board_type, BoardKind::LedController);

        let ident = parse_firmware_name("MajorTom_engine01.ino").expect("ident");
        assert_eq!(ident.board_type, BoardKind::MajorTom);
    }

    #[test]
    fn unknown_prefix_defaults_to_generic_board() {
        let ident = parse_firmware_name("Toaster_xyz.ino").expect("ident");
        assert_eq!(ident.id, "xyz");
        assert_eq!(ident.board_type, BoardKind::Board);
    }

    #[test]
    fn id_keeps_later_underscores_and_paths_are_stripped() {
        let ident = parse_firmware_name("C:\\sketches\\MajorTom_a_b.ino").expect("ident");
        assert_eq!(ident.id, "a_b");
        assert_eq!(ident.board_type, BoardKind::MajorTom);
    }

    #[test]
    fn malformed_names() {
        let ident = parse_firmware_name("StandardFirmata.ino").expect("ident");
        assert_eq!(ident.id, "StandardFirmata");
        assert_eq!(ident.board_type, BoardKind::Board);
        assert!(parse_firmware_name("LedController_.ino").is_none());
        assert!(parse_firmware_name("").is_none());
    }
}
