//! Log helpers for device-originated strings and byte frames.
//! Firmware names and AT replies can carry control bytes that would break
//! single-line log output.

use std::fmt::Write;

const MAX_PREVIEW: usize = 120;

/// Escape a device string for single-line logging. `\r`, `\n`, `\t` and
/// backslash are escaped, other control characters become `\xNN`, and the
/// output is truncated with an ellipsis past a fixed preview length.
pub fn escape_log(s: &str) -> String {
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 4);
    for (count, ch) in s.chars().enumerate() {
        if count >= MAX_PREVIEW {
            out.push('…');
            break;
        }
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Hex preview of at most `max` bytes, space separated, with a trailing
/// `+N` when bytes were left out.
pub fn hex_snippet(data: &[u8], max: usize) -> String {
    let mut out = data
        .iter()
        .take(max)
        .map(|b| format!("{:02x}", b))
        .collect::<Vec<_>>()
        .join(" ");
    if data.len() > max {
        let _ = write!(&mut out, " +{}", data.len() - max);
    }
    out
}
