//! Logging utilities for sanitizing raw scan payloads so logs stay single-line.
//! Scanner frames can carry stray control bytes that otherwise break log readability.

/// Escape a scan payload for single-line logging:
/// - `\n` => `\\n`
/// - `\r` => `\\r`
/// - `\t` => `\\t`
/// - backslash => `\\\\`
///   Truncates very long payloads (over `MAX_PREVIEW`) with an ellipsis to cap log noise.
pub fn escape_log(s: &str) -> String {
    const MAX_PREVIEW: usize = 400; // full instruction payloads fit; anything longer is noise
    let mut out = String::with_capacity(s.len().min(MAX_PREVIEW) + 8);
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
                // Represent other control chars as hex \xNN
                use std::fmt::Write;
                let _ = write!(&mut out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    out
}

/// Truncate a payload to at most `max_bytes`, backing up to the nearest UTF-8
/// character boundary so a multi-byte character is never cut in half.
pub fn truncate_utf8(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::{escape_log, truncate_utf8};

    #[test]
    fn escapes_scanner_control_bytes() {
        let s = "ORDER-1\n\r\tEND\x02";
        let esc = escape_log(s);
        assert_eq!(esc, "ORDER-1\\n\\r\\tEND\\x02");
    }

    #[test]
    fn truncation_respects_character_boundaries() {
        assert_eq!(truncate_utf8("abcdef", 4), "abcd");
        assert_eq!(truncate_utf8("abc", 4), "abc");
        // "あ" is 3 bytes; cutting at 4 must not split the second character.
        assert_eq!(truncate_utf8("ああ", 4), "あ");
        assert_eq!(truncate_utf8("ああ", 6), "ああ");
    }
}
