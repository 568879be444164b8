//! Helpers that keep message text and modem chatter on one log line.
//!
//! SMS bodies routinely contain line breaks, and modem responses carry CR/LF
//! framing; both would otherwise split a single log record across lines.

use std::fmt::Write;

/// Default cap for previews of message text in diagnostic logs.
pub const MAX_PREVIEW: usize = 300;

/// Escape control characters (`\n`, `\r`, `\t`, backslash, others as `\xNN`)
/// and cap the output at [`MAX_PREVIEW`] characters.
pub fn escape_log(s: &str) -> String {
    escape_with_limit(s, MAX_PREVIEW)
}

/// Like [`escape_log`] with an explicit character limit; an ellipsis marks the cut.
pub fn escape_with_limit(s: &str, max_chars: usize) -> String {
    let mut out = String::with_capacity(s.len().min(max_chars) + 4);
    let mut chars = s.chars();
    for _ in 0..max_chars {
        let Some(ch) = chars.next() else {
            return out;
        };
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c.is_control() => {
                let _ = write!(out, "\\x{:02X}", c as u32);
            }
            c => out.push(c),
        }
    }
    if chars.next().is_some() {
        out.push('…');
    }
    out
}
