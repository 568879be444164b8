//! Incremental framer for AT command responses.
//!
//! A modem answers with CR/LF terminated lines:
//!
//!   `\r\n+CMGL: 1,0,,23\r\n07911326...\r\n\r\nOK\r\n`
//!
//! with one exception: after `AT+CMGS=<len>` it prints the `> ` prompt and
//! waits for the PDU without terminating the line. The framer can be fed
//! arbitrary chunks and yields whole lines and prompts when available.
use bytes::{Buf, BytesMut};

/// Upper bound for a single pending line (a full PDU is under 400 hex chars).
const MAX_LINE: usize = 4 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AtEvent {
    Line(String),
    Prompt,
}

pub struct AtFramer {
    buf: BytesMut,
}

impl Default for AtFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl AtFramer {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(1024),
        }
    }

    pub fn push(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Drop anything buffered (stale output from a timed-out command).
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Next complete line or prompt, skipping blank lines.
    pub fn next_event(&mut self) -> Option<AtEvent> {
        loop {
            let skip = self
                .buf
                .iter()
                .take_while(|&&b| b == b'\r' || b == b'\n')
                .count();
            self.buf.advance(skip);
            if self.buf.is_empty() {
                return None;
            }

            if self.buf.starts_with(b"> ") || self.buf[..] == b">"[..] {
                let n = if self.buf.len() >= 2 { 2 } else { 1 };
                self.buf.advance(n);
                return Some(AtEvent::Prompt);
            }

            match self.buf.iter().position(|&b| b == b'\n' || b == b'\r') {
                Some(end) => {
                    let line = self.buf.split_to(end);
                    let text = String::from_utf8_lossy(&line).trim().to_string();
                    if text.is_empty() {
                        continue;
                    }
                    return Some(AtEvent::Line(text));
                }
                None => {
                    if self.buf.len() > MAX_LINE {
                        // runaway garbage without terminator; resync
                        self.buf.clear();
                    }
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yields_lines_across_chunks() {
        let mut f = AtFramer::new();
        f.push(b"\r\n+CGMI: SIMC");
        assert_eq!(f.next_event(), None);
        f.push(b"OM\r\n\r\nOK\r\n");
        assert_eq!(f.next_event(), Some(AtEvent::Line("+CGMI: SIMCOM".into())));
        assert_eq!(f.next_event(), Some(AtEvent::Line("OK".into())));
        assert_eq!(f.next_event(), None);
    }

    #[test]
    fn detects_unterminated_prompt() {
        let mut f = AtFramer::new();
        f.push(b"\r\n> ");
        assert_eq!(f.next_event(), Some(AtEvent::Prompt));
        assert_eq!(f.next_event(), None);
    }

    #[test]
    fn prompt_followed_by_result() {
        let mut f = AtFramer::new();
        f.push(b"> \r\n+CMGS: 12\r\n\r\nOK\r\n");
        assert_eq!(f.next_event(), Some(AtEvent::Prompt));
        assert_eq!(f.next_event(), Some(AtEvent::Line("+CMGS: 12".into())));
        assert_eq!(f.next_event(), Some(AtEvent::Line("OK".into())));
    }

    #[test]
    fn lines_starting_with_gt_are_not_prompts() {
        let mut f = AtFramer::new();
        f.push(b">>note\r\n");
        assert_eq!(f.next_event(), Some(AtEvent::Line(">>note".into())));
    }
}
