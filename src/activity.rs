//! Activity log: the human-readable trail of what the forwarder did.
//!
//! The engine reports every arrival, forward and clear as one line through an
//! [`ActivityLog`]. In production that is a [`TransmissionLog`], which emits
//! the line at debug level on the `sms` log target (visible on the console
//! with `-v`) and, when configured, appends it to a transmission log file:
//!
//! ```text
//! [Mon, 19 Oct 2026 14:30:05]:New SMS from +41791234567:
//! [Mon, 19 Oct 2026 14:30:05]:   hello
//! [Mon, 19 Oct 2026 14:30:05]:forward it to +41790000000
//! [Mon, 19 Oct 2026 14:30:07]:clear message from +41791234567
//! ```

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use log::{debug, warn};

use crate::logutil::escape_log;

/// Sink for activity lines.
pub trait ActivityLog {
    fn record(&mut self, line: &str);
}

const TIMESTAMP_FORMAT: &str = "%a, %d %b %Y %H:%M:%S";

/// Production activity log.
#[derive(Debug, Default)]
pub struct TransmissionLog {
    file: Option<PathBuf>,
    file_failed: bool,
}

impl TransmissionLog {
    pub fn new(file: Option<PathBuf>) -> Self {
        Self {
            file,
            file_failed: false,
        }
    }

    pub fn file(&self) -> Option<&PathBuf> {
        self.file.as_ref()
    }

    fn append(&mut self, line: &str) -> std::io::Result<()> {
        let Some(path) = &self.file else {
            return Ok(());
        };
        let mut f = OpenOptions::new().create(true).append(true).open(path)?;
        let ts = chrono::Local::now().format(TIMESTAMP_FORMAT);
        writeln!(f, "[{}]:{}", ts, line)
    }
}

impl ActivityLog for TransmissionLog {
    fn record(&mut self, line: &str) {
        let line = escape_log(line);
        debug!(target: "sms", "{}", line);
        match self.append(&line) {
            Ok(()) => self.file_failed = false,
            Err(e) => {
                // warn once per outage, not once per line
                if !self.file_failed {
                    warn!("Cannot write transmission log {:?}: {}", self.file, e);
                }
                self.file_failed = true;
            }
        }
    }
}

/// Activity log that keeps lines in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryLog {
    lines: Vec<String>,
}

impl MemoryLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }
}

impl ActivityLog for MemoryLog {
    fn record(&mut self, line: &str) {
        self.lines.push(line.to_string());
    }
}
