//! # Message Transport
//!
//! The forwarding engine never talks to hardware directly. It drives a
//! [`Transport`]: something that can list the inbound messages currently stored
//! on a device, send a new outbound message, delete a stored message and
//! identify the device it is attached to.
//!
//! Two implementations ship with the crate:
//!
//! - [`crate::modem::AtModem`] - a GSM modem on a serial line (AT commands, PDU mode)
//! - [`memory::MemoryTransport`] - an in-memory device for tests and dry runs
//!
//! Message bodies travel as [`RawContent`], the UTF-16 code units reported by the
//! device, so a forwarded copy carries exactly what was received even when the
//! text is not valid Unicode.

use chrono::{DateTime, FixedOffset};
use thiserror::Error;

pub mod memory;

/// Errors reported by a transport.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Serial or other I/O failure talking to the device.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// No messaging-capable device answered.
    #[error("no messaging device found: {0}")]
    NoDevice(String),

    /// The device did not answer within the allotted time.
    #[error("timed out waiting for {operation}")]
    Timeout { operation: String },

    /// The device answered a command with an error result code.
    #[error("device rejected {command}: {reason}")]
    Rejected { command: String, reason: String },

    /// The device answered with something we could not make sense of.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The referenced stored message does not exist (already deleted).
    #[error("no stored message at index {0}")]
    NotFound(u32),

    /// Outbound message could not be encoded for the device.
    #[error("cannot encode message: {0}")]
    Encoding(String),
}

/// Message body as a sequence of UTF-16 code units.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct RawContent(Vec<u16>);

impl RawContent {
    pub fn from_units(units: Vec<u16>) -> Self {
        Self(units)
    }

    pub fn units(&self) -> &[u16] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Human-readable rendering; unpaired surrogates become U+FFFD.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf16_lossy(&self.0)
    }
}

impl From<&str> for RawContent {
    fn from(s: &str) -> Self {
        Self(s.encode_utf16().collect())
    }
}

/// A message stored on the device, waiting to be processed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    /// Storage slot on the device; used to retire the message.
    pub index: u32,
    pub sender: String,
    /// Text for logs. Derived from `raw`.
    pub text: String,
    pub raw: RawContent,
    /// Service-centre timestamp, when the device reports one.
    pub received_at: Option<DateTime<FixedOffset>>,
}

impl InboundMessage {
    pub fn new(index: u32, sender: impl Into<String>, raw: RawContent) -> Self {
        Self {
            index,
            sender: sender.into(),
            text: raw.to_string_lossy(),
            raw,
            received_at: None,
        }
    }

    pub fn with_received_at(mut self, at: DateTime<FixedOffset>) -> Self {
        self.received_at = Some(at);
        self
    }
}

/// A new message composed for one destination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    pub destination: String,
    pub content: RawContent,
}

impl OutboundMessage {
    pub fn compose(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            content: RawContent::default(),
        }
    }

    pub fn with_content(mut self, content: RawContent) -> Self {
        self.content = content;
        self
    }
}

/// Identity of the attached device, logged at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    pub product_name: String,
    pub serial_number: String,
}

impl std::fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.product_name, self.serial_number)
    }
}

/// Device message I/O used by the forwarding engine.
///
/// Implementations are driven from a single task and may block that task
/// while the device answers; callers bound each call with a timeout.
#[allow(async_fn_in_trait)]
pub trait Transport {
    /// Identify the device, failing when none is present.
    async fn identify_device(&mut self) -> Result<DeviceIdentity, TransportError>;

    /// All inbound messages currently stored, in device order.
    async fn list_pending(&mut self) -> Result<Vec<InboundMessage>, TransportError>;

    /// Send one outbound message.
    async fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError>;

    /// Remove a stored message. Returns [`TransportError::NotFound`] when the
    /// message is already gone.
    async fn delete(&mut self, message: &InboundMessage) -> Result<(), TransportError>;
}
