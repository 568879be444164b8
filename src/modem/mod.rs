//! # GSM Modem Transport
//!
//! Production [`Transport`] for a GSM modem attached over USB/UART, driven with
//! the 3GPP TS 27.005 AT command set in PDU mode.
//!
//! ## Session
//!
//! ```text
//! AT            link check
//! ATE0          no command echo
//! AT+CMEE=1     numeric +CME ERROR codes
//! AT+CPIN?      SIM state; AT+CPIN="<pin>" when a PIN is configured and needed
//! AT+CMGF=0     PDU mode
//! AT+CPMS=...   message storage (SM by default)
//! ```
//!
//! ## Operations
//!
//! - identify: `AT+CGMI` / `AT+CGMM` (product), `AT+CGSN` (IMEI)
//! - list: `AT+CMGL=4`, received entries only
//! - send: `AT+CMGS=<len>`, wait for `> `, PDU + Ctrl-Z
//! - delete: `AT+CMGD=<index>`
//!
//! A command that times out or is cancelled before its final result code
//! marks the session unfinished. The next command first sends ESC (leaving
//! an open `> ` prompt) and discards input until the modem has been quiet for
//! a moment, so a late reply is never taken for the next command's answer.
//!
//! The modem is generic over its byte stream so the protocol can be exercised
//! against a scripted port; [`AtModem::open`] wires it to a real serial port.
//!
//! ```rust,no_run
//! # #[cfg(feature = "serial")]
//! # {
//! use smsfwd::config::ModemConfig;
//! use smsfwd::modem::AtModem;
//! use smsfwd::transport::Transport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut modem = AtModem::open(&ModemConfig::default()).await?;
//!     println!("{}", modem.identify_device().await?);
//!     for msg in modem.list_pending().await? {
//!         println!("{}: {}", msg.sender, msg.text);
//!     }
//!     Ok(())
//! }
//! # }
//! ```

pub mod framer;
pub mod gsm7;
pub mod pdu;

use std::io::{ErrorKind, Read, Write};

use log::{debug, trace, warn};
use tokio::time::{sleep, Duration, Instant};

use crate::logutil::escape_log;
use crate::transport::{DeviceIdentity, InboundMessage, OutboundMessage, Transport, TransportError};
use framer::{AtEvent, AtFramer};

#[cfg(feature = "serial")]
use crate::config::ModemConfig;
#[cfg(feature = "serial")]
use serialport::SerialPort;

const CTRL_Z: u8 = 0x1A;
const ESC: u8 = 0x1B;
/// Silence required before a stale exchange counts as finished.
const RESYNC_QUIET: Duration = Duration::from_millis(500);
/// `+CMS ERROR: 321` - invalid memory index.
const CMS_INVALID_INDEX: &str = "321";

/// Lines the modem may emit at any time; never part of a command response.
fn is_unsolicited(line: &str) -> bool {
    line == "RING" || line.starts_with("+CMTI:") || line.starts_with("+CDSI:") || line.starts_with("^")
}

fn first_value(lines: &[String]) -> String {
    lines.first().map(|l| info_value(l)).unwrap_or_default()
}

/// Final result of a command.
enum Outcome {
    Ok(Vec<String>),
    Error(String),
}

/// Strip an optional `+CMD:` prefix and surrounding quotes from an info line.
fn info_value(line: &str) -> String {
    let value = match line.split_once(':') {
        Some((head, rest)) if head.starts_with('+') => rest,
        _ => line,
    };
    value.trim().trim_matches('"').to_string()
}

pub struct AtModem<P> {
    port: P,
    port_name: String,
    framer: AtFramer,
    command_timeout: Duration,
    send_timeout: Duration,
    concat_reference: u8,
    /// Set while a command is on the wire; still set when the last
    /// exchange timed out or was cancelled before its final result.
    unfinished: bool,
}

#[cfg(feature = "serial")]
impl AtModem<Box<dyn SerialPort>> {
    /// Open the configured serial port and initialize the modem session.
    pub async fn open(config: &ModemConfig) -> Result<Self, TransportError> {
        log::info!(
            "Opening GSM modem on {} at {} baud",
            config.port,
            config.baud_rate
        );
        let builder = serialport::new(&config.port, config.baud_rate)
            .timeout(Duration::from_millis(100))
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None);
        let mut port = builder.open().map_err(|e| {
            TransportError::NoDevice(format!("failed to open serial port {}: {}", config.port, e))
        })?;
        let _ = port.write_data_terminal_ready(true);
        let _ = port.write_request_to_send(true);
        sleep(Duration::from_millis(150)).await;
        let _ = port.clear(serialport::ClearBuffer::Input);

        let mut modem = AtModem::new(port, &config.port)
            .with_timeouts(
                Duration::from_millis(config.command_timeout_ms),
                Duration::from_millis(config.send_timeout_ms),
            );
        modem
            .initialize(config.sim_pin.as_deref(), &config.storage)
            .await?;
        Ok(modem)
    }
}

impl<P: Read + Write> AtModem<P> {
    pub fn new(port: P, port_name: &str) -> Self {
        Self {
            port,
            port_name: port_name.to_string(),
            framer: AtFramer::new(),
            command_timeout: Duration::from_secs(10),
            send_timeout: Duration::from_secs(60),
            concat_reference: 0,
            unfinished: false,
        }
    }

    pub fn with_timeouts(mut self, command: Duration, send: Duration) -> Self {
        self.command_timeout = command;
        self.send_timeout = send;
        self
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Bring the modem into PDU mode on the given message storage.
    pub async fn initialize(&mut self, sim_pin: Option<&str>, storage: &str) -> Result<(), TransportError> {
        // abort any half-entered PDU left over from a previous run
        self.write_raw(&[ESC])?;
        sleep(Duration::from_millis(50)).await;
        self.framer.clear();

        self.command("AT").await.map_err(|e| match e {
            TransportError::Timeout { .. } => {
                TransportError::NoDevice(format!("no answer to AT on {}", self.port_name))
            }
            other => other,
        })?;
        self.command("ATE0").await?;
        if let Err(e) = self.command("AT+CMEE=1").await {
            debug!("AT+CMEE=1 not supported: {}", e);
        }
        self.unlock_sim(sim_pin).await?;
        self.command("AT+CMGF=0").await?;
        self.command(&format!(
            "AT+CPMS=\"{0}\",\"{0}\",\"{0}\"",
            storage
        ))
        .await?;
        debug!("Modem on {} ready (PDU mode, storage {})", self.port_name, storage);
        Ok(())
    }

    async fn unlock_sim(&mut self, sim_pin: Option<&str>) -> Result<(), TransportError> {
        let lines = self.command("AT+CPIN?").await?;
        let state = lines
            .iter()
            .find(|l| l.starts_with("+CPIN:"))
            .map(|l| info_value(l))
            .unwrap_or_default();
        match (state.as_str(), sim_pin) {
            ("READY", _) => Ok(()),
            ("SIM PIN", Some(pin)) => {
                self.command(&format!("AT+CPIN=\"{}\"", pin)).await?;
                // the SIM needs a moment before SMS commands work
                sleep(Duration::from_secs(2)).await;
                Ok(())
            }
            ("SIM PIN", None) => Err(TransportError::NoDevice(
                "SIM requires a PIN but none is configured".to_string(),
            )),
            (other, _) => Err(TransportError::NoDevice(format!(
                "SIM not ready (state {:?})",
                other
            ))),
        }
    }

    fn write_raw(&mut self, data: &[u8]) -> Result<(), TransportError> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(())
    }

    /// Read until the framer yields an event or `deadline` passes.
    async fn next_event(&mut self, deadline: Instant, operation: &str) -> Result<AtEvent, TransportError> {
        let mut buf = [0u8; 512];
        loop {
            if let Some(ev) = self.framer.next_event() {
                return Ok(ev);
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout {
                    operation: operation.to_string(),
                });
            }
            match self.port.read(&mut buf) {
                Ok(n) if n > 0 => {
                    trace!("RX {}", escape_log(&String::from_utf8_lossy(&buf[..n])));
                    self.framer.push(&buf[..n]);
                }
                Ok(_) => sleep(Duration::from_millis(10)).await,
                Err(ref e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => {
                    sleep(Duration::from_millis(10)).await
                }
                Err(ref e) if e.kind() == ErrorKind::Interrupted => {
                    sleep(Duration::from_millis(5)).await
                }
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
    }

    /// Collect response lines up to the final result code.
    async fn read_outcome(&mut self, command: &str, deadline: Instant) -> Result<Outcome, TransportError> {
        let mut lines = Vec::new();
        loop {
            match self.next_event(deadline, command).await? {
                AtEvent::Prompt => {
                    return Err(TransportError::Protocol(format!(
                        "unexpected prompt after {}",
                        command
                    )))
                }
                AtEvent::Line(line) => {
                    if line == "OK" {
                        return Ok(Outcome::Ok(lines));
                    }
                    if line == "ERROR" {
                        return Ok(Outcome::Error("ERROR".to_string()));
                    }
                    if let Some(code) = line
                        .strip_prefix("+CME ERROR:")
                        .or_else(|| line.strip_prefix("+CMS ERROR:"))
                    {
                        let kind = &line[..4];
                        return Ok(Outcome::Error(format!("{} {}", kind, code.trim())));
                    }
                    if line == command || is_unsolicited(&line) {
                        debug!("Ignoring modem line {}", escape_log(&line));
                        continue;
                    }
                    lines.push(line);
                }
            }
        }
    }

    /// Recover from an exchange that never saw its final result: leave any
    /// open PDU prompt, then discard input until the line goes quiet.
    async fn resync(&mut self) -> Result<(), TransportError> {
        debug!("Resynchronizing modem on {}", self.port_name);
        self.write_raw(&[ESC])?;
        self.framer.clear();
        let give_up = Instant::now() + self.command_timeout + RESYNC_QUIET;
        let mut last_rx = Instant::now();
        let mut discarded = 0usize;
        let mut buf = [0u8; 512];
        loop {
            let now = Instant::now();
            if now.duration_since(last_rx) >= RESYNC_QUIET {
                break;
            }
            if now >= give_up {
                warn!("Modem on {} kept talking during resync", self.port_name);
                break;
            }
            match self.port.read(&mut buf) {
                Ok(n) if n > 0 => {
                    trace!("Discarding {}", escape_log(&String::from_utf8_lossy(&buf[..n])));
                    discarded += n;
                    last_rx = Instant::now();
                }
                Ok(_) => sleep(Duration::from_millis(10)).await,
                Err(ref e)
                    if matches!(
                        e.kind(),
                        ErrorKind::TimedOut | ErrorKind::WouldBlock | ErrorKind::Interrupted
                    ) =>
                {
                    sleep(Duration::from_millis(10)).await
                }
                Err(e) => return Err(TransportError::Io(e)),
            }
        }
        if discarded > 0 {
            debug!("Discarded {} stale byte(s) from {}", discarded, self.port_name);
        }
        self.framer.clear();
        self.unfinished = false;
        Ok(())
    }

    /// Write a command line, resynchronizing first if the previous exchange
    /// did not finish.
    async fn begin(&mut self, command: &str) -> Result<(), TransportError> {
        if self.unfinished {
            self.resync().await?;
        }
        trace!("TX {}", command);
        self.unfinished = true;
        self.write_raw(format!("{}\r", command).as_bytes())
    }

    /// Run one command, returning its information lines.
    pub async fn command(&mut self, command: &str) -> Result<Vec<String>, TransportError> {
        self.begin(command).await?;
        let deadline = Instant::now() + self.command_timeout;
        let outcome = self.read_outcome(command, deadline).await?;
        self.unfinished = false;
        match outcome {
            Outcome::Ok(lines) => Ok(lines),
            Outcome::Error(reason) => Err(TransportError::Rejected {
                command: command.to_string(),
                reason,
            }),
        }
    }

    async fn submit(&mut self, pdu: &pdu::SubmitPdu) -> Result<(), TransportError> {
        let command = format!("AT+CMGS={}", pdu.tpdu_len);
        self.begin(&command).await?;
        let deadline = Instant::now() + self.send_timeout;

        // a timeout or cancellation here leaves `unfinished` set, so the
        // next command first escapes the open PDU prompt
        loop {
            match self.next_event(deadline, &command).await? {
                AtEvent::Prompt => break,
                AtEvent::Line(line) if line.contains("ERROR") => {
                    self.unfinished = false;
                    return Err(TransportError::Rejected {
                        command,
                        reason: line,
                    });
                }
                AtEvent::Line(line) => debug!("Ignoring modem line {}", escape_log(&line)),
            }
        }

        let mut body = pdu.hex.clone().into_bytes();
        body.push(CTRL_Z);
        self.write_raw(&body)?;

        let outcome = self.read_outcome(&command, deadline).await?;
        self.unfinished = false;
        match outcome {
            Outcome::Ok(lines) => {
                if let Some(mr) = lines.iter().find(|l| l.starts_with("+CMGS:")) {
                    debug!("Submitted PDU, message reference {}", info_value(mr));
                }
                Ok(())
            }
            Outcome::Error(reason) => Err(TransportError::Rejected { command, reason }),
        }
    }

    /// Parse `AT+CMGL=4` output into received messages.
    fn parse_listing(lines: &[String]) -> Vec<InboundMessage> {
        let mut out = Vec::new();
        let mut iter = lines.iter();
        while let Some(line) = iter.next() {
            let Some(header) = line.strip_prefix("+CMGL:") else {
                continue;
            };
            let Some(body) = iter.next() else {
                warn!("Listing ended after {:?} without a PDU", line);
                break;
            };
            let mut fields = header.split(',').map(str::trim);
            let index = fields.next().and_then(|f| f.parse::<u32>().ok());
            let stat = fields.next().and_then(|f| f.parse::<u8>().ok());
            let Some(index) = index else {
                warn!("Unparseable listing entry {:?}", line);
                continue;
            };
            // 0 = received unread, 1 = received read; 2/3 are stored outgoing
            if !matches!(stat, Some(0) | Some(1)) {
                continue;
            }
            match pdu::decode_deliver(body) {
                Ok(deliver) => {
                    if let Some(c) = deliver.concat {
                        debug!(
                            "Message {} is part {}/{} of ref {}",
                            index, c.sequence, c.total, c.reference
                        );
                    }
                    let mut msg = InboundMessage::new(index, deliver.sender, deliver.content);
                    msg.received_at = deliver.timestamp;
                    out.push(msg);
                }
                Err(e) => warn!("Skipping undecodable message at index {}: {}", index, e),
            }
        }
        out
    }
}

impl<P: Read + Write> Transport for AtModem<P> {
    async fn identify_device(&mut self) -> Result<DeviceIdentity, TransportError> {
        let manufacturer = self.command("AT+CGMI").await?;
        let model = self.command("AT+CGMM").await?;
        let serial = self.command("AT+CGSN").await?;
        let product_name = [first_value(&manufacturer), first_value(&model)]
            .into_iter()
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if product_name.is_empty() {
            return Err(TransportError::NoDevice(format!(
                "modem on {} did not report a product name",
                self.port_name
            )));
        }
        Ok(DeviceIdentity {
            product_name,
            serial_number: first_value(&serial),
        })
    }

    async fn list_pending(&mut self) -> Result<Vec<InboundMessage>, TransportError> {
        let lines = self.command("AT+CMGL=4").await?;
        Ok(Self::parse_listing(&lines))
    }

    async fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.concat_reference = self.concat_reference.wrapping_add(1);
        let parts = pdu::encode_submit(&message.destination, &message.content, self.concat_reference)
            .map_err(|e| TransportError::Encoding(e.to_string()))?;
        for part in &parts {
            self.submit(part).await?;
        }
        Ok(())
    }

    async fn delete(&mut self, message: &InboundMessage) -> Result<(), TransportError> {
        let command = format!("AT+CMGD={}", message.index);
        match self.command(&command).await {
            Ok(_) => Ok(()),
            Err(TransportError::Rejected { reason, .. }) if reason.ends_with(CMS_INVALID_INDEX) => {
                Err(TransportError::NotFound(message.index))
            }
            Err(e) => Err(e),
        }
    }
}
