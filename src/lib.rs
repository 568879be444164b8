//! # smsfwd - SMS Forwarder for GSM Modems
//!
//! smsfwd watches the message store of a GSM modem, forwards every received
//! SMS to the destinations configured for its sender, and then removes it
//! from the device.
//!
//! ## Features
//!
//! - **Rule Table**: Exact-sender and wildcard (`*`) rules; every matching rule contributes its destinations.
//! - **Verbatim Forwarding**: Content is carried as UTF-16 units and re-encoded as GSM 7-bit or UCS-2 PDUs, with long texts split into concatenated parts.
//! - **At-least-once Delivery**: A message is deleted only after all of its forwards were attempted.
//! - **Paced Sending**: A fixed gap after every send attempt keeps modem and network happy.
//! - **Transmission Log**: Timestamped activity trail on the console and in an optional file.
//! - **Async Design**: Built with Tokio; every device call is bounded by a timeout.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use smsfwd::activity::TransmissionLog;
//! use smsfwd::config::Config;
//! use smsfwd::forwarder::{EngineTuning, ForwardingEngine};
//! use smsfwd::modem::AtModem;
//! use smsfwd::rules::RuleSet;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.json").await?;
//!     let modem = AtModem::open(&config.modem).await?;
//!
//!     let rules = Arc::new(RuleSet::from_config(&config.rules));
//!     let log = TransmissionLog::new(config.logging.transmission_file.clone().map(Into::into));
//!     let mut engine = ForwardingEngine::new(rules, modem, log, EngineTuning::from(&config.forwarding));
//!     engine.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - [`rules`] - Sender patterns and destination lookup
//! - [`transport`] - Messaging-device capability, message types, in-memory transport
//! - [`modem`] - AT-command GSM modem transport with PDU codec
//! - [`forwarder`] - The poll, forward and retire engine
//! - [`activity`] - Transmission log
//! - [`config`] - Configuration loading and validation
//! - [`validation`] - Destination number checks
//! - [`metrics`] - Per-engine forwarding counters
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │ ForwardingEngine│ ← Poll, match, forward, retire
//! └─────────────────┘
//!     │         │
//! ┌────────┐ ┌──────────────┐
//! │RuleSet │ │  Transport   │ ← AtModem (serial) or MemoryTransport
//! └────────┘ └──────────────┘
//! ```

pub mod activity;
pub mod config;
pub mod forwarder;
pub mod logutil;
pub mod metrics;
pub mod modem;
pub mod rules;
pub mod transport;
pub mod validation;
