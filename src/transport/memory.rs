//! In-memory transport for tests and dry runs.
//!
//! Holds an inbox of stored messages and records every send with the tokio
//! clock, so pacing can be asserted under paused time. Failures can be
//! injected per destination, for deletes and for polls.

use std::collections::{HashSet, VecDeque};

use tokio::time::Instant;

use super::{DeviceIdentity, InboundMessage, OutboundMessage, RawContent, Transport, TransportError};

/// Outbound message accepted by a [`MemoryTransport`].
#[derive(Debug, Clone)]
pub struct SentRecord {
    pub message: OutboundMessage,
    pub at: Instant,
}

#[derive(Debug)]
pub struct MemoryTransport {
    identity: Option<DeviceIdentity>,
    inbox: Vec<InboundMessage>,
    next_index: u32,
    sent: Vec<SentRecord>,
    deleted: Vec<u32>,
    polls: u32,
    failing_destinations: HashSet<String>,
    fail_deletes: bool,
    poll_failures: VecDeque<String>,
}

impl Default for MemoryTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            identity: Some(DeviceIdentity {
                product_name: "Memory Modem".to_string(),
                serial_number: "MEM-0001".to_string(),
            }),
            inbox: Vec::new(),
            next_index: 1,
            sent: Vec::new(),
            deleted: Vec::new(),
            polls: 0,
            failing_destinations: HashSet::new(),
            fail_deletes: false,
            poll_failures: VecDeque::new(),
        }
    }

    /// A transport with no device attached; `identify_device` fails.
    pub fn without_device() -> Self {
        Self {
            identity: None,
            ..Self::new()
        }
    }

    /// Store a new inbound message and return its index.
    pub fn receive(&mut self, sender: &str, content: impl Into<RawContent>) -> u32 {
        let index = self.next_index;
        self.next_index += 1;
        self.inbox.push(InboundMessage::new(index, sender, content.into()));
        index
    }

    pub fn fail_sends_to(&mut self, destination: &str) {
        self.failing_destinations.insert(destination.to_string());
    }

    pub fn set_fail_deletes(&mut self, fail: bool) {
        self.fail_deletes = fail;
    }

    /// Make the next poll fail with `reason`. Queued failures are consumed in order.
    pub fn fail_next_poll(&mut self, reason: &str) {
        self.poll_failures.push_back(reason.to_string());
    }

    pub fn pending(&self) -> &[InboundMessage] {
        &self.inbox
    }

    pub fn sent(&self) -> &[SentRecord] {
        &self.sent
    }

    pub fn sent_destinations(&self) -> Vec<&str> {
        self.sent.iter().map(|r| r.message.destination.as_str()).collect()
    }

    /// Indices removed from the inbox, in deletion order.
    pub fn deleted(&self) -> &[u32] {
        &self.deleted
    }

    pub fn polls(&self) -> u32 {
        self.polls
    }
}

impl Transport for MemoryTransport {
    async fn identify_device(&mut self) -> Result<DeviceIdentity, TransportError> {
        self.identity
            .clone()
            .ok_or_else(|| TransportError::NoDevice("memory transport has no device".to_string()))
    }

    async fn list_pending(&mut self) -> Result<Vec<InboundMessage>, TransportError> {
        self.polls += 1;
        if let Some(reason) = self.poll_failures.pop_front() {
            return Err(TransportError::Protocol(reason));
        }
        Ok(self.inbox.clone())
    }

    async fn send(&mut self, message: &OutboundMessage) -> Result<(), TransportError> {
        if self.failing_destinations.contains(&message.destination) {
            return Err(TransportError::Rejected {
                command: format!("send to {}", message.destination),
                reason: "injected failure".to_string(),
            });
        }
        self.sent.push(SentRecord {
            message: message.clone(),
            at: Instant::now(),
        });
        Ok(())
    }

    async fn delete(&mut self, message: &InboundMessage) -> Result<(), TransportError> {
        if self.fail_deletes {
            return Err(TransportError::Rejected {
                command: format!("delete {}", message.index),
                reason: "injected failure".to_string(),
            });
        }
        match self.inbox.iter().position(|m| m.index == message.index) {
            Some(pos) => {
                self.inbox.remove(pos);
                self.deleted.push(message.index);
                Ok(())
            }
            None => Err(TransportError::NotFound(message.index)),
        }
    }
}
