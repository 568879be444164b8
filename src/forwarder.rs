//! # Forwarding Engine
//!
//! Drives the poll–match–forward–retire cycle:
//!
//! ```text
//! loop {
//!     list pending messages
//!     for each message (device order):
//!         log arrival
//!         for each destination of every matching rule (rule order):
//!             log, send a copy, pause send_gap
//!         log clear, delete the message
//!     pause poll_interval
//! }
//! ```
//!
//! Everything runs sequentially on the caller's task. A message is deleted only
//! after all of its forwards were attempted, so a crash in between leaves it on
//! the device and it is forwarded again after restart (at-least-once).
//!
//! ## Failure policy
//!
//! - a failed send is logged and counted; the remaining destinations are still
//!   tried and pacing still applies. The message is then retired, unless
//!   `retain_on_send_failure` is set, in which case it stays for the next cycle.
//! - a failed delete leaves the message pending; it is reprocessed next cycle.
//! - a delete reporting the message absent counts as retired.
//! - a failed poll is retried after the poll interval; too many in a row end
//!   [`ForwardingEngine::run`] with [`EngineError::PollFailures`].
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use smsfwd::activity::MemoryLog;
//! use smsfwd::forwarder::{EngineTuning, ForwardingEngine};
//! use smsfwd::rules::{Rule, RuleSet};
//! use smsfwd::transport::memory::MemoryTransport;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let rules = Arc::new(RuleSet::new(vec![Rule::new("*", vec!["+100".into()])]));
//!     let mut transport = MemoryTransport::new();
//!     transport.receive("+555", "hello");
//!     let mut engine = ForwardingEngine::new(rules, transport, MemoryLog::new(), EngineTuning::default());
//!     engine.start().await?;
//!     engine.run_cycles(1).await?;
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::sync::Arc;

use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::time::{sleep, timeout, Duration, Instant};

use crate::activity::ActivityLog;
use crate::config::ForwardingConfig;
use crate::metrics::ForwardStats;
use crate::rules::RuleSet;
use crate::transport::{DeviceIdentity, InboundMessage, OutboundMessage, Transport, TransportError};

#[derive(Debug, Error)]
pub enum EngineError {
    /// No usable device behind the transport; operator action needed.
    #[error("no messaging device available: {0}")]
    Device(#[source] TransportError),

    #[error("giving up after {failures} consecutive failed polls: {last}")]
    PollFailures {
        failures: u32,
        #[source]
        last: TransportError,
    },
}

/// Pacing, timeout and policy knobs of the engine.
#[derive(Debug, Clone)]
pub struct EngineTuning {
    pub poll_interval: Duration,
    pub send_gap: Duration,
    pub transport_timeout: Duration,
    pub retain_on_send_failure: bool,
    /// 0 = unlimited.
    pub max_consecutive_poll_failures: u32,
    /// `None` disables the periodic stats line.
    pub stats_interval: Option<Duration>,
}

impl Default for EngineTuning {
    fn default() -> Self {
        Self::from(&ForwardingConfig::default())
    }
}

impl From<&ForwardingConfig> for EngineTuning {
    fn from(cfg: &ForwardingConfig) -> Self {
        Self {
            poll_interval: Duration::from_millis(cfg.poll_interval_ms),
            send_gap: Duration::from_millis(cfg.send_gap_ms),
            transport_timeout: Duration::from_millis(cfg.transport_timeout_ms),
            retain_on_send_failure: cfg.retain_on_send_failure,
            max_consecutive_poll_failures: cfg.max_consecutive_poll_failures,
            stats_interval: (cfg.stats_interval_ms > 0)
                .then(|| Duration::from_millis(cfg.stats_interval_ms)),
        }
    }
}

/// What happened to one message in a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Retired,
    /// Delete reported the message already absent.
    AlreadyGone,
    /// Kept on the device after a failed forward (`retain_on_send_failure`).
    Retained,
    /// Delete failed; the message will be seen again next cycle.
    RetireFailed,
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub messages: usize,
    pub forwarded: usize,
    pub send_failures: usize,
    pub outcomes: Vec<MessageOutcome>,
}

/// Bound a transport call; an elapsed limit becomes [`TransportError::Timeout`].
async fn bounded<F, R>(limit: Duration, operation: &str, fut: F) -> Result<R, TransportError>
where
    F: Future<Output = Result<R, TransportError>>,
{
    match timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout {
            operation: operation.to_string(),
        }),
    }
}

pub struct ForwardingEngine<T, L> {
    rules: Arc<RuleSet>,
    transport: T,
    activity: L,
    tuning: EngineTuning,
    stats: ForwardStats,
    consecutive_poll_failures: u32,
    last_stats_log: Instant,
}

impl<T: Transport, L: ActivityLog> ForwardingEngine<T, L> {
    pub fn new(rules: Arc<RuleSet>, transport: T, activity: L, tuning: EngineTuning) -> Self {
        Self {
            rules,
            transport,
            activity,
            tuning,
            stats: ForwardStats::default(),
            consecutive_poll_failures: 0,
            last_stats_log: Instant::now(),
        }
    }

    pub fn rules(&self) -> &RuleSet {
        &self.rules
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn activity(&self) -> &L {
        &self.activity
    }

    pub fn stats(&self) -> ForwardStats {
        self.stats
    }

    pub fn into_parts(self) -> (T, L) {
        (self.transport, self.activity)
    }

    /// Identify the device behind the transport and log it.
    pub async fn start(&mut self) -> Result<DeviceIdentity, EngineError> {
        let limit = self.tuning.transport_timeout;
        let identity = bounded(limit, "device identification", self.transport.identify_device())
            .await
            .map_err(EngineError::Device)?;
        self.activity.record(&format!("Use {}", identity));
        info!(
            "Forwarding with {} rule(s) on {} (serial {})",
            self.rules.len(),
            identity.product_name,
            identity.serial_number
        );
        Ok(identity)
    }

    /// Start, then forward until a fatal error. Never returns `Ok`.
    pub async fn run(&mut self) -> Result<(), EngineError> {
        self.start().await?;
        loop {
            self.cycle().await?;
        }
    }

    /// Run `cycles` poll cycles, each followed by the poll interval pause.
    pub async fn run_cycles(&mut self, cycles: usize) -> Result<(), EngineError> {
        for _ in 0..cycles {
            self.cycle().await?;
        }
        Ok(())
    }

    async fn cycle(&mut self) -> Result<(), EngineError> {
        match self.poll_once().await {
            Ok(report) => {
                self.consecutive_poll_failures = 0;
                if report.messages > 0 {
                    debug!(
                        "Cycle done: {} message(s), {} forward(s), {} failed",
                        report.messages, report.forwarded, report.send_failures
                    );
                }
            }
            Err(e) => {
                self.stats.inc_poll_failures();
                self.consecutive_poll_failures += 1;
                let max = self.tuning.max_consecutive_poll_failures;
                if max > 0 && self.consecutive_poll_failures >= max {
                    error!("Polling failed {} times in a row: {}", self.consecutive_poll_failures, e);
                    return Err(EngineError::PollFailures {
                        failures: self.consecutive_poll_failures,
                        last: e,
                    });
                }
                warn!(
                    "Polling for messages failed ({} in a row): {}",
                    self.consecutive_poll_failures, e
                );
            }
        }
        self.maybe_log_stats();
        sleep(self.tuning.poll_interval).await;
        Ok(())
    }

    fn maybe_log_stats(&mut self) {
        if let Some(every) = self.tuning.stats_interval {
            if self.last_stats_log.elapsed() >= every {
                info!("Forwarding stats: {}", self.stats.summary());
                self.last_stats_log = Instant::now();
            }
        }
    }

    /// One poll cycle without the trailing pause.
    pub async fn poll_once(&mut self) -> Result<CycleReport, TransportError> {
        self.stats.inc_polls();
        let limit = self.tuning.transport_timeout;
        let messages = bounded(limit, "message listing", self.transport.list_pending()).await?;

        let mut report = CycleReport {
            messages: messages.len(),
            ..CycleReport::default()
        };
        for msg in &messages {
            let outcome = self.process_message(msg, &mut report).await;
            report.outcomes.push(outcome);
        }
        Ok(report)
    }

    async fn process_message(&mut self, msg: &InboundMessage, report: &mut CycleReport) -> MessageOutcome {
        self.stats.inc_received();
        self.activity.record(&format!("New SMS from {}:", msg.sender));
        self.activity.record(&format!("   {}", msg.text));

        let rules = Arc::clone(&self.rules);
        let mut failed = 0usize;
        for destination in rules.match_sender(&msg.sender) {
            self.activity.record(&format!("forward it to {}", destination));
            let outbound = OutboundMessage::compose(destination).with_content(msg.raw.clone());
            let operation = format!("send to {}", destination);
            let limit = self.tuning.transport_timeout;
            match bounded(limit, &operation, self.transport.send(&outbound)).await {
                Ok(()) => {
                    self.stats.inc_forwarded();
                    report.forwarded += 1;
                }
                Err(e) => {
                    warn!("Forwarding message from {} to {} failed: {}", msg.sender, destination, e);
                    self.stats.inc_send_failures();
                    report.send_failures += 1;
                    failed += 1;
                }
            }
            sleep(self.tuning.send_gap).await;
        }

        if failed > 0 && self.tuning.retain_on_send_failure {
            info!(
                "Keeping message from {} on the device for retry ({} forward(s) failed)",
                msg.sender, failed
            );
            self.stats.inc_retained();
            return MessageOutcome::Retained;
        }

        self.activity.record(&format!("clear message from {}", msg.sender));
        let operation = format!("delete of message {}", msg.index);
        let limit = self.tuning.transport_timeout;
        match bounded(limit, &operation, self.transport.delete(msg)).await {
            Ok(()) => {
                self.stats.inc_retired();
                MessageOutcome::Retired
            }
            Err(TransportError::NotFound(index)) => {
                debug!("Message {} from {} already gone", index, msg.sender);
                self.stats.inc_retired();
                MessageOutcome::AlreadyGone
            }
            Err(e) => {
                warn!(
                    "Could not delete message {} from {}; it will be processed again: {}",
                    msg.index, msg.sender, e
                );
                self.stats.inc_retire_failures();
                MessageOutcome::RetireFailed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::activity::MemoryLog;
    use crate::rules::Rule;
    use crate::transport::memory::MemoryTransport;

    fn engine(rules: Vec<Rule>, transport: MemoryTransport) -> ForwardingEngine<MemoryTransport, MemoryLog> {
        ForwardingEngine::new(
            Arc::new(RuleSet::new(rules)),
            transport,
            MemoryLog::new(),
            EngineTuning::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn activity_lines_follow_the_forwarding_order() {
        let mut t = MemoryTransport::new();
        t.receive("+555", "hello");
        let mut e = engine(vec![Rule::new("*", vec!["+100".into()])], t);
        e.start().await.unwrap();
        e.poll_once().await.unwrap();
        assert_eq!(
            e.activity().lines(),
            &[
                "Use Memory Modem MEM-0001",
                "New SMS from +555:",
                "   hello",
                "forward it to +100",
                "clear message from +555",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn clear_is_logged_once_per_message_not_per_rule() {
        let mut t = MemoryTransport::new();
        t.receive("+1", "x");
        let rules = vec![
            Rule::new("*", vec!["+100".into()]),
            Rule::new("+1", vec!["+200".into()]),
            Rule::new("+2", vec!["+300".into()]),
        ];
        let mut e = engine(rules, t);
        e.poll_once().await.unwrap();
        let clears = e
            .activity()
            .lines()
            .iter()
            .filter(|l| l.starts_with("clear message"))
            .count();
        assert_eq!(clears, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_transport_call_times_out() {
        struct Stuck;
        impl Transport for Stuck {
            async fn identify_device(&mut self) -> Result<DeviceIdentity, TransportError> {
                std::future::pending().await
            }
            async fn list_pending(&mut self) -> Result<Vec<InboundMessage>, TransportError> {
                std::future::pending().await
            }
            async fn send(&mut self, _: &OutboundMessage) -> Result<(), TransportError> {
                std::future::pending().await
            }
            async fn delete(&mut self, _: &InboundMessage) -> Result<(), TransportError> {
                std::future::pending().await
            }
        }
        let mut e = ForwardingEngine::new(Arc::new(RuleSet::default()), Stuck, MemoryLog::new(), EngineTuning::default());
        assert!(matches!(e.start().await, Err(EngineError::Device(TransportError::Timeout { .. }))));
        assert!(matches!(e.poll_once().await, Err(TransportError::Timeout { .. })));
    }

    #[test]
    fn tuning_from_config() {
        let cfg = ForwardingConfig {
            poll_interval_ms: 500,
            send_gap_ms: 250,
            stats_interval_ms: 0,
            ..ForwardingConfig::default()
        };
        let t = EngineTuning::from(&cfg);
        assert_eq!(t.poll_interval, Duration::from_millis(500));
        assert_eq!(t.send_gap, Duration::from_millis(250));
        assert!(t.stats_interval.is_none());
        assert_eq!(EngineTuning::default().send_gap, Duration::from_secs(2));
    }
}
