//! End-to-end forwarding behaviour against the in-memory transport.
//!
//! All tests run on paused tokio time, so pacing pauses complete instantly
//! while still being observable through the recorded send instants.

use std::sync::Arc;

use smsfwd::activity::MemoryLog;
use smsfwd::forwarder::{CycleReport, EngineError, EngineTuning, ForwardingEngine, MessageOutcome};
use smsfwd::rules::{Rule, RuleSet};
use smsfwd::transport::memory::MemoryTransport;
use smsfwd::transport::{RawContent, TransportError};
use tokio::time::{Duration, Instant};
use tokio_test::{assert_err, assert_ok};

fn rule(pattern: &str, targets: &[&str]) -> Rule {
    Rule::new(pattern, targets.iter().map(|t| t.to_string()).collect())
}

fn engine_with(
    rules: Vec<Rule>,
    transport: MemoryTransport,
    tuning: EngineTuning,
) -> ForwardingEngine<MemoryTransport, MemoryLog> {
    ForwardingEngine::new(Arc::new(RuleSet::new(rules)), transport, MemoryLog::new(), tuning)
}

fn engine(rules: Vec<Rule>, transport: MemoryTransport) -> ForwardingEngine<MemoryTransport, MemoryLog> {
    engine_with(rules, transport, EngineTuning::default())
}

#[tokio::test(start_paused = true)]
async fn wildcard_rule_forwards_original_content_then_retires() {
    let mut transport = MemoryTransport::new();
    transport.receive("+555", "Grüezi 👋");
    let mut e = engine(vec![rule("*", &["+100"])], transport);

    assert_ok!(e.start().await);
    assert_ok!(e.run_cycles(1).await);

    let t = e.transport();
    assert_eq!(t.sent_destinations(), vec!["+100"]);
    assert_eq!(t.sent()[0].message.content, RawContent::from("Grüezi 👋"));
    assert_eq!(t.deleted(), &[1]);
    assert!(t.pending().is_empty());
}

#[tokio::test(start_paused = true)]
async fn unmatched_message_is_still_retired() {
    let mut transport = MemoryTransport::new();
    transport.receive("+999", "nobody wants me");
    let mut e = engine(vec![rule("+222", &["+100", "+200"])], transport);

    let report = assert_ok!(e.poll_once().await);
    assert_eq!(report.forwarded, 0);
    assert_eq!(report.outcomes, vec![MessageOutcome::Retired]);
    assert!(e.transport().sent().is_empty());
    assert_eq!(e.transport().deleted(), &[1]);
    assert!(e
        .activity()
        .lines()
        .iter()
        .any(|l| l == "clear message from +999"));
}

#[tokio::test(start_paused = true)]
async fn all_matching_rules_forward_in_order_with_pacing() {
    let mut transport = MemoryTransport::new();
    transport.receive("+300", "hello");
    let mut e = engine(vec![rule("*", &["+100"]), rule("+300", &["+400"])], transport);

    assert_ok!(e.run_cycles(1).await);

    let sent = e.transport().sent();
    assert_eq!(e.transport().sent_destinations(), vec!["+100", "+400"]);
    assert!(sent[1].at - sent[0].at >= Duration::from_millis(2000));
    assert_eq!(e.transport().deleted(), &[1]);
}

#[tokio::test(start_paused = true)]
async fn empty_polls_still_pause_between_cycles() {
    let mut e = engine(vec![rule("*", &["+100"])], MemoryTransport::new());
    let started = Instant::now();

    assert_ok!(e.run_cycles(3).await);

    assert_eq!(e.transport().polls(), 3);
    assert!(started.elapsed() >= Duration::from_millis(3 * 2000));
    assert!(e.transport().sent().is_empty());
    assert_eq!(e.stats().polls, 3);
}

#[tokio::test(start_paused = true)]
async fn configured_intervals_are_honoured() {
    let tuning = EngineTuning {
        poll_interval: Duration::from_millis(50),
        send_gap: Duration::from_millis(10),
        ..EngineTuning::default()
    };
    let mut transport = MemoryTransport::new();
    transport.receive("+1", "x");
    let mut e = engine_with(vec![rule("*", &["+100", "+200"])], transport, tuning);
    let started = Instant::now();

    assert_ok!(e.run_cycles(1).await);

    let sent = e.transport().sent();
    let gap = sent[1].at - sent[0].at;
    assert!(gap >= Duration::from_millis(10) && gap < Duration::from_millis(50), "{gap:?}");
    let elapsed = started.elapsed();
    assert!(elapsed >= Duration::from_millis(10 + 10 + 50), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(2000), "{elapsed:?}");
}

#[tokio::test(start_paused = true)]
async fn messages_are_processed_in_device_order() {
    let mut transport = MemoryTransport::new();
    transport.receive("+1", "first");
    transport.receive("+2", "second");
    let mut e = engine(vec![rule("*", &["+100"])], transport);

    let report = assert_ok!(e.poll_once().await);
    assert_eq!(report.messages, 2);
    let bodies: Vec<String> = e
        .transport()
        .sent()
        .iter()
        .map(|r| r.message.content.to_string_lossy())
        .collect();
    assert_eq!(bodies, vec!["first", "second"]);
    assert_eq!(e.transport().deleted(), &[1, 2]);
}

#[tokio::test(start_paused = true)]
async fn duplicate_targets_are_not_collapsed() {
    let mut transport = MemoryTransport::new();
    transport.receive("+300", "x");
    let mut e = engine(vec![rule("*", &["+100"]), rule("+300", &["+100"])], transport);

    assert_ok!(e.poll_once().await);
    assert_eq!(e.transport().sent_destinations(), vec!["+100", "+100"]);
}

#[tokio::test(start_paused = true)]
async fn failed_send_does_not_stop_other_destinations() {
    let mut transport = MemoryTransport::new();
    transport.fail_sends_to("+100");
    transport.receive("+1", "x");
    let mut e = engine(vec![rule("*", &["+100", "+200"])], transport);

    let report = assert_ok!(e.poll_once().await);
    assert_eq!(report.send_failures, 1);
    assert_eq!(report.forwarded, 1);
    assert_eq!(e.transport().sent_destinations(), vec!["+200"]);
    // retired by default even though one forward failed
    assert_eq!(e.transport().deleted(), &[1]);
    assert_eq!(e.stats().send_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn retain_on_send_failure_keeps_message_for_next_cycle() {
    let tuning = EngineTuning {
        retain_on_send_failure: true,
        ..EngineTuning::default()
    };
    let mut transport = MemoryTransport::new();
    transport.fail_sends_to("+100");
    transport.receive("+1", "x");
    let mut e = engine_with(vec![rule("*", &["+100"])], transport, tuning);

    let report = assert_ok!(e.poll_once().await);
    assert_eq!(report.outcomes, vec![MessageOutcome::Retained]);
    assert_eq!(e.transport().pending().len(), 1);
    assert!(!e
        .activity()
        .lines()
        .iter()
        .any(|l| l.starts_with("clear message")));
    assert_eq!(e.stats().retained, 1);
}

#[tokio::test(start_paused = true)]
async fn failed_delete_reprocesses_message_next_cycle() {
    let mut transport = MemoryTransport::new();
    transport.set_fail_deletes(true);
    transport.receive("+1", "x");
    let mut e = engine(vec![rule("*", &["+100"])], transport);

    let first = assert_ok!(e.poll_once().await);
    assert_eq!(first.outcomes, vec![MessageOutcome::RetireFailed]);

    e.transport_mut().set_fail_deletes(false);
    let second = assert_ok!(e.poll_once().await);
    assert_eq!(second.outcomes, vec![MessageOutcome::Retired]);

    // at-least-once: the destination sees the message twice
    assert_eq!(e.transport().sent_destinations(), vec!["+100", "+100"]);
    assert!(e.transport().pending().is_empty());
    assert_eq!(e.stats().retire_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn absent_message_on_retire_counts_as_retired() {
    use smsfwd::transport::{InboundMessage, Transport};

    let mut transport = MemoryTransport::new();
    transport.receive("+1", "x");
    let stale: InboundMessage = assert_ok!(transport.list_pending().await).remove(0);
    assert_ok!(transport.delete(&stale).await);
    let err = assert_err!(transport.delete(&stale).await);
    assert!(matches!(err, TransportError::NotFound(1)));

    // a transport that lists a message it can no longer delete
    struct Stale {
        inner: MemoryTransport,
        listed: InboundMessage,
    }
    impl Transport for Stale {
        async fn identify_device(&mut self) -> Result<smsfwd::transport::DeviceIdentity, TransportError> {
            self.inner.identify_device().await
        }
        async fn list_pending(&mut self) -> Result<Vec<InboundMessage>, TransportError> {
            Ok(vec![self.listed.clone()])
        }
        async fn send(&mut self, m: &smsfwd::transport::OutboundMessage) -> Result<(), TransportError> {
            self.inner.send(m).await
        }
        async fn delete(&mut self, m: &InboundMessage) -> Result<(), TransportError> {
            self.inner.delete(m).await
        }
    }

    let mut e = ForwardingEngine::new(
        Arc::new(RuleSet::new(vec![rule("*", &["+100"])])),
        Stale {
            inner: transport,
            listed: stale,
        },
        MemoryLog::new(),
        EngineTuning::default(),
    );
    let report = assert_ok!(e.poll_once().await);
    assert_eq!(report.outcomes, vec![MessageOutcome::AlreadyGone]);
    assert_eq!(e.stats().retired, 1);
}

#[tokio::test(start_paused = true)]
async fn transient_poll_failure_is_retried() {
    let mut transport = MemoryTransport::new();
    transport.fail_next_poll("link down");
    transport.receive("+1", "x");
    let mut e = engine(vec![rule("*", &["+100"])], transport);

    assert_ok!(e.run_cycles(2).await);
    assert_eq!(e.transport().polls(), 2);
    assert_eq!(e.transport().sent_destinations(), vec!["+100"]);
    assert_eq!(e.stats().poll_failures, 1);
}

#[tokio::test(start_paused = true)]
async fn run_gives_up_after_consecutive_poll_failures() {
    let tuning = EngineTuning {
        max_consecutive_poll_failures: 3,
        ..EngineTuning::default()
    };
    let mut transport = MemoryTransport::new();
    for _ in 0..3 {
        transport.fail_next_poll("modem unplugged");
    }
    let mut e = engine_with(vec![rule("*", &["+100"])], transport, tuning);

    match e.run().await {
        Err(EngineError::PollFailures { failures, .. }) => assert_eq!(failures, 3),
        other => panic!("unexpected {:?}", other),
    }
    assert_eq!(e.transport().polls(), 3);
}

#[tokio::test(start_paused = true)]
async fn missing_device_is_fatal_at_start() {
    let mut e = engine(vec![rule("*", &["+100"])], MemoryTransport::without_device());
    let err = assert_err!(e.run().await);
    assert!(matches!(err, EngineError::Device(TransportError::NoDevice(_))));
    assert_eq!(e.transport().polls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cycle_report_counts_everything() {
    let mut transport = MemoryTransport::new();
    transport.receive("+300", "a");
    transport.receive("+999", "b");
    let mut e = engine(vec![rule("*", &["+100"]), rule("+300", &["+400"])], transport);

    let report = assert_ok!(e.poll_once().await);
    assert_eq!(
        report,
        CycleReport {
            messages: 2,
            forwarded: 3,
            send_failures: 0,
            outcomes: vec![MessageOutcome::Retired, MessageOutcome::Retired],
        }
    );
    let (transport, log) = e.into_parts();
    assert!(transport.pending().is_empty());
    assert_eq!(log.lines().iter().filter(|l| l.starts_with("New SMS")).count(), 2);
}
