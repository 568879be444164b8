//! Forwarding counters.
//!
//! Each engine owns its own [`ForwardStats`]; nothing here is process-global,
//! so several engines (or tests) can run side by side.

/// Running totals for one engine.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ForwardStats {
    pub polls: u64,
    pub poll_failures: u64,
    pub received: u64,
    pub forwarded: u64,
    pub send_failures: u64,
    pub retired: u64,
    pub retire_failures: u64,
    /// Messages left on the device because a forward failed.
    pub retained: u64,
}

impl ForwardStats {
    pub fn inc_polls(&mut self) {
        self.polls = self.polls.saturating_add(1);
    }

    pub fn inc_poll_failures(&mut self) {
        self.poll_failures = self.poll_failures.saturating_add(1);
    }

    pub fn inc_received(&mut self) {
        self.received = self.received.saturating_add(1);
    }

    pub fn inc_forwarded(&mut self) {
        self.forwarded = self.forwarded.saturating_add(1);
    }

    pub fn inc_send_failures(&mut self) {
        self.send_failures = self.send_failures.saturating_add(1);
    }

    pub fn inc_retired(&mut self) {
        self.retired = self.retired.saturating_add(1);
    }

    pub fn inc_retire_failures(&mut self) {
        self.retire_failures = self.retire_failures.saturating_add(1);
    }

    pub fn inc_retained(&mut self) {
        self.retained = self.retained.saturating_add(1);
    }

    /// One-line summary for the periodic stats log.
    pub fn summary(&self) -> String {
        format!(
            "polls={} poll_failures={} received={} forwarded={} send_failures={} retired={} retire_failures={} retained={}",
            self.polls,
            self.poll_failures,
            self.received,
            self.forwarded,
            self.send_failures,
            self.retired,
            self.retire_failures,
            self.retained
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_independently() {
        let mut a = ForwardStats::default();
        let b = ForwardStats::default();
        a.inc_received();
        a.inc_forwarded();
        a.inc_forwarded();
        a.inc_retired();
        assert_eq!(a.received, 1);
        assert_eq!(a.forwarded, 2);
        assert_eq!(a.retired, 1);
        assert_eq!(b, ForwardStats::default());
    }

    #[test]
    fn summary_lists_every_counter() {
        let mut s = ForwardStats::default();
        s.inc_polls();
        s.inc_send_failures();
        let line = s.summary();
        assert!(line.starts_with("polls=1 "));
        assert!(line.contains("send_failures=1"));
        assert!(line.ends_with("retained=0"));
    }
}
