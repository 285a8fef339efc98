//! Rule engine statistics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for rule dispatch.
#[derive(Debug, Default)]
pub struct RuleStats {
    events_received: AtomicU64,
    invocations: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
    events_logged: AtomicU64,
}

impl RuleStats {
    /// Creates new statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records events handed to the engine.
    #[inline]
    pub fn record_events(&self, count: usize) {
        self.events_received
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Records a handler that returned successfully.
    #[inline]
    pub fn record_success(&self) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a handler that returned an error.
    #[inline]
    pub fn record_failure(&self) {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a handler that panicked. Panics also count as failures.
    #[inline]
    pub fn record_panic(&self) {
        self.record_failure();
        self.panicked.fetch_add(1, Ordering::Relaxed);
    }

    /// Records event log rows written.
    #[inline]
    pub fn record_logged(&self, count: usize) {
        self.events_logged.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Returns events handed to the engine.
    pub fn events_received(&self) -> u64 {
        self.events_received.load(Ordering::Relaxed)
    }

    /// Returns handler invocations.
    pub fn invocations(&self) -> u64 {
        self.invocations.load(Ordering::Relaxed)
    }

    /// Returns successful invocations.
    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    /// Returns failed invocations, panics included.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    /// Returns invocations that panicked.
    pub fn panicked(&self) -> u64 {
        self.panicked.load(Ordering::Relaxed)
    }

    /// Returns event log rows written.
    pub fn events_logged(&self) -> u64 {
        self.events_logged.load(Ordering::Relaxed)
    }

    /// Resets all counters.
    pub fn reset(&self) {
        self.events_received.store(0, Ordering::Relaxed);
        self.invocations.store(0, Ordering::Relaxed);
        self.succeeded.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
        self.panicked.store(0, Ordering::Relaxed);
        self.events_logged.store(0, Ordering::Relaxed);
    }
}

impl fmt::Display for RuleStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "events={} invocations={} succeeded={} failed={} panicked={} logged={}",
            self.events_received(),
            self.invocations(),
            self.succeeded(),
            self.failed(),
            self.panicked(),
            self.events_logged()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters() {
        let stats = RuleStats::new();
        stats.record_events(3);
        stats.record_success();
        stats.record_failure();
        stats.record_panic();
        stats.record_logged(3);

        assert_eq!(stats.events_received(), 3);
        assert_eq!(stats.invocations(), 3);
        assert_eq!(stats.succeeded(), 1);
        assert_eq!(stats.failed(), 2);
        assert_eq!(stats.panicked(), 1);
        assert_eq!(
            stats.to_string(),
            "events=3 invocations=3 succeeded=1 failed=2 panicked=1 logged=3"
        );

        stats.reset();
        assert_eq!(stats.invocations(), 0);
    }
}
