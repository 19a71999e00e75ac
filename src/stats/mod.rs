//! The `Stats` collaborator (spec.md §6): an optional, narrow trait for
//! structured metrics events. The core never depends on a collector being
//! present — [`NoopStats`] is wired in whenever monitoring is disabled, per
//! the design note in spec.md §9 ("re-architect as a narrow `Stats`
//! interface whose no-op default is injected when monitoring is disabled").
//!
//! This is distinct from [`crate::app::logger`]: logging is for operators
//! reading text, `Stats` is for counters a future exporter could scrape.

use std::sync::atomic::{AtomicU64, Ordering};

/// Structured metrics events the protocol state machine and pool emit.
/// Implementations must be `Send + Sync`: they may be called from any
/// connection's task.
pub trait Stats: Send + Sync {
    fn connection_created(&self) {}
    fn connection_destroyed(&self) {}
    fn query_executed(&self, _command: &str) {}
    fn protocol_message(&self, _msg_type: u8) {}
    fn prepared_statement_hit(&self) {}
    fn prepared_statement_miss(&self) {}
    fn bytes_transferred(&self, _sent: u64, _received: u64) {}
}

/// The default collector when no monitoring backend is configured.
#[derive(Debug, Default)]
pub struct NoopStats;

impl Stats for NoopStats {}

/// A simple in-process counter collector, useful for tests and for the
/// admin `SHOW STATS`-style introspection a future caller might add. Not
/// wired in by default; callers opt in by passing `Arc<CountingStats>`
/// wherever a `dyn Stats` is expected.
#[derive(Debug, Default)]
pub struct CountingStats {
    pub connections_created: AtomicU64,
    pub connections_destroyed: AtomicU64,
    pub queries_executed: AtomicU64,
    pub prepared_hits: AtomicU64,
    pub prepared_misses: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub bytes_received: AtomicU64,
}

impl Stats for CountingStats {
    fn connection_created(&self) {
        self.connections_created.fetch_add(1, Ordering::Relaxed);
    }
    fn connection_destroyed(&self) {
        self.connections_destroyed.fetch_add(1, Ordering::Relaxed);
    }
    fn query_executed(&self, _command: &str) {
        self.queries_executed.fetch_add(1, Ordering::Relaxed);
    }
    fn prepared_statement_hit(&self) {
        self.prepared_hits.fetch_add(1, Ordering::Relaxed);
    }
    fn prepared_statement_miss(&self) {
        self.prepared_misses.fetch_add(1, Ordering::Relaxed);
    }
    fn bytes_transferred(&self, sent: u64, received: u64) {
        self.bytes_sent.fetch_add(sent, Ordering::Relaxed);
        self.bytes_received.fetch_add(received, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::Ordering;

    #[test]
    fn counting_stats_accumulates() {
        let stats = CountingStats::default();
        stats.connection_created();
        stats.connection_created();
        stats.connection_destroyed();
        stats.query_executed("SELECT");
        assert_eq!(stats.connections_created.load(Ordering::Relaxed), 2);
        assert_eq!(stats.connections_destroyed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.queries_executed.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn noop_stats_is_inert() {
        let stats = NoopStats;
        stats.connection_created();
        stats.query_executed("SELECT");
    }
}
