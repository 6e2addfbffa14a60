//! Global atomic counters for QGate observability.
//!
//! Counters are incremented silently at the call site. Call
//! [`Metrics::flush`] to emit current values as a single
//! `tracing::info!` event (e.g. at the end of a run or a daemon tick).

use std::sync::atomic::{AtomicU64, Ordering};

/// Global metrics singleton.
pub static METRICS: Metrics = Metrics::new();

pub struct Metrics {
    checks_run: AtomicU64,
    checks_timed_out: AtomicU64,
    overrides_requested: AtomicU64,
    overrides_approved: AtomicU64,
    overrides_denied: AtomicU64,
    overrides_expired: AtomicU64,
    verdicts_computed: AtomicU64,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
pub struct MetricsSnapshot {
    pub checks_run: u64,
    pub checks_timed_out: u64,
    pub overrides_requested: u64,
    pub overrides_approved: u64,
    pub overrides_denied: u64,
    pub overrides_expired: u64,
    pub verdicts_computed: u64,
}

fn bump(counter: &AtomicU64, name: &'static str) {
    counter.fetch_add(1, Ordering::Relaxed);
    tracing::trace!(metric = name, "counter incremented");
}

impl Metrics {
    pub const fn new() -> Self {
        Self {
            checks_run: AtomicU64::new(0),
            checks_timed_out: AtomicU64::new(0),
            overrides_requested: AtomicU64::new(0),
            overrides_approved: AtomicU64::new(0),
            overrides_denied: AtomicU64::new(0),
            overrides_expired: AtomicU64::new(0),
            verdicts_computed: AtomicU64::new(0),
        }
    }

    pub fn inc_checks_run(&self) {
        bump(&self.checks_run, "checks_run");
    }

    pub fn inc_checks_timed_out(&self) {
        bump(&self.checks_timed_out, "checks_timed_out");
    }

    pub fn inc_overrides_requested(&self) {
        bump(&self.overrides_requested, "overrides_requested");
    }

    pub fn inc_overrides_approved(&self) {
        bump(&self.overrides_approved, "overrides_approved");
    }

    pub fn inc_overrides_denied(&self) {
        bump(&self.overrides_denied, "overrides_denied");
    }

    pub fn inc_overrides_expired(&self) {
        bump(&self.overrides_expired, "overrides_expired");
    }

    pub fn inc_verdicts_computed(&self) {
        bump(&self.verdicts_computed, "verdicts_computed");
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            checks_run: self.checks_run.load(Ordering::Relaxed),
            checks_timed_out: self.checks_timed_out.load(Ordering::Relaxed),
            overrides_requested: self.overrides_requested.load(Ordering::Relaxed),
            overrides_approved: self.overrides_approved.load(Ordering::Relaxed),
            overrides_denied: self.overrides_denied.load(Ordering::Relaxed),
            overrides_expired: self.overrides_expired.load(Ordering::Relaxed),
            verdicts_computed: self.verdicts_computed.load(Ordering::Relaxed),
        }
    }

    /// Emit all current counter values as a single `info!` event.
    ///
    /// Call this at natural boundaries rather than on every increment.
    pub fn flush(&self) {
        let s = self.snapshot();
        tracing::info!(
            metric = "flush",
            checks_run = s.checks_run,
            checks_timed_out = s.checks_timed_out,
            overrides_requested = s.overrides_requested,
            overrides_approved = s.overrides_approved,
            overrides_denied = s.overrides_denied,
            overrides_expired = s.overrides_expired,
            verdicts_computed = s.verdicts_computed,
        );
    }

    /// Reset all counters to zero (useful in tests).
    pub fn reset(&self) {
        for counter in [
            &self.checks_run,
            &self.checks_timed_out,
            &self.overrides_requested,
            &self.overrides_approved,
            &self.overrides_denied,
            &self.overrides_expired,
            &self.verdicts_computed,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}
