use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use opentelemetry::global;
use opentelemetry::metrics::{Counter as OtelCounter, Histogram as OtelHistogram};

/// Outcome counters for the interceptor. Includes lightweight atomics for tests
/// and OpenTelemetry handles for production.
#[derive(Clone)]
pub struct IdempotencyMetrics {
    pub invocations_total: Arc<AtomicU64>,
    pub bypassed_total: Arc<AtomicU64>,
    pub replayed_total: Arc<AtomicU64>,
    pub rejected_total: Arc<AtomicU64>,
    pub committed_total: Arc<AtomicU64>,
    pub failed_total: Arc<AtomicU64>,
    execution_hist: Option<OtelHistogram<f64>>,
    invocations_counter: Option<OtelCounter<u64>>,
    bypassed_counter: Option<OtelCounter<u64>>,
    replayed_counter: Option<OtelCounter<u64>>,
    rejected_counter: Option<OtelCounter<u64>>,
    committed_counter: Option<OtelCounter<u64>>,
    failed_counter: Option<OtelCounter<u64>>,
}

impl IdempotencyMetrics {
    pub fn new() -> Self {
        let meter = global::meter("hyena-idempotency");
        Self {
            invocations_total: Arc::new(AtomicU64::new(0)),
            bypassed_total: Arc::new(AtomicU64::new(0)),
            replayed_total: Arc::new(AtomicU64::new(0)),
            rejected_total: Arc::new(AtomicU64::new(0)),
            committed_total: Arc::new(AtomicU64::new(0)),
            failed_total: Arc::new(AtomicU64::new(0)),
            execution_hist: Some(meter.f64_histogram("idempotency_execution_ms").build()),
            invocations_counter: Some(meter.u64_counter("idempotency_invocations_total").build()),
            bypassed_counter: Some(meter.u64_counter("idempotency_bypassed_total").build()),
            replayed_counter: Some(meter.u64_counter("idempotency_replayed_total").build()),
            rejected_counter: Some(meter.u64_counter("idempotency_rejected_total").build()),
            committed_counter: Some(meter.u64_counter("idempotency_committed_total").build()),
            failed_counter: Some(meter.u64_counter("idempotency_failed_total").build()),
        }
    }

    pub fn record_invocation(&self) {
        bump(&self.invocations_total, self.invocations_counter.as_ref());
    }

    pub fn record_bypass(&self) {
        bump(&self.bypassed_total, self.bypassed_counter.as_ref());
    }

    pub fn record_replay(&self) {
        bump(&self.replayed_total, self.replayed_counter.as_ref());
    }

    pub fn record_rejection(&self) {
        bump(&self.rejected_total, self.rejected_counter.as_ref());
    }

    pub fn record_commit(&self, elapsed: Duration) {
        bump(&self.committed_total, self.committed_counter.as_ref());
        if let Some(hist) = &self.execution_hist {
            hist.record(elapsed.as_secs_f64() * 1000.0, &[]);
        }
    }

    pub fn record_failure(&self) {
        bump(&self.failed_total, self.failed_counter.as_ref());
    }

    /// Point-in-time copy of the atomic counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            invocations: self.invocations_total.load(Ordering::Relaxed),
            bypassed: self.bypassed_total.load(Ordering::Relaxed),
            replayed: self.replayed_total.load(Ordering::Relaxed),
            rejected: self.rejected_total.load(Ordering::Relaxed),
            committed: self.committed_total.load(Ordering::Relaxed),
            failed: self.failed_total.load(Ordering::Relaxed),
        }
    }
}

impl Default for IdempotencyMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn bump(total: &AtomicU64, counter: Option<&OtelCounter<u64>>) {
    total.fetch_add(1, Ordering::Relaxed);
    if let Some(counter) = counter {
        counter.add(1, &[]);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    pub invocations: u64,
    pub bypassed: u64,
    pub replayed: u64,
    pub rejected: u64,
    pub committed: u64,
    pub failed: u64,
}
