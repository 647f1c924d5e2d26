//! DeadlineEstimator (C1): a rolling percentile estimator of caller
//! processing latency, used by [`super::renewer::LeaseRenewer`] to propose
//! the next lease duration.
//!
//! Guarded by a plain `std::sync::Mutex` rather than an async lock: samples
//! are recorded from the synchronous commit path and read by the renewer's
//! tick, and no RPC is ever issued while holding it (matching the ledger's
//! discipline in §5).

use std::sync::Mutex;
use std::time::Duration;

use crate::config::{MAX_LEASE, MIN_LEASE};

const SAMPLE_CAPACITY: usize = 256;
pub(crate) const MIN_SAMPLES: usize = 10;

#[derive(Debug)]
struct Inner {
    samples: Vec<Duration>,
    next: usize,
}

/// Proposes lease durations from the 99th percentile of recent
/// admit-to-ack latencies, clamped to `[MIN_LEASE, MAX_LEASE]`. Until
/// `MIN_SAMPLES` observations exist, always proposes `MIN_LEASE`.
#[derive(Debug)]
pub struct DeadlineEstimator {
    inner: Mutex<Inner>,
}

impl DeadlineEstimator {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                samples: Vec::with_capacity(SAMPLE_CAPACITY),
                next: 0,
            }),
        }
    }

    /// Records one observed processing latency (admit to caller-requested ack).
    pub fn observe(&self, latency: Duration) {
        let mut inner = self.inner.lock().unwrap();
        if inner.samples.len() < SAMPLE_CAPACITY {
            inner.samples.push(latency);
        } else {
            let idx = inner.next;
            inner.samples[idx] = latency;
            inner.next = (inner.next + 1) % SAMPLE_CAPACITY;
        }
    }

    /// Number of latency samples recorded so far, capped at
    /// [`SAMPLE_CAPACITY`]. Exposed for tests verifying that commit paths
    /// actually feed this estimator rather than just constructing one.
    pub(crate) fn sample_count(&self) -> usize {
        self.inner.lock().unwrap().samples.len()
    }

    /// Proposes the next lease duration.
    pub fn propose(&self) -> Duration {
        let inner = self.inner.lock().unwrap();
        if inner.samples.len() < MIN_SAMPLES {
            return MIN_LEASE;
        }
        let mut sorted = inner.samples.clone();
        sorted.sort_unstable();
        let idx = ((sorted.len() as f64) * 0.99).ceil() as usize;
        let idx = idx.saturating_sub(1).min(sorted.len() - 1);
        sorted[idx].clamp(MIN_LEASE, MAX_LEASE)
    }
}

impl Default for DeadlineEstimator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_min_lease_until_enough_samples() {
        let est = DeadlineEstimator::new();
        for _ in 0..MIN_SAMPLES - 1 {
            est.observe(Duration::from_secs(500));
        }
        assert_eq!(est.propose(), MIN_LEASE);
    }

    #[test]
    fn proposes_p99_once_warmed_up() {
        let est = DeadlineEstimator::new();
        for i in 0..100 {
            est.observe(Duration::from_secs(i + 1));
        }
        // 99th percentile of 1..=100s should be near 99-100s.
        let proposed = est.propose();
        assert!(proposed >= Duration::from_secs(98), "{proposed:?}");
    }

    #[test]
    fn clamps_to_max_lease() {
        let est = DeadlineEstimator::new();
        for _ in 0..50 {
            est.observe(Duration::from_secs(10_000));
        }
        assert_eq!(est.propose(), MAX_LEASE);
    }
}
