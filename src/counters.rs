//! # ProgressCounters — process-wide atomic run state
//!
//! ## Responsibility
//! Hold the shared counters that drive claiming and termination: items
//! claimed, produced and consumed, plus the active producer/consumer
//! counts.
//!
//! ## Guarantees
//! - Mutated only through atomic increments/decrements; never behind a
//!   lock, and never while a buffer operation is in flight.
//! - [`producer_exited`](ProgressCounters::producer_exited) returns `true`
//!   for exactly one producer — the decrement that reached zero — which is
//!   what makes the poison flood happen exactly once.
//!
//! ## NOT Responsible For
//! - Per-buffer delivery counts (see: buffer.rs)
//! - Weight state (see: weights.rs, coordinator.rs)

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Shared atomic counters for one run.
///
/// Initialized at run start, mutated only via atomic operations, read-only
/// after the run completes.
///
/// # Panics
///
/// No methods on this type panic.
#[derive(Debug)]
pub struct ProgressCounters {
    claimed: AtomicU64,
    produced: AtomicU64,
    consumed: AtomicU64,
    active_producers: AtomicUsize,
    active_consumers: AtomicUsize,
}

impl ProgressCounters {
    /// Create counters for a run with the given client counts.
    pub fn new(num_producers: usize, num_consumers: usize) -> Self {
        Self {
            claimed: AtomicU64::new(0),
            produced: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
            active_producers: AtomicUsize::new(num_producers),
            active_consumers: AtomicUsize::new(num_consumers),
        }
    }

    /// Atomically claim the next item index.
    ///
    /// Returns `None` once `total` items have been claimed — the normal
    /// end-of-input condition, not an error.
    pub fn claim(&self, total: u64) -> Option<u64> {
        let next = self.claimed.fetch_add(1, Ordering::SeqCst);
        (next < total).then_some(next)
    }

    /// Record one successfully pushed item.
    pub fn record_produced(&self) -> u64 {
        self.produced.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Record one consumed item.
    pub fn record_consumed(&self) -> u64 {
        self.consumed.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Total claim attempts so far (may overshoot `total` by up to the
    /// number of producers).
    pub fn claimed(&self) -> u64 {
        self.claimed.load(Ordering::SeqCst)
    }

    /// Items successfully pushed into buffers so far.
    pub fn produced(&self) -> u64 {
        self.produced.load(Ordering::SeqCst)
    }

    /// Items consumed so far.
    pub fn consumed(&self) -> u64 {
        self.consumed.load(Ordering::SeqCst)
    }

    /// Producers still running.
    pub fn active_producers(&self) -> usize {
        self.active_producers.load(Ordering::SeqCst)
    }

    /// Consumers still running.
    pub fn active_consumers(&self) -> usize {
        self.active_consumers.load(Ordering::SeqCst)
    }

    /// Mark one producer as exited. Returns `true` for the last one.
    ///
    /// Must be called exactly once per producer.
    pub fn producer_exited(&self) -> bool {
        self.active_producers.fetch_sub(1, Ordering::SeqCst) == 1
    }

    /// Mark one consumer as exited. Returns `true` for the last one.
    ///
    /// Must be called exactly once per consumer.
    pub fn consumer_exited(&self) -> bool {
        self.active_consumers.fetch_sub(1, Ordering::SeqCst) == 1
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_yields_each_index_once() {
        let counters = ProgressCounters::new(1, 1);
        let claims: Vec<_> = (0..5).map(|_| counters.claim(5)).collect();
        assert_eq!(
            claims,
            vec![Some(0), Some(1), Some(2), Some(3), Some(4)]
        );
    }

    #[test]
    fn test_claim_exhausts_at_total() {
        let counters = ProgressCounters::new(2, 1);
        for _ in 0..3 {
            assert!(counters.claim(3).is_some());
        }
        assert_eq!(counters.claim(3), None);
        assert_eq!(counters.claim(3), None);
    }

    #[test]
    fn test_claimed_may_overshoot_total() {
        let counters = ProgressCounters::new(2, 1);
        for _ in 0..4 {
            let _ = counters.claim(3);
        }
        assert_eq!(counters.claimed(), 4);
    }

    #[test]
    fn test_record_produced_and_consumed() {
        let counters = ProgressCounters::new(1, 1);
        assert_eq!(counters.record_produced(), 1);
        assert_eq!(counters.record_produced(), 2);
        assert_eq!(counters.record_consumed(), 1);
        assert_eq!(counters.produced(), 2);
        assert_eq!(counters.consumed(), 1);
    }

    #[test]
    fn test_exactly_one_producer_is_last() {
        let counters = ProgressCounters::new(3, 1);
        let lasts: Vec<bool> = (0..3).map(|_| counters.producer_exited()).collect();
        assert_eq!(lasts.iter().filter(|&&l| l).count(), 1);
        assert!(lasts[2], "the final decrement must be the winner");
        assert_eq!(counters.active_producers(), 0);
    }

    #[test]
    fn test_exactly_one_consumer_is_last() {
        let counters = ProgressCounters::new(1, 2);
        assert!(!counters.consumer_exited());
        assert!(counters.consumer_exited());
        assert_eq!(counters.active_consumers(), 0);
    }

    #[test]
    fn test_concurrent_claims_never_duplicate() {
        use std::sync::Arc;

        let counters = Arc::new(ProgressCounters::new(4, 1));
        let total = 1_000u64;
        let mut handles = Vec::new();
        for _ in 0..4 {
            let counters = Arc::clone(&counters);
            handles.push(std::thread::spawn(move || {
                let mut mine = Vec::new();
                while let Some(claim) = counters.claim(total) {
                    mine.push(claim);
                }
                mine
            }));
        }
        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap_or_default())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (0..total).collect::<Vec<_>>());
    }
}
