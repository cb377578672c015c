//! # WeightTable — normalized routing-weight vector
//!
//! ## Responsibility
//! Hold per-buffer routing weights and implement the feedback arithmetic:
//! EWMA updates from observed wait times, multiplicative decay on timeouts,
//! renormalization, and weighted random selection.
//!
//! ## Guarantees
//! - Entries are never negative.
//! - A floored minimum ([`MIN_WEIGHT`]) prevents a live buffer from being
//!   starved to zero selection probability; only [`mark_dead`](WeightTable::mark_dead)
//!   drops an entry to exactly zero.
//! - After [`normalize`](WeightTable::normalize) the sum of entries equals
//!   the vector length (mean weight 1.0) within floating-point tolerance.
//!
//! ## NOT Responsible For
//! - Deciding *when* to update (see: producer.rs, consumer.rs)
//! - Serializing concurrent updates (see: coordinator.rs)

use rand::Rng;
use std::time::Duration;

/// Floor applied to every live weight so no buffer is starved outright.
pub const MIN_WEIGHT: f64 = 0.01;

/// EWMA fraction retained from the previous weight.
pub const EWMA_RETAIN: f64 = 0.7;

/// EWMA fraction contributed by the new observation.
pub const EWMA_BLEND: f64 = 0.3;

/// Multiplicative decay applied to a buffer's local weight after a push
/// timeout (congestion signal, not reported to the coordinator).
pub const PUSH_TIMEOUT_DECAY: f64 = 0.9;

/// Multiplicative decay applied to a buffer's local weight after a pop
/// timeout (empty-buffer signal, not reported to the coordinator).
pub const POP_TIMEOUT_DECAY: f64 = 0.95;

/// Map an observed wait time to a weight sample in `(0.0, 1.0]`.
///
/// A zero wait maps to 1.0 and the curve falls off as `1 / (1 + wait_ms)`:
/// a 1 ms wait maps to 0.5, a 9 ms wait to 0.1.
///
/// # Panics
///
/// This function never panics.
pub fn observed_weight(wait: Duration) -> f64 {
    1.0 / (1.0 + wait.as_secs_f64() * 1_000.0)
}

/// A vector of non-negative per-buffer routing weights.
///
/// Coordinators own the authoritative table (single writer, reached only
/// through message passing); clients own a local copy that is replaced
/// wholesale on refresh and mutated only by their own loop.
///
/// # Panics
///
/// No methods on this type panic.
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable {
    weights: Vec<f64>,
}

impl WeightTable {
    /// Create a table with every entry set to 1.0 (already normalized).
    pub fn uniform(len: usize) -> Self {
        Self {
            weights: vec![1.0; len],
        }
    }

    /// Create a table from explicit weights. Negative entries are clamped
    /// to zero.
    pub fn from_weights(weights: Vec<f64>) -> Self {
        Self {
            weights: weights.into_iter().map(|w| w.max(0.0)).collect(),
        }
    }

    /// Number of entries (equals the number of buffers).
    pub fn len(&self) -> usize {
        self.weights.len()
    }

    /// Return `true` if the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    /// Weight for `index`, or 0.0 if the index is out of range.
    pub fn get(&self, index: usize) -> f64 {
        self.weights.get(index).copied().unwrap_or(0.0)
    }

    /// Sum of all entries.
    pub fn sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// Replace the whole table with a snapshot received from a coordinator.
    ///
    /// A snapshot of the wrong length is ignored — the client proceeds on
    /// its current table, exactly as it does on a refresh timeout.
    pub fn replace(&mut self, snapshot: Vec<f64>) {
        if snapshot.len() == self.weights.len() {
            self.weights = snapshot;
        }
    }

    /// Fold an observed wait time for `index` into the table via EWMA.
    ///
    /// Out-of-range indices are ignored. The result is floored at
    /// [`MIN_WEIGHT`].
    pub fn observe(&mut self, index: usize, wait: Duration) {
        if let Some(w) = self.weights.get_mut(index) {
            *w = (EWMA_RETAIN * *w + EWMA_BLEND * observed_weight(wait)).max(MIN_WEIGHT);
        }
    }

    /// Multiply the weight at `index` by `factor`, floored at [`MIN_WEIGHT`].
    ///
    /// Dead entries (exactly zero) stay dead. Out-of-range indices are
    /// ignored.
    pub fn decay(&mut self, index: usize, factor: f64) {
        if let Some(w) = self.weights.get_mut(index) {
            if *w > 0.0 {
                *w = (*w * factor).max(MIN_WEIGHT);
            }
        }
    }

    /// Drop the weight at `index` to exactly zero (buffer observed dead).
    ///
    /// This is the only way an entry goes below [`MIN_WEIGHT`].
    pub fn mark_dead(&mut self, index: usize) {
        if let Some(w) = self.weights.get_mut(index) {
            *w = 0.0;
        }
    }

    /// Rescale so the sum of entries equals the vector length.
    ///
    /// A table whose sum is zero (all entries dead) is left unchanged.
    pub fn normalize(&mut self) {
        let sum = self.sum();
        if sum > 0.0 {
            let len = self.weights.len() as f64;
            for w in &mut self.weights {
                *w = *w / sum * len;
            }
        }
    }

    /// Defensive copy of the current weights.
    ///
    /// Coordinators send this — never a reference into the live table.
    pub fn snapshot(&self) -> Vec<f64> {
        self.weights.clone()
    }

    /// Weighted random selection over all entries.
    ///
    /// Draws a uniform value in `[0, total)` and walks the cumulative sum.
    /// If floating-point rounding leaves no match, the last index is the
    /// deterministic fallback. An empty or all-zero table selects index 0.
    pub fn pick<R: Rng>(&self, rng: &mut R) -> usize {
        let total = self.sum();
        if self.weights.len() <= 1 || total <= 0.0 {
            return 0;
        }
        let draw = rng.gen_range(0.0..total);
        let mut cumulative = 0.0;
        for (i, w) in self.weights.iter().enumerate() {
            cumulative += w;
            if draw < cumulative {
                return i;
            }
        }
        self.weights.len() - 1
    }

    /// Weighted random selection restricted to entries whose `alive` flag
    /// is set, renormalized over that subset.
    ///
    /// Returns `None` when no entry is alive. If every alive entry carries
    /// zero weight (cannot happen through this type's own mutators, which
    /// floor live weights), the first alive index is the deterministic
    /// fallback.
    pub fn pick_alive<R: Rng>(&self, rng: &mut R, alive: &[bool]) -> Option<usize> {
        let total: f64 = self
            .weights
            .iter()
            .zip(alive)
            .filter(|&(_, &a)| a)
            .map(|(w, _)| w)
            .sum();
        if total <= 0.0 {
            return alive.iter().position(|&a| a);
        }
        let draw = rng.gen_range(0.0..total);
        let mut cumulative = 0.0;
        let mut last_alive = None;
        for (i, (w, &a)) in self.weights.iter().zip(alive).enumerate() {
            if a {
                cumulative += w;
                last_alive = Some(i);
                if draw < cumulative {
                    return Some(i);
                }
            }
        }
        last_alive
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
