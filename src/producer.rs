//! # Producer — claim, route, push
//!
//! ## Responsibility
//! Run one producer client loop: claim the next item index from the shared
//! counter, pick a buffer by weighted random selection over a local weight
//! table, push with a bounded timeout, and feed wait-time observations back
//! to the producer coordinator on a fixed refresh cadence.
//!
//! ## Guarantees
//! - No item loss: an item whose push timed out is retained and retried on
//!   the next iteration before any new claim is made.
//! - The poison flood runs exactly once per run — only the producer whose
//!   exit decremented the active count to zero performs it.
//! - Local weights are advisory; the coordinator's table is authoritative
//!   and replaces the local one wholesale on every successful refresh.
//!
//! ## NOT Responsible For
//! - The authoritative weight table (see: coordinator.rs)
//! - Consuming or counting delivered items (see: consumer.rs)

use crate::buffer::{BoundedBuffer, Item, PushOutcome};
use crate::config::BalancerConfig;
use crate::coordinator::{request_refresh, ClientRequest, Observation};
use crate::counters::ProgressCounters;
use crate::metrics;
use crate::weights::{WeightTable, PUSH_TIMEOUT_DECAY};
use crate::ExitReason;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Summary of one producer's run.
#[derive(Debug, Clone)]
pub struct ProducerStats {
    /// This producer's id within the role.
    pub id: usize,
    /// Items successfully pushed.
    pub items_pushed: u64,
    /// Push attempts that timed out (each item was retried, not lost).
    pub push_timeouts: u64,
    /// Coordinator refreshes that returned a snapshot.
    pub refreshes: u64,
    /// Coordinator refreshes that timed out; local weights kept.
    pub stale_refreshes: u64,
    /// Why the loop ended.
    pub exit: ExitReason,
}

impl ProducerStats {
    /// Placeholder stats for a producer whose task was lost.
    pub fn aborted(id: usize) -> Self {
        Self {
            id,
            items_pushed: 0,
            push_timeouts: 0,
            refreshes: 0,
            stale_refreshes: 0,
            exit: ExitReason::Cancelled,
        }
    }
}

/// One producer client: owns a local weight table and a claimed-item slot.
///
/// # Panics
///
/// No methods on this type panic.
pub struct Producer {
    id: usize,
    buffers: Arc<Vec<BoundedBuffer>>,
    coordinator: mpsc::Sender<ClientRequest>,
    counters: Arc<ProgressCounters>,
    config: Arc<BalancerConfig>,
    shutdown: watch::Receiver<bool>,
}

impl Producer {
    /// Create a producer client.
    pub fn new(
        id: usize,
        buffers: Arc<Vec<BoundedBuffer>>,
        coordinator: mpsc::Sender<ClientRequest>,
        counters: Arc<ProgressCounters>,
        config: Arc<BalancerConfig>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id,
            buffers,
            coordinator,
            counters,
            config,
            shutdown,
        }
    }

    /// Run the producer loop to completion.
    ///
    /// Exits on claim exhaustion or the cooperative stop flag; the exit
    /// path always decrements the active-producer count exactly once and
    /// sends one termination request.
    pub async fn run(self) -> ProducerStats {
        let mut rng = SmallRng::from_entropy();
        let mut weights = WeightTable::uniform(self.buffers.len());
        let mut stats = ProducerStats {
            id: self.id,
            items_pushed: 0,
            push_timeouts: 0,
            refreshes: 0,
            stale_refreshes: 0,
            exit: ExitReason::ClaimExhausted,
        };
        // Item claimed but not yet accepted by any buffer. Holding it here
        // is what makes a push timeout lossless.
        let mut pending: Option<u64> = None;
        let mut last_observation: Option<Observation> = None;
        let mut iterations: u64 = 0;

        debug!(producer = self.id, "producer started");

        loop {
            if *self.shutdown.borrow() {
                stats.exit = ExitReason::Cancelled;
                break;
            }

            let item = match pending.take() {
                Some(item) => item,
                None => match self.counters.claim(self.config.total_items) {
                    Some(item) => item,
                    None => {
                        stats.exit = ExitReason::ClaimExhausted;
                        break;
                    }
                },
            };

            iterations += 1;
            if iterations % self.config.refresh_interval == 0 {
                match request_refresh(
                    &self.coordinator,
                    self.id,
                    last_observation.take(),
                    self.config.coordinator_timeout(),
                )
                .await
                {
                    Some(snapshot) => {
                        weights.replace(snapshot);
                        stats.refreshes += 1;
                        metrics::inc_refresh("producer", "fresh");
                    }
                    None => {
                        stats.stale_refreshes += 1;
                        metrics::inc_refresh("producer", "stale");
                    }
                }
            }

            let target = weights.pick(&mut rng);
            let start = Instant::now();
            match self.buffers[target]
                .try_push(Item::Value(item), self.config.push_timeout())
                .await
            {
                PushOutcome::Accepted => {
                    let wait = start.elapsed();
                    self.counters.record_produced();
                    stats.items_pushed += 1;
                    weights.observe(target, wait);
                    last_observation = Some(Observation {
                        buffer: target,
                        wait,
                    });
                    metrics::inc_produced(target);
                    metrics::observe_wait("push", wait);
                    if self.config.verbose {
                        trace!(producer = self.id, item, buffer = target, "pushed");
                    }
                }
                PushOutcome::Timeout => {
                    stats.push_timeouts += 1;
                    weights.decay(target, PUSH_TIMEOUT_DECAY);
                    metrics::inc_timeout("push", target);
                    // Keep the item; next iteration retries it on a
                    // (likely different) buffer.
                    pending = Some(item);
                    if self.config.verbose {
                        trace!(producer = self.id, item, buffer = target, "push timeout");
                    }
                }
            }
        }

        if self.counters.producer_exited() {
            debug!(producer = self.id, "last producer out, flooding poison");
            self.flood_poison().await;
        }

        if self.coordinator
            .send(ClientRequest::Terminate { client_id: self.id })
            .await
            .is_err()
        {
            // The coordinator's liveness check covers a lost termination.
            warn!(producer = self.id, "coordinator gone before termination");
        }

        info!(
            producer = self.id,
            pushed = stats.items_pushed,
            timeouts = stats.push_timeouts,
            exit = stats.exit.as_str(),
            "producer finished"
        );
        stats
    }

    /// Enqueue one poison token into every buffer, retrying each push until
    /// it lands. Consumers keep draining, so space always frees up; only
    /// the stop flag can abandon the flood.
    async fn flood_poison(&self) {
        for buffer in self.buffers.iter() {
            loop {
                if *self.shutdown.borrow() {
                    warn!(
                        producer = self.id,
                        buffer = buffer.id(),
                        "poison flood abandoned on shutdown"
                    );
                    return;
                }
                match buffer
                    .try_push(Item::Poison, self.config.push_timeout())
                    .await
                {
                    PushOutcome::Accepted => {
                        buffer.mark_draining();
                        debug!(producer = self.id, buffer = buffer.id(), "poisoned");
                        break;
                    }
                    PushOutcome::Timeout => {}
                }
            }
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
