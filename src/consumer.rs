//! # Consumer — pick, pop, count
//!
//! ## Responsibility
//! Run one consumer client loop: pick a live buffer by weighted random
//! selection, pop with a bounded timeout, count delivered items against the
//! global target, and feed wait-time observations back to the consumer
//! coordinator on the shared refresh cadence.
//!
//! ## Guarantees
//! - A buffer is popped only while this consumer believes it alive; poison
//!   observation and the Closed state both retire it locally.
//! - The loop always exits: target reached, every buffer dead, or the
//!   cooperative stop flag — whichever comes first.
//! - Each exit decrements the active-consumer count exactly once and sends
//!   one termination request.
//!
//! ## NOT Responsible For
//! - Writing poison (see: producer.rs)
//! - The Draining → Closed transition itself (see: buffer.rs)

use crate::buffer::{BoundedBuffer, PopOutcome};
use crate::config::BalancerConfig;
use crate::coordinator::{request_refresh, ClientRequest, Observation};
use crate::counters::ProgressCounters;
use crate::metrics;
use crate::weights::{WeightTable, POP_TIMEOUT_DECAY};
use crate::ExitReason;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, trace, warn};

/// Summary of one consumer's run.
#[derive(Debug, Clone)]
pub struct ConsumerStats {
    /// This consumer's id within the role.
    pub id: usize,
    /// Payload items popped.
    pub items_popped: u64,
    /// Pop attempts that timed out.
    pub pop_timeouts: u64,
    /// Coordinator refreshes that returned a snapshot.
    pub refreshes: u64,
    /// Coordinator refreshes that timed out; local weights kept.
    pub stale_refreshes: u64,
    /// Poison tokens this consumer popped.
    pub poisons_observed: u64,
    /// Why the loop ended.
    pub exit: ExitReason,
}

impl ConsumerStats {
    /// Placeholder stats for a consumer whose task was lost.
    pub fn aborted(id: usize) -> Self {
        Self {
            id,
            items_popped: 0,
            pop_timeouts: 0,
            refreshes: 0,
            stale_refreshes: 0,
            poisons_observed: 0,
            exit: ExitReason::Cancelled,
        }
    }
}

/// One consumer client: owns a local weight table and per-buffer alive
/// flags.
///
/// # Panics
///
/// No methods on this type panic.
pub struct Consumer {
    id: usize,
    buffers: Arc<Vec<BoundedBuffer>>,
    coordinator: mpsc::Sender<ClientRequest>,
    counters: Arc<ProgressCounters>,
    config: Arc<BalancerConfig>,
    shutdown: watch::Receiver<bool>,
}

impl Consumer {
    /// Create a consumer client.
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

    /// Run the consumer loop to completion.
    pub async fn run(self) -> ConsumerStats {
        let mut rng = SmallRng::from_entropy();
        let mut weights = WeightTable::uniform(self.buffers.len());
        let mut stats = ConsumerStats {
            id: self.id,
            items_popped: 0,
            pop_timeouts: 0,
            refreshes: 0,
            stale_refreshes: 0,
            poisons_observed: 0,
            exit: ExitReason::TargetReached,
        };
        // This consumer's local view of which buffers still deliver.
        let mut alive = vec![true; self.buffers.len()];
        let mut dead = 0usize;
        let mut last_observation: Option<Observation> = None;
        let mut iterations: u64 = 0;

        debug!(consumer = self.id, "consumer started");

        loop {
            if *self.shutdown.borrow() {
                stats.exit = ExitReason::Cancelled;
                break;
            }
            if dead == self.buffers.len() {
                stats.exit = ExitReason::AllBuffersDead;
                break;
            }
            if self.counters.consumed() >= self.config.total_items {
                stats.exit = ExitReason::TargetReached;
                break;
            }

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
                        metrics::inc_refresh("consumer", "fresh");
                    }
                    None => {
                        stats.stale_refreshes += 1;
                        metrics::inc_refresh("consumer", "stale");
                    }
                }
            }

            let Some(target) = weights.pick_alive(&mut rng, &alive) else {
                stats.exit = ExitReason::AllBuffersDead;
                break;
            };

            // Another consumer may already have observed this buffer's
            // poison; retire it locally without popping.
            if self.buffers[target].is_closed() {
                if alive[target] {
                    alive[target] = false;
                    dead += 1;
                    weights.mark_dead(target);
                }
                continue;
            }

            let start = Instant::now();
            match self.buffers[target].try_pop(self.config.pop_timeout()).await {
                PopOutcome::Item(item) => {
                    let wait = start.elapsed();
                    self.counters.record_consumed();
                    stats.items_popped += 1;
                    weights.observe(target, wait);
                    last_observation = Some(Observation {
                        buffer: target,
                        wait,
                    });
                    metrics::inc_consumed(target);
                    metrics::observe_wait("pop", wait);
                    if self.config.verbose {
                        trace!(consumer = self.id, item, buffer = target, "popped");
                    }
                }
                PopOutcome::Poison { first_observer } => {
                    stats.poisons_observed += 1;
                    if alive[target] {
                        alive[target] = false;
                        dead += 1;
                        weights.mark_dead(target);
                    }
                    debug!(
                        consumer = self.id,
                        buffer = target,
                        first_observer,
                        "poison observed"
                    );
                }
                PopOutcome::Timeout => {
                    stats.pop_timeouts += 1;
                    weights.decay(target, POP_TIMEOUT_DECAY);
                    metrics::inc_timeout("pop", target);
                }
            }
        }

        let _ = self.counters.consumer_exited();

        if self.coordinator
            .send(ClientRequest::Terminate { client_id: self.id })
            .await
            .is_err()
        {
            warn!(consumer = self.id, "coordinator gone before termination");
        }

        info!(
            consumer = self.id,
            popped = stats.items_popped,
            poisons = stats.poisons_observed,
            timeouts = stats.pop_timeouts,
            exit = stats.exit.as_str(),
            "consumer finished"
        );
        stats
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::Item;
    use std::time::Duration;

    fn small_config(total_items: u64) -> Arc<BalancerConfig> {
        Arc::new(BalancerConfig {
            num_producers: 1,
            num_consumers: 1,
            num_buffers: 1,
            buffer_capacity: 16,
            total_items,
            refresh_interval: 100,
            push_timeout_ms: 20,
            pop_timeout_ms: 20,
            coordinator_timeout_ms: 10,
            ..BalancerConfig::default()
        })
    }

    async fn preload(buffer: &BoundedBuffer, values: &[u64], poison: bool) {
        for &v in values {
            let _ = buffer.try_push(Item::Value(v), Duration::from_millis(20)).await;
        }
        if poison {
            let _ = buffer.try_push(Item::Poison, Duration::from_millis(20)).await;
            buffer.mark_draining();
        }
    }

    #[tokio::test]
    async fn test_consumer_stops_at_target() {
        let config = small_config(3);
        let buffers = Arc::new(vec![BoundedBuffer::new(0, 16)]);
        preload(&buffers[0], &[10, 11, 12], true).await;
        let counters = Arc::new(ProgressCounters::new(1, 1));
        let (coord_tx, _coord_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let consumer = Consumer::new(
            0,
            buffers,
            coord_tx,
            Arc::clone(&counters),
            config,
            shutdown_rx,
        );
        let stats = consumer.run().await;

        assert_eq!(stats.exit, ExitReason::TargetReached);
        assert_eq!(stats.items_popped, 3);
        assert_eq!(counters.consumed(), 3);
        assert_eq!(counters.active_consumers(), 0);
    }

    #[tokio::test]
    async fn test_consumer_exits_when_all_buffers_dead() {
        // Target of 10 can never be met; the poison must end the loop.
        let config = small_config(10);
        let buffers = Arc::new(vec![BoundedBuffer::new(0, 16)]);
        preload(&buffers[0], &[1, 2], true).await;
        let counters = Arc::new(ProgressCounters::new(1, 1));
        let (coord_tx, _coord_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let consumer = Consumer::new(0, buffers, coord_tx, counters, config, shutdown_rx);
        let stats = consumer.run().await;

        assert_eq!(stats.exit, ExitReason::AllBuffersDead);
        assert_eq!(stats.items_popped, 2);
        assert_eq!(stats.poisons_observed, 1);
    }

    #[tokio::test]
    async fn test_cancelled_consumer_exits_without_popping() {
        let config = small_config(100);
        let buffers = Arc::new(vec![BoundedBuffer::new(0, 16)]);
        preload(&buffers[0], &[1, 2, 3], false).await;
        let counters = Arc::new(ProgressCounters::new(1, 1));
        let (coord_tx, _coord_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let _ = shutdown_tx.send(true);

        let consumer = Consumer::new(
            0,
            buffers,
            coord_tx,
            Arc::clone(&counters),
            config,
            shutdown_rx,
        );
        let stats = consumer.run().await;

        assert_eq!(stats.exit, ExitReason::Cancelled);
        assert_eq!(stats.items_popped, 0);
        assert_eq!(counters.active_consumers(), 0);
    }

    #[tokio::test]
    async fn test_poisoned_buffer_is_retired_and_target_still_met() {
        // Two buffers; buffer 1 dies via its poison, then the target is
        // met from buffer 0. The consumer must never wedge on buffer 1.
        let config = Arc::new(BalancerConfig {
            num_buffers: 2,
            total_items: 2,
            refresh_interval: 100,
            pop_timeout_ms: 20,
            ..BalancerConfig::default()
        });
        let buffers = Arc::new(vec![
            BoundedBuffer::new(0, 16),
            BoundedBuffer::new(1, 16),
        ]);
        preload(&buffers[0], &[7, 8], false).await;
        preload(&buffers[1], &[], true).await;
        let counters = Arc::new(ProgressCounters::new(1, 1));
        let (coord_tx, _coord_rx) = mpsc::channel(8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        let consumer = Consumer::new(0, buffers, coord_tx, counters, config, shutdown_rx);
        let stats = tokio::time::timeout(Duration::from_secs(10), consumer.run())
            .await
            .unwrap_or_else(|_| panic!("consumer must not wedge"));

        assert_eq!(stats.exit, ExitReason::TargetReached);
        assert_eq!(stats.items_popped, 2);
    }
}
