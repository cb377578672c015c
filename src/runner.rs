//! # Runner — spawn, supervise, collect
//!
//! ## Responsibility
//! Turn a validated [`BalancerConfig`] into a running task topology —
//! buffers, two coordinators, producer and consumer fleets, an optional
//! deadline watchdog — and collect every task's stats into one
//! [`RunResult`].
//!
//! ## Guarantees
//! - Configuration is validated before any task is spawned.
//! - Every spawned task is awaited; a panicked task degrades to placeholder
//!   stats instead of poisoning the run.
//! - The runner holds no sender clones while awaiting, so coordinator
//!   queues close naturally once the last client drops its handle.
//!
//! ## NOT Responsible For
//! - Routing or weight semantics (see: producer.rs, consumer.rs,
//!   coordinator.rs)

use crate::buffer::BoundedBuffer;
use crate::config::BalancerConfig;
use crate::consumer::{Consumer, ConsumerStats};
use crate::coordinator::{CoordinatorStats, Role, RoleCoordinator};
use crate::counters::ProgressCounters;
use crate::producer::{Producer, ProducerStats};
use crate::BalancerError;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{info, warn};

/// Depth of each coordinator's request queue. Requests are small and
/// clients block on their oneshot replies, so this never needs tuning with
/// fleet size.
const COORDINATOR_QUEUE_DEPTH: usize = 64;

/// Everything a finished run reports.
#[derive(Debug)]
pub struct RunResult {
    /// Items successfully pushed into buffers.
    pub items_produced: u64,
    /// Items popped and counted.
    pub items_consumed: u64,
    /// Payload deliveries per buffer, indexed by buffer id.
    pub per_buffer: Vec<u64>,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// Per-producer stats, indexed by producer id.
    pub producers: Vec<ProducerStats>,
    /// Per-consumer stats, indexed by consumer id.
    pub consumers: Vec<ConsumerStats>,
    /// Producer-side coordinator summary.
    pub producer_coordinator: CoordinatorStats,
    /// Consumer-side coordinator summary.
    pub consumer_coordinator: CoordinatorStats,
}

/// Execute one complete balancer run.
///
/// Spawns the coordinators first, then the producer fleet, then the
/// consumer fleet, and awaits them in reverse dependency order: producers,
/// consumers, coordinators.
///
/// # Errors
///
/// Returns [`BalancerError::InvalidConfig`] if validation fails; no task
/// is spawned in that case.
///
/// # Panics
///
/// This function never panics.
pub async fn run(config: BalancerConfig) -> Result<RunResult, BalancerError> {
    config.validate()?;
    let config = Arc::new(config);
    let start = Instant::now();

    info!(
        producers = config.num_producers,
        consumers = config.num_consumers,
        buffers = config.num_buffers,
        total_items = config.total_items,
        "run starting"
    );

    let counters = Arc::new(ProgressCounters::new(
        config.num_producers,
        config.num_consumers,
    ));
    let buffers: Arc<Vec<BoundedBuffer>> = Arc::new(
        (0..config.num_buffers)
            .map(|id| BoundedBuffer::new(id, config.buffer_capacity))
            .collect(),
    );

    let (producer_tx, producer_rx) = mpsc::channel(COORDINATOR_QUEUE_DEPTH);
    let (consumer_tx, consumer_rx) = mpsc::channel(COORDINATOR_QUEUE_DEPTH);

    let producer_coordinator = tokio::spawn(
        RoleCoordinator::new(
            Role::Producer,
            config.num_buffers,
            config.num_producers,
            config.liveness_interval(),
            producer_rx,
            Arc::clone(&counters),
        )
        .run(),
    );
    let consumer_coordinator = tokio::spawn(
        RoleCoordinator::new(
            Role::Consumer,
            config.num_buffers,
            config.num_consumers,
            config.liveness_interval(),
            consumer_rx,
            Arc::clone(&counters),
        )
        .run(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    // The watchdog owns the sender; if no deadline is configured the
    // sender is dropped and the flag stays false forever.
    let watchdog = config.max_runtime().map(|limit| {
        tokio::spawn(async move {
            sleep(limit).await;
            warn!(limit_ms = limit.as_millis() as u64, "deadline reached");
            let _ = shutdown_tx.send(true);
        })
    });

    let mut producer_handles = Vec::with_capacity(config.num_producers);
    for id in 0..config.num_producers {
        let producer = Producer::new(
            id,
            Arc::clone(&buffers),
            producer_tx.clone(),
            Arc::clone(&counters),
            Arc::clone(&config),
            shutdown_rx.clone(),
        );
        producer_handles.push(tokio::spawn(producer.run()));
    }

    let mut consumer_handles = Vec::with_capacity(config.num_consumers);
    for id in 0..config.num_consumers {
        let consumer = Consumer::new(
            id,
            Arc::clone(&buffers),
            consumer_tx.clone(),
            Arc::clone(&counters),
            Arc::clone(&config),
            shutdown_rx.clone(),
        );
        consumer_handles.push(tokio::spawn(consumer.run()));
    }

    // The fleets hold their own clones; releasing ours lets each
    // coordinator queue close once its last client exits.
    drop(producer_tx);
    drop(consumer_tx);
    drop(shutdown_rx);

    let mut producers = Vec::with_capacity(producer_handles.len());
    for (id, handle) in producer_handles.into_iter().enumerate() {
        match handle.await {
            Ok(stats) => producers.push(stats),
            Err(e) => {
                warn!(producer = id, error = %e, "producer task lost");
                producers.push(ProducerStats::aborted(id));
            }
        }
    }

    let mut consumers = Vec::with_capacity(consumer_handles.len());
    for (id, handle) in consumer_handles.into_iter().enumerate() {
        match handle.await {
            Ok(stats) => consumers.push(stats),
            Err(e) => {
                warn!(consumer = id, error = %e, "consumer task lost");
                consumers.push(ConsumerStats::aborted(id));
            }
        }
    }

    let producer_coordinator = match producer_coordinator.await {
        Ok(stats) => stats,
        Err(e) => {
            warn!(role = "producer", error = %e, "coordinator task lost");
            CoordinatorStats::empty(Role::Producer)
        }
    };
    let consumer_coordinator = match consumer_coordinator.await {
        Ok(stats) => stats,
        Err(e) => {
            warn!(role = "consumer", error = %e, "coordinator task lost");
            CoordinatorStats::empty(Role::Consumer)
        }
    };

    if let Some(watchdog) = watchdog {
        watchdog.abort();
    }

    let per_buffer: Vec<u64> = buffers.iter().map(|b| b.delivered()).collect();
    let result = RunResult {
        items_produced: counters.produced(),
        items_consumed: counters.consumed(),
        per_buffer,
        elapsed: start.elapsed(),
        producers,
        consumers,
        producer_coordinator,
        consumer_coordinator,
    };

    info!(
        produced = result.items_produced,
        consumed = result.items_consumed,
        elapsed_ms = result.elapsed.as_millis() as u64,
        "run finished"
    );
    Ok(result)
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_minimal_topology_routes_everything() {
        let config = BalancerConfig {
            num_producers: 1,
            num_consumers: 1,
            num_buffers: 1,
            buffer_capacity: 4,
            total_items: 10,
            refresh_interval: 3,
            push_timeout_ms: 50,
            pop_timeout_ms: 50,
            coordinator_timeout_ms: 100,
            ..BalancerConfig::default()
        };
        let result = run(config).await.unwrap_or_else(|e| panic!("run failed: {e}"));
        assert_eq!(result.items_produced, 10);
        assert_eq!(result.items_consumed, 10);
        assert_eq!(result.per_buffer.iter().sum::<u64>(), 10);
        assert_eq!(result.producers.len(), 1);
        assert_eq!(result.consumers.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_spawn() {
        let config = BalancerConfig {
            num_buffers: 0,
            ..BalancerConfig::default()
        };
        let err = run(config).await.expect_err("zero buffers must be rejected");
        assert!(matches!(err, BalancerError::InvalidConfig(_)));
    }
}
