//! # RoleCoordinator — serialized owner of one role's weight table
//!
//! ## Responsibility
//! Own the authoritative [`WeightTable`] for one client role (producers or
//! consumers), serialize every update through a single request queue,
//! answer refresh requests with defensive snapshots, and detect when all
//! clients of the role have terminated.
//!
//! ## Architecture
//!
//! ```text
//! Producer 0 ─┐
//! Producer 1 ─┼─► mpsc request queue ─► RoleCoordinator task
//! Producer N ─┘        (many-to-one)      │ owns WeightTable
//!      ▲                                  │ (single writer, no lock)
//!      └───── oneshot reply (snapshot) ◄──┘
//! ```
//!
//! ## Guarantees
//! - The weight table is mutated only inside this task's loop — the
//!   many-to-one queue replaces a mutex.
//! - Replies carry copies, never aliases into the live table.
//! - Termination counting is over *distinct* client ids; duplicates are
//!   logged and ignored.
//! - A bounded `recv` timeout re-checks the role's active-client counter,
//!   so a lost termination message cannot wedge the coordinator.
//!
//! ## NOT Responsible For
//! - Local per-client weights (see: producer.rs, consumer.rs)
//! - Buffer state (see: buffer.rs)

use crate::counters::ProgressCounters;
use crate::weights::WeightTable;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// The two client roles, each served by its own coordinator instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Clients that claim and push items.
    Producer,
    /// Clients that pop and count items.
    Consumer,
}

impl Role {
    /// Stable lowercase name for logging and metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Producer => "producer",
            Role::Consumer => "consumer",
        }
    }
}

/// A client's most recent wait-time sample for one buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Index of the buffer the sample was taken on.
    pub buffer: usize,
    /// Measured push or pop latency.
    pub wait: Duration,
}

/// A request from a client to its role coordinator.
///
/// Produced by a client, consumed exactly once by the coordinator.
#[derive(Debug)]
pub enum ClientRequest {
    /// Ask for a fresh weight snapshot, optionally reporting the latest
    /// observation first. The reply travels over a private oneshot.
    Refresh {
        /// Requesting client's id within its role.
        client_id: usize,
        /// Latest wait-time sample, if the client has one to report.
        observation: Option<Observation>,
        /// Private reply channel; receives a snapshot, never an alias.
        reply: oneshot::Sender<Vec<f64>>,
    },
    /// The client has finished its loop and will send nothing further.
    Terminate {
        /// Terminating client's id within its role.
        client_id: usize,
    },
}

/// Summary of one coordinator's run, reported after termination.
#[derive(Debug, Clone)]
pub struct CoordinatorStats {
    /// Which role this coordinator served.
    pub role: Role,
    /// Refresh requests answered.
    pub refreshes: u64,
    /// Distinct clients that sent a termination request.
    pub terminations: usize,
    /// Malformed requests dropped (out-of-range observation index).
    pub dropped: u64,
}

impl CoordinatorStats {
    /// Zeroed stats for a coordinator whose task was lost.
    pub fn empty(role: Role) -> Self {
        Self {
            role,
            refreshes: 0,
            terminations: 0,
            dropped: 0,
        }
    }
}

/// Single serializing owner of the routing-weight state for one role.
///
/// # Panics
///
/// No methods on this type panic.
pub struct RoleCoordinator {
    role: Role,
    weights: WeightTable,
    expected_clients: usize,
    liveness_interval: Duration,
    rx: mpsc::Receiver<ClientRequest>,
    counters: Arc<ProgressCounters>,
    terminated: HashSet<usize>,
    refreshes: u64,
    dropped: u64,
}

impl RoleCoordinator {
    /// Create a coordinator for `expected_clients` clients of `role`
    /// routing across `num_buffers` buffers.
    pub fn new(
        role: Role,
        num_buffers: usize,
        expected_clients: usize,
        liveness_interval: Duration,
        rx: mpsc::Receiver<ClientRequest>,
        counters: Arc<ProgressCounters>,
    ) -> Self {
        Self {
            role,
            weights: WeightTable::uniform(num_buffers),
            expected_clients,
            liveness_interval,
            rx,
            counters,
            terminated: HashSet::new(),
            refreshes: 0,
            dropped: 0,
        }
    }

    /// Serve requests until every expected client has terminated.
    ///
    /// The only states are Running and Terminated. While running, the
    /// bounded `recv` wait doubles as a liveness check: on timeout the
    /// coordinator consults the shared active-client counter and exits if
    /// the clients are objectively done even though a termination message
    /// went missing.
    pub async fn run(mut self) -> CoordinatorStats {
        info!(
            role = self.role.as_str(),
            clients = self.expected_clients,
            buffers = self.weights.len(),
            "coordinator started"
        );

        while self.terminated.len() < self.expected_clients {
            match timeout(self.liveness_interval, self.rx.recv()).await {
                Err(_) => {
                    if self.active_clients() == 0 {
                        debug!(
                            role = self.role.as_str(),
                            terminations = self.terminated.len(),
                            "clients objectively done, exiting on liveness check"
                        );
                        break;
                    }
                }
                Ok(None) => {
                    debug!(role = self.role.as_str(), "request queue closed");
                    break;
                }
                Ok(Some(request)) => self.handle(request),
            }
        }

        info!(
            role = self.role.as_str(),
            refreshes = self.refreshes,
            terminations = self.terminated.len(),
            "coordinator terminated"
        );

        CoordinatorStats {
            role: self.role,
            refreshes: self.refreshes,
            terminations: self.terminated.len(),
            dropped: self.dropped,
        }
    }

    fn active_clients(&self) -> usize {
        match self.role {
            Role::Producer => self.counters.active_producers(),
            Role::Consumer => self.counters.active_consumers(),
        }
    }

    /// Apply one request to the table. Malformed requests are dropped and
    /// logged; the coordinator never dies from a bad request.
    fn handle(&mut self, request: ClientRequest) {
        match request {
            ClientRequest::Terminate { client_id } => {
                if self.terminated.insert(client_id) {
                    debug!(
                        role = self.role.as_str(),
                        client = client_id,
                        count = self.terminated.len(),
                        expected = self.expected_clients,
                        "termination recorded"
                    );
                } else {
                    warn!(
                        role = self.role.as_str(),
                        client = client_id,
                        "duplicate termination ignored"
                    );
                }
            }
            ClientRequest::Refresh {
                client_id,
                observation,
                reply,
            } => {
                if let Some(observation) = observation {
                    if observation.buffer >= self.weights.len() {
                        warn!(
                            role = self.role.as_str(),
                            client = client_id,
                            buffer = observation.buffer,
                            "out-of-range observation dropped"
                        );
                        self.dropped += 1;
                        return;
                    }
                    self.weights.observe(observation.buffer, observation.wait);
                    self.weights.normalize();
                }
                self.refreshes += 1;
                // Snapshot, never an alias into the live table. A dropped
                // reply receiver just means the client stopped waiting.
                let _ = reply.send(self.weights.snapshot());
            }
        }
    }

    #[cfg(test)]
    fn weights(&self) -> &WeightTable {
        &self.weights
    }
}

/// Client-side refresh round trip: send a [`ClientRequest::Refresh`] and
/// wait up to `wait` for the snapshot.
///
/// Returns `None` on a coordinator timeout or a closed queue — in both
/// cases the caller proceeds on its stale local weights; this is a
/// scheduling outcome, not an error.
///
/// # Panics
///
/// This function never panics.
pub async fn request_refresh(
    tx: &mpsc::Sender<ClientRequest>,
    client_id: usize,
    observation: Option<Observation>,
    wait: Duration,
) -> Option<Vec<f64>> {
    let (reply_tx, reply_rx) = oneshot::channel();
    let request = ClientRequest::Refresh {
        client_id,
        observation,
        reply: reply_tx,
    };
    if tx.send(request).await.is_err() {
        return None;
    }
    match timeout(wait, reply_rx).await {
        Ok(Ok(snapshot)) => Some(snapshot),
        _ => None,
    }
}

// ── Tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    const TOLERANCE: f64 = 1e-6;

    fn test_coordinator(
        role: Role,
        num_buffers: usize,
        clients: usize,
    ) -> (mpsc::Sender<ClientRequest>, RoleCoordinator) {
        let (tx, rx) = mpsc::channel(16);
        let counters = Arc::new(ProgressCounters::new(clients, clients));
        let coordinator = RoleCoordinator::new(
            role,
            num_buffers,
            clients,
            Duration::from_millis(50),
            rx,
            counters,
        );
        (tx, coordinator)
    }

    #[test]
    fn test_role_as_str() {
        assert_eq!(Role::Producer.as_str(), "producer");
        assert_eq!(Role::Consumer.as_str(), "consumer");
    }

    #[tokio::test]
    async fn test_refresh_updates_and_normalizes() {
        let (_tx, mut coordinator) = test_coordinator(Role::Producer, 3, 1);
        let (reply_tx, reply_rx) = oneshot::channel();
        coordinator.handle(ClientRequest::Refresh {
            client_id: 0,
            observation: Some(Observation {
                buffer: 1,
                wait: Duration::from_millis(20),
            }),
            reply: reply_tx,
        });

        let sum = coordinator.weights().sum();
        assert!(
            (sum - 3.0).abs() < TOLERANCE,
            "sum must equal length after update, got {sum}"
        );

        let snapshot = reply_rx
            .await
            .unwrap_or_else(|_| panic!("reply must arrive"));
        assert_eq!(snapshot.len(), 3);
        // The congested buffer must now carry less weight than the others.
        assert!(snapshot[1] < snapshot[0]);
    }

    #[tokio::test]
    async fn test_out_of_range_observation_dropped_without_reply() {
        let (_tx, mut coordinator) = test_coordinator(Role::Consumer, 2, 1);
        let (reply_tx, reply_rx) = oneshot::channel();
        coordinator.handle(ClientRequest::Refresh {
            client_id: 0,
            observation: Some(Observation {
                buffer: 9,
                wait: Duration::from_millis(1),
            }),
            reply: reply_tx,
        });
        assert_eq!(coordinator.dropped, 1);
        assert!(reply_rx.await.is_err(), "dropped request must not reply");
        // The table is untouched.
        assert!((coordinator.weights().sum() - 2.0).abs() < TOLERANCE);
    }

    #[tokio::test]
    async fn test_refresh_without_observation_still_replies() {
        let (_tx, mut coordinator) = test_coordinator(Role::Producer, 2, 1);
        let (reply_tx, reply_rx) = oneshot::channel();
        coordinator.handle(ClientRequest::Refresh {
            client_id: 0,
            observation: None,
            reply: reply_tx,
        });
        let snapshot = reply_rx
            .await
            .unwrap_or_else(|_| panic!("reply must arrive"));
        assert_eq!(snapshot, vec![1.0, 1.0]);
    }

    #[tokio::test]
    async fn test_duplicate_termination_counts_once() {
        let (_tx, mut coordinator) = test_coordinator(Role::Producer, 2, 3);
        coordinator.handle(ClientRequest::Terminate { client_id: 0 });
        coordinator.handle(ClientRequest::Terminate { client_id: 0 });
        assert_eq!(coordinator.terminated.len(), 1);
    }

    #[tokio::test]
    async fn test_run_terminates_after_k_distinct_clients_any_order() {
        let (tx, coordinator) = test_coordinator(Role::Consumer, 2, 4);
        let handle = tokio::spawn(coordinator.run());

        // Interleave refreshes with out-of-order terminations.
        for client_id in [2usize, 0, 3] {
            let _ = request_refresh(&tx, client_id, None, Duration::from_millis(100)).await;
            let _ = tx.send(ClientRequest::Terminate { client_id }).await;
        }
        // Duplicate from an already-terminated client must not finish it.
        let _ = tx.send(ClientRequest::Terminate { client_id: 0 }).await;
        let _ = tx.send(ClientRequest::Terminate { client_id: 1 }).await;

        let stats = handle
            .await
            .unwrap_or_else(|_| panic!("coordinator task must complete"));
        assert_eq!(stats.terminations, 4);
        assert_eq!(stats.refreshes, 3);
    }

    #[tokio::test]
    async fn test_run_exits_on_closed_queue() {
        let (tx, coordinator) = test_coordinator(Role::Producer, 2, 5);
        let handle = tokio::spawn(coordinator.run());
        drop(tx);
        let stats = handle
            .await
            .unwrap_or_else(|_| panic!("coordinator task must complete"));
        assert!(stats.terminations < 5);
    }

    #[tokio::test]
    async fn test_liveness_check_exits_when_clients_objectively_done() {
        let (tx, rx) = mpsc::channel(4);
        // Zero active producers from the start; no termination messages.
        let counters = Arc::new(ProgressCounters::new(0, 0));
        let coordinator = RoleCoordinator::new(
            Role::Producer,
            2,
            3,
            Duration::from_millis(20),
            rx,
            counters,
        );
        let handle = tokio::spawn(coordinator.run());
        let stats = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap_or_else(|_| panic!("liveness check must fire"))
            .unwrap_or_else(|_| panic!("coordinator task must complete"));
        assert_eq!(stats.terminations, 0);
        drop(tx);
    }

    #[tokio::test]
    async fn test_request_refresh_returns_none_when_coordinator_gone() {
        let (tx, rx) = mpsc::channel::<ClientRequest>(1);
        drop(rx);
        let result = request_refresh(&tx, 0, None, Duration::from_millis(20)).await;
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn test_request_refresh_times_out_on_silent_coordinator() {
        let (tx, _rx) = mpsc::channel::<ClientRequest>(1);
        let result = request_refresh(&tx, 0, None, Duration::from_millis(20)).await;
        assert_eq!(result, None);
    }
}
