//! # BoundedBuffer — addressable, capacity-limited FIFO
//!
//! ## Responsibility
//! Provide the unit that producers and consumers route to by weighted
//! index: a finite-capacity FIFO with timeout-bounded push/pop and a
//! poison-token end-of-stream protocol.
//!
//! ## Guarantees
//! - FIFO within one buffer: pop order matches push order.
//! - Capacity is fixed at construction; no resizing.
//! - Contents are mutated only through [`try_push`](BoundedBuffer::try_push)
//!   and [`try_pop`](BoundedBuffer::try_pop).
//! - The Draining → Closed transition happens exactly once globally: the
//!   first consumer to pop the poison token wins the CAS; every later
//!   observer sees [`BufferState::Closed`].
//!
//! ## NOT Responsible For
//! - Routing decisions (see: weights.rs)
//! - Cross-buffer ordering — there is none by design (see: runner.rs)

use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;

/// A work item on the wire: either a payload or the poison sentinel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Item {
    /// A routed work item carrying its claimed sequence number.
    Value(u64),
    /// End-of-stream sentinel; written exactly once per buffer by the last
    /// producer, consumed at most once per buffer across all consumers.
    Poison,
}

/// Lifecycle of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferState {
    /// Accepting items; no poison written yet.
    Open,
    /// Poison has been enqueued; earlier items may still be in flight.
    Draining,
    /// Poison has been observed by a consumer; no further deliveries.
    Closed,
}

const STATE_OPEN: u8 = 0;
const STATE_DRAINING: u8 = 1;
const STATE_CLOSED: u8 = 2;

/// Result of a timeout-bounded push.
///
/// A timeout is a scheduling input (congestion signal), not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    /// The item was enqueued within the timeout.
    Accepted,
    /// The buffer stayed full for the whole timeout; the item was not
    /// enqueued and the caller still owns it.
    Timeout,
}

/// Result of a timeout-bounded pop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PopOutcome {
    /// A payload item, in FIFO order for this buffer.
    Item(u64),
    /// The poison token. `first_observer` is `true` for exactly one
    /// observation per buffer — the pop that transitioned it to Closed.
    Poison {
        /// Whether this pop performed the Draining → Closed transition.
        first_observer: bool,
    },
    /// The buffer stayed empty for the whole timeout.
    Timeout,
}

/// A capacity-limited FIFO shared by all clients that may address it.
///
/// Internally a bounded tokio mpsc channel; the receiver sits behind an
/// async mutex so multiple consumers can pop from the same buffer without
/// bypassing the FIFO.
///
/// # Panics
///
/// No methods on this type panic.
#[derive(Debug)]
pub struct BoundedBuffer {
    id: usize,
    capacity: usize,
    tx: mpsc::Sender<Item>,
    rx: Mutex<mpsc::Receiver<Item>>,
    state: AtomicU8,
    delivered: AtomicU64,
}

impl BoundedBuffer {
    /// Create a buffer with the given id and capacity.
    ///
    /// A zero capacity is clamped to one; configuration validation rejects
    /// it before a run ever gets here.
    pub fn new(id: usize, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            id,
            capacity,
            tx,
            rx: Mutex::new(rx),
            state: AtomicU8::new(STATE_OPEN),
            delivered: AtomicU64::new(0),
        }
    }

    /// This buffer's index in the routing table.
    pub fn id(&self) -> usize {
        self.id
    }

    /// Configured capacity bound.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Attempt to enqueue `item`, waiting at most `wait` for free space.
    pub async fn try_push(&self, item: Item, wait: Duration) -> PushOutcome {
        match timeout(wait, self.tx.send(item)).await {
            Ok(Ok(())) => PushOutcome::Accepted,
            // The receiver is owned by this buffer, so send can only fail
            // if the buffer itself is being torn down; report congestion.
            Ok(Err(_)) => PushOutcome::Timeout,
            Err(_) => PushOutcome::Timeout,
        }
    }

    /// Attempt to dequeue the next item, waiting at most `wait`.
    ///
    /// The timeout covers both acquiring the receiver (another consumer may
    /// hold it) and the dequeue itself.
    pub async fn try_pop(&self, wait: Duration) -> PopOutcome {
        let recv = async { self.rx.lock().await.recv().await };
        match timeout(wait, recv).await {
            Err(_) => PopOutcome::Timeout,
            // Unreachable while this buffer owns its sender.
            Ok(None) => PopOutcome::Timeout,
            Ok(Some(Item::Poison)) => PopOutcome::Poison {
                first_observer: self.close(),
            },
            Ok(Some(Item::Value(value))) => {
                self.delivered.fetch_add(1, Ordering::Relaxed);
                PopOutcome::Item(value)
            }
        }
    }

    /// Record that the poison token has been enqueued (Open → Draining).
    ///
    /// Called by the last producer after a successful poison push. A no-op
    /// if the buffer already left the Open state.
    pub fn mark_draining(&self) {
        let _ = self.state.compare_exchange(
            STATE_OPEN,
            STATE_DRAINING,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Transition to Closed; returns `true` for the one caller that won.
    fn close(&self) -> bool {
        self.state
            .compare_exchange(
                STATE_DRAINING,
                STATE_CLOSED,
                Ordering::SeqCst,
                Ordering::SeqCst,
            )
            .is_ok()
            || self
                .state
                .compare_exchange(STATE_OPEN, STATE_CLOSED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> BufferState {
        match self.state.load(Ordering::SeqCst) {
            STATE_DRAINING => BufferState::Draining,
            STATE_CLOSED => BufferState::Closed,
            _ => BufferState::Open,
        }
    }

    /// Return `true` once a consumer has observed this buffer's poison.
    pub fn is_closed(&self) -> bool {
        self.state.load(Ordering::SeqCst) == STATE_CLOSED
    }

    /// Number of payload items delivered through this buffer so far.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }
}

// ── Tests ──────────────────────────────────────────────────────────────
