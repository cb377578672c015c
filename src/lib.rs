//! # tokio-weighted-balancer
//!
//! An adaptive weighted load-balancing layer over Tokio: producers route
//! work items into bounded buffers chosen by weighted random selection,
//! consumers drain them the same way, and per-role coordinators blend
//! congestion feedback into authoritative weight tables.
//!
//! ## Architecture
//!
//! ```text
//!               refresh/terminate            refresh/terminate
//! Producers ──────────────────▶ Producer     Consumer ◀────────────────── Consumers
//!    │                        Coordinator   Coordinator                        ▲
//!    │  weighted push                │           │             weighted pop   │
//!    ▼                        weight table  weight table                      │
//! BoundedBuffer[0..n] ────────────────────────────────────────────────────────┘
//! ```
//!
//! Every buffer operation is timeout-bounded; timeouts feed back into the
//! weight tables as congestion signals. The last producer to exit floods
//! every buffer with a poison token so consumers terminate deterministically.

// ── Lint policy (aerospace-grade) ─────────────────────────────────────────
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::todo)]
#![deny(missing_docs)]

use thiserror::Error;
use tracing_subscriber::EnvFilter;

pub mod buffer;
pub mod config;
pub mod consumer;
pub mod coordinator;
pub mod counters;
pub mod metrics;
pub mod producer;
pub mod runner;
pub mod weights;

// Re-exports for convenience
pub use buffer::{BoundedBuffer, BufferState, Item, PopOutcome, PushOutcome};
pub use config::BalancerConfig;
pub use consumer::{Consumer, ConsumerStats};
pub use coordinator::{ClientRequest, CoordinatorStats, Observation, Role, RoleCoordinator};
pub use counters::ProgressCounters;
pub use producer::{Producer, ProducerStats};
pub use runner::{run, RunResult};
pub use weights::WeightTable;

/// Initialise the global tracing subscriber.
///
/// Reads the `LOG_FORMAT` environment variable to choose output format:
/// - `"json"` — structured JSON output for production log aggregators
///   (Datadog, Grafana Loki, etc.)
/// - anything else (including unset) — human-readable pretty output
///   for local development
///
/// Filter level is controlled by `RUST_LOG` (e.g. `RUST_LOG=info`).
///
/// # Errors
///
/// Returns [`BalancerError::Other`] if the global subscriber has already
/// been set (e.g. by a previous call or a test harness).
///
/// # Panics
///
/// This function never panics.
///
/// # Example
///
/// ```no_run
/// # use tokio_weighted_balancer::{init_tracing, BalancerError};
/// # fn example() -> Result<(), BalancerError> {
/// init_tracing()?;
/// # Ok(()) }
/// ```
pub fn init_tracing() -> Result<(), BalancerError> {
    let format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let result = match format.as_str() {
        "json" => tracing_subscriber::fmt()
            .json()
            .with_env_filter(EnvFilter::from_default_env())
            .with_current_span(true)
            .with_span_list(true)
            .try_init(),
        _ => tracing_subscriber::fmt()
            .pretty()
            .with_env_filter(EnvFilter::from_default_env())
            .try_init(),
    };

    result.map_err(|e| BalancerError::Other(format!("tracing init failed: {e}")))
}

/// Top-level balancer errors.
///
/// Every error surface in the balancer is mapped to a variant here.
/// All variants implement `std::error::Error` via [`thiserror`].
///
/// Buffer timeouts and coordinator reply timeouts are deliberately *not*
/// errors — they are scheduling inputs handled inside the client loops.
#[derive(Error, Debug)]
pub enum BalancerError {
    /// A configuration value is out of bounds. Returned before any task is
    /// spawned so misconfiguration surfaces immediately.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// A configuration file could not be read or parsed.
    #[error("config file error: {0}")]
    ConfigFile(String),

    /// Catch-all for errors that do not fit a specific variant.
    #[error("{0}")]
    Other(String),
}

/// Why a producer or consumer loop ended.
///
/// Recorded in per-client stats and logged at exit; never an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// A producer found the shared claim counter exhausted.
    ClaimExhausted,
    /// A consumer saw every buffer reach the Closed state.
    AllBuffersDead,
    /// A consumer observed the global consumed count reach the target.
    TargetReached,
    /// The cooperative stop flag was set (deadline or external shutdown).
    Cancelled,
}

impl ExitReason {
    /// Stable label for logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClaimExhausted => "claim_exhausted",
            Self::AllBuffersDead => "all_buffers_dead",
            Self::TargetReached => "target_reached",
            Self::Cancelled => "cancelled",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_config_display_includes_message() {
        let err = BalancerError::InvalidConfig("num_buffers must be >= 1".to_string());
        assert!(err.to_string().contains("num_buffers must be >= 1"));
        assert!(err.to_string().starts_with("invalid config"));
    }

    #[test]
    fn test_config_file_display_includes_path() {
        let err = BalancerError::ConfigFile("/tmp/missing.toml: not found".to_string());
        assert!(err.to_string().contains("/tmp/missing.toml"));
    }

    #[test]
    fn test_exit_reason_labels_are_distinct() {
        let reasons = [
            ExitReason::ClaimExhausted,
            ExitReason::AllBuffersDead,
            ExitReason::TargetReached,
            ExitReason::Cancelled,
        ];
        let labels: std::collections::HashSet<_> =
            reasons.iter().map(|r| r.as_str()).collect();
        assert_eq!(labels.len(), reasons.len());
    }

    #[test]
    fn test_init_tracing_second_call_returns_err() {
        // First call may succeed or fail depending on test execution order
        // (another test may have already installed a subscriber).
        let _ = init_tracing();
        // Second call must not panic — it should return Err.
        let result = init_tracing();
        assert!(result.is_err(), "double init must return Err, not panic");
    }
}
