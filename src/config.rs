//! # BalancerConfig — run configuration
//!
//! ## Responsibility
//! Define the static configuration for one balancer run: topology counts,
//! workload size, timeout/interval knobs, and verbosity.
//!
//! ## Guarantees
//! - Validated: all fields are bounds-checked before any task is spawned
//! - Defaulted: every field has a sensible default
//! - Serializable: round-trips through serde (TOML ↔ Rust)
//!
//! ## NOT Responsible For
//! - Runtime wiring (see: runner.rs)
//! - Weight-update constants — those are fixed protocol parameters
//!   (see: weights.rs)

use crate::BalancerError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for one balancer run.
///
/// # Fields
///
/// * `num_producers` — producer task count (default: 2)
/// * `num_consumers` — consumer task count (default: 2)
/// * `num_buffers` — bounded buffer count (default: 4)
/// * `buffer_capacity` — per-buffer FIFO capacity (default: 64)
/// * `total_items` — items to route end to end (default: 1000)
/// * `max_runtime_ms` — optional wall-clock deadline that trips the
///   cooperative stop flag (default: none)
/// * `refresh_interval` — client iterations between coordinator syncs
///   (default: 10)
/// * `push_timeout_ms` / `pop_timeout_ms` — buffer operation bounds
///   (default: 50)
/// * `coordinator_timeout_ms` — client wait for a weight snapshot
///   (default: 100)
/// * `liveness_interval_ms` — coordinator bounded-recv interval for its
///   lost-termination re-check (default: 1000)
/// * `verbose` — enable per-item trace logging (default: false)
///
/// # Example
///
/// ```rust
/// use tokio_weighted_balancer::BalancerConfig;
/// let config = BalancerConfig::default();
/// assert_eq!(config.num_buffers, 4);
/// assert!(config.validate().is_ok());
/// ```
///
/// # Panics
///
/// No methods on this type panic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalancerConfig {
    /// Number of producer tasks.
    #[serde(default = "default_num_producers")]
    pub num_producers: usize,

    /// Number of consumer tasks.
    #[serde(default = "default_num_consumers")]
    pub num_consumers: usize,

    /// Number of bounded buffers to route across.
    #[serde(default = "default_num_buffers")]
    pub num_buffers: usize,

    /// FIFO capacity of each buffer.
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,

    /// Total number of items to claim, route, and consume.
    #[serde(default = "default_total_items")]
    pub total_items: u64,

    /// Optional wall-clock deadline in milliseconds. When it elapses the
    /// cooperative stop flag is set and every loop exits within one
    /// bounded-timeout cycle.
    #[serde(default)]
    pub max_runtime_ms: Option<u64>,

    /// Client loop iterations between coordinator weight refreshes.
    #[serde(default = "default_refresh_interval")]
    pub refresh_interval: u64,

    /// Bound on a single buffer push, in milliseconds.
    #[serde(default = "default_push_timeout_ms")]
    pub push_timeout_ms: u64,

    /// Bound on a single buffer pop, in milliseconds.
    #[serde(default = "default_pop_timeout_ms")]
    pub pop_timeout_ms: u64,

    /// Bound on a client's wait for a coordinator reply, in milliseconds.
    #[serde(default = "default_coordinator_timeout_ms")]
    pub coordinator_timeout_ms: u64,

    /// Coordinator bounded-recv interval for its liveness re-check, in
    /// milliseconds.
    #[serde(default = "default_liveness_interval_ms")]
    pub liveness_interval_ms: u64,

    /// Enable per-item trace logging.
    #[serde(default)]
    pub verbose: bool,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            num_producers: default_num_producers(),
            num_consumers: default_num_consumers(),
            num_buffers: default_num_buffers(),
            buffer_capacity: default_buffer_capacity(),
            total_items: default_total_items(),
            max_runtime_ms: None,
            refresh_interval: default_refresh_interval(),
            push_timeout_ms: default_push_timeout_ms(),
            pop_timeout_ms: default_pop_timeout_ms(),
            coordinator_timeout_ms: default_coordinator_timeout_ms(),
            liveness_interval_ms: default_liveness_interval_ms(),
            verbose: false,
        }
    }
}

impl BalancerConfig {
    /// Validate the configuration, collecting every violation.
    ///
    /// # Returns
    ///
    /// - `Ok(())` if all fields are valid
    /// - `Err(BalancerError::InvalidConfig)` with concatenated messages
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn validate(&self) -> Result<(), BalancerError> {
        let mut errors = Vec::new();

        if self.num_producers == 0 {
            errors.push("num_producers must be >= 1".to_string());
        }
        if self.num_consumers == 0 {
            errors.push("num_consumers must be >= 1".to_string());
        }
        if self.num_buffers == 0 {
            errors.push("num_buffers must be >= 1".to_string());
        }
        if self.buffer_capacity == 0 {
            errors.push("buffer_capacity must be >= 1".to_string());
        }
        if self.total_items == 0 {
            errors.push("total_items must be >= 1".to_string());
        }
        if self.refresh_interval == 0 {
            errors.push("refresh_interval must be >= 1".to_string());
        }
        if self.push_timeout_ms == 0 {
            errors.push("push_timeout_ms must be > 0".to_string());
        }
        if self.pop_timeout_ms == 0 {
            errors.push("pop_timeout_ms must be > 0".to_string());
        }
        if self.coordinator_timeout_ms == 0 {
            errors.push("coordinator_timeout_ms must be > 0".to_string());
        }
        if self.liveness_interval_ms == 0 {
            errors.push("liveness_interval_ms must be > 0".to_string());
        }
        if self.max_runtime_ms == Some(0) {
            errors.push("max_runtime_ms must be > 0 when set".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(BalancerError::InvalidConfig(errors.join("; ")))
        }
    }

    /// Load a configuration from a TOML file, applying field defaults for
    /// anything the file omits.
    ///
    /// # Errors
    ///
    /// Returns [`BalancerError::ConfigFile`] if the file cannot be read or
    /// parsed.
    ///
    /// # Panics
    ///
    /// This function never panics.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, BalancerError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| BalancerError::ConfigFile(format!("{}: {e}", path.display())))?;
        toml::from_str(&raw)
            .map_err(|e| BalancerError::ConfigFile(format!("{}: {e}", path.display())))
    }

    /// Push timeout as a [`Duration`].
    pub fn push_timeout(&self) -> Duration {
        Duration::from_millis(self.push_timeout_ms)
    }

    /// Pop timeout as a [`Duration`].
    pub fn pop_timeout(&self) -> Duration {
        Duration::from_millis(self.pop_timeout_ms)
    }

    /// Coordinator reply timeout as a [`Duration`].
    pub fn coordinator_timeout(&self) -> Duration {
        Duration::from_millis(self.coordinator_timeout_ms)
    }

    /// Coordinator liveness-check interval as a [`Duration`].
    pub fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    /// Wall-clock deadline as a [`Duration`], if configured.
    pub fn max_runtime(&self) -> Option<Duration> {
        self.max_runtime_ms.map(Duration::from_millis)
    }
}

/// Default producer count: 2.
fn default_num_producers() -> usize {
    2
}

/// Default consumer count: 2.
fn default_num_consumers() -> usize {
    2
}

/// Default buffer count: 4.
fn default_num_buffers() -> usize {
    4
}

/// Default per-buffer capacity: 64.
fn default_buffer_capacity() -> usize {
    64
}

/// Default workload: 1000 items.
fn default_total_items() -> u64 {
    1_000
}

/// Default refresh cadence: every 10 iterations.
fn default_refresh_interval() -> u64 {
    10
}

/// Default push bound: 50 ms.
fn default_push_timeout_ms() -> u64 {
    50
}

/// Default pop bound: 50 ms.
fn default_pop_timeout_ms() -> u64 {
    50
}

/// Default coordinator reply bound: 100 ms.
fn default_coordinator_timeout_ms() -> u64 {
    100
}

/// Default coordinator liveness interval: 1 s.
fn default_liveness_interval_ms() -> u64 {
    1_000
}

// ── Tests ──────────────────────────────────────────────────────────────
