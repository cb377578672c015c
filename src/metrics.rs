//! Prometheus metrics for the balancer.
//!
//! ## Usage
//!
//! Call [`init_metrics`] once at process startup **before** a run starts.
//! The helper functions (`inc_produced`, `observe_wait`, …) are no-ops if
//! `init_metrics` was never called, so the balancer is always safe to run —
//! observability simply degrades gracefully.
//!
//! ## Metrics Exposed
//!
//! | Name | Type | Labels |
//! |------|------|--------|
//! | `balancer_items_produced_total` | Counter | `buffer` |
//! | `balancer_items_consumed_total` | Counter | `buffer` |
//! | `balancer_buffer_timeouts_total` | Counter | `op`, `buffer` |
//! | `balancer_refreshes_total` | Counter | `role`, `outcome` |
//! | `balancer_op_wait_seconds` | Histogram | `op` |

use crate::BalancerError;
use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::OnceLock;
use std::time::Duration;

// ── Internal metrics bundle ────────────────────────────────────────────────

/// All Prometheus metrics for the balancer, bundled together so they can be
/// stored in a single [`OnceLock`] and initialised atomically.
pub struct Metrics {
    /// Prometheus registry that owns all metric descriptors.
    pub registry: Registry,
    /// Items pushed per buffer.
    pub items_produced: CounterVec,
    /// Items popped per buffer.
    pub items_consumed: CounterVec,
    /// Push/pop timeouts per buffer.
    pub buffer_timeouts: CounterVec,
    /// Weight refreshes by role and outcome (`fresh` or `stale`).
    pub refreshes: CounterVec,
    /// Buffer operation latency histogram.
    pub op_wait: HistogramVec,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

// ── Initialisation ─────────────────────────────────────────────────────────

/// Initialise all Prometheus metrics against a private registry.
///
/// Must be called once at process startup before a run begins. Calling it a
/// second time is a no-op (returns `Ok(())`).
///
/// # Errors
///
/// Returns [`BalancerError::Other`] if metric construction or registration
/// fails (e.g., duplicate descriptor names).
///
/// # Panics
///
/// This function never panics.
pub fn init_metrics() -> Result<(), BalancerError> {
    if METRICS.get().is_some() {
        return Ok(());
    }

    let registry = Registry::new();

    let items_produced = CounterVec::new(
        Opts::new("balancer_items_produced_total", "Items pushed per buffer"),
        &["buffer"],
    )
    .map_err(|e| BalancerError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(items_produced.clone()))
        .map_err(|e| BalancerError::Other(format!("metrics registration failed: {e}")))?;

    let items_consumed = CounterVec::new(
        Opts::new("balancer_items_consumed_total", "Items popped per buffer"),
        &["buffer"],
    )
    .map_err(|e| BalancerError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(items_consumed.clone()))
        .map_err(|e| BalancerError::Other(format!("metrics registration failed: {e}")))?;

    let buffer_timeouts = CounterVec::new(
        Opts::new(
            "balancer_buffer_timeouts_total",
            "Push/pop timeouts per buffer",
        ),
        &["op", "buffer"],
    )
    .map_err(|e| BalancerError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(buffer_timeouts.clone()))
        .map_err(|e| BalancerError::Other(format!("metrics registration failed: {e}")))?;

    let refreshes = CounterVec::new(
        Opts::new(
            "balancer_refreshes_total",
            "Weight refreshes by role and outcome",
        ),
        &["role", "outcome"],
    )
    .map_err(|e| BalancerError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(refreshes.clone()))
        .map_err(|e| BalancerError::Other(format!("metrics registration failed: {e}")))?;

    let op_wait = HistogramVec::new(
        HistogramOpts::new("balancer_op_wait_seconds", "Buffer operation latency"),
        &["op"],
    )
    .map_err(|e| BalancerError::Other(format!("metrics init failed: {e}")))?;
    registry
        .register(Box::new(op_wait.clone()))
        .map_err(|e| BalancerError::Other(format!("metrics registration failed: {e}")))?;

    // If another thread raced us, the first initialisation wins; both
    // produce identical descriptors so neither outcome is wrong.
    let _ = METRICS.set(Metrics {
        registry,
        items_produced,
        items_consumed,
        buffer_timeouts,
        refreshes,
        op_wait,
    });

    Ok(())
}

/// Return the initialised [`Metrics`], or `None` before [`init_metrics`].
fn metrics() -> Option<&'static Metrics> {
    METRICS.get()
}

// ── Public helper functions ────────────────────────────────────────────────

/// Count one item pushed into `buffer`. No-op before init.
///
/// # Panics
///
/// This function never panics.
pub fn inc_produced(buffer: usize) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .items_produced
            .get_metric_with_label_values(&[&buffer.to_string()])
        {
            c.inc();
        }
    }
}

/// Count one item popped from `buffer`. No-op before init.
///
/// # Panics
///
/// This function never panics.
pub fn inc_consumed(buffer: usize) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .items_consumed
            .get_metric_with_label_values(&[&buffer.to_string()])
        {
            c.inc();
        }
    }
}

/// Count one push/pop timeout on `buffer`. `op` is `"push"` or `"pop"`.
/// No-op before init.
///
/// # Panics
///
/// This function never panics.
pub fn inc_timeout(op: &str, buffer: usize) {
    if let Some(m) = metrics() {
        if let Ok(c) = m
            .buffer_timeouts
            .get_metric_with_label_values(&[op, &buffer.to_string()])
        {
            c.inc();
        }
    }
}

/// Count one weight refresh. `outcome` is `"fresh"` (snapshot applied) or
/// `"stale"` (reply timed out, client kept its table). No-op before init.
///
/// # Panics
///
/// This function never panics.
pub fn inc_refresh(role: &str, outcome: &str) {
    if let Some(m) = metrics() {
        if let Ok(c) = m.refreshes.get_metric_with_label_values(&[role, outcome]) {
            c.inc();
        }
    }
}

/// Record the latency of one buffer operation. No-op before init.
///
/// # Panics
///
/// This function never panics.
pub fn observe_wait(op: &str, d: Duration) {
    if let Some(m) = metrics() {
        if let Ok(h) = m.op_wait.get_metric_with_label_values(&[op]) {
            h.observe(d.as_secs_f64());
        }
    }
}

/// Gather and encode all metrics in the Prometheus text exposition format.
///
/// Returns an empty string before init or if encoding fails.
///
/// # Panics
///
/// This function never panics.
pub fn gather_metrics() -> String {
    let Some(m) = metrics() else {
        return String::new();
    };
    let families = m.registry.gather();
    if families.is_empty() {
        return String::new();
    }
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if encoder.encode(&families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

// ── Tests ──────────────────────────────────────────────────────────────────
