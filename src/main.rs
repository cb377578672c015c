//! Demo binary for tokio-weighted-balancer
//!
//! Runs one balancer pass and prints the routing summary.
//!
//! ## Usage
//!
//! ```text
//! tokio-weighted-balancer [config.toml]
//! ```
//!
//! With no argument the default configuration is used (2 producers,
//! 2 consumers, 4 buffers, 1000 items).
//!
//! ## Environment Variables
//!
//! - `LOG_FORMAT=json` — structured JSON output (production)
//! - `RUST_LOG=info` — log level filter (default: info)

use tokio_weighted_balancer::{init_tracing, metrics, run, BalancerConfig};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize structured tracing (JSON or pretty, based on LOG_FORMAT env)
    let _ = init_tracing();

    // Initialize Prometheus metrics registry before any task runs.
    metrics::init_metrics()?;

    let config = match std::env::args().nth(1) {
        Some(path) => {
            info!(path = %path, "loading configuration");
            BalancerConfig::load(&path)?
        }
        None => BalancerConfig::default(),
    };

    let result = run(config).await?;

    info!(
        produced = result.items_produced,
        consumed = result.items_consumed,
        elapsed_ms = result.elapsed.as_millis() as u64,
        "balancer run complete"
    );
    for (buffer, delivered) in result.per_buffer.iter().enumerate() {
        let share = if result.items_consumed > 0 {
            *delivered as f64 / result.items_consumed as f64 * 100.0
        } else {
            0.0
        };
        info!(buffer, delivered, share = format!("{share:.1}%"), "buffer throughput");
    }
    for p in &result.producers {
        info!(
            producer = p.id,
            pushed = p.items_pushed,
            timeouts = p.push_timeouts,
            refreshes = p.refreshes,
            stale = p.stale_refreshes,
            exit = p.exit.as_str(),
            "producer summary"
        );
    }
    for c in &result.consumers {
        info!(
            consumer = c.id,
            popped = c.items_popped,
            timeouts = c.pop_timeouts,
            poisons = c.poisons_observed,
            exit = c.exit.as_str(),
            "consumer summary"
        );
    }
    info!(
        refreshes = result.producer_coordinator.refreshes,
        terminations = result.producer_coordinator.terminations,
        "producer coordinator summary"
    );
    info!(
        refreshes = result.consumer_coordinator.refreshes,
        terminations = result.consumer_coordinator.terminations,
        "consumer coordinator summary"
    );

    Ok(())
}
