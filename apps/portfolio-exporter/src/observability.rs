//! Operational self-metrics for the exporter process.
//!
//! These describe the exporter itself (cycle outcomes, durations, gateway
//! failures, scrapes served), not the portfolio. They live on their own
//! listener so the scrape endpoint stays a pure portfolio view.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::collector::CycleOutcome;

/// Error type for metrics operations.
#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    /// Failed to install metrics exporter.
    #[error("metrics installation error: {0}")]
    Installation(String),
}

/// Initialize the self-metrics exporter on `port`.
///
/// A port of 0 disables the listener; recording calls become no-ops.
///
/// # Errors
///
/// Returns an error if the listener fails to start (e.g., port already in
/// use).
pub fn init_metrics(port: u16) -> Result<(), MetricsError> {
    if port == 0 {
        tracing::info!("self-metrics listener disabled");
        return Ok(());
    }

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Installation(e.to_string()))?;

    tracing::info!(%addr, "self-metrics listener started");
    Ok(())
}

/// Record the outcome and duration of one collection cycle.
pub fn record_cycle(outcome: &CycleOutcome, elapsed: Duration) {
    let result = match outcome {
        CycleOutcome::SkippedNonTradingDay => "skipped_non_trading_day",
        CycleOutcome::Completed { failed: 0, .. } => "completed",
        CycleOutcome::Completed { .. } => "completed_degraded",
    };

    counter!(
        "exporter_cycles_total",
        "result" => result
    )
    .increment(1);

    histogram!("exporter_cycle_duration_seconds").record(elapsed.as_secs_f64());

    if let CycleOutcome::Completed { failed, .. } = outcome {
        let failed = u64::try_from(*failed).unwrap_or(u64::MAX);
        counter!("exporter_account_failures_total").increment(failed);
    }
}

/// Record a gateway failure by error kind.
///
/// # Arguments
///
/// * `kind` - Stable error label (e.g., "transient", `"not_found"`)
pub fn record_gateway_error(kind: &'static str) {
    counter!(
        "exporter_gateway_errors_total",
        "kind" => kind
    )
    .increment(1);
}

/// Record one served scrape.
///
/// # Arguments
///
/// * `status` - Scrape result (e.g., "ok", "skipped")
pub fn record_scrape(status: &'static str, elapsed: Duration) {
    counter!(
        "exporter_scrapes_total",
        "status" => status
    )
    .increment(1);

    histogram!("exporter_scrape_duration_seconds").record(elapsed.as_secs_f64());
}

// ============================================================================
// Tests
// ============================================================================
