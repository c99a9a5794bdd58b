//! HTTP scrape server.
//!
//! Serves the configured scrape endpoint (one collection cycle per request,
//! rendered as the Prometheus text exposition format) plus `/health`.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Router,
    extract::State,
    http::{StatusCode, header},
    response::IntoResponse,
    routing::get,
};

use crate::collector::{CycleOutcome, SnapshotCollector};
use crate::observability;

/// Content type of the Prometheus text exposition format.
const TEXT_FORMAT: &str = "text/plain; version=0.0.4";

/// Shared state for the scrape server.
#[derive(Clone)]
pub struct ScrapeServer {
    collector: Arc<SnapshotCollector>,
    clock: fn() -> chrono::DateTime<chrono::Utc>,
}

impl ScrapeServer {
    /// Create a scrape server around a collector.
    #[must_use]
    pub fn new(collector: Arc<SnapshotCollector>) -> Self {
        Self {
            collector,
            clock: chrono::Utc::now,
        }
    }

    /// Pin the cycle clock. Test hook for the non-trading-day guard.
    #[must_use]
    pub fn with_clock(mut self, clock: fn() -> chrono::DateTime<chrono::Utc>) -> Self {
        self.clock = clock;
        self
    }
}

/// Create the Axum router with the scrape endpoint mounted at `endpoint`.
#[must_use]
pub fn create_router(server: ScrapeServer, endpoint: &str) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(endpoint, get(scrape))
        .with_state(server)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

/// Scrape endpoint: run one cycle, render fresh samples.
///
/// A skipped or degraded cycle renders fewer samples; stale values are never
/// served.
async fn scrape(State(server): State<ScrapeServer>) -> impl IntoResponse {
    let started = Instant::now();
    let result = server.collector.collect_at((server.clock)()).await;

    let status = match result.outcome {
        CycleOutcome::SkippedNonTradingDay => "skipped",
        CycleOutcome::Completed { failed: 0, .. } => "ok",
        CycleOutcome::Completed { .. } => "degraded",
    };
    observability::record_scrape(status, started.elapsed());

    let descriptors = server.collector.descriptors();
    let samples: Vec<_> = result
        .snapshots
        .iter()
        .flat_map(|snapshot| descriptors.snapshot_samples(snapshot))
        .collect();
    let body = descriptors.render(&samples);

    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, TEXT_FORMAT)],
        body,
    )
}
