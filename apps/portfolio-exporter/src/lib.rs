//! Portfolio metrics exporter.
//!
//! A pull-model Prometheus exporter for brokerage portfolios: every scrape
//! runs one collection cycle that fetches per-account portfolio state and
//! operation history from the broker API, values the holdings concurrently,
//! computes the money-weighted return (XIRR), and renders fresh gauge
//! samples. Nothing is cached between scrapes; a degraded cycle emits fewer
//! samples rather than stale ones.
//!
//! Module map:
//! - [`models`] - domain types shared across the exporter
//! - [`xirr`] - the cash-flow rate-of-return solver
//! - [`gateway`] - broker lookup abstraction and the REST implementation
//! - [`valuation`] - per-account valuation with bounded fan-out
//! - [`collector`] - the per-scrape collection cycle
//! - [`exposition`] - metric descriptors and text rendering
//! - [`server`] - the axum scrape server
//! - [`config`] - YAML configuration with env interpolation
//! - [`observability`] - operational self-metrics

pub mod collector;
pub mod config;
pub mod exposition;
pub mod gateway;
pub mod models;
pub mod observability;
pub mod server;
pub mod valuation;
pub mod xirr;
