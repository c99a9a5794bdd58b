//! Portfolio Exporter Binary
//!
//! Starts the portfolio metrics exporter.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin portfolio-exporter -- [config.yaml]
//! ```
//!
//! # Environment Variables
//!
//! - `TINKOFF_TOKEN`: Broker API token (referenced from config.yaml)
//! - `RUST_LOG`: Log level (default: info)

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use portfolio_exporter::collector::SnapshotCollector;
use portfolio_exporter::config::{self, Config};
use portfolio_exporter::gateway::{LookupGateway, TinkoffGateway};
use portfolio_exporter::observability;
use portfolio_exporter::server::{ScrapeServer, create_router};
use tokio::net::TcpListener;
use tokio::signal;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    init_tracing();

    tracing::info!("Starting portfolio exporter");

    let config_path = std::env::args().nth(1);
    let config = config::load_config(config_path.as_deref())
        .context("failed to load configuration")?;
    validate_token(&config)?;
    log_config(&config);

    let gateway: Arc<dyn LookupGateway> = Arc::new(
        TinkoffGateway::new(&config.broker).context("failed to build broker gateway")?,
    );

    // Accounts are discovered once and stay fixed for the process lifetime;
    // an unreachable broker at startup is fatal.
    let accounts = gateway
        .accounts()
        .await
        .context("failed to discover brokerage accounts")?;
    if accounts.is_empty() {
        anyhow::bail!("the broker token has no visible accounts");
    }
    for account in &accounts {
        tracing::info!(account = %account.kind, id = %account.id, "tracking account");
    }

    observability::init_metrics(config.server.metrics_port)
        .context("failed to start self-metrics listener")?;

    let collector = Arc::new(SnapshotCollector::new(gateway, &config, accounts));
    start_http_server(&config, collector).await?;

    tracing::info!("Portfolio exporter stopped");
    Ok(())
}

/// Load .env from the current directory, if present.
fn load_dotenv() {
    let _ = dotenvy::dotenv();
}

/// Initialize the tracing subscriber with environment filter.
///
/// Uses static directive strings that are compile-time constants guaranteed to parse.
#[allow(clippy::expect_used)]
fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(
                "portfolio_exporter=info"
                    .parse()
                    .expect("static directive 'portfolio_exporter=info' is valid"),
            ),
        )
        .init();
}

/// Refuse to start with a missing or placeholder token.
fn validate_token(config: &Config) -> anyhow::Result<()> {
    if config.broker.token.is_empty() || config.broker.token == config::TOKEN_PLACEHOLDER {
        anyhow::bail!(
            "broker.token is not set; put the API token in config.yaml or export TINKOFF_TOKEN"
        );
    }
    Ok(())
}

/// Log the loaded configuration, secrets excluded.
fn log_config(config: &Config) {
    tracing::info!(
        port = config.server.port,
        endpoint = %config.server.endpoint,
        metrics_port = config.server.metrics_port,
        base_url = %config.broker.base_url,
        timeout_secs = config.broker.timeout_secs,
        base_currency = %config.valuation.base_currency,
        watchlist = config.tickers.len(),
        "Configuration loaded"
    );
}

/// Serve the scrape endpoint until a shutdown signal arrives.
async fn start_http_server(
    config: &Config,
    collector: Arc<SnapshotCollector>,
) -> anyhow::Result<()> {
    let app = create_router(ScrapeServer::new(collector), &config.server.endpoint);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!(%addr, endpoint = %config.server.endpoint, "HTTP server starting");

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
///
/// # Panics
///
/// Panics if signal handlers cannot be installed; a process that cannot
/// respond to termination signals should fail fast at startup.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }
}
