//! Lookup gateway abstraction over the broker data source.
//!
//! The collector and the valuation fan-out only ever see this trait; the
//! REST implementation lives in [`tinkoff`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;

use crate::models::{Account, Instrument, Operation, Portfolio};

pub mod api_types;
pub mod tinkoff;

pub use tinkoff::TinkoffGateway;

/// Errors surfaced by gateway lookups.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Timeout, connection failure or broker-side 5xx. The next scrape is
    /// the retry; no call is retried within a cycle.
    #[error("transient gateway failure: {message}")]
    Transient {
        /// What failed.
        message: String,
    },

    /// The requested entity does not exist upstream.
    #[error("not found: {what}")]
    NotFound {
        /// Identifier that failed to resolve.
        what: String,
    },

    /// A ticker search returned more than one instrument.
    #[error("ticker {ticker:?} is ambiguous: {matches} instruments matched")]
    AmbiguousTicker {
        /// The searched ticker.
        ticker: String,
        /// Number of instruments returned.
        matches: usize,
    },

    /// The broker rejected the credentials.
    #[error("broker rejected the access token")]
    Unauthorized,

    /// A well-formed broker error response.
    #[error("broker API error {code}: {message}")]
    Api {
        /// Broker error code.
        code: String,
        /// Broker error message.
        message: String,
    },

    /// The response body did not match the expected shape.
    #[error("failed to decode broker response: {message}")]
    Decode {
        /// Decoding failure detail.
        message: String,
    },
}

impl GatewayError {
    /// Whether a later scrape may succeed without operator intervention.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Stable label value for the gateway error counter.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Transient { .. } => "transient",
            Self::NotFound { .. } => "not_found",
            Self::AmbiguousTicker { .. } => "ambiguous_ticker",
            Self::Unauthorized => "unauthorized",
            Self::Api { .. } => "api",
            Self::Decode { .. } => "decode",
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::Decode {
                message: err.to_string(),
            }
        } else {
            // Timeouts, DNS failures, closed connections.
            Self::Transient {
                message: err.to_string(),
            }
        }
    }
}

/// Read-only view of the broker used by one collection cycle.
///
/// Every call is bounded by the client timeout configured at construction.
#[async_trait]
pub trait LookupGateway: Send + Sync {
    /// List the brokerage accounts visible to the token.
    async fn accounts(&self) -> Result<Vec<Account>, GatewayError>;

    /// Fetch holdings and currency balances for one account.
    async fn portfolio(&self, account_id: &str) -> Result<Portfolio, GatewayError>;

    /// Last traded price for an instrument.
    async fn last_price(&self, figi: &str) -> Result<Decimal, GatewayError>;

    /// Resolve a ticker to exactly one instrument.
    async fn resolve_ticker(&self, ticker: &str) -> Result<Instrument, GatewayError>;

    /// Account operations in `[from, to]`, order unspecified.
    async fn operations(
        &self,
        account_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Operation>, GatewayError>;
}
