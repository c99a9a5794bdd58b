//! Tinkoff Invest OpenAPI REST gateway.
//!
//! A thin transport: bearer auth, one fixed timeout for every call, status
//! mapping into [`GatewayError`]. Calls are never retried inside a cycle.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::{Client, StatusCode};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;

use super::api_types::{
    AccountsPayload, CurrenciesPayload, Envelope, ErrorPayload, OperationsPayload,
    OrderbookPayload, PortfolioPayload, SearchPayload,
};
use super::{GatewayError, LookupGateway};
use crate::config::BrokerConfig;
use crate::models::{Account, CurrencyBalance, Instrument, Operation, Portfolio, Position};

/// REST client for the Tinkoff Invest OpenAPI.
#[derive(Clone)]
pub struct TinkoffGateway {
    client: Client,
    base_url: String,
    token: String,
}

impl std::fmt::Debug for TinkoffGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TinkoffGateway")
            .field("base_url", &self.base_url)
            .field("token", &"[REDACTED]")
            .finish_non_exhaustive()
    }
}

impl TinkoffGateway {
    /// Build a gateway from broker configuration.
    pub fn new(config: &BrokerConfig) -> Result<Self, GatewayError> {
        if config.token.is_empty() {
            return Err(GatewayError::Unauthorized);
        }

        let client = Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(GatewayError::from)?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            token: config.token.clone(),
        })
    }

    async fn get_payload<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, GatewayError> {
        let url = format!("{}{path}", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(query)
            .bearer_auth(&self.token)
            .send()
            .await?;

        let status = response.status();
        let text = response.text().await?;

        if status.is_success() {
            let envelope: Envelope<T> =
                serde_json::from_str(&text).map_err(|e| GatewayError::Decode {
                    message: format!("{path}: {e}"),
                })?;
            return Ok(envelope.payload);
        }

        Err(Self::map_error(status, &text))
    }

    fn map_error(status: StatusCode, body: &str) -> GatewayError {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return GatewayError::Unauthorized;
        }
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return GatewayError::Transient {
                message: format!("broker returned {status}"),
            };
        }

        // 4xx with a structured error envelope where available.
        match serde_json::from_str::<Envelope<ErrorPayload>>(body) {
            Ok(envelope) => GatewayError::Api {
                code: envelope.payload.code,
                message: envelope.payload.message,
            },
            Err(_) => GatewayError::Api {
                code: status.as_u16().to_string(),
                message: body.chars().take(200).collect(),
            },
        }
    }
}

fn rfc3339(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[async_trait]
impl LookupGateway for TinkoffGateway {
    async fn accounts(&self) -> Result<Vec<Account>, GatewayError> {
        let payload: AccountsPayload = self.get_payload("/user/accounts", &[]).await?;
        Ok(payload.accounts.into_iter().map(Account::from).collect())
    }

    async fn portfolio(&self, account_id: &str) -> Result<Portfolio, GatewayError> {
        let account_query = [("brokerAccountId", account_id.to_string())];
        let (positions, currencies) = tokio::join!(
            self.get_payload::<PortfolioPayload>("/portfolio", &account_query),
            self.get_payload::<CurrenciesPayload>("/portfolio/currencies", &account_query),
        );

        let positions = positions?
            .positions
            .into_iter()
            .map(Position::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let currencies = currencies?
            .currencies
            .into_iter()
            .map(CurrencyBalance::try_from)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Portfolio {
            positions,
            currencies,
        })
    }

    async fn last_price(&self, figi: &str) -> Result<Decimal, GatewayError> {
        let payload: OrderbookPayload = self
            .get_payload(
                "/market/orderbook",
                &[("figi", figi.to_string()), ("depth", "1".to_string())],
            )
            .await?;

        payload.last_price.ok_or_else(|| GatewayError::NotFound {
            what: format!("last price for {figi}"),
        })
    }

    async fn resolve_ticker(&self, ticker: &str) -> Result<Instrument, GatewayError> {
        let payload: SearchPayload = self
            .get_payload(
                "/market/search/by-ticker",
                &[("ticker", ticker.to_string())],
            )
            .await?;

        let mut instruments = payload.instruments;
        match instruments.len() {
            0 => Err(GatewayError::NotFound {
                what: format!("instrument for ticker {ticker:?}"),
            }),
            1 => Instrument::try_from(instruments.remove(0)),
            matches => Err(GatewayError::AmbiguousTicker {
                ticker: ticker.to_string(),
                matches,
            }),
        }
    }

    async fn operations(
        &self,
        account_id: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Operation>, GatewayError> {
        let payload: OperationsPayload = self
            .get_payload(
                "/operations",
                &[
                    ("from", rfc3339(from)),
                    ("to", rfc3339(to)),
                    ("brokerAccountId", account_id.to_string()),
                ],
            )
            .await?;

        Ok(payload.operations.into_iter().map(Operation::from).collect())
    }
}
