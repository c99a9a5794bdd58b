//! Tinkoff Invest OpenAPI wire types.
//!
//! Every response is wrapped in the broker's `{ trackingId, status, payload }`
//! envelope. Conversions into domain types live here so the HTTP client stays
//! a thin transport.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Deserialize;

use super::GatewayError;
use crate::models::{
    Account, Currency, CurrencyBalance, Instrument, InstrumentKind, MoneyAmount, Operation,
    OperationKind, Position,
};

/// Response envelope shared by every endpoint.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope<T> {
    /// Broker-side request trace identifier.
    #[serde(default)]
    pub tracking_id: Option<String>,
    /// "Ok" on success, "Error" otherwise.
    pub status: String,
    /// Endpoint-specific payload.
    pub payload: T,
}

/// Payload of an error envelope.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    /// Broker error message.
    #[serde(default)]
    pub message: String,
    /// Broker error code.
    #[serde(default)]
    pub code: String,
}

/// `GET /user/accounts` payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountsPayload {
    /// Accounts visible to the token.
    pub accounts: Vec<WireAccount>,
}

/// One brokerage account.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireAccount {
    /// Account type ("Tinkoff", "TinkoffIis").
    pub broker_account_type: String,
    /// Account identifier.
    pub broker_account_id: String,
}

impl From<WireAccount> for Account {
    fn from(wire: WireAccount) -> Self {
        Self {
            id: wire.broker_account_id,
            kind: wire.broker_account_type,
        }
    }
}

/// A currency-tagged amount as the broker sends it.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireMoney {
    /// Currency code.
    pub currency: String,
    /// Amount.
    pub value: Decimal,
}

impl TryFrom<WireMoney> for MoneyAmount {
    type Error = GatewayError;

    fn try_from(wire: WireMoney) -> Result<Self, Self::Error> {
        let currency = parse_currency(&wire.currency)?;
        Ok(Self {
            currency,
            value: wire.value,
        })
    }
}

/// `GET /portfolio` payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortfolioPayload {
    /// Holding positions.
    pub positions: Vec<WirePosition>,
}

/// One holding position.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WirePosition {
    /// Instrument identifier.
    pub figi: String,
    /// Exchange ticker.
    #[serde(default)]
    pub ticker: String,
    /// Instrument type ("Stock", "Bond", "Etf", "Currency").
    pub instrument_type: String,
    /// Held quantity.
    pub balance: Decimal,
    /// Expected yield.
    pub expected_yield: Option<WireMoney>,
    /// Average acquisition price including accrued interest.
    pub average_position_price: Option<WireMoney>,
    /// Average acquisition price excluding accrued interest.
    pub average_position_price_no_nkd: Option<WireMoney>,
}

impl TryFrom<WirePosition> for Position {
    type Error = GatewayError;

    fn try_from(wire: WirePosition) -> Result<Self, Self::Error> {
        let kind = instrument_kind(&wire.instrument_type);
        let expected_yield = match wire.expected_yield {
            Some(money) => money.try_into()?,
            None => MoneyAmount {
                currency: Currency::Rub,
                value: Decimal::ZERO,
            },
        };
        let average_price_accrued = wire
            .average_position_price
            .map(|m| m.value)
            .unwrap_or_default();
        let average_price_clean = wire
            .average_position_price_no_nkd
            .map(|m| m.value)
            .unwrap_or_default();

        Ok(Self {
            figi: wire.figi,
            ticker: wire.ticker,
            kind,
            quantity: wire.balance,
            average_price_clean,
            average_price_accrued,
            expected_yield,
        })
    }
}

/// `GET /portfolio/currencies` payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CurrenciesPayload {
    /// Currency balances.
    pub currencies: Vec<WireCurrency>,
}

/// One currency balance.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireCurrency {
    /// Currency code.
    pub currency: String,
    /// Free balance.
    pub balance: Decimal,
    /// Balance blocked by open orders.
    #[serde(default)]
    pub blocked: Decimal,
}

impl TryFrom<WireCurrency> for CurrencyBalance {
    type Error = GatewayError;

    fn try_from(wire: WireCurrency) -> Result<Self, Self::Error> {
        let currency = parse_currency(&wire.currency)?;
        Ok(Self {
            currency,
            balance: wire.balance,
            blocked: wire.blocked,
        })
    }
}

/// `GET /market/orderbook` payload. Only the last traded price is consumed.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderbookPayload {
    /// Instrument identifier.
    pub figi: String,
    /// Last traded price; absent outside trading sessions for some venues.
    pub last_price: Option<Decimal>,
}

/// `GET /market/search/by-ticker` payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPayload {
    /// Total number of matches.
    pub total: u32,
    /// Matched instruments.
    pub instruments: Vec<WireInstrument>,
}

/// One instrument from a ticker search.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireInstrument {
    /// Instrument identifier.
    pub figi: String,
    /// Exchange ticker.
    pub ticker: String,
    /// Trading currency.
    pub currency: String,
}

impl TryFrom<WireInstrument> for Instrument {
    type Error = GatewayError;

    fn try_from(wire: WireInstrument) -> Result<Self, Self::Error> {
        let currency = parse_currency(&wire.currency)?;
        Ok(Self {
            figi: wire.figi,
            ticker: wire.ticker,
            currency,
        })
    }
}

/// `GET /operations` payload.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationsPayload {
    /// Operations in the requested window, order unspecified.
    pub operations: Vec<WireOperation>,
}

/// One account operation.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WireOperation {
    /// Operation type ("PayIn", "PayOut", "Buy", ...).
    pub operation_type: String,
    /// Settlement timestamp, RFC 3339 with offset.
    pub date: DateTime<Utc>,
    /// Signed payment amount.
    #[serde(default)]
    pub payment: Decimal,
}

impl From<WireOperation> for Operation {
    fn from(wire: WireOperation) -> Self {
        let kind = match wire.operation_type.as_str() {
            "PayIn" => OperationKind::PayIn,
            "PayOut" => OperationKind::PayOut,
            _ => OperationKind::Other,
        };
        Self {
            at: wire.date,
            kind,
            payment: wire.payment,
        }
    }
}

fn parse_currency(code: &str) -> Result<Currency, GatewayError> {
    Currency::from_code(code).ok_or_else(|| GatewayError::Decode {
        message: format!("unknown currency code {code:?}"),
    })
}

fn instrument_kind(instrument_type: &str) -> InstrumentKind {
    match instrument_type {
        "Bond" => InstrumentKind::Bond,
        "Stock" | "Etf" => InstrumentKind::Equity,
        _ => InstrumentKind::Other,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn decodes_accounts_envelope() {
        let body = r#"{
            "trackingId": "abc123",
            "status": "Ok",
            "payload": {
                "accounts": [
                    {"brokerAccountType": "Tinkoff", "brokerAccountId": "2000000001"},
                    {"brokerAccountType": "TinkoffIis", "brokerAccountId": "2000000002"}
                ]
            }
        }"#;

        let envelope: Envelope<AccountsPayload> = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.status, "Ok");
        let accounts: Vec<Account> = envelope
            .payload
            .accounts
            .into_iter()
            .map(Account::from)
            .collect();
        assert_eq!(accounts[0].kind, "Tinkoff");
        assert_eq!(accounts[1].id, "2000000002");
    }

    #[test]
    fn decodes_bond_position() {
        let body = r#"{
            "figi": "BBG00XYZ",
            "ticker": "SU26230",
            "instrumentType": "Bond",
            "balance": 5,
            "expectedYield": {"currency": "RUB", "value": 12.5},
            "averagePositionPrice": {"currency": "RUB", "value": 102},
            "averagePositionPriceNoNkd": {"currency": "RUB", "value": 101}
        }"#;

        let wire: WirePosition = serde_json::from_str(body).unwrap();
        let position = Position::try_from(wire).unwrap();
        assert_eq!(position.kind, InstrumentKind::Bond);
        assert_eq!(position.quantity, dec!(5));
        assert_eq!(position.average_price_accrued, dec!(102));
        assert_eq!(position.average_price_clean, dec!(101));
        assert_eq!(position.expected_yield.currency, Currency::Rub);
    }

    #[test]
    fn decodes_operation_kinds() {
        let body = r#"{
            "operationType": "PayIn",
            "date": "2019-08-19T18:38:33.131642+03:00",
            "payment": 10000
        }"#;
        let op: Operation = serde_json::from_str::<WireOperation>(body).unwrap().into();
        assert_eq!(op.kind, OperationKind::PayIn);
        assert_eq!(op.payment, dec!(10000));

        let body = r#"{"operationType": "BrokerCommission", "date": "2020-01-01T00:00:00Z"}"#;
        let op: Operation = serde_json::from_str::<WireOperation>(body).unwrap().into();
        assert_eq!(op.kind, OperationKind::Other);
    }

    #[test]
    fn unknown_currency_is_a_decode_error() {
        let wire = WireCurrency {
            currency: "ZZZ".into(),
            balance: dec!(1),
            blocked: dec!(0),
        };
        assert!(matches!(
            CurrencyBalance::try_from(wire),
            Err(GatewayError::Decode { .. })
        ));
    }

    #[test]
    fn etf_maps_to_equity() {
        assert_eq!(instrument_kind("Etf"), InstrumentKind::Equity);
        assert_eq!(instrument_kind("Currency"), InstrumentKind::Other);
    }
}
