//! Domain types shared across the exporter.
//!
//! Everything monetary is `rust_decimal::Decimal`; `f64` appears only in the
//! solver and at metric emission.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Currency of a balance or a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    /// Russian rouble (the reference deployment's base currency).
    Rub,
    /// US dollar.
    Usd,
    /// Euro.
    Eur,
    /// Pound sterling.
    Gbp,
    /// Hong Kong dollar.
    Hkd,
    /// Swiss franc.
    Chf,
    /// Japanese yen.
    Jpy,
    /// Chinese yuan.
    Cny,
    /// Turkish lira.
    Try,
}

impl Currency {
    /// ISO 4217 code.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::Rub => "RUB",
            Self::Usd => "USD",
            Self::Eur => "EUR",
            Self::Gbp => "GBP",
            Self::Hkd => "HKD",
            Self::Chf => "CHF",
            Self::Jpy => "JPY",
            Self::Cny => "CNY",
            Self::Try => "TRY",
        }
    }

    /// Parse a currency code, case-insensitive.
    #[must_use]
    pub fn from_code(code: &str) -> Option<Self> {
        match code.to_ascii_uppercase().as_str() {
            "RUB" => Some(Self::Rub),
            "USD" => Some(Self::Usd),
            "EUR" => Some(Self::Eur),
            "GBP" => Some(Self::Gbp),
            "HKD" => Some(Self::Hkd),
            "CHF" => Some(Self::Chf),
            "JPY" => Some(Self::Jpy),
            "CNY" => Some(Self::Cny),
            "TRY" => Some(Self::Try),
            _ => None,
        }
    }
}

impl std::fmt::Display for Currency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

/// Kind of a tradable instrument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstrumentKind {
    /// Shares, ETFs and anything else priced directly off the order book.
    Equity,
    /// Bonds; valuation incorporates the accrued-interest adjustment.
    Bond,
    /// Instrument kinds with no special valuation rule.
    Other,
}

impl InstrumentKind {
    /// Label value used in metric emission.
    #[must_use]
    pub const fn as_label(&self) -> &'static str {
        match self {
            Self::Equity => "Stock",
            Self::Bond => "Bond",
            Self::Other => "Other",
        }
    }
}

/// An amount tagged with its currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoneyAmount {
    /// Currency of `value`.
    pub currency: Currency,
    /// The amount.
    pub value: Decimal,
}

/// One holding position of an account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    /// Opaque FIGI-like instrument identifier.
    pub figi: String,
    /// Exchange ticker.
    pub ticker: String,
    /// Instrument kind.
    pub kind: InstrumentKind,
    /// Held quantity; signed (short positions are negative).
    pub quantity: Decimal,
    /// Average acquisition price excluding accrued interest.
    pub average_price_clean: Decimal,
    /// Average acquisition price including accrued interest.
    pub average_price_accrued: Decimal,
    /// Expected yield reported by the broker.
    pub expected_yield: MoneyAmount,
}

/// A currency balance of an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrencyBalance {
    /// Currency code.
    pub currency: Currency,
    /// Freely available balance.
    pub balance: Decimal,
    /// Balance blocked by open orders.
    pub blocked: Decimal,
}

/// Portfolio state of one account: holdings plus currency balances.
#[derive(Debug, Clone, Default)]
pub struct Portfolio {
    /// Holding positions.
    pub positions: Vec<Position>,
    /// Currency balances.
    pub currencies: Vec<CurrencyBalance>,
}

/// Kind of a historical account operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    /// Deposit into the account.
    PayIn,
    /// Withdrawal from the account.
    PayOut,
    /// Any other operation; ignored by valuation.
    Other,
}

/// One historical account operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Operation {
    /// When the operation settled.
    pub at: DateTime<Utc>,
    /// Operation kind.
    pub kind: OperationKind,
    /// Signed payment amount in the account base currency
    /// (positive for deposits, negative for withdrawals).
    pub payment: Decimal,
}

/// A dated signed cash flow, input to the rate-of-return solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CashFlow {
    /// Flow date.
    pub date: DateTime<Utc>,
    /// Signed amount: investments negative, proceeds positive.
    pub amount: f64,
}

/// A resolved instrument from a ticker search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instrument {
    /// Opaque FIGI-like identifier.
    pub figi: String,
    /// Exchange ticker.
    pub ticker: String,
    /// Currency the instrument trades in.
    pub currency: Currency,
}

/// A brokerage account discovered at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Account {
    /// Broker-assigned account identifier.
    pub id: String,
    /// Human-readable account type label (e.g. "Tinkoff", "TinkoffIis").
    pub kind: String,
}

/// Valuation of one position inside a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionValuation {
    /// Position the valuation belongs to.
    pub position: Position,
    /// Quoted last price; `None` when the lookup failed.
    pub last_price: Option<Decimal>,
    /// Valuation unit (bond quotes carry the accrued-interest adjustment);
    /// `None` when the lookup failed.
    pub unit_price: Option<Decimal>,
    /// `quantity * unit_price`, zero when the lookup failed.
    pub value: Decimal,
}

/// Valuation of one currency balance inside a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrencyValuation {
    /// The balance the valuation belongs to.
    pub balance: CurrencyBalance,
    /// Free balance converted to base currency.
    pub value: Decimal,
}

/// Resolved watchlist ticker price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchPrice {
    /// Configured ticker.
    pub ticker: String,
    /// Currency the instrument trades in.
    pub currency: Currency,
    /// Last traded price.
    pub price: Decimal,
}

/// Point-in-time valuation snapshot of one account.
///
/// Created fresh every collection cycle and never mutated after being
/// handed to the exposition boundary.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Account type label the snapshot belongs to.
    pub account: String,
    /// Aggregate account value in base currency.
    pub total: Decimal,
    /// Per-position valuations.
    pub positions: Vec<PositionValuation>,
    /// Per-currency valuations.
    pub currencies: Vec<CurrencyValuation>,
    /// Cumulative deposits.
    pub total_payin: Decimal,
    /// Cumulative withdrawals, sign-negated so the value is positive.
    pub total_payout: Decimal,
    /// Money-weighted annual return; absent when the solver failed or the
    /// cash-flow series was degenerate.
    pub xirr: Option<f64>,
    /// Watchlist prices resolved this cycle.
    pub watchlist: Vec<WatchPrice>,
}
