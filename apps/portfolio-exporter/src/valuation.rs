//! Account valuation.
//!
//! Turns one account's positions and currency balances into a base-currency
//! total plus the itemized breakdown used for metric emission. Lookups run
//! concurrently with a bounded fan-out; each task owns exactly one output
//! slot and a join barrier assembles the result.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use thiserror::Error;
use tracing::warn;

use crate::config::ValuationConfig;
use crate::gateway::{GatewayError, LookupGateway};
use crate::models::{
    Currency, CurrencyBalance, CurrencyValuation, InstrumentKind, Portfolio, Position,
    PositionValuation,
};

/// Errors that abort an account's valuation.
///
/// Individual position lookups never raise these; they degrade to a zero
/// contribution instead.
#[derive(Debug, Error)]
pub enum ValuationError {
    /// A non-base currency has no quote instrument configured.
    #[error("no quote instrument configured for currency {0}")]
    UnmappedCurrency(Currency),

    /// The exchange-rate lookup for a mapped currency failed.
    #[error("exchange-rate lookup for {currency} failed: {source}")]
    Conversion {
        /// Currency being converted.
        currency: Currency,
        /// Underlying gateway failure.
        #[source]
        source: GatewayError,
    },
}

/// Itemized valuation of one account.
#[derive(Debug, Clone)]
pub struct AccountValuation {
    /// Aggregate value in base currency.
    pub total: Decimal,
    /// Per-position valuations, input order preserved.
    pub positions: Vec<PositionValuation>,
    /// Per-currency valuations, input order preserved.
    pub currencies: Vec<CurrencyValuation>,
}

/// Values portfolios against prices served by a [`LookupGateway`].
#[derive(Clone)]
pub struct ValuationAggregator {
    gateway: Arc<dyn LookupGateway>,
    config: ValuationConfig,
}

impl ValuationAggregator {
    /// Create an aggregator for the given gateway and valuation settings.
    pub fn new(gateway: Arc<dyn LookupGateway>, config: ValuationConfig) -> Self {
        Self { gateway, config }
    }

    /// Compute the account's total value and itemized breakdown.
    ///
    /// # Errors
    ///
    /// Returns [`ValuationError`] only when a currency conversion is
    /// unresolvable; position price failures degrade to zero contributions.
    pub async fn value_account(
        &self,
        portfolio: &Portfolio,
    ) -> Result<AccountValuation, ValuationError> {
        let positions = self.value_positions(&portfolio.positions).await;
        let currencies = self.value_currencies(&portfolio.currencies).await?;

        let total = positions.iter().map(|p| p.value).sum::<Decimal>()
            + currencies.iter().map(|c| c.value).sum::<Decimal>();

        Ok(AccountValuation {
            total,
            positions,
            currencies,
        })
    }

    async fn value_positions(&self, positions: &[Position]) -> Vec<PositionValuation> {
        stream::iter(positions.iter().cloned())
            .map(|position| {
                let gateway = Arc::clone(&self.gateway);
                let multiplier = self.config.bond_face_value_multiplier;
                async move {
                    match gateway.last_price(&position.figi).await {
                        Ok(last_price) => {
                            let unit_price = unit_value(&position, last_price, multiplier);
                            let value = position.quantity * unit_price;
                            PositionValuation {
                                position,
                                last_price: Some(last_price),
                                unit_price: Some(unit_price),
                                value,
                            }
                        }
                        Err(error) => {
                            warn!(
                                figi = %position.figi,
                                ticker = %position.ticker,
                                %error,
                                "price lookup failed, position contributes zero"
                            );
                            PositionValuation {
                                position,
                                last_price: None,
                                unit_price: None,
                                value: Decimal::ZERO,
                            }
                        }
                    }
                }
            })
            .buffered(self.config.max_concurrent_lookups)
            .collect()
            .await
    }

    async fn value_currencies(
        &self,
        balances: &[CurrencyBalance],
    ) -> Result<Vec<CurrencyValuation>, ValuationError> {
        let valuations: Vec<Result<CurrencyValuation, ValuationError>> =
            stream::iter(balances.iter().copied())
                .map(|balance| {
                    let gateway = Arc::clone(&self.gateway);
                    let base = self.config.base_currency;
                    let instrument = self
                        .config
                        .instrument_for(balance.currency)
                        .map(str::to_string);
                    async move {
                        if balance.currency == base {
                            return Ok(CurrencyValuation {
                                balance,
                                value: balance.balance,
                            });
                        }

                        let figi = instrument
                            .ok_or(ValuationError::UnmappedCurrency(balance.currency))?;
                        let rate = gateway.last_price(&figi).await.map_err(|source| {
                            ValuationError::Conversion {
                                currency: balance.currency,
                                source,
                            }
                        })?;

                        Ok(CurrencyValuation {
                            balance,
                            value: balance.balance * rate,
                        })
                    }
                })
                .buffered(self.config.max_concurrent_lookups)
                .collect()
                .await;

        valuations.into_iter().collect()
    }
}

/// Unit value of one position at the given last traded price.
///
/// Bonds add the accrued-interest component of the average acquisition price
/// on top of the (face-value adjusted) quote; everything else is priced
/// directly off the order book.
fn unit_value(position: &Position, last_price: Decimal, bond_multiplier: Decimal) -> Decimal {
    match position.kind {
        InstrumentKind::Bond => {
            last_price * bond_multiplier
                + (position.average_price_accrued - position.average_price_clean)
        }
        InstrumentKind::Equity | InstrumentKind::Other => last_price,
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use std::collections::HashMap;

    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::{Account, Instrument, MoneyAmount, Operation};

    /// In-memory gateway serving a fixed price table.
    struct PriceTable {
        prices: HashMap<String, Decimal>,
    }

    impl PriceTable {
        fn new(prices: &[(&str, Decimal)]) -> Arc<Self> {
            Arc::new(Self {
                prices: prices
                    .iter()
                    .map(|(figi, price)| ((*figi).to_string(), *price))
                    .collect(),
            })
        }
    }

    #[async_trait]
    impl LookupGateway for PriceTable {
        async fn accounts(&self) -> Result<Vec<Account>, GatewayError> {
            Ok(Vec::new())
        }

        async fn portfolio(&self, _account_id: &str) -> Result<Portfolio, GatewayError> {
            Ok(Portfolio::default())
        }

        async fn last_price(&self, figi: &str) -> Result<Decimal, GatewayError> {
            self.prices
                .get(figi)
                .copied()
                .ok_or_else(|| GatewayError::NotFound {
                    what: figi.to_string(),
                })
        }

        async fn resolve_ticker(&self, ticker: &str) -> Result<Instrument, GatewayError> {
            Err(GatewayError::NotFound {
                what: ticker.to_string(),
            })
        }

        async fn operations(
            &self,
            _account_id: &str,
            _from: DateTime<Utc>,
            _to: DateTime<Utc>,
        ) -> Result<Vec<Operation>, GatewayError> {
            Ok(Vec::new())
        }
    }

    fn position(figi: &str, kind: InstrumentKind, quantity: Decimal) -> Position {
        Position {
            figi: figi.to_string(),
            ticker: figi.to_lowercase(),
            kind,
            quantity,
            average_price_clean: Decimal::ZERO,
            average_price_accrued: Decimal::ZERO,
            expected_yield: MoneyAmount {
                currency: Currency::Rub,
                value: Decimal::ZERO,
            },
        }
    }

    fn aggregator(gateway: Arc<dyn LookupGateway>) -> ValuationAggregator {
        ValuationAggregator::new(gateway, ValuationConfig::default())
    }

    #[tokio::test]
    async fn equity_priced_off_the_order_book() {
        let gateway = PriceTable::new(&[("EQ1", dec!(250))]);
        let portfolio = Portfolio {
            positions: vec![position("EQ1", InstrumentKind::Equity, dec!(4))],
            currencies: vec![],
        };

        let valuation = aggregator(gateway).value_account(&portfolio).await.unwrap();
        assert_eq!(valuation.total, dec!(1000));
        assert_eq!(valuation.positions[0].unit_price, Some(dec!(250)));
    }

    #[tokio::test]
    async fn bond_adds_accrued_interest_component() {
        let gateway = PriceTable::new(&[("BOND1", dec!(100))]);
        let mut bond = position("BOND1", InstrumentKind::Bond, dec!(5));
        bond.average_price_accrued = dec!(102);
        bond.average_price_clean = dec!(101);
        let portfolio = Portfolio {
            positions: vec![bond],
            currencies: vec![],
        };

        let valuation = aggregator(gateway).value_account(&portfolio).await.unwrap();
        assert_eq!(valuation.positions[0].unit_price, Some(dec!(101)));
        assert_eq!(valuation.positions[0].value, dec!(505));
        assert_eq!(valuation.total, dec!(505));
    }

    #[tokio::test]
    async fn bond_multiplier_scales_the_quote_only() {
        let gateway = PriceTable::new(&[("BOND1", dec!(100))]);
        let mut bond = position("BOND1", InstrumentKind::Bond, dec!(1));
        bond.average_price_accrued = dec!(12);
        bond.average_price_clean = dec!(10);

        let config = ValuationConfig {
            bond_face_value_multiplier: dec!(10),
            ..ValuationConfig::default()
        };
        let valuation = ValuationAggregator::new(gateway, config)
            .value_account(&Portfolio {
                positions: vec![bond],
                currencies: vec![],
            })
            .await
            .unwrap();

        // 100 * 10 + (12 - 10)
        assert_eq!(valuation.positions[0].unit_price, Some(dec!(1002)));
    }

    #[tokio::test]
    async fn failed_position_contributes_zero_and_others_survive() {
        let gateway = PriceTable::new(&[("EQ1", dec!(100))]);
        let portfolio = Portfolio {
            positions: vec![
                position("EQ1", InstrumentKind::Equity, dec!(2)),
                position("MISSING", InstrumentKind::Equity, dec!(7)),
            ],
            currencies: vec![],
        };

        let valuation = aggregator(gateway).value_account(&portfolio).await.unwrap();
        assert_eq!(valuation.total, dec!(200));
        assert_eq!(valuation.positions.len(), 2);
        assert_eq!(valuation.positions[1].unit_price, None);
        assert_eq!(valuation.positions[1].value, Decimal::ZERO);
    }

    #[tokio::test]
    async fn base_currency_passes_through_and_usd_converts() {
        let gateway = PriceTable::new(&[("BBG0013HGFT4", dec!(90))]);
        let portfolio = Portfolio {
            positions: vec![],
            currencies: vec![
                CurrencyBalance {
                    currency: Currency::Rub,
                    balance: dec!(1500),
                    blocked: dec!(0),
                },
                CurrencyBalance {
                    currency: Currency::Usd,
                    balance: dec!(10),
                    blocked: dec!(0),
                },
            ],
        };

        let valuation = aggregator(gateway).value_account(&portfolio).await.unwrap();
        assert_eq!(valuation.currencies[0].value, dec!(1500));
        assert_eq!(valuation.currencies[1].value, dec!(900));
        assert_eq!(valuation.total, dec!(2400));
    }

    #[tokio::test]
    async fn unmapped_currency_is_a_hard_error() {
        let gateway = PriceTable::new(&[]);
        let portfolio = Portfolio {
            positions: vec![],
            currencies: vec![CurrencyBalance {
                currency: Currency::Gbp,
                balance: dec!(5),
                blocked: dec!(0),
            }],
        };

        let result = aggregator(gateway).value_account(&portfolio).await;
        assert!(matches!(
            result,
            Err(ValuationError::UnmappedCurrency(Currency::Gbp))
        ));
    }

    #[tokio::test]
    async fn failed_rate_lookup_aborts_the_account() {
        // USD is mapped by default but the price table has no quote for it.
        let gateway = PriceTable::new(&[]);
        let portfolio = Portfolio {
            positions: vec![],
            currencies: vec![CurrencyBalance {
                currency: Currency::Usd,
                balance: dec!(10),
                blocked: dec!(0),
            }],
        };

        let result = aggregator(gateway).value_account(&portfolio).await;
        assert!(matches!(result, Err(ValuationError::Conversion { .. })));
    }

    #[tokio::test]
    async fn total_is_invariant_under_input_permutation() {
        let gateway = PriceTable::new(&[
            ("EQ1", dec!(10)),
            ("EQ2", dec!(20)),
            ("EQ3", dec!(30)),
            ("BBG0013HGFT4", dec!(90)),
        ]);
        let positions = vec![
            position("EQ1", InstrumentKind::Equity, dec!(1)),
            position("EQ2", InstrumentKind::Equity, dec!(2)),
            position("EQ3", InstrumentKind::Equity, dec!(3)),
        ];
        let currencies = vec![
            CurrencyBalance {
                currency: Currency::Rub,
                balance: dec!(100),
                blocked: dec!(0),
            },
            CurrencyBalance {
                currency: Currency::Usd,
                balance: dec!(1),
                blocked: dec!(0),
            },
        ];

        let forward = aggregator(Arc::clone(&gateway) as Arc<dyn LookupGateway>)
            .value_account(&Portfolio {
                positions: positions.clone(),
                currencies: currencies.clone(),
            })
            .await
            .unwrap();

        let mut reversed_positions = positions;
        reversed_positions.reverse();
        let mut reversed_currencies = currencies;
        reversed_currencies.reverse();
        let reversed = aggregator(gateway)
            .value_account(&Portfolio {
                positions: reversed_positions,
                currencies: reversed_currencies,
            })
            .await
            .unwrap();

        assert_eq!(forward.total, reversed.total);
        assert_eq!(forward.total, dec!(330));
    }
}
