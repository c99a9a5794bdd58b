//! Metric descriptors, samples and Prometheus text rendering.
//!
//! The nine portfolio metrics are a stable contract; names, help strings and
//! label sets never change between scrapes. Descriptors are owned by the
//! instance that emits them, never held in process-wide state.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use crate::models::Snapshot;

/// One gauge descriptor: name, help and its fixed label set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricDesc {
    /// Metric name.
    pub name: &'static str,
    /// Help text.
    pub help: &'static str,
    /// Label names, in emission order.
    pub labels: &'static [&'static str],
}

/// One gauge sample: descriptor name, label values and the value.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Name of the descriptor this sample belongs to.
    pub name: &'static str,
    /// Label values, positionally matching the descriptor's label names.
    pub label_values: Vec<String>,
    /// Gauge value.
    pub value: f64,
}

/// The portfolio metric descriptors.
#[derive(Debug, Clone)]
pub struct Descriptors {
    /// Aggregate account value.
    pub total: MetricDesc,
    /// Per-instrument price.
    pub stock: MetricDesc,
    /// Per-instrument held quantity.
    pub stock_count: MetricDesc,
    /// Per-instrument expected yield.
    pub stock_expected_yield: MetricDesc,
    /// Free currency balance.
    pub currency: MetricDesc,
    /// Blocked currency balance.
    pub currency_blocked: MetricDesc,
    /// Cumulative deposits.
    pub total_payin: MetricDesc,
    /// Cumulative withdrawals.
    pub total_payout: MetricDesc,
    /// Money-weighted annual return.
    pub xirr: MetricDesc,
}

impl Descriptors {
    /// Construct the descriptor set.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            total: MetricDesc {
                name: "total",
                help: "Total amount",
                labels: &["account"],
            },
            stock: MetricDesc {
                name: "stock",
                help: "Stock price",
                labels: &["type", "ticker", "currency", "in_portfolio", "account"],
            },
            stock_count: MetricDesc {
                name: "stock_count",
                help: "Stock count",
                labels: &["type", "ticker", "account"],
            },
            stock_expected_yield: MetricDesc {
                name: "stock_expected_yield",
                help: "Stock expected yield",
                labels: &["type", "ticker", "currency", "account"],
            },
            currency: MetricDesc {
                name: "currency",
                help: "Currency",
                labels: &["currency", "account"],
            },
            currency_blocked: MetricDesc {
                name: "currency_blocked",
                help: "Blocked currency",
                labels: &["currency", "account"],
            },
            total_payin: MetricDesc {
                name: "total_payin",
                help: "Total PayIn",
                labels: &["account"],
            },
            total_payout: MetricDesc {
                name: "total_payout",
                help: "Total PayOut",
                labels: &["account"],
            },
            xirr: MetricDesc {
                name: "xirr",
                help: "Internal Rate of Return (IRR) for an irregular series of cash flows",
                labels: &["account"],
            },
        }
    }

    /// All descriptors in emission order.
    #[must_use]
    pub fn all(&self) -> [&MetricDesc; 9] {
        [
            &self.total,
            &self.stock,
            &self.stock_count,
            &self.stock_expected_yield,
            &self.currency,
            &self.currency_blocked,
            &self.total_payin,
            &self.total_payout,
            &self.xirr,
        ]
    }

    /// Expand one snapshot into gauge samples.
    ///
    /// A degraded snapshot simply yields fewer samples; a position without a
    /// resolved price keeps its count and expected-yield samples but emits no
    /// price sample.
    #[must_use]
    pub fn snapshot_samples(&self, snapshot: &Snapshot) -> Vec<Sample> {
        let account = &snapshot.account;
        let mut samples = Vec::new();

        samples.push(Sample {
            name: self.total.name,
            label_values: vec![account.clone()],
            value: to_f64(snapshot.total),
        });

        for valuation in &snapshot.positions {
            let position = &valuation.position;
            let kind = position.kind.as_label();
            let yield_currency = position.expected_yield.currency.code();

            if let Some(last_price) = valuation.last_price {
                samples.push(Sample {
                    name: self.stock.name,
                    label_values: vec![
                        kind.to_string(),
                        position.ticker.clone(),
                        yield_currency.to_string(),
                        "1".to_string(),
                        account.clone(),
                    ],
                    value: to_f64(last_price),
                });
            }

            samples.push(Sample {
                name: self.stock_count.name,
                label_values: vec![kind.to_string(), position.ticker.clone(), account.clone()],
                value: to_f64(position.quantity),
            });

            samples.push(Sample {
                name: self.stock_expected_yield.name,
                label_values: vec![
                    kind.to_string(),
                    position.ticker.clone(),
                    yield_currency.to_string(),
                    account.clone(),
                ],
                value: to_f64(position.expected_yield.value),
            });
        }

        for valuation in &snapshot.currencies {
            let code = valuation.balance.currency.code().to_string();
            samples.push(Sample {
                name: self.currency.name,
                label_values: vec![code.clone(), account.clone()],
                value: to_f64(valuation.balance.balance),
            });
            samples.push(Sample {
                name: self.currency_blocked.name,
                label_values: vec![code, account.clone()],
                value: to_f64(valuation.balance.blocked),
            });
        }

        samples.push(Sample {
            name: self.total_payin.name,
            label_values: vec![account.clone()],
            value: to_f64(snapshot.total_payin),
        });
        samples.push(Sample {
            name: self.total_payout.name,
            label_values: vec![account.clone()],
            value: to_f64(snapshot.total_payout),
        });

        if let Some(xirr) = snapshot.xirr {
            samples.push(Sample {
                name: self.xirr.name,
                label_values: vec![account.clone()],
                value: xirr,
            });
        }

        for watch in &snapshot.watchlist {
            samples.push(Sample {
                name: self.stock.name,
                label_values: vec![
                    "Stock".to_string(),
                    watch.ticker.clone(),
                    watch.currency.code().to_string(),
                    "0".to_string(),
                    account.clone(),
                ],
                value: to_f64(watch.price),
            });
        }

        samples
    }

    /// Render samples in the Prometheus text exposition format.
    ///
    /// Descriptors with no samples this cycle are skipped entirely; stale
    /// values are never re-emitted.
    #[must_use]
    pub fn render(&self, samples: &[Sample]) -> String {
        let mut out = String::new();

        for desc in self.all() {
            let matching: Vec<&Sample> = samples.iter().filter(|s| s.name == desc.name).collect();
            if matching.is_empty() {
                continue;
            }

            out.push_str(&format!("# HELP {} {}\n", desc.name, desc.help));
            out.push_str(&format!("# TYPE {} gauge\n", desc.name));

            for sample in matching {
                if sample.label_values.is_empty() {
                    out.push_str(&format!("{} {}\n", desc.name, format_value(sample.value)));
                    continue;
                }
                let labels = desc
                    .labels
                    .iter()
                    .zip(&sample.label_values)
                    .map(|(name, value)| format!("{name}=\"{}\"", escape_label_value(value)))
                    .collect::<Vec<_>>()
                    .join(",");
                out.push_str(&format!(
                    "{}{{{labels}}} {}\n",
                    desc.name,
                    format_value(sample.value)
                ));
            }
        }

        out
    }
}

impl Default for Descriptors {
    fn default() -> Self {
        Self::new()
    }
}

fn to_f64(value: Decimal) -> f64 {
    value.to_f64().unwrap_or(0.0)
}

fn format_value(value: f64) -> String {
    if value == value.trunc() && value.abs() < 1e15 {
        format!("{value:.0}")
    } else {
        format!("{value}")
    }
}

fn escape_label_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use rust_decimal_macros::dec;

    use super::*;
    use crate::models::{
        Currency, CurrencyBalance, CurrencyValuation, InstrumentKind, MoneyAmount, Position,
        PositionValuation, WatchPrice,
    };

    fn snapshot() -> Snapshot {
        let position = Position {
            figi: "BBG000B9XRY4".into(),
            ticker: "AAPL".into(),
            kind: InstrumentKind::Equity,
            quantity: dec!(3),
            average_price_clean: dec!(0),
            average_price_accrued: dec!(0),
            expected_yield: MoneyAmount {
                currency: Currency::Usd,
                value: dec!(15),
            },
        };
        Snapshot {
            account: "Tinkoff".into(),
            total: dec!(1234.5),
            positions: vec![PositionValuation {
                position,
                last_price: Some(dec!(120)),
                unit_price: Some(dec!(120)),
                value: dec!(360),
            }],
            currencies: vec![CurrencyValuation {
                balance: CurrencyBalance {
                    currency: Currency::Rub,
                    balance: dec!(500),
                    blocked: dec!(25),
                },
                value: dec!(500),
            }],
            total_payin: dec!(10000),
            total_payout: dec!(2000),
            xirr: Some(0.125),
            watchlist: vec![WatchPrice {
                ticker: "SBER".into(),
                currency: Currency::Rub,
                price: dec!(280),
            }],
        }
    }

    #[test]
    fn descriptor_set_is_stable() {
        let descriptors = Descriptors::new();
        let names: Vec<&str> = descriptors.all().iter().map(|d| d.name).collect();
        assert_eq!(
            names,
            [
                "total",
                "stock",
                "stock_count",
                "stock_expected_yield",
                "currency",
                "currency_blocked",
                "total_payin",
                "total_payout",
                "xirr",
            ]
        );
        assert_eq!(
            descriptors.stock.labels,
            &["type", "ticker", "currency", "in_portfolio", "account"]
        );
    }

    #[test]
    fn full_snapshot_expands_to_all_series() {
        let descriptors = Descriptors::new();
        let samples = descriptors.snapshot_samples(&snapshot());

        let count = |name: &str| samples.iter().filter(|s| s.name == name).count();
        assert_eq!(count("total"), 1);
        // One held position plus one watchlist price.
        assert_eq!(count("stock"), 2);
        assert_eq!(count("stock_count"), 1);
        assert_eq!(count("stock_expected_yield"), 1);
        assert_eq!(count("currency"), 1);
        assert_eq!(count("currency_blocked"), 1);
        assert_eq!(count("xirr"), 1);
    }

    #[test]
    fn watchlist_prices_are_marked_out_of_portfolio() {
        let descriptors = Descriptors::new();
        let samples = descriptors.snapshot_samples(&snapshot());

        let watch = samples
            .iter()
            .find(|s| s.name == "stock" && s.label_values[1] == "SBER")
            .unwrap();
        assert_eq!(watch.label_values[0], "Stock");
        assert_eq!(watch.label_values[3], "0");
        let held = samples
            .iter()
            .find(|s| s.name == "stock" && s.label_values[1] == "AAPL")
            .unwrap();
        assert_eq!(held.label_values[3], "1");
    }

    #[test]
    fn failed_price_lookup_omits_only_the_price_sample() {
        let mut snap = snapshot();
        snap.positions[0].last_price = None;
        snap.positions[0].unit_price = None;
        snap.positions[0].value = dec!(0);

        let descriptors = Descriptors::new();
        let samples = descriptors.snapshot_samples(&snap);

        let stock_for_position = samples
            .iter()
            .filter(|s| s.name == "stock" && s.label_values[1] == "AAPL")
            .count();
        assert_eq!(stock_for_position, 0);
        assert_eq!(samples.iter().filter(|s| s.name == "stock_count").count(), 1);
        assert_eq!(
            samples
                .iter()
                .filter(|s| s.name == "stock_expected_yield")
                .count(),
            1
        );
    }

    #[test]
    fn absent_xirr_emits_no_sample() {
        let mut snap = snapshot();
        snap.xirr = None;

        let descriptors = Descriptors::new();
        let samples = descriptors.snapshot_samples(&snap);
        assert!(samples.iter().all(|s| s.name != "xirr"));

        let rendered = descriptors.render(&samples);
        assert!(!rendered.contains("xirr"));
    }

    #[test]
    fn renders_prometheus_text_format() {
        let descriptors = Descriptors::new();
        let samples = descriptors.snapshot_samples(&snapshot());
        let rendered = descriptors.render(&samples);

        assert!(rendered.contains("# HELP total Total amount\n"));
        assert!(rendered.contains("# TYPE total gauge\n"));
        assert!(rendered.contains("total{account=\"Tinkoff\"} 1234.5\n"));
        assert!(rendered.contains(
            "stock{type=\"Stock\",ticker=\"AAPL\",currency=\"USD\",in_portfolio=\"1\",account=\"Tinkoff\"} 120\n"
        ));
        assert!(rendered.contains("currency{currency=\"RUB\",account=\"Tinkoff\"} 500\n"));
        assert!(rendered.contains("xirr{account=\"Tinkoff\"} 0.125\n"));
    }

    #[test]
    fn label_values_are_escaped() {
        assert_eq!(escape_label_value("a\"b\\c\nd"), "a\\\"b\\\\c\\nd");
    }
}
