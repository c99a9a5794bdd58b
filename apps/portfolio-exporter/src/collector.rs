//! Snapshot collection.
//!
//! One collection cycle per scrape: every tracked account gets its portfolio
//! and history fetched, valued and solved, then a fresh [`Snapshot`] is
//! emitted. Cycles are serialized behind an async mutex so overlapping
//! scrapes never duplicate gateway load. Accounts are discovered once at
//! startup and stay fixed for the process lifetime.

use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use futures::stream::{self, StreamExt};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::exposition::Descriptors;
use crate::gateway::LookupGateway;
use crate::models::{Account, CashFlow, Operation, OperationKind, Snapshot, WatchPrice};
use crate::observability;
use crate::valuation::ValuationAggregator;
use crate::xirr::CashFlowSolver;

/// What one collection cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Weekend; the broker has no fresh data, nothing was fetched.
    SkippedNonTradingDay,
    /// The cycle ran; failed accounts emit nothing for this cycle.
    Completed {
        /// Accounts that produced a snapshot.
        emitted: usize,
        /// Accounts dropped by a fetch or conversion failure.
        failed: usize,
    },
}

/// Result of one collection cycle.
#[derive(Debug)]
pub struct CycleResult {
    /// What happened.
    pub outcome: CycleOutcome,
    /// One snapshot per surviving account.
    pub snapshots: Vec<Snapshot>,
}

/// Runs collection cycles against a gateway.
pub struct SnapshotCollector {
    gateway: Arc<dyn LookupGateway>,
    aggregator: ValuationAggregator,
    solver: CashFlowSolver,
    descriptors: Descriptors,
    accounts: Vec<Account>,
    tickers: Vec<String>,
    history_from: NaiveDate,
    max_concurrent_lookups: usize,
    cycle_lock: Mutex<()>,
}

impl SnapshotCollector {
    /// Build a collector over pre-discovered accounts.
    ///
    /// The relevant configuration is copied out here; nothing re-reads
    /// configuration mid-cycle.
    pub fn new(gateway: Arc<dyn LookupGateway>, config: &Config, accounts: Vec<Account>) -> Self {
        let aggregator = ValuationAggregator::new(Arc::clone(&gateway), config.valuation.clone());
        Self {
            gateway,
            aggregator,
            solver: CashFlowSolver::new(config.solver.clone()),
            descriptors: Descriptors::new(),
            accounts,
            tickers: config.tickers.clone(),
            history_from: config.history.from,
            max_concurrent_lookups: config.valuation.max_concurrent_lookups,
            cycle_lock: Mutex::new(()),
        }
    }

    /// The metric descriptors this collector emits.
    pub fn descriptors(&self) -> &Descriptors {
        &self.descriptors
    }

    /// Accounts tracked by this collector.
    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    /// Run one collection cycle at the current time.
    pub async fn collect(&self) -> CycleResult {
        self.collect_at(Utc::now()).await
    }

    /// Run one collection cycle as of `now`. Injected for tests.
    pub async fn collect_at(&self, now: DateTime<Utc>) -> CycleResult {
        let _cycle = self.cycle_lock.lock().await;
        let started = Instant::now();

        if matches!(now.weekday(), Weekday::Sat | Weekday::Sun) {
            debug!("non-trading day, skipping collection cycle");
            observability::record_cycle(&CycleOutcome::SkippedNonTradingDay, started.elapsed());
            return CycleResult {
                outcome: CycleOutcome::SkippedNonTradingDay,
                snapshots: Vec::new(),
            };
        }

        let mut snapshots = Vec::with_capacity(self.accounts.len());
        let mut failed = 0usize;

        for account in &self.accounts {
            match self.collect_account(account, now).await {
                Some(snapshot) => snapshots.push(snapshot),
                None => failed += 1,
            }
        }

        let outcome = CycleOutcome::Completed {
            emitted: snapshots.len(),
            failed,
        };
        observability::record_cycle(&outcome, started.elapsed());
        info!(
            emitted = snapshots.len(),
            failed, "collection cycle finished"
        );

        CycleResult { outcome, snapshots }
    }

    /// Collect one account. Any fetch or conversion failure drops the whole
    /// account for this cycle; the siblings are unaffected.
    async fn collect_account(&self, account: &Account, now: DateTime<Utc>) -> Option<Snapshot> {
        let portfolio = match self.gateway.portfolio(&account.id).await {
            Ok(portfolio) => portfolio,
            Err(error) => {
                warn!(account = %account.kind, %error, "portfolio fetch failed, dropping account for this cycle");
                observability::record_gateway_error(error.kind());
                return None;
            }
        };

        let valuation = match self.aggregator.value_account(&portfolio).await {
            Ok(valuation) => valuation,
            Err(error) => {
                warn!(account = %account.kind, %error, "valuation failed, dropping account for this cycle");
                return None;
            }
        };

        let from = self
            .history_from
            .and_hms_opt(0, 0, 0)
            .map_or(DateTime::<Utc>::MIN_UTC, |naive| naive.and_utc());
        let mut operations = match self.gateway.operations(&account.id, from, now).await {
            Ok(operations) => operations,
            Err(error) => {
                warn!(account = %account.kind, %error, "history fetch failed, dropping account for this cycle");
                observability::record_gateway_error(error.kind());
                return None;
            }
        };

        // Only deposits and withdrawals participate; the feed's order is
        // unspecified, so sort explicitly.
        operations.retain(|op| matches!(op.kind, OperationKind::PayIn | OperationKind::PayOut));
        operations.sort_by_key(|op| op.at);

        let total_payin = payin_sum(&operations);
        let total_payout = payout_sum(&operations);

        let flows = build_cash_flows(&operations, now, valuation.total);
        let xirr = match self.solver.solve(&flows) {
            Ok(rate) => Some(rate),
            Err(error) => {
                warn!(account = %account.kind, %error, "return computation failed, omitting xirr");
                None
            }
        };

        let watchlist = self.watch_prices().await;

        Some(Snapshot {
            account: account.kind.clone(),
            total: valuation.total,
            positions: valuation.positions,
            currencies: valuation.currencies,
            total_payin,
            total_payout,
            xirr,
            watchlist,
        })
    }

    /// Resolve and price the configured watchlist tickers. Per-ticker
    /// failures are logged and skipped.
    async fn watch_prices(&self) -> Vec<WatchPrice> {
        let prices: Vec<Option<WatchPrice>> = stream::iter(self.tickers.iter().cloned())
            .map(|ticker| {
                let gateway = Arc::clone(&self.gateway);
                async move {
                    let instrument = match gateway.resolve_ticker(&ticker).await {
                        Ok(instrument) => instrument,
                        Err(error) => {
                            warn!(%ticker, %error, "watchlist ticker resolution failed");
                            observability::record_gateway_error(error.kind());
                            return None;
                        }
                    };
                    match gateway.last_price(&instrument.figi).await {
                        Ok(price) => Some(WatchPrice {
                            ticker,
                            currency: instrument.currency,
                            price,
                        }),
                        Err(error) => {
                            warn!(%ticker, %error, "watchlist price lookup failed");
                            observability::record_gateway_error(error.kind());
                            None
                        }
                    }
                }
            })
            .buffered(self.max_concurrent_lookups)
            .collect()
            .await;

        prices.into_iter().flatten().collect()
    }
}

/// Sum of deposits.
fn payin_sum(operations: &[Operation]) -> Decimal {
    operations
        .iter()
        .filter(|op| op.kind == OperationKind::PayIn)
        .map(|op| op.payment)
        .sum()
}

/// Sum of withdrawals, sign-negated so the result is positive.
fn payout_sum(operations: &[Operation]) -> Decimal {
    -operations
        .iter()
        .filter(|op| op.kind == OperationKind::PayOut)
        .map(|op| op.payment)
        .sum::<Decimal>()
}

/// Build the solver input: deposits as investments (negative), withdrawals
/// as proceeds (positive), plus the synthetic terminal flow at `now` worth
/// the current total.
fn build_cash_flows(operations: &[Operation], now: DateTime<Utc>, total: Decimal) -> Vec<CashFlow> {
    let mut flows: Vec<CashFlow> = operations
        .iter()
        .map(|op| {
            let payment = op.payment.to_f64().unwrap_or(0.0);
            let amount = match op.kind {
                OperationKind::PayIn => -payment,
                OperationKind::PayOut | OperationKind::Other => payment.abs(),
            };
            CashFlow {
                date: op.at,
                amount,
            }
        })
        .collect();

    flows.sort_by_key(|cf| cf.date);
    flows.push(CashFlow {
        date: now,
        amount: total.to_f64().unwrap_or(0.0),
    });
    flows
}
