//! Money-Weighted Return Solver (XIRR)
//!
//! Computes the annualized internal rate of return for an irregular series
//! of dated cash flows by finding the root of the net present value:
//! - Newton-Raphson: fast convergence for well-behaved series
//! - Bisection: guaranteed convergence fallback when Newton diverges
//!
//! Pure and deterministic; no I/O, no shared state.

// NPV formulas use standard financial notation where mul_add() obscures meaning
#![allow(clippy::suboptimal_flops)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::CashFlow;

/// Day-count basis for annualizing exponents.
const DAYS_PER_YEAR: f64 = 365.0;

// ============================================================================
// Error Types
// ============================================================================

/// Errors from the XIRR computation.
#[derive(Debug, Error)]
pub enum XirrError {
    /// The cash-flow series cannot have a meaningful rate of return.
    #[error("degenerate cash-flow series: {reason}")]
    Degenerate {
        /// Why the series is unsolvable.
        reason: String,
    },

    /// Root finding exhausted its iteration budget.
    #[error("XIRR failed to converge after {iterations} iterations (last NPV: {last_npv:.6})")]
    Convergence {
        /// Number of iterations attempted.
        iterations: u32,
        /// NPV at the last candidate rate.
        last_npv: f64,
    },
}

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the XIRR solver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Maximum iterations for either method.
    pub max_iterations: u32,
    /// Convergence tolerance (absolute NPV).
    pub tolerance: f64,
    /// Starting rate for Newton-Raphson (e.g. 0.1 = 10%).
    pub initial_guess: f64,
    /// Lower rate bound; must stay above -1 or discounting is undefined.
    pub min_rate: f64,
    /// Upper rate bound.
    pub max_rate: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            tolerance: 1e-9,
            initial_guess: 0.1,
            min_rate: -0.9999,
            max_rate: 100.0,
        }
    }
}

// ============================================================================
// NPV Helpers
// ============================================================================

/// Years between the series anchor and a flow date.
fn years_since(anchor: DateTime<Utc>, date: DateTime<Utc>) -> f64 {
    let seconds = (date - anchor).num_seconds();
    #[allow(clippy::cast_precision_loss)]
    let days = seconds as f64 / 86_400.0;
    days / DAYS_PER_YEAR
}

/// Net present value of the series at `rate`, discounted to the first date.
fn npv(flows: &[CashFlow], anchor: DateTime<Utc>, rate: f64) -> f64 {
    flows
        .iter()
        .map(|cf| cf.amount / (1.0 + rate).powf(years_since(anchor, cf.date)))
        .sum()
}

/// Analytic derivative of `npv` with respect to the rate.
fn npv_derivative(flows: &[CashFlow], anchor: DateTime<Utc>, rate: f64) -> f64 {
    flows
        .iter()
        .map(|cf| {
            let t = years_since(anchor, cf.date);
            -t * cf.amount / (1.0 + rate).powf(t + 1.0)
        })
        .sum()
}

// ============================================================================
// Solver
// ============================================================================

/// XIRR solver over dated cash flows.
#[derive(Debug, Clone)]
pub struct CashFlowSolver {
    config: SolverConfig,
}

impl Default for CashFlowSolver {
    fn default() -> Self {
        Self::new(SolverConfig::default())
    }
}

impl CashFlowSolver {
    /// Create a solver with the given configuration.
    #[must_use]
    pub const fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    /// Compute the annualized rate of return for `flows`.
    ///
    /// The series must be chronologically ascending, span more than one
    /// distinct date, and contain at least one positive and one negative
    /// amount (investments negative, proceeds positive).
    ///
    /// The tolerance is an absolute NPV bound. For very large flow amounts
    /// the residual at the true root can exceed it in `f64`; the bisection
    /// fallback therefore accepts the midpoint once the bracket has
    /// collapsed to machine precision, with the rate accurate even though
    /// the residual is not.
    ///
    /// # Errors
    ///
    /// Returns [`XirrError::Degenerate`] when the series violates the input
    /// constraints and [`XirrError::Convergence`] when root finding exhausts
    /// its iteration budget.
    pub fn solve(&self, flows: &[CashFlow]) -> Result<f64, XirrError> {
        Self::validate(flows)?;
        let anchor = flows[0].date;

        match self.newton_raphson(flows, anchor) {
            Ok(rate) => Ok(rate),
            Err(_) => self.bisection(flows, anchor),
        }
    }

    fn validate(flows: &[CashFlow]) -> Result<(), XirrError> {
        if flows.len() < 2 {
            return Err(XirrError::Degenerate {
                reason: format!("need at least two cash flows, got {}", flows.len()),
            });
        }
        if flows.windows(2).any(|w| w[1].date < w[0].date) {
            return Err(XirrError::Degenerate {
                reason: "cash flows are not in chronological order".to_string(),
            });
        }
        if flows.windows(2).all(|w| w[0].date == w[1].date) {
            return Err(XirrError::Degenerate {
                reason: "all cash flows share a single date".to_string(),
            });
        }
        let has_positive = flows.iter().any(|cf| cf.amount > 0.0);
        let has_negative = flows.iter().any(|cf| cf.amount < 0.0);
        if !has_positive || !has_negative {
            return Err(XirrError::Degenerate {
                reason: "series needs at least one inflow and one outflow".to_string(),
            });
        }
        Ok(())
    }

    fn newton_raphson(&self, flows: &[CashFlow], anchor: DateTime<Utc>) -> Result<f64, XirrError> {
        let mut rate = self
            .config
            .initial_guess
            .clamp(self.config.min_rate, self.config.max_rate);

        for i in 0..self.config.max_iterations {
            let value = npv(flows, anchor, rate);
            if value.abs() < self.config.tolerance {
                return Ok(rate);
            }

            let slope = npv_derivative(flows, anchor, rate);
            if !slope.is_finite() || slope.abs() < 1e-12 {
                return Err(XirrError::Convergence {
                    iterations: i,
                    last_npv: value,
                });
            }

            let next = rate - value / slope;
            if !next.is_finite() {
                return Err(XirrError::Convergence {
                    iterations: i,
                    last_npv: value,
                });
            }
            rate = next.clamp(self.config.min_rate, self.config.max_rate);
        }

        Err(XirrError::Convergence {
            iterations: self.config.max_iterations,
            last_npv: npv(flows, anchor, rate),
        })
    }

    fn bisection(&self, flows: &[CashFlow], anchor: DateTime<Utc>) -> Result<f64, XirrError> {
        let mut low = self.config.min_rate;
        let mut high = self.config.max_rate;
        let mut npv_low = npv(flows, anchor, low);
        let npv_high = npv(flows, anchor, high);

        if npv_low.signum() == npv_high.signum() {
            return Err(XirrError::Convergence {
                iterations: 0,
                last_npv: npv_low,
            });
        }

        for _ in 0..self.config.max_iterations {
            let mid = low.midpoint(high);
            let value = npv(flows, anchor, mid);

            if value.abs() < self.config.tolerance {
                return Ok(mid);
            }
            // The rate cannot be refined further in f64; the residual bound
            // is unreachable for large flow magnitudes.
            if (high - low) < 1e-12 {
                return Ok(mid);
            }

            if value.signum() == npv_low.signum() {
                low = mid;
                npv_low = value;
            } else {
                high = mid;
            }
        }

        Err(XirrError::Convergence {
            iterations: self.config.max_iterations,
            last_npv: npv(flows, anchor, low.midpoint(high)),
        })
    }
}

// ============================================================================
// Tests
// ============================================================================
