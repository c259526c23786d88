//! # Configuration
//!
//! $$
//! \mu^{ann} = k\,\bar r,\qquad \Sigma^{ann} = k\,\hat\Sigma
//! $$
//!
//! Plain configuration structs with defaults. Market conventions (periods per year,
//! risk-free rate) are passed explicitly into every estimator and simulator call.

use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// Sampling interval of the price series.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Interval {
  #[default]
  Daily,
  Weekly,
  Monthly,
}

impl Interval {
  /// Conventional number of periods per year.
  pub fn periods_per_year(self) -> f64 {
    match self {
      Interval::Daily => 252.0,
      Interval::Weekly => 52.0,
      Interval::Monthly => 12.0,
    }
  }
}

/// How periodic returns are computed from consecutive prices.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReturnKind {
  /// `p_t / p_{t-1} - 1`
  #[default]
  Simple,
  /// `ln(p_t / p_{t-1})`
  Log,
}

impl ReturnKind {
  pub fn compute(self, prev: f64, next: f64) -> f64 {
    match self {
      ReturnKind::Simple => next / prev - 1.0,
      ReturnKind::Log => (next / prev).ln(),
    }
  }
}

/// Annualization and risk-free conventions.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct MarketConventions {
  /// Scale factor from periodic to annual figures.
  pub periods_per_year: f64,
  /// Annualized risk-free rate.
  pub risk_free: f64,
}

impl MarketConventions {
  pub fn for_interval(interval: Interval, risk_free: f64) -> Self {
    Self {
      periods_per_year: interval.periods_per_year(),
      risk_free,
    }
  }
}

impl Default for MarketConventions {
  fn default() -> Self {
    Self::for_interval(Interval::Daily, 0.0)
  }
}

/// Estimation window over the aligned return matrix.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lookback {
  /// All aligned observations.
  #[default]
  Full,
  /// The most recent `n` observations.
  Periods(usize),
}

/// Risk-model estimation settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EstimatorConfig {
  /// Shrinkage intensity toward the diagonal, in `[0, 1]`.
  pub shrinkage: f64,
  /// Fall back to the Moore-Penrose pseudo-inverse when the shrunk covariance is
  /// singular, flagging the result as degraded.
  pub allow_pseudo_inverse: bool,
  /// Singular-value cutoff for the pseudo-inverse.
  pub pseudo_inverse_eps: f64,
}

impl Default for EstimatorConfig {
  fn default() -> Self {
    Self {
      shrinkage: 0.0,
      allow_pseudo_inverse: true,
      pseudo_inverse_eps: 1e-12,
    }
  }
}

/// Numerical settings shared by the optimizers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
  /// Iteration cap for every iterative solve.
  pub max_iters: usize,
  /// Step tolerance (max-norm) for projected-gradient convergence.
  pub tolerance: f64,
  /// Maximum pairwise spread of risk-contribution shares for risk parity.
  pub risk_parity_tolerance: f64,
  /// Relative weight of the proximal pull toward equal weights that selects a
  /// unique optimum among ties.
  pub tie_break: f64,
  /// Optional wall-clock cap per solve.
  pub time_limit: Option<Duration>,
}

impl Default for SolverConfig {
  fn default() -> Self {
    Self {
      max_iters: 20_000,
      tolerance: 1e-11,
      risk_parity_tolerance: 1e-8,
      tie_break: 1e-9,
      time_limit: None,
    }
  }
}

/// Price-series store settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoreConfig {
  pub return_kind: ReturnKind,
  pub interval: Interval,
  /// Minimum aligned observations per asset; the required total is
  /// `max(2, min_obs_per_asset * n_assets)`.
  pub min_obs_per_asset: usize,
}

impl Default for StoreConfig {
  fn default() -> Self {
    Self {
      return_kind: ReturnKind::Simple,
      interval: Interval::Daily,
      min_obs_per_asset: 2,
    }
  }
}

/// Simulation settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BacktestConfig {
  /// Proportional cost charged on traded notional at every rebalance.
  pub transaction_cost: f64,
  /// Return convention for the equity-curve statistics.
  pub return_kind: ReturnKind,
  pub conventions: MarketConventions,
}

impl Default for BacktestConfig {
  fn default() -> Self {
    Self {
      transaction_cost: 0.0,
      return_kind: ReturnKind::Simple,
      conventions: MarketConventions::default(),
    }
  }
}

/// Settings for portfolio analysis: estimation, optional re-optimization and the
/// as-held backtest.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
  pub estimator: EstimatorConfig,
  pub solver: SolverConfig,
  /// Costs and conventions of the as-held backtest. Its `return_kind` is replaced
  /// by the store's so estimation and simulation agree.
  pub backtest: BacktestConfig,
}
