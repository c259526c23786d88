//! # Backtest Simulator
//!
//! $$
//! V_t=\sum_i q_{i}\,P_{t,i},\qquad
//! c_t=\kappa\sum_i\left|w_iV_t-q_iP_{t,i}\right|
//! $$
//!
//! Replays an allocation policy over an aligned price history. Holdings are kept in
//! units so weights drift with prices between rebalances; every reset to target
//! weights (including the initial allocation out of cash) pays a proportional cost
//! on traded notional.

pub mod policy;
pub mod stats;

use chrono::NaiveDate;
use nalgebra::DVector;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use tracing::instrument;

pub use self::policy::AllocationPolicy;
pub use self::policy::RebalanceFrequency;
pub use self::policy::WalkForward;
pub use self::policy::Window;
pub use self::stats::PerformanceStats;
use crate::cancel::CancelToken;
use crate::config::BacktestConfig;
use crate::data::PriceHistory;
use crate::error::EngineError;
use crate::error::Result;

/// One reset of holdings to target weights.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RebalanceEvent {
  pub date: NaiveDate,
  pub weights: Vec<f64>,
  /// Traded notional as a fraction of pre-trade portfolio value.
  pub turnover: f64,
  /// Cost deducted from portfolio value.
  pub cost: f64,
}

/// Outcome of a simulation. Built once, read-only afterwards.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
  symbols: Vec<String>,
  equity_curve: Vec<(NaiveDate, f64)>,
  initial_capital: f64,
  stats: PerformanceStats,
  total_turnover: f64,
  total_costs: f64,
  rebalances: Vec<RebalanceEvent>,
  degraded: bool,
}

impl BacktestResult {
  pub fn symbols(&self) -> &[String] {
    &self.symbols
  }

  /// `(date, portfolio value)` pairs, starting at the initial capital.
  pub fn equity_curve(&self) -> &[(NaiveDate, f64)] {
    &self.equity_curve
  }

  pub fn initial_capital(&self) -> f64 {
    self.initial_capital
  }

  pub fn final_value(&self) -> f64 {
    self
      .equity_curve
      .last()
      .map_or(self.initial_capital, |&(_, v)| v)
  }

  pub fn stats(&self) -> &PerformanceStats {
    &self.stats
  }

  pub fn cumulative_return(&self) -> f64 {
    self.stats.cumulative_return
  }

  pub fn annualized_return(&self) -> f64 {
    self.stats.annualized_return
  }

  pub fn annualized_volatility(&self) -> f64 {
    self.stats.annualized_volatility
  }

  pub fn sharpe(&self) -> f64 {
    self.stats.sharpe
  }

  pub fn max_drawdown(&self) -> f64 {
    self.stats.max_drawdown
  }

  pub fn total_turnover(&self) -> f64 {
    self.total_turnover
  }

  pub fn total_costs(&self) -> f64 {
    self.total_costs
  }

  pub fn rebalances(&self) -> &[RebalanceEvent] {
    &self.rebalances
  }

  /// Some rebalance relied on a pseudo-inverse risk model.
  pub fn is_degraded(&self) -> bool {
    self.degraded
  }
}

struct Trade {
  units: DVector<f64>,
  turnover: f64,
  cost: f64,
}

/// Move from `units` to `target` weights at `prices`, paying `rate` on traded notional.
fn rebalance(
  units: &DVector<f64>,
  prices: &DVector<f64>,
  target: &DVector<f64>,
  value: f64,
  rate: f64,
) -> Trade {
  let held = units.component_mul(prices);
  let traded: f64 = target
    .iter()
    .zip(held.iter())
    .map(|(w, h)| (w * value - h).abs())
    .sum();
  let cost = rate * traded;
  let invested = value - cost;

  Trade {
    units: (target * invested).component_div(prices),
    turnover: if value != 0.0 { traded / value } else { 0.0 },
    cost,
  }
}

/// Simulate `policy` over `history` starting from `initial_capital`.
///
/// The final date is never a rebalance date. Fails with
/// [`EngineError::EmptyHistory`] when fewer than two dates are available to
/// simulate, and with [`EngineError::Cancelled`] when `cancel` fires.
#[instrument(skip_all, fields(assets = history.n_assets(), dates = history.len()))]
pub fn simulate(
  policy: &AllocationPolicy,
  history: &PriceHistory,
  initial_capital: f64,
  frequency: RebalanceFrequency,
  config: &BacktestConfig,
  cancel: &CancelToken,
) -> Result<BacktestResult> {
  if history.len() < 2 {
    return Err(EngineError::EmptyHistory(history.len()));
  }
  if !(initial_capital.is_finite() && initial_capital > 0.0) {
    return Err(EngineError::invalid("initial capital must be positive"));
  }
  if !(config.transaction_cost.is_finite() && (0.0..1.0).contains(&config.transaction_cost)) {
    return Err(EngineError::invalid("transaction cost must lie in [0, 1)"));
  }
  if config.conventions.periods_per_year <= 0.0 {
    return Err(EngineError::invalid("periods per year must be positive"));
  }
  frequency.validate()?;
  policy.validate(history.n_assets())?;

  let start = policy.start();
  let last = history.len() - 1;
  if start >= last {
    return Err(EngineError::EmptyHistory(history.len().saturating_sub(start)));
  }

  let dates = history.dates();
  let prices_at =
    |t: usize| DVector::from_iterator(history.n_assets(), history.row(t).iter().copied());
  let rate = config.transaction_cost;

  let mut rebalances = Vec::new();
  let mut degraded = false;

  cancel.check()?;
  let (target, flag) = policy.target(history, start, config, cancel)?;
  degraded |= flag;
  let trade = rebalance(
    &DVector::zeros(history.n_assets()),
    &prices_at(start),
    &target,
    initial_capital,
    rate,
  );
  let mut units = trade.units;
  rebalances.push(RebalanceEvent {
    date: dates[start],
    weights: target.iter().copied().collect(),
    turnover: trade.turnover,
    cost: trade.cost,
  });

  let mut curve = Vec::with_capacity(history.len() - start);
  curve.push((dates[start], initial_capital));

  for t in start + 1..=last {
    cancel.check()?;
    let prices = prices_at(t);
    let mut value = units.dot(&prices);

    if t < last && frequency.is_boundary(dates, start, t) {
      let (target, flag) = policy.target(history, t, config, cancel)?;
      degraded |= flag;
      let trade = rebalance(&units, &prices, &target, value, rate);
      value -= trade.cost;
      units = trade.units;
      rebalances.push(RebalanceEvent {
        date: dates[t],
        weights: target.iter().copied().collect(),
        turnover: trade.turnover,
        cost: trade.cost,
      });
    }
    curve.push((dates[t], value));
  }

  let values: Vec<f64> = curve.iter().map(|&(_, v)| v).collect();
  let stats = PerformanceStats::from_values(&values, config.return_kind, &config.conventions);
  let total_turnover = rebalances.iter().map(|e| e.turnover).sum();
  let total_costs = rebalances.iter().map(|e| e.cost).sum();

  info!(
    final_value = values[values.len() - 1],
    cumulative_return = stats.cumulative_return,
    sharpe = stats.sharpe,
    max_drawdown = stats.max_drawdown,
    rebalances = rebalances.len(),
    "backtest complete"
  );

  Ok(BacktestResult {
    symbols: history.symbols().to_vec(),
    equity_curve: curve,
    initial_capital,
    stats,
    total_turnover,
    total_costs,
    rebalances,
    degraded,
  })
}
