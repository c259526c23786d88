//! # Portfolio Types
//!
//! $$
//! \mathbf{w}^\*=\arg\max_{\mathbf{w}} \frac{\mathbb E[R_p]-r_f}{\sigma_p}
//! $$
//!
//! Shared enums and result containers for portfolio optimization.

use nalgebra::DVector;
use serde::Deserialize;
use serde::Serialize;

use crate::risk::RiskModel;

/// Supported allocation objectives.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Objective {
  /// Minimize `wᵀΣw` subject to the budget and bounds.
  MinVariance,
  /// Maximize `(wᵀμ - r_f) / sqrt(wᵀΣw)`.
  MaxSharpe,
  /// Minimize variance at the constrained target return.
  TargetReturn,
  /// Equalize every asset's share of portfolio variance.
  RiskParity,
}

/// Output of a portfolio optimization run.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AllocationResult {
  /// Asset identifiers, aligned with `weights`.
  pub symbols: Vec<String>,
  /// Final portfolio weights, summing to one.
  pub weights: Vec<f64>,
  /// Model expected portfolio return (annualized).
  pub expected_return: f64,
  /// Model portfolio volatility (annualized).
  pub volatility: f64,
  /// `(expected_return - risk_free) / volatility`, zero when volatility is zero.
  pub sharpe: f64,
  /// Share of portfolio variance contributed by each asset.
  pub risk_contributions: Vec<f64>,
  /// Objective that produced the weights.
  pub objective: Objective,
  /// Solver iterations spent.
  pub iterations: usize,
  /// The risk model relied on the pseudo-inverse fallback.
  pub degraded: bool,
}

impl AllocationResult {
  pub(crate) fn from_weights(
    model: &RiskModel,
    weights: &DVector<f64>,
    objective: Objective,
    risk_free: f64,
    iterations: usize,
  ) -> Self {
    let expected_return = model.portfolio_return(weights);
    let volatility = model.portfolio_volatility(weights);

    Self {
      symbols: model.symbols().to_vec(),
      weights: weights.iter().copied().collect(),
      expected_return,
      volatility,
      sharpe: sharpe_ratio(expected_return, volatility, risk_free),
      risk_contributions: model.risk_contributions(weights).iter().copied().collect(),
      objective,
      iterations,
      degraded: model.is_degraded(),
    }
  }

  /// Weight of `symbol`, if it is part of the allocation.
  pub fn weight(&self, symbol: &str) -> Option<f64> {
    self
      .symbols
      .iter()
      .position(|s| s == symbol)
      .map(|i| self.weights[i])
  }

  /// `(symbol, weight)` pairs.
  pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
    self
      .symbols
      .iter()
      .map(String::as_str)
      .zip(self.weights.iter().copied())
  }

  pub fn weights_vector(&self) -> DVector<f64> {
    DVector::from_column_slice(&self.weights)
  }
}

pub(crate) fn sharpe_ratio(ret: f64, vol: f64, risk_free: f64) -> f64 {
  if vol > 0.0 {
    (ret - risk_free) / vol
  } else {
    0.0
  }
}
