//! # Performance Statistics
//!
//! $$
//! \text{MDD}=\min_t\frac{V_t-\max_{s\le t}V_s}{\max_{s\le t}V_s},\qquad
//! \text{SR}=\frac{R^{ann}-r_f}{\sigma\sqrt{k}}
//! $$
//!
//! Summary statistics over an equity curve.

use serde::Deserialize;
use serde::Serialize;
use statrs::statistics::Statistics;

use crate::config::MarketConventions;
use crate::config::ReturnKind;

/// Risk/return summary of an equity curve.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
  /// `final / initial - 1`.
  pub cumulative_return: f64,
  /// Geometric annualization of the cumulative return.
  pub annualized_return: f64,
  /// Sample standard deviation of periodic returns times `sqrt(periods_per_year)`.
  pub annualized_volatility: f64,
  /// Zero when the volatility is zero.
  pub sharpe: f64,
  /// Signed peak-to-trough decline, always `<= 0`.
  pub max_drawdown: f64,
}

impl PerformanceStats {
  /// Statistics of `values`, which must hold at least two points.
  pub fn from_values(values: &[f64], kind: ReturnKind, conventions: &MarketConventions) -> Self {
    let periods = values.len().saturating_sub(1);
    let (first, last) = match (values.first(), values.last()) {
      (Some(&f), Some(&l)) if periods > 0 && f > 0.0 => (f, l),
      _ => return Self::default(),
    };

    let cumulative_return = last / first - 1.0;
    let growth = last / first;
    let annualized_return = if growth > 0.0 {
      growth.powf(conventions.periods_per_year / periods as f64) - 1.0
    } else {
      -1.0
    };

    let returns = periodic_returns(values, kind);
    let annualized_volatility = if returns.len() > 1 {
      returns.iter().std_dev() * conventions.periods_per_year.sqrt()
    } else {
      0.0
    };
    let sharpe = if annualized_volatility > f64::EPSILON {
      (annualized_return - conventions.risk_free) / annualized_volatility
    } else {
      0.0
    };

    Self {
      cumulative_return,
      annualized_return,
      annualized_volatility,
      sharpe,
      max_drawdown: max_drawdown(values),
    }
  }
}

pub fn periodic_returns(values: &[f64], kind: ReturnKind) -> Vec<f64> {
  values
    .windows(2)
    .map(|w| kind.compute(w[0], w[1]))
    .collect()
}

/// Signed maximum drawdown; zero for a non-decreasing curve.
pub fn max_drawdown(values: &[f64]) -> f64 {
  let mut peak = f64::NEG_INFINITY;
  let mut worst = 0.0_f64;
  for &v in values {
    peak = peak.max(v);
    if peak > 0.0 {
      worst = worst.min((v - peak) / peak);
    }
  }
  worst
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use approx::assert_relative_eq;

  use super::*;

  #[test]
  fn drawdown_is_signed() {
    assert_eq!(max_drawdown(&[100.0, 101.0, 105.0, 110.0]), 0.0);
    assert_relative_eq!(max_drawdown(&[100.0, 120.0, 90.0, 130.0, 117.0]), -0.25);
  }

  #[test]
  fn flat_curve_has_zero_sharpe() {
    let s = PerformanceStats::from_values(
      &[100.0, 100.0, 100.0],
      ReturnKind::Simple,
      &MarketConventions::default(),
    );
    assert_eq!(s.annualized_volatility, 0.0);
    assert_eq!(s.sharpe, 0.0);
    assert_eq!(s.max_drawdown, 0.0);
  }

  #[test]
  fn annualization() {
    let conventions = MarketConventions {
      periods_per_year: 12.0,
      risk_free: 0.01,
    };
    // twelve monthly points: eleven periods
    let values: Vec<f64> = (0..12).map(|i| 100.0 * 1.01_f64.powi(i)).collect();
    let s = PerformanceStats::from_values(&values, ReturnKind::Simple, &conventions);

    assert_relative_eq!(s.cumulative_return, 1.01_f64.powi(11) - 1.0, epsilon = 1e-12);
    assert_relative_eq!(s.annualized_return, 1.01_f64.powi(12) - 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(s.annualized_volatility, 0.0, epsilon = 1e-12);
  }
}
