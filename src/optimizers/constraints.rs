//! # Constraints
//!
//! $$
//! \mathbf 1^\top \mathbf w = 1,\qquad \ell_i \le w_i \le u_i,\qquad
//! \mu^\top \mathbf w = r^\*\ \text{(optional)}
//! $$
//!
//! Caller-supplied bounds and targets, resolved against a universe size.

use std::cmp::Ordering;

use nalgebra::DVector;
use serde::Deserialize;
use serde::Serialize;

use crate::error::EngineError;
use crate::error::Result;

/// Absolute slack used for budget and target feasibility checks.
pub(crate) const FEASIBILITY_TOL: f64 = 1e-9;

/// Allocation constraints. Empty bound vectors mean long-only `[0, 1]` per asset.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Constraints {
  /// Per-asset lower bounds.
  pub lower: Vec<f64>,
  /// Per-asset upper bounds.
  pub upper: Vec<f64>,
  /// Required portfolio return for [`crate::Objective::TargetReturn`].
  pub target_return: Option<f64>,
  /// Cap on portfolio volatility.
  pub target_risk: Option<f64>,
}

impl Constraints {
  /// Long-only, fully invested.
  pub fn long_only() -> Self {
    Self::default()
  }

  /// Same `[lower, upper]` band for each of `n` assets.
  pub fn uniform(n: usize, lower: f64, upper: f64) -> Self {
    Self {
      lower: vec![lower; n],
      upper: vec![upper; n],
      ..Self::default()
    }
  }

  pub fn with_bounds(lower: Vec<f64>, upper: Vec<f64>) -> Self {
    Self {
      lower,
      upper,
      ..Self::default()
    }
  }

  pub fn with_target_return(mut self, target: f64) -> Self {
    self.target_return = Some(target);
    self
  }

  pub fn with_target_risk(mut self, cap: f64) -> Self {
    self.target_risk = Some(cap);
    self
  }

  /// Bounds for `n` assets, validated against the budget constraint.
  pub(crate) fn resolve(&self, n: usize) -> Result<Bounds> {
    let lower = if self.lower.is_empty() {
      vec![0.0; n]
    } else {
      self.lower.clone()
    };
    let upper = if self.upper.is_empty() {
      vec![1.0; n]
    } else {
      self.upper.clone()
    };

    if lower.len() != n || upper.len() != n {
      return Err(EngineError::invalid(format!(
        "bounds sized {}/{} for {n} assets",
        lower.len(),
        upper.len()
      )));
    }
    for (i, (lo, hi)) in lower.iter().zip(&upper).enumerate() {
      if !lo.is_finite() || !hi.is_finite() {
        return Err(EngineError::invalid(format!("bounds of asset {i} must be finite")));
      }
      if lo > hi {
        return Err(EngineError::invalid(format!(
          "lower bound {lo} above upper bound {hi} for asset {i}"
        )));
      }
    }
    if let Some(t) = self.target_return {
      if !t.is_finite() {
        return Err(EngineError::invalid("target return must be finite"));
      }
    }
    if let Some(cap) = self.target_risk {
      if !(cap.is_finite() && cap >= 0.0) {
        return Err(EngineError::invalid("target risk must be a non-negative number"));
      }
    }

    let lo_sum: f64 = lower.iter().sum();
    let hi_sum: f64 = upper.iter().sum();
    if lo_sum > 1.0 + FEASIBILITY_TOL {
      return Err(EngineError::infeasible(format!(
        "lower bounds sum to {lo_sum:.6} > 1"
      )));
    }
    if hi_sum < 1.0 - FEASIBILITY_TOL {
      return Err(EngineError::infeasible(format!(
        "upper bounds sum to {hi_sum:.6} < 1"
      )));
    }

    Ok(Bounds {
      lower: DVector::from_vec(lower),
      upper: DVector::from_vec(upper),
    })
  }
}

/// Resolved per-asset bounds.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Bounds {
  pub lower: DVector<f64>,
  pub upper: DVector<f64>,
}

impl Bounds {
  pub(crate) fn len(&self) -> usize {
    self.lower.len()
  }

  pub(crate) fn contains(&self, w: &DVector<f64>, tol: f64) -> bool {
    w.iter()
      .zip(self.lower.iter().zip(self.upper.iter()))
      .all(|(x, (lo, hi))| *x >= lo - tol && *x <= hi + tol)
  }

  /// Fully invested portfolio with the extreme return reachable inside the bounds:
  /// start from the lower bounds and fill the remaining budget in `mu` order.
  pub(crate) fn extreme_portfolio(&self, mu: &DVector<f64>, maximize: bool) -> DVector<f64> {
    let n = self.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| {
      let ord = mu[a].partial_cmp(&mu[b]).unwrap_or(Ordering::Equal);
      let ord = if maximize { ord.reverse() } else { ord };
      ord.then(a.cmp(&b))
    });

    let mut w = self.lower.clone();
    let mut remaining = 1.0 - w.sum();
    for i in order {
      if remaining <= 0.0 {
        break;
      }
      let add = (self.upper[i] - self.lower[i]).min(remaining);
      w[i] += add;
      remaining -= add;
    }
    w
  }

  /// `[min, max]` portfolio return reachable under the bounds and budget.
  pub(crate) fn return_range(&self, mu: &DVector<f64>) -> (f64, f64) {
    let lo = self.extreme_portfolio(mu, false).dot(mu);
    let hi = self.extreme_portfolio(mu, true).dot(mu);
    (lo, hi)
  }
}
