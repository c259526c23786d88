//! # Risk Parity
//!
//! $$
//! RC_i=\frac{w_i(\Sigma\mathbf w)_i}{\mathbf w^\top\Sigma\mathbf w}=\frac1n
//! $$
//!
//! Equal risk contribution via cyclical coordinate descent on the log-barrier
//! problem `min ½ yᵀΣy - Σ bᵢ ln yᵢ`, whose solution normalized to the budget is the
//! equal-risk portfolio. Each coordinate update is the positive root of
//! `Σᵢᵢ yᵢ² + sᵢ yᵢ - bᵢ = 0` with `sᵢ = Σ_{j≠i} Σᵢⱼ yⱼ`.

use nalgebra::DVector;
use tracing::debug;

use super::constraints::Bounds;
use super::solver::Solution;
use crate::cancel::Budget;
use crate::config::SolverConfig;
use crate::error::EngineError;
use crate::error::Result;
use crate::risk::RiskModel;

fn spread(shares: &DVector<f64>) -> f64 {
  shares.max() - shares.min()
}

/// Equal-risk-contribution weights.
///
/// Fails with [`EngineError::Convergence`] when the contribution spread does not
/// fall below `config.risk_parity_tolerance` within the iteration cap, or when the
/// equal-risk portfolio violates the bounds.
pub(crate) fn equal_risk_contribution(
  model: &RiskModel,
  bounds: &Bounds,
  config: &SolverConfig,
  budget: &Budget<'_>,
) -> Result<Solution> {
  let cov = model.covariance();
  let n = model.n_assets();
  let target = 1.0 / n as f64;

  if let Some(i) = (0..n).find(|&i| cov[(i, i)] <= 0.0) {
    return Err(EngineError::Convergence {
      iterations: 0,
      residual: f64::INFINITY,
      reason: format!("asset {} has zero variance", model.symbols()[i]),
    });
  }

  // inverse-volatility start
  let mut y = DVector::from_fn(n, |i, _| 1.0 / cov[(i, i)].sqrt());
  let scale = y.sum();
  y /= scale;

  let mut residual = f64::INFINITY;
  for sweep in 0..config.max_iters {
    budget.tick(sweep, residual)?;

    for i in 0..n {
      let diag = cov[(i, i)];
      let s: f64 = (0..n).filter(|&j| j != i).map(|j| cov[(i, j)] * y[j]).sum();
      y[i] = (-s + (s * s + 4.0 * diag * target).sqrt()) / (2.0 * diag);
    }

    let w = &y / y.sum();
    residual = spread(&model.risk_contributions(&w));
    if !residual.is_finite() {
      break;
    }
    if residual <= config.risk_parity_tolerance {
      if !bounds.contains(&w, 1e-12) {
        return Err(EngineError::Convergence {
          iterations: sweep + 1,
          residual,
          reason: "equal risk contributions are not reachable within the weight bounds".into(),
        });
      }
      debug!(sweeps = sweep + 1, residual, "risk parity converged");
      return Ok(Solution {
        weights: w,
        iterations: sweep + 1,
      });
    }
  }

  Err(EngineError::Convergence {
    iterations: config.max_iters,
    residual,
    reason: "risk contributions did not equalize".into(),
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;
  use crate::cancel::CancelToken;
  use crate::config::EstimatorConfig;
  use crate::optimizers::constraints::Constraints;

  fn model(cov: Vec<Vec<f64>>) -> RiskModel {
    let n = cov.len();
    let symbols = (0..n).map(|i| format!("A{i}")).collect();
    RiskModel::from_parts(symbols, vec![0.05; n], cov, 252, &EstimatorConfig::default()).unwrap()
  }

  #[test]
  fn uncorrelated_assets_get_inverse_volatility() {
    let m = model(vec![vec![0.04, 0.0], vec![0.0, 0.16]]);
    let bounds = Constraints::long_only().resolve(2).unwrap();
    let token = CancelToken::new();
    let budget = Budget::new(&token, None);

    let sol = equal_risk_contribution(&m, &bounds, &SolverConfig::default(), &budget).unwrap();
    // 1/0.2 : 1/0.4 = 2 : 1
    assert_abs_diff_eq!(sol.weights[0], 2.0 / 3.0, epsilon = 1e-8);
    assert_abs_diff_eq!(sol.weights[1], 1.0 / 3.0, epsilon = 1e-8);
  }

  #[test]
  fn contributions_equalize_with_correlation() {
    let m = model(vec![
      vec![0.040, 0.012, 0.006],
      vec![0.012, 0.090, 0.027],
      vec![0.006, 0.027, 0.160],
    ]);
    let bounds = Constraints::long_only().resolve(3).unwrap();
    let token = CancelToken::new();
    let budget = Budget::new(&token, None);

    let sol = equal_risk_contribution(&m, &bounds, &SolverConfig::default(), &budget).unwrap();
    let rc = m.risk_contributions(&sol.weights);
    for share in rc.iter() {
      assert_abs_diff_eq!(*share, 1.0 / 3.0, epsilon = 1e-6);
    }
    assert_abs_diff_eq!(sol.weights.sum(), 1.0, epsilon = 1e-12);
  }

  #[test]
  fn binding_bounds_are_a_convergence_error() {
    let m = model(vec![vec![0.04, 0.0], vec![0.0, 0.16]]);
    let bounds = Constraints::uniform(2, 0.0, 0.6).resolve(2).unwrap();
    let token = CancelToken::new();
    let budget = Budget::new(&token, None);

    let err = equal_risk_contribution(&m, &bounds, &SolverConfig::default(), &budget).unwrap_err();
    assert!(matches!(err, EngineError::Convergence { .. }));
  }

  #[test]
  fn zero_variance_asset_is_rejected() {
    let m = model(vec![vec![0.04, 0.0], vec![0.0, 0.0]]);
    let bounds = Constraints::long_only().resolve(2).unwrap();
    let token = CancelToken::new();
    let budget = Budget::new(&token, None);

    let err = equal_risk_contribution(&m, &bounds, &SolverConfig::default(), &budget).unwrap_err();
    assert!(matches!(err, EngineError::Convergence { iterations: 0, .. }));
  }
}
