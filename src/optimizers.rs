//! # Optimizers
//!
//! $$
//! \mathbf w^\*=\arg\min_{\mathbf w\in\mathcal C} f_{\text{objective}}(\mathbf w;\mu,\Sigma),\qquad
//! \mathcal C=\{\mathbf 1^\top\mathbf w=1,\ \ell\le\mathbf w\le u\}
//! $$
//!
//! Constrained allocation for the four supported objectives.

pub mod constraints;
pub mod frontier;
pub(crate) mod mean_variance;
pub(crate) mod projection;
pub(crate) mod risk_parity;
pub(crate) mod solver;

use nalgebra::DVector;
use tracing::debug;
use tracing::info_span;

pub use self::constraints::Constraints;
pub use self::frontier::efficient_frontier;
pub use self::frontier::FrontierPoint;
use self::constraints::Bounds;
use self::constraints::FEASIBILITY_TOL;
use self::mean_variance::MeanVariance;
use self::risk_parity::equal_risk_contribution;
use self::solver::Solution;
use crate::cancel::Budget;
use crate::cancel::CancelToken;
use crate::config::SolverConfig;
use crate::error::EngineError;
use crate::error::Result;
use crate::risk::RiskModel;
use crate::types::AllocationResult;
use crate::types::Objective;

/// Optimize `model` under `constraints` for `objective`.
///
/// Deterministic: identical inputs give identical weights. `risk_free` is the
/// annualized rate used by [`Objective::MaxSharpe`] and the reported Sharpe ratio.
pub fn optimize(
  model: &RiskModel,
  constraints: &Constraints,
  objective: Objective,
  risk_free: f64,
  config: &SolverConfig,
  cancel: &CancelToken,
) -> Result<AllocationResult> {
  let n = model.n_assets();
  let _span = info_span!("optimize", ?objective, assets = n).entered();

  let bounds = constraints.resolve(n)?;
  cancel.check()?;
  let budget = Budget::new(cancel, config.time_limit);

  let solution = if n == 1 {
    single_asset(model, constraints, objective)?
  } else {
    match objective {
      Objective::MinVariance => MeanVariance::new(model, &bounds, config).min_variance(&budget)?,
      Objective::TargetReturn => {
        let target = constraints.target_return.ok_or_else(|| {
          EngineError::invalid("target-return objective requires a target return")
        })?;
        MeanVariance::new(model, &bounds, config).at_return(target, None, &budget)?
      }
      Objective::MaxSharpe => MeanVariance::new(model, &bounds, config).max_sharpe(
        risk_free,
        constraints.target_risk,
        &budget,
      )?,
      Objective::RiskParity => equal_risk_contribution(model, &bounds, config, &budget)?,
    }
  };

  check_solution(model, &bounds, constraints, &solution.weights)?;

  let result = AllocationResult::from_weights(
    model,
    &solution.weights,
    objective,
    risk_free,
    solution.iterations,
  );
  debug!(
    expected_return = result.expected_return,
    volatility = result.volatility,
    sharpe = result.sharpe,
    iterations = result.iterations,
    "allocation complete"
  );
  Ok(result)
}

fn single_asset(
  model: &RiskModel,
  constraints: &Constraints,
  objective: Objective,
) -> Result<Solution> {
  if objective == Objective::TargetReturn {
    let target = constraints
      .target_return
      .ok_or_else(|| EngineError::invalid("target-return objective requires a target return"))?;
    let mu = model.expected_returns()[0];
    if (target - mu).abs() > FEASIBILITY_TOL * target.abs().max(1.0) {
      return Err(EngineError::infeasible(format!(
        "single-asset portfolio returns {mu:.6}, target is {target:.6}"
      )));
    }
  }
  Ok(Solution {
    weights: DVector::from_element(1, 1.0),
    iterations: 0,
  })
}

fn check_solution(
  model: &RiskModel,
  bounds: &Bounds,
  constraints: &Constraints,
  weights: &DVector<f64>,
) -> Result<()> {
  let total = weights.sum();
  if (total - 1.0).abs() > FEASIBILITY_TOL || !bounds.contains(weights, FEASIBILITY_TOL) {
    return Err(EngineError::Convergence {
      iterations: 0,
      residual: (total - 1.0).abs(),
      reason: "solver returned an infeasible portfolio".into(),
    });
  }
  if let Some(cap) = constraints.target_risk {
    let vol = model.portfolio_volatility(weights);
    if vol > cap + FEASIBILITY_TOL {
      return Err(EngineError::infeasible(format!(
        "portfolio volatility {vol:.6} exceeds target risk {cap:.6}"
      )));
    }
  }
  Ok(())
}
