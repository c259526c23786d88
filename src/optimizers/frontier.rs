//! # Efficient Frontier
//!
//! $$
//! \sigma^\*(r)=\min\{\sqrt{\mathbf w^\top\Sigma\mathbf w}:\ \mu^\top\mathbf w=r,\ \mathbf w\in\mathcal C\},
//! \quad r\in[r_{mv},\,r_{max}]
//! $$
//!
//! Evenly spaced target-return portfolios from the minimum-variance point to the
//! highest achievable return, solved in parallel.

use rayon::prelude::*;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;

use super::constraints::Constraints;
use super::mean_variance::MeanVariance;
use crate::cancel::Budget;
use crate::cancel::CancelToken;
use crate::config::SolverConfig;
use crate::error::EngineError;
use crate::error::Result;
use crate::risk::RiskModel;
use crate::types::AllocationResult;
use crate::types::Objective;

/// One portfolio on the efficient frontier.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FrontierPoint {
  pub target_return: f64,
  pub allocation: AllocationResult,
}

/// Trace `points` portfolios along the efficient frontier.
pub fn efficient_frontier(
  model: &RiskModel,
  constraints: &Constraints,
  points: usize,
  risk_free: f64,
  config: &SolverConfig,
  cancel: &CancelToken,
) -> Result<Vec<FrontierPoint>> {
  if points == 0 {
    return Err(EngineError::invalid("frontier needs at least one point"));
  }
  let bounds = constraints.resolve(model.n_assets())?;
  let solver = MeanVariance::new(model, &bounds, config);

  let budget = Budget::new(cancel, config.time_limit);
  let floor = solver.min_variance(&budget)?;
  let r_lo = model.portfolio_return(&floor.weights);
  let (_, r_hi) = solver.return_range();
  let r_hi = r_hi.max(r_lo);

  let targets: Vec<f64> = if points == 1 {
    vec![r_lo]
  } else {
    (0..points)
      .map(|k| r_lo + (r_hi - r_lo) * k as f64 / (points - 1) as f64)
      .collect()
  };
  info!(points, r_lo, r_hi, "tracing efficient frontier");

  targets
    .par_iter()
    .map(|&target| {
      let budget = Budget::new(cancel, config.time_limit);
      let solution = solver.at_return(target, Some(&floor.weights), &budget)?;
      Ok(FrontierPoint {
        target_return: target,
        allocation: AllocationResult::from_weights(
          model,
          &solution.weights,
          Objective::TargetReturn,
          risk_free,
          solution.iterations,
        ),
      })
    })
    .collect()
}
