//! # Mean-Variance
//!
//! $$
//! \min_{\mathbf w}\ \mathbf w^\top\Sigma\mathbf w\quad\text{s.t.}\quad
//! \mathbf 1^\top\mathbf w=1,\ \ell\le\mathbf w\le u,\ \mu^\top\mathbf w=r^\*
//! $$
//!
//! Minimum-variance, target-return and maximum-Sharpe portfolios. The tangency
//! portfolio is located by a golden-section search over the target return, since
//! the Sharpe ratio is quasi-concave along the efficient frontier.

use nalgebra::DVector;
use tracing::debug;
use tracing::warn;

use super::constraints::Bounds;
use super::constraints::FEASIBILITY_TOL;
use super::projection::project_budget;
use super::projection::project_budget_return;
use super::solver::minimize;
use super::solver::RegularizedVariance;
use super::solver::Solution;
use crate::cancel::Budget;
use crate::config::SolverConfig;
use crate::error::EngineError;
use crate::error::Result;
use crate::risk::RiskModel;
use crate::types::sharpe_ratio;

const GOLDEN: f64 = 0.618_033_988_749_894_9;
const MAX_SEARCH_STEPS: usize = 200;

/// A solved point on the frontier.
#[derive(Clone, Debug)]
pub(crate) struct Candidate {
  pub solution: Solution,
  pub ret: f64,
  pub vol: f64,
  pub sharpe: f64,
}

pub(crate) struct MeanVariance<'a> {
  model: &'a RiskModel,
  bounds: &'a Bounds,
  config: &'a SolverConfig,
  problem: RegularizedVariance<'a>,
}

impl<'a> MeanVariance<'a> {
  pub(crate) fn new(model: &'a RiskModel, bounds: &'a Bounds, config: &'a SolverConfig) -> Self {
    Self {
      model,
      bounds,
      config,
      problem: RegularizedVariance::new(model.covariance(), config.tie_break),
    }
  }

  fn candidate(&self, solution: Solution, risk_free: f64) -> Candidate {
    let ret = self.model.portfolio_return(&solution.weights);
    let vol = self.model.portfolio_volatility(&solution.weights);
    let sharpe = if vol > 0.0 {
      sharpe_ratio(ret, vol, risk_free)
    } else if ret > risk_free {
      f64::INFINITY
    } else {
      0.0
    };
    Candidate {
      solution,
      ret,
      vol,
      sharpe,
    }
  }

  /// Achievable `[min, max]` portfolio return.
  pub(crate) fn return_range(&self) -> (f64, f64) {
    self.bounds.return_range(self.model.expected_returns())
  }

  pub(crate) fn min_variance(&self, budget: &Budget<'_>) -> Result<Solution> {
    let bounds = self.bounds;
    minimize(
      &self.problem,
      |v| project_budget(v, bounds),
      self.problem.anchor(),
      self.problem.lipschitz(),
      self.config,
      budget,
    )
  }

  /// Minimum variance at `μᵀw = target`, warm-started from `warm` when given.
  pub(crate) fn at_return(
    &self,
    target: f64,
    warm: Option<&DVector<f64>>,
    budget: &Budget<'_>,
  ) -> Result<Solution> {
    let (lo, hi) = self.return_range();
    let slack = FEASIBILITY_TOL * target.abs().max(1.0);
    if target > hi + slack || target < lo - slack {
      return Err(EngineError::infeasible(format!(
        "target return {target:.6} outside achievable range [{lo:.6}, {hi:.6}]"
      )));
    }
    let target = target.clamp(lo, hi);
    let mu = self.model.expected_returns();
    let bounds = self.bounds;

    minimize(
      &self.problem,
      |v| project_budget_return(v, bounds, mu, target),
      warm.unwrap_or(self.problem.anchor()),
      self.problem.lipschitz(),
      self.config,
      budget,
    )
  }

  /// Maximum Sharpe ratio, optionally capped at volatility `vol_cap`.
  ///
  /// Golden-section search over the target return on `[max(r_mv, r_f), r_max]`.
  /// Along the bounded frontier the Sharpe ratio is unimodal in the target return,
  /// so the search needs no rescaled bounds.
  pub(crate) fn max_sharpe(
    &self,
    risk_free: f64,
    vol_cap: Option<f64>,
    budget: &Budget<'_>,
  ) -> Result<Solution> {
    let floor = self.candidate(self.min_variance(budget)?, risk_free);
    let mut spent = floor.solution.iterations;
    if let Some(cap) = vol_cap {
      if floor.vol > cap + FEASIBILITY_TOL {
        return Err(EngineError::infeasible(format!(
          "minimum achievable volatility {:.6} exceeds target risk {cap:.6}",
          floor.vol
        )));
      }
    }

    let (_, r_max) = self.return_range();
    if r_max <= risk_free {
      warn!(
        r_max,
        risk_free, "no portfolio earns above the risk-free rate, falling back to minimum variance"
      );
      return Ok(floor.solution);
    }

    let warm = floor.solution.weights.clone();
    let mut evaluate = |target: f64| -> Result<Candidate> {
      let solution = self.at_return(target, Some(&warm), budget)?;
      spent += solution.iterations;
      Ok(self.candidate(solution, risk_free))
    };

    let mut a = floor.ret.max(risk_free).min(r_max);
    let mut b = r_max;
    let mut best = evaluate(b)?;
    if b - a > FEASIBILITY_TOL {
      let mut c = b - GOLDEN * (b - a);
      let mut d = a + GOLDEN * (b - a);
      let mut fc = evaluate(c)?;
      let mut fd = evaluate(d)?;

      for _ in 0..MAX_SEARCH_STEPS {
        if b - a <= self.config.tolerance * a.abs().max(b.abs()).max(1.0) {
          break;
        }
        if fc.sharpe >= fd.sharpe {
          b = d;
          d = c;
          fd = fc;
          c = b - GOLDEN * (b - a);
          fc = evaluate(c)?;
        } else {
          a = c;
          c = d;
          fc = fd;
          d = a + GOLDEN * (b - a);
          fd = evaluate(d)?;
        }
        for point in [&fc, &fd] {
          if point.sharpe > best.sharpe {
            best = point.clone();
          }
        }
      }
    }
    if floor.sharpe > best.sharpe {
      best = floor.clone();
    }

    if let Some(cap) = vol_cap {
      if best.vol > cap + FEASIBILITY_TOL {
        // Sharpe rises along the frontier up to the tangency point, so the best
        // capped portfolio is the highest return whose volatility fits.
        let (mut lo, mut hi) = (floor.clone(), best);
        for _ in 0..MAX_SEARCH_STEPS {
          if hi.ret - lo.ret <= self.config.tolerance * hi.ret.abs().max(1.0) {
            break;
          }
          let mid = evaluate(0.5 * (lo.ret + hi.ret))?;
          if mid.vol <= cap {
            lo = mid;
          } else {
            hi = mid;
          }
        }
        best = lo;
      }
    }

    debug!(
      ret = best.ret,
      vol = best.vol,
      sharpe = best.sharpe,
      "tangency portfolio located"
    );
    Ok(Solution {
      weights: best.solution.weights,
      iterations: spent,
    })
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;
  use crate::cancel::CancelToken;
  use crate::config::EstimatorConfig;
  use crate::optimizers::constraints::Constraints;

  fn model(mu: Vec<f64>, cov: Vec<Vec<f64>>) -> RiskModel {
    let symbols = (0..mu.len()).map(|i| format!("A{i}")).collect();
    RiskModel::from_parts(symbols, mu, cov, 252, &EstimatorConfig::default()).unwrap()
  }

  #[test]
  fn unconstrained_tangency_matches_closed_form() {
    // Uncorrelated assets: w ∝ Σ⁻¹(μ - r_f) = ((0.10-0.02)/0.04, (0.15-0.02)/0.09).
    let m = model(vec![0.10, 0.15], vec![vec![0.04, 0.0], vec![0.0, 0.09]]);
    let bounds = Constraints::long_only().resolve(2).unwrap();
    let config = SolverConfig::default();
    let token = CancelToken::new();
    let budget = Budget::new(&token, None);

    let sol = MeanVariance::new(&m, &bounds, &config)
      .max_sharpe(0.02, None, &budget)
      .unwrap();

    let raw = [0.08 / 0.04, 0.13 / 0.09];
    let total: f64 = raw.iter().sum();
    assert_abs_diff_eq!(sol.weights[0], raw[0] / total, epsilon = 1e-6);
    assert_abs_diff_eq!(sol.weights[1], raw[1] / total, epsilon = 1e-6);
  }

  #[test]
  fn target_return_is_met() {
    let m = model(
      vec![0.05, 0.10, 0.20],
      vec![
        vec![0.010, 0.002, 0.001],
        vec![0.002, 0.040, 0.010],
        vec![0.001, 0.010, 0.090],
      ],
    );
    let bounds = Constraints::long_only().resolve(3).unwrap();
    let config = SolverConfig::default();
    let token = CancelToken::new();
    let budget = Budget::new(&token, None);

    let sol = MeanVariance::new(&m, &bounds, &config)
      .at_return(0.12, None, &budget)
      .unwrap();
    assert_abs_diff_eq!(m.portfolio_return(&sol.weights), 0.12, epsilon = 1e-9);
    assert_abs_diff_eq!(sol.weights.sum(), 1.0, epsilon = 1e-12);
  }

  #[test]
  fn unreachable_target_is_infeasible() {
    let m = model(vec![0.05, 0.10], vec![vec![0.01, 0.0], vec![0.0, 0.04]]);
    let bounds = Constraints::long_only().resolve(2).unwrap();
    let config = SolverConfig::default();
    let token = CancelToken::new();
    let budget = Budget::new(&token, None);

    let err = MeanVariance::new(&m, &bounds, &config)
      .at_return(0.25, None, &budget)
      .unwrap_err();
    assert!(matches!(err, EngineError::InfeasibleConstraints(_)));
  }

  #[test]
  fn volatility_cap_slides_down_the_frontier() {
    let m = model(vec![0.05, 0.20], vec![vec![0.01, 0.0], vec![0.0, 0.16]]);
    let bounds = Constraints::long_only().resolve(2).unwrap();
    let config = SolverConfig::default();
    let token = CancelToken::new();
    let budget = Budget::new(&token, None);
    let mv = MeanVariance::new(&m, &bounds, &config);

    let free = mv.max_sharpe(0.0, None, &budget).unwrap();
    let capped = mv.max_sharpe(0.0, Some(0.105), &budget).unwrap();
    assert!(m.portfolio_volatility(&free.weights) > 0.105);
    assert!(m.portfolio_volatility(&capped.weights) <= 0.105 + 1e-9);
    assert!(m.portfolio_return(&capped.weights) < m.portfolio_return(&free.weights));
  }
}
