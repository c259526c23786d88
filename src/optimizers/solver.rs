//! # Projected Gradient
//!
//! $$
//! \mathbf x_{k+1} = \Pi\!\left(\mathbf y_k - \tfrac1L\nabla f(\mathbf y_k)\right),\qquad
//! f(\mathbf w)=\mathbf w^\top\Sigma\mathbf w+\varepsilon\|\mathbf w-\tfrac1n\mathbf 1\|^2
//! $$
//!
//! Accelerated projected gradient (FISTA) with function-value restarts. The small
//! proximal pull toward equal weights makes the optimum unique when `Σ` is only
//! positive semi-definite.

use argmin::core::CostFunction;
use argmin::core::Gradient;
use nalgebra::DMatrix;
use nalgebra::DVector;
use tracing::warn;

use crate::cancel::Budget;
use crate::config::SolverConfig;
use crate::error::EngineError;
use crate::error::Result;

/// Portfolio variance plus the tie-breaking proximal term.
#[derive(Clone, Debug)]
pub(crate) struct RegularizedVariance<'a> {
  covariance: &'a DMatrix<f64>,
  anchor: DVector<f64>,
  strength: f64,
  lipschitz: f64,
}

impl<'a> RegularizedVariance<'a> {
  pub(crate) fn new(covariance: &'a DMatrix<f64>, tie_break: f64) -> Self {
    let n = covariance.nrows();
    let scale = covariance.trace() / n.max(1) as f64;
    let strength = tie_break * if scale > 0.0 { scale } else { 1.0 };
    let top = covariance
      .clone()
      .symmetric_eigenvalues()
      .iter()
      .copied()
      .fold(0.0_f64, f64::max);
    let lipschitz = 2.0 * (top + strength);

    Self {
      covariance,
      anchor: DVector::from_element(n, 1.0 / n.max(1) as f64),
      strength,
      lipschitz: if lipschitz > 0.0 { lipschitz } else { 1.0 },
    }
  }

  /// Gradient Lipschitz constant `2(λ_max(Σ) + ε)`.
  pub(crate) fn lipschitz(&self) -> f64 {
    self.lipschitz
  }

  pub(crate) fn anchor(&self) -> &DVector<f64> {
    &self.anchor
  }
}

impl CostFunction for RegularizedVariance<'_> {
  type Param = DVector<f64>;
  type Output = f64;

  fn cost(&self, w: &Self::Param) -> std::result::Result<Self::Output, argmin::core::Error> {
    let variance = w.dot(&(self.covariance * w));
    let pull = (w - &self.anchor).norm_squared();
    Ok(variance + self.strength * pull)
  }
}

impl Gradient for RegularizedVariance<'_> {
  type Param = DVector<f64>;
  type Gradient = DVector<f64>;

  fn gradient(&self, w: &Self::Param) -> std::result::Result<Self::Gradient, argmin::core::Error> {
    Ok((self.covariance * w) * 2.0 + (w - &self.anchor) * (2.0 * self.strength))
  }
}

/// Weights returned by an iterative solve.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Solution {
  pub weights: DVector<f64>,
  pub iterations: usize,
}

fn objective_error(iterations: usize, err: argmin::core::Error) -> EngineError {
  EngineError::Convergence {
    iterations,
    residual: f64::INFINITY,
    reason: err.to_string(),
  }
}

/// Minimize `problem` over the set described by `project`, starting from `start`.
///
/// Stops when the max-norm step falls below `config.tolerance`. Hitting the
/// iteration cap returns the last feasible iterate with a warning.
pub(crate) fn minimize<P, F>(
  problem: &P,
  project: F,
  start: &DVector<f64>,
  lipschitz: f64,
  config: &SolverConfig,
  budget: &Budget<'_>,
) -> Result<Solution>
where
  P: CostFunction<Param = DVector<f64>, Output = f64>
    + Gradient<Param = DVector<f64>, Gradient = DVector<f64>>,
  F: Fn(&DVector<f64>) -> DVector<f64>,
{
  let step = 1.0 / lipschitz;
  let mut x = project(start);
  let mut y = x.clone();
  let mut fx = problem.cost(&x).map_err(|e| objective_error(0, e))?;
  let mut t = 1.0_f64;
  let mut residual = f64::INFINITY;

  for k in 0..config.max_iters {
    budget.tick(k, residual)?;

    let grad = problem.gradient(&y).map_err(|e| objective_error(k, e))?;
    let x_next = project(&(&y - grad * step));
    let f_next = problem.cost(&x_next).map_err(|e| objective_error(k, e))?;

    if f_next > fx && t > 1.0 {
      // momentum overshot: restart from the last accepted iterate
      t = 1.0;
      y = x.clone();
      continue;
    }

    residual = (&x_next - &x).amax();
    let t_next = 0.5 * (1.0 + (1.0 + 4.0 * t * t).sqrt());
    y = &x_next + (&x_next - &x) * ((t - 1.0) / t_next);
    x = x_next;
    fx = f_next;
    t = t_next;

    if residual <= config.tolerance {
      return Ok(Solution {
        weights: x,
        iterations: k + 1,
      });
    }
  }

  warn!(
    iterations = config.max_iters,
    residual, "projected gradient reached the iteration cap"
  );
  Ok(Solution {
    weights: x,
    iterations: config.max_iters,
  })
}
