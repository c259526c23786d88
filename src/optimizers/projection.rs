//! # Projections
//!
//! $$
//! \Pi(\mathbf v)=\arg\min_{\mathbf w\in\mathcal C}\|\mathbf w-\mathbf v\|_2^2,\qquad
//! \mathcal C=\{\mathbf 1^\top\mathbf w=1,\ \ell\le\mathbf w\le u\}
//! $$
//!
//! Exact Euclidean projections onto the capped simplex, optionally intersected with
//! a return hyperplane `μᵀw = r`. Each equality multiplier is found by monotone
//! scalar root finding: `w_i = clip(v_i - θ - λ μ_i, ℓ_i, u_i)`.

use nalgebra::DVector;

use super::constraints::Bounds;

const MAX_EXPANSIONS: usize = 128;
const MAX_BISECTIONS: usize = 200;

fn clipped(a: &DVector<f64>, theta: f64, bounds: &Bounds) -> DVector<f64> {
  DVector::from_fn(a.len(), |i, _| {
    (a[i] - theta).clamp(bounds.lower[i], bounds.upper[i])
  })
}

/// Shift `θ` with `Σ clip(a_i - θ, ℓ_i, u_i) = 1`.
///
/// The clipped mass is piecewise linear and non-increasing in `θ`, with knots at
/// `a_i - u_i` and `a_i - ℓ_i`, so a search over the sorted knots followed by one
/// linear interpolation is exact.
fn budget_shift(a: &DVector<f64>, bounds: &Bounds) -> f64 {
  let n = a.len();
  let mass = |theta: f64| -> f64 {
    (0..n)
      .map(|i| (a[i] - theta).clamp(bounds.lower[i], bounds.upper[i]))
      .sum()
  };

  let mut knots: Vec<f64> = (0..n)
    .flat_map(|i| [a[i] - bounds.upper[i], a[i] - bounds.lower[i]])
    .collect();
  knots.sort_by(f64::total_cmp);

  let (mut lo, mut hi) = (0, knots.len() - 1);
  if mass(knots[lo]) <= 1.0 {
    return knots[lo];
  }
  if mass(knots[hi]) >= 1.0 {
    return knots[hi];
  }
  // mass(knots[lo]) > 1 > mass(knots[hi])
  while hi - lo > 1 {
    let mid = (lo + hi) / 2;
    if mass(knots[mid]) >= 1.0 {
      lo = mid;
    } else {
      hi = mid;
    }
  }

  let (t0, t1) = (knots[lo], knots[hi]);
  let (m0, m1) = (mass(t0), mass(t1));
  if m0 - m1 <= f64::EPSILON {
    t0
  } else {
    t0 + (m0 - 1.0) * (t1 - t0) / (m0 - m1)
  }
}

/// Push the rounding residual of the budget onto coordinates strictly inside their
/// bounds.
fn polish(mut w: DVector<f64>, bounds: &Bounds) -> DVector<f64> {
  let residual = 1.0 - w.sum();
  if residual == 0.0 {
    return w;
  }
  let free: Vec<usize> = (0..w.len())
    .filter(|&i| w[i] > bounds.lower[i] && w[i] < bounds.upper[i])
    .collect();
  if free.is_empty() {
    return w;
  }
  let share = residual / free.len() as f64;
  for i in free {
    w[i] = (w[i] + share).clamp(bounds.lower[i], bounds.upper[i]);
  }
  w
}

/// Projection onto `{1ᵀw = 1, ℓ ≤ w ≤ u}`.
pub(crate) fn project_budget(v: &DVector<f64>, bounds: &Bounds) -> DVector<f64> {
  let theta = budget_shift(v, bounds);
  polish(clipped(v, theta, bounds), bounds)
}

/// Projection onto `{1ᵀw = 1, μᵀw = target, ℓ ≤ w ≤ u}`.
///
/// `target` must lie inside the achievable return range of the bounds. The
/// return gap of the inner projection is non-increasing in the return multiplier
/// `λ`, which is bracketed by doubling and then bisected.
pub(crate) fn project_budget_return(
  v: &DVector<f64>,
  bounds: &Bounds,
  mu: &DVector<f64>,
  target: f64,
) -> DVector<f64> {
  let spread = mu.max() - mu.min();
  if spread <= f64::EPSILON * (1.0 + mu.amax()) {
    return project_budget(v, bounds);
  }

  let at = |lambda: f64| project_budget(&(v - mu * lambda), bounds);
  let gap = |w: &DVector<f64>| w.dot(mu) - target;

  let (mut lo, mut hi) = (-1.0_f64, 1.0_f64);
  for _ in 0..MAX_EXPANSIONS {
    let lo_ok = gap(&at(lo)) >= 0.0;
    let hi_ok = gap(&at(hi)) <= 0.0;
    if lo_ok && hi_ok {
      break;
    }
    if !lo_ok {
      lo *= 2.0;
    }
    if !hi_ok {
      hi *= 2.0;
    }
  }

  for _ in 0..MAX_BISECTIONS {
    let mid = 0.5 * (lo + hi);
    if hi - lo <= f64::EPSILON * lo.abs().max(hi.abs()).max(1.0) {
      break;
    }
    let w = at(mid);
    let g = gap(&w);
    if g == 0.0 {
      return w;
    }
    if g > 0.0 {
      lo = mid;
    } else {
      hi = mid;
    }
  }

  let (w_lo, w_hi) = (at(lo), at(hi));
  if gap(&w_lo).abs() <= gap(&w_hi).abs() {
    w_lo
  } else {
    w_hi
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;

  use super::*;
  use crate::optimizers::constraints::Constraints;

  fn long_only(n: usize) -> Bounds {
    Constraints::long_only().resolve(n).unwrap()
  }

  #[test]
  fn feasible_point_is_fixed() {
    let b = long_only(3);
    let v = DVector::from_vec(vec![0.2, 0.3, 0.5]);
    let w = project_budget(&v, &b);
    assert_abs_diff_eq!(w, v, epsilon = 1e-14);
  }

  #[test]
  fn simplex_projection() {
    let b = long_only(3);
    // θ = 0.25 drops the last coordinate to its floor.
    let w = project_budget(&DVector::from_vec(vec![1.0, 0.5, -2.0]), &b);
    assert_abs_diff_eq!(w, DVector::from_vec(vec![0.75, 0.25, 0.0]), epsilon = 1e-14);
  }

  #[test]
  fn caps_are_respected() {
    let b = Constraints::uniform(4, 0.05, 0.4).resolve(4).unwrap();
    let w = project_budget(&DVector::from_vec(vec![3.0, -1.0, 0.2, 0.1]), &b);
    assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-14);
    assert!(b.contains(&w, 1e-15));
    assert_abs_diff_eq!(w[0], 0.4, epsilon = 1e-15);
    assert_abs_diff_eq!(w[1], 0.05, epsilon = 1e-15);
  }

  #[test]
  fn return_hyperplane() {
    let b = long_only(3);
    let mu = DVector::from_vec(vec![0.05, 0.10, 0.20]);
    let v = DVector::from_vec(vec![1.0 / 3.0; 3]);
    let w = project_budget_return(&v, &b, &mu, 0.15);
    assert_abs_diff_eq!(w.sum(), 1.0, epsilon = 1e-12);
    assert_abs_diff_eq!(w.dot(&mu), 0.15, epsilon = 1e-12);
    assert!(b.contains(&w, 1e-15));
  }

  #[test]
  fn return_at_the_edge_of_the_range() {
    let b = long_only(3);
    let mu = DVector::from_vec(vec![0.05, 0.10, 0.20]);
    let v = DVector::from_vec(vec![1.0 / 3.0; 3]);
    let w = project_budget_return(&v, &b, &mu, 0.20);
    assert_abs_diff_eq!(w, DVector::from_vec(vec![0.0, 0.0, 1.0]), epsilon = 1e-9);
  }
}
