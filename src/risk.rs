//! # Risk Model
//!
//! $$
//! \hat\mu = k\,\bar r,\qquad
//! \hat\Sigma_\delta = k\left[(1-\delta)\,S + \delta\,\operatorname{diag}(S)\right]
//! $$
//!
//! Annualized expected returns and shrunk sample covariance over a lookback window.
//! A covariance that stays singular after shrinkage is either rejected or inverted
//! with the Moore-Penrose pseudo-inverse, in which case the model is flagged degraded.

use nalgebra::DMatrix;
use nalgebra::DVector;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;
use tracing::warn;

use crate::config::EstimatorConfig;
use crate::config::Lookback;
use crate::config::MarketConventions;
use crate::data::AlignedReturnMatrix;
use crate::error::EngineError;
use crate::error::Result;

/// Relative eigenvalue floor below which a covariance counts as singular.
const SINGULAR_RCOND: f64 = 1e-12;

/// Expected returns and covariance for one optimization request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RiskModel {
  symbols: Vec<String>,
  expected_returns: DVector<f64>,
  covariance: DMatrix<f64>,
  /// Inverse covariance, or its pseudo-inverse when degraded.
  precision: DMatrix<f64>,
  observations: usize,
  shrinkage: f64,
  degraded: bool,
}

/// Estimate a [`RiskModel`] from aligned periodic returns.
pub fn estimate(
  matrix: &AlignedReturnMatrix,
  lookback: Lookback,
  conventions: &MarketConventions,
  config: &EstimatorConfig,
) -> Result<RiskModel> {
  if !(0.0..=1.0).contains(&config.shrinkage) {
    return Err(EngineError::invalid(format!(
      "shrinkage {} outside [0, 1]",
      config.shrinkage
    )));
  }
  if !(conventions.periods_per_year.is_finite() && conventions.periods_per_year > 0.0) {
    return Err(EngineError::invalid("periods_per_year must be positive"));
  }

  let window = match lookback {
    Lookback::Full => matrix.clone(),
    Lookback::Periods(0) => return Err(EngineError::invalid("lookback must be positive")),
    Lookback::Periods(n) => matrix.tail(n),
  };

  let t = window.n_obs();
  let n = window.n_assets();
  if t < 2 {
    return Err(EngineError::InsufficientHistory {
      available: t,
      required: 2,
    });
  }

  let returns = window.returns();
  let x = DMatrix::from_fn(t, n, |i, j| returns[[i, j]]);
  let means = DVector::from_fn(n, |j, _| x.column(j).mean());

  let mut centered = x;
  for j in 0..n {
    let m = means[j];
    centered.column_mut(j).add_scalar_mut(-m);
  }

  let k = conventions.periods_per_year;
  let sample = (centered.transpose() * &centered) * (k / (t - 1) as f64);
  let covariance = shrink(&sample, config.shrinkage);
  let expected_returns = means * k;

  debug!(assets = n, observations = t, shrinkage = config.shrinkage, "estimated risk model");

  RiskModel::assemble(
    window.symbols().to_vec(),
    expected_returns,
    covariance,
    t,
    config,
  )
}

/// `(1 - delta) * S + delta * diag(S)`, symmetrized.
fn shrink(sample: &DMatrix<f64>, delta: f64) -> DMatrix<f64> {
  let n = sample.nrows();
  DMatrix::from_fn(n, n, |i, j| {
    let sym = 0.5 * (sample[(i, j)] + sample[(j, i)]);
    if i == j {
      sym
    } else {
      (1.0 - delta) * sym
    }
  })
}

fn is_singular(cov: &DMatrix<f64>) -> bool {
  let eig = cov.clone().symmetric_eigenvalues();
  let max = eig.iter().cloned().fold(0.0_f64, f64::max);
  let min = eig.iter().cloned().fold(f64::INFINITY, f64::min);
  max <= 0.0 || min <= SINGULAR_RCOND * max
}

impl RiskModel {
  /// Build a model from externally estimated (already annualized) inputs.
  pub fn from_parts(
    symbols: Vec<String>,
    expected_returns: Vec<f64>,
    covariance: Vec<Vec<f64>>,
    observations: usize,
    config: &EstimatorConfig,
  ) -> Result<Self> {
    let n = symbols.len();
    if n == 0 {
      return Err(EngineError::invalid("risk model needs at least one asset"));
    }
    if expected_returns.len() != n {
      return Err(EngineError::invalid(format!(
        "{} expected returns for {n} assets",
        expected_returns.len()
      )));
    }
    if covariance.len() != n || covariance.iter().any(|row| row.len() != n) {
      return Err(EngineError::invalid(format!("covariance must be {n}x{n}")));
    }
    if expected_returns
      .iter()
      .chain(covariance.iter().flatten())
      .any(|v| !v.is_finite())
    {
      return Err(EngineError::invalid("risk inputs must be finite"));
    }

    let cov = DMatrix::from_fn(n, n, |i, j| covariance[i][j]);
    if (0..n).any(|i| cov[(i, i)] < 0.0) {
      return Err(EngineError::invalid("covariance diagonal must be non-negative"));
    }
    if (&cov - cov.transpose()).amax() > 1e-10 * cov.amax().max(1.0) {
      return Err(EngineError::invalid("covariance must be symmetric"));
    }

    Self::assemble(
      symbols,
      DVector::from_vec(expected_returns),
      shrink(&cov, config.shrinkage),
      observations,
      config,
    )
  }

  fn assemble(
    symbols: Vec<String>,
    expected_returns: DVector<f64>,
    covariance: DMatrix<f64>,
    observations: usize,
    config: &EstimatorConfig,
  ) -> Result<Self> {
    let n = symbols.len();
    let inverse = if is_singular(&covariance) {
      None
    } else {
      covariance
        .clone()
        .cholesky()
        .map(|c| c.inverse())
        .or_else(|| covariance.clone().try_inverse())
    };

    let (precision, degraded) = match inverse {
      Some(inv) => (inv, false),
      None if config.allow_pseudo_inverse => {
        let pinv = covariance
          .clone()
          .pseudo_inverse(config.pseudo_inverse_eps)
          .map_err(|_| EngineError::DegenerateCovariance {
            assets: n,
            shrinkage: config.shrinkage,
          })?;
        warn!(
          assets = n,
          shrinkage = config.shrinkage,
          "covariance singular after shrinkage, using pseudo-inverse (degraded)"
        );
        (pinv, true)
      }
      None => {
        return Err(EngineError::DegenerateCovariance {
          assets: n,
          shrinkage: config.shrinkage,
        })
      }
    };

    Ok(Self {
      symbols,
      expected_returns,
      covariance,
      precision,
      observations,
      shrinkage: config.shrinkage,
      degraded,
    })
  }

  pub fn symbols(&self) -> &[String] {
    &self.symbols
  }

  pub fn n_assets(&self) -> usize {
    self.symbols.len()
  }

  pub fn expected_returns(&self) -> &DVector<f64> {
    &self.expected_returns
  }

  pub fn covariance(&self) -> &DMatrix<f64> {
    &self.covariance
  }

  pub fn precision(&self) -> &DMatrix<f64> {
    &self.precision
  }

  pub fn observations(&self) -> usize {
    self.observations
  }

  pub fn shrinkage(&self) -> f64 {
    self.shrinkage
  }

  /// True when the precision matrix came from the pseudo-inverse fallback.
  pub fn is_degraded(&self) -> bool {
    self.degraded
  }

  /// Annualized per-asset volatilities.
  pub fn volatilities(&self) -> DVector<f64> {
    self.covariance.diagonal().map(|v| v.max(0.0).sqrt())
  }

  /// Correlation matrix implied by the covariance; zero-variance assets get zero
  /// off-diagonal correlation.
  pub fn correlation(&self) -> DMatrix<f64> {
    let n = self.n_assets();
    let sd = self.volatilities();

    DMatrix::from_fn(n, n, |i, j| {
      if i == j {
        return 1.0;
      }
      let denom = sd[i] * sd[j];
      if denom > 1e-15 {
        (self.covariance[(i, j)] / denom).clamp(-1.0, 1.0)
      } else {
        0.0
      }
    })
  }

  pub fn portfolio_return(&self, w: &DVector<f64>) -> f64 {
    self.expected_returns.dot(w)
  }

  pub fn portfolio_variance(&self, w: &DVector<f64>) -> f64 {
    (w.transpose() * &self.covariance * w)[(0, 0)].max(0.0)
  }

  pub fn portfolio_volatility(&self, w: &DVector<f64>) -> f64 {
    self.portfolio_variance(w).sqrt()
  }

  /// Share of total variance contributed by each asset, `w_i (Σw)_i / wᵀΣw`.
  pub fn risk_contributions(&self, w: &DVector<f64>) -> DVector<f64> {
    let sigma_w = &self.covariance * w;
    let total = w.dot(&sigma_w);
    if total.abs() < 1e-300 {
      return DVector::zeros(w.len());
    }
    w.component_mul(&sigma_w) / total
  }
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use approx::assert_relative_eq;
  use chrono::NaiveDate;
  use tracing_test::traced_test;

  use super::*;
  use crate::config::ReturnKind;

  fn matrix(rows: Vec<Vec<f64>>) -> AlignedReturnMatrix {
    let n = rows[0].len();
    let symbols = (0..n).map(|i| format!("A{i}")).collect();
    let start = NaiveDate::from_ymd_opt(2023, 1, 2).unwrap();
    let dates = (0..rows.len())
      .map(|i| start + chrono::Days::new(i as u64))
      .collect();
    AlignedReturnMatrix::from_rows(symbols, dates, rows, ReturnKind::Simple).unwrap()
  }

  fn unit() -> MarketConventions {
    MarketConventions {
      periods_per_year: 1.0,
      risk_free: 0.0,
    }
  }

  #[test]
  fn sample_moments_match_hand_computation() {
    let m = matrix(vec![
      vec![0.01, 0.02],
      vec![-0.02, 0.01],
      vec![0.03, -0.01],
    ]);
    let model = estimate(&m, Lookback::Full, &unit(), &EstimatorConfig::default()).unwrap();

    assert_relative_eq!(model.expected_returns()[0], 0.02 / 3.0, epsilon = 1e-15);
    assert_relative_eq!(model.expected_returns()[1], 0.02 / 3.0, epsilon = 1e-15);

    // var(a) with n-1 denominator
    let ma = 0.02_f64 / 3.0;
    let va = ((0.01 - ma).powi(2) + (-0.02 - ma).powi(2) + (0.03 - ma).powi(2)) / 2.0;
    assert_relative_eq!(model.covariance()[(0, 0)], va, epsilon = 1e-15);
    assert_relative_eq!(model.covariance()[(0, 1)], model.covariance()[(1, 0)]);
    assert!(!model.is_degraded());
  }

  #[test]
  fn annualization_scales_linearly() {
    let m = matrix(vec![
      vec![0.01, 0.00],
      vec![0.00, 0.02],
      vec![0.02, -0.01],
      vec![-0.01, 0.01],
    ]);
    let daily = MarketConventions::default();
    let a = estimate(&m, Lookback::Full, &unit(), &EstimatorConfig::default()).unwrap();
    let b = estimate(&m, Lookback::Full, &daily, &EstimatorConfig::default()).unwrap();

    assert_relative_eq!(b.expected_returns()[1], 252.0 * a.expected_returns()[1]);
    assert_relative_eq!(b.covariance()[(0, 1)], 252.0 * a.covariance()[(0, 1)]);
  }

  #[test]
  fn lookback_uses_most_recent_rows() {
    let m = matrix(vec![
      vec![0.50, 0.1],
      vec![0.01, 0.2],
      vec![0.03, 0.1],
    ]);
    let model = estimate(&m, Lookback::Periods(2), &unit(), &EstimatorConfig::default()).unwrap();
    assert_eq!(model.observations(), 2);
    assert_relative_eq!(model.expected_returns()[0], 0.02, epsilon = 1e-15);
  }

  #[test]
  fn full_shrinkage_yields_diagonal() {
    let m = matrix(vec![
      vec![0.01, 0.011],
      vec![0.02, 0.019],
      vec![-0.01, -0.012],
      vec![0.00, 0.001],
    ]);
    let config = EstimatorConfig {
      shrinkage: 1.0,
      ..Default::default()
    };
    let model = estimate(&m, Lookback::Full, &unit(), &config).unwrap();
    assert_abs_diff_eq!(model.covariance()[(0, 1)], 0.0);
    assert_abs_diff_eq!(model.correlation()[(1, 0)], 0.0);
  }

  #[test]
  #[traced_test]
  fn singular_covariance_degrades_to_pseudo_inverse() {
    // second column is an exact multiple of the first
    let m = matrix(vec![
      vec![0.01, 0.02],
      vec![-0.02, -0.04],
      vec![0.03, 0.06],
    ]);
    let model = estimate(&m, Lookback::Full, &unit(), &EstimatorConfig::default()).unwrap();
    assert!(model.is_degraded());
    assert!(logs_contain("pseudo-inverse"));

    // Moore-Penrose identity: Σ Σ⁺ Σ = Σ
    let cov = model.covariance();
    let recon = cov * model.precision() * cov;
    assert_abs_diff_eq!((recon - cov).amax(), 0.0, epsilon = 1e-12);
  }

  #[test]
  fn singular_covariance_is_an_error_without_fallback() {
    let m = matrix(vec![
      vec![0.01, 0.02],
      vec![-0.02, -0.04],
      vec![0.03, 0.06],
    ]);
    let config = EstimatorConfig {
      allow_pseudo_inverse: false,
      ..Default::default()
    };
    let err = estimate(&m, Lookback::Full, &unit(), &config).unwrap_err();
    assert!(matches!(err, EngineError::DegenerateCovariance { assets: 2, .. }));
  }

  #[test]
  fn shrinkage_rescues_collinear_assets() {
    let m = matrix(vec![
      vec![0.01, 0.02],
      vec![-0.02, -0.04],
      vec![0.03, 0.06],
    ]);
    let config = EstimatorConfig {
      shrinkage: 0.3,
      allow_pseudo_inverse: false,
      ..Default::default()
    };
    let model = estimate(&m, Lookback::Full, &unit(), &config).unwrap();
    assert!(!model.is_degraded());
  }

  #[test]
  fn risk_contributions_sum_to_one() {
    let model = RiskModel::from_parts(
      vec!["A".into(), "B".into(), "C".into()],
      vec![0.08, 0.1, 0.12],
      vec![
        vec![0.04, 0.01, 0.0],
        vec![0.01, 0.09, 0.02],
        vec![0.0, 0.02, 0.16],
      ],
      252,
      &EstimatorConfig::default(),
    )
    .unwrap();
    let w = DVector::from_vec(vec![0.5, 0.3, 0.2]);
    let rc = model.risk_contributions(&w);
    assert_relative_eq!(rc.sum(), 1.0, epsilon = 1e-12);
    assert_relative_eq!(model.portfolio_return(&w), 0.094, epsilon = 1e-12);
  }

  #[test]
  fn invalid_shrinkage_is_rejected() {
    let m = matrix(vec![vec![0.01], vec![0.02], vec![0.0]]);
    let config = EstimatorConfig {
      shrinkage: 1.5,
      ..Default::default()
    };
    assert!(matches!(
      estimate(&m, Lookback::Full, &unit(), &config),
      Err(EngineError::InvalidInput(_))
    ));
  }
}
