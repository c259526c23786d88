//! # Allocation Policies
//!
//! $$
//! \mathbf w_t=\begin{cases}\mathbf w^{fix}&\text{fixed weights}\\
//! \operatorname{Optimize}\big(\hat\mu_{[s,t]},\hat\Sigma_{[s,t]}\big)&\text{walk-forward}\end{cases}
//! $$
//!
//! Where target weights come from and when they are re-applied.

use chrono::Datelike;
use chrono::NaiveDate;
use nalgebra::DVector;
use serde::Deserialize;
use serde::Serialize;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::config::BacktestConfig;
use crate::config::EstimatorConfig;
use crate::config::Lookback;
use crate::config::SolverConfig;
use crate::data::PriceHistory;
use crate::error::EngineError;
use crate::error::Result;
use crate::optimizers::optimize;
use crate::optimizers::Constraints;
use crate::risk::estimate;
use crate::types::Objective;

/// When the simulator resets holdings to the target weights.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RebalanceFrequency {
  /// Buy and hold: weights drift after the initial allocation.
  #[default]
  Never,
  /// Reset at every period.
  EveryPeriod,
  /// Reset every `n` periods after the start.
  Every(usize),
  /// First trading date of each new month.
  Monthly,
  /// First trading date of each new quarter.
  Quarterly,
  /// First trading date of each new year.
  Yearly,
}

impl RebalanceFrequency {
  pub(crate) fn validate(self) -> Result<()> {
    if self == RebalanceFrequency::Every(0) {
      return Err(EngineError::invalid("rebalance period must be positive"));
    }
    Ok(())
  }

  /// Whether the close of `dates[t]` is a rebalance boundary for a run started at
  /// `start`.
  pub(crate) fn is_boundary(self, dates: &[NaiveDate], start: usize, t: usize) -> bool {
    if t <= start {
      return false;
    }
    let (prev, cur) = (dates[t - 1], dates[t]);
    match self {
      RebalanceFrequency::Never => false,
      RebalanceFrequency::EveryPeriod => true,
      RebalanceFrequency::Every(n) => n > 0 && (t - start) % n == 0,
      RebalanceFrequency::Monthly => (cur.year(), cur.month()) != (prev.year(), prev.month()),
      RebalanceFrequency::Quarterly => {
        (cur.year(), cur.month0() / 3) != (prev.year(), prev.month0() / 3)
      }
      RebalanceFrequency::Yearly => cur.year() != prev.year(),
    }
  }
}

/// Estimation window used by walk-forward re-optimization.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Window {
  /// Every price up to the rebalance date.
  #[default]
  Expanding,
  /// The last `n` returns up to the rebalance date.
  Rolling(usize),
}

/// Re-estimate the risk model and re-optimize at every rebalance, using only prices
/// observed up to and including the rebalance date.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WalkForward {
  pub objective: Objective,
  pub constraints: Constraints,
  pub window: Window,
  /// Index of the first simulated date; the prices before it seed the first estimate.
  pub warmup: usize,
  pub estimator: EstimatorConfig,
  pub solver: SolverConfig,
}

impl WalkForward {
  pub fn new(objective: Objective, constraints: Constraints, warmup: usize) -> Self {
    Self {
      objective,
      constraints,
      window: Window::Expanding,
      warmup,
      estimator: EstimatorConfig::default(),
      solver: SolverConfig::default(),
    }
  }

  pub fn rolling(mut self, returns: usize) -> Self {
    self.window = Window::Rolling(returns);
    self
  }

  fn weights_at(
    &self,
    history: &PriceHistory,
    t: usize,
    config: &BacktestConfig,
    cancel: &CancelToken,
  ) -> Result<(DVector<f64>, bool)> {
    let first = match self.window {
      Window::Expanding => 0,
      Window::Rolling(n) => t.saturating_sub(n),
    };
    let returns = history.slice_rows(first..t + 1).returns(config.return_kind);
    let model = estimate(&returns, Lookback::Full, &config.conventions, &self.estimator)?;
    let allocation = optimize(
      &model,
      &self.constraints,
      self.objective,
      config.conventions.risk_free,
      &self.solver,
      cancel,
    )?;
    debug!(
      date = %history.dates()[t],
      observations = returns.n_obs(),
      "walk-forward re-optimization"
    );
    Ok((allocation.weights_vector(), allocation.degraded))
  }
}

/// Source of target weights for a simulation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum AllocationPolicy {
  /// A constant target vector, aligned with the history's symbols.
  FixedWeights(Vec<f64>),
  WalkForward(WalkForward),
}

impl AllocationPolicy {
  pub(crate) fn validate(&self, n_assets: usize) -> Result<()> {
    match self {
      AllocationPolicy::FixedWeights(w) => {
        if w.len() != n_assets {
          return Err(EngineError::invalid(format!(
            "{} weights for {n_assets} assets",
            w.len()
          )));
        }
        if w.iter().any(|x| !x.is_finite()) {
          return Err(EngineError::invalid("weights must be finite"));
        }
        let total: f64 = w.iter().sum();
        if (total - 1.0).abs() > 1e-6 {
          return Err(EngineError::invalid(format!(
            "weights sum to {total:.8}, expected 1"
          )));
        }
        Ok(())
      }
      AllocationPolicy::WalkForward(wf) => {
        if wf.warmup < 2 {
          return Err(EngineError::invalid(
            "walk-forward warmup must cover at least two returns",
          ));
        }
        if let Window::Rolling(n) = wf.window {
          if n < 2 {
            return Err(EngineError::invalid("rolling window must cover at least two returns"));
          }
        }
        Ok(())
      }
    }
  }

  /// Index of the first simulated date.
  pub(crate) fn start(&self) -> usize {
    match self {
      AllocationPolicy::FixedWeights(_) => 0,
      AllocationPolicy::WalkForward(wf) => wf.warmup,
    }
  }

  /// Target weights at the close of `history.dates()[t]`, plus the degraded flag
  /// of the risk model behind them.
  pub(crate) fn target(
    &self,
    history: &PriceHistory,
    t: usize,
    config: &BacktestConfig,
    cancel: &CancelToken,
  ) -> Result<(DVector<f64>, bool)> {
    match self {
      AllocationPolicy::FixedWeights(w) => Ok((DVector::from_column_slice(w), false)),
      AllocationPolicy::WalkForward(wf) => wf.weights_at(history, t, config, cancel),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn dates(days: &[(i32, u32, u32)]) -> Vec<NaiveDate> {
    days
      .iter()
      .map(|&(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
      .collect()
  }

  #[test]
  fn calendar_boundaries() {
    let d = dates(&[
      (2023, 3, 30),
      (2023, 3, 31),
      (2023, 4, 3),
      (2023, 4, 4),
      (2024, 1, 2),
    ]);
    let monthly: Vec<usize> = (0..d.len())
      .filter(|&t| RebalanceFrequency::Monthly.is_boundary(&d, 0, t))
      .collect();
    assert_eq!(monthly, vec![2, 4]);

    assert!(RebalanceFrequency::Quarterly.is_boundary(&d, 0, 2));
    assert!(!RebalanceFrequency::Quarterly.is_boundary(&d, 0, 3));
    assert!(RebalanceFrequency::Yearly.is_boundary(&d, 0, 4));
    assert!(!RebalanceFrequency::Yearly.is_boundary(&d, 0, 2));
  }

  #[test]
  fn period_count_boundaries() {
    let d = dates(&[(2023, 1, 2), (2023, 1, 3), (2023, 1, 4), (2023, 1, 5), (2023, 1, 6)]);
    let every2: Vec<usize> = (0..d.len())
      .filter(|&t| RebalanceFrequency::Every(2).is_boundary(&d, 1, t))
      .collect();
    assert_eq!(every2, vec![3]);
    assert!(!RebalanceFrequency::Never.is_boundary(&d, 0, 3));
    assert!(RebalanceFrequency::Every(0).validate().is_err());
  }

  #[test]
  fn fixed_weights_are_validated() {
    let ok = AllocationPolicy::FixedWeights(vec![0.5, 0.5]);
    assert!(ok.validate(2).is_ok());
    assert!(ok.validate(3).is_err());
    assert!(AllocationPolicy::FixedWeights(vec![0.5, 0.6]).validate(2).is_err());

    let wf = AllocationPolicy::WalkForward(WalkForward::new(
      Objective::MinVariance,
      Constraints::long_only(),
      1,
    ));
    assert!(wf.validate(2).is_err());
  }
}
