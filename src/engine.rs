//! # Portfolio Engine
//!
//! $$
//! \text{prices}\ \to\ (\hat\mu,\hat\Sigma)\ \to\ \mathbf w^\*\ \to\ V_t\ \to\ \text{report}
//! $$
//!
//! High-level orchestration over the price store: estimation, optimization,
//! simulation and analysis with one shared configuration.

use chrono::NaiveDate;

use crate::analysis::analyze;
use crate::analysis::AnalysisReport;
use crate::analysis::AnalysisRequest;
use crate::analysis::Position;
use crate::backtest::simulate;
use crate::backtest::AllocationPolicy;
use crate::backtest::BacktestResult;
use crate::backtest::RebalanceFrequency;
use crate::cancel::CancelToken;
use crate::config::AnalysisConfig;
use crate::config::BacktestConfig;
use crate::config::EstimatorConfig;
use crate::config::Interval;
use crate::config::Lookback;
use crate::config::MarketConventions;
use crate::config::SolverConfig;
use crate::data::PriceProvider;
use crate::data::PriceSeriesStore;
use crate::error::Result;
use crate::optimizers::efficient_frontier;
use crate::optimizers::optimize;
use crate::optimizers::Constraints;
use crate::optimizers::FrontierPoint;
use crate::risk::estimate;
use crate::risk::RiskModel;
use crate::types::AllocationResult;
use crate::types::Objective;

/// Runtime configuration for [`PortfolioEngine`].
#[derive(Clone, Debug, PartialEq)]
pub struct PortfolioEngineConfig {
  /// Annualization factor and risk-free rate used by every call.
  pub conventions: MarketConventions,
  /// Estimation window for risk models.
  pub lookback: Lookback,
  pub estimator: EstimatorConfig,
  pub solver: SolverConfig,
  /// Proportional cost on traded notional in backtests.
  pub transaction_cost: f64,
}

impl PortfolioEngineConfig {
  /// Defaults with conventions matching the sampling `interval`.
  pub fn for_interval(interval: Interval, risk_free: f64) -> Self {
    Self {
      conventions: MarketConventions::for_interval(interval, risk_free),
      ..Self::default()
    }
  }
}

impl Default for PortfolioEngineConfig {
  fn default() -> Self {
    Self {
      conventions: MarketConventions::default(),
      lookback: Lookback::Full,
      estimator: EstimatorConfig::default(),
      solver: SolverConfig::default(),
      transaction_cost: 0.0,
    }
  }
}

/// Single entry point for estimation, optimization, backtesting and analysis.
#[derive(Debug)]
pub struct PortfolioEngine<P> {
  store: PriceSeriesStore<P>,
  config: PortfolioEngineConfig,
}

impl<P: PriceProvider> PortfolioEngine<P> {
  pub fn new(store: PriceSeriesStore<P>, config: PortfolioEngineConfig) -> Self {
    Self { store, config }
  }

  pub fn config(&self) -> &PortfolioEngineConfig {
    &self.config
  }

  pub fn store(&self) -> &PriceSeriesStore<P> {
    &self.store
  }

  fn backtest_config(&self) -> BacktestConfig {
    BacktestConfig {
      transaction_cost: self.config.transaction_cost,
      return_kind: self.store.config().return_kind,
      conventions: self.config.conventions,
    }
  }

  /// Annualized risk model for `symbols` over `[start, end]`.
  pub fn risk_model<S: AsRef<str>>(
    &self,
    symbols: &[S],
    start: NaiveDate,
    end: NaiveDate,
  ) -> Result<RiskModel> {
    let matrix = self.store.align(symbols, start, end)?;
    estimate(
      &matrix,
      self.config.lookback,
      &self.config.conventions,
      &self.config.estimator,
    )
  }

  /// Optimize an already estimated model.
  pub fn optimize_model(
    &self,
    model: &RiskModel,
    constraints: &Constraints,
    objective: Objective,
    cancel: &CancelToken,
  ) -> Result<AllocationResult> {
    optimize(
      model,
      constraints,
      objective,
      self.config.conventions.risk_free,
      &self.config.solver,
      cancel,
    )
  }

  /// Estimate and optimize in one call.
  pub fn optimize<S: AsRef<str>>(
    &self,
    symbols: &[S],
    start: NaiveDate,
    end: NaiveDate,
    objective: Objective,
    constraints: &Constraints,
    cancel: &CancelToken,
  ) -> Result<AllocationResult> {
    let model = self.risk_model(symbols, start, end)?;
    self.optimize_model(&model, constraints, objective, cancel)
  }

  pub fn efficient_frontier<S: AsRef<str>>(
    &self,
    symbols: &[S],
    start: NaiveDate,
    end: NaiveDate,
    constraints: &Constraints,
    points: usize,
    cancel: &CancelToken,
  ) -> Result<Vec<FrontierPoint>> {
    let model = self.risk_model(symbols, start, end)?;
    efficient_frontier(
      &model,
      constraints,
      points,
      self.config.conventions.risk_free,
      &self.config.solver,
      cancel,
    )
  }

  /// Simulate `policy` on the aligned prices of `symbols`.
  #[allow(clippy::too_many_arguments)]
  pub fn backtest<S: AsRef<str>>(
    &self,
    symbols: &[S],
    start: NaiveDate,
    end: NaiveDate,
    policy: &AllocationPolicy,
    initial_capital: f64,
    frequency: RebalanceFrequency,
    cancel: &CancelToken,
  ) -> Result<BacktestResult> {
    let history = self.store.history(symbols, start, end)?;
    simulate(
      policy,
      &history,
      initial_capital,
      frequency,
      &self.backtest_config(),
      cancel,
    )
  }

  /// As-held analysis of `positions`.
  pub fn analyze(
    &self,
    positions: &[Position],
    request: &AnalysisRequest,
    cancel: &CancelToken,
  ) -> Result<AnalysisReport> {
    let config = AnalysisConfig {
      estimator: self.config.estimator.clone(),
      solver: self.config.solver.clone(),
      backtest: self.backtest_config(),
    };
    analyze(positions, &self.store, request, &config, cancel)
  }
}
