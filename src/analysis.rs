//! # Portfolio Analysis
//!
//! $$
//! w_i=\frac{q_iP_{T,i}}{\sum_j q_jP_{T,j}},\qquad
//! \alpha=(R_p-r_f)-\beta\,(R_b-r_f),\qquad \beta=\frac{\operatorname{Cov}(r_p,r_b)}{\operatorname{Var}(r_b)}
//! $$
//!
//! Evaluates held positions as they stand: weights from current market values, the
//! risk model and an as-held backtest, benchmark beta and alpha, sector exposure,
//! stress scenarios and an optional rebalance suggestion. Nothing is written back.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use impl_new_derive::ImplNew;
use nalgebra::DVector;
use serde::Deserialize;
use serde::Serialize;
use statrs::statistics::Statistics;
use tracing::info;
use tracing::instrument;

use crate::backtest::simulate;
use crate::backtest::stats::periodic_returns;
use crate::backtest::AllocationPolicy;
use crate::backtest::BacktestResult;
use crate::backtest::PerformanceStats;
use crate::backtest::RebalanceFrequency;
use crate::cancel::CancelToken;
use crate::config::AnalysisConfig;
use crate::config::BacktestConfig;
use crate::config::Lookback;
use crate::data::PriceProvider;
use crate::data::PriceSeriesStore;
use crate::error::EngineError;
use crate::error::Result;
use crate::optimizers::optimize;
use crate::optimizers::Constraints;
use crate::risk::estimate;
use crate::types::sharpe_ratio;
use crate::types::AllocationResult;
use crate::types::Objective;

const UNCLASSIFIED: &str = "Unclassified";

/// A held quantity of one symbol. Negative quantities are short positions.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Position {
  pub symbol: String,
  pub quantity: f64,
  pub sector: Option<String>,
  /// Geographic region, aggregated like sectors.
  #[serde(default)]
  pub region: Option<String>,
}

impl Position {
  pub fn new(symbol: String, quantity: f64, sector: Option<String>) -> Self {
    Self {
      symbol,
      quantity,
      sector,
      region: None,
    }
  }

  pub fn with_region(mut self, region: impl Into<String>) -> Self {
    self.region = Some(region.into());
    self
  }
}

/// Hypothetical instantaneous shock. Symbol shocks take precedence over sector
/// shocks, which take precedence over the market shock. The market shock is scaled
/// by each holding's benchmark beta when a benchmark is available.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StressScenario {
  pub name: String,
  pub market: f64,
  pub sectors: Vec<(String, f64)>,
  pub symbols: Vec<(String, f64)>,
}

impl StressScenario {
  /// Scenario that moves the whole market by `shock`.
  pub fn market(name: impl Into<String>, shock: f64) -> Self {
    Self {
      name: name.into(),
      market: shock,
      sectors: Vec::new(),
      symbols: Vec::new(),
    }
  }

  pub fn with_sector(mut self, sector: impl Into<String>, shock: f64) -> Self {
    self.sectors.push((sector.into(), shock));
    self
  }

  pub fn with_symbol(mut self, symbol: impl Into<String>, shock: f64) -> Self {
    self.symbols.push((symbol.into(), shock));
    self
  }

  fn shock_for(&self, position: &Position, beta: Option<f64>) -> f64 {
    if let Some(&(_, s)) = self.symbols.iter().find(|(sym, _)| *sym == position.symbol) {
      return s;
    }
    if let Some(sector) = &position.sector {
      if let Some(&(_, s)) = self.sectors.iter().find(|(name, _)| name == sector) {
        return s;
      }
    }
    self.market * beta.unwrap_or(1.0)
  }
}

/// Objective and constraints for the suggested target allocation.
#[derive(ImplNew, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
  pub objective: Objective,
  pub constraints: Constraints,
}

/// What to analyze: the price window, the estimation lookback and the optional
/// benchmark, stress scenarios and rebalance suggestion.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisRequest {
  pub start: NaiveDate,
  pub end: NaiveDate,
  pub lookback: Lookback,
  /// Symbol whose price path serves as the benchmark.
  pub benchmark: Option<String>,
  /// Rebalancing of the as-held backtest.
  pub rebalance: RebalanceFrequency,
  pub suggest: Option<Suggestion>,
  pub stress: Vec<StressScenario>,
}

impl AnalysisRequest {
  /// Buy-and-hold analysis over `[start, end]` with no extras.
  pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
    Self {
      start,
      end,
      lookback: Lookback::Full,
      benchmark: None,
      rebalance: RebalanceFrequency::Never,
      suggest: None,
      stress: Vec::new(),
    }
  }
}

/// One merged position as of the last aligned date.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Holding {
  pub symbol: String,
  pub sector: Option<String>,
  pub region: Option<String>,
  pub quantity: f64,
  /// Last aligned close.
  pub price: f64,
  pub market_value: f64,
  pub weight: f64,
  /// Share of portfolio variance.
  pub risk_contribution: f64,
  /// Beta against the benchmark, when one was requested.
  pub beta: Option<f64>,
}

/// Portfolio against the benchmark's price path.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkComparison {
  pub symbol: String,
  pub beta: f64,
  /// Annualized Jensen alpha.
  pub alpha: f64,
  pub correlation: f64,
  pub annualized_return: f64,
}

/// Impact of one [`StressScenario`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StressResult {
  pub name: String,
  /// Portfolio return under the scenario.
  pub return_impact: f64,
  /// Change in market value under the scenario.
  pub value_impact: f64,
}

/// Move from the current to the suggested weight of one holding.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TradeDelta {
  pub symbol: String,
  pub current_weight: f64,
  pub target_weight: f64,
  pub weight_delta: f64,
  /// Notional to buy (positive) or sell (negative) at current value.
  pub trade_value: f64,
}

/// Target allocation and the trades that reach it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RebalanceSuggestion {
  pub allocation: AllocationResult,
  pub trades: Vec<TradeDelta>,
}

/// Result of [`analyze`]. Weights, risk figures and exposures refer to the
/// holdings as they stand on `as_of`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AnalysisReport {
  pub as_of: NaiveDate,
  pub total_value: f64,
  pub holdings: Vec<Holding>,
  pub expected_return: f64,
  pub volatility: f64,
  pub sharpe: f64,
  pub correlation: Vec<Vec<f64>>,
  /// Weight per sector; holdings without one fall under `Unclassified`.
  pub sector_exposure: BTreeMap<String, f64>,
  /// Weight per region, same convention as sectors.
  pub region_exposure: BTreeMap<String, f64>,
  pub backtest: BacktestResult,
  pub benchmark: Option<BenchmarkComparison>,
  pub stress: Vec<StressResult>,
  pub suggestion: Option<RebalanceSuggestion>,
  pub degraded: bool,
}

/// Merge duplicate symbols (first sector and region win) and drop flat positions.
fn merge_positions(positions: &[Position]) -> Result<Vec<Position>> {
  let mut merged: Vec<Position> = Vec::new();
  for p in positions {
    if p.symbol.trim().is_empty() {
      return Err(EngineError::invalid("position symbol is empty"));
    }
    if !p.quantity.is_finite() {
      return Err(EngineError::invalid(format!(
        "quantity of {} must be finite",
        p.symbol
      )));
    }
    match merged.iter_mut().find(|m| m.symbol == p.symbol) {
      Some(m) => {
        m.quantity += p.quantity;
        if m.sector.is_none() {
          m.sector = p.sector.clone();
        }
        if m.region.is_none() {
          m.region = p.region.clone();
        }
      }
      None => merged.push(p.clone()),
    }
  }
  merged.retain(|p| p.quantity != 0.0);
  if merged.is_empty() {
    return Err(EngineError::invalid("no open positions"));
  }
  Ok(merged)
}

/// Sum of weights per tag, untagged holdings under [`UNCLASSIFIED`].
fn exposure<F>(holdings: &[Holding], tag: F) -> BTreeMap<String, f64>
where
  F: Fn(&Holding) -> Option<&str>,
{
  let mut out = BTreeMap::new();
  for h in holdings {
    let key = tag(h).unwrap_or(UNCLASSIFIED).to_string();
    *out.entry(key).or_insert(0.0) += h.weight;
  }
  out
}

fn beta(asset: &[f64], benchmark: &[f64]) -> Option<f64> {
  let var = benchmark.iter().variance();
  if !(var.is_finite() && var > 0.0) {
    return None;
  }
  Some(asset.iter().covariance(benchmark.iter()) / var)
}

fn correlation(a: &[f64], b: &[f64]) -> f64 {
  let denom = a.iter().std_dev() * b.iter().std_dev();
  if denom.is_finite() && denom > 0.0 {
    a.iter().covariance(b.iter()) / denom
  } else {
    0.0
  }
}

/// Analyze `positions` with prices from `store` over the request window.
#[instrument(skip_all, fields(positions = positions.len()))]
pub fn analyze<P: PriceProvider>(
  positions: &[Position],
  store: &PriceSeriesStore<P>,
  request: &AnalysisRequest,
  config: &AnalysisConfig,
  cancel: &CancelToken,
) -> Result<AnalysisReport> {
  let positions = merge_positions(positions)?;
  let n = positions.len();

  let mut symbols: Vec<&str> = positions.iter().map(|p| p.symbol.as_str()).collect();
  let bench_col = request.benchmark.as_deref().map(|b| {
    symbols.iter().position(|s| *s == b).unwrap_or_else(|| {
      symbols.push(b);
      symbols.len() - 1
    })
  });

  let panel = store.history(&symbols, request.start, request.end)?;
  let held: Vec<usize> = (0..n).collect();
  let history = panel.select_columns(&held);
  let kind = store.config().return_kind;
  let returns = history.returns(kind);
  let required = store.min_observations(n);
  if returns.n_obs() < required {
    return Err(EngineError::InsufficientHistory {
      available: returns.n_obs(),
      required,
    });
  }
  cancel.check()?;

  let last = history
    .last_prices()
    .ok_or(EngineError::EmptyHistory(history.len()))?;
  let values: Vec<f64> = positions
    .iter()
    .enumerate()
    .map(|(j, p)| p.quantity * last[j])
    .collect();
  let total_value: f64 = values.iter().sum();
  if !(total_value.is_finite() && total_value > 0.0) {
    return Err(EngineError::invalid(format!(
      "net market value {total_value:.2} must be positive"
    )));
  }
  let weights = DVector::from_iterator(n, values.iter().map(|v| v / total_value));

  let conventions = &config.backtest.conventions;
  let model = estimate(&returns, request.lookback, conventions, &config.estimator)?;
  let expected_return = model.portfolio_return(&weights);
  let volatility = model.portfolio_volatility(&weights);
  let contributions = model.risk_contributions(&weights);

  // statistics follow the store's return convention
  let backtest_config = BacktestConfig {
    return_kind: kind,
    ..config.backtest.clone()
  };
  let backtest = simulate(
    &AllocationPolicy::FixedWeights(weights.iter().copied().collect()),
    &history,
    total_value,
    request.rebalance,
    &backtest_config,
    cancel,
  )?;

  let mut betas = vec![None; n];
  let benchmark = match bench_col {
    Some(b) => {
      let bench_prices = panel.column(b).to_vec();
      let rb = periodic_returns(&bench_prices, kind);
      for (j, slot) in betas.iter_mut().enumerate() {
        *slot = beta(&returns.column(j).to_vec(), &rb);
      }

      let curve: Vec<f64> = backtest.equity_curve().iter().map(|&(_, v)| v).collect();
      let rp = periodic_returns(&curve, kind);
      let bench_stats = PerformanceStats::from_values(&bench_prices, kind, conventions);
      let portfolio_beta = beta(&rp, &rb).unwrap_or(0.0);
      let rf = conventions.risk_free;

      Some(BenchmarkComparison {
        symbol: symbols[b].to_string(),
        beta: portfolio_beta,
        alpha: (backtest.annualized_return() - rf)
          - portfolio_beta * (bench_stats.annualized_return - rf),
        correlation: correlation(&rp, &rb),
        annualized_return: bench_stats.annualized_return,
      })
    }
    None => None,
  };

  let holdings: Vec<Holding> = positions
    .iter()
    .enumerate()
    .map(|(j, p)| Holding {
      symbol: p.symbol.clone(),
      sector: p.sector.clone(),
      region: p.region.clone(),
      quantity: p.quantity,
      price: last[j],
      market_value: values[j],
      weight: weights[j],
      risk_contribution: contributions[j],
      beta: betas[j],
    })
    .collect();

  let sector_exposure = exposure(&holdings, |h| h.sector.as_deref());
  let region_exposure = exposure(&holdings, |h| h.region.as_deref());

  let stress = request
    .stress
    .iter()
    .map(|scenario| {
      let return_impact: f64 = positions
        .iter()
        .enumerate()
        .map(|(j, p)| weights[j] * scenario.shock_for(p, betas[j]))
        .sum();
      StressResult {
        name: scenario.name.clone(),
        return_impact,
        value_impact: return_impact * total_value,
      }
    })
    .collect();

  let suggestion = match &request.suggest {
    Some(s) => {
      let allocation = optimize(
        &model,
        &s.constraints,
        s.objective,
        conventions.risk_free,
        &config.solver,
        cancel,
      )?;
      let trades = positions
        .iter()
        .enumerate()
        .map(|(j, p)| {
          let delta = allocation.weights[j] - weights[j];
          TradeDelta {
            symbol: p.symbol.clone(),
            current_weight: weights[j],
            target_weight: allocation.weights[j],
            weight_delta: delta,
            trade_value: delta * total_value,
          }
        })
        .collect();
      Some(RebalanceSuggestion { allocation, trades })
    }
    None => None,
  };

  let corr = model.correlation();
  let correlation = (0..n)
    .map(|i| (0..n).map(|j| corr[(i, j)]).collect())
    .collect();
  let degraded = model.is_degraded()
    || backtest.is_degraded()
    || suggestion.as_ref().is_some_and(|s| s.allocation.degraded);

  info!(
    total_value,
    expected_return, volatility, degraded, "portfolio analysis complete"
  );

  Ok(AnalysisReport {
    as_of: history.dates()[history.len() - 1],
    total_value,
    holdings,
    expected_return,
    volatility,
    sharpe: sharpe_ratio(expected_return, volatility, conventions.risk_free),
    correlation,
    sector_exposure,
    region_exposure,
    backtest,
    benchmark,
    stress,
    suggestion,
    degraded,
  })
}

#[cfg(test)]
mod tests {
  use approx::assert_abs_diff_eq;
  use approx::assert_relative_eq;

  use super::*;
  use crate::config::ReturnKind;
  use crate::config::StoreConfig;
  use crate::data::InMemoryProvider;
  use crate::data::PricePoint;

  fn d(i: u64) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, 1).unwrap() + chrono::Days::new(i)
  }

  fn path(n: u64, base: f64, drift: f64, wiggle: f64, phase: f64) -> Vec<PricePoint> {
    (0..n)
      .map(|i| {
        let x = i as f64;
        PricePoint::new(d(i), base * (drift * x + wiggle * (0.9 * x + phase).sin()).exp())
      })
      .collect()
  }

  fn store() -> PriceSeriesStore<InMemoryProvider> {
    store_with(ReturnKind::Simple)
  }

  fn store_with(return_kind: ReturnKind) -> PriceSeriesStore<InMemoryProvider> {
    let provider = InMemoryProvider::new()
      .with_series("AAA", path(60, 100.0, 0.001, 0.010, 0.0))
      .with_series("BBB", path(60, 50.0, 0.0005, 0.020, 1.3))
      .with_series("CCC", path(60, 20.0, 0.002, 0.015, 2.1))
      .with_series("IDX", path(60, 1000.0, 0.001, 0.012, 0.4));
    PriceSeriesStore::new(
      provider,
      StoreConfig {
        return_kind,
        ..StoreConfig::default()
      },
    )
  }

  fn request() -> AnalysisRequest {
    AnalysisRequest::new(d(0), d(59))
  }

  fn run(positions: &[Position], request: &AnalysisRequest) -> Result<AnalysisReport> {
    analyze(
      positions,
      &store(),
      request,
      &AnalysisConfig::default(),
      &CancelToken::new(),
    )
  }

  fn book() -> Vec<Position> {
    vec![
      Position::new("AAA".into(), 10.0, Some("Technology".into())),
      Position::new("BBB".into(), 40.0, Some("Healthcare".into())),
      Position::new("CCC".into(), 100.0, None),
    ]
  }

  #[test]
  fn weights_follow_market_values() {
    let report = run(&book(), &request()).unwrap();

    let total: f64 = report.holdings.iter().map(|h| h.market_value).sum();
    assert_relative_eq!(report.total_value, total, epsilon = 1e-9);
    for h in &report.holdings {
      assert_relative_eq!(h.weight, h.quantity * h.price / total, epsilon = 1e-12);
    }
    assert_abs_diff_eq!(
      report.holdings.iter().map(|h| h.risk_contribution).sum::<f64>(),
      1.0,
      epsilon = 1e-9
    );
    assert_eq!(report.as_of, d(59));
    assert_eq!(report.correlation.len(), 3);
    assert_eq!(report.sector_exposure.len(), 3);
    assert!(report.sector_exposure.contains_key(UNCLASSIFIED));
    assert_relative_eq!(report.backtest.initial_capital(), total, epsilon = 1e-9);
  }

  #[test]
  fn duplicate_positions_merge() {
    let split = vec![
      Position::new("AAA".into(), 4.0, None),
      Position::new("AAA".into(), 6.0, Some("Technology".into())),
      Position::new("BBB".into(), 40.0, None),
    ];
    let report = run(&split, &request()).unwrap();
    assert_eq!(report.holdings.len(), 2);
    assert_eq!(report.holdings[0].quantity, 10.0);
    assert_eq!(report.holdings[0].sector.as_deref(), Some("Technology"));
  }

  #[test]
  fn stress_precedence() {
    let mut req = request();
    req.stress = vec![
      StressScenario::market("crash", -0.2),
      StressScenario::market("tech", 0.0).with_sector("Technology", -0.15),
      StressScenario::market("mixed", -0.1).with_symbol("CCC", 0.05),
    ];
    let report = run(&book(), &req).unwrap();
    let w: Vec<f64> = report.holdings.iter().map(|h| h.weight).collect();

    assert_relative_eq!(report.stress[0].return_impact, -0.2, epsilon = 1e-12);
    assert_relative_eq!(report.stress[1].return_impact, -0.15 * w[0], epsilon = 1e-12);
    assert_relative_eq!(
      report.stress[2].return_impact,
      -0.1 * (w[0] + w[1]) + 0.05 * w[2],
      epsilon = 1e-12
    );
    assert_relative_eq!(
      report.stress[0].value_impact,
      -0.2 * report.total_value,
      epsilon = 1e-6
    );
  }

  #[test]
  fn holding_the_benchmark_has_unit_beta() {
    let mut req = request();
    req.benchmark = Some("IDX".into());
    let report = run(&[Position::new("IDX".into(), 3.0, None)], &req).unwrap();
    let bench = report.benchmark.unwrap();

    assert_relative_eq!(bench.beta, 1.0, epsilon = 1e-9);
    assert_abs_diff_eq!(bench.alpha, 0.0, epsilon = 1e-9);
    assert_relative_eq!(bench.correlation, 1.0, epsilon = 1e-9);
    assert_relative_eq!(report.holdings[0].beta.unwrap(), 1.0, epsilon = 1e-9);
  }

  #[test]
  fn suggestion_trades_net_to_zero() {
    let mut req = request();
    req.suggest = Some(Suggestion::new(Objective::MinVariance, Constraints::long_only()));
    let report = run(&book(), &req).unwrap();
    let suggestion = report.suggestion.unwrap();

    let net: f64 = suggestion.trades.iter().map(|t| t.trade_value).sum();
    assert_abs_diff_eq!(net, 0.0, epsilon = 1e-6);
    assert_eq!(suggestion.allocation.objective, Objective::MinVariance);
  }

  #[test]
  fn net_short_book_is_rejected() {
    let book = vec![
      Position::new("AAA".into(), 1.0, None),
      Position::new("BBB".into(), -10.0, None),
    ];
    let err = run(&book, &request()).unwrap_err();
    assert!(matches!(err, EngineError::InvalidInput(_)));
  }

  #[test]
  fn log_store_drives_backtest_statistics() {
    let config = AnalysisConfig::default();
    assert_eq!(config.backtest.return_kind, ReturnKind::Simple);
    let report = analyze(
      &book(),
      &store_with(ReturnKind::Log),
      &request(),
      &config,
      &CancelToken::new(),
    )
    .unwrap();

    let curve: Vec<f64> = report.backtest.equity_curve().iter().map(|&(_, v)| v).collect();
    let conventions = &config.backtest.conventions;
    let log = PerformanceStats::from_values(&curve, ReturnKind::Log, conventions);
    let simple = PerformanceStats::from_values(&curve, ReturnKind::Simple, conventions);

    assert_relative_eq!(
      report.backtest.annualized_volatility(),
      log.annualized_volatility,
      epsilon = 1e-12
    );
    assert!((log.annualized_volatility - simple.annualized_volatility).abs() > 1e-9);
  }

  #[test]
  fn region_exposure_aggregates_like_sectors() {
    let book = vec![
      Position::new("AAA".into(), 10.0, None).with_region("US"),
      Position::new("BBB".into(), 40.0, Some("Healthcare".into())).with_region("EU"),
      Position::new("CCC".into(), 100.0, None),
      Position::new("AAA".into(), 5.0, None).with_region("Asia"),
    ];
    let report = run(&book, &request()).unwrap();
    let w: Vec<f64> = report.holdings.iter().map(|h| h.weight).collect();

    assert_eq!(report.holdings[0].region.as_deref(), Some("US"));
    assert_eq!(report.region_exposure.len(), 3);
    assert_relative_eq!(report.region_exposure["US"], w[0], epsilon = 1e-12);
    assert_relative_eq!(report.region_exposure["EU"], w[1], epsilon = 1e-12);
    assert_relative_eq!(report.region_exposure[UNCLASSIFIED], w[2], epsilon = 1e-12);
    assert_relative_eq!(report.sector_exposure[UNCLASSIFIED], w[0] + w[2], epsilon = 1e-12);
  }
}
