//! # Price Series Store
//!
//! Fetches per-symbol histories through a [`PriceProvider`], validates them, joins
//! them on a common date index and derives returns with the store's fixed
//! [`ReturnKind`].

use std::sync::Arc;

use chrono::NaiveDate;
use tracing::debug;
use tracing::info;

use super::aligned::AlignedReturnMatrix;
use super::aligned::PriceHistory;
use super::cache::PriceCache;
use super::provider::PriceProvider;
use super::series::AssetSeries;
use super::series::PricePoint;
use crate::config::StoreConfig;
use crate::error::EngineError;
use crate::error::Result;

/// Normalizes provider data into aligned panels.
#[derive(Debug)]
pub struct PriceSeriesStore<P> {
  provider: P,
  config: StoreConfig,
  cache: Option<PriceCache>,
}

impl<P: PriceProvider> PriceSeriesStore<P> {
  pub fn new(provider: P, config: StoreConfig) -> Self {
    Self {
      provider,
      config,
      cache: None,
    }
  }

  /// Attach a response cache owned by this store.
  pub fn with_cache(mut self, cache: PriceCache) -> Self {
    self.cache = Some(cache);
    self
  }

  pub fn config(&self) -> &StoreConfig {
    &self.config
  }

  pub fn cache(&self) -> Option<&PriceCache> {
    self.cache.as_ref()
  }

  pub fn provider(&self) -> &P {
    &self.provider
  }

  /// Minimum aligned observations for `n_assets`: `max(2, min_obs_per_asset * n_assets)`.
  pub fn min_observations(&self, n_assets: usize) -> usize {
    (self.config.min_obs_per_asset * n_assets).max(2)
  }

  fn fetch(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<Arc<Vec<PricePoint>>> {
    let interval = self.config.interval;

    if let Some(points) = self
      .cache
      .as_ref()
      .and_then(|c| c.get(symbol, start, end, interval))
    {
      debug!(symbol, "price cache hit");
      return Ok(points);
    }

    let points = self
      .provider
      .get_prices(symbol, start, end, interval)
      .map_err(|e| EngineError::data_gap(symbol, format!("provider error: {e:#}")))?;

    if let Some(p) = points.iter().find(|p| p.date < start || p.date > end) {
      return Err(EngineError::data_gap(
        symbol,
        format!("provider returned {} outside [{start}, {end}]", p.date),
      ));
    }

    let points = Arc::new(points);
    if let Some(cache) = &self.cache {
      cache.insert(symbol, start, end, interval, Arc::clone(&points));
    }
    Ok(points)
  }

  /// Validated history of one symbol.
  pub fn series(&self, symbol: &str, start: NaiveDate, end: NaiveDate) -> Result<AssetSeries> {
    let points = self.fetch(symbol, start, end)?;
    if points.len() < 2 {
      return Err(EngineError::InsufficientHistory {
        available: points.len(),
        required: 2,
      });
    }
    AssetSeries::new(symbol, points.as_ref().clone(), self.config.return_kind)
  }

  /// Inner-joined price panel for `symbols` over `[start, end]`.
  pub fn history<S: AsRef<str>>(
    &self,
    symbols: &[S],
    start: NaiveDate,
    end: NaiveDate,
  ) -> Result<PriceHistory> {
    if symbols.is_empty() {
      return Err(EngineError::invalid("at least one symbol is required"));
    }
    if start > end {
      return Err(EngineError::invalid(format!("start {start} is after end {end}")));
    }

    let series = symbols
      .iter()
      .map(|s| self.series(s.as_ref(), start, end))
      .collect::<Result<Vec<_>>>()?;

    let history = PriceHistory::from_series(&series)?;
    if history.len() < 2 {
      return Err(EngineError::InsufficientHistory {
        available: history.len().saturating_sub(1),
        required: self.min_observations(symbols.len()),
      });
    }

    debug!(
      assets = history.n_assets(),
      dates = history.len(),
      "aligned price history"
    );
    Ok(history)
  }

  /// Aligned return matrix for `symbols` over `[start, end]`.
  ///
  /// Fails with [`EngineError::InsufficientHistory`] when fewer than
  /// [`Self::min_observations`] aligned returns remain.
  pub fn align<S: AsRef<str>>(
    &self,
    symbols: &[S],
    start: NaiveDate,
    end: NaiveDate,
  ) -> Result<AlignedReturnMatrix> {
    let history = self.history(symbols, start, end)?;
    let matrix = history.returns(self.config.return_kind);
    let required = self.min_observations(matrix.n_assets());

    if matrix.n_obs() < required {
      return Err(EngineError::InsufficientHistory {
        available: matrix.n_obs(),
        required,
      });
    }

    info!(
      assets = matrix.n_assets(),
      observations = matrix.n_obs(),
      "aligned return matrix"
    );
    Ok(matrix)
  }
}
