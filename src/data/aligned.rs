//! # Aligned Panels
//!
//! $$
//! \mathcal D = \bigcap_{i=1}^{N} \mathcal D_i,\qquad R \in \mathbb R^{(|\mathcal D|-1)\times N}
//! $$
//!
//! Inner-joined price panels and the return matrices derived from them. Both the
//! estimator and the simulator read from the same panel, so they share one date index.

use std::collections::BTreeSet;
use std::ops::Range;

use chrono::NaiveDate;
use ndarray::s;
use ndarray::Array1;
use ndarray::Array2;
use ndarray::ArrayView1;
use ndarray::Axis;
use serde::Deserialize;
use serde::Serialize;

use super::series::AssetSeries;
use crate::config::ReturnKind;
use crate::error::EngineError;
use crate::error::Result;

/// Prices of several symbols on a common, strictly increasing date index.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceHistory {
  symbols: Vec<String>,
  dates: Vec<NaiveDate>,
  /// `dates.len() x symbols.len()`
  prices: Array2<f64>,
}

impl PriceHistory {
  /// Build a panel from row-major prices (`prices[t][i]` is symbol `i` on `dates[t]`).
  pub fn new(symbols: Vec<String>, dates: Vec<NaiveDate>, prices: Vec<Vec<f64>>) -> Result<Self> {
    let n = symbols.len();
    if n == 0 {
      return Err(EngineError::invalid("price history needs at least one symbol"));
    }
    if prices.len() != dates.len() {
      return Err(EngineError::invalid(format!(
        "{} price rows for {} dates",
        prices.len(),
        dates.len()
      )));
    }
    if let Some(row) = prices.iter().find(|row| row.len() != n) {
      return Err(EngineError::invalid(format!(
        "price row has {} columns, expected {n}",
        row.len()
      )));
    }

    let flat: Vec<f64> = prices.into_iter().flatten().collect();
    let prices = Array2::from_shape_vec((dates.len(), n), flat)
      .map_err(|e| EngineError::invalid(e.to_string()))?;

    Self::from_array(symbols, dates, prices)
  }

  pub(crate) fn from_array(
    symbols: Vec<String>,
    dates: Vec<NaiveDate>,
    prices: Array2<f64>,
  ) -> Result<Self> {
    for (j, symbol) in symbols.iter().enumerate() {
      if symbols[..j].contains(symbol) {
        return Err(EngineError::invalid(format!("duplicate symbol '{symbol}'")));
      }
      if let Some(p) = prices
        .column(j)
        .iter()
        .find(|p| !p.is_finite() || **p <= 0.0)
      {
        return Err(EngineError::data_gap(symbol.clone(), format!("invalid price {p}")));
      }
    }
    if let Some(w) = dates.windows(2).find(|w| w[1] <= w[0]) {
      return Err(EngineError::invalid(format!(
        "dates not strictly increasing at {} -> {}",
        w[0], w[1]
      )));
    }

    Ok(Self {
      symbols,
      dates,
      prices,
    })
  }

  /// Inner join of several series on their dates.
  ///
  /// Fails with [`EngineError::DataGap`] naming the first series that shares no
  /// date with the ones before it.
  pub fn from_series(series: &[AssetSeries]) -> Result<Self> {
    let Some(first) = series.first() else {
      return Err(EngineError::invalid("no series to align"));
    };

    let mut common: BTreeSet<NaiveDate> = first.points().iter().map(|p| p.date).collect();
    if common.is_empty() {
      return Err(EngineError::data_gap(first.symbol(), "empty series"));
    }

    for s in &series[1..] {
      let dates: BTreeSet<NaiveDate> = s.points().iter().map(|p| p.date).collect();
      let joined: BTreeSet<NaiveDate> = common.intersection(&dates).copied().collect();
      if joined.is_empty() {
        return Err(EngineError::data_gap(
          s.symbol(),
          "no dates overlapping the other assets",
        ));
      }
      common = joined;
    }

    let dates: Vec<NaiveDate> = common.into_iter().collect();
    let n = series.len();
    let mut prices = Array2::<f64>::zeros((dates.len(), n));

    for (j, s) in series.iter().enumerate() {
      for (t, date) in dates.iter().enumerate() {
        prices[[t, j]] = s
          .price_on(*date)
          .ok_or_else(|| EngineError::data_gap(s.symbol(), format!("missing close on {date}")))?;
      }
    }

    let symbols = series.iter().map(|s| s.symbol().to_string()).collect();
    Self::from_array(symbols, dates, prices)
  }

  pub fn symbols(&self) -> &[String] {
    &self.symbols
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn prices(&self) -> &Array2<f64> {
    &self.prices
  }

  pub fn n_assets(&self) -> usize {
    self.symbols.len()
  }

  /// Number of dated observations.
  pub fn len(&self) -> usize {
    self.dates.len()
  }

  pub fn is_empty(&self) -> bool {
    self.dates.is_empty()
  }

  pub fn row(&self, t: usize) -> ArrayView1<'_, f64> {
    self.prices.row(t)
  }

  /// Most recent close per symbol.
  pub fn last_prices(&self) -> Option<Array1<f64>> {
    let t = self.len().checked_sub(1)?;
    Some(self.prices.row(t).to_owned())
  }

  /// Sub-panel of rows `range`.
  pub fn slice_rows(&self, range: Range<usize>) -> Self {
    Self {
      symbols: self.symbols.clone(),
      dates: self.dates[range.clone()].to_vec(),
      prices: self.prices.slice(s![range, ..]).to_owned(),
    }
  }

  /// Sub-panel of the columns at `indices`, in that order.
  pub fn select_columns(&self, indices: &[usize]) -> Self {
    Self {
      symbols: indices.iter().map(|&j| self.symbols[j].clone()).collect(),
      dates: self.dates.clone(),
      prices: self.prices.select(Axis(1), indices),
    }
  }

  /// Price path of the symbol in column `j`.
  pub fn column(&self, j: usize) -> ArrayView1<'_, f64> {
    self.prices.column(j)
  }

  pub fn position(&self, symbol: &str) -> Option<usize> {
    self.symbols.iter().position(|s| s == symbol)
  }

  /// Periodic returns on the joined index.
  pub fn returns(&self, kind: ReturnKind) -> AlignedReturnMatrix {
    let t = self.len().saturating_sub(1);
    let n = self.n_assets();
    let mut returns = Array2::<f64>::zeros((t, n));
    for row in 0..t {
      for j in 0..n {
        returns[[row, j]] = kind.compute(self.prices[[row, j]], self.prices[[row + 1, j]]);
      }
    }

    AlignedReturnMatrix {
      symbols: self.symbols.clone(),
      dates: self.dates.iter().skip(1).copied().collect(),
      returns,
      kind,
    }
  }

  /// Total simple return of each symbol over the panel.
  pub fn total_returns(&self) -> Array1<f64> {
    match self.len() {
      0 => Array1::zeros(self.n_assets()),
      t => &self.prices.row(t - 1) / &self.prices.row(0) - 1.0,
    }
  }
}

/// Rectangular matrix of periodic returns: one row per date, one column per symbol.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AlignedReturnMatrix {
  symbols: Vec<String>,
  dates: Vec<NaiveDate>,
  returns: Array2<f64>,
  kind: ReturnKind,
}

impl AlignedReturnMatrix {
  /// Build directly from row-major returns.
  pub fn from_rows(
    symbols: Vec<String>,
    dates: Vec<NaiveDate>,
    rows: Vec<Vec<f64>>,
    kind: ReturnKind,
  ) -> Result<Self> {
    let n = symbols.len();
    if n == 0 {
      return Err(EngineError::invalid("return matrix needs at least one symbol"));
    }
    if rows.len() != dates.len() || rows.iter().any(|r| r.len() != n) {
      return Err(EngineError::invalid("return matrix must be rectangular"));
    }
    if rows.iter().flatten().any(|r| !r.is_finite()) {
      return Err(EngineError::invalid("returns must be finite"));
    }

    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    let returns = Array2::from_shape_vec((dates.len(), n), flat)
      .map_err(|e| EngineError::invalid(e.to_string()))?;

    Ok(Self {
      symbols,
      dates,
      returns,
      kind,
    })
  }

  pub fn symbols(&self) -> &[String] {
    &self.symbols
  }

  pub fn dates(&self) -> &[NaiveDate] {
    &self.dates
  }

  pub fn returns(&self) -> &Array2<f64> {
    &self.returns
  }

  pub fn kind(&self) -> ReturnKind {
    self.kind
  }

  pub fn n_assets(&self) -> usize {
    self.symbols.len()
  }

  /// Number of return rows.
  pub fn n_obs(&self) -> usize {
    self.returns.nrows()
  }

  pub fn column(&self, j: usize) -> ArrayView1<'_, f64> {
    self.returns.column(j)
  }

  /// The most recent `n` rows (all rows when fewer exist).
  pub fn tail(&self, n: usize) -> Self {
    let start = self.n_obs().saturating_sub(n);
    self.rows(start..self.n_obs())
  }

  pub fn rows(&self, range: Range<usize>) -> Self {
    Self {
      symbols: self.symbols.clone(),
      dates: self.dates[range.clone()].to_vec(),
      returns: self.returns.slice(s![range, ..]).to_owned(),
      kind: self.kind,
    }
  }
}
