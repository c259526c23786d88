//! # Asset Series
//!
//! $$
//! r_t = \frac{p_t}{p_{t-1}} - 1 \quad\text{or}\quad r_t = \ln\frac{p_t}{p_{t-1}}
//! $$
//!
//! A single symbol's validated price history and its derived periodic returns.

use chrono::NaiveDate;
use impl_new_derive::ImplNew;
use serde::Deserialize;
use serde::Serialize;

use crate::config::ReturnKind;
use crate::error::EngineError;
use crate::error::Result;

/// One dated close.
#[derive(ImplNew, Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
  pub date: NaiveDate,
  pub price: f64,
}

/// Price history of one symbol with strictly increasing dates.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AssetSeries {
  symbol: String,
  points: Vec<PricePoint>,
  returns: Vec<f64>,
}

impl AssetSeries {
  /// Validate `points` and derive returns.
  ///
  /// Non-increasing or duplicate dates and non-positive or non-finite prices are
  /// reported as a [`EngineError::DataGap`] for `symbol`.
  pub fn new(symbol: impl Into<String>, points: Vec<PricePoint>, kind: ReturnKind) -> Result<Self> {
    let symbol = symbol.into();

    if let Some(bad) = points.iter().find(|p| !p.price.is_finite() || p.price <= 0.0) {
      return Err(EngineError::data_gap(
        symbol,
        format!("invalid price {} on {}", bad.price, bad.date),
      ));
    }

    if let Some(w) = points.windows(2).find(|w| w[1].date <= w[0].date) {
      return Err(EngineError::data_gap(
        symbol,
        format!("dates not strictly increasing at {} -> {}", w[0].date, w[1].date),
      ));
    }

    let returns = points
      .windows(2)
      .map(|w| kind.compute(w[0].price, w[1].price))
      .collect();

    Ok(Self {
      symbol,
      points,
      returns,
    })
  }

  pub fn symbol(&self) -> &str {
    &self.symbol
  }

  pub fn points(&self) -> &[PricePoint] {
    &self.points
  }

  /// Periodic returns; `returns()[i]` is the return ending on `points()[i + 1].date`.
  pub fn returns(&self) -> &[f64] {
    &self.returns
  }

  pub fn len(&self) -> usize {
    self.points.len()
  }

  pub fn is_empty(&self) -> bool {
    self.points.is_empty()
  }

  /// Close on `date`, if the series has one.
  pub fn price_on(&self, date: NaiveDate) -> Option<f64> {
    self
      .points
      .binary_search_by_key(&date, |p| p.date)
      .ok()
      .map(|idx| self.points[idx].price)
  }
}
