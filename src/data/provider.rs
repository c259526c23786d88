//! # Price Providers
//!
//! Boundary to the market-data layer. Retrieval happens before the engine runs; a
//! provider either returns a full ascending series or an error, never a partial one.

use std::collections::HashMap;

use anyhow::anyhow;
use chrono::NaiveDate;

use super::series::PricePoint;
use crate::config::Interval;

/// Source of historical closes.
pub trait PriceProvider: Send + Sync {
  /// Closes for `symbol` in `[start, end]`, ascending by date.
  fn get_prices(
    &self,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    interval: Interval,
  ) -> anyhow::Result<Vec<PricePoint>>;
}

impl<P: PriceProvider + ?Sized> PriceProvider for &P {
  fn get_prices(
    &self,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    interval: Interval,
  ) -> anyhow::Result<Vec<PricePoint>> {
    (**self).get_prices(symbol, start, end, interval)
  }
}

impl<P: PriceProvider + ?Sized> PriceProvider for std::sync::Arc<P> {
  fn get_prices(
    &self,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    interval: Interval,
  ) -> anyhow::Result<Vec<PricePoint>> {
    (**self).get_prices(symbol, start, end, interval)
  }
}

/// Provider over series that were already fetched.
///
/// The interval argument is ignored: the stored series are returned as-is,
/// filtered to the requested date range.
#[derive(Clone, Debug, Default)]
pub struct InMemoryProvider {
  series: HashMap<String, Vec<PricePoint>>,
}

impl InMemoryProvider {
  pub fn new() -> Self {
    Self::default()
  }

  /// Insert (or replace) a symbol's history. Points are sorted by date.
  pub fn insert(&mut self, symbol: impl Into<String>, mut points: Vec<PricePoint>) {
    points.sort_by_key(|p| p.date);
    self.series.insert(symbol.into(), points);
  }

  pub fn with_series(mut self, symbol: impl Into<String>, points: Vec<PricePoint>) -> Self {
    self.insert(symbol, points);
    self
  }

  pub fn symbols(&self) -> impl Iterator<Item = &str> {
    self.series.keys().map(String::as_str)
  }
}

impl PriceProvider for InMemoryProvider {
  fn get_prices(
    &self,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    _interval: Interval,
  ) -> anyhow::Result<Vec<PricePoint>> {
    let points = self
      .series
      .get(symbol)
      .ok_or_else(|| anyhow!("unknown symbol '{symbol}'"))?;

    Ok(
      points
        .iter()
        .filter(|p| p.date >= start && p.date <= end)
        .copied()
        .collect(),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn filters_by_range_and_rejects_unknown_symbols() {
    let d = |day| NaiveDate::from_ymd_opt(2024, 5, day).unwrap();
    let provider = InMemoryProvider::new().with_series(
      "AAA",
      vec![
        PricePoint::new(d(3), 12.0),
        PricePoint::new(d(1), 10.0),
        PricePoint::new(d(2), 11.0),
      ],
    );

    let got = provider
      .get_prices("AAA", d(2), d(3), Interval::Daily)
      .unwrap();
    assert_eq!(got, vec![PricePoint::new(d(2), 11.0), PricePoint::new(d(3), 12.0)]);

    let err = provider
      .get_prices("ZZZ", d(1), d(3), Interval::Daily)
      .unwrap_err();
    assert!(err.to_string().contains("unknown symbol"));
  }
}
