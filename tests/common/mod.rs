#![allow(dead_code)]

use chrono::Days;
use chrono::NaiveDate;
use portfolio_rs::data::InMemoryProvider;
use portfolio_rs::data::PricePoint;
use portfolio_rs::PriceHistory;
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::Distribution;
use rand_distr::Normal;

pub fn day(i: usize) -> NaiveDate {
  NaiveDate::from_ymd_opt(2022, 1, 3).unwrap() + Days::new(i as u64)
}

/// Correlated geometric Brownian paths driven by one market factor.
pub fn gbm_panel(seed: u64, n_assets: usize, n_dates: usize) -> Vec<Vec<f64>> {
  let mut rng = StdRng::seed_from_u64(seed);
  let normal = Normal::new(0.0, 1.0).unwrap();
  let drift: Vec<f64> = (0..n_assets).map(|j| 0.0002 + 0.0002 * j as f64).collect();
  let vol: Vec<f64> = (0..n_assets).map(|j| 0.008 + 0.004 * j as f64).collect();

  let mut rows = vec![vec![100.0; n_assets]];
  for _ in 1..n_dates {
    let market: f64 = normal.sample(&mut rng);
    let prev = rows[rows.len() - 1].clone();
    let row = (0..n_assets)
      .map(|j| {
        let idio: f64 = normal.sample(&mut rng);
        let shock = 0.6 * market + 0.8 * idio;
        prev[j] * (drift[j] - 0.5 * vol[j] * vol[j] + vol[j] * shock).exp()
      })
      .collect();
    rows.push(row);
  }
  rows
}

pub fn symbols(n: usize) -> Vec<String> {
  (0..n).map(|j| format!("S{j:02}")).collect()
}

pub fn history(seed: u64, n_assets: usize, n_dates: usize) -> PriceHistory {
  PriceHistory::new(
    symbols(n_assets),
    (0..n_dates).map(day).collect(),
    gbm_panel(seed, n_assets, n_dates),
  )
  .unwrap()
}

pub fn provider(seed: u64, n_assets: usize, n_dates: usize) -> InMemoryProvider {
  let rows = gbm_panel(seed, n_assets, n_dates);
  let mut provider = InMemoryProvider::new();
  for (j, symbol) in symbols(n_assets).into_iter().enumerate() {
    let points = rows
      .iter()
      .enumerate()
      .map(|(t, row)| PricePoint::new(day(t), row[j]))
      .collect();
    provider.insert(symbol, points);
  }
  provider
}
