//! # Price Cache
//!
//! Bounded, time-to-live cache for provider responses. It is an explicit object
//! injected into a [`super::store::PriceSeriesStore`]; nothing is cached process-wide.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use chrono::NaiveDate;
use parking_lot::Mutex;
use tracing::debug;

use super::series::PricePoint;
use crate::config::Interval;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CacheKey {
  symbol: String,
  start: NaiveDate,
  end: NaiveDate,
  interval: Interval,
}

#[derive(Debug)]
struct CacheEntry {
  inserted: Instant,
  points: Arc<Vec<PricePoint>>,
}

/// Provider-response cache with a TTL and an entry cap (oldest entries evicted first).
#[derive(Debug)]
pub struct PriceCache {
  ttl: Duration,
  capacity: usize,
  entries: Mutex<HashMap<CacheKey, CacheEntry>>,
  hits: AtomicU64,
  misses: AtomicU64,
}

impl PriceCache {
  pub fn new(ttl: Duration, capacity: usize) -> Self {
    Self {
      ttl,
      capacity: capacity.max(1),
      entries: Mutex::new(HashMap::new()),
      hits: AtomicU64::new(0),
      misses: AtomicU64::new(0),
    }
  }

  /// Fresh entry for the request, if any. Expired entries are dropped on access.
  pub fn get(
    &self,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    interval: Interval,
  ) -> Option<Arc<Vec<PricePoint>>> {
    let key = CacheKey {
      symbol: symbol.to_string(),
      start,
      end,
      interval,
    };
    let mut entries = self.entries.lock();

    let lookup = entries
      .get(&key)
      .map(|e| (e.inserted.elapsed() < self.ttl, Arc::clone(&e.points)));

    let fresh = match lookup {
      Some((true, points)) => Some(points),
      Some((false, _)) => {
        entries.remove(&key);
        None
      }
      None => None,
    };

    match fresh {
      Some(points) => {
        self.hits.fetch_add(1, Ordering::Relaxed);
        Some(points)
      }
      None => {
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
      }
    }
  }

  pub fn insert(
    &self,
    symbol: &str,
    start: NaiveDate,
    end: NaiveDate,
    interval: Interval,
    points: Arc<Vec<PricePoint>>,
  ) {
    let key = CacheKey {
      symbol: symbol.to_string(),
      start,
      end,
      interval,
    };
    let mut entries = self.entries.lock();

    let ttl = self.ttl;
    entries.retain(|_, e| e.inserted.elapsed() < ttl);

    while entries.len() >= self.capacity && !entries.contains_key(&key) {
      let oldest = entries
        .iter()
        .min_by_key(|(_, e)| e.inserted)
        .map(|(k, _)| k.clone());
      match oldest {
        Some(k) => {
          debug!(symbol = %k.symbol, "evicting cached price series");
          entries.remove(&k);
        }
        None => break,
      }
    }

    entries.insert(
      key,
      CacheEntry {
        inserted: Instant::now(),
        points,
      },
    );
  }

  pub fn len(&self) -> usize {
    self.entries.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn hits(&self) -> u64 {
    self.hits.load(Ordering::Relaxed)
  }

  pub fn misses(&self) -> u64 {
    self.misses.load(Ordering::Relaxed)
  }
}
