//! # Cancellation
//!
//! Cooperative cancellation for long-running solves. A token is cheap to clone;
//! all clones observe the same flag.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use crate::error::EngineError;
use crate::error::Result;

/// Shared cancellation flag checked between solver iterations.
#[derive(Clone, Debug, Default)]
pub struct CancelToken {
  flag: Arc<AtomicBool>,
}

impl CancelToken {
  pub fn new() -> Self {
    Self::default()
  }

  /// Request cancellation. Every clone of this token observes it.
  pub fn cancel(&self) {
    self.flag.store(true, Ordering::SeqCst);
  }

  pub fn is_cancelled(&self) -> bool {
    self.flag.load(Ordering::SeqCst)
  }

  /// `Err(Cancelled)` once cancellation was requested.
  pub fn check(&self) -> Result<()> {
    if self.is_cancelled() {
      Err(EngineError::Cancelled)
    } else {
      Ok(())
    }
  }
}

/// Iteration guard combining the cancellation token with an optional wall-clock cap.
#[derive(Debug)]
pub(crate) struct Budget<'a> {
  token: &'a CancelToken,
  deadline: Option<Instant>,
}

impl<'a> Budget<'a> {
  pub(crate) fn new(token: &'a CancelToken, time_limit: Option<Duration>) -> Self {
    Self {
      token,
      deadline: time_limit.map(|limit| Instant::now() + limit),
    }
  }

  /// Called once per iteration.
  pub(crate) fn tick(&self, iteration: usize, residual: f64) -> Result<()> {
    self.token.check()?;
    if let Some(deadline) = self.deadline {
      if Instant::now() >= deadline {
        return Err(EngineError::Convergence {
          iterations: iteration,
          residual,
          reason: "time limit exhausted".into(),
        });
      }
    }
    Ok(())
  }
}
