//! # Errors
//!
//! Failure taxonomy shared by the store, estimator, optimizer and simulator.
//! Results are built atomically: an operation either returns a fully valid value
//! or one of these variants.

use thiserror::Error;

/// Engine-wide error type.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
  /// A symbol has no usable history overlapping the rest of the universe, or the
  /// provider returned an errored or garbled series for it.
  #[error("data gap for '{symbol}': {reason}")]
  DataGap { symbol: String, reason: String },

  /// The aligned window is too short for a stable estimate.
  #[error("insufficient history: {available} observations, {required} required")]
  InsufficientHistory { available: usize, required: usize },

  /// The covariance matrix is singular after shrinkage and the pseudo-inverse
  /// fallback is disabled.
  #[error("degenerate covariance matrix ({assets} assets, shrinkage {shrinkage})")]
  DegenerateCovariance { assets: usize, shrinkage: f64 },

  /// Bounds and equality/target constraints admit no feasible weight vector.
  #[error("infeasible constraints: {0}")]
  InfeasibleConstraints(String),

  /// An iterative solve did not converge inside its iteration or time budget.
  #[error("no convergence after {iterations} iterations (residual {residual:.3e}): {reason}")]
  Convergence {
    iterations: usize,
    residual: f64,
    reason: String,
  },

  /// Price history with fewer than two observations.
  #[error("price history has {0} observations, at least 2 required")]
  EmptyHistory(usize),

  /// The caller cancelled the computation.
  #[error("computation cancelled")]
  Cancelled,

  /// Malformed caller input.
  #[error("invalid input: {0}")]
  InvalidInput(String),
}

impl EngineError {
  pub(crate) fn data_gap(symbol: impl Into<String>, reason: impl Into<String>) -> Self {
    Self::DataGap {
      symbol: symbol.into(),
      reason: reason.into(),
    }
  }

  pub(crate) fn invalid(msg: impl Into<String>) -> Self {
    Self::InvalidInput(msg.into())
  }

  pub(crate) fn infeasible(msg: impl Into<String>) -> Self {
    Self::InfeasibleConstraints(msg.into())
  }
}

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, EngineError>;
