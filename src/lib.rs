//! # portfolio-rs
//!
//! $$
//! \mathbf w^\*=\arg\min_{\mathbf w\in\mathcal C}\ \mathbf w^\top\Sigma\mathbf w-\lambda\,\mu^\top\mathbf w
//! $$
//!
//! Portfolio optimization and backtesting engine.
//!
//! - [`data`]: price provider boundary, TTL cache, validated and date-aligned series.
//! - [`risk`]: annualized expected returns and shrunk covariance with a degraded
//!   pseudo-inverse fallback.
//! - [`optimizers`]: minimum variance, maximum Sharpe, target return and risk parity
//!   under budget and box constraints, plus the efficient frontier.
//! - [`backtest`]: fixed-weight and walk-forward simulation with proportional costs.
//! - [`analysis`]: as-held evaluation of positions with an optional rebalance
//!   suggestion.
//!
//! Every computation is synchronous and side-effect free; long solves honour a
//! [`CancelToken`].

pub mod analysis;
pub mod backtest;
pub mod cancel;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod optimizers;
pub mod risk;
pub mod types;

pub use analysis::analyze;
pub use analysis::AnalysisReport;
pub use analysis::AnalysisRequest;
pub use analysis::Position;
pub use backtest::simulate;
pub use backtest::AllocationPolicy;
pub use backtest::BacktestResult;
pub use backtest::RebalanceFrequency;
pub use backtest::WalkForward;
pub use cancel::CancelToken;
pub use config::AnalysisConfig;
pub use config::BacktestConfig;
pub use config::EstimatorConfig;
pub use config::Interval;
pub use config::Lookback;
pub use config::MarketConventions;
pub use config::ReturnKind;
pub use config::SolverConfig;
pub use config::StoreConfig;
pub use data::AlignedReturnMatrix;
pub use data::PriceHistory;
pub use data::PriceProvider;
pub use data::PriceSeriesStore;
pub use engine::PortfolioEngine;
pub use engine::PortfolioEngineConfig;
pub use error::EngineError;
pub use error::Result;
pub use optimizers::efficient_frontier;
pub use optimizers::optimize;
pub use optimizers::Constraints;
pub use risk::estimate;
pub use risk::RiskModel;
pub use types::AllocationResult;
pub use types::Objective;
