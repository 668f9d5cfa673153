//! Cryptofolio - a quarterly-rebalanced maximum-Sharpe portfolio backtester.
//!
//! # Overview
//!
//! Given a set of crypto tickers, a date range and per-asset weight bounds,
//! the backtester:
//!
//! - aligns daily closes from a [`PriceSource`] and turns them into returns
//! - re-optimizes weights for maximum Sharpe ratio on the first trading day
//!   of every calendar quarter, using all history seen so far
//! - holds the weights between rebalances and compounds the daily returns
//! - compares the result against a buy-and-hold benchmark (total and
//!   annualized return, volatility, Sharpe, historical VaR)
//!
//! Data acquisition is kept outside the core: any [`PriceSource`] works,
//! including CSV directories and, with the `exchange` feature, daily
//! candles downloaded from Binance before the run.
//!
//! # Quick Start
//!
//! ```no_run
//! use cryptofolio::{run_backtest, BacktestConfig, CsvDirSource};
//!
//! let config = BacktestConfig {
//!     tickers: vec!["BTC-USD".into(), "ETH-USD".into(), "SOL-USD".into()],
//!     ..Default::default()
//! };
//! let source = CsvDirSource::new("data");
//!
//! match run_backtest(&config, &source).unwrap().bundle() {
//!     Some(report) => println!("Sharpe: {:.2}", report.portfolio_metrics.sharpe_ratio),
//!     None => println!("no overlapping price history"),
//! }
//! ```
//!
//! # Modules
//!
//! - [`types`]: price, returns, weights and statistics containers
//! - [`data`]: CSV loading, alignment and returns
//! - [`source`]: the [`PriceSource`] trait and built-in sources
//! - [`symbols`]: display ticker to exchange pair table
//! - [`optimizer`]: statistics estimation and the mean-variance solver
//! - [`simulator`]: the quarterly rebalancing loop
//! - [`analytics`]: performance metrics, VaR and terminal reports
//! - [`report`]: the result bundle and chart series
//! - [`engine`]: configuration and the [`run_backtest`] entry point
//! - [`config`]: TOML configuration files
//! - [`export`], [`viz`], [`metadata`]: output helpers

pub mod analytics;
pub mod config;
pub mod data;
pub mod engine;
pub mod error;
#[cfg(feature = "exchange")]
pub mod exchange;
pub mod export;
pub mod metadata;
pub mod optimizer;
pub mod report;
pub mod simulator;
pub mod source;
pub mod symbols;
pub mod types;
pub mod viz;

// Re-exports for convenience
pub use analytics::{
    value_at_risk, PerformanceMetrics, RelativeMetrics, ResultFormatter, VarResult,
};
pub use config::BacktestFileConfig;
pub use engine::{run_backtest, BacktestConfig, Backtester};
pub use error::{BacktestError, Result};
pub use optimizer::{
    estimate_statistics, ClarabelSolver, InfeasibleFallback, MeanVarianceSolver,
    PortfolioOptimizer, SolverSettings,
};
pub use report::{AllocationChart, BacktestOutcome, CapitalGrowthChart, ReportBundle};
pub use simulator::{
    RebalanceEvent, RebalanceOutcome, RebalancingSimulator, RunDiagnostics, SimulationOutput,
    SimulationParams,
};
pub use source::{fetch_all, CsvDirSource, FetchReport, InMemorySource, PriceSource};
pub use symbols::SymbolMap;
pub use types::{
    MarketStatistics, PricePoint, PriceTable, ReturnsTable, ValueSeries, WeightBounds,
    WeightVector, WeightsHistory,
};

// Export utilities
pub use export::export_all;

// Visualization utilities
pub use viz::{result_summary, sparkline, sparkline_with_config, SparklineConfig};
