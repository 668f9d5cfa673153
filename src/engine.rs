//! Backtest execution engine.
//!
//! [`run_backtest`] is the single entry point: validate the configuration,
//! fetch every ticker once, align, simulate, analyze and assemble the
//! report. Missing or non-overlapping data is reported as
//! [`BacktestOutcome::DataUnavailable`], never as an error.

use crate::analytics::{value_at_risk, PerformanceMetrics, RelativeMetrics};
use crate::data::{align_closes, compute_returns};
use crate::error::{BacktestError, Result};
use crate::metadata::RunMetadata;
use crate::optimizer::{
    ClarabelSolver, InfeasibleFallback, MeanVarianceSolver, PortfolioOptimizer, SolverSettings,
};
use crate::report::{BacktestOutcome, ReportBundle};
use crate::simulator::{RebalancingSimulator, SimulationParams};
use crate::source::{fetch_all, PriceSource};
use crate::symbols::{DEFAULT_BENCHMARK, DEFAULT_SELECTION};
use crate::types::{PriceTable, ValueSeries, WeightBounds};
use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

/// Everything one backtest run needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestConfig {
    /// Display tickers to optimize over.
    pub tickers: Vec<String>,
    /// Buy-and-hold benchmark ticker.
    pub benchmark: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub initial_capital: f64,
    /// Annualized, as a decimal.
    pub risk_free_rate: f64,
    pub min_weight: f64,
    pub max_weight: f64,
    /// Confidence level of the historical VaR.
    #[serde(default = "default_var_confidence")]
    pub var_confidence: f64,
    /// What to do when a rebalance has no max-Sharpe solution.
    #[serde(default)]
    pub fallback: InfeasibleFallback,
    #[serde(default)]
    pub solver: SolverSettings,
    /// Continue without selected tickers that return no data.
    #[serde(default)]
    pub drop_missing_tickers: bool,
    /// Show progress bar during the simulation.
    #[serde(default)]
    pub show_progress: bool,
}

fn default_var_confidence() -> f64 {
    0.95
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            tickers: DEFAULT_SELECTION.iter().map(|t| t.to_string()).collect(),
            benchmark: DEFAULT_BENCHMARK.to_string(),
            start_date: NaiveDate::from_ymd_opt(2021, 1, 1).unwrap_or_default(),
            end_date: Utc::now().date_naive(),
            initial_capital: 10_000.0,
            risk_free_rate: 0.02,
            min_weight: 0.05,
            max_weight: 0.5,
            var_confidence: default_var_confidence(),
            fallback: InfeasibleFallback::default(),
            solver: SolverSettings::default(),
            drop_missing_tickers: false,
            show_progress: false,
        }
    }
}

impl BacktestConfig {
    pub fn bounds(&self) -> WeightBounds {
        WeightBounds::new(self.min_weight, self.max_weight)
    }

    /// Reject configurations the optimizer cannot satisfy, before any fetch.
    pub fn validate(&self) -> Result<()> {
        let err = |msg: String| -> Result<()> { Err(BacktestError::ConfigError(msg)) };

        if self.tickers.is_empty() {
            return err("At least one ticker must be selected".to_string());
        }
        let mut seen = HashSet::new();
        if let Some(dup) = self.tickers.iter().find(|t| !seen.insert(t.as_str())) {
            return err(format!("Ticker {} selected more than once", dup));
        }
        if self.benchmark.trim().is_empty() {
            return err("Benchmark ticker must not be empty".to_string());
        }
        if !(self.initial_capital.is_finite() && self.initial_capital > 0.0) {
            return err(format!(
                "Initial capital must be positive, got {}",
                self.initial_capital
            ));
        }
        if !(0.0..1.0).contains(&self.risk_free_rate) {
            return err(format!(
                "Risk-free rate must be in [0, 1), got {}",
                self.risk_free_rate
            ));
        }
        for (name, w) in [("Min", self.min_weight), ("Max", self.max_weight)] {
            if !(0.0..=1.0).contains(&w) {
                return err(format!("{} weight must be in [0, 1], got {}", name, w));
            }
        }
        if self.min_weight > self.max_weight {
            return err(format!(
                "Min weight {} exceeds max weight {}",
                self.min_weight, self.max_weight
            ));
        }
        check_feasible(&self.bounds(), self.tickers.len())?;
        if self.start_date > self.end_date {
            return err(format!(
                "Start date {} is after end date {}",
                self.start_date, self.end_date
            ));
        }
        if !(self.var_confidence > 0.0 && self.var_confidence < 1.0) {
            return err(format!(
                "VaR confidence must be in (0, 1), got {}",
                self.var_confidence
            ));
        }
        Ok(())
    }

    /// Tickers to fetch: the selection followed by the benchmark if new.
    pub fn requested_tickers(&self) -> Vec<String> {
        let mut tickers = self.tickers.clone();
        if !tickers.contains(&self.benchmark) {
            tickers.push(self.benchmark.clone());
        }
        tickers
    }

    fn simulation_params(&self) -> SimulationParams {
        SimulationParams {
            bounds: self.bounds(),
            risk_free_rate: self.risk_free_rate,
            fallback: self.fallback,
            show_progress: self.show_progress,
        }
    }
}

fn check_feasible(bounds: &WeightBounds, n: usize) -> Result<()> {
    if bounds.is_feasible_for(n) {
        return Ok(());
    }
    Err(BacktestError::ConfigError(format!(
        "Weight bounds [{}, {}] cannot sum to 1 across {} assets",
        bounds.min_weight, bounds.max_weight, n
    )))
}

/// Validated configuration plus the optimizer it runs with.
pub struct Backtester {
    config: BacktestConfig,
    optimizer: PortfolioOptimizer,
}

impl Backtester {
    /// Validate `config` and set up the default Clarabel solver.
    pub fn new(config: BacktestConfig) -> Result<Self> {
        config.validate()?;
        let solver = ClarabelSolver::new(config.solver.clone());
        Ok(Self {
            config,
            optimizer: PortfolioOptimizer::new(Box::new(solver)),
        })
    }

    /// Replace the mean-variance solver.
    pub fn with_solver(mut self, solver: Box<dyn MeanVarianceSolver>) -> Self {
        self.optimizer = PortfolioOptimizer::new(solver);
        self
    }

    pub fn config(&self) -> &BacktestConfig {
        &self.config
    }

    /// Fetch, align and simulate.
    pub fn run(&self, source: &dyn PriceSource) -> Result<BacktestOutcome> {
        let config = &self.config;
        let requested = config.requested_tickers();
        info!(
            "Fetching {} tickers from {} ({} to {})",
            requested.len(),
            source.name(),
            config.start_date,
            config.end_date
        );

        let report = fetch_all(source, &requested, config.start_date, config.end_date);

        if let Some((_, reason)) = report.failures.iter().find(|(t, _)| *t == config.benchmark) {
            return Ok(BacktestOutcome::data_unavailable(format!(
                "Benchmark {} unavailable: {}",
                config.benchmark, reason
            )));
        }

        let failed: Vec<&str> = report
            .failed_tickers()
            .into_iter()
            .filter(|t| config.tickers.iter().any(|s| s == t))
            .collect();

        let tickers: Vec<String> = if failed.is_empty() {
            config.tickers.clone()
        } else if config.drop_missing_tickers {
            warn!("Dropping tickers without data: {}", failed.join(", "));
            let kept: Vec<String> = config
                .tickers
                .iter()
                .filter(|t| !failed.contains(&t.as_str()))
                .cloned()
                .collect();
            if kept.is_empty() {
                return Ok(BacktestOutcome::data_unavailable(
                    "No selected ticker returned data",
                ));
            }
            if let Err(e) = check_feasible(&config.bounds(), kept.len()) {
                return Ok(BacktestOutcome::data_unavailable(format!(
                    "Remaining tickers {}: {}",
                    kept.join(", "),
                    e
                )));
            }
            kept
        } else {
            return Ok(BacktestOutcome::data_unavailable(format!(
                "No data for {}",
                failed.join(", ")
            )));
        };

        let prices = match align_closes(&report.series, config.start_date, config.end_date) {
            Ok(p) => p,
            Err(BacktestError::DataUnavailable(reason)) => {
                return Ok(BacktestOutcome::data_unavailable(reason));
            }
            Err(e) => return Err(e),
        };
        info!(
            "Aligned {} tickers over {} common dates",
            prices.tickers().len(),
            prices.len()
        );

        self.run_prices(&prices, &tickers)
    }

    /// Simulate over an aligned table holding `tickers` and the benchmark.
    pub fn run_prices(&self, prices: &PriceTable, tickers: &[String]) -> Result<BacktestOutcome> {
        let config = &self.config;

        let universe = prices.select(tickers)?;
        let benchmark_prices = prices.select(std::slice::from_ref(&config.benchmark))?;

        let returns = match compute_returns(&universe) {
            Ok(r) => r,
            Err(BacktestError::InsufficientHistory { available, .. }) => {
                return Ok(BacktestOutcome::data_unavailable(format!(
                    "Only {} overlapping trading days",
                    available
                )));
            }
            Err(e) => return Err(e),
        };
        let benchmark_returns: Vec<f64> = compute_returns(&benchmark_prices)?
            .rows()
            .iter()
            .map(|r| r[0])
            .collect();

        let simulator = RebalancingSimulator::new(&self.optimizer, config.simulation_params());
        let sim = simulator.run(&returns, config.initial_capital)?;

        let benchmark_values = ValueSeries::compound(
            returns.dates().to_vec(),
            &benchmark_returns,
            config.initial_capital,
        )?;

        let portfolio_metrics = PerformanceMetrics::from_values(&sim.values, config.risk_free_rate);
        let benchmark_metrics =
            PerformanceMetrics::from_values(&benchmark_values, config.risk_free_rate);
        let last_value = sim.values.last().map(|(_, v)| v).unwrap_or(config.initial_capital);
        let var = value_at_risk(&sim.portfolio_returns, config.var_confidence, last_value);
        let relative = RelativeMetrics::calculate(
            config.benchmark.clone(),
            &sim.portfolio_returns,
            &benchmark_returns,
            config.risk_free_rate,
        );

        info!(
            "Backtest complete: {:.2}% total return, {:.2} Sharpe (benchmark {:.2}%)",
            portfolio_metrics.total_return * 100.0,
            portfolio_metrics.sharpe_ratio,
            benchmark_metrics.total_return * 100.0
        );

        let mut effective = config.clone();
        effective.tickers = tickers.to_vec();
        let metadata = RunMetadata::new(&effective, prices);

        Ok(BacktestOutcome::Completed(Box::new(ReportBundle {
            metadata,
            config: effective,
            portfolio_metrics,
            benchmark_metrics,
            var,
            relative,
            portfolio_values: sim.values,
            benchmark_values,
            portfolio_returns: sim.portfolio_returns,
            weights: sim.weights,
            last_statistics: sim.last_statistics,
            events: sim.events,
            diagnostics: sim.diagnostics,
        })))
    }
}

/// Validate, fetch, simulate and report in one call.
///
/// Returns `Err` only for configuration problems or internal failures;
/// unusable market data yields [`BacktestOutcome::DataUnavailable`].
pub fn run_backtest(config: &BacktestConfig, source: &dyn PriceSource) -> Result<BacktestOutcome> {
    Backtester::new(config.clone())?.run(source)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(tickers: &[&str], min: f64, max: f64) -> BacktestConfig {
        BacktestConfig {
            tickers: tickers.iter().map(|t| t.to_string()).collect(),
            min_weight: min,
            max_weight: max,
            end_date: NaiveDate::from_ymd_opt(2021, 12, 31).unwrap(),
            ..BacktestConfig::default()
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = BacktestConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.tickers.len(), 5);
        assert_eq!(config.benchmark, "BTC-USD");
    }

    #[test]
    fn test_rejects_min_weight_overflow() {
        let c = config(&["BTC-USD", "ETH-USD", "SOL-USD"], 0.5, 1.0);
        assert!(matches!(c.validate(), Err(BacktestError::ConfigError(_))));
    }

    #[test]
    fn test_rejects_max_weight_underflow() {
        let c = config(&["BTC-USD", "ETH-USD", "SOL-USD"], 0.0, 0.3);
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_rejects_inverted_bounds() {
        assert!(config(&["BTC-USD", "ETH-USD"], 0.4, 0.3).validate().is_err());
    }

    #[test]
    fn test_rejects_bad_scalars() {
        let mut c = config(&["BTC-USD"], 0.0, 1.0);
        c.initial_capital = 0.0;
        assert!(c.validate().is_err());

        let mut c = config(&["BTC-USD"], 0.0, 1.0);
        c.risk_free_rate = 1.0;
        assert!(c.validate().is_err());

        let mut c = config(&["BTC-USD"], 0.0, 1.0);
        c.start_date = NaiveDate::from_ymd_opt(2022, 1, 1).unwrap();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_rejects_empty_and_duplicates() {
        assert!(config(&[], 0.0, 1.0).validate().is_err());
        assert!(config(&["BTC-USD", "BTC-USD"], 0.0, 1.0).validate().is_err());
    }

    #[test]
    fn test_requested_tickers_include_benchmark_once() {
        let mut c = config(&["ETH-USD", "SOL-USD"], 0.0, 1.0);
        assert_eq!(c.requested_tickers(), vec!["ETH-USD", "SOL-USD", "BTC-USD"]);
        c.tickers.push("BTC-USD".into());
        assert_eq!(c.requested_tickers().len(), 3);
    }

    #[test]
    fn test_backtester_new_validates() {
        assert!(Backtester::new(config(&["BTC-USD", "ETH-USD", "SOL-USD"], 0.5, 1.0)).is_err());
        assert!(Backtester::new(config(&["BTC-USD", "ETH-USD"], 0.1, 0.9)).is_ok());
    }
}
