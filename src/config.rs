//! Configuration file support for backtests.
//!
//! Loads backtest configurations from TOML files for reproducibility.
//! Rates and weights are written as percentages in the file and converted
//! to decimals for the engine.

use crate::data::{parse_date, DataConfig};
use crate::engine::BacktestConfig;
use crate::error::{BacktestError, Result};
use crate::optimizer::SolverSettings;
use crate::symbols::{DEFAULT_BENCHMARK, DEFAULT_SELECTION};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::info;

/// Complete backtest configuration loaded from a file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BacktestFileConfig {
    /// General backtest settings.
    #[serde(default)]
    pub backtest: BacktestSettings,
    /// Tickers and benchmark.
    #[serde(default)]
    pub universe: UniverseSettings,
    /// Per-asset weight bounds.
    #[serde(default)]
    pub constraints: ConstraintSettings,
    /// Optimizer settings.
    #[serde(default)]
    pub optimizer: OptimizerSettings,
    /// Where prices come from.
    #[serde(default)]
    pub data: DataSettings,
}

/// General backtest settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestSettings {
    #[serde(default = "default_capital")]
    pub initial_capital: f64,
    /// Start date (YYYY-MM-DD format).
    #[serde(default = "default_start")]
    pub start_date: String,
    /// End date; today when absent.
    #[serde(default)]
    pub end_date: Option<String>,
    /// VaR confidence level in percent.
    #[serde(default = "default_var_confidence_pct")]
    pub var_confidence_pct: f64,
    #[serde(default = "default_true")]
    pub show_progress: bool,
}

fn default_capital() -> f64 { 10_000.0 }
fn default_start() -> String { "2021-01-01".to_string() }
fn default_var_confidence_pct() -> f64 { 95.0 }
fn default_true() -> bool { true }

impl Default for BacktestSettings {
    fn default() -> Self {
        Self {
            initial_capital: default_capital(),
            start_date: default_start(),
            end_date: None,
            var_confidence_pct: default_var_confidence_pct(),
            show_progress: true,
        }
    }
}

/// Tickers and benchmark.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniverseSettings {
    #[serde(default = "default_tickers")]
    pub tickers: Vec<String>,
    #[serde(default = "default_benchmark")]
    pub benchmark: String,
    /// Continue without tickers that return no data.
    #[serde(default)]
    pub drop_missing_tickers: bool,
}

fn default_tickers() -> Vec<String> {
    DEFAULT_SELECTION.iter().map(|t| t.to_string()).collect()
}
fn default_benchmark() -> String { DEFAULT_BENCHMARK.to_string() }

impl Default for UniverseSettings {
    fn default() -> Self {
        Self {
            tickers: default_tickers(),
            benchmark: default_benchmark(),
            drop_missing_tickers: false,
        }
    }
}

/// Per-asset weight bounds in percent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConstraintSettings {
    #[serde(default = "default_min_weight_pct")]
    pub min_weight_pct: f64,
    #[serde(default = "default_max_weight_pct")]
    pub max_weight_pct: f64,
}

fn default_min_weight_pct() -> f64 { 5.0 }
fn default_max_weight_pct() -> f64 { 50.0 }

impl Default for ConstraintSettings {
    fn default() -> Self {
        Self {
            min_weight_pct: default_min_weight_pct(),
            max_weight_pct: default_max_weight_pct(),
        }
    }
}

/// Optimizer settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerSettings {
    /// Annual risk-free rate in percent.
    #[serde(default = "default_risk_free_pct")]
    pub risk_free_rate_pct: f64,
    /// `carry_forward` or `minimum_variance`.
    #[serde(default = "default_fallback")]
    pub fallback: String,
    #[serde(default = "default_max_iter")]
    pub max_iter: u32,
}

fn default_risk_free_pct() -> f64 { 2.0 }
fn default_fallback() -> String { "carry_forward".to_string() }
fn default_max_iter() -> u32 { SolverSettings::default().max_iter }

impl Default for OptimizerSettings {
    fn default() -> Self {
        Self {
            risk_free_rate_pct: default_risk_free_pct(),
            fallback: default_fallback(),
            max_iter: default_max_iter(),
        }
    }
}

/// Price data settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataSettings {
    /// `csv` or `binance`.
    #[serde(default = "default_source")]
    pub source: String,
    /// Directory of `<ticker>.csv` files for the csv source.
    #[serde(default)]
    pub dir: Option<String>,
    /// Date format in CSV.
    #[serde(default)]
    pub date_format: Option<String>,
    /// CSV delimiter; detected when absent.
    #[serde(default)]
    pub delimiter: Option<char>,
    /// Pause between exchange requests.
    #[serde(default = "default_rate_limit_ms")]
    pub rate_limit_ms: u64,
}

fn default_source() -> String { "csv".to_string() }
fn default_rate_limit_ms() -> u64 { 1200 }

impl Default for DataSettings {
    fn default() -> Self {
        Self {
            source: default_source(),
            dir: None,
            date_format: None,
            delimiter: None,
            rate_limit_ms: default_rate_limit_ms(),
        }
    }
}

impl DataSettings {
    /// CSV parsing options for the csv source.
    pub fn data_config(&self) -> DataConfig {
        DataConfig {
            date_format: self.date_format.clone(),
            delimiter: self.delimiter.map(|c| c as u8),
            ..DataConfig::default()
        }
    }
}

impl BacktestFileConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = fs::read_to_string(path)?;
        let config: BacktestFileConfig = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| BacktestError::ConfigError(e.to_string()))?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Convert to BacktestConfig for the engine.
    pub fn to_backtest_config(&self) -> Result<BacktestConfig> {
        let start_date = parse_date(&self.backtest.start_date, Some("%Y-%m-%d"))?;
        let end_date = match &self.backtest.end_date {
            Some(s) => parse_date(s, Some("%Y-%m-%d"))?,
            None => Utc::now().date_naive(),
        };

        Ok(BacktestConfig {
            tickers: self.universe.tickers.clone(),
            benchmark: self.universe.benchmark.clone(),
            start_date,
            end_date,
            initial_capital: self.backtest.initial_capital,
            risk_free_rate: self.optimizer.risk_free_rate_pct / 100.0,
            min_weight: self.constraints.min_weight_pct / 100.0,
            max_weight: self.constraints.max_weight_pct / 100.0,
            var_confidence: self.backtest.var_confidence_pct / 100.0,
            fallback: self.optimizer.fallback.parse()?,
            solver: SolverSettings {
                max_iter: self.optimizer.max_iter,
                ..SolverSettings::default()
            },
            drop_missing_tickers: self.universe.drop_missing_tickers,
            show_progress: self.backtest.show_progress,
        })
    }

    /// Generate an example configuration file content.
    pub fn example() -> String {
        r#"# Cryptofolio Backtest Configuration File
# Quarterly max-Sharpe rebalancing against a buy-and-hold benchmark

[backtest]
initial_capital = 10000.0
start_date = "2021-01-01"
# end_date = "2023-12-31"   # defaults to today
var_confidence_pct = 95.0
show_progress = true

[universe]
tickers = ["BTC-USD", "ETH-USD", "ADA-USD", "SOL-USD", "XRP-USD"]
benchmark = "BTC-USD"
drop_missing_tickers = false

[constraints]
min_weight_pct = 5.0    # 5% floor per asset
max_weight_pct = 50.0   # 50% cap per asset

[optimizer]
risk_free_rate_pct = 2.0
fallback = "carry_forward"   # or "minimum_variance"
max_iter = 200

[data]
source = "csv"          # or "binance"
dir = "data"
# date_format = "%Y-%m-%d"
rate_limit_ms = 1200
"#
        .to_string()
    }
}
