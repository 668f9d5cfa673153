//! Error types for the backtester.

use thiserror::Error;

/// Main error type for the backtester.
#[derive(Error, Debug)]
pub enum BacktestError {
    #[error("Data error: {0}")]
    DataError(String),

    #[error("CSV parsing error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Date parsing error: {0}")]
    DateParseError(#[from] chrono::ParseError),

    #[error("Invalid configuration: {0}")]
    ConfigError(String),

    /// Nothing usable came back for a required ticker, or the aligned
    /// window is empty. Fatal for the run, surfaced as
    /// [`BacktestOutcome::DataUnavailable`](crate::report::BacktestOutcome).
    #[error("Data unavailable: {0}")]
    DataUnavailable(String),

    /// Fewer observations than an estimate needs.
    #[error("Insufficient history: need {required} observations, have {available}")]
    InsufficientHistory { required: usize, available: usize },

    /// The solver could not produce weights for a window.
    #[error("Optimization infeasible: {0}")]
    OptimizationInfeasible(String),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[cfg(feature = "exchange")]
    #[error("HTTP error: {0}")]
    HttpError(#[from] reqwest::Error),
}

impl BacktestError {
    /// Whether this error is absorbed by the rebalancing loop rather than
    /// aborting the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            BacktestError::InsufficientHistory { .. } | BacktestError::OptimizationInfeasible(_)
        )
    }
}

/// Result type alias for backtest operations.
pub type Result<T> = std::result::Result<T, BacktestError>;
