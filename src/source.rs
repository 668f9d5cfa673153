//! Price sources.
//!
//! A [`PriceSource`] returns dated closes for one ticker over a date range.
//! Sources may return partial history or nothing at all; the pipeline
//! decides whether that is fatal. Multi-ticker fetching goes through
//! [`fetch_all`], which never aborts on a single failing ticker.

use crate::data::{load_closes, normalize_series, DataConfig};
use crate::error::{BacktestError, Result};
use crate::types::PricePoint;
use chrono::NaiveDate;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Capability to fetch daily closes for a display ticker.
pub trait PriceSource {
    /// Ascending closes for `ticker` within `[start, end]`, possibly partial.
    fn fetch(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<PricePoint>>;

    fn name(&self) -> &str;
}

fn within(series: &[PricePoint], start: NaiveDate, end: NaiveDate) -> Vec<PricePoint> {
    series
        .iter()
        .filter(|p| p.date >= start && p.date <= end)
        .copied()
        .collect()
}

/// Deterministic source backed by series held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemorySource {
    series: HashMap<String, Vec<PricePoint>>,
}

impl InMemorySource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a ticker's series.
    pub fn insert(&mut self, ticker: impl Into<String>, series: Vec<PricePoint>) {
        self.series.insert(ticker.into(), normalize_series(series));
    }

    pub fn with_series(mut self, ticker: impl Into<String>, series: Vec<PricePoint>) -> Self {
        self.insert(ticker, series);
        self
    }

    pub fn contains(&self, ticker: &str) -> bool {
        self.series.contains_key(ticker)
    }

    /// Stored tickers, sorted.
    pub fn tickers(&self) -> Vec<&str> {
        let mut tickers: Vec<&str> = self.series.keys().map(String::as_str).collect();
        tickers.sort_unstable();
        tickers
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }
}

impl PriceSource for InMemorySource {
    fn fetch(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<PricePoint>> {
        let series = self.series.get(ticker).ok_or_else(|| {
            BacktestError::DataUnavailable(format!("No series loaded for {}", ticker))
        })?;
        Ok(within(series, start, end))
    }

    fn name(&self) -> &str {
        "memory"
    }
}

/// Source reading `<dir>/<ticker>.csv` files.
#[derive(Debug, Clone)]
pub struct CsvDirSource {
    dir: PathBuf,
    config: DataConfig,
}

impl CsvDirSource {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self::with_config(dir, DataConfig::default())
    }

    pub fn with_config(dir: impl AsRef<Path>, config: DataConfig) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            config,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, ticker: &str) -> PathBuf {
        self.dir.join(format!("{}.csv", ticker))
    }
}

impl PriceSource for CsvDirSource {
    fn fetch(&self, ticker: &str, start: NaiveDate, end: NaiveDate) -> Result<Vec<PricePoint>> {
        let path = self.path_for(ticker);
        if !path.exists() {
            return Err(BacktestError::DataUnavailable(format!(
                "No file {} for {}",
                path.display(),
                ticker
            )));
        }
        debug!("Loading {} from {}", ticker, path.display());
        let series = load_closes(&path, &self.config)?;
        Ok(within(&series, start, end))
    }

    fn name(&self) -> &str {
        "csv"
    }
}

/// Per-ticker result of a multi-ticker fetch.
#[derive(Debug, Default)]
pub struct FetchReport {
    /// Non-empty series in request order.
    pub series: Vec<(String, Vec<PricePoint>)>,
    /// Tickers that failed or came back empty, with the reason.
    pub failures: Vec<(String, String)>,
}

impl FetchReport {
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed_tickers(&self) -> Vec<&str> {
        self.failures.iter().map(|(t, _)| t.as_str()).collect()
    }

    pub fn get(&self, ticker: &str) -> Option<&[PricePoint]> {
        self.series
            .iter()
            .find(|(t, _)| t == ticker)
            .map(|(_, s)| s.as_slice())
    }
}

/// Fetch every ticker once, recording failures without stopping.
pub fn fetch_all(
    source: &dyn PriceSource,
    tickers: &[String],
    start: NaiveDate,
    end: NaiveDate,
) -> FetchReport {
    let mut report = FetchReport::default();

    for ticker in tickers {
        if report.get(ticker).is_some() {
            continue;
        }
        match source.fetch(ticker, start, end) {
            Ok(series) if series.is_empty() => {
                warn!("{} returned no data for {}", source.name(), ticker);
                report
                    .failures
                    .push((ticker.clone(), "empty series".to_string()));
            }
            Ok(series) => {
                info!("Fetched {} closes for {}", series.len(), ticker);
                report.series.push((ticker.clone(), series));
            }
            Err(e) => {
                warn!("Failed to fetch {} from {}: {}", ticker, source.name(), e);
                report.failures.push((ticker.clone(), e.to_string()));
            }
        }
    }

    report
}
