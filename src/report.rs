//! Result bundle handed to presentation layers.

use crate::analytics::{PerformanceMetrics, RelativeMetrics, VarResult};
use crate::engine::BacktestConfig;
use crate::metadata::RunMetadata;
use crate::simulator::{RebalanceEvent, RunDiagnostics};
use crate::types::{MarketStatistics, ValueSeries, WeightsHistory};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Everything a completed run produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportBundle {
    pub metadata: RunMetadata,
    /// Configuration as simulated (tickers reflect any dropped ones).
    pub config: BacktestConfig,
    pub portfolio_metrics: PerformanceMetrics,
    pub benchmark_metrics: PerformanceMetrics,
    pub var: VarResult,
    pub relative: Option<RelativeMetrics>,
    pub portfolio_values: ValueSeries,
    pub benchmark_values: ValueSeries,
    pub portfolio_returns: Vec<f64>,
    pub weights: WeightsHistory,
    /// Statistics from the last rebalance that could estimate them.
    pub last_statistics: Option<MarketStatistics>,
    pub events: Vec<RebalanceEvent>,
    pub diagnostics: RunDiagnostics,
}

/// Portfolio and benchmark value over time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapitalGrowthChart {
    pub dates: Vec<NaiveDate>,
    pub portfolio: Vec<f64>,
    pub benchmark: Vec<f64>,
    pub benchmark_name: String,
}

/// One ticker's band in a stacked allocation chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationBand {
    pub ticker: String,
    /// Cumulative weight of the tickers stacked below.
    pub lower: Vec<f64>,
    /// `lower` plus this ticker's weight.
    pub upper: Vec<f64>,
}

/// Stacked weights over time; the top band ends at 1.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AllocationChart {
    pub dates: Vec<NaiveDate>,
    pub bands: Vec<AllocationBand>,
}

impl ReportBundle {
    /// Annualized expected returns from the last estimate, keyed by ticker.
    pub fn last_mu(&self) -> Option<BTreeMap<String, f64>> {
        let stats = self.last_statistics.as_ref()?;
        Some(stats.tickers.iter().cloned().zip(stats.mu.iter().copied()).collect())
    }

    /// Annualized covariance from the last estimate, keyed by ticker pair.
    pub fn last_covariance(&self) -> Option<BTreeMap<(String, String), f64>> {
        let stats = self.last_statistics.as_ref()?;
        let mut cov = BTreeMap::new();
        for (i, a) in stats.tickers.iter().enumerate() {
            for (j, b) in stats.tickers.iter().enumerate() {
                cov.insert((a.clone(), b.clone()), stats.cov[i][j]);
            }
        }
        Some(cov)
    }

    pub fn capital_growth_chart(&self) -> CapitalGrowthChart {
        CapitalGrowthChart {
            dates: self.portfolio_values.dates().to_vec(),
            portfolio: self.portfolio_values.values().to_vec(),
            benchmark: self.benchmark_values.values().to_vec(),
            benchmark_name: self.config.benchmark.clone(),
        }
    }

    pub fn allocation_chart(&self) -> AllocationChart {
        let days = self.weights.len();
        let mut floor = vec![0.0; days];
        let mut bands = Vec::with_capacity(self.weights.tickers().len());

        for (k, ticker) in self.weights.tickers().iter().enumerate() {
            let upper: Vec<f64> = self
                .weights
                .rows()
                .iter()
                .zip(&floor)
                .map(|(w, lo)| lo + w.as_slice()[k])
                .collect();
            bands.push(AllocationBand {
                ticker: ticker.clone(),
                lower: floor,
                upper: upper.clone(),
            });
            floor = upper;
        }

        AllocationChart {
            dates: self.weights.dates().to_vec(),
            bands,
        }
    }

    /// Final weights keyed by ticker.
    pub fn final_weights(&self) -> BTreeMap<String, f64> {
        self.weights
            .last()
            .map(|w| w.to_map(self.weights.tickers()))
            .unwrap_or_default()
    }
}

/// Result of a backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BacktestOutcome {
    Completed(Box<ReportBundle>),
    /// No usable overlapping price history; nothing was simulated.
    DataUnavailable { reason: String },
}

impl BacktestOutcome {
    pub fn data_unavailable(reason: impl Into<String>) -> Self {
        BacktestOutcome::DataUnavailable {
            reason: reason.into(),
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, BacktestOutcome::Completed(_))
    }

    pub fn bundle(&self) -> Option<&ReportBundle> {
        match self {
            BacktestOutcome::Completed(b) => Some(b),
            BacktestOutcome::DataUnavailable { .. } => None,
        }
    }

    pub fn into_bundle(self) -> Option<ReportBundle> {
        match self {
            BacktestOutcome::Completed(b) => Some(*b),
            BacktestOutcome::DataUnavailable { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{PriceTable, WeightVector};

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2021, 1, day).unwrap()
    }

    fn bundle() -> ReportBundle {
        let tickers = vec!["BTC-USD".to_string(), "ETH-USD".to_string()];
        let dates = vec![d(2), d(3)];
        let prices = PriceTable::new(
            tickers.clone(),
            vec![d(1), d(2), d(3)],
            vec![vec![1.0, 1.0], vec![1.1, 1.0], vec![1.1, 1.2]],
        )
        .unwrap();
        let config = BacktestConfig::default();

        ReportBundle {
            metadata: RunMetadata::new(&config, &prices),
            config,
            portfolio_metrics: PerformanceMetrics::default(),
            benchmark_metrics: PerformanceMetrics::default(),
            var: VarResult::default(),
            relative: None,
            portfolio_values: ValueSeries::new(dates.clone(), vec![100.0, 110.0]).unwrap(),
            benchmark_values: ValueSeries::new(dates.clone(), vec![100.0, 105.0]).unwrap(),
            portfolio_returns: vec![0.0, 0.1],
            weights: WeightsHistory::new(
                tickers.clone(),
                dates,
                vec![
                    WeightVector::new(vec![0.25, 0.75]),
                    WeightVector::new(vec![0.6, 0.4]),
                ],
            )
            .unwrap(),
            last_statistics: Some(MarketStatistics {
                tickers,
                mu: vec![0.5, 0.8],
                cov: vec![vec![0.1, 0.02], vec![0.02, 0.3]],
                observations: 2,
                as_of: Some(d(3)),
            }),
            events: Vec::new(),
            diagnostics: RunDiagnostics::default(),
        }
    }

    #[test]
    fn test_allocation_chart_stacks_to_one() {
        let chart = bundle().allocation_chart();
        assert_eq!(chart.bands.len(), 2);
        assert_eq!(chart.bands[0].lower, vec![0.0, 0.0]);
        assert_eq!(chart.bands[0].upper, vec![0.25, 0.6]);
        assert_eq!(chart.bands[1].lower, vec![0.25, 0.6]);
        for top in &chart.bands[1].upper {
            assert!((top - 1.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_capital_growth_chart() {
        let chart = bundle().capital_growth_chart();
        assert_eq!(chart.portfolio, vec![100.0, 110.0]);
        assert_eq!(chart.benchmark, vec![100.0, 105.0]);
        assert_eq!(chart.dates.len(), 2);
    }

    #[test]
    fn test_last_statistics_views() {
        let b = bundle();
        assert_eq!(b.last_mu().unwrap()["ETH-USD"], 0.8);
        let cov = b.last_covariance().unwrap();
        assert_eq!(cov[&("BTC-USD".to_string(), "ETH-USD".to_string())], 0.02);
        assert_eq!(b.final_weights()["BTC-USD"], 0.6);
    }

    #[test]
    fn test_outcome_accessors() {
        let done = BacktestOutcome::Completed(Box::new(bundle()));
        assert!(done.is_completed());
        assert!(done.bundle().is_some());

        let missing = BacktestOutcome::data_unavailable("no overlap");
        assert!(!missing.is_completed());
        assert!(missing.into_bundle().is_none());

        let json = serde_json::to_string(&BacktestOutcome::data_unavailable("x")).unwrap();
        assert!(json.contains("\"status\":\"data_unavailable\""));
    }
}
