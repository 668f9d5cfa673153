//! Core data types for the backtester.

use crate::error::{BacktestError, Result};
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Trading days per year used for annualization.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

/// Tolerance for weight sums and bound checks.
pub const WEIGHT_TOLERANCE: f64 = 1e-6;

/// A single dated closing price.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub date: NaiveDate,
    pub close: f64,
}

impl PricePoint {
    pub fn new(date: NaiveDate, close: f64) -> Self {
        Self { date, close }
    }

    /// A usable price is finite and strictly positive.
    pub fn is_valid(&self) -> bool {
        self.close.is_finite() && self.close > 0.0
    }
}

/// Calendar quarter of a date as `(year, quarter)` with quarter in 1..=4.
pub fn quarter_of(date: NaiveDate) -> (i32, u32) {
    (date.year(), date.month0() / 3 + 1)
}

fn check_dates(dates: &[NaiveDate]) -> Result<()> {
    if let Some(w) = dates.windows(2).find(|w| w[1] <= w[0]) {
        return Err(BacktestError::InvalidInput(format!(
            "Dates must be strictly increasing: {} followed by {}",
            w[0], w[1]
        )));
    }
    Ok(())
}

fn check_shape(tickers: &[String], dates: &[NaiveDate], rows: &[Vec<f64>]) -> Result<()> {
    if rows.len() != dates.len() {
        return Err(BacktestError::InvalidInput(format!(
            "Row count {} does not match date count {}",
            rows.len(),
            dates.len()
        )));
    }
    if let Some((i, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != tickers.len()) {
        return Err(BacktestError::InvalidInput(format!(
            "Row {} has {} values, expected {}",
            i,
            row.len(),
            tickers.len()
        )));
    }
    check_dates(dates)
}

/// Aligned daily closes: every date carries a positive price for every ticker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceTable {
    tickers: Vec<String>,
    dates: Vec<NaiveDate>,
    rows: Vec<Vec<f64>>,
}

impl PriceTable {
    /// Build a table, validating shape, ordering and positivity.
    pub fn new(tickers: Vec<String>, dates: Vec<NaiveDate>, rows: Vec<Vec<f64>>) -> Result<Self> {
        check_shape(&tickers, &dates, &rows)?;
        for (date, row) in dates.iter().zip(&rows) {
            if let Some(p) = row.iter().find(|p| !(p.is_finite() && **p > 0.0)) {
                return Err(BacktestError::InvalidInput(format!(
                    "Non-positive price {} on {}",
                    p, date
                )));
            }
        }
        Ok(Self {
            tickers,
            dates,
            rows,
        })
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    pub fn column_index(&self, ticker: &str) -> Option<usize> {
        self.tickers.iter().position(|t| t == ticker)
    }

    /// All closes for one ticker, in date order.
    pub fn column(&self, ticker: &str) -> Option<Vec<f64>> {
        let idx = self.column_index(ticker)?;
        Some(self.rows.iter().map(|r| r[idx]).collect())
    }

    /// Restrict the table to a subset of tickers, in the given order.
    pub fn select(&self, tickers: &[String]) -> Result<PriceTable> {
        let indices: Vec<usize> = tickers
            .iter()
            .map(|t| {
                self.column_index(t).ok_or_else(|| {
                    BacktestError::InvalidInput(format!("Ticker {} not in price table", t))
                })
            })
            .collect::<Result<_>>()?;

        let rows = self
            .rows
            .iter()
            .map(|r| indices.iter().map(|&i| r[i]).collect())
            .collect();

        Ok(PriceTable {
            tickers: tickers.to_vec(),
            dates: self.dates.clone(),
            rows,
        })
    }
}

/// Daily simple returns; row `i` is the return from date `i-1` to date `i`
/// of the originating price table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnsTable {
    tickers: Vec<String>,
    dates: Vec<NaiveDate>,
    rows: Vec<Vec<f64>>,
}

impl ReturnsTable {
    pub fn new(tickers: Vec<String>, dates: Vec<NaiveDate>, rows: Vec<Vec<f64>>) -> Result<Self> {
        check_shape(&tickers, &dates, &rows)?;
        if rows.iter().flatten().any(|r| !r.is_finite()) {
            return Err(BacktestError::InvalidInput(
                "Returns must be finite".to_string(),
            ));
        }
        Ok(Self {
            tickers,
            dates,
            rows,
        })
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn row(&self, i: usize) -> Option<&[f64]> {
        self.rows.get(i).map(|r| r.as_slice())
    }

    pub fn len(&self) -> usize {
        self.dates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dates.is_empty()
    }

    /// Rows from the start of the series through day `end` inclusive.
    pub fn expanding_window(&self, end: usize) -> &[Vec<f64>] {
        let end = (end + 1).min(self.rows.len());
        &self.rows[..end]
    }

    pub fn column_index(&self, ticker: &str) -> Option<usize> {
        self.tickers.iter().position(|t| t == ticker)
    }

    pub fn column(&self, ticker: &str) -> Option<Vec<f64>> {
        let idx = self.column_index(ticker)?;
        Some(self.rows.iter().map(|r| r[idx]).collect())
    }
}

/// Uniform per-asset weight bounds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightBounds {
    pub min_weight: f64,
    pub max_weight: f64,
}

impl WeightBounds {
    pub fn new(min_weight: f64, max_weight: f64) -> Self {
        Self {
            min_weight,
            max_weight,
        }
    }

    /// Long-only, unconstrained per asset.
    pub fn unconstrained() -> Self {
        Self::new(0.0, 1.0)
    }

    /// `min * n <= 1 <= max * n` and `min <= max`.
    pub fn is_feasible_for(&self, n_assets: usize) -> bool {
        let n = n_assets as f64;
        n_assets > 0
            && self.min_weight <= self.max_weight
            && self.min_weight * n <= 1.0 + WEIGHT_TOLERANCE
            && self.max_weight * n >= 1.0 - WEIGHT_TOLERANCE
    }

    pub fn clamp(&self, w: f64) -> f64 {
        w.clamp(self.min_weight, self.max_weight)
    }

    pub fn contains(&self, w: f64, tolerance: f64) -> bool {
        w >= self.min_weight - tolerance && w <= self.max_weight + tolerance
    }
}

impl Default for WeightBounds {
    fn default() -> Self {
        Self::new(0.05, 0.5)
    }
}

/// Portfolio weights ordered like the owning table's tickers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightVector {
    weights: Vec<f64>,
}

impl WeightVector {
    pub fn new(weights: Vec<f64>) -> Self {
        Self { weights }
    }

    /// 1/n in every asset.
    pub fn equal(n: usize) -> Self {
        if n == 0 {
            return Self::new(Vec::new());
        }
        Self::new(vec![1.0 / n as f64; n])
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.weights
    }

    pub fn get(&self, i: usize) -> Option<f64> {
        self.weights.get(i).copied()
    }

    pub fn len(&self) -> usize {
        self.weights.len()
    }

    pub fn is_empty(&self) -> bool {
        self.weights.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.weights.iter().sum()
    }

    /// Weighted sum of a return row.
    pub fn dot(&self, returns: &[f64]) -> f64 {
        self.weights
            .iter()
            .zip(returns)
            .map(|(w, r)| w * r)
            .sum()
    }

    pub fn is_normalized(&self, tolerance: f64) -> bool {
        (self.sum() - 1.0).abs() <= tolerance
    }

    pub fn is_within(&self, bounds: &WeightBounds, tolerance: f64) -> bool {
        self.weights.iter().all(|&w| bounds.contains(w, tolerance))
    }

    /// Clamp into the box, then spread the gap to one over the room each
    /// weight has left before its bound. The result stays inside the box.
    ///
    /// `None` when the box cannot hold a fully invested vector.
    pub fn normalized_within(mut self, bounds: &WeightBounds) -> Option<Self> {
        if self.weights.iter().any(|w| !w.is_finite()) {
            return None;
        }
        for w in &mut self.weights {
            *w = bounds.clamp(*w);
        }

        let gap = 1.0 - self.sum();
        let room: Vec<f64> = if gap > 0.0 {
            self.weights.iter().map(|w| bounds.max_weight - w).collect()
        } else {
            self.weights.iter().map(|w| w - bounds.min_weight).collect()
        };
        let total_room: f64 = room.iter().sum();
        if gap.abs() > total_room + WEIGHT_TOLERANCE {
            return None;
        }
        if total_room > 0.0 {
            for (w, r) in self.weights.iter_mut().zip(&room) {
                *w += gap * r / total_room;
            }
        }
        Some(self)
    }

    /// Keyed view for presentation.
    pub fn to_map(&self, tickers: &[String]) -> BTreeMap<String, f64> {
        tickers
            .iter()
            .cloned()
            .zip(self.weights.iter().copied())
            .collect()
    }
}

/// One weight vector per trading day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightsHistory {
    tickers: Vec<String>,
    dates: Vec<NaiveDate>,
    rows: Vec<WeightVector>,
}

impl WeightsHistory {
    pub fn new(tickers: Vec<String>, dates: Vec<NaiveDate>, rows: Vec<WeightVector>) -> Result<Self> {
        if rows.len() != dates.len() {
            return Err(BacktestError::InvalidInput(format!(
                "Weights history has {} rows for {} dates",
                rows.len(),
                dates.len()
            )));
        }
        if rows.iter().any(|r| r.len() != tickers.len()) {
            return Err(BacktestError::InvalidInput(
                "Weight vector length does not match ticker count".to_string(),
            ));
        }
        check_dates(&dates)?;
        Ok(Self {
            tickers,
            dates,
            rows,
        })
    }

    pub fn tickers(&self) -> &[String] {
        &self.tickers
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn rows(&self) -> &[WeightVector] {
        &self.rows
    }

    pub fn row(&self, i: usize) -> Option<&WeightVector> {
        self.rows.get(i)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Weight of one ticker on every day.
    pub fn column(&self, ticker: &str) -> Option<Vec<f64>> {
        let idx = self.tickers.iter().position(|t| t == ticker)?;
        Some(self.rows.iter().map(|r| r.as_slice()[idx]).collect())
    }

    pub fn last(&self) -> Option<&WeightVector> {
        self.rows.last()
    }
}

/// Annualized mean returns and covariance estimated from a returns window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketStatistics {
    pub tickers: Vec<String>,
    /// Annualized expected returns (daily mean x 252).
    pub mu: Vec<f64>,
    /// Annualized covariance matrix (daily covariance x 252).
    pub cov: Vec<Vec<f64>>,
    /// Number of daily observations behind the estimate.
    pub observations: usize,
    /// Last date of the estimation window.
    pub as_of: Option<NaiveDate>,
}

impl MarketStatistics {
    pub fn n_assets(&self) -> usize {
        self.mu.len()
    }

    pub fn expected_return(&self, ticker: &str) -> Option<f64> {
        let i = self.tickers.iter().position(|t| t == ticker)?;
        Some(self.mu[i])
    }

    pub fn covariance(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.tickers.iter().position(|t| t == a)?;
        let j = self.tickers.iter().position(|t| t == b)?;
        Some(self.cov[i][j])
    }

    /// True when every covariance entry is numerically zero.
    pub fn is_degenerate(&self, epsilon: f64) -> bool {
        self.cov.iter().flatten().all(|c| c.abs() <= epsilon)
    }

    pub fn portfolio_return(&self, weights: &WeightVector) -> f64 {
        weights.dot(&self.mu)
    }

    pub fn portfolio_variance(&self, weights: &WeightVector) -> f64 {
        let w = weights.as_slice();
        let mut variance = 0.0;
        for (i, wi) in w.iter().enumerate() {
            for (j, wj) in w.iter().enumerate() {
                variance += wi * wj * self.cov[i][j];
            }
        }
        variance
    }

    pub fn portfolio_volatility(&self, weights: &WeightVector) -> f64 {
        self.portfolio_variance(weights).max(0.0).sqrt()
    }

    /// Ex-ante Sharpe ratio of a weight vector; 0 when volatility is 0.
    pub fn sharpe_ratio(&self, weights: &WeightVector, risk_free_rate: f64) -> f64 {
        let vol = self.portfolio_volatility(weights);
        if vol == 0.0 {
            return 0.0;
        }
        (self.portfolio_return(weights) - risk_free_rate) / vol
    }
}

/// Dated portfolio (or benchmark) values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueSeries {
    dates: Vec<NaiveDate>,
    values: Vec<f64>,
}

impl ValueSeries {
    pub fn new(dates: Vec<NaiveDate>, values: Vec<f64>) -> Result<Self> {
        if dates.len() != values.len() {
            return Err(BacktestError::InvalidInput(format!(
                "Value series has {} values for {} dates",
                values.len(),
                dates.len()
            )));
        }
        check_dates(&dates)?;
        Ok(Self { dates, values })
    }

    /// `initial_capital * prod(1 + r)` up to each day.
    pub fn compound(dates: Vec<NaiveDate>, returns: &[f64], initial_capital: f64) -> Result<Self> {
        let mut value = initial_capital;
        let values = returns
            .iter()
            .map(|r| {
                value *= 1.0 + r;
                value
            })
            .collect();
        Self::new(dates, values)
    }

    pub fn dates(&self) -> &[NaiveDate] {
        &self.dates
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn first(&self) -> Option<(NaiveDate, f64)> {
        Some((*self.dates.first()?, *self.values.first()?))
    }

    pub fn last(&self) -> Option<(NaiveDate, f64)> {
        Some((*self.dates.last()?, *self.values.last()?))
    }

    /// Day-over-day percentage changes (one shorter than the series).
    pub fn pct_change(&self) -> Vec<f64> {
        self.values
            .windows(2)
            .map(|w| (w[1] - w[0]) / w[0])
            .collect()
    }

    /// Calendar days between first and last observation.
    pub fn span_days(&self) -> i64 {
        match (self.dates.first(), self.dates.last()) {
            (Some(a), Some(b)) => (*b - *a).num_days(),
            _ => 0,
        }
    }
}

impl fmt::Display for WeightVector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.weights.iter().map(|w| format!("{:.4}", w)).collect();
        write!(f, "[{}]", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn test_quarter_of() {
        assert_eq!(quarter_of(d(2021, 1, 1)), (2021, 1));
        assert_eq!(quarter_of(d(2021, 3, 31)), (2021, 1));
        assert_eq!(quarter_of(d(2021, 4, 1)), (2021, 2));
        assert_eq!(quarter_of(d(2021, 9, 30)), (2021, 3));
        assert_eq!(quarter_of(d(2021, 12, 31)), (2021, 4));
    }

    #[test]
    fn test_price_table_rejects_unordered_dates() {
        let result = PriceTable::new(
            vec!["A".into()],
            vec![d(2021, 1, 2), d(2021, 1, 1)],
            vec![vec![1.0], vec![2.0]],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_price_table_rejects_non_positive() {
        let result = PriceTable::new(
            vec!["A".into()],
            vec![d(2021, 1, 1), d(2021, 1, 2)],
            vec![vec![1.0], vec![0.0]],
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_price_table_select() {
        let table = PriceTable::new(
            vec!["A".into(), "B".into()],
            vec![d(2021, 1, 1)],
            vec![vec![1.0, 2.0]],
        )
        .unwrap();
        let selected = table.select(&["B".to_string()]).unwrap();
        assert_eq!(selected.tickers(), &["B".to_string()]);
        assert_eq!(selected.rows()[0], vec![2.0]);
        assert!(table.select(&["C".to_string()]).is_err());
    }

    #[test]
    fn test_expanding_window() {
        let table = ReturnsTable::new(
            vec!["A".into()],
            vec![d(2021, 1, 1), d(2021, 1, 2), d(2021, 1, 3)],
            vec![vec![0.1], vec![0.2], vec![0.3]],
        )
        .unwrap();
        assert_eq!(table.expanding_window(0).len(), 1);
        assert_eq!(table.expanding_window(1).len(), 2);
        assert_eq!(table.expanding_window(10).len(), 3);
    }

    #[test]
    fn test_weight_bounds_feasibility() {
        assert!(WeightBounds::new(0.05, 0.5).is_feasible_for(5));
        assert!(!WeightBounds::new(0.5, 1.0).is_feasible_for(3));
        assert!(!WeightBounds::new(0.0, 0.1).is_feasible_for(5));
        assert!(!WeightBounds::new(0.3, 0.2).is_feasible_for(4));
        assert!(WeightBounds::new(0.25, 0.25).is_feasible_for(4));
    }

    #[test]
    fn test_weight_vector_normalized_within() {
        let bounds = WeightBounds::new(0.0, 1.0);
        let w = WeightVector::new(vec![0.6, 0.6, -1e-9])
            .normalized_within(&bounds)
            .unwrap();
        assert!(w.is_normalized(WEIGHT_TOLERANCE));
        assert!(w.is_within(&bounds, WEIGHT_TOLERANCE));
        assert!((w.as_slice()[0] - 0.5).abs() < 1e-12);

        // Plain rescaling would push the floored weights below 0.3.
        let bounds = WeightBounds::new(0.3, 1.0);
        let w = WeightVector::new(vec![0.0, 0.0, 1.0])
            .normalized_within(&bounds)
            .unwrap();
        assert!(w.is_within(&bounds, 1e-12));
        assert!((w.as_slice()[2] - 0.4).abs() < 1e-12);

        assert!(WeightVector::new(vec![0.5, 0.5])
            .normalized_within(&WeightBounds::new(0.0, 0.4))
            .is_none());
    }

    #[test]
    fn test_weight_vector_dot() {
        let w = WeightVector::new(vec![0.25, 0.75]);
        assert!((w.dot(&[0.04, -0.02]) - (-0.005)).abs() < 1e-12);
    }

    #[test]
    fn test_equal_weights() {
        let w = WeightVector::equal(4);
        assert_eq!(w.as_slice(), &[0.25, 0.25, 0.25, 0.25]);
        assert!(WeightVector::equal(0).is_empty());
    }

    #[test]
    fn test_statistics_portfolio_moments() {
        let stats = MarketStatistics {
            tickers: vec!["A".into(), "B".into()],
            mu: vec![0.10, 0.20],
            cov: vec![vec![0.04, 0.0], vec![0.0, 0.09]],
            observations: 10,
            as_of: None,
        };
        let w = WeightVector::new(vec![0.5, 0.5]);
        assert!((stats.portfolio_return(&w) - 0.15).abs() < 1e-12);
        assert!((stats.portfolio_variance(&w) - 0.0325).abs() < 1e-12);
        assert_eq!(stats.expected_return("B"), Some(0.20));
        assert_eq!(stats.covariance("A", "A"), Some(0.04));
        assert!(!stats.is_degenerate(1e-12));
    }

    #[test]
    fn test_value_series_compound() {
        let dates = vec![d(2021, 1, 1), d(2021, 1, 2), d(2021, 1, 3)];
        let series = ValueSeries::compound(dates, &[0.1, -0.1, 0.0], 100.0).unwrap();
        let values = series.values();
        assert!((values[0] - 110.0).abs() < 1e-9);
        assert!((values[1] - 99.0).abs() < 1e-9);
        assert!((values[2] - 99.0).abs() < 1e-9);
        assert_eq!(series.span_days(), 2);
        assert_eq!(series.pct_change().len(), 2);
    }
}
