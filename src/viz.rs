//! Terminal visualization of backtest results.
//!
//! Sparklines for the capital-growth curve and a per-ticker allocation
//! strip built from the weights history.
//!
//! # Example
//!
//! ```ignore
//! use cryptofolio::viz::sparkline;
//!
//! let spark = sparkline(&[100.0, 102.0, 101.0, 105.0], 40);
//! println!("Value: {}", spark);
//! ```

use crate::report::ReportBundle;
use crate::types::WeightsHistory;
use std::fmt::Write;

/// Characters used for sparkline rendering, ordered from low to high.
const SPARKLINE_CHARS: [char; 8] = ['▁', '▂', '▃', '▄', '▅', '▆', '▇', '█'];

/// Configuration for sparkline generation.
#[derive(Debug, Clone)]
pub struct SparklineConfig {
    /// Maximum width in characters.
    pub width: usize,
    /// Fixed lower end of the scale instead of the data minimum.
    pub min_value: Option<f64>,
    /// Fixed upper end of the scale instead of the data maximum.
    pub max_value: Option<f64>,
}

impl Default for SparklineConfig {
    fn default() -> Self {
        Self {
            width: 40,
            min_value: None,
            max_value: None,
        }
    }
}

/// Generate an ASCII sparkline from a slice of values.
pub fn sparkline(values: &[f64], width: usize) -> String {
    sparkline_with_config(
        values,
        &SparklineConfig {
            width,
            ..Default::default()
        },
    )
}

/// Generate an ASCII sparkline with custom configuration.
pub fn sparkline_with_config(values: &[f64], config: &SparklineConfig) -> String {
    if values.is_empty() || config.width == 0 {
        return String::new();
    }

    let sampled = downsample(values, config.width);

    let min_val = config
        .min_value
        .unwrap_or_else(|| sampled.iter().cloned().fold(f64::INFINITY, f64::min));
    let max_val = config
        .max_value
        .unwrap_or_else(|| sampled.iter().cloned().fold(f64::NEG_INFINITY, f64::max));
    let range = max_val - min_val;

    sampled
        .iter()
        .map(|&val| {
            let normalized = if range > 0.0 {
                ((val - min_val) / range).clamp(0.0, 1.0)
            } else {
                0.5
            };
            SPARKLINE_CHARS[((normalized * 7.0).round() as usize).min(7)]
        })
        .collect()
}

/// Downsample a slice of values to a target length using averaging.
fn downsample(values: &[f64], target_len: usize) -> Vec<f64> {
    if values.len() <= target_len {
        return values.to_vec();
    }

    let chunk_size = values.len() as f64 / target_len as f64;
    (0..target_len)
        .filter_map(|i| {
            let start = (i as f64 * chunk_size).floor() as usize;
            let end = (((i + 1) as f64 * chunk_size).ceil() as usize).min(values.len());
            (start < end).then(|| values[start..end].iter().sum::<f64>() / (end - start) as f64)
        })
        .collect()
}

/// Portfolio and benchmark value curves on a shared scale.
pub fn growth_sparklines(bundle: &ReportBundle, width: usize) -> String {
    let chart = bundle.capital_growth_chart();
    let all = chart.portfolio.iter().chain(&chart.benchmark);
    let config = SparklineConfig {
        width,
        min_value: Some(all.clone().cloned().fold(f64::INFINITY, f64::min)),
        max_value: Some(all.cloned().fold(f64::NEG_INFINITY, f64::max)),
    };

    let label_width = chart.benchmark_name.len().max("Portfolio".len());
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<w$}  {}",
        "Portfolio",
        sparkline_with_config(&chart.portfolio, &config),
        w = label_width
    );
    let _ = write!(
        out,
        "{:<w$}  {}",
        chart.benchmark_name,
        sparkline_with_config(&chart.benchmark, &config),
        w = label_width
    );
    out
}

/// One line per ticker: its weight over time on a fixed 0..1 scale.
pub fn allocation_strip(weights: &WeightsHistory, width: usize) -> String {
    let config = SparklineConfig {
        width,
        min_value: Some(0.0),
        max_value: Some(1.0),
    };
    let label_width = weights.tickers().iter().map(|t| t.len()).max().unwrap_or(0);

    let mut lines = Vec::with_capacity(weights.tickers().len());
    for ticker in weights.tickers() {
        let column = weights.column(ticker).unwrap_or_default();
        let last = column.last().copied().unwrap_or(0.0);
        lines.push(format!(
            "{:<w$}  {}  {:>5.1}%",
            ticker,
            sparkline_with_config(&column, &config),
            last * 100.0,
            w = label_width
        ));
    }
    lines.join("\n")
}

/// Format a number as a percentage with sign.
fn format_pct(value: f64) -> String {
    if value >= 0.0 {
        format!("+{:.1}%", value)
    } else {
        format!("{:.1}%", value)
    }
}

/// Compact summary: both curves, headline numbers and allocation strip.
pub fn result_summary(bundle: &ReportBundle, width: usize) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", growth_sparklines(bundle, width));
    let _ = writeln!(
        out,
        "Return {} vs {} | Sharpe {:.2} vs {:.2}",
        format_pct(bundle.portfolio_metrics.total_return * 100.0),
        format_pct(bundle.benchmark_metrics.total_return * 100.0),
        bundle.portfolio_metrics.sharpe_ratio,
        bundle.benchmark_metrics.sharpe_ratio
    );
    let _ = writeln!(out);
    out.push_str(&allocation_strip(&bundle.weights, width));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::WeightVector;
    use chrono::NaiveDate;

    #[test]
    fn test_sparkline_empty() {
        assert_eq!(sparkline(&[], 10), "");
        assert_eq!(sparkline(&[1.0, 2.0], 0), "");
    }

    #[test]
    fn test_sparkline_increasing() {
        let values: Vec<f64> = (0..8).map(|i| i as f64).collect();
        let chars: Vec<char> = sparkline(&values, 8).chars().collect();
        assert_eq!(chars.len(), 8);
        assert_eq!(chars[0], SPARKLINE_CHARS[0]);
        assert_eq!(chars[7], SPARKLINE_CHARS[7]);
    }

    #[test]
    fn test_sparkline_constant() {
        for ch in sparkline(&[50.0; 10], 10).chars() {
            assert_eq!(ch, SPARKLINE_CHARS[4]);
        }
    }

    #[test]
    fn test_sparkline_downsampling() {
        let values: Vec<f64> = (0..100).map(|i| i as f64).collect();
        assert_eq!(sparkline(&values, 10).chars().count(), 10);

        let downsampled = downsample(&values, 10);
        assert_eq!(downsampled.len(), 10);
        assert!(downsampled[0] < 10.0);
        assert!(downsampled[9] > 90.0);
    }

    #[test]
    fn test_allocation_strip() {
        let dates: Vec<NaiveDate> = (1..=4)
            .map(|d| NaiveDate::from_ymd_opt(2021, 1, d).unwrap())
            .collect();
        let rows = vec![
            WeightVector::new(vec![1.0, 0.0]),
            WeightVector::new(vec![1.0, 0.0]),
            WeightVector::new(vec![0.0, 1.0]),
            WeightVector::new(vec![0.0, 1.0]),
        ];
        let history =
            WeightsHistory::new(vec!["BTC-USD".into(), "SOL-USD".into()], dates, rows).unwrap();

        let strip = allocation_strip(&history, 4);
        let lines: Vec<&str> = strip.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("BTC-USD"));
        assert!(lines[0].contains("██▁▁"));
        assert!(lines[1].contains("▁▁██"));
        assert!(lines[1].ends_with("100.0%"));
    }

    #[test]
    fn test_format_pct() {
        assert_eq!(format_pct(10.5), "+10.5%");
        assert_eq!(format_pct(-5.3), "-5.3%");
    }
}
