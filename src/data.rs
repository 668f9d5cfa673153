//! Price loading, alignment and return computation.

use crate::error::{BacktestError, Result};
use crate::types::{PricePoint, PriceTable, ReturnsTable};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use serde::Deserialize;
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tracing::{debug, info, warn};

/// Raw CSV row with flexible header names. Extra columns are ignored.
#[derive(Debug, Deserialize)]
struct CsvRow {
    #[serde(
        alias = "Date",
        alias = "DATE",
        alias = "Timestamp",
        alias = "timestamp",
        alias = "Time",
        alias = "time",
        alias = "datetime",
        alias = "Datetime"
    )]
    date: String,
    #[serde(alias = "Close", alias = "CLOSE", alias = "c", alias = "price", alias = "Price")]
    close: f64,
}

/// CSV source configuration.
#[derive(Debug, Clone)]
pub struct DataConfig {
    /// Date format string for parsing (e.g., "%Y-%m-%d").
    pub date_format: Option<String>,
    /// Whether the CSV has headers.
    pub has_headers: bool,
    /// CSV delimiter character. If None, delimiter is auto-detected.
    pub delimiter: Option<u8>,
    /// Skip invalid rows instead of failing.
    pub skip_invalid: bool,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            date_format: None,
            has_headers: true,
            delimiter: None,
            skip_invalid: true,
        }
    }
}

/// Pick the delimiter that splits the first lines into the same number of
/// fields (at least two: date and close).
fn detect_delimiter(path: &Path) -> Result<u8> {
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let lines: Vec<String> = reader.lines().take(5).filter_map(|l| l.ok()).collect();

    if lines.is_empty() {
        return Ok(b',');
    }

    let mut best = b',';
    let mut best_fields = 0;
    for delim in [b',', b'\t', b';', b'|'] {
        let counts: Vec<usize> = lines
            .iter()
            .map(|line| line.as_bytes().iter().filter(|&&b| b == delim).count() + 1)
            .collect();
        let first = counts[0];
        if first >= 2 && counts.iter().all(|&c| c == first) && first > best_fields {
            best = delim;
            best_fields = first;
        }
    }

    debug!("Detected delimiter {:?} ({} fields)", best as char, best_fields);
    Ok(best)
}

/// Parse a date with an optional explicit format, falling back to common
/// date, datetime and unix-timestamp (seconds or milliseconds) forms.
pub fn parse_date(s: &str, format: Option<&str>) -> Result<NaiveDate> {
    let s = s.trim();

    // Set when an explicit format was given and rejected the input.
    let mut format_error = None;
    if let Some(fmt) = format {
        match NaiveDate::parse_from_str(s, fmt) {
            Ok(d) => return Ok(d),
            Err(e) => format_error = Some(e),
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    let date_formats = ["%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y", "%m/%d/%Y", "%d %b %Y"];
    for fmt in &date_formats {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return Ok(d);
        }
    }

    let datetime_formats = [
        "%Y-%m-%d %H:%M:%S",
        "%Y-%m-%d %H:%M:%S%.f",
        "%Y-%m-%dT%H:%M:%S",
        "%Y-%m-%dT%H:%M:%SZ",
        "%Y-%m-%dT%H:%M:%S%.fZ",
    ];
    for fmt in &datetime_formats {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Ok(dt.date());
        }
    }

    if let Ok(ts) = s.parse::<i64>() {
        // Exchange feeds use milliseconds; anything past year 5138 in seconds is ms.
        let parsed = if ts.abs() >= 100_000_000_000 {
            DateTime::from_timestamp_millis(ts)
        } else {
            DateTime::from_timestamp(ts, 0)
        };
        if let Some(dt) = parsed {
            return Ok(dt.date_naive());
        }
    }

    match format_error {
        Some(e) => Err(e.into()),
        None => Err(BacktestError::DataError(format!(
            "Could not parse date: '{}'",
            s
        ))),
    }
}

/// Load dated closing prices from a CSV file, sorted by date, first
/// occurrence kept on duplicate dates.
pub fn load_closes(path: impl AsRef<Path>, config: &DataConfig) -> Result<Vec<PricePoint>> {
    let path = path.as_ref();
    info!("Loading closes from: {}", path.display());

    let delimiter = match config.delimiter {
        Some(d) => d,
        None => detect_delimiter(path)?,
    };

    let mut reader = ReaderBuilder::new()
        .has_headers(config.has_headers)
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)?;

    let mut points = Vec::new();
    let mut skipped = 0;

    for (row_num, result) in reader.deserialize::<CsvRow>().enumerate() {
        let row = match result {
            Ok(r) => r,
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {}: {}", row_num + 1, e);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(BacktestError::CsvError(e)),
        };

        let date = match parse_date(&row.date, config.date_format.as_deref()) {
            Ok(d) => d,
            Err(e) if config.skip_invalid => {
                debug!("Skipping row {}: {}", row_num + 1, e);
                skipped += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        let point = PricePoint::new(date, row.close);
        if !point.is_valid() {
            if config.skip_invalid {
                debug!("Skipping row {} with close {}", row_num + 1, row.close);
                skipped += 1;
                continue;
            }
            return Err(BacktestError::DataError(format!(
                "Invalid close {} at row {}",
                row.close,
                row_num + 1
            )));
        }
        points.push(point);
    }

    if skipped > 0 {
        warn!("Skipped {} invalid rows in {}", skipped, path.display());
    }

    let points = normalize_series(points);
    if points.is_empty() {
        return Err(BacktestError::DataUnavailable(format!(
            "{} contains no usable prices",
            path.display()
        )));
    }

    info!(
        "Loaded {} closes from {} to {}",
        points.len(),
        points[0].date,
        points[points.len() - 1].date
    );
    Ok(points)
}

/// Sort by date, drop invalid prices, keep the first of duplicate dates.
pub fn normalize_series(mut points: Vec<PricePoint>) -> Vec<PricePoint> {
    points.retain(PricePoint::is_valid);
    points.sort_by_key(|p| p.date);
    let before = points.len();
    points.dedup_by_key(|p| p.date);
    if points.len() < before {
        warn!("Removed {} duplicate dates", before - points.len());
    }
    points
}

/// Inner-join several close series on date within `[start, end]`.
///
/// Dates missing any ticker are dropped, so every row of the result carries
/// a price for every ticker. Ticker order follows `series`.
pub fn align_closes(
    series: &[(String, Vec<PricePoint>)],
    start: NaiveDate,
    end: NaiveDate,
) -> Result<PriceTable> {
    if series.is_empty() {
        return Err(BacktestError::DataUnavailable(
            "No price series to align".to_string(),
        ));
    }

    let maps: Vec<BTreeMap<NaiveDate, f64>> = series
        .iter()
        .map(|(_, points)| {
            let mut map = BTreeMap::new();
            for p in normalize_series(points.clone()) {
                if p.date >= start && p.date <= end {
                    map.entry(p.date).or_insert(p.close);
                }
            }
            map
        })
        .collect();

    let all_dates: BTreeSet<NaiveDate> = maps.iter().flat_map(|m| m.keys().copied()).collect();
    let total_dates = all_dates.len();

    let mut dates = Vec::new();
    let mut rows = Vec::new();
    for date in all_dates {
        let row: Option<Vec<f64>> = maps.iter().map(|m| m.get(&date).copied()).collect();
        if let Some(row) = row {
            dates.push(date);
            rows.push(row);
        }
    }

    if dates.is_empty() {
        return Err(BacktestError::DataUnavailable(format!(
            "No overlapping dates between {} and {}",
            start, end
        )));
    }

    if dates.len() < total_dates {
        debug!(
            "Dropped {} dates missing at least one ticker",
            total_dates - dates.len()
        );
    }

    info!(
        "Aligned {} tickers over {} days ({} to {})",
        series.len(),
        dates.len(),
        dates[0],
        dates[dates.len() - 1]
    );

    let tickers = series.iter().map(|(t, _)| t.clone()).collect();
    PriceTable::new(tickers, dates, rows)
}

/// Daily simple returns of an aligned price table.
///
/// Row `i` of the result is `price[i+1] / price[i] - 1` dated at the later
/// day; the first price row has no return and is dropped.
pub fn compute_returns(prices: &PriceTable) -> Result<ReturnsTable> {
    if prices.len() < 2 {
        return Err(BacktestError::InsufficientHistory {
            required: 2,
            available: prices.len(),
        });
    }

    let rows: Vec<Vec<f64>> = prices
        .rows()
        .windows(2)
        .map(|w| w[1].iter().zip(&w[0]).map(|(now, prev)| now / prev - 1.0).collect())
        .collect();

    ReturnsTable::new(
        prices.tickers().to_vec(),
        prices.dates()[1..].to_vec(),
        rows,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn series(points: &[(NaiveDate, f64)]) -> Vec<PricePoint> {
        points.iter().map(|&(d, c)| PricePoint::new(d, c)).collect()
    }

    #[test]
    fn test_load_closes() {
        let mut file = NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "Date,Open,High,Low,Close,Volume").unwrap();
        writeln!(file, "2024-01-02,102,108,101,107,1200").unwrap();
        writeln!(file, "2024-01-01,100,105,98,102,1000").unwrap();
        writeln!(file, "2024-01-03,107,110,105,108,1100").unwrap();
        file.flush().unwrap();

        let points = load_closes(file.path(), &DataConfig::default()).unwrap();
        assert_eq!(points.len(), 3);
        assert_eq!(points[0].date, d(2024, 1, 1));
        assert_eq!(points[0].close, 102.0);
        assert_eq!(points[2].close, 108.0);
    }

    #[test]
    fn test_load_closes_two_columns_and_bad_rows() {
        let mut file = NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "date;close").unwrap();
        writeln!(file, "2024-01-01;10").unwrap();
        writeln!(file, "not-a-date;11").unwrap();
        writeln!(file, "2024-01-02;-5").unwrap();
        writeln!(file, "2024-01-03;12").unwrap();
        file.flush().unwrap();

        let points = load_closes(file.path(), &DataConfig::default()).unwrap();
        assert_eq!(points.len(), 2);
        assert_eq!(points[1].close, 12.0);
    }

    #[test]
    fn test_load_closes_empty_is_unavailable() {
        let mut file = NamedTempFile::with_suffix(".csv").unwrap();
        writeln!(file, "date,close").unwrap();
        file.flush().unwrap();

        let err = load_closes(file.path(), &DataConfig::default()).unwrap_err();
        assert!(matches!(err, BacktestError::DataUnavailable(_)));
    }

    #[test]
    fn test_parse_date_variants() {
        assert_eq!(parse_date("2024-01-15", None).unwrap(), d(2024, 1, 15));
        assert_eq!(parse_date("2024-01-15 13:45:00", None).unwrap(), d(2024, 1, 15));
        assert_eq!(parse_date("2024-01-15T00:00:00Z", None).unwrap(), d(2024, 1, 15));
        // 2021-01-01T00:00:00Z in seconds and in milliseconds
        assert_eq!(parse_date("1609459200", None).unwrap(), d(2021, 1, 1));
        assert_eq!(parse_date("1609459200000", None).unwrap(), d(2021, 1, 1));
        assert_eq!(
            parse_date("15.01.2024", Some("%d.%m.%Y")).unwrap().month(),
            1
        );
        assert!(matches!(
            parse_date("garbage", None),
            Err(BacktestError::DataError(_))
        ));
        assert!(matches!(
            parse_date("15/13/2024x", Some("%d.%m.%Y")),
            Err(BacktestError::DateParseError(_))
        ));
    }

    #[test]
    fn test_align_inner_join_and_range() {
        let a = series(&[
            (d(2021, 1, 1), 1.0),
            (d(2021, 1, 2), 2.0),
            (d(2021, 1, 3), 3.0),
            (d(2021, 1, 4), 4.0),
        ]);
        let b = series(&[
            (d(2021, 1, 2), 20.0),
            (d(2021, 1, 4), 40.0),
            (d(2021, 1, 5), 50.0),
        ]);
        let table = align_closes(
            &[("A".to_string(), a), ("B".to_string(), b)],
            d(2021, 1, 1),
            d(2021, 1, 4),
        )
        .unwrap();

        assert_eq!(table.dates(), &[d(2021, 1, 2), d(2021, 1, 4)]);
        assert_eq!(table.rows()[1], vec![4.0, 40.0]);
    }

    #[test]
    fn test_align_no_overlap() {
        let a = series(&[(d(2021, 1, 1), 1.0)]);
        let b = series(&[(d(2021, 1, 2), 1.0)]);
        let err = align_closes(
            &[("A".to_string(), a), ("B".to_string(), b)],
            d(2021, 1, 1),
            d(2021, 12, 31),
        )
        .unwrap_err();
        assert!(matches!(err, BacktestError::DataUnavailable(_)));
    }

    #[test]
    fn test_align_keeps_first_duplicate() {
        let a = series(&[(d(2021, 1, 1), 1.0), (d(2021, 1, 1), 9.0), (d(2021, 1, 2), 2.0)]);
        let table = align_closes(&[("A".to_string(), a)], d(2021, 1, 1), d(2021, 1, 2)).unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.rows()[0], vec![1.0]);
    }

    #[test]
    fn test_compute_returns() {
        let table = PriceTable::new(
            vec!["A".into(), "B".into()],
            vec![d(2021, 1, 1), d(2021, 1, 2), d(2021, 1, 3)],
            vec![vec![100.0, 10.0], vec![110.0, 10.0], vec![99.0, 12.0]],
        )
        .unwrap();
        let returns = compute_returns(&table).unwrap();

        assert_eq!(returns.len(), 2);
        assert_eq!(returns.dates(), &[d(2021, 1, 2), d(2021, 1, 3)]);
        assert!((returns.rows()[0][0] - 0.10).abs() < 1e-12);
        assert!((returns.rows()[0][1]).abs() < 1e-12);
        assert!((returns.rows()[1][0] - (-0.10)).abs() < 1e-12);
        assert!((returns.rows()[1][1] - 0.20).abs() < 1e-12);
    }

    #[test]
    fn test_compute_returns_needs_two_rows() {
        let table = PriceTable::new(vec!["A".into()], vec![d(2021, 1, 1)], vec![vec![1.0]]).unwrap();
        assert!(matches!(
            compute_returns(&table),
            Err(BacktestError::InsufficientHistory {
                required: 2,
                available: 1
            })
        ));
    }
}
