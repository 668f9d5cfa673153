//! Binance REST client for daily candles.
//!
//! Daily klines are fetched in pages of up to [`MAX_PAGE`] candles. The
//! cursor starts at the range start (00:00 UTC), moves to one millisecond
//! past the last open time of each page, and a fixed pause is observed
//! between requests to stay inside the public rate limit.

use crate::error::{BacktestError, Result};
use crate::source::InMemorySource;
use crate::symbols::SymbolMap;
use crate::types::PricePoint;
use chrono::{DateTime, NaiveDate};
use reqwest::Client;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Largest page the klines endpoint serves.
pub const MAX_PAGE: usize = 1000;

/// Pause between paginated requests.
pub const DEFAULT_RATE_LIMIT: Duration = Duration::from_millis(1200);

/// One parsed daily candle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Kline {
    /// Open time in epoch milliseconds.
    pub open_time: i64,
    pub close: f64,
}

impl Kline {
    pub fn date(&self) -> Option<NaiveDate> {
        DateTime::from_timestamp_millis(self.open_time).map(|dt| dt.date_naive())
    }
}

/// Parse one kline row: `[open_time, open, high, low, close, volume, ...]`.
pub fn parse_kline(row: &[Value]) -> Result<Kline> {
    let open_time = row
        .first()
        .and_then(Value::as_i64)
        .ok_or_else(|| BacktestError::DataError("Kline missing open time".to_string()))?;

    let close = match row.get(4) {
        Some(Value::String(s)) => s.parse::<f64>().ok(),
        Some(v) => v.as_f64(),
        None => None,
    }
    .ok_or_else(|| BacktestError::DataError(format!("Kline at {} missing close", open_time)))?;

    Ok(Kline { open_time, close })
}

/// Cursor for the next page, or `None` when pagination is finished.
pub fn next_cursor(page: &[Kline], page_size: usize, end_ms: i64) -> Option<i64> {
    let last = page.last()?;
    if page.len() < page_size {
        return None;
    }
    let cursor = last.open_time + 1;
    (cursor <= end_ms).then_some(cursor)
}

fn start_millis(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

fn end_millis(date: NaiveDate) -> i64 {
    date.and_hms_milli_opt(23, 59, 59, 999)
        .map(|dt| dt.and_utc().timestamp_millis())
        .unwrap_or_default()
}

/// Paginated, rate-limited daily candle client.
#[derive(Clone)]
pub struct BinanceClient {
    http: Client,
    base_url: String,
    rate_limit: Duration,
    page_size: usize,
    symbols: SymbolMap,
}

impl BinanceClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = Client::builder().timeout(Duration::from_secs(30)).build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            rate_limit: DEFAULT_RATE_LIMIT,
            page_size: MAX_PAGE,
            symbols: SymbolMap::with_defaults(),
        })
    }

    pub fn with_rate_limit(mut self, pause: Duration) -> Self {
        self.rate_limit = pause;
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size.clamp(1, MAX_PAGE);
        self
    }

    pub fn with_symbols(mut self, symbols: SymbolMap) -> Self {
        self.symbols = symbols;
        self
    }

    pub fn symbols(&self) -> &SymbolMap {
        &self.symbols
    }

    async fn fetch_page(&self, symbol: &str, cursor: i64, end_ms: i64) -> Result<Vec<Kline>> {
        let url = format!("{}/api/v3/klines", self.base_url);
        let rows: Vec<Vec<Value>> = self
            .http
            .get(&url)
            .query(&[
                ("symbol", symbol.to_string()),
                ("interval", "1d".to_string()),
                ("startTime", cursor.to_string()),
                ("endTime", end_ms.to_string()),
                ("limit", self.page_size.to_string()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        rows.iter().map(|row| parse_kline(row)).collect()
    }

    /// Daily closes for an exchange pair (`BTC/USDT`) within `[start, end]`.
    pub async fn fetch_pair(
        &self,
        pair: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>> {
        let symbol = SymbolMap::native_symbol(pair);
        let end_ms = end_millis(end);
        let mut cursor = start_millis(start);
        let mut klines: Vec<Kline> = Vec::new();

        loop {
            let page = self.fetch_page(&symbol, cursor, end_ms).await?;
            debug!("{}: {} candles from {}", symbol, page.len(), cursor);
            let next = next_cursor(&page, self.page_size, end_ms);
            klines.extend(page);

            match next {
                Some(c) => {
                    cursor = c;
                    tokio::time::sleep(self.rate_limit).await;
                }
                None => break,
            }
        }

        Ok(klines
            .iter()
            .filter_map(|k| k.date().map(|d| PricePoint::new(d, k.close)))
            .filter(|p| p.date >= start && p.date <= end)
            .collect())
    }

    /// Daily closes for a display ticker (`BTC-USD`).
    pub async fn fetch_ticker(
        &self,
        ticker: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<PricePoint>> {
        let pair = self.symbols.resolve(ticker)?.to_string();
        self.fetch_pair(&pair, start, end).await
    }

    /// Fetch every ticker once, up front, into an in-memory source.
    ///
    /// Failing tickers are reported and skipped; the others are still fetched.
    pub async fn prefetch(
        &self,
        tickers: &[String],
        start: NaiveDate,
        end: NaiveDate,
    ) -> (InMemorySource, Vec<(String, String)>) {
        let mut source = InMemorySource::new();
        let mut failures = Vec::new();

        for (i, ticker) in tickers.iter().enumerate() {
            if source.contains(ticker) {
                continue;
            }
            if i > 0 {
                tokio::time::sleep(self.rate_limit).await;
            }
            match self.fetch_ticker(ticker, start, end).await {
                Ok(series) if series.is_empty() => {
                    warn!("No candles returned for {}", ticker);
                    failures.push((ticker.clone(), "empty series".to_string()));
                }
                Ok(series) => {
                    info!("Fetched {} daily closes for {}", series.len(), ticker);
                    source.insert(ticker.clone(), series);
                }
                Err(e) => {
                    warn!("Failed to fetch {}: {}", ticker, e);
                    failures.push((ticker.clone(), e.to_string()));
                }
            }
        }

        (source, failures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_kline() {
        let row: Vec<Value> = serde_json::from_value(json!([
            1609459200000_i64,
            "28923.63",
            "29600.00",
            "28624.57",
            "29331.69",
            "54182.92",
            1609545599999_i64,
            "1586035260.63",
            1314910,
            "27455.05",
            "804915093.06",
            "0"
        ]))
        .unwrap();

        let kline = parse_kline(&row).unwrap();
        assert_eq!(kline.open_time, 1609459200000);
        assert!((kline.close - 29331.69).abs() < 1e-9);
        assert_eq!(kline.date(), NaiveDate::from_ymd_opt(2021, 1, 1));
    }

    #[test]
    fn test_parse_kline_rejects_short_rows() {
        let row: Vec<Value> = serde_json::from_value(json!([1609459200000_i64, "1.0"])).unwrap();
        assert!(parse_kline(&row).is_err());
    }

    #[test]
    fn test_next_cursor() {
        let day = 86_400_000;
        let page: Vec<Kline> = (0..3)
            .map(|i| Kline {
                open_time: i * day,
                close: 1.0,
            })
            .collect();

        // Full page: advance past the last open time
        assert_eq!(next_cursor(&page, 3, 10 * day), Some(2 * day + 1));
        // Short page: done
        assert_eq!(next_cursor(&page, 5, 10 * day), None);
        // Cursor past the end: done
        assert_eq!(next_cursor(&page, 3, 2 * day), None);
        assert_eq!(next_cursor(&[], 3, 10 * day), None);
    }

    #[test]
    fn test_day_bounds() {
        let date = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        assert_eq!(start_millis(date), 1609459200000);
        assert_eq!(end_millis(date), 1609545599999);
    }
}
