//! Display ticker ↔ exchange pair mapping.
//!
//! Tickers are shown in their quote-currency display form (`BTC-USD`) while
//! the exchange trades them as USDT pairs (`BTC/USDT`, native `BTCUSDT`).
//! The table is explicit so no module rewrites symbol strings on its own.

use crate::error::{BacktestError, Result};
use std::collections::HashMap;

/// Tickers offered by default, in display form.
pub const SUPPORTED_TICKERS: [&str; 10] = [
    "BTC-USD", "ETH-USD", "ADA-USD", "SOL-USD", "XRP-USD", "DOT-USD", "DOGE-USD", "LTC-USD",
    "LINK-USD", "MATIC-USD",
];

/// Exchange pairs for [`SUPPORTED_TICKERS`], index for index.
const DEFAULT_PAIRS: [&str; 10] = [
    "BTC/USDT", "ETH/USDT", "ADA/USDT", "SOL/USDT", "XRP/USDT", "DOT/USDT", "DOGE/USDT",
    "LTC/USDT", "LINK/USDT", "MATIC/USDT",
];

/// Default selection for a new run.
pub const DEFAULT_SELECTION: [&str; 5] = ["BTC-USD", "ETH-USD", "ADA-USD", "SOL-USD", "XRP-USD"];

/// Default buy-and-hold benchmark.
pub const DEFAULT_BENCHMARK: &str = "BTC-USD";

/// Bidirectional ticker/pair table.
#[derive(Debug, Clone, Default)]
pub struct SymbolMap {
    to_pair: HashMap<String, String>,
    to_display: HashMap<String, String>,
}

impl SymbolMap {
    /// An empty table.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Table with every [`SUPPORTED_TICKERS`] entry mapped to its USDT pair.
    pub fn with_defaults() -> Self {
        let mut map = Self::empty();
        for (ticker, pair) in SUPPORTED_TICKERS.iter().zip(DEFAULT_PAIRS) {
            map.register(*ticker, pair);
        }
        map
    }

    /// Add or replace a mapping. Any previous entry for either side is removed.
    pub fn register(&mut self, display: impl Into<String>, pair: impl Into<String>) {
        let display = display.into();
        let pair = pair.into();
        if let Some(old_pair) = self.to_pair.remove(&display) {
            self.to_display.remove(&old_pair);
        }
        if let Some(old_display) = self.to_display.remove(&pair) {
            self.to_pair.remove(&old_display);
        }
        self.to_pair.insert(display.clone(), pair.clone());
        self.to_display.insert(pair, display);
    }

    pub fn to_pair(&self, display: &str) -> Option<&str> {
        self.to_pair.get(display).map(String::as_str)
    }

    pub fn to_display(&self, pair: &str) -> Option<&str> {
        self.to_display.get(pair).map(String::as_str)
    }

    /// Pair for a display ticker, or a configuration error.
    pub fn resolve(&self, display: &str) -> Result<&str> {
        self.to_pair(display).ok_or_else(|| {
            BacktestError::ConfigError(format!("No exchange pair registered for {}", display))
        })
    }

    /// Exchange-native symbol of a pair (`BTC/USDT` → `BTCUSDT`).
    pub fn native_symbol(pair: &str) -> String {
        pair.replace('/', "")
    }

    /// Registered display tickers, sorted.
    pub fn display_tickers(&self) -> Vec<&str> {
        let mut tickers: Vec<&str> = self.to_pair.keys().map(String::as_str).collect();
        tickers.sort_unstable();
        tickers
    }

    pub fn len(&self) -> usize {
        self.to_pair.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_pair.is_empty()
    }
}
