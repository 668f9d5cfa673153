//! Run metadata and reproducibility fingerprints.

use crate::types::PriceTable;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::warn;
use uuid::Uuid;

/// Identity of one backtest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunMetadata {
    /// Unique per run.
    pub run_id: Uuid,
    pub created_at: DateTime<Utc>,
    /// SHA256 of the JSON-serialized configuration.
    pub config_hash: String,
    /// SHA256 over the aligned price table actually simulated.
    pub data_fingerprint: String,
    pub crate_version: String,
}

impl RunMetadata {
    pub fn new<T: Serialize>(config: &T, prices: &PriceTable) -> Self {
        Self {
            run_id: generate_run_id(),
            created_at: Utc::now(),
            config_hash: compute_config_hash(config),
            data_fingerprint: fingerprint_prices(prices),
            crate_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    /// Whether two runs simulated the same configuration on the same data.
    pub fn same_inputs(&self, other: &RunMetadata) -> bool {
        self.config_hash == other.config_hash && self.data_fingerprint == other.data_fingerprint
    }
}

/// Compute SHA256 hash of arbitrary bytes.
pub fn compute_hash(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Compute configuration hash from JSON serialization.
pub fn compute_config_hash<T: Serialize>(config: &T) -> String {
    match serde_json::to_vec(config) {
        Ok(bytes) => compute_hash(&bytes),
        Err(e) => {
            warn!("Failed to serialize config for hashing: {}", e);
            String::new()
        }
    }
}

/// Hash tickers, dates and closes of an aligned table.
pub fn fingerprint_prices(prices: &PriceTable) -> String {
    let mut hasher = Sha256::new();
    for ticker in prices.tickers() {
        hasher.update(ticker.as_bytes());
        hasher.update([0u8]);
    }
    for (date, row) in prices.dates().iter().zip(prices.rows()) {
        hasher.update(date.to_string().as_bytes());
        for close in row {
            hasher.update(close.to_le_bytes());
        }
    }
    format!("{:x}", hasher.finalize())
}

/// Generate a unique run ID.
pub fn generate_run_id() -> Uuid {
    Uuid::new_v4()
}
