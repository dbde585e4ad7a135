//! Pstryk API integration for hourly electricity prices
//!
//! This module fetches the hourly price feed (today + tomorrow, up to 48
//! entries) and normalizes it into an hour-key → price table shared with the
//! schedule. Entries that fail to parse are logged and skipped; the fetch as
//! a whole only fails on transport, HTTP status, or body-decode errors.

use crate::config::ApiConfig;
use crate::error::{HeliosError, Result};
use crate::logging::get_logger;
use crate::schedule::hour_key;
use chrono::NaiveDateTime;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use std::collections::BTreeMap;
use std::time::Duration;

/// Mapping from hour key to price for that hour
pub type PriceTable = BTreeMap<String, f64>;

/// Source of hourly price data
#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    /// Fetch and normalize the full price table
    async fn fetch_prices(&self) -> Result<PriceTable>;
}

/// Pstryk API client
pub struct PstrykClient {
    base_url: String,
    access_token: String,
    http: reqwest::Client,
    logger: crate::logging::StructuredLogger,
}

impl PstrykClient {
    /// Create a new client from the API configuration
    pub fn new(cfg: &ApiConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(cfg.timeout_seconds))
            .build()?;
        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            access_token: cfg.api_key.clone(),
            http,
            logger: get_logger("pstryk"),
        })
    }

    /// Price for the hour containing `now`, if the feed covers it
    pub async fn current_price(&self, now: NaiveDateTime) -> Result<Option<f64>> {
        let prices = self.fetch_prices().await?;
        Ok(prices.get(&hour_key(now)).copied())
    }

    /// Normalize a feed payload into an hour-key → price table.
    ///
    /// Malformed entries are logged and skipped, never abort the batch.
    pub fn parse_prices(&self, payload: &serde_json::Value) -> PriceTable {
        let mut table = PriceTable::new();

        let entries = payload
            .get("prices")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        for entry in &entries {
            let hour = entry
                .get("hour")
                .and_then(|v| v.as_str())
                .and_then(parse_feed_hour);
            let price = entry.get("price").and_then(|v| v.as_f64());

            match (hour, price) {
                (Some(ts), Some(price)) => {
                    table.insert(hour_key(ts), price);
                }
                _ => {
                    self.logger
                        .warn(&format!("skipping malformed price entry: {}", entry));
                }
            }
        }

        table
    }
}

#[async_trait::async_trait]
impl PriceSource for PstrykClient {
    async fn fetch_prices(&self) -> Result<PriceTable> {
        let url = format!("{}/prices", self.base_url);

        let resp = self
            .http
            .get(&url)
            .header(AUTHORIZATION, format!("Bearer {}", self.access_token))
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;

        // The token travels only in the header; errors carry the status alone.
        if !resp.status().is_success() {
            return Err(HeliosError::source(format!(
                "price API returned HTTP {}",
                resp.status()
            )));
        }

        let payload: serde_json::Value = resp.json().await?;
        let table = self.parse_prices(&payload);
        self.logger
            .debug(&format!("fetched {} price entries", table.len()));
        Ok(table)
    }
}

/// Parse a feed timestamp, stripping any UTC offset.
///
/// Offset-carrying timestamps keep their written clock fields rather than
/// being converted; hour-bucket comparison is timezone-naive and assumes the
/// feed's offset matches the local zone.
fn parse_feed_hour(raw: &str) -> Option<NaiveDateTime> {
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(raw) {
        return Some(dt.naive_local());
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()
}
