//! Operating modes and hour-key handling for the schedule
//!
//! The schedule maps calendar hours to an operating mode drawn from a fixed
//! set of labels. Hours are identified by a canonical naive-local key of the
//! form `YYYY-MM-DDTHH:00:00`, shared with the price table.

use crate::error::{HeliosError, Result};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Mapping from hour key to the mode chosen for that hour
pub type ScheduleTable = BTreeMap<String, OperatingMode>;

/// Per-hour operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperatingMode {
    #[serde(rename = "Default")]
    Default,
    #[serde(rename = "Buy")]
    Buy,
    #[serde(rename = "Sell")]
    Sell,
    #[serde(rename = "Sell (All)")]
    SellAll,
    #[serde(rename = "Sell (PV Only)")]
    SellPvOnly,
    #[serde(rename = "Buy (Charge car)")]
    BuyChargeCar,
    #[serde(rename = "Buy (Charge car and charge battery)")]
    BuyChargeCarAndBattery,
}

impl OperatingMode {
    /// All supported modes
    pub const ALL: [OperatingMode; 7] = [
        OperatingMode::Default,
        OperatingMode::Buy,
        OperatingMode::Sell,
        OperatingMode::SellAll,
        OperatingMode::SellPvOnly,
        OperatingMode::BuyChargeCar,
        OperatingMode::BuyChargeCarAndBattery,
    ];

    /// Parse an exact mode label; `None` for anything outside the fixed set
    pub fn from_label(label: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.as_str() == label)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "Default",
            Self::Buy => "Buy",
            Self::Sell => "Sell",
            Self::SellAll => "Sell (All)",
            Self::SellPvOnly => "Sell (PV Only)",
            Self::BuyChargeCar => "Buy (Charge car)",
            Self::BuyChargeCarAndBattery => "Buy (Charge car and charge battery)",
        }
    }
}

impl fmt::Display for OperatingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format used for hour keys and accepted for mutation input
pub const HOUR_KEY_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Canonical hour key for the hour containing `ts` (minutes and seconds
/// truncated away)
pub fn hour_key(ts: NaiveDateTime) -> String {
    ts.format("%Y-%m-%dT%H:00:00").to_string()
}

/// Validate a caller-supplied hour key.
///
/// The key must parse as a naive timestamp and must already be truncated to
/// the hour; a mid-hour timestamp is rejected rather than silently rounded.
pub fn validate_hour_key(raw: &str) -> Result<String> {
    let parsed = NaiveDateTime::parse_from_str(raw, HOUR_KEY_FORMAT)?;
    let key = hour_key(parsed);
    if key != raw {
        return Err(HeliosError::validation(
            "hour",
            format!("hour key must be truncated to the hour, got {}", raw),
        ));
    }
    Ok(key)
}
