// =============================================================================
// Shared types used across the chart engine
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::{ChartError, Result};

/// A single OHLCV observation from the market-data feed.
///
/// Timestamps are milliseconds since the Unix epoch.  Once emitted by the
/// source an observation is never modified.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ohlcv {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(default)]
    pub symbol: String,
    #[serde(default)]
    pub timeframe: String,
}

impl Ohlcv {
    /// Build a tick where every price field equals `price`.  Handy for feeds
    /// that only deliver trade prices.
    pub fn from_price(timestamp: i64, price: f64, volume: f64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume,
            symbol: String::new(),
            timeframe: String::new(),
        }
    }

    /// Reject ticks that would corrupt a bar series.
    ///
    /// `last_timestamp` is the timestamp of the previously accepted tick for
    /// the same series; ticks older than it are out of order.
    pub fn validate(&self, last_timestamp: Option<i64>) -> Result<()> {
        let prices = [self.open, self.high, self.low, self.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(ChartError::DataQuality(format!(
                "non-finite price at {}",
                self.timestamp
            )));
        }
        if !self.volume.is_finite() || self.volume <= 0.0 {
            return Err(ChartError::DataQuality(format!(
                "non-positive volume {} at {}",
                self.volume, self.timestamp
            )));
        }
        if self.high < self.low {
            return Err(ChartError::DataQuality(format!(
                "high {} below low {} at {}",
                self.high, self.low, self.timestamp
            )));
        }
        if let Some(last) = last_timestamp {
            if self.timestamp < last {
                return Err(ChartError::DataQuality(format!(
                    "out-of-order tick {} (last accepted {})",
                    self.timestamp, last
                )));
            }
        }
        Ok(())
    }
}

/// Which bar representation a chart maintains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChartType {
    Candlestick,
    Kagi,
    RangeBar,
}

impl std::fmt::Display for ChartType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Candlestick => write!(f, "candlestick"),
            Self::Kagi => write!(f, "kagi"),
            Self::RangeBar => write!(f, "range_bar"),
        }
    }
}

/// How a Kagi reversal amount or a range size is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SizeMode {
    /// Absolute price points.
    Points,
    /// Percent of a reference price.
    Percentage,
}

impl Default for SizeMode {
    fn default() -> Self {
        Self::Points
    }
}

impl std::fmt::Display for SizeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Points => write!(f, "points"),
            Self::Percentage => write!(f, "percentage"),
        }
    }
}

/// Direction of a Kagi line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
}

impl Direction {
    pub fn flipped(self) -> Self {
        match self {
            Self::Up => Self::Down,
            Self::Down => Self::Up,
        }
    }
}

/// Line weight of a Kagi line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Thickness {
    Thin,
    Thick,
}

/// Convert a timeframe label such as `"1m"`, `"4h"` or `"1d"` into
/// milliseconds.  Returns `None` for labels that cannot be parsed.
pub fn timeframe_millis(label: &str) -> Option<i64> {
    let label = label.trim();
    if label.len() < 2 {
        return None;
    }
    let (count, unit) = label.split_at(label.len() - 1);
    let count: i64 = count.parse().ok()?;
    if count <= 0 {
        return None;
    }
    let unit_ms = match unit {
        "s" => 1_000,
        "m" => 60_000,
        "h" => 3_600_000,
        "d" => 86_400_000,
        "w" => 604_800_000,
        _ => return None,
    };
    count.checked_mul(unit_ms)
}
