// =============================================================================
// Volume-Weighted Average Price (VWAP)
// =============================================================================
//
//   VWAP = Σ(typical_price * volume) / Σ(volume),   typical = (H + L + C) / 3
//
// The accumulation restarts at each session boundary.  Boundaries are derived
// from the bar's end time, never from the wall clock.
// =============================================================================

use chrono::{NaiveDate, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::bars::Bar;

/// When the VWAP accumulation restarts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum VwapReset {
    /// Anchored at the first bar of the chart.
    #[default]
    None,
    /// Restart at every UTC midnight.
    DailyUtc,
    /// Restart every `millis` milliseconds (epoch-aligned buckets).
    Interval { millis: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionKey {
    All,
    Day(NaiveDate),
    Bucket(i64),
}

impl VwapReset {
    fn session_key(&self, timestamp: i64) -> SessionKey {
        match *self {
            VwapReset::None => SessionKey::All,
            VwapReset::DailyUtc => match Utc.timestamp_millis_opt(timestamp).single() {
                Some(dt) => SessionKey::Day(dt.date_naive()),
                None => SessionKey::Bucket(timestamp.div_euclid(86_400_000)),
            },
            VwapReset::Interval { millis } if millis > 0 => {
                SessionKey::Bucket(timestamp.div_euclid(millis))
            }
            VwapReset::Interval { .. } => SessionKey::All,
        }
    }
}

#[derive(Debug, Clone)]
pub struct VwapState {
    reset: VwapReset,
    session: Option<SessionKey>,
    price_volume: f64,
    volume: f64,
}

impl VwapState {
    pub fn new(reset: VwapReset) -> Self {
        Self {
            reset,
            session: None,
            price_volume: 0.0,
            volume: 0.0,
        }
    }

    pub fn update(&mut self, bar: &Bar) -> Option<f64> {
        let key = self.reset.session_key(bar.end_time);
        if self.session != Some(key) {
            self.session = Some(key);
            self.price_volume = 0.0;
            self.volume = 0.0;
        }

        self.price_volume += bar.typical_price() * bar.volume;
        self.volume += bar.volume;

        if self.volume <= 0.0 {
            return None;
        }
        let vwap = self.price_volume / self.volume;
        vwap.is_finite().then_some(vwap)
    }
}

#[cfg(test)]
pub fn calculate_vwap(bars: &[Bar], reset: VwapReset) -> Vec<f64> {
    let mut state = VwapState::new(reset);
    bars.iter().filter_map(|b| state.update(b)).collect()
}
