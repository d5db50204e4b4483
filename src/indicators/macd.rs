// =============================================================================
// Moving Average Convergence Divergence (MACD)
// =============================================================================
//
//   macd      = EMA(fast) - EMA(slow)
//   signal    = EMA(signal) of macd
//   histogram = macd - signal
//
// A point is emitted only once the signal line exists, i.e. after
// `slow + signal - 1` closes.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::indicators::ema::EmaState;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MacdValue {
    pub macd: f64,
    pub signal: f64,
    pub histogram: f64,
}

#[derive(Debug, Clone)]
pub struct MacdState {
    fast: EmaState,
    slow: EmaState,
    signal: EmaState,
}

impl MacdState {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Self {
        Self {
            fast: EmaState::new(fast),
            slow: EmaState::new(slow),
            signal: EmaState::new(signal),
        }
    }

    pub fn update(&mut self, close: f64) -> Option<MacdValue> {
        let fast = self.fast.update(close);
        let slow = self.slow.update(close);
        let macd = fast? - slow?;
        let signal = self.signal.update(macd)?;
        Some(MacdValue {
            macd,
            signal,
            histogram: macd - signal,
        })
    }
}

#[cfg(test)]
pub fn calculate_macd(closes: &[f64], fast: usize, slow: usize, signal: usize) -> Vec<MacdValue> {
    let mut state = MacdState::new(fast, slow, signal);
    closes.iter().filter_map(|&c| state.update(c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn macd_warmup_length() {
        let closes: Vec<f64> = (0..60).map(|i| 100.0 + i as f64).collect();
        let series = calculate_macd(&closes, 12, 26, 9);
        // first value at index slow + signal - 2 = 33
        assert_eq!(series.len(), 60 - 33);
    }

    #[test]
    fn macd_insufficient_data() {
        let closes: Vec<f64> = (0..30).map(|i| i as f64).collect();
        assert!(calculate_macd(&closes, 12, 26, 9).is_empty());
    }

    #[test]
    fn macd_positive_in_uptrend() {
        let closes: Vec<f64> = (0..80).map(|i| 100.0 + i as f64 * 0.5).collect();
        let last = *calculate_macd(&closes, 12, 26, 9).last().unwrap();
        assert!(last.macd > 0.0);
        assert!((last.histogram - (last.macd - last.signal)).abs() < 1e-12);
    }

    #[test]
    fn macd_flat_is_zero() {
        let series = calculate_macd(&[50.0; 50], 3, 6, 4);
        assert!(series.iter().all(|v| v.macd.abs() < 1e-12 && v.histogram.abs() < 1e-12));
    }
}
