// =============================================================================
// Stochastic Oscillator
// =============================================================================
//
//   %K = (close - lowest_low(k)) / (highest_high(k) - lowest_low(k)) * 100
//   %D = SMA(d) of %K
//
// A flat window (highest == lowest) reports %K = 50.
// =============================================================================

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::bars::Bar;
use crate::indicators::sma::SmaState;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StochasticValue {
    pub k: f64,
    pub d: f64,
}

/// Highest high and lowest low over the last `period` bars.
#[derive(Debug, Clone)]
pub(crate) struct HighLowWindow {
    period: usize,
    bars: VecDeque<(f64, f64)>,
}

impl HighLowWindow {
    pub(crate) fn new(period: usize) -> Self {
        Self {
            period,
            bars: VecDeque::with_capacity(period + 1),
        }
    }

    /// Push a bar; returns `(highest, lowest)` once the window is full.
    pub(crate) fn update(&mut self, high: f64, low: f64) -> Option<(f64, f64)> {
        if self.period == 0 {
            return None;
        }
        self.bars.push_back((high, low));
        if self.bars.len() > self.period {
            self.bars.pop_front();
        }
        if self.bars.len() < self.period {
            return None;
        }
        let highest = self.bars.iter().map(|b| b.0).fold(f64::NEG_INFINITY, f64::max);
        let lowest = self.bars.iter().map(|b| b.1).fold(f64::INFINITY, f64::min);
        Some((highest, lowest))
    }
}

#[derive(Debug, Clone)]
pub struct StochasticState {
    window: HighLowWindow,
    d: SmaState,
}

impl StochasticState {
    pub fn new(k_period: usize, d_period: usize) -> Self {
        Self {
            window: HighLowWindow::new(k_period),
            d: SmaState::new(d_period),
        }
    }

    pub fn update(&mut self, bar: &Bar) -> Option<StochasticValue> {
        let (highest, lowest) = self.window.update(bar.high, bar.low)?;
        let range = highest - lowest;
        let k = if range == 0.0 {
            50.0
        } else {
            (bar.close - lowest) / range * 100.0
        };
        let d = self.d.update(k)?;
        Some(StochasticValue { k, d })
    }
}

#[cfg(test)]
pub fn calculate_stochastic(bars: &[Bar], k_period: usize, d_period: usize) -> Vec<StochasticValue> {
    let mut state = StochasticState::new(k_period, d_period);
    bars.iter().filter_map(|b| state.update(b)).collect()
}
