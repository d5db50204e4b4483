// =============================================================================
// Commodity Channel Index (CCI)
// =============================================================================
//
//   tp  = (H + L + C) / 3
//   CCI = (tp - SMA(tp)) / (0.015 * mean_deviation(tp))
//
// A zero mean deviation (flat window) reports 0.

use std::collections::VecDeque;

use crate::bars::Bar;

const CCI_CONSTANT: f64 = 0.015;

#[derive(Debug, Clone)]
pub struct CciState {
    period: usize,
    window: VecDeque<f64>,
}

impl CciState {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            window: VecDeque::with_capacity(period + 1),
        }
    }

    pub fn update(&mut self, bar: &Bar) -> Option<f64> {
        if self.period == 0 {
            return None;
        }
        let tp = bar.typical_price();
        self.window.push_back(tp);
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        if self.window.len() < self.period {
            return None;
        }

        let n = self.period as f64;
        let mean = self.window.iter().sum::<f64>() / n;
        let mean_dev = self.window.iter().map(|x| (x - mean).abs()).sum::<f64>() / n;
        if mean_dev == 0.0 {
            return Some(0.0);
        }
        let cci = (tp - mean) / (CCI_CONSTANT * mean_dev);
        cci.is_finite().then_some(cci)
    }
}

#[cfg(test)]
pub fn calculate_cci(bars: &[Bar], period: usize) -> Vec<f64> {
    let mut state = CciState::new(period);
    bars.iter().filter_map(|b| state.update(b)).collect()
}
