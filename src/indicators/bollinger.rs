// =============================================================================
// Bollinger Bands
// =============================================================================
//
// Bollinger Bands consist of a middle band (SMA), an upper band (SMA + k*σ),
// and a lower band (SMA - k*σ), where σ is the population standard deviation
// of the window.  Band width is the normalised distance:
//   width = (upper - lower) / middle * 100.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

/// One Bollinger Band sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BollingerBands {
    pub upper: f64,
    pub middle: f64,
    pub lower: f64,
}

impl BollingerBands {
    /// Band width in percent of the middle band; `None` for a zero middle.
    pub fn width(&self) -> Option<f64> {
        if self.middle == 0.0 {
            return None;
        }
        let width = (self.upper - self.lower) / self.middle * 100.0;
        width.is_finite().then_some(width)
    }
}

#[derive(Debug, Clone)]
pub struct BollingerState {
    period: usize,
    k: f64,
    window: VecDeque<f64>,
}

impl BollingerState {
    pub fn new(period: usize, k: f64) -> Self {
        Self {
            period,
            k,
            window: VecDeque::with_capacity(period + 1),
        }
    }

    pub fn update(&mut self, close: f64) -> Option<BollingerBands> {
        if self.period == 0 {
            return None;
        }
        self.window.push_back(close);
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        if self.window.len() < self.period {
            return None;
        }

        let n = self.period as f64;
        let middle = self.window.iter().sum::<f64>() / n;
        let variance = self.window.iter().map(|x| (x - middle).powi(2)).sum::<f64>() / n;
        let std_dev = variance.sqrt();

        Some(BollingerBands {
            upper: middle + self.k * std_dev,
            middle,
            lower: middle - self.k * std_dev,
        })
    }
}

/// Calculate the Bollinger Band series for the given closing prices.
///
/// Empty when `period == 0` or there are fewer than `period` closes.
#[cfg(test)]
pub fn calculate_bollinger(closes: &[f64], period: usize, k: f64) -> Vec<BollingerBands> {
    let mut state = BollingerState::new(period, k);
    closes.iter().filter_map(|&c| state.update(c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bollinger_basic() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let bands = calculate_bollinger(&closes, 20, 2.0);
        assert_eq!(bands.len(), 1);
        let bb = bands[0];
        assert!((bb.middle - 10.5).abs() < 1e-10);
        assert!(bb.upper > bb.middle);
        assert!(bb.lower < bb.middle);
        assert!(bb.width().unwrap() > 0.0);
    }

    #[test]
    fn bollinger_insufficient_data() {
        assert!(calculate_bollinger(&[1.0, 2.0, 3.0], 20, 2.0).is_empty());
    }

    #[test]
    fn bollinger_flat() {
        let bands = calculate_bollinger(&[100.0; 20], 20, 2.0);
        assert_eq!(bands[0].upper, bands[0].lower);
        assert!(bands[0].width().unwrap().abs() < 1e-10);
    }

    #[test]
    fn bollinger_population_std() {
        // window [2,4,4,4,5,5,7,9] has population sigma 2
        let bands = calculate_bollinger(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0], 8, 1.0);
        assert!((bands[0].middle - 5.0).abs() < 1e-12);
        assert!((bands[0].upper - 7.0).abs() < 1e-12);
        assert!((bands[0].lower - 3.0).abs() < 1e-12);
    }

    #[test]
    fn bollinger_zero_middle_has_no_width() {
        let bb = BollingerBands { upper: 1.0, middle: 0.0, lower: -1.0 };
        assert!(bb.width().is_none());
    }
}
