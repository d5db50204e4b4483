// =============================================================================
// Williams %R
// =============================================================================
//
//   %R = (highest_high - close) / (highest_high - lowest_low) * -100
//
// Range [-100, 0].  A flat window reports -50.

use crate::bars::Bar;
use crate::indicators::stochastic::HighLowWindow;

#[derive(Debug, Clone)]
pub struct WilliamsRState {
    window: HighLowWindow,
}

impl WilliamsRState {
    pub fn new(period: usize) -> Self {
        Self {
            window: HighLowWindow::new(period),
        }
    }

    pub fn update(&mut self, bar: &Bar) -> Option<f64> {
        let (highest, lowest) = self.window.update(bar.high, bar.low)?;
        let range = highest - lowest;
        if range == 0.0 {
            return Some(-50.0);
        }
        Some((highest - bar.close) / range * -100.0)
    }
}

#[cfg(test)]
pub fn calculate_williams_r(bars: &[Bar], period: usize) -> Vec<f64> {
    let mut state = WilliamsRState::new(period);
    bars.iter().filter_map(|b| state.update(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(high: f64, low: f64, close: f64) -> Bar {
        Bar {
            start_time: 0,
            end_time: 0,
            open: close,
            high,
            low,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn williams_r_extremes() {
        let at_high = [bar(12.0, 8.0, 10.0), bar(12.0, 8.0, 12.0)];
        assert_eq!(calculate_williams_r(&at_high, 2), vec![0.0]);
        let at_low = [bar(12.0, 8.0, 10.0), bar(12.0, 8.0, 8.0)];
        assert_eq!(calculate_williams_r(&at_low, 2), vec![-100.0]);
    }

    #[test]
    fn williams_r_flat() {
        assert_eq!(calculate_williams_r(&[bar(5.0, 5.0, 5.0); 3], 3), vec![-50.0]);
    }
}
