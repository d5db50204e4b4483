// =============================================================================
// Simple Moving Average (SMA)
// =============================================================================
//
//   SMA_t = (close_{t-period+1} + ... + close_t) / period
//
// Output length = N - period + 1 for N >= period, otherwise empty.
// =============================================================================

use std::collections::VecDeque;

/// Streaming SMA over a fixed window.
///
/// The window sum is recomputed from the buffered values on every update, so
/// the streamed and batch results are bit-identical and no rounding drift
/// accumulates over long sessions.
#[derive(Debug, Clone)]
pub struct SmaState {
    period: usize,
    window: VecDeque<f64>,
}

impl SmaState {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            window: VecDeque::with_capacity(period + 1),
        }
    }

    pub fn update(&mut self, value: f64) -> Option<f64> {
        if self.period == 0 {
            return None;
        }
        self.window.push_back(value);
        if self.window.len() > self.period {
            self.window.pop_front();
        }
        if self.window.len() < self.period {
            return None;
        }
        let sum: f64 = self.window.iter().sum();
        Some(sum / self.period as f64)
    }
}

/// Compute the SMA series for `closes`.
///
/// Returns an empty `Vec` when `period == 0` or there are fewer than `period`
/// closes.
#[cfg(test)]
pub fn calculate_sma(closes: &[f64], period: usize) -> Vec<f64> {
    let mut state = SmaState::new(period);
    closes.iter().filter_map(|&c| state.update(c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sma_reference_example() {
        let closes = [100.0, 102.0, 101.0, 103.0, 105.0, 104.0, 106.0, 108.0, 107.0, 109.0];
        let sma = calculate_sma(&closes, 5);
        assert_eq!(sma.len(), 6);
        assert!((sma[0] - 102.2).abs() < 1e-9, "got {}", sma[0]);
        assert!((sma[5] - 106.8).abs() < 1e-9, "got {}", sma[5]);
    }

    #[test]
    fn sma_length_law() {
        let closes: Vec<f64> = (0..37).map(|x| x as f64 * 1.5).collect();
        for period in 1..45 {
            let expected = (closes.len() + 1).saturating_sub(period);
            assert_eq!(calculate_sma(&closes, period).len(), expected, "period {period}");
        }
    }

    #[test]
    fn sma_period_zero_and_empty() {
        assert!(calculate_sma(&[1.0, 2.0], 0).is_empty());
        assert!(calculate_sma(&[], 3).is_empty());
    }
}
