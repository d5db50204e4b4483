// =============================================================================
// Rate of Change (ROC) — Momentum Indicator
// =============================================================================
//
// ROC measures the percentage change in price over a look-back period:
//   ROC = ((close - close_n) / close_n) * 100
//
// Positive ROC indicates upward momentum; negative indicates downward.

use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub struct RocState {
    period: usize,
    history: VecDeque<f64>,
}

impl RocState {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            history: VecDeque::with_capacity(period + 1),
        }
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        if self.period == 0 {
            return None;
        }
        self.history.push_back(close);
        if self.history.len() > self.period + 1 {
            self.history.pop_front();
        }
        if self.history.len() <= self.period {
            return None;
        }
        let prev = *self.history.front()?;
        if prev == 0.0 {
            Some(0.0)
        } else {
            Some((close - prev) / prev * 100.0)
        }
    }
}

/// Calculate the Rate of Change for the given closing prices and period.
///
/// Returns one ROC value per close starting at index `period`.
#[cfg(test)]
pub fn calculate_roc(closes: &[f64], period: usize) -> Vec<f64> {
    let mut state = RocState::new(period);
    closes.iter().filter_map(|&c| state.update(c)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roc_basic() {
        let closes: Vec<f64> = (1..=20).map(|x| x as f64).collect();
        let roc = calculate_roc(&closes, 14);
        assert_eq!(roc.len(), 6);
        // From 1 to 15: ROC = (15-1)/1 * 100 = 1400%
        assert!((roc[0] - 1400.0).abs() < 1e-10);
    }

    #[test]
    fn roc_insufficient_data() {
        assert!(calculate_roc(&[1.0, 2.0, 3.0], 14).is_empty());
        assert!(calculate_roc(&[1.0, 2.0, 3.0], 0).is_empty());
    }

    #[test]
    fn roc_zero_base_is_zero() {
        assert_eq!(calculate_roc(&[0.0, 5.0], 1), vec![0.0]);
    }
}
