// =============================================================================
// Exponential Moving Average (EMA)
// =============================================================================
//
// EMA gives more weight to recent prices, making it more responsive to new
// information than the Simple Moving Average (SMA).
//
// Formula:
//   multiplier = 2 / (period + 1)
//   EMA_t      = close_t * multiplier + EMA_{t-1} * (1 - multiplier)
//
// The very first EMA value is seeded with the SMA of the first `period` closes.
// =============================================================================

/// Streaming EMA.  Also used as a building block by MACD.
#[derive(Debug, Clone)]
pub struct EmaState {
    period: usize,
    multiplier: f64,
    seed_sum: f64,
    seed_count: usize,
    value: Option<f64>,
}

impl EmaState {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            multiplier: 2.0 / (period as f64 + 1.0),
            seed_sum: 0.0,
            seed_count: 0,
            value: None,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        if self.period == 0 {
            return None;
        }

        let next = match self.value {
            Some(prev) => close * self.multiplier + prev * (1.0 - self.multiplier),
            None => {
                self.seed_sum += close;
                self.seed_count += 1;
                if self.seed_count < self.period {
                    return None;
                }
                // Seed: SMA of the first `period` values.
                self.seed_sum / self.period as f64
            }
        };

        self.value = Some(next);
        Some(next)
    }

    /// Latest EMA value, if the warmup is complete.
    pub fn value(&self) -> Option<f64> {
        self.value
    }
}

/// Compute the EMA series for the given `closes` slice and look-back `period`.
///
/// Returns an empty `Vec` when the input is too short or the period is zero.
/// Each output element corresponds to a close starting at index `period - 1`.
#[cfg(test)]
pub fn calculate_ema(closes: &[f64], period: usize) -> Vec<f64> {
    let mut state = EmaState::new(period);
    closes.iter().filter_map(|&c| state.update(c)).collect()
}
