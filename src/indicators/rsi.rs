// =============================================================================
// Relative Strength Index (RSI) — Wilder's Smoothing
// =============================================================================
//
// RSI measures the speed and magnitude of recent price changes to evaluate
// whether an asset is overbought or oversold.
//
// Step 1: Compute price changes (deltas) from consecutive closes.
// Step 2: Seed average gain / average loss with the SMA of the first `period`
//          gains / losses.
// Step 3: Apply Wilder's exponential smoothing:
//            avg_gain = (prev_avg_gain * (period - 1) + current_gain) / period
//            avg_loss = (prev_avg_loss * (period - 1) + current_loss) / period
// Step 4: RS  = avg_gain / avg_loss
//          RSI = 100 - 100 / (1 + RS)
//
// avg_loss == 0 maps to 100 (this includes a perfectly flat window).
// =============================================================================

/// Streaming RSI.  The first value appears after `period + 1` closes.
#[derive(Debug, Clone)]
pub struct RsiState {
    period: usize,
    prev_close: Option<f64>,
    seed_gain: f64,
    seed_loss: f64,
    seed_count: usize,
    averages: Option<(f64, f64)>,
}

impl RsiState {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            seed_gain: 0.0,
            seed_loss: 0.0,
            seed_count: 0,
            averages: None,
        }
    }

    pub fn update(&mut self, close: f64) -> Option<f64> {
        if self.period == 0 {
            return None;
        }
        let prev = self.prev_close.replace(close)?;
        let delta = close - prev;
        let gain = delta.max(0.0);
        let loss = (-delta).max(0.0);
        let period_f = self.period as f64;

        let (avg_gain, avg_loss) = match self.averages {
            Some((g, l)) => (
                (g * (period_f - 1.0) + gain) / period_f,
                (l * (period_f - 1.0) + loss) / period_f,
            ),
            None => {
                self.seed_gain += gain;
                self.seed_loss += loss;
                self.seed_count += 1;
                if self.seed_count < self.period {
                    return None;
                }
                (self.seed_gain / period_f, self.seed_loss / period_f)
            }
        };

        self.averages = Some((avg_gain, avg_loss));
        rsi_from_averages(avg_gain, avg_loss)
    }
}

/// Compute the full RSI series for the given `closes` and `period`.
///
/// The returned vector has one RSI value for each close starting at index
/// `period` (the first `period` closes are consumed to seed the averages).
///
/// # Edge cases
/// - `period == 0` => empty vec
/// - `closes.len() < period + 1` => empty vec (need at least `period` deltas)
/// - If average loss is zero (no down moves), RSI is 100.0.
#[cfg(test)]
pub fn calculate_rsi(closes: &[f64], period: usize) -> Vec<f64> {
    let mut state = RsiState::new(period);
    closes.iter().filter_map(|&c| state.update(c)).collect()
}

/// Convert average gain / average loss into an RSI value in [0, 100].
fn rsi_from_averages(avg_gain: f64, avg_loss: f64) -> Option<f64> {
    let rsi = if avg_loss == 0.0 {
        100.0
    } else {
        let rs = avg_gain / avg_loss;
        100.0 - 100.0 / (1.0 + rs)
    };

    if rsi.is_finite() {
        Some(rsi.clamp(0.0, 100.0))
    } else {
        None
    }
}
