// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing Method
// =============================================================================
//
// ATR measures market volatility by decomposing the entire range of a bar.
//
// True Range (TR) for each bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR is then the smoothed average of TR using Wilder's method:
//   ATR_0   = SMA of first `period` TR values
//   ATR_t   = (ATR_{t-1} * (period - 1) + TR_t) / period
//
// The first bar has no previous close, so the first value appears after
// `period + 1` bars.
// =============================================================================

use crate::bars::Bar;

/// True range of `bar` given the previous bar's close.
pub fn true_range(bar: &Bar, prev_close: f64) -> f64 {
    let hl = bar.high - bar.low;
    let hc = (bar.high - prev_close).abs();
    let lc = (bar.low - prev_close).abs();
    hl.max(hc).max(lc)
}

/// Wilder smoother shared by ATR, ADX and SuperTrend.
#[derive(Debug, Clone)]
pub(crate) struct WilderAverage {
    period: usize,
    seed_sum: f64,
    seed_count: usize,
    value: Option<f64>,
}

impl WilderAverage {
    pub(crate) fn new(period: usize) -> Self {
        Self {
            period,
            seed_sum: 0.0,
            seed_count: 0,
            value: None,
        }
    }

    pub(crate) fn update(&mut self, x: f64) -> Option<f64> {
        if self.period == 0 {
            return None;
        }
        let period_f = self.period as f64;
        let next = match self.value {
            Some(prev) => (prev * (period_f - 1.0) + x) / period_f,
            None => {
                self.seed_sum += x;
                self.seed_count += 1;
                if self.seed_count < self.period {
                    return None;
                }
                self.seed_sum / period_f
            }
        };
        self.value = Some(next);
        Some(next)
    }
}

/// Streaming ATR over finalized bars.
#[derive(Debug, Clone)]
pub struct AtrState {
    prev_close: Option<f64>,
    average: WilderAverage,
}

impl AtrState {
    pub fn new(period: usize) -> Self {
        Self {
            prev_close: None,
            average: WilderAverage::new(period),
        }
    }

    pub fn update(&mut self, bar: &Bar) -> Option<f64> {
        let prev_close = self.prev_close.replace(bar.close)?;
        let atr = self.average.update(true_range(bar, prev_close))?;
        atr.is_finite().then_some(atr)
    }
}

/// Compute the ATR series for `bars` (oldest first).
///
/// Empty when `period` is zero or there are fewer than `period + 1` bars.
#[cfg(test)]
pub fn calculate_atr(bars: &[Bar], period: usize) -> Vec<f64> {
    let mut state = AtrState::new(period);
    bars.iter().filter_map(|b| state.update(b)).collect()
}

/// Most recent ATR value.
#[cfg(test)]
pub fn current_atr(bars: &[Bar], period: usize) -> Option<f64> {
    calculate_atr(bars, period).last().copied()
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn bar(open: f64, high: f64, low: f64, close: f64) -> Bar {
        Bar {
            start_time: 0,
            end_time: 0,
            open,
            high,
            low,
            close,
            volume: 100.0,
        }
    }

    #[test]
    fn atr_period_zero() {
        let bars = vec![bar(100.0, 105.0, 95.0, 102.0); 20];
        assert!(calculate_atr(&bars, 0).is_empty());
    }

    #[test]
    fn atr_insufficient_data() {
        let bars = vec![bar(100.0, 105.0, 95.0, 102.0); 14];
        assert!(calculate_atr(&bars, 14).is_empty());
        assert!(current_atr(&bars, 14).is_none());
    }

    #[test]
    fn atr_exact_minimum_data() {
        // period=3, need 4 bars to get 3 TR values.
        let bars = vec![
            bar(100.0, 102.0, 98.0, 101.0),
            bar(101.0, 104.0, 99.0, 103.0),
            bar(103.0, 106.0, 100.0, 105.0),
            bar(105.0, 108.0, 102.0, 107.0),
        ];
        let atr = calculate_atr(&bars, 3);
        assert_eq!(atr.len(), 1);
        // TRs: 5, 6, 6
        assert!((atr[0] - 17.0 / 3.0).abs() < 1e-10);
    }

    #[test]
    fn atr_constant_range() {
        let bars: Vec<Bar> = (0..30)
            .map(|i| {
                let base = 100.0 + i as f64 * 0.1;
                bar(base, base + 5.0, base - 5.0, base)
            })
            .collect();
        let atr = current_atr(&bars, 14).unwrap();
        assert!((atr - 10.0).abs() < 1.0, "expected ATR near 10.0, got {atr}");
    }

    #[test]
    fn atr_true_range_uses_prev_close() {
        // Gap scenario: |H - prevClose| > H - L
        let gap = bar(110.0, 115.0, 108.0, 112.0);
        assert_eq!(true_range(&gap, 95.0), 20.0);
        assert_eq!(true_range(&gap, 110.0), 7.0);
    }

    #[test]
    fn atr_result_is_positive() {
        let bars: Vec<Bar> = (0..50)
            .map(|i| {
                let base = 100.0 + (i as f64 * 0.5).sin() * 10.0;
                bar(base - 0.5, base + 2.0, base - 2.0, base + 0.5)
            })
            .collect();
        assert!(calculate_atr(&bars, 14).iter().all(|&v| v > 0.0));
    }
}
