// =============================================================================
// SuperTrend
// =============================================================================
//
//   hl2          = (H + L) / 2
//   basic_upper  = hl2 + multiplier * ATR
//   basic_lower  = hl2 - multiplier * ATR
//
// Final bands ratchet: the upper band only moves down (the lower band only
// moves up) unless the previous close broke through it.  The trend flips to
// down when the close falls below the final lower band and to up when it rises
// above the final upper band.  The plotted value is the lower band in an
// uptrend and the upper band in a downtrend.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::bars::Bar;
use crate::indicators::atr::AtrState;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuperTrendValue {
    pub value: f64,
    pub uptrend: bool,
}

#[derive(Debug, Clone, Copy)]
struct Bands {
    upper: f64,
    lower: f64,
    close: f64,
    uptrend: bool,
}

#[derive(Debug, Clone)]
pub struct SuperTrendState {
    atr: AtrState,
    multiplier: f64,
    prev: Option<Bands>,
}

impl SuperTrendState {
    pub fn new(period: usize, multiplier: f64) -> Self {
        Self {
            atr: AtrState::new(period),
            multiplier,
            prev: None,
        }
    }

    pub fn update(&mut self, bar: &Bar) -> Option<SuperTrendValue> {
        let atr = self.atr.update(bar)?;
        let hl2 = (bar.high + bar.low) / 2.0;
        let basic_upper = hl2 + self.multiplier * atr;
        let basic_lower = hl2 - self.multiplier * atr;

        let bands = match self.prev {
            None => Bands {
                upper: basic_upper,
                lower: basic_lower,
                close: bar.close,
                uptrend: bar.close >= hl2,
            },
            Some(prev) => {
                let upper = if basic_upper < prev.upper || prev.close > prev.upper {
                    basic_upper
                } else {
                    prev.upper
                };
                let lower = if basic_lower > prev.lower || prev.close < prev.lower {
                    basic_lower
                } else {
                    prev.lower
                };
                let uptrend = if prev.uptrend {
                    bar.close >= lower
                } else {
                    bar.close > upper
                };
                Bands { upper, lower, close: bar.close, uptrend }
            }
        };

        self.prev = Some(bands);
        let value = if bands.uptrend { bands.lower } else { bands.upper };
        Some(SuperTrendValue { value, uptrend: bands.uptrend })
    }
}

#[cfg(test)]
pub fn calculate_supertrend(bars: &[Bar], period: usize, multiplier: f64) -> Vec<SuperTrendValue> {
    let mut state = SuperTrendState::new(period, multiplier);
    bars.iter().filter_map(|b| state.update(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(close: f64) -> Bar {
        Bar {
            start_time: 0,
            end_time: 0,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1.0,
        }
    }

    #[test]
    fn supertrend_follows_uptrend_below_price() {
        let bars: Vec<Bar> = (0..40).map(|i| bar(100.0 + i as f64)).collect();
        let series = calculate_supertrend(&bars, 10, 3.0);
        assert_eq!(series.len(), 30);
        let last = series.last().unwrap();
        assert!(last.uptrend);
        assert!(last.value < 139.0);
    }

    #[test]
    fn supertrend_flips_on_crash() {
        let mut bars: Vec<Bar> = (0..30).map(|i| bar(100.0 + i as f64 * 0.5)).collect();
        bars.extend((0..10).map(|i| bar(100.0 - i as f64 * 5.0)));
        let last = *calculate_supertrend(&bars, 7, 2.0).last().unwrap();
        assert!(!last.uptrend);
        assert!(last.value > 55.0);
    }

    #[test]
    fn supertrend_needs_atr_warmup() {
        let bars: Vec<Bar> = (0..10).map(|i| bar(i as f64)).collect();
        assert!(calculate_supertrend(&bars, 10, 3.0).is_empty());
    }
}
