// =============================================================================
// On-Balance Volume (OBV)
// =============================================================================
//
// Starts at 0 on the first bar; thereafter adds the bar's volume on an up
// close, subtracts it on a down close and carries forward on an unchanged
// close.

use crate::bars::Bar;

#[derive(Debug, Clone, Default)]
pub struct ObvState {
    prev_close: Option<f64>,
    value: f64,
}

impl ObvState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, bar: &Bar) -> Option<f64> {
        if let Some(prev) = self.prev_close {
            if bar.close > prev {
                self.value += bar.volume;
            } else if bar.close < prev {
                self.value -= bar.volume;
            }
        }
        self.prev_close = Some(bar.close);
        Some(self.value)
    }
}

#[cfg(test)]
pub fn calculate_obv(bars: &[Bar]) -> Vec<f64> {
    let mut state = ObvState::new();
    bars.iter().filter_map(|b| state.update(b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(close: f64, volume: f64) -> Bar {
        Bar {
            start_time: 0,
            end_time: 0,
            open: close,
            high: close,
            low: close,
            close,
            volume,
        }
    }

    #[test]
    fn obv_accumulates_signed_volume() {
        let bars = [bar(10.0, 5.0), bar(11.0, 3.0), bar(11.0, 7.0), bar(9.0, 2.0)];
        assert_eq!(calculate_obv(&bars), vec![0.0, 3.0, 3.0, 1.0]);
    }

    #[test]
    fn obv_empty() {
        assert!(calculate_obv(&[]).is_empty());
    }
}
