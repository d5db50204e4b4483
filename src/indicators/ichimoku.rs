// =============================================================================
// Ichimoku Kinko Hyo
// =============================================================================
//
//   tenkan   = (HH + LL) / 2 over `tenkan` bars
//   kijun    = (HH + LL) / 2 over `kijun` bars
//   senkou_a = (tenkan + kijun) / 2
//   senkou_b = (HH + LL) / 2 over `senkou_b` bars
//   chikou   = close
//
// Values are stamped at the bar they are computed from.  The leading spans are
// plotted `displacement` bars ahead and chikou `displacement` bars behind; the
// shift is carried in the value so consumers can place them.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::bars::Bar;
use crate::indicators::stochastic::HighLowWindow;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IchimokuValue {
    pub tenkan: f64,
    pub kijun: f64,
    pub senkou_a: f64,
    pub senkou_b: f64,
    pub chikou: f64,
    pub displacement: usize,
}

#[derive(Debug, Clone)]
pub struct IchimokuState {
    tenkan: HighLowWindow,
    kijun: HighLowWindow,
    senkou_b: HighLowWindow,
    displacement: usize,
}

fn midpoint((highest, lowest): (f64, f64)) -> f64 {
    (highest + lowest) / 2.0
}

impl IchimokuState {
    pub fn new(tenkan: usize, kijun: usize, senkou_b: usize, displacement: usize) -> Self {
        Self {
            tenkan: HighLowWindow::new(tenkan),
            kijun: HighLowWindow::new(kijun),
            senkou_b: HighLowWindow::new(senkou_b),
            displacement,
        }
    }

    pub fn update(&mut self, bar: &Bar) -> Option<IchimokuValue> {
        // All three windows must see every bar, so no early return before
        // the last update.
        let tenkan = self.tenkan.update(bar.high, bar.low);
        let kijun = self.kijun.update(bar.high, bar.low);
        let senkou_b = self.senkou_b.update(bar.high, bar.low);

        let tenkan = midpoint(tenkan?);
        let kijun = midpoint(kijun?);
        let senkou_b = midpoint(senkou_b?);

        Some(IchimokuValue {
            tenkan,
            kijun,
            senkou_a: (tenkan + kijun) / 2.0,
            senkou_b,
            chikou: bar.close,
            displacement: self.displacement,
        })
    }
}

#[cfg(test)]
pub fn calculate_ichimoku(
    bars: &[Bar],
    tenkan: usize,
    kijun: usize,
    senkou_b: usize,
    displacement: usize,
) -> Vec<IchimokuValue> {
    let mut state = IchimokuState::new(tenkan, kijun, senkou_b, displacement);
    bars.iter().filter_map(|b| state.update(b)).collect()
}
