// =============================================================================
// Average Directional Index (ADX)
// =============================================================================
//
// ADX quantifies trend **strength** regardless of direction.
//
// Calculation pipeline:
//   1. Compute +DM (positive directional movement) and -DM per bar.
//   2. Compute True Range (TR) per bar.
//   3. Apply Wilder's smoothing (period) to +DM, -DM, and TR.
//   4. Derive +DI = smoothed(+DM) / smoothed(TR) * 100
//            -DI = smoothed(-DM) / smoothed(TR) * 100
//   5. DX  = |+DI - -DI| / (+DI + -DI) * 100
//   6. ADX = Wilder's smoothed average of DX over `period` bars.
//
// The first DX needs `period` bar-to-bar transitions and ADX needs `period`
// DX values, so the first output appears at bar `2 * period`.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::bars::Bar;
use crate::indicators::atr::{true_range, WilderAverage};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AdxValue {
    pub adx: f64,
    pub plus_di: f64,
    pub minus_di: f64,
}

#[derive(Debug, Clone)]
pub struct AdxState {
    period: usize,
    prev: Option<Bar>,
    transitions: usize,
    smooth_plus_dm: f64,
    smooth_minus_dm: f64,
    smooth_tr: f64,
    adx: WilderAverage,
}

impl AdxState {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev: None,
            transitions: 0,
            smooth_plus_dm: 0.0,
            smooth_minus_dm: 0.0,
            smooth_tr: 0.0,
            adx: WilderAverage::new(period),
        }
    }

    pub fn update(&mut self, bar: &Bar) -> Option<AdxValue> {
        if self.period == 0 {
            return None;
        }
        let prev = self.prev.replace(*bar)?;

        // ---- Steps 1 & 2: raw directional movement and true range ----------
        let tr = true_range(bar, prev.close);
        let up_move = bar.high - prev.high;
        let down_move = prev.low - bar.low;
        let pdm = if up_move > down_move && up_move > 0.0 { up_move } else { 0.0 };
        let mdm = if down_move > up_move && down_move > 0.0 { down_move } else { 0.0 };

        // ---- Step 3: Wilder's running-sum smoothing -------------------------
        let period_f = self.period as f64;
        self.transitions += 1;
        if self.transitions <= self.period {
            self.smooth_plus_dm += pdm;
            self.smooth_minus_dm += mdm;
            self.smooth_tr += tr;
            if self.transitions < self.period {
                return None;
            }
        } else {
            self.smooth_plus_dm = self.smooth_plus_dm - self.smooth_plus_dm / period_f + pdm;
            self.smooth_minus_dm = self.smooth_minus_dm - self.smooth_minus_dm / period_f + mdm;
            self.smooth_tr = self.smooth_tr - self.smooth_tr / period_f + tr;
        }

        // ---- Steps 4-6 ------------------------------------------------------
        let (plus_di, minus_di, dx) =
            directional_index(self.smooth_plus_dm, self.smooth_minus_dm, self.smooth_tr);
        let adx = self.adx.update(dx)?;

        if adx.is_finite() {
            Some(AdxValue { adx, plus_di, minus_di })
        } else {
            None
        }
    }
}

/// Compute the ADX series for `bars` (oldest first).
#[cfg(test)]
pub fn calculate_adx(bars: &[Bar], period: usize) -> Vec<AdxValue> {
    let mut state = AdxState::new(period);
    bars.iter().filter_map(|b| state.update(b)).collect()
}

// =============================================================================
// Internal helpers
// =============================================================================

/// +DI, -DI and DX from smoothed +DM, -DM and TR.
///
/// A zero true range (perfectly flat bars) has no directional movement at all
/// and yields zeros rather than a division by zero.
fn directional_index(smooth_plus_dm: f64, smooth_minus_dm: f64, smooth_tr: f64) -> (f64, f64, f64) {
    if smooth_tr == 0.0 {
        return (0.0, 0.0, 0.0);
    }

    let plus_di = (smooth_plus_dm / smooth_tr) * 100.0;
    let minus_di = (smooth_minus_dm / smooth_tr) * 100.0;

    let di_sum = plus_di + minus_di;
    if di_sum == 0.0 {
        return (plus_di, minus_di, 0.0);
    }

    let dx = ((plus_di - minus_di).abs() / di_sum) * 100.0;
    (plus_di, minus_di, dx)
}
