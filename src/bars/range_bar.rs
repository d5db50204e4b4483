// =============================================================================
// Range-bar policy
// =============================================================================
//
// Tick prices accumulate into the current bar until its span reaches the
// configured size:
//
//   points      high - low >= range_size
//   percentage  (high - low) / open * 100 >= range_size
//
// The triggering tick belongs to the completed bar.  The next bar opens at the
// triggering tick's price with no volume of its own yet.
//
// An OHLC candle is walked as open -> low -> high -> close when it closed at
// or above its open, open -> high -> low -> close otherwise, so an intra-candle
// extreme can complete a bar.  Its volume is spread evenly over the distinct
// prices of that path.  A plain price tick is a path of one.

use serde::{Deserialize, Serialize};

use crate::bars::Bar;
use crate::types::{Ohlcv, SizeMode};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeBar {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub start_time: i64,
    pub end_time: i64,
    pub range_size: f64,
    pub tick_count: u64,
    pub is_up: bool,
}

impl RangeBar {
    fn anchored(price: f64, time: i64, range_size: f64) -> Self {
        Self {
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 0.0,
            start_time: time,
            end_time: time,
            range_size,
            tick_count: 0,
            is_up: true,
        }
    }

    fn absorb(&mut self, time: i64, price: f64, volume: f64) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
        self.volume += volume;
        self.tick_count += 1;
        self.end_time = time;
        self.is_up = self.close >= self.open;
    }

    pub fn bar(&self) -> Bar {
        Bar {
            start_time: self.start_time,
            end_time: self.end_time,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume: self.volume,
        }
    }
}

/// `true` once `bar` spans at least `range_size` under `mode`.
pub fn range_reached(bar: &RangeBar, mode: SizeMode) -> bool {
    let span = bar.high - bar.low;
    match mode {
        SizeMode::Points => span >= bar.range_size,
        SizeMode::Percentage => {
            if bar.open == 0.0 {
                span > 0.0
            } else {
                span / bar.open.abs() * 100.0 >= bar.range_size
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct RangeBarFormer {
    range_size: f64,
    mode: SizeMode,
    current: Option<RangeBar>,
}

impl RangeBarFormer {
    pub fn new(range_size: f64, mode: SizeMode) -> Self {
        Self {
            range_size,
            mode,
            current: None,
        }
    }

    pub fn current(&self) -> Option<&RangeBar> {
        self.current.as_ref()
    }

    /// Feed one tick price; returns the bar it completed, if any.
    pub fn push(&mut self, time: i64, price: f64, volume: f64) -> Option<RangeBar> {
        let range_size = self.range_size;
        let bar = self
            .current
            .get_or_insert_with(|| RangeBar::anchored(price, time, range_size));
        bar.absorb(time, price, volume);

        if !range_reached(bar, self.mode) {
            return None;
        }

        let next = RangeBar::anchored(price, time, range_size);
        self.current.replace(next)
    }

    /// Feed a whole candle along its intra-candle path; returns every bar it
    /// completed.
    pub fn push_candle(&mut self, tick: &Ohlcv) -> Vec<RangeBar> {
        let path = candle_path(tick);
        let volume = tick.volume / path.len() as f64;
        path.into_iter()
            .filter_map(|price| self.push(tick.timestamp, price, volume))
            .collect()
    }
}

/// Prices a candle visited, in the order assumed above, without repeats.
fn candle_path(tick: &Ohlcv) -> Vec<f64> {
    let legs = if tick.close >= tick.open {
        [tick.open, tick.low, tick.high, tick.close]
    } else {
        [tick.open, tick.high, tick.low, tick.close]
    };
    let mut path: Vec<f64> = Vec::with_capacity(4);
    for price in legs {
        if path.last() != Some(&price) {
            path.push(price);
        }
    }
    path
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn feed(former: &mut RangeBarFormer, prices: &[f64]) -> Vec<RangeBar> {
        prices
            .iter()
            .enumerate()
            .filter_map(|(i, &p)| former.push(i as i64, p, 2.0))
            .collect()
    }

    #[test]
    fn bar_closes_exactly_when_range_is_reached() {
        let mut former = RangeBarFormer::new(1.0, SizeMode::Points);
        assert!(former.push(0, 100.0, 1.0).is_none());
        assert!(former.push(1, 100.4, 1.0).is_none());
        assert!(former.push(2, 99.7, 1.0).is_none());
        let done = former.push(3, 100.7, 1.0).expect("span 1.0 reached");

        assert_eq!(done.open, 100.0);
        assert_eq!(done.high, 100.7);
        assert_eq!(done.low, 99.7);
        assert_eq!(done.close, 100.7);
        assert_eq!(done.tick_count, 4);
        assert!(done.is_up);
        assert!((done.volume - 4.0).abs() < 1e-12);

        let next = former.current().unwrap();
        assert_eq!(next.open, 100.7);
        assert_eq!(next.tick_count, 0);
        assert_eq!(next.volume, 0.0);
    }

    #[test]
    fn points_invariant_holds_for_every_bar() {
        let prices: Vec<f64> = (0..500)
            .map(|i| 200.0 + (i as f64 * 0.17).sin() * 5.0 + (i as f64 * 0.011).cos() * 8.0)
            .collect();
        let mut former = RangeBarFormer::new(2.5, SizeMode::Points);
        let bars = feed(&mut former, &prices);
        assert!(bars.len() > 5);
        for bar in &bars {
            assert!(bar.high - bar.low >= 2.5);
            assert_eq!(bar.range_size, 2.5);
        }
    }

    #[test]
    fn percentage_invariant_holds_for_every_bar() {
        let prices: Vec<f64> = (0..500)
            .map(|i| 50.0 + (i as f64 * 0.23).sin() * 2.0)
            .collect();
        let mut former = RangeBarFormer::new(1.0, SizeMode::Percentage);
        let bars = feed(&mut former, &prices);
        assert!(!bars.is_empty());
        for bar in &bars {
            assert!((bar.high - bar.low) / bar.open * 100.0 >= 1.0);
        }
    }

    #[test]
    fn gap_tick_completes_bar_in_one_step() {
        let mut former = RangeBarFormer::new(1.0, SizeMode::Points);
        former.push(0, 10.0, 1.0);
        let done = former.push(1, 15.0, 1.0).unwrap();
        assert!(done.is_up);
        assert_eq!(done.high - done.low, 5.0);
        assert_eq!(former.current().unwrap().open, 15.0);
    }

    #[test]
    fn down_bar_is_flagged() {
        let mut former = RangeBarFormer::new(1.0, SizeMode::Points);
        let bars = feed(&mut former, &[10.0, 9.5, 8.9]);
        assert_eq!(bars.len(), 1);
        assert!(!bars[0].is_up);
    }

    fn candle(t: i64, o: f64, h: f64, l: f64, c: f64) -> Ohlcv {
        Ohlcv {
            timestamp: t,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: 4.0,
            symbol: "BTCUSDT".into(),
            timeframe: "1m".into(),
        }
    }

    #[test]
    fn price_tick_is_a_single_step() {
        let mut former = RangeBarFormer::new(1.0, SizeMode::Points);
        assert!(former.push_candle(&Ohlcv::from_price(0, 100.0, 3.0)).is_empty());
        let open = former.current().unwrap();
        assert_eq!(open.tick_count, 1);
        assert!((open.volume - 3.0).abs() < 1e-12);
    }

    #[test]
    fn intra_candle_extreme_completes_a_bar() {
        let mut former = RangeBarFormer::new(2.0, SizeMode::Points);
        // Closes inside the range but the high pierces it.
        let done = former.push_candle(&candle(0, 100.0, 102.0, 99.8, 100.2));
        assert_eq!(done.len(), 1);
        assert_eq!(done[0].open, 100.0);
        assert_eq!(done[0].high, 102.0);
        assert_eq!(done[0].close, 102.0);

        // The rest of the path continues in the next bar: 102.0 -> 100.2.
        let next = former.current().unwrap();
        assert_eq!(next.open, 102.0);
        assert_eq!(next.low, 100.2);
        assert_eq!(next.close, 100.2);

        let total = done[0].volume + next.volume;
        assert!((total - 4.0).abs() < 1e-12);
    }

    #[test]
    fn bearish_candle_walks_high_before_low() {
        let mut former = RangeBarFormer::new(2.0, SizeMode::Points);
        let done = former.push_candle(&candle(0, 100.0, 101.0, 98.5, 99.0));
        assert_eq!(done.len(), 1);
        // Completed on the way down, at the low.
        assert_eq!(done[0].close, 98.5);
        assert!(!done[0].is_up);
    }
}
