// =============================================================================
// Candlestick policy
// =============================================================================
//
// Pass-through: every input candle is one finalized bar.
//
// Resampling: candles are folded into buckets of `resample_ms`, aligned to
// `floor(timestamp / resample_ms)`.  open = first open, close = last close,
// high = max, low = min, volume = sum.  The open bucket is the current bar and
// finalizes when a candle from a later bucket arrives.

use crate::bars::Bar;
use crate::types::Ohlcv;

#[derive(Debug, Clone)]
pub struct CandleFormer {
    resample_ms: Option<i64>,
    current: Option<Bar>,
}

impl CandleFormer {
    pub fn new(resample_ms: Option<i64>) -> Self {
        Self {
            resample_ms,
            current: None,
        }
    }

    /// Fold `tick` in; returns the bar it finalized, if any.
    pub fn push(&mut self, tick: &Ohlcv) -> Option<Bar> {
        let Some(bucket_ms) = self.resample_ms else {
            return Some(Bar::from_tick(tick));
        };

        let bucket_start = tick.timestamp.div_euclid(bucket_ms) * bucket_ms;

        if let Some(bar) = self.current.as_mut().filter(|b| b.start_time == bucket_start) {
            bar.high = bar.high.max(tick.high);
            bar.low = bar.low.min(tick.low);
            bar.close = tick.close;
            bar.volume += tick.volume;
            bar.end_time = tick.timestamp;
            return None;
        }

        let mut opened = Bar::from_tick(tick);
        opened.start_time = bucket_start;
        self.current.replace(opened)
    }

    pub fn current(&self) -> Option<&Bar> {
        self.current.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(ts: i64, o: f64, h: f64, l: f64, c: f64, v: f64) -> Ohlcv {
        Ohlcv {
            timestamp: ts,
            open: o,
            high: h,
            low: l,
            close: c,
            volume: v,
            symbol: "BTCUSDT".into(),
            timeframe: "1m".into(),
        }
    }

    #[test]
    fn pass_through_emits_one_bar_per_candle() {
        let mut former = CandleFormer::new(None);
        let bar = former.push(&candle(0, 1.0, 2.0, 0.5, 1.5, 10.0)).unwrap();
        assert_eq!(bar.open, 1.0);
        assert_eq!(bar.close, 1.5);
        assert!(former.current().is_none());
    }

    #[test]
    fn resampling_aggregates_ohlcv() {
        let mut former = CandleFormer::new(Some(300_000));
        assert!(former.push(&candle(0, 10.0, 11.0, 9.5, 10.5, 1.0)).is_none());
        assert!(former.push(&candle(60_000, 10.5, 12.0, 10.0, 11.5, 2.0)).is_none());
        assert!(former.push(&candle(120_000, 11.5, 11.8, 9.0, 9.2, 3.0)).is_none());

        // First candle of the next bucket closes the previous one.
        let bar = former.push(&candle(300_000, 9.2, 9.5, 9.1, 9.4, 1.0)).unwrap();
        assert_eq!(bar.start_time, 0);
        assert_eq!(bar.end_time, 120_000);
        assert_eq!(bar.open, 10.0);
        assert_eq!(bar.high, 12.0);
        assert_eq!(bar.low, 9.0);
        assert_eq!(bar.close, 9.2);
        assert!((bar.volume - 6.0).abs() < 1e-12);

        let open = former.current().unwrap();
        assert_eq!(open.start_time, 300_000);
        assert_eq!(open.close, 9.4);
    }

    #[test]
    fn resampling_aligns_buckets_to_epoch() {
        let mut former = CandleFormer::new(Some(300_000));
        former.push(&candle(420_000, 1.0, 1.0, 1.0, 1.0, 1.0));
        assert_eq!(former.current().unwrap().start_time, 300_000);
    }
}
