// =============================================================================
// Candlestick patterns
// =============================================================================
//
// Single, double and triple bar formations recognised from fixed geometric
// ratios.  Each kind has a fixed base confidence; corroboration adds at most
// MAX_CONFIDENCE_BOOST on top:
//
//   volume  the last bar of the pattern traded >= volume_boost_ratio x the
//           trailing mean volume                                     (+0.15)
//   trend   the bars before the pattern moved against the pattern's
//           bias, i.e. the pattern marks a reversal                  (+0.15)
// =============================================================================

use crate::bars::Bar;
use crate::patterns::{
    volume_confirms, PatternConfig, PatternContext, PatternKind, PatternMatch, PatternSource,
    MAX_CONFIDENCE_BOOST,
};

const VOLUME_BOOST: f64 = 0.15;
const TREND_BOOST: f64 = 0.15;

/// Relative move over the trend lookback that counts as a trend.
const TREND_MIN_MOVE: f64 = 0.002;

const KINDS: &[PatternKind] = &[
    PatternKind::Doji,
    PatternKind::Hammer,
    PatternKind::ShootingStar,
    PatternKind::BullishEngulfing,
    PatternKind::BearishEngulfing,
    PatternKind::BullishHarami,
    PatternKind::BearishHarami,
    PatternKind::MorningStar,
    PatternKind::EveningStar,
    PatternKind::ThreeWhiteSoldiers,
    PatternKind::ThreeBlackCrows,
];

fn base_confidence(kind: PatternKind) -> f64 {
    match kind {
        PatternKind::Doji => 0.5,
        PatternKind::Hammer | PatternKind::ShootingStar => 0.6,
        PatternKind::BullishEngulfing | PatternKind::BearishEngulfing => 0.65,
        PatternKind::BullishHarami | PatternKind::BearishHarami => 0.55,
        PatternKind::MorningStar | PatternKind::EveningStar => 0.7,
        PatternKind::ThreeWhiteSoldiers | PatternKind::ThreeBlackCrows => 0.7,
        _ => 0.5,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trend {
    Up,
    Down,
}

/// Direction of the closes over the `lookback` bars that end just before
/// `index`.
fn prior_trend(bars: &[Bar], index: usize, lookback: usize) -> Option<Trend> {
    if lookback == 0 || index < lookback + 1 {
        return None;
    }
    let from = bars[index - 1 - lookback].close;
    let to = bars[index - 1].close;
    if from == 0.0 {
        return None;
    }
    let change = (to - from) / from.abs();
    if change > TREND_MIN_MOVE {
        Some(Trend::Up)
    } else if change < -TREND_MIN_MOVE {
        Some(Trend::Down)
    } else {
        None
    }
}

pub struct CandlestickSource {
    config: PatternConfig,
}

impl CandlestickSource {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    fn is_doji(&self, bar: &Bar) -> bool {
        bar.range() > 0.0 && bar.body() / bar.range() < self.config.doji_body_ratio
    }

    fn is_hammer(&self, bar: &Bar) -> bool {
        let body = bar.body();
        body > 0.0
            && bar.lower_wick() >= body * self.config.shadow_body_ratio
            && bar.upper_wick() <= bar.range() * 0.2
    }

    fn is_shooting_star(&self, bar: &Bar) -> bool {
        let body = bar.body();
        body > 0.0
            && bar.upper_wick() >= body * self.config.shadow_body_ratio
            && bar.lower_wick() <= bar.range() * 0.2
    }

    /// Kinds whose last bar is `bars[i]`.
    fn shapes_at(&self, bars: &[Bar], i: usize) -> Vec<(PatternKind, usize)> {
        let mut found = Vec::new();
        let curr = &bars[i];

        // ---- single bar -----------------------------------------------------
        if self.is_doji(curr) {
            found.push((PatternKind::Doji, 1));
        }
        if self.is_hammer(curr) {
            found.push((PatternKind::Hammer, 1));
        }
        if self.is_shooting_star(curr) {
            found.push((PatternKind::ShootingStar, 1));
        }

        // ---- two bars -------------------------------------------------------
        if i >= 1 {
            let prev = &bars[i - 1];
            if prev.is_bearish()
                && curr.is_bullish()
                && curr.open <= prev.close
                && curr.close >= prev.open
                && curr.body() > prev.body()
            {
                found.push((PatternKind::BullishEngulfing, 2));
            }
            if prev.is_bullish()
                && curr.is_bearish()
                && curr.open >= prev.close
                && curr.close <= prev.open
                && curr.body() > prev.body()
            {
                found.push((PatternKind::BearishEngulfing, 2));
            }
            if prev.is_bearish()
                && curr.is_bullish()
                && curr.open > prev.close
                && curr.close < prev.open
            {
                found.push((PatternKind::BullishHarami, 2));
            }
            if prev.is_bullish()
                && curr.is_bearish()
                && curr.open < prev.close
                && curr.close > prev.open
            {
                found.push((PatternKind::BearishHarami, 2));
            }
        }

        // ---- three bars -----------------------------------------------------
        if i >= 2 {
            let first = &bars[i - 2];
            let second = &bars[i - 1];
            if first.is_bearish()
                && second.body() < first.body() / 3.0
                && curr.is_bullish()
                && curr.close > first.body_mid()
            {
                found.push((PatternKind::MorningStar, 3));
            }
            if first.is_bullish()
                && second.body() < first.body() / 3.0
                && curr.is_bearish()
                && curr.close < first.body_mid()
            {
                found.push((PatternKind::EveningStar, 3));
            }
            if first.is_bullish()
                && second.is_bullish()
                && curr.is_bullish()
                && second.close > first.close
                && curr.close > second.close
                && second.open > first.open
                && curr.open > second.open
            {
                found.push((PatternKind::ThreeWhiteSoldiers, 3));
            }
            if first.is_bearish()
                && second.is_bearish()
                && curr.is_bearish()
                && second.close < first.close
                && curr.close < second.close
                && second.open < first.open
                && curr.open < second.open
            {
                found.push((PatternKind::ThreeBlackCrows, 3));
            }
        }

        found
    }

    fn score(&self, bars: &[Bar], i: usize, kind: PatternKind, len: usize, ctx: &PatternContext<'_>) -> PatternMatch {
        let first = i + 1 - len;
        let trend = prior_trend(bars, first, self.config.trend_lookback);

        // Doji is neutral on its own; its bias is a reversal of the prior trend.
        let bullish = match kind {
            PatternKind::Doji => trend == Some(Trend::Down),
            PatternKind::Hammer
            | PatternKind::BullishEngulfing
            | PatternKind::BullishHarami
            | PatternKind::MorningStar
            | PatternKind::ThreeWhiteSoldiers => true,
            _ => false,
        };

        let mut boost = 0.0;
        if volume_confirms(bars, i, self.config.volume_lookback, self.config.volume_boost_ratio) {
            boost += VOLUME_BOOST;
        }
        let reversal = match (kind, trend) {
            (PatternKind::Doji, Some(_)) => true,
            (_, Some(Trend::Down)) => bullish,
            (_, Some(Trend::Up)) => !bullish,
            (_, None) => false,
        };
        if reversal {
            boost += TREND_BOOST;
        }

        let curr = &bars[i];
        let confidence = base_confidence(kind) + boost.min(MAX_CONFIDENCE_BOOST);
        PatternMatch::new(kind, ctx.symbol, bullish, confidence, bars[first].start_time, curr.end_time)
            .with_level("high", bars[first..=i].iter().map(|b| b.high).fold(f64::MIN, f64::max))
            .with_level("low", bars[first..=i].iter().map(|b| b.low).fold(f64::MAX, f64::min))
            .with_level("close", curr.close)
    }
}

impl PatternSource for CandlestickSource {
    fn name(&self) -> &'static str {
        "candlestick"
    }

    fn kinds(&self) -> &'static [PatternKind] {
        KINDS
    }

    fn detect(&self, ctx: &PatternContext<'_>) -> Vec<PatternMatch> {
        let bars = ctx.window(self.config.scan_window);
        if bars.len() < PatternKind::Doji.min_bars() {
            return Vec::new();
        }

        let mut matches = Vec::new();
        for i in 0..bars.len() {
            for (kind, len) in self.shapes_at(bars, i) {
                matches.push(self.score(bars, i, kind, len, ctx));
            }
        }
        matches
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::patterns::test_support::{bar, series_of};
    use crate::types::ChartType;

    fn flat_prefix(n: usize) -> Vec<Bar> {
        (0..n as i64).map(|t| bar(t, 100.0, 100.5, 99.5, 100.3, 100.0)).collect()
    }

    fn detect(bars: &[Bar]) -> Vec<PatternMatch> {
        let series = series_of(bars);
        let ctx = PatternContext {
            symbol: "BTCUSDT",
            chart_type: ChartType::Candlestick,
            series: &series,
            kagi_levels: None,
        };
        CandlestickSource::new(PatternConfig::default()).detect(&ctx)
    }

    fn last_of(matches: &[PatternMatch], kind: PatternKind) -> Option<&PatternMatch> {
        matches.iter().filter(|m| m.kind == kind).last()
    }

    #[test]
    fn below_minimum_bar_count_is_empty() {
        let mut bars = flat_prefix(3);
        bars.push(bar(3, 100.0, 101.0, 99.0, 100.01, 100.0));
        assert!(detect(&bars).is_empty());
    }

    #[test]
    fn doji_ratio() {
        let mut bars = flat_prefix(12);
        bars.push(bar(12, 100.0, 102.0, 98.0, 100.1, 100.0));
        let detected = detect(&bars);
        let m = last_of(&detected, PatternKind::Doji).expect("doji");
        assert_eq!(m.end_time, bars[12].end_time);
        // no trend, normal volume: base confidence only
        assert!((m.confidence - 0.5).abs() < 1e-12);
    }

    #[test]
    fn hammer_after_downtrend_with_volume_is_boosted() {
        let mut bars: Vec<Bar> = (0..12)
            .map(|t| {
                let c = 110.0 - t as f64;
                bar(t, c + 0.8, c + 1.0, c - 0.2, c, 100.0)
            })
            .collect();
        // body 0.3, lower wick 2.0, upper wick 0.1
        bars.push(bar(12, 98.0, 98.4, 96.0, 98.3, 300.0));
        let detected = detect(&bars);
        let m = last_of(&detected, PatternKind::Hammer).expect("hammer");
        assert!(m.bullish);
        assert!((m.confidence - 0.9).abs() < 1e-12, "got {}", m.confidence);
    }

    #[test]
    fn bullish_engulfing() {
        let mut bars = flat_prefix(12);
        bars.push(bar(12, 101.0, 101.2, 99.8, 100.0, 100.0));
        bars.push(bar(13, 99.9, 101.8, 99.7, 101.5, 100.0));
        let detected = detect(&bars);
        let m = last_of(&detected, PatternKind::BullishEngulfing).expect("engulfing");
        assert!(m.bullish);
        assert_eq!(m.start_time, bars[12].start_time);
        assert_eq!(m.end_time, bars[13].end_time);
    }

    #[test]
    fn three_black_crows() {
        let mut bars = flat_prefix(12);
        bars.push(bar(12, 100.0, 100.1, 98.9, 99.0, 100.0));
        bars.push(bar(13, 99.5, 99.6, 97.9, 98.0, 100.0));
        bars.push(bar(14, 98.5, 98.6, 96.9, 97.0, 100.0));
        let detected = detect(&bars);
        let m = last_of(&detected, PatternKind::ThreeBlackCrows).expect("crows");
        assert!(!m.bullish);
    }

    #[test]
    fn morning_star() {
        let mut bars = flat_prefix(12);
        bars.push(bar(12, 103.0, 103.2, 99.8, 100.0, 100.0));
        bars.push(bar(13, 99.6, 99.9, 99.3, 99.7, 100.0));
        bars.push(bar(14, 100.0, 102.8, 99.9, 102.5, 100.0));
        assert!(last_of(&detect(&bars), PatternKind::MorningStar).is_some());
    }

    #[test]
    fn confidence_never_exceeds_one() {
        let bars: Vec<Bar> = (0..150)
            .map(|t| {
                let c = 100.0 + ((t as f64) * 0.7).sin() * 3.0;
                let o = 100.0 + ((t as f64) * 0.7 - 0.5).sin() * 3.0;
                let v = if t % 7 == 0 { 500.0 } else { 100.0 };
                bar(t, o, o.max(c) + 0.4, o.min(c) - 0.9, c, v)
            })
            .collect();
        let matches = detect(&bars);
        assert!(!matches.is_empty());
        assert!(matches.iter().all(|m| (0.0..=1.0).contains(&m.confidence)));
    }
}
