// =============================================================================
// Range-bar patterns
// =============================================================================
//
// Range bars all span the same price distance, so a close beyond the extreme
// of the previous `breakout_lookback` bars is a clean breakout signal.
//
//   Breakout / breakdown   close above the prior highs / below the prior lows
//                          base 0.55
//                          +0.15 bar volume >= volume_boost_ratio x mean
//                          +0.15 a volume cluster sits at the broken level
//   False breakout         the next bar closes back through the level
//
// Volume clusters bucket closes by the mean bar range; a bucket is a cluster
// when it holds at least `cluster_factor` x the mean bucket volume.
// =============================================================================

use std::collections::BTreeMap;

use crate::bars::Bar;
use crate::patterns::{
    volume_confirms, PatternConfig, PatternContext, PatternKind, PatternMatch, PatternSource,
    MAX_CONFIDENCE_BOOST,
};

const KINDS: &[PatternKind] = &[
    PatternKind::RangeBreakout,
    PatternKind::RangeBreakdown,
    PatternKind::RangeFalseBreakout,
];

const BREAKOUT_BASE: f64 = 0.55;
const VOLUME_BOOST: f64 = 0.15;
const CLUSTER_BOOST: f64 = 0.15;

/// A price band that traded unusually heavy volume.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VolumeCluster {
    pub low: f64,
    pub high: f64,
    pub volume: f64,
}

impl VolumeCluster {
    /// Band lies within one `width` of `level`.
    fn near(&self, level: f64, width: f64) -> bool {
        self.high >= level - width && self.low <= level + width
    }
}

/// Heavy-volume price bands over `bars`.
pub fn volume_clusters(bars: &[Bar], cluster_factor: f64) -> Vec<VolumeCluster> {
    if bars.is_empty() {
        return Vec::new();
    }
    let width = bars.iter().map(|b| b.high - b.low).sum::<f64>() / bars.len() as f64;
    if width <= 0.0 || !width.is_finite() {
        return Vec::new();
    }

    let mut buckets: BTreeMap<i64, f64> = BTreeMap::new();
    for b in bars {
        let key = (b.close / width).floor() as i64;
        *buckets.entry(key).or_default() += b.volume;
    }
    let mean = buckets.values().sum::<f64>() / buckets.len() as f64;
    if mean <= 0.0 {
        return Vec::new();
    }

    buckets
        .into_iter()
        .filter(|(_, volume)| *volume >= mean * cluster_factor)
        .map(|(key, volume)| VolumeCluster {
            low: key as f64 * width,
            high: (key + 1) as f64 * width,
            volume,
        })
        .collect()
}

pub struct RangeBarSource {
    config: PatternConfig,
}

impl RangeBarSource {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }
}

impl PatternSource for RangeBarSource {
    fn name(&self) -> &'static str {
        "range_bar"
    }

    fn kinds(&self) -> &'static [PatternKind] {
        KINDS
    }

    fn detect(&self, ctx: &PatternContext<'_>) -> Vec<PatternMatch> {
        let bars = ctx.window(self.config.scan_window);
        let lookback = self.config.breakout_lookback.max(1);
        if bars.len() < PatternKind::RangeBreakout.min_bars() || bars.len() <= lookback {
            return Vec::new();
        }

        let mut out = Vec::new();
        for i in lookback..bars.len() {
            let prior = &bars[i - lookback..i];
            let bar = &bars[i];
            let prior_high = prior.iter().map(|b| b.high).fold(f64::MIN, f64::max);
            let prior_low = prior.iter().map(|b| b.low).fold(f64::MAX, f64::min);

            let (kind, bullish, level) = if bar.close > prior_high {
                (PatternKind::RangeBreakout, true, prior_high)
            } else if bar.close < prior_low {
                (PatternKind::RangeBreakdown, false, prior_low)
            } else {
                continue;
            };

            let mut boost = 0.0;
            if volume_confirms(bars, i, self.config.volume_lookback, self.config.volume_boost_ratio) {
                boost += VOLUME_BOOST;
            }
            let width = prior.iter().map(|b| b.high - b.low).sum::<f64>() / prior.len() as f64;
            let cluster = volume_clusters(&bars[..i], self.config.cluster_factor)
                .into_iter()
                .filter(|c| c.near(level, width))
                .max_by(|a, b| a.volume.total_cmp(&b.volume));
            if cluster.is_some() {
                boost += CLUSTER_BOOST;
            }

            let mut found = PatternMatch::new(
                kind,
                ctx.symbol,
                bullish,
                BREAKOUT_BASE + boost.min(MAX_CONFIDENCE_BOOST),
                bar.start_time,
                bar.end_time,
            )
            .with_level("level", level)
            .with_level("close", bar.close);
            if let Some(c) = cluster {
                found = found.with_level("volume_cluster", (c.low + c.high) / 2.0);
            }
            out.push(found);

            if let Some(next) = bars.get(i + 1) {
                let failed = if bullish { next.close < level } else { next.close > level };
                if failed {
                    out.push(
                        PatternMatch::new(
                            PatternKind::RangeFalseBreakout,
                            ctx.symbol,
                            !bullish,
                            0.6,
                            bar.start_time,
                            next.end_time,
                        )
                        .with_level("level", level)
                        .with_level("close", next.close),
                    );
                }
            }
        }
        out
    }
}
