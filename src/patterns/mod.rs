// =============================================================================
// Pattern Detector
// =============================================================================
//
// Rule-based scanners over a finalized bar series.  Each family is a
// `PatternSource`; which sources run depends on the chart type:
//
//   candlestick chart  candlestick + structural
//   kagi chart         structural + kagi
//   range-bar chart    candlestick + structural + range-bar
//
// Every match carries a confidence in [0, 1].  Overlapping candidates of the
// same (symbol, kind) collapse to the single highest-confidence match.  A
// series shorter than a kind's minimum bar count simply produces nothing.

pub mod cache;
pub mod candlestick;
pub mod kagi;
pub mod range_bar;
pub mod structural;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::bars::{Bar, BarSeries, KagiLevels};
use crate::error::{ChartError, Result};
use crate::types::ChartType;

pub use cache::PatternCache;

const HOUR_MS: i64 = 3_600_000;

/// Upper bound on the confidence added by volume / trend corroboration.
pub const MAX_CONFIDENCE_BOOST: f64 = 0.3;

// ---------------------------------------------------------------------------
// Pattern kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    // candlestick
    Doji,
    Hammer,
    ShootingStar,
    BullishEngulfing,
    BearishEngulfing,
    BullishHarami,
    BearishHarami,
    MorningStar,
    EveningStar,
    ThreeWhiteSoldiers,
    ThreeBlackCrows,
    // structural
    HeadAndShoulders,
    InverseHeadAndShoulders,
    DoubleTop,
    DoubleBottom,
    AscendingTriangle,
    DescendingTriangle,
    SymmetricalTriangle,
    // kagi
    ThreeBuddhaTop,
    ThreeRiverBottom,
    KagiBreakout,
    KagiBreakdown,
    KagiFalseBreakout,
    // range bar
    RangeBreakout,
    RangeBreakdown,
    RangeFalseBreakout,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternFamily {
    Candlestick,
    Structural,
    Kagi,
    RangeBar,
}

impl PatternKind {
    pub const ALL: [PatternKind; 26] = [
        Self::Doji,
        Self::Hammer,
        Self::ShootingStar,
        Self::BullishEngulfing,
        Self::BearishEngulfing,
        Self::BullishHarami,
        Self::BearishHarami,
        Self::MorningStar,
        Self::EveningStar,
        Self::ThreeWhiteSoldiers,
        Self::ThreeBlackCrows,
        Self::HeadAndShoulders,
        Self::InverseHeadAndShoulders,
        Self::DoubleTop,
        Self::DoubleBottom,
        Self::AscendingTriangle,
        Self::DescendingTriangle,
        Self::SymmetricalTriangle,
        Self::ThreeBuddhaTop,
        Self::ThreeRiverBottom,
        Self::KagiBreakout,
        Self::KagiBreakdown,
        Self::KagiFalseBreakout,
        Self::RangeBreakout,
        Self::RangeBreakdown,
        Self::RangeFalseBreakout,
    ];

    pub fn family(&self) -> PatternFamily {
        use PatternKind::*;
        match self {
            Doji | Hammer | ShootingStar | BullishEngulfing | BearishEngulfing | BullishHarami
            | BearishHarami | MorningStar | EveningStar | ThreeWhiteSoldiers | ThreeBlackCrows => {
                PatternFamily::Candlestick
            }
            HeadAndShoulders | InverseHeadAndShoulders | DoubleTop | DoubleBottom
            | AscendingTriangle | DescendingTriangle | SymmetricalTriangle => {
                PatternFamily::Structural
            }
            ThreeBuddhaTop | ThreeRiverBottom | KagiBreakout | KagiBreakdown
            | KagiFalseBreakout => PatternFamily::Kagi,
            RangeBreakout | RangeBreakdown | RangeFalseBreakout => PatternFamily::RangeBar,
        }
    }

    /// Fewest bars (Kagi lines for the Kagi family) a scan needs.
    pub fn min_bars(&self) -> usize {
        use PatternKind::*;
        match self {
            HeadAndShoulders | InverseHeadAndShoulders => 40,
            DoubleTop | DoubleBottom => 30,
            AscendingTriangle | DescendingTriangle | SymmetricalTriangle => 30,
            _ => 10,
        }
    }

    /// How long after its end time a match stays active.
    pub fn default_validity_ms(&self) -> i64 {
        match self.family() {
            PatternFamily::Candlestick => 4 * HOUR_MS,
            PatternFamily::RangeBar => 12 * HOUR_MS,
            PatternFamily::Kagi => 24 * HOUR_MS,
            PatternFamily::Structural => match self {
                PatternKind::AscendingTriangle
                | PatternKind::DescendingTriangle
                | PatternKind::SymmetricalTriangle => 48 * HOUR_MS,
                _ => 72 * HOUR_MS,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        use PatternKind::*;
        match self {
            Doji => "doji",
            Hammer => "hammer",
            ShootingStar => "shooting_star",
            BullishEngulfing => "bullish_engulfing",
            BearishEngulfing => "bearish_engulfing",
            BullishHarami => "bullish_harami",
            BearishHarami => "bearish_harami",
            MorningStar => "morning_star",
            EveningStar => "evening_star",
            ThreeWhiteSoldiers => "three_white_soldiers",
            ThreeBlackCrows => "three_black_crows",
            HeadAndShoulders => "head_and_shoulders",
            InverseHeadAndShoulders => "inverse_head_and_shoulders",
            DoubleTop => "double_top",
            DoubleBottom => "double_bottom",
            AscendingTriangle => "ascending_triangle",
            DescendingTriangle => "descending_triangle",
            SymmetricalTriangle => "symmetrical_triangle",
            ThreeBuddhaTop => "three_buddha_top",
            ThreeRiverBottom => "three_river_bottom",
            KagiBreakout => "kagi_breakout",
            KagiBreakdown => "kagi_breakdown",
            KagiFalseBreakout => "kagi_false_breakout",
            RangeBreakout => "range_breakout",
            RangeBreakdown => "range_breakdown",
            RangeFalseBreakout => "range_false_breakout",
        }
    }
}

impl fmt::Display for PatternKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for PatternKind {
    type Err = ChartError;

    fn from_str(s: &str) -> Result<Self> {
        let key: String = s
            .trim()
            .chars()
            .map(|c| if c == '-' || c == ' ' { '_' } else { c })
            .flat_map(char::to_lowercase)
            .collect();
        Self::ALL
            .iter()
            .copied()
            .find(|k| k.name() == key)
            .ok_or_else(|| ChartError::UnsupportedPattern(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Matches
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternMatch {
    pub kind: PatternKind,
    pub symbol: String,
    pub bullish: bool,
    pub confidence: f64,
    pub start_time: i64,
    pub end_time: i64,
    /// Named key prices (shoulders, neckline, breakout level, ...).
    pub price_levels: BTreeMap<String, f64>,
    pub target_price: Option<f64>,
    pub validity_window_ms: i64,
}

impl PatternMatch {
    pub fn new(kind: PatternKind, symbol: &str, bullish: bool, confidence: f64, start_time: i64, end_time: i64) -> Self {
        Self {
            kind,
            symbol: symbol.to_string(),
            bullish,
            confidence: clamp_confidence(confidence),
            start_time,
            end_time,
            price_levels: BTreeMap::new(),
            target_price: None,
            validity_window_ms: kind.default_validity_ms(),
        }
    }

    pub fn with_level(mut self, name: &str, price: f64) -> Self {
        self.price_levels.insert(name.to_string(), price);
        self
    }

    pub fn with_target(mut self, target: f64) -> Self {
        self.target_price = target.is_finite().then_some(target);
        self
    }

    /// Active until `validity_window_ms` after its end time.
    pub fn is_active_at(&self, now: i64) -> bool {
        now <= self.end_time.saturating_add(self.validity_window_ms)
    }

    /// Time ranges intersect.
    pub fn overlaps(&self, other: &PatternMatch) -> bool {
        self.start_time <= other.end_time && other.start_time <= self.end_time
    }

    /// Identity of a match for deduplication across rescans.
    pub fn key(&self) -> (PatternKind, i64, i64) {
        (self.kind, self.start_time, self.end_time)
    }
}

/// Clamp to [0, 1]; a non-finite score counts as zero.
pub fn clamp_confidence(confidence: f64) -> f64 {
    if confidence.is_finite() {
        confidence.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Keep only the highest-confidence match among overlapping candidates of
/// the same (symbol, kind).  Output is ordered by end time, then kind.
pub fn select_best(mut matches: Vec<PatternMatch>) -> Vec<PatternMatch> {
    matches.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then(b.end_time.cmp(&a.end_time))
            .then(a.kind.cmp(&b.kind))
    });

    let mut kept: Vec<PatternMatch> = Vec::with_capacity(matches.len());
    for candidate in matches {
        let suppressed = kept.iter().any(|k| {
            k.kind == candidate.kind && k.symbol == candidate.symbol && k.overlaps(&candidate)
        });
        if !suppressed {
            kept.push(candidate);
        }
    }

    kept.sort_by(|a, b| a.end_time.cmp(&b.end_time).then(a.kind.cmp(&b.kind)));
    kept
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

fn default_doji_body_ratio() -> f64 {
    0.1
}

fn default_shadow_body_ratio() -> f64 {
    2.0
}

fn default_pivot_lookback() -> usize {
    3
}

fn default_shoulder_tolerance() -> f64 {
    0.03
}

fn default_double_tolerance() -> f64 {
    0.02
}

fn default_slope_tolerance() -> f64 {
    0.0005
}

fn default_volume_lookback() -> usize {
    10
}

fn default_volume_boost_ratio() -> f64 {
    1.5
}

fn default_trend_lookback() -> usize {
    5
}

fn default_breakout_lookback() -> usize {
    10
}

fn default_cluster_factor() -> f64 {
    1.5
}

fn default_scan_window() -> usize {
    200
}

fn default_min_confidence() -> f64 {
    0.5
}

/// Thresholds shared by the built-in scanners.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatternConfig {
    /// Doji when body / range is below this.
    #[serde(default = "default_doji_body_ratio")]
    pub doji_body_ratio: f64,
    /// Hammer / shooting star wick-to-body ratio.
    #[serde(default = "default_shadow_body_ratio")]
    pub shadow_body_ratio: f64,
    /// Bars on each side a pivot must dominate.
    #[serde(default = "default_pivot_lookback")]
    pub pivot_lookback: usize,
    /// Max relative difference between head-and-shoulders shoulders.
    #[serde(default = "default_shoulder_tolerance")]
    pub shoulder_tolerance: f64,
    /// Max relative difference between double-top peaks.
    #[serde(default = "default_double_tolerance")]
    pub double_tolerance: f64,
    /// Max |slope| per bar, relative to price, for a "flat" trendline.
    #[serde(default = "default_slope_tolerance")]
    pub slope_tolerance: f64,
    #[serde(default = "default_volume_lookback")]
    pub volume_lookback: usize,
    /// Volume at least this multiple of the trailing mean corroborates.
    #[serde(default = "default_volume_boost_ratio")]
    pub volume_boost_ratio: f64,
    #[serde(default = "default_trend_lookback")]
    pub trend_lookback: usize,
    #[serde(default = "default_breakout_lookback")]
    pub breakout_lookback: usize,
    /// Price buckets with volume above this multiple of the mean are clusters.
    #[serde(default = "default_cluster_factor")]
    pub cluster_factor: f64,
    /// Only the most recent `scan_window` bars are scanned.
    #[serde(default = "default_scan_window")]
    pub scan_window: usize,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            doji_body_ratio: default_doji_body_ratio(),
            shadow_body_ratio: default_shadow_body_ratio(),
            pivot_lookback: default_pivot_lookback(),
            shoulder_tolerance: default_shoulder_tolerance(),
            double_tolerance: default_double_tolerance(),
            slope_tolerance: default_slope_tolerance(),
            volume_lookback: default_volume_lookback(),
            volume_boost_ratio: default_volume_boost_ratio(),
            trend_lookback: default_trend_lookback(),
            breakout_lookback: default_breakout_lookback(),
            cluster_factor: default_cluster_factor(),
            scan_window: default_scan_window(),
            min_confidence: default_min_confidence(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// Everything a scanner may look at.  Borrowed from the session for the
/// duration of one scan.
#[derive(Debug, Clone, Copy)]
pub struct PatternContext<'a> {
    pub symbol: &'a str,
    pub chart_type: ChartType,
    pub series: &'a BarSeries,
    /// Shoulder / waist levels maintained by the Kagi former.
    pub kagi_levels: Option<&'a KagiLevels>,
}

impl<'a> PatternContext<'a> {
    pub fn bars(&self) -> &'a [Bar] {
        self.series.bars()
    }

    /// The trailing slice the scanners work on.
    pub fn window(&self, scan_window: usize) -> &'a [Bar] {
        let bars = self.series.bars();
        &bars[bars.len().saturating_sub(scan_window)..]
    }
}

/// A pluggable detector behind the `PatternMatch` contract.
pub trait PatternSource: Send + Sync {
    fn name(&self) -> &'static str;

    /// Kinds this source can produce.
    fn kinds(&self) -> &'static [PatternKind];

    fn detect(&self, ctx: &PatternContext<'_>) -> Vec<PatternMatch>;
}

pub struct PatternDetector {
    config: PatternConfig,
    sources: Vec<Box<dyn PatternSource>>,
}

impl fmt::Debug for PatternDetector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.sources.iter().map(|s| s.name()).collect();
        f.debug_struct("PatternDetector")
            .field("config", &self.config)
            .field("sources", &names)
            .finish()
    }
}

impl PatternDetector {
    /// Detector with the built-in sources appropriate for `chart_type`.
    pub fn for_chart(chart_type: ChartType, config: PatternConfig) -> Self {
        let mut sources: Vec<Box<dyn PatternSource>> = Vec::new();
        match chart_type {
            ChartType::Candlestick => {
                sources.push(Box::new(candlestick::CandlestickSource::new(config.clone())));
                sources.push(Box::new(structural::StructuralSource::new(config.clone())));
            }
            ChartType::Kagi => {
                sources.push(Box::new(structural::StructuralSource::new(config.clone())));
                sources.push(Box::new(kagi::KagiSource::new(config.clone())));
            }
            ChartType::RangeBar => {
                sources.push(Box::new(candlestick::CandlestickSource::new(config.clone())));
                sources.push(Box::new(structural::StructuralSource::new(config.clone())));
                sources.push(Box::new(range_bar::RangeBarSource::new(config.clone())));
            }
        }
        Self { config, sources }
    }

    /// Plug in an additional source (e.g. an external detector).
    pub fn with_source(mut self, source: Box<dyn PatternSource>) -> Self {
        self.sources.push(source);
        self
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    /// Kinds any registered source can produce.
    pub fn supported_kinds(&self) -> Vec<PatternKind> {
        let mut kinds: Vec<PatternKind> = self
            .sources
            .iter()
            .flat_map(|s| s.kinds().iter().copied())
            .collect();
        kinds.sort();
        kinds.dedup();
        kinds
    }

    /// Run every source, optionally restricted to `kinds`.
    pub fn detect(&self, ctx: &PatternContext<'_>, kinds: Option<&[PatternKind]>) -> Vec<PatternMatch> {
        let mut found = Vec::new();
        for source in &self.sources {
            if let Some(wanted) = kinds {
                if !source.kinds().iter().any(|k| wanted.contains(k)) {
                    continue;
                }
            }
            let matches = source.detect(ctx);
            debug!(
                source = source.name(),
                symbol = ctx.symbol,
                bars = ctx.series.len(),
                matches = matches.len(),
                "pattern scan"
            );
            found.extend(matches);
        }

        let min_confidence = self.config.min_confidence;
        let filtered: Vec<PatternMatch> = found
            .into_iter()
            .filter(|m| kinds.map_or(true, |wanted| wanted.contains(&m.kind)))
            .map(|mut m| {
                m.confidence = clamp_confidence(m.confidence);
                m
            })
            .filter(|m| m.confidence >= min_confidence)
            .collect();

        select_best(filtered)
    }
}

// ---------------------------------------------------------------------------
// Helpers shared by the scanners
// ---------------------------------------------------------------------------

/// Mean volume of the `lookback` bars before `index`.
pub(crate) fn trailing_mean_volume(bars: &[Bar], index: usize, lookback: usize) -> Option<f64> {
    let start = index.saturating_sub(lookback);
    let window = &bars[start..index];
    if window.is_empty() {
        return None;
    }
    Some(window.iter().map(|b| b.volume).sum::<f64>() / window.len() as f64)
}

/// `true` when bar `index` traded at least `ratio` times the trailing mean.
pub(crate) fn volume_confirms(bars: &[Bar], index: usize, lookback: usize, ratio: f64) -> bool {
    match trailing_mean_volume(bars, index, lookback) {
        Some(mean) if mean > 0.0 => bars[index].volume >= mean * ratio,
        _ => false,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn m(kind: PatternKind, confidence: f64, start: i64, end: i64) -> PatternMatch {
        PatternMatch::new(kind, "BTCUSDT", true, confidence, start, end)
    }

    #[test]
    fn kind_parsing() {
        assert_eq!("head_and_shoulders".parse::<PatternKind>().unwrap(), PatternKind::HeadAndShoulders);
        assert_eq!("Double Top".parse::<PatternKind>().unwrap(), PatternKind::DoubleTop);
        assert_eq!("three-buddha-top".parse::<PatternKind>().unwrap(), PatternKind::ThreeBuddhaTop);
        let err = "elliott_wave".parse::<PatternKind>().unwrap_err();
        assert_eq!(err, ChartError::UnsupportedPattern("elliott_wave".into()));
    }

    #[test]
    fn every_kind_round_trips_through_its_name() {
        for kind in PatternKind::ALL {
            assert_eq!(kind.name().parse::<PatternKind>().unwrap(), kind);
            let window = kind.default_validity_ms();
            assert!((4 * HOUR_MS..=72 * HOUR_MS).contains(&window));
        }
    }

    #[test]
    fn confidence_is_clamped_on_construction() {
        assert_eq!(m(PatternKind::Doji, 1.7, 0, 1).confidence, 1.0);
        assert_eq!(m(PatternKind::Doji, -0.2, 0, 1).confidence, 0.0);
        assert_eq!(m(PatternKind::Doji, f64::NAN, 0, 1).confidence, 0.0);
    }

    #[test]
    fn select_best_keeps_highest_of_overlapping_same_kind() {
        let best = select_best(vec![
            m(PatternKind::DoubleTop, 0.6, 0, 10),
            m(PatternKind::DoubleTop, 0.8, 5, 15),
            m(PatternKind::DoubleTop, 0.7, 20, 30),
            m(PatternKind::DoubleBottom, 0.55, 0, 10),
        ]);
        assert_eq!(best.len(), 3);
        assert!(best.iter().any(|p| p.kind == PatternKind::DoubleTop && p.confidence == 0.8));
        assert!(best.iter().any(|p| p.kind == PatternKind::DoubleTop && p.confidence == 0.7));
        assert!(!best.iter().any(|p| p.confidence == 0.6));
        assert!(best.windows(2).all(|w| w[0].end_time <= w[1].end_time));
    }

    #[test]
    fn select_best_separates_symbols() {
        let mut other = m(PatternKind::Doji, 0.5, 0, 10);
        other.symbol = "ETHUSDT".into();
        let best = select_best(vec![m(PatternKind::Doji, 0.9, 0, 10), other]);
        assert_eq!(best.len(), 2);
    }

    #[test]
    fn activity_window() {
        let p = m(PatternKind::Doji, 0.5, 0, 1_000);
        assert!(p.is_active_at(1_000 + 4 * HOUR_MS));
        assert!(!p.is_active_at(1_001 + 4 * HOUR_MS));
    }

    #[test]
    fn detector_sources_follow_chart_type() {
        let candle = PatternDetector::for_chart(ChartType::Candlestick, PatternConfig::default());
        let kinds = candle.supported_kinds();
        assert!(kinds.contains(&PatternKind::Doji));
        assert!(kinds.contains(&PatternKind::HeadAndShoulders));
        assert!(!kinds.contains(&PatternKind::KagiBreakout));

        let kagi = PatternDetector::for_chart(ChartType::Kagi, PatternConfig::default());
        let kinds = kagi.supported_kinds();
        assert!(kinds.contains(&PatternKind::ThreeBuddhaTop));
        assert!(!kinds.contains(&PatternKind::Doji));

        let range = PatternDetector::for_chart(ChartType::RangeBar, PatternConfig::default());
        let kinds = range.supported_kinds();
        assert!(kinds.contains(&PatternKind::RangeBreakout));
        assert!(kinds.contains(&PatternKind::Hammer));
    }

    #[test]
    fn empty_series_yields_nothing() {
        let series = BarSeries::new();
        for chart_type in [ChartType::Candlestick, ChartType::Kagi, ChartType::RangeBar] {
            let detector = PatternDetector::for_chart(chart_type, PatternConfig::default());
            let ctx = PatternContext {
                symbol: "X",
                chart_type,
                series: &series,
                kagi_levels: None,
            };
            assert!(detector.detect(&ctx, None).is_empty());
        }
    }

    struct FixedSource;

    impl PatternSource for FixedSource {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn kinds(&self) -> &'static [PatternKind] {
            &[PatternKind::DoubleTop]
        }
        fn detect(&self, ctx: &PatternContext<'_>) -> Vec<PatternMatch> {
            vec![PatternMatch::new(PatternKind::DoubleTop, ctx.symbol, false, 0.9, 0, 1)]
        }
    }

    #[test]
    fn external_source_plugs_in_and_kind_filter_applies() {
        let series = BarSeries::new();
        let detector = PatternDetector::for_chart(ChartType::Candlestick, PatternConfig::default())
            .with_source(Box::new(FixedSource));
        let ctx = PatternContext {
            symbol: "X",
            chart_type: ChartType::Candlestick,
            series: &series,
            kagi_levels: None,
        };
        assert_eq!(detector.detect(&ctx, None).len(), 1);
        assert!(detector.detect(&ctx, Some(&[PatternKind::Doji])).is_empty());
        assert_eq!(detector.detect(&ctx, Some(&[PatternKind::DoubleTop])).len(), 1);
    }
}
