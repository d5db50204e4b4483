// =============================================================================
// Structural (chart) patterns
// =============================================================================
//
// Pivot-based formations:
//
//   1. Pivots: bar i is a peak when its high dominates `pivot_lookback` bars
//      on each side (strictly on the left, so a flat top yields one pivot);
//      valleys likewise on the low.
//   2. Head and shoulders: three consecutive peaks, the middle one highest,
//      outer peaks within `shoulder_tolerance` of each other.  The neckline
//      is the mean of the lowest valley on each side of the head.
//   3. Double top / bottom: two consecutive peaks (valleys) within
//      `double_tolerance`, separated by a valley (peak) at least that deep.
//   4. Triangles: overlapping consecutive peak pairs and valley pairs; a
//      trendline is flat when its per-bar slope, relative to price, is under
//      `slope_tolerance`.
//
// Confidence grows as the tolerance is met more tightly.
// =============================================================================

use crate::bars::Bar;
use crate::patterns::{PatternConfig, PatternContext, PatternKind, PatternMatch, PatternSource};

const KINDS: &[PatternKind] = &[
    PatternKind::HeadAndShoulders,
    PatternKind::InverseHeadAndShoulders,
    PatternKind::DoubleTop,
    PatternKind::DoubleBottom,
    PatternKind::AscendingTriangle,
    PatternKind::DescendingTriangle,
    PatternKind::SymmetricalTriangle,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PivotKind {
    Peak,
    Valley,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pivot {
    pub index: usize,
    pub price: f64,
    pub kind: PivotKind,
}

/// Local extrema with a symmetric `lookback` window.
pub fn detect_pivots(bars: &[Bar], lookback: usize) -> Vec<Pivot> {
    let mut pivots = Vec::new();
    if lookback == 0 || bars.len() < 2 * lookback + 1 {
        return pivots;
    }

    for i in lookback..bars.len() - lookback {
        let high = bars[i].high;
        let low = bars[i].low;
        let left = &bars[i - lookback..i];
        let right = &bars[i + 1..=i + lookback];

        if left.iter().all(|b| b.high < high) && right.iter().all(|b| b.high <= high) {
            pivots.push(Pivot { index: i, price: high, kind: PivotKind::Peak });
        }
        if left.iter().all(|b| b.low > low) && right.iter().all(|b| b.low >= low) {
            pivots.push(Pivot { index: i, price: low, kind: PivotKind::Valley });
        }
    }
    pivots
}

/// Relative difference of two prices against their mean.
fn relative_diff(a: f64, b: f64) -> Option<f64> {
    let mean = (a + b) / 2.0;
    if mean == 0.0 {
        return None;
    }
    Some((a - b).abs() / mean.abs())
}

/// 1.0 at a perfect match falling linearly to 0.0 at the tolerance.
fn tightness(diff: f64, tolerance: f64) -> f64 {
    if tolerance <= 0.0 {
        return 0.0;
    }
    (1.0 - diff / tolerance).clamp(0.0, 1.0)
}

fn lowest_between(valleys: &[&Pivot], from: usize, to: usize) -> Option<Pivot> {
    valleys
        .iter()
        .filter(|v| v.index > from && v.index < to)
        .min_by(|a, b| a.price.total_cmp(&b.price))
        .map(|v| **v)
}

fn highest_between(peaks: &[&Pivot], from: usize, to: usize) -> Option<Pivot> {
    peaks
        .iter()
        .filter(|p| p.index > from && p.index < to)
        .max_by(|a, b| a.price.total_cmp(&b.price))
        .map(|p| **p)
}

pub struct StructuralSource {
    config: PatternConfig,
}

impl StructuralSource {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    fn span(&self, ctx: &PatternContext<'_>, kind: PatternKind, bullish: bool, confidence: f64, bars: &[Bar], from: usize, to: usize) -> PatternMatch {
        PatternMatch::new(kind, ctx.symbol, bullish, confidence, bars[from].start_time, bars[to].end_time)
    }

    fn head_and_shoulders(&self, ctx: &PatternContext<'_>, bars: &[Bar], peaks: &[&Pivot], valleys: &[&Pivot]) -> Vec<PatternMatch> {
        let mut out = Vec::new();
        let tol = self.config.shoulder_tolerance;

        // ---- Head and shoulders (top) ---------------------------------------
        for w in peaks.windows(3) {
            let (ls, head, rs) = (w[0], w[1], w[2]);
            if head.price <= ls.price || head.price <= rs.price {
                continue;
            }
            let Some(diff) = relative_diff(ls.price, rs.price) else { continue };
            if diff > tol {
                continue;
            }
            let (Some(left_neck), Some(right_neck)) = (
                lowest_between(valleys, ls.index, head.index),
                lowest_between(valleys, head.index, rs.index),
            ) else {
                continue;
            };
            let neckline = (left_neck.price + right_neck.price) / 2.0;
            if neckline >= ls.price.min(rs.price) {
                continue;
            }

            let confidence = 0.6 + 0.3 * tightness(diff, tol);
            out.push(
                self.span(ctx, PatternKind::HeadAndShoulders, false, confidence, bars, ls.index, rs.index)
                    .with_level("left_shoulder", ls.price)
                    .with_level("head", head.price)
                    .with_level("right_shoulder", rs.price)
                    .with_level("neckline", neckline)
                    .with_target(neckline - (head.price - neckline)),
            );
        }

        // ---- Inverse head and shoulders -------------------------------------
        for w in valleys.windows(3) {
            let (ls, head, rs) = (w[0], w[1], w[2]);
            if head.price >= ls.price || head.price >= rs.price {
                continue;
            }
            let Some(diff) = relative_diff(ls.price, rs.price) else { continue };
            if diff > tol {
                continue;
            }
            let (Some(left_neck), Some(right_neck)) = (
                highest_between(peaks, ls.index, head.index),
                highest_between(peaks, head.index, rs.index),
            ) else {
                continue;
            };
            let neckline = (left_neck.price + right_neck.price) / 2.0;
            if neckline <= ls.price.max(rs.price) {
                continue;
            }

            let confidence = 0.6 + 0.3 * tightness(diff, tol);
            out.push(
                self.span(ctx, PatternKind::InverseHeadAndShoulders, true, confidence, bars, ls.index, rs.index)
                    .with_level("left_shoulder", ls.price)
                    .with_level("head", head.price)
                    .with_level("right_shoulder", rs.price)
                    .with_level("neckline", neckline)
                    .with_target(neckline + (neckline - head.price)),
            );
        }

        out
    }

    fn doubles(&self, ctx: &PatternContext<'_>, bars: &[Bar], peaks: &[&Pivot], valleys: &[&Pivot]) -> Vec<PatternMatch> {
        let mut out = Vec::new();
        let tol = self.config.double_tolerance;

        for w in peaks.windows(2) {
            let (first, second) = (w[0], w[1]);
            let Some(diff) = relative_diff(first.price, second.price) else { continue };
            if diff > tol {
                continue;
            }
            let Some(valley) = lowest_between(valleys, first.index, second.index) else { continue };
            let top = (first.price + second.price) / 2.0;
            if top == 0.0 || (top - valley.price) / top.abs() < tol {
                continue;
            }
            let confidence = 0.55 + 0.35 * tightness(diff, tol);
            out.push(
                self.span(ctx, PatternKind::DoubleTop, false, confidence, bars, first.index, second.index)
                    .with_level("first_peak", first.price)
                    .with_level("second_peak", second.price)
                    .with_level("neckline", valley.price)
                    .with_target(valley.price - (top - valley.price)),
            );
        }

        for w in valleys.windows(2) {
            let (first, second) = (w[0], w[1]);
            let Some(diff) = relative_diff(first.price, second.price) else { continue };
            if diff > tol {
                continue;
            }
            let Some(peak) = highest_between(peaks, first.index, second.index) else { continue };
            let bottom = (first.price + second.price) / 2.0;
            if bottom == 0.0 || (peak.price - bottom) / bottom.abs() < tol {
                continue;
            }
            let confidence = 0.55 + 0.35 * tightness(diff, tol);
            out.push(
                self.span(ctx, PatternKind::DoubleBottom, true, confidence, bars, first.index, second.index)
                    .with_level("first_trough", first.price)
                    .with_level("second_trough", second.price)
                    .with_level("neckline", peak.price)
                    .with_target(peak.price + (peak.price - bottom)),
            );
        }

        out
    }

    fn triangles(&self, ctx: &PatternContext<'_>, bars: &[Bar], peaks: &[&Pivot], valleys: &[&Pivot]) -> Vec<PatternMatch> {
        let mut out = Vec::new();
        let tol = self.config.slope_tolerance;

        let slope = |a: &Pivot, b: &Pivot| -> Option<f64> {
            let dx = b.index as f64 - a.index as f64;
            let mean = (a.price + b.price) / 2.0;
            if dx <= 0.0 || mean == 0.0 {
                return None;
            }
            Some((b.price - a.price) / dx / mean.abs())
        };

        for pw in peaks.windows(2) {
            for vw in valleys.windows(2) {
                let (p1, p2, v1, v2) = (pw[0], pw[1], vw[0], vw[1]);

                // The two trendlines must cover a common stretch of bars.
                let start = p1.index.max(v1.index);
                let end = p2.index.min(v2.index);
                if end <= start || p2.price <= v2.price {
                    continue;
                }
                let (Some(top), Some(bottom)) = (slope(p1, p2), slope(v1, v2)) else { continue };

                let first = p1.index.min(v1.index);
                let last = p2.index.max(v2.index);
                let height = p1.price - v1.price;

                if top.abs() < tol && bottom > tol {
                    let confidence = 0.6 + 0.2 * tightness(top.abs(), tol);
                    let resistance = (p1.price + p2.price) / 2.0;
                    out.push(
                        self.span(ctx, PatternKind::AscendingTriangle, true, confidence, bars, first, last)
                            .with_level("resistance", resistance)
                            .with_level("support", v2.price)
                            .with_target(resistance + height),
                    );
                } else if bottom.abs() < tol && top < -tol {
                    let confidence = 0.6 + 0.2 * tightness(bottom.abs(), tol);
                    let support = (v1.price + v2.price) / 2.0;
                    out.push(
                        self.span(ctx, PatternKind::DescendingTriangle, false, confidence, bars, first, last)
                            .with_level("resistance", p2.price)
                            .with_level("support", support)
                            .with_target(support - height),
                    );
                } else if top < -tol && bottom > tol {
                    // No flat side: bias follows the move into the formation,
                    // confidence how closely the two slopes mirror each other.
                    let lead_in = first.saturating_sub(self.config.trend_lookback);
                    let bullish = bars[first].close >= bars[lead_in].close;
                    let mirror = tightness((top.abs() - bottom).abs(), top.abs().max(bottom));
                    let confidence = 0.6 + 0.2 * mirror;
                    out.push(
                        self.span(ctx, PatternKind::SymmetricalTriangle, bullish, confidence, bars, first, last)
                            .with_level("resistance", p2.price)
                            .with_level("support", v2.price),
                    );
                }
            }
        }

        out
    }
}

impl PatternSource for StructuralSource {
    fn name(&self) -> &'static str {
        "structural"
    }

    fn kinds(&self) -> &'static [PatternKind] {
        KINDS
    }

    fn detect(&self, ctx: &PatternContext<'_>) -> Vec<PatternMatch> {
        let bars = ctx.window(self.config.scan_window);
        let pivots = detect_pivots(bars, self.config.pivot_lookback);
        let peaks: Vec<&Pivot> = pivots.iter().filter(|p| p.kind == PivotKind::Peak).collect();
        let valleys: Vec<&Pivot> = pivots.iter().filter(|p| p.kind == PivotKind::Valley).collect();

        let mut matches = Vec::new();
        if bars.len() >= PatternKind::HeadAndShoulders.min_bars() {
            matches.extend(self.head_and_shoulders(ctx, bars, &peaks, &valleys));
        }
        if bars.len() >= PatternKind::DoubleTop.min_bars() {
            matches.extend(self.doubles(ctx, bars, &peaks, &valleys));
        }
        if bars.len() >= PatternKind::AscendingTriangle.min_bars() {
            matches.extend(self.triangles(ctx, bars, &peaks, &valleys));
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
    use crate::patterns::test_support::{bars_from_closes, series_of};
    use crate::types::ChartType;

    /// Piecewise-linear closes: start at `start`, then move to each target in
    /// `legs` over `steps` bars.
    fn zigzag(start: f64, legs: &[f64], steps: usize) -> Vec<f64> {
        let mut closes = vec![start];
        let mut from = start;
        for &to in legs {
            for s in 1..=steps {
                closes.push(from + (to - from) * s as f64 / steps as f64);
            }
            from = to;
        }
        closes
    }

    fn detect(closes: &[f64]) -> Vec<PatternMatch> {
        let bars = bars_from_closes(closes);
        let series = series_of(&bars);
        let ctx = PatternContext {
            symbol: "ETHUSDT",
            chart_type: ChartType::Candlestick,
            series: &series,
            kagi_levels: None,
        };
        StructuralSource::new(PatternConfig::default()).detect(&ctx)
    }

    #[test]
    fn pivots_on_a_single_peak() {
        let bars = bars_from_closes(&zigzag(100.0, &[110.0, 100.0], 6));
        let pivots = detect_pivots(&bars, 3);
        let peaks: Vec<&Pivot> = pivots.iter().filter(|p| p.kind == PivotKind::Peak).collect();
        assert_eq!(peaks.len(), 1);
        assert_eq!(peaks[0].index, 6);
        assert!((peaks[0].price - 110.2).abs() < 1e-9);
    }

    #[test]
    fn head_and_shoulders_with_target() {
        let closes = zigzag(100.0, &[110.0, 104.0, 116.0, 104.5, 110.3, 100.0], 8);
        let found = detect(&closes);
        let hs = found
            .iter()
            .find(|m| m.kind == PatternKind::HeadAndShoulders)
            .expect("head and shoulders");
        assert!(!hs.bullish);
        let neckline = hs.price_levels["neckline"];
        let head = hs.price_levels["head"];
        assert!((neckline - 104.05).abs() < 1e-9);
        assert!((hs.target_price.unwrap() - (neckline - (head - neckline))).abs() < 1e-9);
        assert!(hs.confidence > 0.8 && hs.confidence <= 0.9);
    }

    #[test]
    fn inverse_head_and_shoulders() {
        let closes = zigzag(110.0, &[100.0, 106.0, 94.0, 105.5, 99.8, 110.0], 8);
        let found = detect(&closes);
        let ihs = found
            .iter()
            .find(|m| m.kind == PatternKind::InverseHeadAndShoulders)
            .expect("inverse head and shoulders");
        assert!(ihs.bullish);
        assert!(ihs.target_price.unwrap() > ihs.price_levels["neckline"]);
    }

    #[test]
    fn double_top() {
        let closes = zigzag(100.0, &[110.0, 104.0, 110.5, 100.0], 8);
        let found = detect(&closes);
        let dt = found.iter().find(|m| m.kind == PatternKind::DoubleTop).expect("double top");
        assert!(!dt.bullish);
        assert!(dt.confidence > 0.75 && dt.confidence < 0.9);
        assert!(!found.iter().any(|m| m.kind == PatternKind::HeadAndShoulders));
    }

    #[test]
    fn peaks_too_far_apart_are_not_a_double_top() {
        let closes = zigzag(100.0, &[110.0, 104.0, 114.0, 100.0], 8);
        assert!(!detect(&closes).iter().any(|m| m.kind == PatternKind::DoubleTop));
    }

    #[test]
    fn ascending_triangle() {
        let closes = zigzag(100.0, &[110.0, 102.0, 110.0, 105.0, 110.0, 108.0, 110.0], 6);
        let found = detect(&closes);
        let tri = found
            .iter()
            .find(|m| m.kind == PatternKind::AscendingTriangle)
            .expect("ascending triangle");
        assert!(tri.bullish);
        assert!(tri.target_price.unwrap() > tri.price_levels["resistance"]);
    }

    fn best_symmetrical(closes: &[f64]) -> f64 {
        detect(closes)
            .iter()
            .filter(|m| m.kind == PatternKind::SymmetricalTriangle)
            .map(|m| m.confidence)
            .fold(f64::NAN, f64::max)
    }

    #[test]
    fn symmetrical_triangle_scores_by_mirrored_slopes() {
        let mirrored = best_symmetrical(&zigzag(100.0, &[110.0, 90.0, 108.0, 92.0, 106.0, 94.0, 104.0], 6));
        let lopsided = best_symmetrical(&zigzag(100.0, &[110.0, 90.0, 108.0, 96.0, 106.0, 102.0, 104.0], 6));
        assert!(mirrored > 0.7 && mirrored <= 0.8, "mirrored {mirrored}");
        assert!(lopsided >= 0.6 && lopsided < 0.7, "lopsided {lopsided}");
    }

    #[test]
    fn short_series_is_empty() {
        let closes = zigzag(100.0, &[110.0, 104.0, 110.5], 6);
        assert!(detect(&closes).is_empty());
    }
}
