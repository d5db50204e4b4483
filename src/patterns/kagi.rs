// =============================================================================
// Kagi patterns
// =============================================================================
//
// Read off finalized Kagi lines and their shoulders (tops of up lines) and
// waists (bottoms of down lines):
//
//   Three Buddha top     three consecutive shoulders, the middle one highest,
//                        outer pair within `shoulder_tolerance`
//   Three river bottom   the same on waists, middle one lowest
//   Breakout             an up line ends above every one of the previous
//                        `breakout_lookback` shoulders
//   Breakdown            a down line ends below the previous waists
//   False breakout       the line right after a breakout (breakdown) returns
//                        through the broken level
// =============================================================================

use crate::bars::{Bar, KagiLevel, KagiLevels, KagiLine};
use crate::patterns::{
    volume_confirms, PatternConfig, PatternContext, PatternKind, PatternMatch, PatternSource,
    MAX_CONFIDENCE_BOOST,
};
use crate::types::Direction;

const KINDS: &[PatternKind] = &[
    PatternKind::ThreeBuddhaTop,
    PatternKind::ThreeRiverBottom,
    PatternKind::KagiBreakout,
    PatternKind::KagiBreakdown,
    PatternKind::KagiFalseBreakout,
];

const BREAKOUT_BASE: f64 = 0.6;
const YANG_BOOST: f64 = 0.15;
const VOLUME_BOOST: f64 = 0.15;

/// Shoulders and waists rebuilt from the lines when the former's levels are
/// not available.
fn levels_from_lines(lines: &[&KagiLine]) -> KagiLevels {
    let mut levels = KagiLevels::default();
    for (i, line) in lines.iter().enumerate() {
        let level = KagiLevel {
            price: line.end_price,
            time: line.end_time,
            line_index: i,
        };
        match line.direction {
            Direction::Up => levels.shoulders.push(level),
            Direction::Down => levels.waists.push(level),
        }
    }
    levels
}

fn relative_diff(a: f64, b: f64) -> Option<f64> {
    let mean = (a + b) / 2.0;
    (mean != 0.0).then(|| (a - b).abs() / mean.abs())
}

pub struct KagiSource {
    config: PatternConfig,
}

impl KagiSource {
    pub fn new(config: PatternConfig) -> Self {
        Self { config }
    }

    fn three_points(
        &self,
        ctx: &PatternContext<'_>,
        lines: &[&KagiLine],
        levels: &KagiLevels,
        first_line: usize,
    ) -> Vec<PatternMatch> {
        let mut out = Vec::new();
        let tol = self.config.shoulder_tolerance;
        let in_window = |l: &&KagiLevel| l.line_index >= first_line && l.line_index < lines.len();

        let shoulders: Vec<&KagiLevel> = levels.shoulders.iter().filter(in_window).collect();
        let waists: Vec<&KagiLevel> = levels.waists.iter().filter(in_window).collect();

        for w in shoulders.windows(3) {
            let (left, mid, right) = (w[0], w[1], w[2]);
            if mid.price <= left.price || mid.price <= right.price {
                continue;
            }
            let Some(diff) = relative_diff(left.price, right.price) else { continue };
            if diff > tol {
                continue;
            }
            let necks: Vec<f64> = waists
                .iter()
                .filter(|v| v.line_index > left.line_index && v.line_index < right.line_index)
                .map(|v| v.price)
                .collect();
            if necks.is_empty() {
                continue;
            }
            let neckline = necks.iter().sum::<f64>() / necks.len() as f64;
            let confidence = 0.6 + 0.3 * (1.0 - diff / tol).clamp(0.0, 1.0);
            out.push(
                PatternMatch::new(
                    PatternKind::ThreeBuddhaTop,
                    ctx.symbol,
                    false,
                    confidence,
                    lines[left.line_index].start_time,
                    lines[right.line_index].end_time,
                )
                .with_level("left_shoulder", left.price)
                .with_level("head", mid.price)
                .with_level("right_shoulder", right.price)
                .with_level("neckline", neckline)
                .with_target(neckline - (mid.price - neckline)),
            );
        }

        for w in waists.windows(3) {
            let (left, mid, right) = (w[0], w[1], w[2]);
            if mid.price >= left.price || mid.price >= right.price {
                continue;
            }
            let Some(diff) = relative_diff(left.price, right.price) else { continue };
            if diff > tol {
                continue;
            }
            let necks: Vec<f64> = shoulders
                .iter()
                .filter(|s| s.line_index > left.line_index && s.line_index < right.line_index)
                .map(|s| s.price)
                .collect();
            if necks.is_empty() {
                continue;
            }
            let neckline = necks.iter().sum::<f64>() / necks.len() as f64;
            let confidence = 0.6 + 0.3 * (1.0 - diff / tol).clamp(0.0, 1.0);
            out.push(
                PatternMatch::new(
                    PatternKind::ThreeRiverBottom,
                    ctx.symbol,
                    true,
                    confidence,
                    lines[left.line_index].start_time,
                    lines[right.line_index].end_time,
                )
                .with_level("left_trough", left.price)
                .with_level("bottom", mid.price)
                .with_level("right_trough", right.price)
                .with_level("neckline", neckline)
                .with_target(neckline + (neckline - mid.price)),
            );
        }

        out
    }

    /// Highest shoulder (`Up`) or lowest waist (`Down`) among the
    /// `breakout_lookback` levels formed before line `index`.
    fn reference_level(&self, levels: &[KagiLevel], index: usize, direction: Direction) -> Option<f64> {
        let prior: Vec<f64> = levels
            .iter()
            .filter(|l| l.line_index < index)
            .map(|l| l.price)
            .collect();
        let recent = &prior[prior.len().saturating_sub(self.config.breakout_lookback)..];
        match direction {
            Direction::Up => recent.iter().copied().reduce(f64::max),
            Direction::Down => recent.iter().copied().reduce(f64::min),
        }
    }

    fn breakouts(
        &self,
        ctx: &PatternContext<'_>,
        lines: &[&KagiLine],
        views: &[Bar],
        levels: &KagiLevels,
        first_line: usize,
    ) -> Vec<PatternMatch> {
        let mut out = Vec::new();

        for i in first_line.max(1)..lines.len() {
            let line = lines[i];
            let (kind, level, broke) = match line.direction {
                Direction::Up => {
                    let Some(level) = self.reference_level(&levels.shoulders, i, Direction::Up) else { continue };
                    (PatternKind::KagiBreakout, level, line.end_price > level)
                }
                Direction::Down => {
                    let Some(level) = self.reference_level(&levels.waists, i, Direction::Down) else { continue };
                    (PatternKind::KagiBreakdown, level, line.end_price < level)
                }
            };
            if !broke {
                continue;
            }
            let bullish = line.direction == Direction::Up;

            // A thick up line or thin down line agrees with the break.
            let mut boost = 0.0;
            if line.is_yang == bullish {
                boost += YANG_BOOST;
            }
            if volume_confirms(views, i, self.config.volume_lookback, self.config.volume_boost_ratio) {
                boost += VOLUME_BOOST;
            }
            let confidence = BREAKOUT_BASE + boost.min(MAX_CONFIDENCE_BOOST);

            out.push(
                PatternMatch::new(kind, ctx.symbol, bullish, confidence, line.start_time, line.end_time)
                    .with_level("level", level)
                    .with_level("close", line.end_price),
            );

            // The following line undoing the break.
            if let Some(next) = lines.get(i + 1) {
                let failed = if bullish { next.end_price < level } else { next.end_price > level };
                if failed {
                    let depth = (next.end_price - level).abs() / level.abs().max(f64::EPSILON);
                    let confidence = 0.55 + (depth * 10.0).min(MAX_CONFIDENCE_BOOST);
                    out.push(
                        PatternMatch::new(
                            PatternKind::KagiFalseBreakout,
                            ctx.symbol,
                            !bullish,
                            confidence,
                            line.start_time,
                            next.end_time,
                        )
                        .with_level("level", level)
                        .with_level("extreme", line.end_price)
                        .with_level("close", next.end_price),
                    );
                }
            }
        }

        out
    }
}

impl PatternSource for KagiSource {
    fn name(&self) -> &'static str {
        "kagi"
    }

    fn kinds(&self) -> &'static [PatternKind] {
        KINDS
    }

    fn detect(&self, ctx: &PatternContext<'_>) -> Vec<PatternMatch> {
        let lines = ctx.series.kagi_lines();
        if lines.len() < PatternKind::ThreeBuddhaTop.min_bars() {
            return Vec::new();
        }

        // Kagi series hold nothing but lines, so the OHLCV view lines up.
        let views = ctx.bars();
        if views.len() != lines.len() {
            return Vec::new();
        }

        let derived;
        let levels = match ctx.kagi_levels {
            Some(levels) => levels,
            None => {
                derived = levels_from_lines(&lines);
                &derived
            }
        };
        let first_line = lines.len().saturating_sub(self.config.scan_window);

        let mut matches = self.three_points(ctx, &lines, levels, first_line);
        matches.extend(self.breakouts(ctx, &lines, views, levels, first_line));
        matches
    }
}
