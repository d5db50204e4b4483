// =============================================================================
// Bar Series — append-only finalized bars plus one open bar
// =============================================================================
//
// What the bar engine has produced for one chart.  Indicators and pattern
// scanners read the OHLCV view kept next to the typed bars.

use serde::Serialize;

use crate::bars::{Bar, FormedBar, KagiLine, RangeBar};

/// Finalized bars in formation order plus at most one open bar.
///
/// Finalized bars are only ever appended.  Alongside the chart-type-specific
/// bars the series keeps an OHLCV view (`bars()`) that indicators and generic
/// pattern scanners index into directly, so neither has to rebuild it per
/// tick.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BarSeries {
    finalized: Vec<FormedBar>,
    #[serde(skip)]
    view: Vec<Bar>,
    current: Option<FormedBar>,
}

impl BarSeries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a finalized bar.
    ///
    /// Returns `false` (and leaves the series untouched) if the bar would break
    /// timestamp ordering.
    pub fn push_finalized(&mut self, bar: FormedBar) -> bool {
        let view = bar.bar();
        if let Some(last) = self.view.last() {
            if view.start_time < last.start_time || view.end_time < last.end_time {
                return false;
            }
        }
        self.view.push(view);
        self.finalized.push(bar);
        true
    }

    /// Replace the open bar.
    pub fn set_current(&mut self, current: Option<FormedBar>) {
        self.current = current;
    }

    pub fn finalized(&self) -> &[FormedBar] {
        &self.finalized
    }

    /// OHLCV view of the finalized bars, index-aligned with `finalized()`.
    pub fn bars(&self) -> &[Bar] {
        &self.view
    }

    pub fn current(&self) -> Option<&FormedBar> {
        self.current.as_ref()
    }

    pub fn len(&self) -> usize {
        self.finalized.len()
    }

    pub fn is_empty(&self) -> bool {
        self.finalized.is_empty()
    }

    /// Close of the most recent finalized bar, if any.
    pub fn last_close(&self) -> Option<f64> {
        self.view.last().map(|b| b.close)
    }

    /// End time of the most recent finalized bar, if any.
    pub fn last_end_time(&self) -> Option<i64> {
        self.view.last().map(|b| b.end_time)
    }

    /// The most recent `count` closes (oldest first).
    pub fn closes(&self, count: usize) -> Vec<f64> {
        let start = self.view.len().saturating_sub(count);
        self.view[start..].iter().map(|b| b.close).collect()
    }

    /// Finalized Kagi lines (empty for other chart types).
    pub fn kagi_lines(&self) -> Vec<&KagiLine> {
        self.finalized
            .iter()
            .filter_map(|b| match b {
                FormedBar::Kagi(line) => Some(line),
                _ => None,
            })
            .collect()
    }

    /// Finalized range bars (empty for other chart types).
    pub fn range_bars(&self) -> Vec<&RangeBar> {
        self.finalized
            .iter()
            .filter_map(|b| match b {
                FormedBar::Range(bar) => Some(bar),
                _ => None,
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
