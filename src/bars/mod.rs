// =============================================================================
// Bar Formation Engine
// =============================================================================
//
// Converts an ordered OHLCV stream into one finalized-bar sequence under a
// chart-type policy:
//
//   Candlestick  pass-through, optionally resampled to a coarser timeframe
//   Kagi  reversal-threshold lines with yang/yin thickness
//   Range bar  bars that close once their high-low span reaches a size
//
// State machine per engine: Empty -> Accumulating(current) -> (Accumulating |
// Finalizing -> Accumulating), terminal Closed after `flush`.  The engine never
// reads the wall clock, so an identical tick sequence always yields an
// identical bar sequence.

pub mod candle;
pub mod kagi;
pub mod range_bar;
pub mod series;

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::error::{ChartError, Result};
use crate::types::{Ohlcv, SizeMode};

pub use candle::CandleFormer;
pub use kagi::{KagiFormer, KagiLevel, KagiLevels, KagiLine};
pub use range_bar::{RangeBar, RangeBarFormer};
pub use series::BarSeries;

// ---------------------------------------------------------------------------
// Common OHLCV view
// ---------------------------------------------------------------------------

/// OHLCV projection of any formed bar.  Indicators and generic pattern
/// scanners only ever see this shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub start_time: i64,
    pub end_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn from_tick(tick: &Ohlcv) -> Self {
        Self {
            start_time: tick.timestamp,
            end_time: tick.timestamp,
            open: tick.open,
            high: tick.high,
            low: tick.low,
            close: tick.close,
            volume: tick.volume,
        }
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }

    /// Body as a fraction of the full range; zero for a zero-range bar.
    pub fn body_pct(&self) -> f64 {
        let range = self.range();
        if range > 0.0 {
            self.body() / range
        } else {
            0.0
        }
    }

    /// (high + low + close) / 3
    pub fn typical_price(&self) -> f64 {
        (self.high + self.low + self.close) / 3.0
    }

    /// Midpoint of the body.
    pub fn body_mid(&self) -> f64 {
        (self.open + self.close) / 2.0
    }
}

/// A finalized or open bar in its chart-type-specific representation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FormedBar {
    Candle(Bar),
    Kagi(KagiLine),
    Range(RangeBar),
}

impl FormedBar {
    /// The OHLCV view of this bar.
    pub fn bar(&self) -> Bar {
        match self {
            Self::Candle(bar) => *bar,
            Self::Kagi(line) => line.bar(),
            Self::Range(bar) => bar.bar(),
        }
    }

    pub fn start_time(&self) -> i64 {
        self.bar().start_time
    }

    pub fn end_time(&self) -> i64 {
        self.bar().end_time
    }
}

// ---------------------------------------------------------------------------
// Policy + engine
// ---------------------------------------------------------------------------

/// Chart-type policy the engine runs under, fixed at creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum BarPolicy {
    Candlestick {
        /// Target bucket width in milliseconds; `None` means pass-through.
        resample_ms: Option<i64>,
    },
    Kagi {
        reversal_amount: f64,
        mode: SizeMode,
    },
    RangeBar {
        range_size: f64,
        mode: SizeMode,
    },
}

impl BarPolicy {
    /// Reject parameters the formers cannot work with.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Candlestick { resample_ms } => match resample_ms {
                Some(ms) if *ms <= 0 => Err(ChartError::Configuration(format!(
                    "resample interval must be positive, got {ms} ms"
                ))),
                _ => Ok(()),
            },
            Self::Kagi { reversal_amount, .. } => {
                if !reversal_amount.is_finite() || *reversal_amount <= 0.0 {
                    Err(ChartError::Configuration(format!(
                        "kagi reversal amount must be > 0, got {reversal_amount}"
                    )))
                } else {
                    Ok(())
                }
            }
            Self::RangeBar { range_size, .. } => {
                if !range_size.is_finite() || *range_size <= 0.0 {
                    Err(ChartError::Configuration(format!(
                        "range size must be > 0, got {range_size}"
                    )))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// Coarse state of the engine's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Empty,
    Accumulating,
    Closed,
}

#[derive(Debug, Clone)]
enum Former {
    Candle(CandleFormer),
    Kagi(KagiFormer),
    Range(RangeBarFormer),
}

/// One bar formation engine instance per (chart_id, chart_type).
#[derive(Debug, Clone)]
pub struct BarEngine {
    policy: BarPolicy,
    former: Former,
    last_timestamp: Option<i64>,
    accepted_ticks: u64,
    closed: bool,
}

impl BarEngine {
    /// Build an engine for `policy`.  Fails with `ChartError::Configuration`
    /// when the policy parameters are invalid.
    pub fn new(policy: BarPolicy) -> Result<Self> {
        policy.validate()?;
        let former = match &policy {
            BarPolicy::Candlestick { resample_ms } => Former::Candle(CandleFormer::new(*resample_ms)),
            BarPolicy::Kagi {
                reversal_amount,
                mode,
            } => Former::Kagi(KagiFormer::new(*reversal_amount, *mode)),
            BarPolicy::RangeBar { range_size, mode } => {
                Former::Range(RangeBarFormer::new(*range_size, *mode))
            }
        };
        Ok(Self {
            policy,
            former,
            last_timestamp: None,
            accepted_ticks: 0,
            closed: false,
        })
    }

    pub fn policy(&self) -> &BarPolicy {
        &self.policy
    }

    /// Feed one tick.  Returns the bars finalized by it (usually zero or one).
    ///
    /// A tick that fails validation is rejected with `DataQuality` and leaves
    /// the engine untouched, so the caller can simply continue with the next
    /// tick.
    pub fn push(&mut self, tick: &Ohlcv) -> Result<Vec<FormedBar>> {
        if self.closed {
            return Err(ChartError::NotFound("bar engine is closed".into()));
        }
        tick.validate(self.last_timestamp)?;
        self.last_timestamp = Some(tick.timestamp);
        self.accepted_ticks += 1;

        let finalized: Vec<FormedBar> = match &mut self.former {
            Former::Candle(former) => former.push(tick).map(FormedBar::Candle).into_iter().collect(),
            Former::Kagi(former) => former
                .push(tick.timestamp, tick.close, tick.volume)
                .map(FormedBar::Kagi)
                .into_iter()
                .collect(),
            Former::Range(former) => former.push_candle(tick).into_iter().map(FormedBar::Range).collect(),
        };

        if !finalized.is_empty() {
            trace!(
                timestamp = tick.timestamp,
                count = finalized.len(),
                "bars finalized"
            );
        }
        Ok(finalized)
    }

    /// The open (not yet finalized) bar, if any.
    pub fn current(&self) -> Option<FormedBar> {
        if self.closed {
            return None;
        }
        match &self.former {
            Former::Candle(former) => former.current().copied().map(FormedBar::Candle),
            Former::Kagi(former) => former.current().cloned().map(FormedBar::Kagi),
            Former::Range(former) => former.current().cloned().map(FormedBar::Range),
        }
    }

    /// Close the engine.  Nothing is finalized: the open bar is handed back
    /// to the caller and dropped from the engine.
    pub fn flush(&mut self) -> Option<FormedBar> {
        let discarded = self.current();
        self.closed = true;
        discarded
    }

    pub fn state(&self) -> EngineState {
        if self.closed {
            EngineState::Closed
        } else if self.accepted_ticks == 0 {
            EngineState::Empty
        } else {
            EngineState::Accumulating
        }
    }

    /// Shoulder / waist levels tracked by a Kagi engine.
    pub fn kagi_levels(&self) -> Option<&KagiLevels> {
        match &self.former {
            Former::Kagi(former) => Some(former.levels()),
            _ => None,
        }
    }

    pub fn accepted_ticks(&self) -> u64 {
        self.accepted_ticks
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    fn ticks(closes: &[f64]) -> Vec<Ohlcv> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Ohlcv::from_price(i as i64 * 60_000, c, 1.0))
            .collect()
    }

    fn run(policy: BarPolicy, closes: &[f64]) -> Vec<FormedBar> {
        let mut engine = BarEngine::new(policy).unwrap();
        let mut out = Vec::new();
        for tick in ticks(closes) {
            out.extend(engine.push(&tick).unwrap());
        }
        out
    }

    #[test]
    fn invalid_policies_fail_at_creation() {
        let kagi = BarPolicy::Kagi {
            reversal_amount: 0.0,
            mode: SizeMode::Percentage,
        };
        assert!(matches!(BarEngine::new(kagi), Err(ChartError::Configuration(_))));

        let range = BarPolicy::RangeBar {
            range_size: -1.0,
            mode: SizeMode::Points,
        };
        assert!(BarEngine::new(range).is_err());

        let candle = BarPolicy::Candlestick {
            resample_ms: Some(0),
        };
        assert!(BarEngine::new(candle).is_err());
    }

    #[test]
    fn bad_tick_is_skipped_and_processing_continues() {
        let mut engine = BarEngine::new(BarPolicy::Candlestick { resample_ms: None }).unwrap();
        assert_eq!(engine.state(), EngineState::Empty);

        let mut bad = Ohlcv::from_price(0, 100.0, 1.0);
        bad.close = f64::NAN;
        assert!(engine.push(&bad).unwrap_err().is_data_quality());
        assert_eq!(engine.state(), EngineState::Empty);

        let out = engine.push(&Ohlcv::from_price(0, 100.0, 1.0)).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(engine.state(), EngineState::Accumulating);
    }

    #[test]
    fn replay_is_deterministic_for_every_policy() {
        let closes: Vec<f64> = (0..300)
            .map(|i| 100.0 + (i as f64 * 0.37).sin() * 4.0 + (i as f64 * 0.05).cos())
            .collect();
        let policies = [
            BarPolicy::Candlestick {
                resample_ms: Some(300_000),
            },
            BarPolicy::Kagi {
                reversal_amount: 1.0,
                mode: SizeMode::Percentage,
            },
            BarPolicy::RangeBar {
                range_size: 1.5,
                mode: SizeMode::Points,
            },
        ];
        for policy in policies {
            let first = run(policy.clone(), &closes);
            let second = run(policy, &closes);
            assert!(!first.is_empty());
            assert_eq!(first, second);
        }
    }

    #[test]
    fn finalized_timestamps_are_non_decreasing() {
        let closes: Vec<f64> = (0..200).map(|i| 50.0 + (i as f64 * 0.6).sin() * 3.0).collect();
        let bars = run(
            BarPolicy::RangeBar {
                range_size: 1.0,
                mode: SizeMode::Points,
            },
            &closes,
        );
        for pair in bars.windows(2) {
            assert!(pair[0].start_time() <= pair[1].start_time());
            assert!(pair[0].end_time() <= pair[1].end_time());
        }
    }

    #[test]
    fn bar_geometry_helpers() {
        let bar = Bar {
            start_time: 0,
            end_time: 0,
            open: 10.0,
            high: 12.0,
            low: 8.0,
            close: 11.0,
            volume: 1.0,
        };
        assert!((bar.body() - 1.0).abs() < 1e-12);
        assert!((bar.range() - 4.0).abs() < 1e-12);
        assert!((bar.upper_wick() - 1.0).abs() < 1e-12);
        assert!((bar.lower_wick() - 2.0).abs() < 1e-12);
        assert!((bar.body_pct() - 0.25).abs() < 1e-12);
        assert!(bar.is_bullish());
    }

    #[test]
    fn flush_discards_the_open_bar_and_closes() {
        let mut engine = BarEngine::new(BarPolicy::RangeBar {
            range_size: 5.0,
            mode: SizeMode::Points,
        })
        .unwrap();
        for tick in ticks(&[100.0, 101.0, 102.0]) {
            assert!(engine.push(&tick).unwrap().is_empty());
        }
        assert_eq!(engine.state(), EngineState::Accumulating);

        let discarded = engine.flush();
        assert!(matches!(discarded, Some(FormedBar::Range(_))));
        assert_eq!(engine.state(), EngineState::Closed);
        assert!(engine.current().is_none());
        assert!(matches!(
            engine.push(&ticks(&[200.0])[0]),
            Err(ChartError::NotFound(_))
        ));
    }
}
