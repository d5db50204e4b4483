// =============================================================================
// Technical Indicators Module
// =============================================================================
//
// Every indicator is a small streaming state fed one finalized bar at a time.
// The batch form (`compute`) is defined as feeding a fresh state through the
// whole series, so an indicator attached mid-stream and one recomputed from
// scratch always agree.  Warmup bars produce no point at all; a series that
// never leaves warmup is simply empty.

pub mod adx;
pub mod atr;
pub mod bollinger;
pub mod cci;
pub mod ema;
pub mod ichimoku;
pub mod macd;
pub mod obv;
pub mod roc;
pub mod rsi;
pub mod sma;
pub mod stochastic;
pub mod supertrend;
pub mod vwap;
pub mod williams_r;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::bars::Bar;
use crate::error::{ChartError, Result};

use adx::{AdxState, AdxValue};
use atr::AtrState;
use bollinger::{BollingerBands, BollingerState};
use cci::CciState;
use ema::EmaState;
use ichimoku::{IchimokuState, IchimokuValue};
use macd::{MacdState, MacdValue};
use obv::ObvState;
use roc::RocState;
use rsi::RsiState;
use sma::SmaState;
use stochastic::{StochasticState, StochasticValue};
use supertrend::{SuperTrendState, SuperTrendValue};
use vwap::{VwapReset, VwapState};
use williams_r::WilliamsRState;

// ---------------------------------------------------------------------------
// Indicator kinds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    Sma,
    Ema,
    Rsi,
    Macd,
    Bollinger,
    Atr,
    Stochastic,
    Vwap,
    SuperTrend,
    Adx,
    Obv,
    Ichimoku,
    Roc,
    Cci,
    WilliamsR,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 15] = [
        Self::Sma,
        Self::Ema,
        Self::Rsi,
        Self::Macd,
        Self::Bollinger,
        Self::Atr,
        Self::Stochastic,
        Self::Vwap,
        Self::SuperTrend,
        Self::Adx,
        Self::Obv,
        Self::Ichimoku,
        Self::Roc,
        Self::Cci,
        Self::WilliamsR,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Sma => "SMA",
            Self::Ema => "EMA",
            Self::Rsi => "RSI",
            Self::Macd => "MACD",
            Self::Bollinger => "BOLLINGER",
            Self::Atr => "ATR",
            Self::Stochastic => "STOCHASTIC",
            Self::Vwap => "VWAP",
            Self::SuperTrend => "SUPERTREND",
            Self::Adx => "ADX",
            Self::Obv => "OBV",
            Self::Ichimoku => "ICHIMOKU",
            Self::Roc => "ROC",
            Self::Cci => "CCI",
            Self::WilliamsR => "WILLIAMS_R",
        }
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for IndicatorKind {
    type Err = ChartError;

    /// Case-insensitive; separators (`_`, `-`, spaces, `%`) are ignored and
    /// the common short names are accepted.
    fn from_str(s: &str) -> Result<Self> {
        let key: String = s
            .chars()
            .filter(|c| !matches!(c, '_' | '-' | ' ' | '%'))
            .flat_map(char::to_lowercase)
            .collect();
        let kind = match key.as_str() {
            "sma" | "ma" => Self::Sma,
            "ema" => Self::Ema,
            "rsi" => Self::Rsi,
            "macd" => Self::Macd,
            "bollinger" | "bollingerbands" | "bb" | "bbands" => Self::Bollinger,
            "atr" => Self::Atr,
            "stochastic" | "stoch" => Self::Stochastic,
            "vwap" => Self::Vwap,
            "supertrend" => Self::SuperTrend,
            "adx" => Self::Adx,
            "obv" => Self::Obv,
            "ichimoku" | "ichimokucloud" => Self::Ichimoku,
            "roc" => Self::Roc,
            "cci" => Self::Cci,
            "williamsr" | "willr" | "williams" => Self::WilliamsR,
            _ => return Err(ChartError::UnsupportedIndicator(s.to_string())),
        };
        Ok(kind)
    }
}

// ---------------------------------------------------------------------------
// Parameters
// ---------------------------------------------------------------------------

/// Typed indicator configuration.  Validated before any state is built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IndicatorParams {
    Sma { period: usize },
    Ema { period: usize },
    Rsi { period: usize },
    Macd { fast: usize, slow: usize, signal: usize },
    Bollinger { period: usize, k: f64 },
    Atr { period: usize },
    Stochastic { k_period: usize, d_period: usize },
    Vwap {
        #[serde(default)]
        reset: VwapReset,
    },
    SuperTrend { period: usize, multiplier: f64 },
    Adx { period: usize },
    Obv,
    Ichimoku { tenkan: usize, kijun: usize, senkou_b: usize, displacement: usize },
    Roc { period: usize },
    Cci { period: usize },
    WilliamsR { period: usize },
}

impl IndicatorParams {
    pub fn kind(&self) -> IndicatorKind {
        match self {
            Self::Sma { .. } => IndicatorKind::Sma,
            Self::Ema { .. } => IndicatorKind::Ema,
            Self::Rsi { .. } => IndicatorKind::Rsi,
            Self::Macd { .. } => IndicatorKind::Macd,
            Self::Bollinger { .. } => IndicatorKind::Bollinger,
            Self::Atr { .. } => IndicatorKind::Atr,
            Self::Stochastic { .. } => IndicatorKind::Stochastic,
            Self::Vwap { .. } => IndicatorKind::Vwap,
            Self::SuperTrend { .. } => IndicatorKind::SuperTrend,
            Self::Adx { .. } => IndicatorKind::Adx,
            Self::Obv => IndicatorKind::Obv,
            Self::Ichimoku { .. } => IndicatorKind::Ichimoku,
            Self::Roc { .. } => IndicatorKind::Roc,
            Self::Cci { .. } => IndicatorKind::Cci,
            Self::WilliamsR { .. } => IndicatorKind::WilliamsR,
        }
    }

    /// Conventional default parameters for `kind`.
    pub fn default_for(kind: IndicatorKind) -> Self {
        match kind {
            IndicatorKind::Sma => Self::Sma { period: 20 },
            IndicatorKind::Ema => Self::Ema { period: 20 },
            IndicatorKind::Rsi => Self::Rsi { period: 14 },
            IndicatorKind::Macd => Self::Macd { fast: 12, slow: 26, signal: 9 },
            IndicatorKind::Bollinger => Self::Bollinger { period: 20, k: 2.0 },
            IndicatorKind::Atr => Self::Atr { period: 14 },
            IndicatorKind::Stochastic => Self::Stochastic { k_period: 14, d_period: 3 },
            IndicatorKind::Vwap => Self::Vwap { reset: VwapReset::None },
            IndicatorKind::SuperTrend => Self::SuperTrend { period: 10, multiplier: 3.0 },
            IndicatorKind::Adx => Self::Adx { period: 14 },
            IndicatorKind::Obv => Self::Obv,
            IndicatorKind::Ichimoku => Self::Ichimoku {
                tenkan: 9,
                kijun: 26,
                senkou_b: 52,
                displacement: 26,
            },
            IndicatorKind::Roc => Self::Roc { period: 12 },
            IndicatorKind::Cci => Self::Cci { period: 20 },
            IndicatorKind::WilliamsR => Self::WilliamsR { period: 14 },
        }
    }

    /// Build typed parameters from a loose indicator name and a JSON object.
    ///
    /// Missing keys fall back to `default_for`; present keys of the wrong type
    /// are configuration errors.  The result is validated.
    pub fn from_name(name: &str, params: &Value) -> Result<Self> {
        let kind: IndicatorKind = name.parse()?;
        let built = match Self::default_for(kind) {
            Self::Sma { period } => Self::Sma { period: usize_param(params, "period", period)? },
            Self::Ema { period } => Self::Ema { period: usize_param(params, "period", period)? },
            Self::Rsi { period } => Self::Rsi { period: usize_param(params, "period", period)? },
            Self::Macd { fast, slow, signal } => Self::Macd {
                fast: usize_param(params, "fast", fast)?,
                slow: usize_param(params, "slow", slow)?,
                signal: usize_param(params, "signal", signal)?,
            },
            Self::Bollinger { period, k } => Self::Bollinger {
                period: usize_param(params, "period", period)?,
                k: f64_param(params, "k", k)?,
            },
            Self::Atr { period } => Self::Atr { period: usize_param(params, "period", period)? },
            Self::Stochastic { k_period, d_period } => Self::Stochastic {
                k_period: usize_param(params, "k_period", k_period)?,
                d_period: usize_param(params, "d_period", d_period)?,
            },
            Self::Vwap { reset } => Self::Vwap { reset: reset_param(params, reset)? },
            Self::SuperTrend { period, multiplier } => Self::SuperTrend {
                period: usize_param(params, "period", period)?,
                multiplier: f64_param(params, "multiplier", multiplier)?,
            },
            Self::Adx { period } => Self::Adx { period: usize_param(params, "period", period)? },
            Self::Obv => Self::Obv,
            Self::Ichimoku { tenkan, kijun, senkou_b, displacement } => Self::Ichimoku {
                tenkan: usize_param(params, "tenkan", tenkan)?,
                kijun: usize_param(params, "kijun", kijun)?,
                senkou_b: usize_param(params, "senkou_b", senkou_b)?,
                displacement: usize_param(params, "displacement", displacement)?,
            },
            Self::Roc { period } => Self::Roc { period: usize_param(params, "period", period)? },
            Self::Cci { period } => Self::Cci { period: usize_param(params, "period", period)? },
            Self::WilliamsR { period } => {
                Self::WilliamsR { period: usize_param(params, "period", period)? }
            }
        };
        built.validate()?;
        Ok(built)
    }

    pub fn validate(&self) -> Result<()> {
        let label = self.label();
        let positive = |name: &str, v: usize| -> Result<()> {
            if v == 0 {
                Err(ChartError::Configuration(format!("{label}: {name} must be > 0")))
            } else {
                Ok(())
            }
        };
        let positive_f = |name: &str, v: f64| -> Result<()> {
            if !v.is_finite() || v <= 0.0 {
                Err(ChartError::Configuration(format!("{label}: {name} must be > 0, got {v}")))
            } else {
                Ok(())
            }
        };

        match *self {
            Self::Sma { period }
            | Self::Ema { period }
            | Self::Rsi { period }
            | Self::Atr { period }
            | Self::Adx { period }
            | Self::Roc { period }
            | Self::Cci { period }
            | Self::WilliamsR { period } => positive("period", period),
            Self::Macd { fast, slow, signal } => {
                positive("fast", fast)?;
                positive("slow", slow)?;
                positive("signal", signal)?;
                if fast >= slow {
                    return Err(ChartError::Configuration(format!(
                        "{label}: fast period must be shorter than slow period"
                    )));
                }
                Ok(())
            }
            Self::Bollinger { period, k } => {
                positive("period", period)?;
                positive_f("k", k)
            }
            Self::Stochastic { k_period, d_period } => {
                positive("k_period", k_period)?;
                positive("d_period", d_period)
            }
            Self::Vwap { reset } => match reset {
                VwapReset::Interval { millis } if millis <= 0 => Err(ChartError::Configuration(
                    format!("{label}: reset interval must be > 0 ms"),
                )),
                _ => Ok(()),
            },
            Self::SuperTrend { period, multiplier } => {
                positive("period", period)?;
                positive_f("multiplier", multiplier)
            }
            Self::Obv => Ok(()),
            Self::Ichimoku { tenkan, kijun, senkou_b, .. } => {
                positive("tenkan", tenkan)?;
                positive("kijun", kijun)?;
                positive("senkou_b", senkou_b)
            }
        }
    }

    /// Short human-readable label, e.g. `MACD(12,26,9)`.
    pub fn label(&self) -> String {
        let kind = self.kind();
        match self {
            Self::Sma { period }
            | Self::Ema { period }
            | Self::Rsi { period }
            | Self::Atr { period }
            | Self::Adx { period }
            | Self::Roc { period }
            | Self::Cci { period }
            | Self::WilliamsR { period } => format!("{kind}({period})"),
            Self::Macd { fast, slow, signal } => format!("{kind}({fast},{slow},{signal})"),
            Self::Bollinger { period, k } => format!("{kind}({period},{k})"),
            Self::Stochastic { k_period, d_period } => format!("{kind}({k_period},{d_period})"),
            Self::Vwap { reset } => match reset {
                VwapReset::None => kind.to_string(),
                VwapReset::DailyUtc => format!("{kind}(daily)"),
                VwapReset::Interval { millis } => format!("{kind}({millis}ms)"),
            },
            Self::SuperTrend { period, multiplier } => format!("{kind}({period},{multiplier})"),
            Self::Obv => kind.to_string(),
            Self::Ichimoku { tenkan, kijun, senkou_b, displacement } => {
                format!("{kind}({tenkan},{kijun},{senkou_b},{displacement})")
            }
        }
    }
}

fn usize_param(params: &Value, key: &str, default: usize) -> Result<usize> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_u64()
            .map(|n| n as usize)
            .ok_or_else(|| ChartError::Configuration(format!("{key} must be a non-negative integer, got {v}"))),
    }
}

fn f64_param(params: &Value, key: &str, default: f64) -> Result<f64> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_f64()
            .ok_or_else(|| ChartError::Configuration(format!("{key} must be a number, got {v}"))),
    }
}

/// `{"reset": "none" | "daily" | "daily_utc"}` or `{"interval_ms": n}`.
fn reset_param(params: &Value, default: VwapReset) -> Result<VwapReset> {
    if let Some(v) = params.get("interval_ms").filter(|v| !v.is_null()) {
        let millis = v
            .as_i64()
            .ok_or_else(|| ChartError::Configuration(format!("interval_ms must be an integer, got {v}")))?;
        return Ok(VwapReset::Interval { millis });
    }
    match params.get("reset").and_then(Value::as_str) {
        None => Ok(default),
        Some("none") | Some("session") => Ok(VwapReset::None),
        Some("daily") | Some("daily_utc") => Ok(VwapReset::DailyUtc),
        Some(other) => Err(ChartError::Configuration(format!("unknown VWAP reset mode: {other}"))),
    }
}

// ---------------------------------------------------------------------------
// Values and series
// ---------------------------------------------------------------------------

/// One indicator output.  Multi-line indicators keep their components together.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IndicatorValue {
    Single(f64),
    Macd(MacdValue),
    Bands(BollingerBands),
    Stochastic(StochasticValue),
    SuperTrend(SuperTrendValue),
    Adx(AdxValue),
    Ichimoku(IchimokuValue),
}

impl IndicatorValue {
    /// The headline number of the value (MACD line, middle band, %K, ...).
    pub fn primary(&self) -> f64 {
        match self {
            Self::Single(v) => *v,
            Self::Macd(v) => v.macd,
            Self::Bands(v) => v.middle,
            Self::Stochastic(v) => v.k,
            Self::SuperTrend(v) => v.value,
            Self::Adx(v) => v.adx,
            Self::Ichimoku(v) => v.tenkan,
        }
    }
}

/// An indicator value stamped with the end time of the bar it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IndicatorPoint {
    pub timestamp: i64,
    pub value: IndicatorValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSeries {
    pub params: IndicatorParams,
    pub points: Vec<IndicatorPoint>,
}

impl IndicatorSeries {
    pub fn new(params: IndicatorParams) -> Self {
        Self {
            params,
            points: Vec::new(),
        }
    }

    pub fn kind(&self) -> IndicatorKind {
        self.params.kind()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    pub fn last(&self) -> Option<&IndicatorPoint> {
        self.points.last()
    }

    /// Headline values in bar order.
    pub fn primary_values(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.value.primary()).collect()
    }

    pub fn timestamps(&self) -> Vec<i64> {
        self.points.iter().map(|p| p.timestamp).collect()
    }
}

// ---------------------------------------------------------------------------
// Streaming state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum IndicatorState {
    Sma(SmaState),
    Ema(EmaState),
    Rsi(RsiState),
    Macd(MacdState),
    Bollinger(BollingerState),
    Atr(AtrState),
    Stochastic(StochasticState),
    Vwap(VwapState),
    SuperTrend(SuperTrendState),
    Adx(AdxState),
    Obv(ObvState),
    Ichimoku(IchimokuState),
    Roc(RocState),
    Cci(CciState),
    WilliamsR(WilliamsRState),
}

impl IndicatorState {
    pub fn new(params: &IndicatorParams) -> Self {
        match *params {
            IndicatorParams::Sma { period } => Self::Sma(SmaState::new(period)),
            IndicatorParams::Ema { period } => Self::Ema(EmaState::new(period)),
            IndicatorParams::Rsi { period } => Self::Rsi(RsiState::new(period)),
            IndicatorParams::Macd { fast, slow, signal } => {
                Self::Macd(MacdState::new(fast, slow, signal))
            }
            IndicatorParams::Bollinger { period, k } => {
                Self::Bollinger(BollingerState::new(period, k))
            }
            IndicatorParams::Atr { period } => Self::Atr(AtrState::new(period)),
            IndicatorParams::Stochastic { k_period, d_period } => {
                Self::Stochastic(StochasticState::new(k_period, d_period))
            }
            IndicatorParams::Vwap { reset } => Self::Vwap(VwapState::new(reset)),
            IndicatorParams::SuperTrend { period, multiplier } => {
                Self::SuperTrend(SuperTrendState::new(period, multiplier))
            }
            IndicatorParams::Adx { period } => Self::Adx(AdxState::new(period)),
            IndicatorParams::Obv => Self::Obv(ObvState::new()),
            IndicatorParams::Ichimoku { tenkan, kijun, senkou_b, displacement } => {
                Self::Ichimoku(IchimokuState::new(tenkan, kijun, senkou_b, displacement))
            }
            IndicatorParams::Roc { period } => Self::Roc(RocState::new(period)),
            IndicatorParams::Cci { period } => Self::Cci(CciState::new(period)),
            IndicatorParams::WilliamsR { period } => Self::WilliamsR(WilliamsRState::new(period)),
        }
    }

    /// Feed one finalized bar; returns the new point once warmup is over.
    pub fn update(&mut self, bar: &Bar) -> Option<IndicatorPoint> {
        use IndicatorValue as V;
        let value = match self {
            Self::Sma(s) => V::Single(s.update(bar.close)?),
            Self::Ema(s) => V::Single(s.update(bar.close)?),
            Self::Rsi(s) => V::Single(s.update(bar.close)?),
            Self::Macd(s) => V::Macd(s.update(bar.close)?),
            Self::Bollinger(s) => V::Bands(s.update(bar.close)?),
            Self::Atr(s) => V::Single(s.update(bar)?),
            Self::Stochastic(s) => V::Stochastic(s.update(bar)?),
            Self::Vwap(s) => V::Single(s.update(bar)?),
            Self::SuperTrend(s) => V::SuperTrend(s.update(bar)?),
            Self::Adx(s) => V::Adx(s.update(bar)?),
            Self::Obv(s) => V::Single(s.update(bar)?),
            Self::Ichimoku(s) => V::Ichimoku(s.update(bar)?),
            Self::Roc(s) => V::Single(s.update(bar.close)?),
            Self::Cci(s) => V::Single(s.update(bar)?),
            Self::WilliamsR(s) => V::Single(s.update(bar)?),
        };
        Some(IndicatorPoint {
            timestamp: bar.end_time,
            value,
        })
    }
}

/// Batch computation over a finalized bar sequence.
pub fn compute(params: &IndicatorParams, bars: &[Bar]) -> Result<IndicatorSeries> {
    params.validate()?;
    let mut state = IndicatorState::new(params);
    let mut series = IndicatorSeries::new(params.clone());
    series.points = bars.iter().filter_map(|b| state.update(b)).collect();
    Ok(series)
}

// ---------------------------------------------------------------------------
// Attached indicator
// ---------------------------------------------------------------------------

/// An indicator attached to a chart: its id, streaming state and output so far.
#[derive(Debug, Clone)]
pub struct Indicator {
    id: String,
    state: IndicatorState,
    series: IndicatorSeries,
}

impl Indicator {
    pub fn new(id: impl Into<String>, params: IndicatorParams) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            id: id.into(),
            state: IndicatorState::new(&params),
            series: IndicatorSeries::new(params),
        })
    }

    /// Attach and replay the bars finalized so far.
    pub fn with_history(id: impl Into<String>, params: IndicatorParams, bars: &[Bar]) -> Result<Self> {
        let mut indicator = Self::new(id, params)?;
        for bar in bars {
            indicator.update(bar);
        }
        Ok(indicator)
    }

    pub fn update(&mut self, bar: &Bar) -> Option<IndicatorPoint> {
        let point = self.state.update(bar)?;
        self.series.points.push(point);
        Some(point)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn params(&self) -> &IndicatorParams {
        &self.series.params
    }

    pub fn series(&self) -> &IndicatorSeries {
        &self.series
    }
}
