// =============================================================================
// Chart Session — one bar series with its indicators and pattern cache
// =============================================================================
//
// A session owns exactly one Bar Formation Engine, the finalized BarSeries it
// produces, every indicator attached to the chart and the chart's pattern
// cache.  Each tick runs the whole pipeline synchronously:
//
//   tick -> BarEngine -> finalized bars -> BarSeries
//                                       -> every indicator (incremental)
//                                       -> pattern rescan (once per tick)
//
// and returns a `SessionUpdate` describing what changed.  The coordinator
// holds the session behind a mutex, so a snapshot never observes bars that
// the indicators have not caught up with.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::bars::{BarEngine, BarPolicy, BarSeries, EngineState, FormedBar, KagiLevels};
use crate::error::{ChartError, Result};
use crate::indicators::{Indicator, IndicatorParams, IndicatorPoint, IndicatorSeries};
use crate::patterns::{PatternCache, PatternConfig, PatternContext, PatternDetector, PatternKind, PatternMatch};
use crate::types::{timeframe_millis, ChartType, Ohlcv, SizeMode};

// =============================================================================
// Chart configuration
// =============================================================================

fn default_chart_type() -> ChartType {
    ChartType::Candlestick
}

fn default_timeframe() -> String {
    "1m".to_string()
}

/// Everything needed to open a chart.  Chart-type-specific fields are only
/// required by the chart type that uses them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChartConfig {
    /// Caller-chosen id; a uuid is assigned when absent.
    #[serde(default)]
    pub chart_id: Option<String>,

    pub symbol: String,

    #[serde(default = "default_chart_type")]
    pub chart_type: ChartType,

    /// Timeframe of the incoming ticks, e.g. "1m".
    #[serde(default = "default_timeframe")]
    pub timeframe: String,

    #[serde(default)]
    pub kagi_reversal_amount: Option<f64>,

    #[serde(default)]
    pub kagi_reversal_type: Option<SizeMode>,

    #[serde(default)]
    pub range_size: Option<f64>,

    #[serde(default)]
    pub range_type: Option<SizeMode>,

    /// Candlestick charts only: aggregate input candles into this coarser
    /// timeframe.
    #[serde(default)]
    pub resample_timeframe: Option<String>,

    /// Indicators attached when the chart opens.
    #[serde(default)]
    pub indicators: Vec<IndicatorParams>,
}

impl ChartConfig {
    pub fn new(symbol: impl Into<String>, chart_type: ChartType, timeframe: impl Into<String>) -> Self {
        Self {
            chart_id: None,
            symbol: symbol.into(),
            chart_type,
            timeframe: timeframe.into(),
            kagi_reversal_amount: None,
            kagi_reversal_type: None,
            range_size: None,
            range_type: None,
            resample_timeframe: None,
            indicators: Vec::new(),
        }
    }

    pub fn with_id(mut self, chart_id: impl Into<String>) -> Self {
        self.chart_id = Some(chart_id.into());
        self
    }

    pub fn with_kagi(mut self, reversal_amount: f64, mode: SizeMode) -> Self {
        self.kagi_reversal_amount = Some(reversal_amount);
        self.kagi_reversal_type = Some(mode);
        self
    }

    pub fn with_range(mut self, range_size: f64, mode: SizeMode) -> Self {
        self.range_size = Some(range_size);
        self.range_type = Some(mode);
        self
    }

    pub fn with_resample(mut self, timeframe: impl Into<String>) -> Self {
        self.resample_timeframe = Some(timeframe.into());
        self
    }

    pub fn with_indicator(mut self, params: IndicatorParams) -> Self {
        self.indicators.push(params);
        self
    }

    /// Whether ticks for (`symbol`, `timeframe`) belong to this chart.  An
    /// empty timeframe matches any.
    pub fn accepts(&self, symbol: &str, timeframe: &str) -> bool {
        route_matches(&self.symbol, &self.timeframe, symbol, timeframe)
    }

    /// Validate the configuration and derive the bar policy.
    pub fn to_policy(&self) -> Result<BarPolicy> {
        if self.symbol.trim().is_empty() {
            return Err(ChartError::Configuration("symbol must not be empty".into()));
        }
        if timeframe_millis(&self.timeframe).is_none() {
            return Err(ChartError::Configuration(format!(
                "unknown timeframe '{}'",
                self.timeframe
            )));
        }

        let policy = match self.chart_type {
            ChartType::Candlestick => {
                let resample_ms = match &self.resample_timeframe {
                    None => None,
                    Some(tf) => Some(timeframe_millis(tf).ok_or_else(|| {
                        ChartError::Configuration(format!("unknown resample timeframe '{tf}'"))
                    })?),
                };
                BarPolicy::Candlestick { resample_ms }
            }
            ChartType::Kagi => BarPolicy::Kagi {
                reversal_amount: self.kagi_reversal_amount.ok_or_else(|| {
                    ChartError::Configuration("kagi chart requires kagi_reversal_amount".into())
                })?,
                mode: self.kagi_reversal_type.unwrap_or_default(),
            },
            ChartType::RangeBar => BarPolicy::RangeBar {
                range_size: self
                    .range_size
                    .ok_or_else(|| ChartError::Configuration("range-bar chart requires range_size".into()))?,
                mode: self.range_type.unwrap_or_default(),
            },
        };
        policy.validate()?;
        Ok(policy)
    }
}

// =============================================================================
// Session output
// =============================================================================

/// A new indicator point, tagged with the indicator it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorUpdate {
    pub indicator_id: String,
    pub point: IndicatorPoint,
}

/// Everything one tick changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionUpdate {
    pub bars: Vec<FormedBar>,
    pub indicators: Vec<IndicatorUpdate>,
    /// Patterns reported for the first time.
    pub patterns: Vec<PatternMatch>,
}

impl SessionUpdate {
    pub fn is_empty(&self) -> bool {
        self.bars.is_empty() && self.indicators.is_empty() && self.patterns.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorSnapshot {
    pub id: String,
    pub label: String,
    pub series: IndicatorSeries,
}

/// Consistent view of a chart taken under the session lock.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesSnapshot {
    pub chart_id: String,
    pub symbol: String,
    pub chart_type: ChartType,
    pub timeframe: String,
    pub state: EngineState,
    pub finalized: Vec<FormedBar>,
    pub current: Option<FormedBar>,
    pub indicators: Vec<IndicatorSnapshot>,
    pub active_patterns: Vec<PatternMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kagi_levels: Option<KagiLevels>,
    pub accepted_ticks: u64,
    pub rejected_ticks: u64,
}

// =============================================================================
// ChartSession
// =============================================================================

#[derive(Debug)]
pub struct ChartSession {
    id: String,
    config: ChartConfig,
    engine: BarEngine,
    series: BarSeries,
    indicators: Vec<Indicator>,
    next_indicator: u64,
    detector: PatternDetector,
    patterns: PatternCache,
    scan_on_bar: bool,
    rejected_ticks: u64,
    closed: bool,
}

impl ChartSession {
    /// Open a session.  Invalid chart or indicator configuration is fatal.
    pub fn new(
        id: impl Into<String>,
        config: ChartConfig,
        pattern_config: PatternConfig,
        max_pattern_history: usize,
        scan_on_bar: bool,
    ) -> Result<Self> {
        let id = id.into();
        let engine = BarEngine::new(config.to_policy()?)?;
        let detector = PatternDetector::for_chart(config.chart_type, pattern_config);

        let mut session = Self {
            id,
            engine,
            series: BarSeries::new(),
            indicators: Vec::new(),
            next_indicator: 1,
            detector,
            patterns: PatternCache::new(max_pattern_history),
            scan_on_bar,
            rejected_ticks: 0,
            closed: false,
            config,
        };
        for params in session.config.indicators.clone() {
            session.add_indicator(params)?;
        }

        info!(
            chart_id = %session.id,
            symbol = %session.config.symbol,
            chart_type = %session.config.chart_type,
            timeframe = %session.config.timeframe,
            indicators = session.indicators.len(),
            "chart session opened"
        );
        Ok(session)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &ChartConfig {
        &self.config
    }

    pub fn series(&self) -> &BarSeries {
        &self.series
    }

    pub fn rejected_ticks(&self) -> u64 {
        self.rejected_ticks
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Mark the session closed.  The open bar is discarded with it.
    pub fn close(&mut self) {
        if let Some(open) = self.engine.flush() {
            debug!(chart_id = %self.id, end = open.end_time(), "open bar discarded on close");
        }
        self.closed = true;
    }

    pub fn accepts(&self, symbol: &str, timeframe: &str) -> bool {
        self.config.accepts(symbol, timeframe)
    }

    /// Run one tick through the pipeline.
    ///
    /// A rejected tick is counted and reported; the session keeps its state
    /// and accepts the next tick normally.
    pub fn process_tick(&mut self, tick: &Ohlcv) -> Result<SessionUpdate> {
        if self.closed {
            return Err(ChartError::NotFound(format!("chart {} is closed", self.id)));
        }

        let finalized = match self.engine.push(tick) {
            Ok(bars) => bars,
            Err(e) => {
                self.rejected_ticks += 1;
                warn!(
                    chart_id = %self.id,
                    symbol = %self.config.symbol,
                    error = %e,
                    rejected_ticks = self.rejected_ticks,
                    "tick rejected"
                );
                return Err(e);
            }
        };

        let mut update = SessionUpdate::default();
        for bar in finalized {
            if !self.series.push_finalized(bar.clone()) {
                warn!(chart_id = %self.id, "finalized bar out of order, skipped");
                continue;
            }
            let view = bar.bar();
            for indicator in &mut self.indicators {
                if let Some(point) = indicator.update(&view) {
                    update.indicators.push(IndicatorUpdate {
                        indicator_id: indicator.id().to_string(),
                        point,
                    });
                }
            }
            update.bars.push(bar);
        }
        self.series.set_current(self.engine.current());

        if !update.bars.is_empty() && self.scan_on_bar {
            let found = self.scan(None);
            update.patterns = self.patterns.record(found, self.scan_horizon());
            for m in &update.patterns {
                debug!(
                    chart_id = %self.id,
                    pattern = %m.kind,
                    confidence = m.confidence,
                    bullish = m.bullish,
                    "pattern detected"
                );
            }
        }

        Ok(update)
    }

    // ── Indicators ──────────────────────────────────────────────────────

    /// Attach an indicator, replaying the bars finalized so far.  Returns its
    /// id.
    pub fn add_indicator(&mut self, params: IndicatorParams) -> Result<String> {
        let id = format!("{}-{}", params.kind().name(), self.next_indicator);
        let indicator = Indicator::with_history(id.clone(), params, self.series.bars())?;
        self.next_indicator += 1;
        info!(
            chart_id = %self.id,
            indicator_id = %id,
            label = %indicator.params().label(),
            points = indicator.series().len(),
            "indicator attached"
        );
        self.indicators.push(indicator);
        Ok(id)
    }

    pub fn remove_indicator(&mut self, indicator_id: &str) -> Result<IndicatorParams> {
        let pos = self
            .indicators
            .iter()
            .position(|i| i.id() == indicator_id)
            .ok_or_else(|| ChartError::NotFound(format!("indicator {indicator_id} on chart {}", self.id)))?;
        let removed = self.indicators.remove(pos);
        info!(chart_id = %self.id, indicator_id, "indicator removed");
        Ok(removed.params().clone())
    }

    pub fn indicator(&self, indicator_id: &str) -> Option<&IndicatorSeries> {
        self.indicators
            .iter()
            .find(|i| i.id() == indicator_id)
            .map(|i| i.series())
    }

    pub fn indicator_ids(&self) -> Vec<String> {
        self.indicators.iter().map(|i| i.id().to_string()).collect()
    }

    // ── Patterns ────────────────────────────────────────────────────────

    fn scan(&self, kinds: Option<&[PatternKind]>) -> Vec<PatternMatch> {
        let ctx = PatternContext {
            symbol: &self.config.symbol,
            chart_type: self.config.chart_type,
            series: &self.series,
            kagi_levels: self.engine.kagi_levels(),
        };
        self.detector.detect(&ctx, kinds)
    }

    /// Start time of the oldest bar a scan still covers.
    fn scan_horizon(&self) -> i64 {
        let bars = self.series.bars();
        let first = bars.len().saturating_sub(self.detector.config().scan_window);
        bars.get(first).map_or(i64::MIN, |b| b.start_time)
    }

    /// Scan the current series on demand.  Results are merged into the
    /// pattern history; all matches of this scan are returned.
    pub fn detect_patterns(&mut self, kinds: Option<&[PatternKind]>) -> Vec<PatternMatch> {
        let found = self.scan(kinds);
        self.patterns.record(found.clone(), self.scan_horizon());
        found
    }

    /// Matches still valid as of the latest finalized bar.
    pub fn active_patterns(&self) -> Vec<PatternMatch> {
        match self.series.last_end_time() {
            Some(now) => self.patterns.active(now),
            None => Vec::new(),
        }
    }

    pub fn pattern_history(&self) -> Vec<PatternMatch> {
        self.patterns.history().cloned().collect()
    }

    pub fn snapshot(&self) -> SeriesSnapshot {
        SeriesSnapshot {
            chart_id: self.id.clone(),
            symbol: self.config.symbol.clone(),
            chart_type: self.config.chart_type,
            timeframe: self.config.timeframe.clone(),
            state: self.engine.state(),
            finalized: self.series.finalized().to_vec(),
            current: self.series.current().cloned(),
            indicators: self
                .indicators
                .iter()
                .map(|i| IndicatorSnapshot {
                    id: i.id().to_string(),
                    label: i.params().label(),
                    series: i.series().clone(),
                })
                .collect(),
            active_patterns: self.active_patterns(),
            kagi_levels: self.engine.kagi_levels().cloned(),
            accepted_ticks: self.engine.accepted_ticks(),
            rejected_ticks: self.rejected_ticks,
        }
    }
}

/// Routing rule shared by `ChartConfig::accepts` and the coordinator's chart
/// table: symbols compare case-insensitively, an empty timeframe matches any.
pub(crate) fn route_matches(chart_symbol: &str, chart_timeframe: &str, symbol: &str, timeframe: &str) -> bool {
    chart_symbol.eq_ignore_ascii_case(symbol) && (timeframe.is_empty() || chart_timeframe == timeframe)
}
