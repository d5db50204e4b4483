// =============================================================================
// Chart Coordinator — chart_id -> session table and event fan-out
// =============================================================================
//
// The single entry point for everything outside the crate.  Owns every open
// chart session, routes inbound ticks to them and republishes what each tick
// produced as `ChartEvent`s on a broadcast channel.
//
// Thread safety:
//   - parking_lot::RwLock over the session table; lookups only take the read
//     side.  Each slot carries the chart's routing key, so routing a tick
//     never touches a session lock.
//   - One parking_lot::Mutex per session.  A tick's bars, indicator points
//     and patterns are computed and published while that lock is held, so
//     subscribers see each chart's events in order and a snapshot never
//     observes half an update.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::bars::FormedBar;
use crate::error::{ChartError, Result};
use crate::feed::{spawn_feed, Coalesce, FeedHandle, TickQueue};
use crate::indicators::{IndicatorParams, IndicatorPoint};
use crate::patterns::{PatternKind, PatternMatch};
use crate::runtime_config::EngineConfig;
use crate::session::{route_matches, ChartConfig, ChartSession, SeriesSnapshot, SessionUpdate};
use crate::types::Ohlcv;

// =============================================================================
// Events
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChartEvent {
    BarFinalized {
        chart_id: String,
        bar: FormedBar,
    },
    IndicatorUpdated {
        chart_id: String,
        indicator_id: String,
        point: IndicatorPoint,
    },
    PatternDetected {
        chart_id: String,
        pattern: PatternMatch,
    },
}

impl ChartEvent {
    pub fn chart_id(&self) -> &str {
        match self {
            Self::BarFinalized { chart_id, .. }
            | Self::IndicatorUpdated { chart_id, .. }
            | Self::PatternDetected { chart_id, .. } => chart_id,
        }
    }
}

// =============================================================================
// ChartCoordinator
// =============================================================================

/// One entry of the chart table.  Everything besides the session is fixed at
/// open time and readable without its lock.
struct ChartSlot {
    symbol: String,
    timeframe: String,
    coalesce: Coalesce,
    session: Arc<Mutex<ChartSession>>,
}

impl ChartSlot {
    fn accepts(&self, symbol: &str, timeframe: &str) -> bool {
        route_matches(&self.symbol, &self.timeframe, symbol, timeframe)
    }
}

pub struct ChartCoordinator {
    config: EngineConfig,
    sessions: RwLock<HashMap<String, ChartSlot>>,
    feeds: Mutex<HashMap<String, FeedHandle>>,
    events: broadcast::Sender<ChartEvent>,
}

impl ChartCoordinator {
    pub fn new(config: EngineConfig) -> Self {
        let (events, _rx) = broadcast::channel(config.event_channel_capacity.max(1));
        Self {
            config,
            sessions: RwLock::new(HashMap::new()),
            feeds: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Receive every event published after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<ChartEvent> {
        self.events.subscribe()
    }

    /// Ids of the open charts, sorted.
    pub fn chart_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn session(&self, chart_id: &str) -> Result<Arc<Mutex<ChartSession>>> {
        self.sessions
            .read()
            .get(chart_id)
            .map(|slot| slot.session.clone())
            .ok_or_else(|| ChartError::NotFound(format!("chart {chart_id}")))
    }

    // ── Lifecycle ───────────────────────────────────────────────────────

    /// Create a chart.  Returns its id (the configured one, or a fresh uuid).
    pub fn open_chart(&self, config: ChartConfig) -> Result<String> {
        let chart_id = config
            .chart_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if self.sessions.read().contains_key(&chart_id) {
            return Err(ChartError::Configuration(format!("chart {chart_id} is already open")));
        }

        let symbol = config.symbol.clone();
        let timeframe = config.timeframe.clone();
        let coalesce = Coalesce::for_chart(&config);
        let session = ChartSession::new(
            chart_id.clone(),
            config,
            self.config.pattern.clone(),
            self.config.max_pattern_history,
            self.config.scan_patterns_on_bar,
        )?;

        let mut sessions = self.sessions.write();
        if sessions.contains_key(&chart_id) {
            return Err(ChartError::Configuration(format!("chart {chart_id} is already open")));
        }
        sessions.insert(
            chart_id.clone(),
            ChartSlot {
                symbol,
                timeframe,
                coalesce,
                session: Arc::new(Mutex::new(session)),
            },
        );
        info!(chart_id = %chart_id, open_charts = sessions.len(), "chart opened");
        Ok(chart_id)
    }

    /// Drop a chart.  Its feed worker, if any, is told to stop; anything it
    /// computes afterwards is discarded.
    pub fn close_chart(&self, chart_id: &str) -> Result<()> {
        let slot = self
            .sessions
            .write()
            .remove(chart_id)
            .ok_or_else(|| ChartError::NotFound(format!("chart {chart_id}")))?;
        slot.session.lock().close();

        if let Some(feed) = self.feeds.lock().remove(chart_id) {
            feed.stop();
        }
        info!(chart_id, "chart closed");
        Ok(())
    }

    // ── Ticks ───────────────────────────────────────────────────────────

    /// Run one tick through a chart and publish the result.
    pub fn add_tick(&self, chart_id: &str, tick: &Ohlcv) -> Result<SessionUpdate> {
        let session = self.session(chart_id)?;
        let mut session = session.lock();
        let update = session.process_tick(tick)?;
        self.publish(chart_id, &update);
        Ok(update)
    }

    /// Route a tick to every chart on (`symbol`, `timeframe`).
    ///
    /// Fails with the first per-chart error (normally `DataQuality`); the
    /// remaining charts still receive the tick.
    pub fn ingest_tick(&self, symbol: &str, timeframe: &str, tick: Ohlcv) -> Result<()> {
        let mut tick = tick;
        if tick.symbol.is_empty() {
            tick.symbol = symbol.to_string();
        }
        if tick.timeframe.is_empty() {
            tick.timeframe = timeframe.to_string();
        }

        let targets: Vec<(String, Arc<Mutex<ChartSession>>)> = self
            .sessions
            .read()
            .iter()
            .filter(|(_, slot)| slot.accepts(symbol, timeframe))
            .map(|(id, slot)| (id.clone(), slot.session.clone()))
            .collect();

        if targets.is_empty() {
            debug!(symbol, timeframe, "no chart for tick");
            return Ok(());
        }

        let mut first_error = None;
        for (chart_id, session) in targets {
            let mut session = session.lock();
            match session.process_tick(&tick) {
                Ok(update) => self.publish(&chart_id, &update),
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn publish(&self, chart_id: &str, update: &SessionUpdate) {
        if update.is_empty() {
            return;
        }
        // A send error only means nobody is subscribed.
        for bar in &update.bars {
            let _ = self.events.send(ChartEvent::BarFinalized {
                chart_id: chart_id.to_string(),
                bar: bar.clone(),
            });
        }
        for ind in &update.indicators {
            let _ = self.events.send(ChartEvent::IndicatorUpdated {
                chart_id: chart_id.to_string(),
                indicator_id: ind.indicator_id.clone(),
                point: ind.point,
            });
        }
        for pattern in &update.patterns {
            let _ = self.events.send(ChartEvent::PatternDetected {
                chart_id: chart_id.to_string(),
                pattern: pattern.clone(),
            });
        }
    }

    // ── Indicators ──────────────────────────────────────────────────────

    pub fn add_indicator(&self, chart_id: &str, params: IndicatorParams) -> Result<String> {
        self.session(chart_id)?.lock().add_indicator(params)
    }

    /// Attach an indicator by name with loose JSON parameters.
    pub fn add_indicator_by_name(&self, chart_id: &str, name: &str, params: &Value) -> Result<String> {
        let params = IndicatorParams::from_name(name, params)?;
        self.add_indicator(chart_id, params)
    }

    pub fn remove_indicator(&self, chart_id: &str, indicator_id: &str) -> Result<()> {
        self.session(chart_id)?.lock().remove_indicator(indicator_id)?;
        Ok(())
    }

    // ── Patterns ────────────────────────────────────────────────────────

    /// Scan a chart now.  `kinds` are pattern names; empty means every kind
    /// the chart supports.
    pub fn detect_patterns(&self, chart_id: &str, kinds: &[&str]) -> Result<Vec<PatternMatch>> {
        let parsed = kinds
            .iter()
            .map(|k| k.parse::<PatternKind>())
            .collect::<Result<Vec<PatternKind>>>()?;
        let session = self.session(chart_id)?;
        let mut session = session.lock();
        let filter = (!parsed.is_empty()).then_some(parsed.as_slice());
        Ok(session.detect_patterns(filter))
    }

    pub fn active_patterns(&self, chart_id: &str) -> Result<Vec<PatternMatch>> {
        Ok(self.session(chart_id)?.lock().active_patterns())
    }

    pub fn get_series_snapshot(&self, chart_id: &str) -> Result<SeriesSnapshot> {
        Ok(self.session(chart_id)?.lock().snapshot())
    }

    // ── Feeds ───────────────────────────────────────────────────────────

    /// Start the queued feed for a chart.  Ticks pushed into the returned
    /// queue are processed in order by a dedicated task.
    pub fn start_feed(self: &Arc<Self>, chart_id: &str) -> Result<Arc<TickQueue>> {
        let coalesce = self
            .sessions
            .read()
            .get(chart_id)
            .map(|slot| slot.coalesce)
            .ok_or_else(|| ChartError::NotFound(format!("chart {chart_id}")))?;

        let mut feeds = self.feeds.lock();
        if let Some(existing) = feeds.get(chart_id) {
            if !existing.is_finished() {
                return Ok(existing.queue());
            }
        }

        let coordinator = Arc::clone(self);
        let id = chart_id.to_string();
        let feed = spawn_feed(
            id.clone(),
            self.config.feed_queue_capacity,
            coalesce,
            move |tick: &Ohlcv| coordinator.add_tick(&id, tick).map(|_| ()),
        );
        let queue = feed.queue();
        feeds.insert(chart_id.to_string(), feed);
        Ok(queue)
    }

    /// Close every feed queue and wait until each worker has processed the
    /// ticks already queued.  Charts stay open.
    pub async fn drain_feeds(&self) {
        let feeds: Vec<FeedHandle> = self.feeds.lock().drain().map(|(_, f)| f).collect();
        for feed in feeds {
            let id = feed.chart_id().to_string();
            feed.drain().await;
            debug!(chart_id = %id, "feed drained");
        }
    }

    /// Stop every feed and wait for the workers to finish.  Queued ticks are
    /// abandoned; call `drain_feeds` first to keep them.
    pub async fn shutdown(&self) {
        let feeds: Vec<FeedHandle> = self.feeds.lock().drain().map(|(_, f)| f).collect();
        for feed in feeds {
            let id = feed.chart_id().to_string();
            feed.join().await;
            debug!(chart_id = %id, "feed joined");
        }
        let open = self.sessions.read().len();
        if open > 0 {
            warn!(open_charts = open, "coordinator shut down with charts still open");
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ChartType, SizeMode};
    use serde_json::json;

    fn candle(t: i64, close: f64) -> Ohlcv {
        Ohlcv {
            timestamp: t * 60_000,
            open: close,
            high: close + 0.5,
            low: close - 0.5,
            close,
            volume: 5.0,
            symbol: String::new(),
            timeframe: String::new(),
        }
    }

    fn coordinator() -> ChartCoordinator {
        ChartCoordinator::new(EngineConfig::default())
    }

    #[test]
    fn open_assigns_uuid_and_rejects_duplicates() {
        let c = coordinator();
        let id = c.open_chart(ChartConfig::new("BTCUSDT", ChartType::Candlestick, "1m")).unwrap();
        assert!(Uuid::parse_str(&id).is_ok());

        let named = ChartConfig::new("BTCUSDT", ChartType::Candlestick, "1m").with_id("main");
        assert_eq!(c.open_chart(named.clone()).unwrap(), "main");
        assert!(matches!(c.open_chart(named), Err(ChartError::Configuration(_))));
        assert_eq!(c.chart_ids().len(), 2);
    }

    #[test]
    fn invalid_chart_config_fails_at_open() {
        let c = coordinator();
        let cfg = ChartConfig::new("BTCUSDT", ChartType::Kagi, "1m").with_kagi(-1.0, SizeMode::Points);
        assert!(matches!(c.open_chart(cfg), Err(ChartError::Configuration(_))));
        assert!(c.chart_ids().is_empty());
    }

    #[test]
    fn unknown_chart_is_not_found() {
        let c = coordinator();
        assert!(matches!(c.add_tick("nope", &candle(0, 1.0)), Err(ChartError::NotFound(_))));
        assert!(matches!(c.get_series_snapshot("nope"), Err(ChartError::NotFound(_))));
        assert!(matches!(c.close_chart("nope"), Err(ChartError::NotFound(_))));
        assert!(matches!(
            c.add_indicator("nope", IndicatorParams::Obv),
            Err(ChartError::NotFound(_))
        ));
    }

    #[test]
    fn indicator_management_errors() {
        let c = coordinator();
        let id = c.open_chart(ChartConfig::new("BTCUSDT", ChartType::Candlestick, "1m")).unwrap();
        assert!(matches!(
            c.add_indicator_by_name(&id, "zigzag", &json!({})),
            Err(ChartError::UnsupportedIndicator(_))
        ));
        assert!(matches!(c.remove_indicator(&id, "sma-9"), Err(ChartError::NotFound(_))));

        let ind = c.add_indicator_by_name(&id, "rsi", &json!({ "period": 7 })).unwrap();
        c.remove_indicator(&id, &ind).unwrap();
    }

    #[test]
    fn unknown_pattern_name_is_rejected() {
        let c = coordinator();
        let id = c.open_chart(ChartConfig::new("BTCUSDT", ChartType::Candlestick, "1m")).unwrap();
        assert!(matches!(
            c.detect_patterns(&id, &["elliott_wave"]),
            Err(ChartError::UnsupportedPattern(_))
        ));
        assert!(c.detect_patterns(&id, &[]).unwrap().is_empty());
    }

    #[test]
    fn ticks_publish_bar_and_indicator_events() {
        let c = coordinator();
        let id = c.open_chart(ChartConfig::new("BTCUSDT", ChartType::Candlestick, "1m")).unwrap();
        let sma = c.add_indicator(&id, IndicatorParams::Sma { period: 2 }).unwrap();
        let mut rx = c.subscribe();

        c.ingest_tick("BTCUSDT", "1m", candle(0, 100.0)).unwrap();
        c.ingest_tick("BTCUSDT", "1m", candle(1, 102.0)).unwrap();
        // Other symbols are ignored.
        c.ingest_tick("ETHUSDT", "1m", candle(2, 5.0)).unwrap();

        let mut bars = 0;
        let mut points = Vec::new();
        while let Ok(event) = rx.try_recv() {
            assert_eq!(event.chart_id(), id);
            match event {
                ChartEvent::BarFinalized { .. } => bars += 1,
                ChartEvent::IndicatorUpdated { indicator_id, point, .. } => {
                    assert_eq!(indicator_id, sma);
                    points.push(point.value.primary());
                }
                ChartEvent::PatternDetected { .. } => {}
            }
        }
        assert_eq!(bars, 2);
        assert_eq!(points, vec![101.0]);
    }

    #[test]
    fn rejected_tick_reports_and_chart_continues() {
        let c = coordinator();
        let id = c.open_chart(ChartConfig::new("BTCUSDT", ChartType::Candlestick, "1m")).unwrap();
        let mut bad = candle(0, 100.0);
        bad.volume = 0.0;
        assert!(c.ingest_tick("BTCUSDT", "1m", bad).unwrap_err().is_data_quality());
        c.ingest_tick("BTCUSDT", "1m", candle(1, 100.0)).unwrap();

        let snap = c.get_series_snapshot(&id).unwrap();
        assert_eq!(snap.rejected_ticks, 1);
        assert_eq!(snap.finalized.len(), 1);
    }

    #[test]
    fn closed_chart_is_gone() {
        let c = coordinator();
        let id = c.open_chart(ChartConfig::new("BTCUSDT", ChartType::Candlestick, "1m")).unwrap();
        c.close_chart(&id).unwrap();
        assert!(c.chart_ids().is_empty());
        assert!(matches!(c.add_tick(&id, &candle(0, 1.0)), Err(ChartError::NotFound(_))));
    }

    #[tokio::test]
    async fn feed_processes_queued_ticks() {
        let c = Arc::new(coordinator());
        let id = c.open_chart(ChartConfig::new("BTCUSDT", ChartType::Candlestick, "1m")).unwrap();
        let queue = c.start_feed(&id).unwrap();
        let mut rx = c.subscribe();

        for t in 0..5 {
            queue.push(candle(t, 100.0 + t as f64)).await.unwrap();
        }
        for _ in 0..5 {
            let event = tokio::time::timeout(std::time::Duration::from_secs(1), rx.recv())
                .await
                .unwrap()
                .unwrap();
            assert!(matches!(event, ChartEvent::BarFinalized { .. }));
        }
        assert_eq!(c.get_series_snapshot(&id).unwrap().finalized.len(), 5);

        c.close_chart(&id).unwrap();
        c.shutdown().await;
    }

    #[test]
    fn routing_does_not_wait_on_busy_sessions() {
        let c = Arc::new(coordinator());
        let btc = c.open_chart(ChartConfig::new("BTCUSDT", ChartType::Candlestick, "1m")).unwrap();
        let eth = c.open_chart(ChartConfig::new("ETHUSDT", ChartType::Candlestick, "1m")).unwrap();

        // Keep the BTC session busy while an ETH tick is routed.
        let busy = c.session(&btc).unwrap();
        let guard = busy.lock();

        let (tx, rx) = std::sync::mpsc::channel();
        let router = {
            let c = c.clone();
            std::thread::spawn(move || {
                let _ = tx.send(c.ingest_tick("ETHUSDT", "1m", candle(0, 10.0)));
            })
        };
        let routed = rx.recv_timeout(std::time::Duration::from_secs(2));
        drop(guard);
        router.join().unwrap();

        assert!(matches!(routed, Ok(Ok(()))));
        assert_eq!(c.get_series_snapshot(&eth).unwrap().finalized.len(), 1);
        assert!(c.get_series_snapshot(&btc).unwrap().finalized.is_empty());
    }

    #[tokio::test]
    async fn drain_feeds_finishes_queued_ticks() {
        let c = Arc::new(coordinator());
        let id = c.open_chart(ChartConfig::new("BTCUSDT", ChartType::Candlestick, "1m")).unwrap();
        let queue = c.start_feed(&id).unwrap();
        for t in 0..50 {
            queue.push(candle(t, 100.0)).await.unwrap();
        }

        c.drain_feeds().await;
        assert!(queue.is_closed());
        assert_eq!(c.get_series_snapshot(&id).unwrap().finalized.len(), 50);
        // The chart itself is still open.
        c.add_tick(&id, &candle(50, 100.0)).unwrap();
    }
}
