// =============================================================================
// Chart Engine — Main Entry Point
// =============================================================================
//
// Opens the configured charts, replays a JSON-lines tick file through the
// queued feed path and logs every event the engine publishes.  Without a
// tick file the engine idles until Ctrl+C.
// =============================================================================

use std::sync::Arc;

use anyhow::Context;
use chrono::{TimeZone, Utc};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use chart_engine::feed::TickQueue;
use chart_engine::{ChartConfig, ChartCoordinator, ChartEvent, EngineConfig, Ohlcv};

/// Environment variable naming the JSON-lines tick file to replay.
const TICKS_PATH_ENV: &str = "CHART_ENGINE_TICKS";

fn fmt_ms(ms: i64) -> String {
    Utc.timestamp_millis_opt(ms)
        .single()
        .map(|t| t.format("%Y-%m-%d %H:%M:%S%.3f").to_string())
        .unwrap_or_else(|| ms.to_string())
}

fn log_event(event: &ChartEvent) {
    match event {
        ChartEvent::BarFinalized { chart_id, bar } => {
            let view = bar.bar();
            info!(
                chart_id = %chart_id,
                end = %fmt_ms(view.end_time),
                open = view.open,
                high = view.high,
                low = view.low,
                close = view.close,
                volume = view.volume,
                "bar finalized"
            );
        }
        ChartEvent::IndicatorUpdated { chart_id, indicator_id, point } => {
            debug!(
                chart_id = %chart_id,
                indicator_id = %indicator_id,
                at = %fmt_ms(point.timestamp),
                value = point.value.primary(),
                "indicator updated"
            );
        }
        ChartEvent::PatternDetected { chart_id, pattern } => {
            info!(
                chart_id = %chart_id,
                pattern = %pattern.kind,
                bullish = pattern.bullish,
                confidence = pattern.confidence,
                from = %fmt_ms(pattern.start_time),
                to = %fmt_ms(pattern.end_time),
                target = ?pattern.target_price,
                "pattern detected"
            );
        }
    }
}

/// Push every tick of a JSON-lines file into the queues of the charts it
/// belongs to.  Returns the number of ticks routed.
async fn replay(path: &str, feeds: &[(ChartConfig, Arc<TickQueue>)]) -> anyhow::Result<u64> {
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("failed to read tick file {path}"))?;

    let mut routed = 0u64;
    for (line_no, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let tick: Ohlcv = match serde_json::from_str(line) {
            Ok(t) => t,
            Err(e) => {
                warn!(line = line_no + 1, error = %e, "skipping malformed tick");
                continue;
            }
        };
        for (chart, queue) in feeds {
            if !chart.accepts(&tick.symbol, &tick.timeframe) {
                continue;
            }
            match queue.push(tick.clone()).await {
                Ok(_) => routed += 1,
                Err(back) => warn!(symbol = %back.symbol, timestamp = back.timestamp, "feed closed, tick not routed"),
            }
        }
    }
    Ok(routed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Chart Engine starting up");

    let config_path = EngineConfig::path_from_env();
    let config = EngineConfig::load_or_default(&config_path);

    // ── 2. Coordinator & charts ──────────────────────────────────────────
    let coordinator = Arc::new(ChartCoordinator::new(config.clone()));

    let mut feeds: Vec<(ChartConfig, Arc<TickQueue>)> = Vec::new();
    for chart in &config.charts {
        let chart_id = coordinator
            .open_chart(chart.clone())
            .with_context(|| format!("failed to open chart for {}", chart.symbol))?;
        let queue = coordinator.start_feed(&chart_id)?;
        feeds.push((chart.clone(), queue));
    }
    info!(charts = ?coordinator.chart_ids(), "charts open");

    // ── 3. Event logger ──────────────────────────────────────────────────
    let mut events = coordinator.subscribe();
    let logger = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "event logger lagged");
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    // ── 4. Replay or idle ────────────────────────────────────────────────
    match std::env::var(TICKS_PATH_ENV) {
        Ok(path) => {
            tokio::select! {
                result = replay(&path, &feeds) => {
                    let routed = result?;
                    info!(path = %path, routed, "tick replay complete");
                    coordinator.drain_feeds().await;
                }
                _ = tokio::signal::ctrl_c() => {
                    warn!("Shutdown signal received during replay");
                }
            }
        }
        Err(_) => {
            info!("{TICKS_PATH_ENV} not set; waiting for Ctrl+C");
            tokio::signal::ctrl_c().await?;
            warn!("Shutdown signal received");
        }
    }

    // ── 5. Summary & shutdown ────────────────────────────────────────────
    for chart_id in coordinator.chart_ids() {
        match coordinator.get_series_snapshot(&chart_id) {
            Ok(snap) => info!(
                chart_id = %chart_id,
                symbol = %snap.symbol,
                chart_type = %snap.chart_type,
                bars = snap.finalized.len(),
                accepted_ticks = snap.accepted_ticks,
                rejected_ticks = snap.rejected_ticks,
                active_patterns = snap.active_patterns.len(),
                "chart summary"
            ),
            Err(e) => error!(chart_id = %chart_id, error = %e, "snapshot failed"),
        }
        if let Err(e) = coordinator.close_chart(&chart_id) {
            error!(chart_id = %chart_id, error = %e, "close failed");
        }
    }
    coordinator.shutdown().await;
    logger.abort();

    info!("Chart Engine shut down complete.");
    Ok(())
}
