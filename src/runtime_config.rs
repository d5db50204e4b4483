// =============================================================================
// Engine Configuration — charts, pattern thresholds and queue sizes
// =============================================================================
//
// Everything the binary needs to bring the engine up: which charts to open,
// how the pattern scanners are tuned, and how large the feed queues and the
// event channel are.
//
// Persistence uses an atomic tmp + rename pattern to prevent corruption on
// crash.  All fields carry `#[serde(default)]` so that adding new fields
// never breaks loading an older config file.
//
// =============================================================================

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::indicators::{IndicatorKind, IndicatorParams};
use crate::patterns::PatternConfig;
use crate::session::ChartConfig;
use crate::types::ChartType;

/// Environment variable naming the config file.
pub const CONFIG_PATH_ENV: &str = "CHART_ENGINE_CONFIG";

/// Used when `CHART_ENGINE_CONFIG` is unset.
pub const DEFAULT_CONFIG_PATH: &str = "engine_config.json";

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_true() -> bool {
    true
}

fn default_feed_queue_capacity() -> usize {
    1024
}

fn default_event_channel_capacity() -> usize {
    4096
}

fn default_max_pattern_history() -> usize {
    500
}

fn default_charts() -> Vec<ChartConfig> {
    vec![ChartConfig::new("BTCUSDT", ChartType::Candlestick, "1m")
        .with_id("btcusdt-1m")
        .with_indicator(IndicatorParams::default_for(IndicatorKind::Ema))
        .with_indicator(IndicatorParams::default_for(IndicatorKind::Rsi))
        .with_indicator(IndicatorParams::default_for(IndicatorKind::Macd))]
}

// =============================================================================
// EngineConfig
// =============================================================================

/// Top-level configuration for the chart engine.
///
/// Every field has a serde default so that older JSON files missing new fields
/// will still deserialise correctly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    // --- Charts --------------------------------------------------------------

    /// Charts opened at startup.
    #[serde(default = "default_charts")]
    pub charts: Vec<ChartConfig>,

    // --- Patterns ------------------------------------------------------------

    /// Thresholds shared by the built-in pattern scanners.
    #[serde(default)]
    pub pattern: PatternConfig,

    /// Rescan for patterns whenever a tick finalizes a bar.
    #[serde(default = "default_true")]
    pub scan_patterns_on_bar: bool,

    /// Matches remembered per chart (active and stale).
    #[serde(default = "default_max_pattern_history")]
    pub max_pattern_history: usize,

    // --- Plumbing ------------------------------------------------------------

    /// Ticks buffered per chart feed before producers wait.
    #[serde(default = "default_feed_queue_capacity")]
    pub feed_queue_capacity: usize,

    /// Events buffered for slow subscribers before they start lagging.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            charts: default_charts(),
            pattern: PatternConfig::default(),
            scan_patterns_on_bar: true,
            max_pattern_history: default_max_pattern_history(),
            feed_queue_capacity: default_feed_queue_capacity(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

impl EngineConfig {
    /// Config file location: `$CHART_ENGINE_CONFIG` or `engine_config.json`.
    pub fn path_from_env() -> PathBuf {
        std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read engine config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse engine config from {}", path.display()))?;

        info!(
            path = %path.display(),
            charts = config.charts.len(),
            feed_queue_capacity = config.feed_queue_capacity,
            "engine config loaded"
        );

        Ok(config)
    }

    /// `load`, falling back to defaults with a warning.
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        Self::load(path).unwrap_or_else(|e| {
            warn!(path = %path.display(), error = %e, "failed to load engine config, using defaults");
            Self::default()
        })
    }

    /// Persist the current configuration to `path` using an atomic write
    /// (write to `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content = serde_json::to_string_pretty(self)
            .context("failed to serialise engine config to JSON")?;

        // Atomic write: write to a temporary sibling file, then rename.
        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "engine config saved (atomic)");
        Ok(())
    }
}
