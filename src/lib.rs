// =============================================================================
// Chart Engine — technical-analysis core
// =============================================================================
//
// Turns per-symbol OHLCV streams into alternative bar representations
// (candles, Kagi lines, range bars), keeps technical indicators current over
// them and scans them for candlestick, structural, Kagi and range-bar
// patterns.
//
//   types / error      shared data model and error taxonomy
//   bars               bar formation engine and the finalized series
//   indicators         streaming indicator library
//   patterns           rule-based pattern sources, detector and cache
//   session            one chart: engine + series + indicators + patterns
//   coordinator        chart table, tick routing, event broadcast
//   feed               bounded per-chart tick queues and their workers
//   runtime_config     engine configuration with atomic save
// =============================================================================

pub mod bars;
pub mod coordinator;
pub mod error;
pub mod feed;
pub mod indicators;
pub mod patterns;
pub mod runtime_config;
pub mod session;
pub mod types;

pub use coordinator::{ChartCoordinator, ChartEvent};
pub use error::{ChartError, Result};
pub use runtime_config::EngineConfig;
pub use session::{ChartConfig, ChartSession, SeriesSnapshot, SessionUpdate};
pub use types::{ChartType, Ohlcv, SizeMode};
