// =============================================================================
// Error taxonomy for the chart engine
// =============================================================================
//
// Only `Configuration` is fatal, and only at chart creation.  Everything else
// is reported for the offending tick / request and the chart keeps running.
// "Not enough data" is never an error: callers receive an empty series or an
// empty match list instead.

use thiserror::Error;

/// The unified error type for the chart engine.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ChartError {
    /// A tick failed validation (non-finite price, non-positive volume, ...).
    /// Non-fatal: the tick is skipped and processing continues.
    #[error("data quality error: {0}")]
    DataQuality(String),

    /// Invalid chart or indicator parameters.  Fatal at creation time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Unknown chart id or indicator id.
    #[error("not found: {0}")]
    NotFound(String),

    /// The requested indicator type is not part of the indicator library.
    #[error("unsupported indicator: {0}")]
    UnsupportedIndicator(String),

    /// The requested pattern kind is not known to the detector.
    #[error("unsupported pattern: {0}")]
    UnsupportedPattern(String),
}

impl ChartError {
    /// `true` for errors that only affect a single tick.
    pub fn is_data_quality(&self) -> bool {
        matches!(self, Self::DataQuality(_))
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ChartError>;
