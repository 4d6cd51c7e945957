//! Error types for observer instruments

use std::time::Duration;

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building, collecting or exporting observers
#[derive(Error, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Instrument Errors
    // =========================================================================
    /// Instrument name rejected by the meter
    #[error("Invalid instrument name '{name}': {reason}")]
    InvalidInstrumentName { name: String, reason: String },

    /// An instrument with this name is already registered
    #[error("Instrument already registered: {0}")]
    DuplicateInstrument(String),

    /// Label key not declared on the instrument
    #[error("Label key '{key}' is not declared for instrument {instrument}")]
    UnexpectedLabelKey { instrument: String, key: String },

    // =========================================================================
    // Collection Errors
    // =========================================================================
    /// The registered callback failed part way through a cycle
    #[error("Callback failed in cycle {cycle_id} after {partial_results} results: {detail}")]
    CallbackFailure {
        cycle_id: u64,
        partial_results: usize,
        detail: String,
    },

    /// Collection exceeded the scheduler's budget
    #[error("Collection of {instrument} timed out after {timeout:?}")]
    CollectionTimeout {
        instrument: String,
        timeout: Duration,
    },

    /// An earlier collection of the instrument has not returned yet
    #[error("Previous collection of {0} is still running")]
    CollectionInProgress(String),

    // =========================================================================
    // Export Errors
    // =========================================================================
    /// Exporter rejected or failed to deliver a batch
    #[error("Export via {exporter} failed: {reason}")]
    Export { exporter: String, reason: String },

    /// Prometheus registry error
    #[error("Prometheus error: {0}")]
    Prometheus(#[from] prometheus::Error),

    /// JSON serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
