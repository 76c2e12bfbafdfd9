//! Error taxonomy for a benchmark run.
//!
//! Only fatal conditions live here. Throttled invocations, warm starts and
//! log entries that have not been ingested yet are ordinary outcomes and are
//! absorbed by the component that observes them.

use thiserror::Error;

/// Failures that abort a whole run.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Listing functions or fetching their tags failed. Usually a broken
    /// credential or permission setup, never retried.
    #[error("Function discovery failed: {0}")]
    Discovery(String),

    #[error("Failed to invoke function '{function}': {message}")]
    Invocation { function: String, message: String },

    #[error("Failed to extract startup duration for '{function}'")]
    Extraction {
        function: String,
        #[source]
        source: ExtractError,
    },

    #[error("Benchmark run was cancelled")]
    Cancelled,

    #[error("Invocation worker terminated abnormally: {0}")]
    Worker(String),
}

/// Failures raised while turning an invocation response into a sample.
#[derive(Error, Debug)]
pub enum ExtractError {
    /// A duration marker was found but its value is not a number.
    #[error("Malformed {marker} value '{value}'")]
    MarkerParse { marker: &'static str, value: String },

    #[error("Failed to decode log tail: {0}")]
    Decode(String),

    #[error("Invocation response did not include a log stream name: {0}")]
    MissingLogStream(String),

    #[error("Log store read failed: {0}")]
    LogStore(String),

    #[error("Polling was cancelled")]
    Cancelled,
}
