//! Error types for metrics capture and delivery.
//!
//! None of these ever cross into the host application's request cycle:
//! [`ConfigError`] is returned once at construction time, while
//! [`PayloadBuildError`] and [`DeliveryError`] are logged and swallowed by
//! the controller and the publisher.

use thiserror::Error;

/// Invalid or incomplete [`MetricsConfig`](crate::MetricsConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Both an allow-list and a deny-list were supplied.
    #[error("allow-list and deny-list are mutually exclusive, configure at most one")]
    ConflictingFilters,

    /// The flush threshold must be a positive integer.
    #[error("flush threshold must be greater than zero")]
    InvalidFlushThreshold,

    /// Background mode needs at least one flush worker.
    #[error("flush worker count must be greater than zero")]
    InvalidWorkerCount,

    /// No API key was configured.
    #[error("an API key is required")]
    MissingApiKey,

    /// No grouping function was configured.
    #[error("a grouping function is required")]
    MissingGroupingFunction,

    /// A grouping function was requested by a name the registry doesn't know.
    #[error("unknown grouping function: {0}")]
    UnknownGroupingFunction(String),

    /// The metrics API endpoint is not an absolute http(s) URL.
    #[error("invalid metrics endpoint `{endpoint}`: {reason}")]
    InvalidEndpoint {
        /// The configured endpoint.
        endpoint: String,
        /// Why it was rejected.
        reason: String,
    },

    /// The HTTP client could not be constructed.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[from] reqwest::Error),

    /// Environment variables could not be deserialized.
    #[cfg(feature = "env")]
    #[error("environment configuration error: {0}")]
    Env(#[from] envy::Error),
}

/// Building a payload for a single request failed.
///
/// The request is dropped from metrics; the host application is unaffected.
#[derive(Debug, Error)]
pub enum PayloadBuildError {
    /// A body could not be re-serialized after filtering.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The grouping function or the builder panicked.
    #[error("payload construction panicked: {0}")]
    Panicked(String),
}

/// Delivering a batch to the collection endpoint failed.
///
/// The batch is dropped; there is no retry at this layer.
#[derive(Debug, Error)]
pub enum DeliveryError {
    /// The batch could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Transport-level failure (connect, TLS, timeout inside the client).
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("metrics API returned status {0}")]
    Status(http::StatusCode),

    /// No answer within the configured timeout.
    #[error("delivery timed out")]
    Timeout,

    /// The delivery thread or runtime could not be started.
    #[error("delivery worker error: {0}")]
    Worker(String),

    /// A custom transport panicked.
    #[error("transport panicked: {0}")]
    Panicked(String),
}

/// Render a `catch_unwind` payload as a message.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
