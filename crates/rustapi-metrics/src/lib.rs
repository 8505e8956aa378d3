//! # rustapi-metrics
//!
//! Request/response metrics capture for RustAPI applications.
//!
//! For every request/response pair, a HAR payload is built (method, URL,
//! headers, bodies, timing and a grouping identity), queued in memory and
//! shipped in batches to a remote metrics API. Nothing in this crate can
//! fail or panic into the host application's request handling.
//!
//! ## Pipeline
//!
//! ```text
//! adapter ──→ Metrics::process ──→ PayloadBuilder ──→ PayloadQueue
//!                                                        │ len >= flush_threshold
//!                                                        ▼
//!                                  inline (foreground) or FlushWorkers (background)
//!                                                        │
//!                                                        ▼
//!                                   BatchPublisher ──→ Transport (HTTP POST)
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use rustapi_metrics::{Group, Metrics, MetricsConfig};
//!
//! let metrics = Metrics::new(
//!     MetricsConfig::new("my-api-key")
//!         .flush_threshold(10)
//!         .deny_list(["authorization", "password"])
//!         .grouping_fn(|req, _res| {
//!             req.headers().get("x-api-key")?.to_str().ok().map(Group::new)
//!         }),
//! )?;
//! ```
//!
//! The adapter captures a [`RequestSnapshot`] before the handler runs, a
//! [`ResponseSnapshot`] after, and calls [`Metrics::process`]. The
//! application calls [`Metrics::shutdown`] once while shutting down so
//! queued payloads are delivered.
//!
//! ## Features
//!
//! - `env` (default) - [`MetricsConfig::from_env`] loads `README_METRICS_*`
//!   variables

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod controller;
pub mod error;
pub mod filter;
pub mod grouping;
pub mod payload;
pub mod publisher;
pub mod queue;
pub mod snapshot;
mod worker;

pub use config::MetricsConfig;
pub use controller::{Metrics, ProcessOutcome};
pub use error::{ConfigError, DeliveryError, PayloadBuildError};
pub use filter::{FieldFilter, FieldPath};
pub use grouping::{Group, GroupingFn, GroupingRegistry};
pub use payload::{Payload, PayloadBuilder};
pub use publisher::{BatchPublisher, FlushOutcome, HttpTransport, Transport};
pub use queue::PayloadQueue;
pub use snapshot::{RequestSnapshot, ResponseSnapshot, INVALID_UTF8_BODY};
