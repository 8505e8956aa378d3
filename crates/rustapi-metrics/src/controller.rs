//! The metrics controller.
//!
//! [`Metrics`] receives request/response pairs from a framework adapter,
//! builds payloads, queues them and decides when and where to flush.

use crate::config::MetricsConfig;
use crate::error::{panic_message, ConfigError, PayloadBuildError};
use crate::payload::PayloadBuilder;
use crate::publisher::{BatchPublisher, HttpTransport, Transport};
use crate::queue::PayloadQueue;
use crate::snapshot::{RequestSnapshot, ResponseSnapshot};
use crate::worker::{run_flush, FlushWorkers, InFlight};
use std::backtrace::Backtrace;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// What [`Metrics::process`] did with a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The payload was queued; `queue_len` is the length right after the push.
    Queued {
        /// Queue length after the push.
        queue_len: usize,
    },
    /// The request's host is not in the allowed host set.
    HostNotAllowed,
    /// The grouping function declined the request.
    Dropped,
    /// Building the payload failed; the request was skipped.
    Failed,
}

/// Request metrics controller.
///
/// Cheap to clone; clones share the queue and the flush workers. Safe to
/// call from any number of request-handling threads.
///
/// # Example
///
/// ```ignore
/// use rustapi_metrics::{Group, Metrics, MetricsConfig, RequestSnapshot, ResponseSnapshot};
///
/// let metrics = Metrics::new(
///     MetricsConfig::new("my-api-key")
///         .grouping_fn(|req, _res| {
///             req.headers().get("x-api-key")?.to_str().ok().map(Group::new)
///         }),
/// )?;
///
/// // per request, from the framework adapter
/// let request = RequestSnapshot::from_parts(&parts, body.clone());
/// // ... run the handler ...
/// let response = ResponseSnapshot::from_parts(&res_parts, &res_body);
/// metrics.process(&request, &response);
///
/// // once, during application shutdown
/// metrics.shutdown();
/// ```
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<Inner>,
}

struct Inner {
    config: MetricsConfig,
    builder: PayloadBuilder,
    queue: Arc<PayloadQueue>,
    publisher: BatchPublisher,
    in_flight: Arc<InFlight>,
    workers: Option<FlushWorkers>,
    shut_down: AtomicBool,
}

impl Metrics {
    /// Create a controller delivering over HTTP to the configured endpoint.
    pub fn new(config: MetricsConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let transport = HttpTransport::new(&config.endpoint, config.api_key.clone(), config.timeout)?;
        Self::with_transport(config, transport)
    }

    /// Create a controller delivering through a custom transport.
    pub fn with_transport<T: Transport>(
        config: MetricsConfig,
        transport: T,
    ) -> Result<Self, ConfigError> {
        let filter = config.validate()?;
        let grouping = config
            .grouping
            .clone()
            .ok_or(ConfigError::MissingGroupingFunction)?;

        let builder = PayloadBuilder::new(filter, config.development_mode, grouping);
        let queue = Arc::new(PayloadQueue::new());
        let publisher = BatchPublisher::new(
            Arc::new(transport),
            config.flush_threshold,
            config.development_mode,
        );
        let in_flight = Arc::new(InFlight::default());

        let workers = config.background_mode.then(|| {
            FlushWorkers::start(
                config.flush_workers,
                publisher.clone(),
                queue.clone(),
                in_flight.clone(),
            )
        });

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                builder,
                queue,
                publisher,
                in_flight,
                workers,
                shut_down: AtomicBool::new(false),
            }),
        })
    }

    /// Record one request/response pair.
    ///
    /// Never fails and never panics into the caller. In foreground mode this
    /// blocks on delivery whenever the queue reaches the flush threshold.
    pub fn process(&self, request: &RequestSnapshot, response: &ResponseSnapshot) -> ProcessOutcome {
        let host = request.host();
        if !self.host_allowed(host) {
            tracing::debug!(
                host = host.unwrap_or("<none>"),
                "not enqueueing request, host not in allowed hosts"
            );
            return ProcessOutcome::HostNotAllowed;
        }

        let built = catch_unwind(AssertUnwindSafe(|| self.inner.builder.build(request, response)))
            .unwrap_or_else(|panic| {
                Err(PayloadBuildError::Panicked(panic_message(panic.as_ref())))
            });

        let payload = match built {
            Ok(Some(payload)) => payload,
            Ok(None) => {
                tracing::debug!("not enqueueing request, grouping function declined it");
                return ProcessOutcome::Dropped;
            }
            Err(e) => {
                tracing::debug!(error = %e, "not enqueueing request, payload construction failed");
                if self.inner.config.development_mode {
                    tracing::error!(
                        error = ?e,
                        backtrace = %Backtrace::force_capture(),
                        "payload construction failed"
                    );
                }
                return ProcessOutcome::Failed;
            }
        };

        let queue_len = self.inner.queue.push(payload);
        if queue_len >= self.inner.config.flush_threshold {
            self.trigger_flush();
        }
        ProcessOutcome::Queued { queue_len }
    }

    /// Drain what is left and wait for every flush to finish.
    ///
    /// Call once from the application's shutdown sequence. Later calls are
    /// no-ops. Requests processed concurrently with shutdown may or may not
    /// make the final drain.
    pub fn shutdown(&self) {
        if self.inner.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let pending = self.inner.queue.len();
        if pending > 0 {
            let threshold = self.inner.config.flush_threshold;
            let rounds = (pending + threshold - 1) / threshold;
            tracing::debug!(pending, rounds, "flushing remaining metrics on shutdown");
            for _ in 0..rounds {
                self.trigger_flush();
            }
        }

        self.inner.in_flight.wait_idle();
        if let Some(workers) = &self.inner.workers {
            workers.close();
        }
    }

    /// Whether traffic for `host` is recorded.
    ///
    /// True when no allowed hosts are configured, else a membership test.
    pub fn host_allowed(&self, host: Option<&str>) -> bool {
        self.inner.config.host_allowed(host)
    }

    /// Number of queued payloads.
    pub fn queue_len(&self) -> usize {
        self.inner.queue.len()
    }

    /// Number of flushes scheduled or running.
    pub fn in_flight_flushes(&self) -> usize {
        self.inner.in_flight.current()
    }

    /// Whether [`shutdown`](Self::shutdown) has been called.
    pub fn is_shut_down(&self) -> bool {
        self.inner.shut_down.load(Ordering::SeqCst)
    }

    /// Schedule one flush on the pool, or run it inline.
    fn trigger_flush(&self) {
        let inner = &self.inner;
        inner.in_flight.begin();

        if let Some(workers) = &inner.workers {
            if workers.schedule() {
                return;
            }
            tracing::debug!("flush workers closed, flushing inline");
        }

        run_flush(&inner.publisher, &inner.queue, &inner.in_flight);
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics")
            .field("config", &self.inner.config)
            .field("queue_len", &self.queue_len())
            .field("in_flight_flushes", &self.in_flight_flushes())
            .field("shut_down", &self.is_shut_down())
            .finish()
    }
}
