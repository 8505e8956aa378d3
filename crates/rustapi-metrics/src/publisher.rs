//! Batch delivery to the remote metrics API.

use crate::error::{panic_message, ConfigError, DeliveryError};
use crate::payload::Payload;
use crate::queue::PayloadQueue;
use std::backtrace::Backtrace;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// Default collection endpoint.
pub const DEFAULT_ENDPOINT: &str = "https://metrics.readme.io";

/// Path batches are POSTed to, relative to the endpoint.
pub const REQUEST_PATH: &str = "/v1/request";

/// Delivers one batch in a single transmission.
///
/// Implementations block until the batch is delivered or has failed and
/// must bound that wait themselves.
pub trait Transport: Send + Sync + 'static {
    /// Deliver `batch`.
    fn send(&self, batch: &[Payload]) -> Result<(), DeliveryError>;
}

/// HTTP transport posting JSON arrays to the metrics API.
///
/// Authenticates with HTTP Basic auth, the API key as user name and an
/// empty password.
///
/// # Example
///
/// ```ignore
/// use rustapi_metrics::publisher::HttpTransport;
/// use std::time::Duration;
///
/// let transport = HttpTransport::new("https://metrics.readme.io", "my-api-key", Duration::from_secs(3))?;
/// ```
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    api_key: String,
    timeout: Duration,
}

impl HttpTransport {
    /// Create a transport for `endpoint`.
    ///
    /// The endpoint must be an absolute `http` or `https` URL.
    pub fn new(
        endpoint: impl AsRef<str>,
        api_key: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let endpoint = endpoint.as_ref().trim_end_matches('/');
        let invalid = |reason: String| ConfigError::InvalidEndpoint {
            endpoint: endpoint.to_string(),
            reason,
        };
        let parsed = reqwest::Url::parse(endpoint).map_err(|e| invalid(e.to_string()))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme `{}`", parsed.scheme())));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("rustapi-metrics/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: format!("{}{}", endpoint, REQUEST_PATH),
            api_key: api_key.into(),
            timeout,
        })
    }

    /// Full URL batches are sent to.
    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for HttpTransport {
    fn send(&self, batch: &[Payload]) -> Result<(), DeliveryError> {
        let body = serde_json::to_vec(batch)?;
        let (tx, rx) = mpsc::channel();
        let client = self.client.clone();
        let url = self.url.clone();
        let api_key = self.api_key.clone();

        // The request runs on its own thread and runtime so this call works
        // from plain threads and from inside an async handler alike.
        std::thread::Builder::new()
            .name("rustapi-metrics-http".to_string())
            .spawn(move || {
                let rt = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(rt) => rt,
                    Err(e) => {
                        let _ = tx.send(Err(DeliveryError::Worker(e.to_string())));
                        return;
                    }
                };

                let result = rt.block_on(async {
                    let request = client
                        .post(&url)
                        .basic_auth(api_key, Some(""))
                        .header(http::header::CONTENT_TYPE, "application/json")
                        .body(body);

                    match request.send().await {
                        Ok(response) if response.status().is_success() => Ok(()),
                        Ok(response) => Err(DeliveryError::Status(response.status())),
                        Err(e) => Err(DeliveryError::Http(e)),
                    }
                });

                let _ = tx.send(result);
            })
            .map_err(|e| DeliveryError::Worker(e.to_string()))?;

        rx.recv_timeout(self.timeout + Duration::from_secs(1))
            .map_err(|_| DeliveryError::Timeout)?
    }
}

impl std::fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpTransport")
            .field("url", &self.url)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

/// Result of one flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was queued; no network call was made.
    Empty,
    /// The batch was delivered.
    Delivered(usize),
    /// Delivery failed and the batch was dropped.
    Failed(usize),
}

/// Drains batches from a [`PayloadQueue`] and hands them to a [`Transport`].
#[derive(Clone)]
pub struct BatchPublisher {
    transport: Arc<dyn Transport>,
    batch_size: usize,
    development_mode: bool,
}

impl BatchPublisher {
    /// Create a publisher draining at most `batch_size` payloads per flush.
    pub fn new(transport: Arc<dyn Transport>, batch_size: usize, development_mode: bool) -> Self {
        Self {
            transport,
            batch_size: batch_size.max(1),
            development_mode,
        }
    }

    /// Drain one batch and deliver it.
    ///
    /// Payloads enqueued after the drain are left for the next flush.
    /// Failures are logged, never returned: the drained batch is dropped.
    pub fn publish_batch(&self, queue: &PayloadQueue) -> FlushOutcome {
        let batch = queue.drain(self.batch_size);
        if batch.is_empty() {
            return FlushOutcome::Empty;
        }
        let count = batch.len();

        let result = catch_unwind(AssertUnwindSafe(|| self.transport.send(&batch)))
            .unwrap_or_else(|panic| Err(DeliveryError::Panicked(panic_message(panic.as_ref()))));

        match result {
            Ok(()) => {
                tracing::debug!(count, "delivered metrics batch");
                FlushOutcome::Delivered(count)
            }
            Err(e) => {
                tracing::warn!(count, error = %e, "failed to deliver metrics batch, dropping it");
                if self.development_mode {
                    tracing::error!(
                        count,
                        error = ?e,
                        backtrace = %Backtrace::force_capture(),
                        "metrics delivery failure"
                    );
                }
                FlushOutcome::Failed(count)
            }
        }
    }
}

impl std::fmt::Debug for BatchPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchPublisher")
            .field("batch_size", &self.batch_size)
            .field("development_mode", &self.development_mode)
            .finish_non_exhaustive()
    }
}
