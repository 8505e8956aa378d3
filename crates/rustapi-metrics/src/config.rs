//! Configuration for the metrics controller.
//!
//! [`MetricsConfig`] is built once at startup and is read-only afterwards.

use crate::error::ConfigError;
use crate::filter::FieldFilter;
use crate::grouping::{Group, GroupingFn, GroupingRegistry};
use crate::publisher::DEFAULT_ENDPOINT;
use crate::snapshot::{RequestSnapshot, ResponseSnapshot};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

/// Configuration for [`Metrics`](crate::Metrics).
///
/// ```ignore
/// use rustapi_metrics::{Group, MetricsConfig};
///
/// let config = MetricsConfig::new("my-api-key")
///     .flush_threshold(20)
///     .background_mode(true)
///     .deny_list(["authorization", "password"])
///     .allowed_host("api.example.com")
///     .grouping_fn(|req, _res| {
///         req.headers()
///             .get("x-api-key")
///             .and_then(|v| v.to_str().ok())
///             .map(Group::new)
///     });
/// ```
#[derive(Clone)]
pub struct MetricsConfig {
    /// Credential for the metrics API.
    pub(crate) api_key: String,

    /// Queue length that triggers a flush. Default: 10.
    pub(crate) flush_threshold: usize,

    /// Flush on background workers instead of the calling thread. Default: true.
    pub(crate) background_mode: bool,

    /// Number of background flush workers. Default: 1.
    pub(crate) flush_workers: usize,

    /// Fields to keep (mutually exclusive with `deny_list`).
    pub(crate) allow_list: Vec<String>,

    /// Fields to remove (mutually exclusive with `allow_list`).
    pub(crate) deny_list: Vec<String>,

    /// Assigns each request a group, or declines it.
    pub(crate) grouping: Option<GroupingFn>,

    /// Hosts whose traffic is recorded. Empty = all hosts.
    pub(crate) allowed_hosts: HashSet<String>,

    /// Verbose failure diagnostics. Never affects delivery. Default: false.
    pub(crate) development_mode: bool,

    /// Base URL of the metrics API.
    pub(crate) endpoint: String,

    /// Per-request delivery timeout. Default: 3 seconds.
    pub(crate) timeout: Duration,
}

impl MetricsConfig {
    /// Create a configuration with default values.
    ///
    /// Defaults:
    /// - Flush threshold: 10
    /// - Background mode, one flush worker
    /// - No field filtering, all hosts allowed
    /// - Development mode off
    /// - Endpoint `https://metrics.readme.io`, 3 second timeout
    ///
    /// A grouping function must still be supplied.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            flush_threshold: 10,
            background_mode: true,
            flush_workers: 1,
            allow_list: Vec::new(),
            deny_list: Vec::new(),
            grouping: None,
            allowed_hosts: HashSet::new(),
            development_mode: false,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout: Duration::from_secs(3),
        }
    }

    /// Set the queue length that triggers a flush.
    pub fn flush_threshold(mut self, threshold: usize) -> Self {
        self.flush_threshold = threshold;
        self
    }

    /// Flush on background workers (true) or inline on the request thread.
    pub fn background_mode(mut self, enabled: bool) -> Self {
        self.background_mode = enabled;
        self
    }

    /// Set the number of background flush workers.
    pub fn flush_workers(mut self, workers: usize) -> Self {
        self.flush_workers = workers;
        self
    }

    /// Keep only these field paths.
    pub fn allow_list(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allow_list = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Remove these field paths.
    pub fn deny_list(mut self, fields: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.deny_list = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Set the grouping function.
    pub fn grouping_fn<F>(mut self, function: F) -> Self
    where
        F: Fn(&RequestSnapshot, &ResponseSnapshot) -> Option<Group> + Send + Sync + 'static,
    {
        self.grouping = Some(Arc::new(function));
        self
    }

    /// Set an already shared grouping function.
    pub fn grouping(mut self, function: GroupingFn) -> Self {
        self.grouping = Some(function);
        self
    }

    /// Use a grouping function registered under `name`.
    pub fn grouping_named(
        self,
        name: &str,
        registry: &GroupingRegistry,
    ) -> Result<Self, ConfigError> {
        Ok(self.grouping(registry.resolve(name)?))
    }

    /// Record traffic only for this host (may be called repeatedly).
    pub fn allowed_host(mut self, host: impl Into<String>) -> Self {
        self.allowed_hosts.insert(host.into());
        self
    }

    /// Record traffic only for these hosts.
    pub fn allowed_hosts(mut self, hosts: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.allowed_hosts = hosts.into_iter().map(Into::into).collect();
        self
    }

    /// Enable verbose failure diagnostics.
    pub fn development_mode(mut self, enabled: bool) -> Self {
        self.development_mode = enabled;
        self
    }

    /// Set the metrics API base URL.
    pub fn endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the delivery timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Check the configuration and derive the field filter.
    pub fn validate(&self) -> Result<FieldFilter, ConfigError> {
        if self.api_key.trim().is_empty() {
            return Err(ConfigError::MissingApiKey);
        }
        if self.flush_threshold == 0 {
            return Err(ConfigError::InvalidFlushThreshold);
        }
        if self.background_mode && self.flush_workers == 0 {
            return Err(ConfigError::InvalidWorkerCount);
        }
        if self.grouping.is_none() {
            return Err(ConfigError::MissingGroupingFunction);
        }
        FieldFilter::from_lists(&self.allow_list, &self.deny_list)
    }

    /// Whether traffic for `host` should be recorded.
    pub(crate) fn host_allowed(&self, host: Option<&str>) -> bool {
        if self.allowed_hosts.is_empty() {
            return true;
        }
        host.map(|h| self.allowed_hosts.contains(h))
            .unwrap_or(false)
    }
}

#[cfg(feature = "env")]
mod env {
    use super::*;
    use serde::Deserialize;

    /// Raw `README_METRICS_*` variables.
    #[derive(Debug, Deserialize)]
    struct EnvConfig {
        api_key: String,
        buffer_length: Option<usize>,
        background_worker_mode: Option<bool>,
        flush_workers: Option<usize>,
        development_mode: Option<bool>,
        #[serde(default)]
        allowed_http_hosts: Vec<String>,
        #[serde(default)]
        allowlist: Vec<String>,
        #[serde(default)]
        denylist: Vec<String>,
        grouping_function: String,
        timeout_secs: Option<u64>,
        endpoint: Option<String>,
    }

    impl MetricsConfig {
        /// Environment variable prefix.
        pub const ENV_PREFIX: &'static str = "README_METRICS_";

        /// Load configuration from `README_METRICS_*` environment variables.
        ///
        /// `README_METRICS_GROUPING_FUNCTION` names a function in `registry`;
        /// lists are comma-separated.
        pub fn from_env(registry: &GroupingRegistry) -> Result<Self, ConfigError> {
            Self::from_vars(std::env::vars(), registry)
        }

        /// Load configuration from an explicit set of variables.
        pub fn from_vars<I>(vars: I, registry: &GroupingRegistry) -> Result<Self, ConfigError>
        where
            I: IntoIterator<Item = (String, String)>,
        {
            let raw: EnvConfig = envy::prefixed(Self::ENV_PREFIX).from_iter(vars)?;

            let mut config = Self::new(raw.api_key)
                .allow_list(raw.allowlist.into_iter().filter(|s| !s.trim().is_empty()))
                .deny_list(raw.denylist.into_iter().filter(|s| !s.trim().is_empty()))
                .allowed_hosts(
                    raw.allowed_http_hosts
                        .into_iter()
                        .map(|h| h.trim().to_string())
                        .filter(|h| !h.is_empty()),
                )
                .grouping_named(raw.grouping_function.trim(), registry)?;

            if let Some(n) = raw.buffer_length {
                config = config.flush_threshold(n);
            }
            if let Some(enabled) = raw.background_worker_mode {
                config = config.background_mode(enabled);
            }
            if let Some(n) = raw.flush_workers {
                config = config.flush_workers(n);
            }
            if let Some(enabled) = raw.development_mode {
                config = config.development_mode(enabled);
            }
            if let Some(secs) = raw.timeout_secs {
                config = config.timeout(Duration::from_secs(secs));
            }
            if let Some(endpoint) = raw.endpoint {
                config = config.endpoint(endpoint);
            }

            config.validate()?;
            Ok(config)
        }
    }
}

impl std::fmt::Debug for MetricsConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsConfig")
            .field("api_key", &"[REDACTED]")
            .field("flush_threshold", &self.flush_threshold)
            .field("background_mode", &self.background_mode)
            .field("flush_workers", &self.flush_workers)
            .field("allow_list", &self.allow_list)
            .field("deny_list", &self.deny_list)
            .field("grouping", &self.grouping.is_some())
            .field("allowed_hosts", &self.allowed_hosts)
            .field("development_mode", &self.development_mode)
            .field("endpoint", &self.endpoint)
            .field("timeout", &self.timeout)
            .finish()
    }
}
