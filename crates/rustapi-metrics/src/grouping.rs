//! Grouping identities and the named grouping-function registry.

use crate::error::ConfigError;
use crate::snapshot::{RequestSnapshot, ResponseSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Identity a request is grouped under in the metrics dashboard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    /// Stable identifier of the caller, usually their API key.
    #[serde(rename = "id")]
    pub api_key: String,

    /// Display label.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,

    /// Contact email.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl Group {
    /// Create a group for `api_key`.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            label: None,
            email: None,
        }
    }

    /// Set the display label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set the contact email.
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub(crate) fn is_valid(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

/// Assigns a [`Group`] to a request/response pair.
///
/// Returning `None` means the request must not be logged.
pub type GroupingFn =
    Arc<dyn Fn(&RequestSnapshot, &ResponseSnapshot) -> Option<Group> + Send + Sync>;

/// Named grouping functions, resolved once while loading configuration.
///
/// ```ignore
/// use rustapi_metrics::{Group, GroupingRegistry};
///
/// let registry = GroupingRegistry::new().register("by_api_key", |req, _res| {
///     req.headers()
///         .get("x-api-key")
///         .and_then(|v| v.to_str().ok())
///         .map(Group::new)
/// });
/// let grouping = registry.resolve("by_api_key")?;
/// ```
#[derive(Clone, Default)]
pub struct GroupingRegistry {
    functions: HashMap<String, GroupingFn>,
}

impl GroupingRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `function` under `name`, replacing any previous entry.
    pub fn register<F>(mut self, name: impl Into<String>, function: F) -> Self
    where
        F: Fn(&RequestSnapshot, &ResponseSnapshot) -> Option<Group> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }

    /// Look up a grouping function by name.
    pub fn resolve(&self, name: &str) -> Result<GroupingFn, ConfigError> {
        self.functions
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownGroupingFunction(name.to_string()))
    }

    /// Registered names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.functions.keys().map(String::as_str)
    }
}

impl fmt::Debug for GroupingRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<_> = self.names().collect();
        names.sort_unstable();
        f.debug_struct("GroupingRegistry")
            .field("functions", &names)
            .finish()
    }
}
