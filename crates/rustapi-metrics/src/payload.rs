//! Payload construction.
//!
//! A [`Payload`] is one request/response pair rendered as a HAR document,
//! filtered through the configured [`FieldFilter`] and tagged with the
//! caller's [`Group`].

use crate::error::PayloadBuildError;
use crate::filter::FieldFilter;
use crate::grouping::{Group, GroupingFn};
use crate::snapshot::{RequestSnapshot, ResponseSnapshot};
use http::HeaderMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const CREATOR_NAME: &str = "rustapi-metrics";

/// A queued metrics record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payload {
    /// Unique identifier of this record.
    #[serde(rename = "_id")]
    pub id: Uuid,

    /// Grouping identity.
    pub group: Group,

    /// Client address.
    #[serde(rename = "clientIPAddress")]
    pub client_ip_address: String,

    /// Whether the record was produced in development mode.
    pub development: bool,

    /// HAR document describing the exchange.
    pub request: HarDocument,
}

/// HAR root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarDocument {
    /// The log.
    pub log: HarLog,
}

/// HAR log with a single entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarLog {
    /// Producer of the log.
    pub creator: HarCreator,
    /// Recorded exchanges.
    pub entries: Vec<HarEntry>,
}

/// Producer of a HAR log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarCreator {
    /// Library name.
    pub name: String,
    /// Library version.
    pub version: String,
    /// Platform description.
    pub comment: String,
}

/// One request/response exchange.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarEntry {
    /// Request URL without the query string.
    pub pageref: String,
    /// Start instant, `YYYY-MM-DDTHH:MM:SSZ`.
    pub started_date_time: String,
    /// Elapsed milliseconds between request start and response capture.
    pub time: u64,
    /// Request half.
    pub request: HarRequest,
    /// Response half.
    pub response: HarResponse,
}

/// A name/value pair (headers, query string, form fields).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarNameValue {
    /// Field name.
    pub name: String,
    /// Field value.
    pub value: String,
}

impl HarNameValue {
    fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Request half of a HAR entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarRequest {
    /// HTTP method.
    pub method: String,
    /// Full URL.
    pub url: String,
    /// HTTP version, e.g. `HTTP/1.1`.
    pub http_version: String,
    /// Filtered request headers.
    pub headers: Vec<HarNameValue>,
    /// Filtered query parameters.
    pub query_string: Vec<HarNameValue>,
    /// Request body, when the request carried one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_data: Option<HarPostData>,
}

/// Request body of a HAR entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarPostData {
    /// Declared content type.
    pub mime_type: String,
    /// Body text (JSON bodies are filtered before being re-serialized).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Parsed form fields for urlencoded bodies.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Vec<HarNameValue>>,
}

/// Response half of a HAR entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarResponse {
    /// Status code.
    pub status: u16,
    /// Canonical reason phrase.
    pub status_text: String,
    /// Filtered response headers.
    pub headers: Vec<HarNameValue>,
    /// Response body.
    pub content: HarContent,
}

/// Response body of a HAR entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HarContent {
    /// Body text.
    pub text: String,
    /// Raw body size in bytes.
    pub size: usize,
    /// Declared content type.
    pub mime_type: String,
}

/// Turns request/response snapshots into [`Payload`]s.
#[derive(Clone)]
pub struct PayloadBuilder {
    filter: FieldFilter,
    development_mode: bool,
    grouping: GroupingFn,
}

impl PayloadBuilder {
    /// Create a builder.
    pub fn new(filter: FieldFilter, development_mode: bool, grouping: GroupingFn) -> Self {
        Self {
            filter,
            development_mode,
            grouping,
        }
    }

    /// Build a payload.
    ///
    /// Returns `Ok(None)` when the grouping function declines the request
    /// (or yields a group without an identifier); that is a normal outcome.
    pub fn build(
        &self,
        request: &RequestSnapshot,
        response: &ResponseSnapshot,
    ) -> Result<Option<Payload>, PayloadBuildError> {
        let group = match (self.grouping)(request, response) {
            Some(group) if group.is_valid() => group,
            Some(_) => {
                tracing::debug!("grouping function returned a group without an api key");
                return Ok(None);
            }
            None => return Ok(None),
        };

        let elapsed = response
            .captured_at()
            .signed_duration_since(request.started_at())
            .num_milliseconds()
            .max(0) as u64;

        let entry = HarEntry {
            pageref: request.base_url(),
            started_date_time: request.started_date_time(),
            time: elapsed,
            request: self.build_request(request)?,
            response: self.build_response(response)?,
        };

        Ok(Some(Payload {
            id: Uuid::new_v4(),
            group,
            client_ip_address: request.client_ip(),
            development: self.development_mode,
            request: HarDocument {
                log: HarLog {
                    creator: HarCreator {
                        name: CREATOR_NAME.to_string(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                        comment: format!(
                            "{}-{}/rust",
                            std::env::consts::ARCH,
                            std::env::consts::OS
                        ),
                    },
                    entries: vec![entry],
                },
            },
        }))
    }

    fn build_request(&self, request: &RequestSnapshot) -> Result<HarRequest, PayloadBuildError> {
        let headers = self.capture_headers(request.headers());
        let query_string = request
            .uri()
            .query()
            .map(|q| self.capture_pairs(q))
            .unwrap_or_default();

        let post_data = if request.has_body() {
            Some(self.build_post_data(request)?)
        } else {
            None
        };

        Ok(HarRequest {
            method: request.method().to_string(),
            url: request.url(),
            http_version: format!("{:?}", request.version()),
            headers,
            query_string,
            post_data,
        })
    }

    fn build_post_data(&self, request: &RequestSnapshot) -> Result<HarPostData, PayloadBuildError> {
        let mime_type = content_type(request.headers());
        let text = crate::snapshot::decode_body(request.body());

        if mime_type.starts_with("application/x-www-form-urlencoded") {
            return Ok(HarPostData {
                mime_type,
                text: None,
                params: Some(self.capture_pairs(&text)),
            });
        }

        Ok(HarPostData {
            text: Some(self.filter_text(&mime_type, text)?),
            mime_type,
            params: None,
        })
    }

    fn build_response(&self, response: &ResponseSnapshot) -> Result<HarResponse, PayloadBuildError> {
        let mime_type = content_type(response.headers());
        let status = response.status();

        Ok(HarResponse {
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or_default().to_string(),
            headers: self.capture_headers(response.headers()),
            content: HarContent {
                text: self.filter_text(&mime_type, response.body().to_string())?,
                size: response.body_size(),
                mime_type,
            },
        })
    }

    /// Apply the filter to headers, keeping their order.
    ///
    /// Values with non-UTF-8 bytes are decoded lossily.
    fn capture_headers(&self, headers: &HeaderMap) -> Vec<HarNameValue> {
        headers
            .iter()
            .filter(|(name, _)| self.filter.keeps_name(name.as_str()))
            .map(|(name, value)| {
                HarNameValue::new(name.as_str(), String::from_utf8_lossy(value.as_bytes()))
            })
            .collect()
    }

    /// Parse `a=1&b=2` pairs and apply the filter.
    fn capture_pairs(&self, encoded: &str) -> Vec<HarNameValue> {
        encoded
            .split('&')
            .filter(|pair| !pair.is_empty())
            .filter_map(|pair| {
                let mut parts = pair.splitn(2, '=');
                let key = decode_component(parts.next()?);
                let value = decode_component(parts.next().unwrap_or_default());
                Some(HarNameValue::new(key, value))
            })
            .filter(|pair| self.filter.keeps_name(&pair.name))
            .collect()
    }

    /// Filter JSON bodies; other text passes through unchanged.
    ///
    /// A JSON body the filter leaves alone is kept byte for byte.
    fn filter_text(&self, mime_type: &str, text: String) -> Result<String, PayloadBuildError> {
        if matches!(self.filter, FieldFilter::None) || !is_json(mime_type, &text) {
            return Ok(text);
        }
        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(mut value) => {
                if self.filter.apply_json(&mut value) {
                    Ok(serde_json::to_string(&value)?)
                } else {
                    Ok(text)
                }
            }
            Err(_) => Ok(text),
        }
    }
}

impl std::fmt::Debug for PayloadBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PayloadBuilder")
            .field("filter", &self.filter)
            .field("development_mode", &self.development_mode)
            .finish_non_exhaustive()
    }
}

fn content_type(headers: &HeaderMap) -> String {
    headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("text/plain")
        .to_string()
}

fn is_json(mime_type: &str, text: &str) -> bool {
    let mime = mime_type.to_ascii_lowercase();
    mime.starts_with("application/json")
        || mime.contains("+json")
        || matches!(text.trim_start().chars().next(), Some('{') | Some('['))
}

fn decode_component(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|s| s.into_owned())
        .unwrap_or(spaced)
}

/// Minimal payload grouped under `api_key`, for unit tests.
#[cfg(test)]
pub(crate) fn test_payload(api_key: &str) -> Payload {
    let key = api_key.to_string();
    let builder = PayloadBuilder::new(
        FieldFilter::None,
        false,
        std::sync::Arc::new(move |_req: &RequestSnapshot, _res: &ResponseSnapshot| {
            Some(Group::new(key.clone()))
        }),
    );
    let req = RequestSnapshot::new(http::Method::GET, http::Uri::from_static("/"));
    let res = ResponseSnapshot::new(http::StatusCode::OK, HeaderMap::new(), b"");
    match builder.build(&req, &res) {
        Ok(Some(payload)) => payload,
        other => panic!("test payload could not be built: {:?}", other),
    }
}
