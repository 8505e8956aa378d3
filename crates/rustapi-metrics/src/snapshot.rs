//! Request and response snapshots.
//!
//! A framework adapter captures a [`RequestSnapshot`] before calling the
//! handler and a [`ResponseSnapshot`] after it returns. Both are owned,
//! immutable values so they can outlive the framework's own request types.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use http::{HeaderMap, Method, StatusCode, Uri, Version};
use std::net::IpAddr;

/// Body text recorded when a body is not valid UTF-8.
pub const INVALID_UTF8_BODY: &str = "[NOT VALID UTF-8]";

/// Decode body bytes as UTF-8, falling back to [`INVALID_UTF8_BODY`].
pub fn decode_body(bytes: &[u8]) -> String {
    match std::str::from_utf8(bytes) {
        Ok(text) => text.to_string(),
        Err(_) => INVALID_UTF8_BODY.to_string(),
    }
}

/// Request data captured at the start of request handling.
#[derive(Debug, Clone)]
pub struct RequestSnapshot {
    method: Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    content_length: Option<u64>,
    remote_addr: Option<IpAddr>,
    started_at: DateTime<Utc>,
}

impl RequestSnapshot {
    /// Create a snapshot for `method` and `uri`, started now.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            content_length: None,
            remote_addr: None,
            started_at: Utc::now(),
        }
    }

    /// Capture a snapshot from request parts and the buffered body.
    pub fn from_parts(parts: &http::request::Parts, body: Bytes) -> Self {
        Self::new(parts.method.clone(), parts.uri.clone())
            .with_version(parts.version)
            .with_headers(parts.headers.clone())
            .with_body(body)
    }

    /// Set the HTTP version.
    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Set the request headers.
    ///
    /// Also resolves the content length from `Content-Length` if present.
    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self.content_length = self.header_content_length().or(self.content_length);
        self
    }

    /// Set the raw request body.
    pub fn with_body(mut self, body: Bytes) -> Self {
        if self.content_length.is_none() && !body.is_empty() {
            self.content_length = Some(body.len() as u64);
        }
        self.body = body;
        self
    }

    /// Set the peer address of the connection.
    pub fn with_remote_addr(mut self, addr: IpAddr) -> Self {
        self.remote_addr = Some(addr);
        self
    }

    /// Override the start instant.
    pub fn with_started_at(mut self, started_at: DateTime<Utc>) -> Self {
        self.started_at = started_at;
        self
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request URI as received.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// HTTP version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Request headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Raw request body, possibly empty.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Content length, if the request declared one or carried a body.
    pub fn content_length(&self) -> Option<u64> {
        self.content_length
    }

    /// Whether the request carried a body worth recording.
    pub fn has_body(&self) -> bool {
        self.content_length.is_some() || !self.body.is_empty()
    }

    /// Start instant.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Start instant as `YYYY-MM-DDTHH:MM:SSZ`.
    pub fn started_date_time(&self) -> String {
        self.started_at.format("%Y-%m-%dT%H:%M:%SZ").to_string()
    }

    /// Start instant in milliseconds since the Unix epoch.
    pub fn started_at_millis(&self) -> i64 {
        self.started_at.timestamp_millis()
    }

    /// Host the request was addressed to.
    ///
    /// Uses the `Host` header, falling back to the URI authority.
    pub fn host(&self) -> Option<&str> {
        self.headers
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .or_else(|| self.uri.authority().map(|a| a.as_str()))
    }

    /// URI scheme, defaulting to `http` for origin-form URIs.
    pub fn scheme(&self) -> &str {
        self.uri.scheme_str().unwrap_or("http")
    }

    /// Absolute URL of the request including the query string.
    pub fn url(&self) -> String {
        let path_and_query = self
            .uri
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        match self.host() {
            Some(host) => format!("{}://{}{}", self.scheme(), host, path_and_query),
            None => path_and_query.to_string(),
        }
    }

    /// URL of the request without its query string.
    pub fn base_url(&self) -> String {
        match self.host() {
            Some(host) => format!("{}://{}{}", self.scheme(), host, self.uri.path()),
            None => self.uri.path().to_string(),
        }
    }

    /// Best guess at the client address.
    ///
    /// `X-Forwarded-For` (first entry), then `X-Real-IP`, then the connection
    /// peer, then loopback.
    pub fn client_ip(&self) -> String {
        if let Some(forwarded) = self.headers.get("x-forwarded-for") {
            if let Ok(forwarded_str) = forwarded.to_str() {
                if let Some(first_ip) = forwarded_str.split(',').next() {
                    let ip_str = first_ip.trim();
                    if ip_str.parse::<IpAddr>().is_ok() {
                        return ip_str.to_string();
                    }
                }
            }
        }

        if let Some(real_ip) = self.headers.get("x-real-ip") {
            if let Ok(ip_str) = real_ip.to_str() {
                let ip_str = ip_str.trim();
                if ip_str.parse::<IpAddr>().is_ok() {
                    return ip_str.to_string();
                }
            }
        }

        self.remote_addr
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| "127.0.0.1".to_string())
    }

    fn header_content_length(&self) -> Option<u64> {
        self.headers
            .get(http::header::CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
    }
}

/// Response data captured after the handler returns.
#[derive(Debug, Clone)]
pub struct ResponseSnapshot {
    status: StatusCode,
    headers: HeaderMap,
    body: String,
    body_size: usize,
    captured_at: DateTime<Utc>,
}

impl ResponseSnapshot {
    /// Capture a response, decoding `body` as UTF-8.
    pub fn new(status: StatusCode, headers: HeaderMap, body: &[u8]) -> Self {
        Self {
            status,
            headers,
            body: decode_body(body),
            body_size: body.len(),
            captured_at: Utc::now(),
        }
    }

    /// Capture a response from its parts and the buffered body.
    pub fn from_parts(parts: &http::response::Parts, body: &[u8]) -> Self {
        Self::new(parts.status, parts.headers.clone(), body)
    }

    /// Override the capture instant.
    pub fn with_captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Response status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Decoded body text, or [`INVALID_UTF8_BODY`].
    pub fn body(&self) -> &str {
        &self.body
    }

    /// Size of the raw body in bytes.
    pub fn body_size(&self) -> usize {
        self.body_size
    }

    /// Capture instant.
    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}
