//! Shared helpers for rustapi-metrics integration tests.

#![allow(dead_code)]

use http::{HeaderMap, Method, StatusCode};
use rustapi_metrics::{
    DeliveryError, Group, MetricsConfig, Payload, RequestSnapshot, ResponseSnapshot, Transport,
};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Install a test subscriber once so `tracing` output shows up on failure.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("rustapi_metrics=debug")),
        )
        .with_test_writer()
        .try_init();
}

/// Transport that records every batch it is handed.
#[derive(Clone, Default)]
pub struct RecordingTransport {
    batches: Arc<Mutex<Vec<Vec<Payload>>>>,
}

impl RecordingTransport {
    pub fn batches(&self) -> Vec<Vec<Payload>> {
        self.batches.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.batches.lock().unwrap().len()
    }

    pub fn delivered(&self) -> usize {
        self.batches.lock().unwrap().iter().map(Vec::len).sum()
    }
}

impl Transport for RecordingTransport {
    fn send(&self, batch: &[Payload]) -> Result<(), DeliveryError> {
        self.batches.lock().unwrap().push(batch.to_vec());
        Ok(())
    }
}

/// Transport that always fails.
#[derive(Clone, Default)]
pub struct FailingTransport {
    calls: Arc<Mutex<usize>>,
}

impl FailingTransport {
    pub fn calls(&self) -> usize {
        *self.calls.lock().unwrap()
    }
}

impl Transport for FailingTransport {
    fn send(&self, _batch: &[Payload]) -> Result<(), DeliveryError> {
        *self.calls.lock().unwrap() += 1;
        Err(DeliveryError::Status(StatusCode::SERVICE_UNAVAILABLE))
    }
}

/// Transport that blocks every send until the gate is opened.
#[derive(Clone, Default)]
pub struct GatedTransport {
    open: Arc<(Mutex<bool>, Condvar)>,
    inner: RecordingTransport,
    entered: Arc<Mutex<usize>>,
}

impl GatedTransport {
    pub fn open(&self) {
        let (lock, cvar) = &*self.open;
        *lock.lock().unwrap() = true;
        cvar.notify_all();
    }

    pub fn entered(&self) -> usize {
        *self.entered.lock().unwrap()
    }

    pub fn recorded(&self) -> &RecordingTransport {
        &self.inner
    }
}

impl Transport for GatedTransport {
    fn send(&self, batch: &[Payload]) -> Result<(), DeliveryError> {
        *self.entered.lock().unwrap() += 1;
        let (lock, cvar) = &*self.open;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = cvar.wait(open).unwrap();
        }
        drop(open);
        self.inner.send(batch)
    }
}

/// GET request to `host`, tagged with `x-api-key` for grouping.
pub fn request(host: &str, api_key: &str) -> RequestSnapshot {
    let mut headers = HeaderMap::new();
    headers.insert(http::header::HOST, host.parse().unwrap());
    headers.insert("x-api-key", api_key.parse().unwrap());
    RequestSnapshot::new(Method::GET, "/widgets?limit=5".parse().unwrap()).with_headers(headers)
}

pub fn response() -> ResponseSnapshot {
    let mut headers = HeaderMap::new();
    headers.insert(
        http::header::CONTENT_TYPE,
        "application/json".parse().unwrap(),
    );
    ResponseSnapshot::new(StatusCode::OK, headers, br#"{"widgets":[]}"#)
}

/// Configuration grouping by the `x-api-key` header.
pub fn config(flush_threshold: usize, background: bool) -> MetricsConfig {
    MetricsConfig::new("test-key")
        .flush_threshold(flush_threshold)
        .background_mode(background)
        .grouping_fn(|req, _res| {
            req.headers()
                .get("x-api-key")
                .and_then(|v| v.to_str().ok())
                .map(Group::new)
        })
}

/// Poll `condition` until it holds or `timeout` elapses.
pub fn eventually(timeout: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}
