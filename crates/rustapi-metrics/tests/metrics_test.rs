//! End-to-end behaviour of the metrics controller.

mod common;

use common::{
    config, eventually, init_tracing, request, response, FailingTransport, GatedTransport,
    RecordingTransport,
};
use rustapi_metrics::{Metrics, ProcessOutcome};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[test]
fn test_host_outside_allowed_hosts_is_not_queued() {
    init_tracing();
    let transport = RecordingTransport::default();
    let metrics = Metrics::with_transport(
        config(10, false).allowed_hosts(["api.example.com"]),
        transport.clone(),
    )
    .unwrap();

    let outcome = metrics.process(&request("other.example.com", "k"), &response());

    assert_eq!(outcome, ProcessOutcome::HostNotAllowed);
    assert_eq!(metrics.queue_len(), 0);

    let outcome = metrics.process(&request("api.example.com", "k"), &response());
    assert_eq!(outcome, ProcessOutcome::Queued { queue_len: 1 });
}

#[test]
fn test_grouping_none_is_not_queued() {
    init_tracing();
    let transport = RecordingTransport::default();
    let metrics = Metrics::with_transport(
        config(10, false).grouping_fn(|_req, _res| None),
        transport.clone(),
    )
    .unwrap();

    let outcome = metrics.process(&request("x.com", "k"), &response());

    assert_eq!(outcome, ProcessOutcome::Dropped);
    assert_eq!(metrics.queue_len(), 0);
    metrics.shutdown();
    assert_eq!(transport.calls(), 0);
}

#[test]
fn test_foreground_flushes_at_threshold() {
    init_tracing();
    let transport = RecordingTransport::default();
    let metrics = Metrics::with_transport(config(3, false), transport.clone()).unwrap();

    metrics.process(&request("x.com", "a"), &response());
    metrics.process(&request("x.com", "b"), &response());
    assert_eq!(metrics.queue_len(), 2);
    assert_eq!(transport.calls(), 0);

    metrics.process(&request("x.com", "c"), &response());
    assert_eq!(metrics.queue_len(), 0);
    assert_eq!(transport.calls(), 1);
    assert_eq!(transport.delivered(), 3);
}

#[test]
fn test_two_requests_threshold_two_single_delivery() {
    init_tracing();
    let transport = RecordingTransport::default();
    let metrics = Metrics::with_transport(config(2, false), transport.clone()).unwrap();

    metrics.process(&request("x.com", "A"), &response());
    metrics.process(&request("x.com", "B"), &response());

    assert_eq!(metrics.queue_len(), 0);
    let batches = transport.batches();
    assert_eq!(batches.len(), 1);
    let keys: Vec<&str> = batches[0].iter().map(|p| p.group.api_key.as_str()).collect();
    assert_eq!(keys, vec!["A", "B"]);
}

#[test]
fn test_payload_contents_reach_transport() {
    init_tracing();
    let transport = RecordingTransport::default();
    let metrics = Metrics::with_transport(
        config(1, false).deny_list(["x-api-key"]),
        transport.clone(),
    )
    .unwrap();

    metrics.process(&request("x.com", "key-1"), &response());

    let batches = transport.batches();
    let payload = &batches[0][0];
    let entry = &payload.request.log.entries[0];
    assert_eq!(payload.group.api_key, "key-1");
    assert_eq!(entry.request.method, "GET");
    assert_eq!(entry.request.url, "http://x.com/widgets?limit=5");
    assert!(entry
        .request
        .headers
        .iter()
        .all(|h| !h.name.eq_ignore_ascii_case("x-api-key")));
    assert_eq!(entry.request.query_string.len(), 1);
    assert_eq!(entry.response.status, 200);
    assert_eq!(entry.response.content.text, r#"{"widgets":[]}"#);
}

#[test]
fn test_background_process_does_not_wait_for_delivery() {
    init_tracing();
    let transport = GatedTransport::default();
    let metrics = Metrics::with_transport(config(1, true), transport.clone()).unwrap();

    let outcome = metrics.process(&request("x.com", "a"), &response());
    assert_eq!(outcome, ProcessOutcome::Queued { queue_len: 1 });

    // The send is parked on the gate, yet process already returned.
    assert!(eventually(Duration::from_secs(5), || transport.entered() == 1));
    assert!(metrics.in_flight_flushes() >= 1);
    assert_eq!(transport.recorded().calls(), 0);

    transport.open();
    assert!(eventually(Duration::from_secs(5), || metrics.in_flight_flushes() == 0));
    assert_eq!(metrics.queue_len(), 0);
    assert_eq!(transport.recorded().delivered(), 1);

    metrics.shutdown();
}

#[test]
fn test_shutdown_waits_for_in_flight_delivery() {
    init_tracing();
    let transport = GatedTransport::default();
    let metrics = Metrics::with_transport(config(1, true), transport.clone()).unwrap();
    metrics.process(&request("x.com", "a"), &response());
    assert!(eventually(Duration::from_secs(5), || transport.entered() == 1));

    let opener = {
        let transport = transport.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            transport.open();
        })
    };

    metrics.shutdown();

    assert_eq!(metrics.in_flight_flushes(), 0);
    assert_eq!(transport.recorded().delivered(), 1);
    opener.join().unwrap();
}

#[test]
fn test_shutdown_with_empty_queue_returns_immediately() {
    init_tracing();
    let transport = RecordingTransport::default();
    let metrics = Metrics::with_transport(config(5, true), transport.clone()).unwrap();

    let started = Instant::now();
    metrics.shutdown();

    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(transport.calls(), 0);
}

#[test]
fn test_shutdown_delivers_partial_batch() {
    init_tracing();
    let transport = RecordingTransport::default();
    let metrics = Metrics::with_transport(config(10, true), transport.clone()).unwrap();
    for key in ["a", "b", "c"] {
        metrics.process(&request("x.com", key), &response());
    }
    assert_eq!(transport.calls(), 0);

    metrics.shutdown();

    assert_eq!(metrics.queue_len(), 0);
    assert_eq!(transport.delivered(), 3);
}

#[test]
fn test_delivery_failure_never_reaches_caller() {
    init_tracing();
    let transport = FailingTransport::default();
    let metrics = Metrics::with_transport(
        config(2, false).development_mode(true),
        transport.clone(),
    )
    .unwrap();

    for key in ["a", "b", "c", "d"] {
        let outcome = metrics.process(&request("x.com", key), &response());
        assert!(matches!(outcome, ProcessOutcome::Queued { .. }));
    }
    metrics.shutdown();

    assert_eq!(transport.calls(), 2);
    assert_eq!(metrics.queue_len(), 0);
}

#[test]
fn test_concurrent_process_delivers_each_payload_once() {
    init_tracing();
    const THREADS: usize = 8;
    const PER_THREAD: usize = 50;

    let transport = RecordingTransport::default();
    let metrics = Arc::new(
        Metrics::with_transport(config(7, true).flush_workers(3), transport.clone()).unwrap(),
    );

    let handles: Vec<_> = (0..THREADS)
        .map(|t| {
            let metrics = metrics.clone();
            std::thread::spawn(move || {
                for i in 0..PER_THREAD {
                    let key = format!("{}-{}", t, i);
                    metrics.process(&request("x.com", &key), &response());
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    metrics.shutdown();

    let batches = transport.batches();
    assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= 7));

    let ids: HashSet<_> = batches.iter().flatten().map(|p| p.id).collect();
    let keys: HashSet<_> = batches
        .iter()
        .flatten()
        .map(|p| p.group.api_key.clone())
        .collect();
    assert_eq!(transport.delivered(), THREADS * PER_THREAD);
    assert_eq!(ids.len(), THREADS * PER_THREAD);
    assert_eq!(keys.len(), THREADS * PER_THREAD);
    assert_eq!(metrics.queue_len(), 0);
}
