//! Black-box pipeline test: raw byte records through decode, queue, consumer,
//! aggregator, and sinks.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use conwatch::metrics::{Aggregator, ConnMetrics};
use conwatch::queue::EventQueue;
use conwatch::sink::Sink;
use conwatch::tracer::event::{ConnEvent, EventType};
use conwatch::tracer::parse::{decode_record, RECORD_SIZE};

/// Build a raw record in the wire layout.
#[allow(clippy::too_many_arguments)]
fn record(
    event_type: u8,
    protocol: u8,
    bytes_sent: u64,
    bytes_received: u64,
    rtt_us: u32,
    duration_ms: u32,
    reset_reason: u8,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(RECORD_SIZE);
    buf.extend_from_slice(&1234u32.to_le_bytes()); // pid
    buf.extend_from_slice(&1234u32.to_le_bytes()); // tid
    buf.extend_from_slice(&0x0100_007Fu32.to_le_bytes()); // saddr
    buf.extend_from_slice(&0x0101_A8C0u32.to_le_bytes()); // daddr
    buf.extend_from_slice(&44000u16.to_le_bytes()); // sport
    buf.extend_from_slice(&443u16.to_le_bytes()); // dport
    buf.push(event_type);
    buf.push(protocol);
    buf.extend_from_slice(&1_000_000u64.to_le_bytes()); // timestamp_ns
    buf.extend_from_slice(&bytes_sent.to_le_bytes());
    buf.extend_from_slice(&bytes_received.to_le_bytes());
    buf.extend_from_slice(&rtt_us.to_le_bytes());
    buf.extend_from_slice(&duration_ms.to_le_bytes());
    buf.push(0); // tcp_state
    buf.push(reset_reason);
    assert_eq!(buf.len(), RECORD_SIZE);
    buf
}

fn open(protocol: u8) -> Vec<u8> {
    record(1, protocol, 0, 0, 0, 0, 0)
}

struct CountingSink {
    fail_events: bool,
    events: Arc<AtomicU64>,
    snapshots: Arc<AtomicU64>,
}

impl CountingSink {
    fn new(fail_events: bool) -> Self {
        Self {
            fail_events,
            events: Arc::new(AtomicU64::new(0)),
            snapshots: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl Sink for CountingSink {
    fn name(&self) -> &str {
        "counting"
    }

    fn on_event(&self, _event: &ConnEvent) -> Result<()> {
        self.events.fetch_add(1, Ordering::Relaxed);
        if self.fail_events {
            return Err(anyhow!("forced failure"));
        }
        Ok(())
    }

    fn on_metrics(&self, _snapshot: &ConnMetrics) -> Result<()> {
        self.snapshots.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Run raw records through decode, the queue, and a consumer applying to the
/// aggregator; returns the drained aggregator.
async fn run_pipeline(records: Vec<Vec<u8>>, capacity: usize, agg: Arc<Aggregator>) -> u64 {
    let (queue, mut rx) = EventQueue::new(capacity);

    for raw in &records {
        if let Ok(event) = decode_record(raw) {
            queue.push(event);
        }
    }
    let dropped = queue.dropped();
    drop(queue);

    let consumer_agg = Arc::clone(&agg);
    let consumer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            consumer_agg.apply(&event);
        }
    });
    consumer.await.expect("consumer");

    dropped
}

#[tokio::test]
async fn test_end_to_end_scenario() {
    let sink = CountingSink::new(false);
    let events = Arc::clone(&sink.events);
    let agg = Arc::new(Aggregator::new(vec![Box::new(sink)]));

    let records = vec![
        open(6),                          // Open tcp
        open(17),                         // Open udp
        record(2, 6, 100, 50, 200, 10, 0), // Close with perf samples
        record(4, 6, 0, 0, 0, 0, 1),       // Reset, timeout, no samples
    ];

    let dropped = run_pipeline(records, 100, Arc::clone(&agg)).await;
    assert_eq!(dropped, 0);

    let m = agg.snapshot();
    assert_eq!(m.open_connections, 0);
    assert_eq!(m.closed_connections, 1);
    assert_eq!(m.reset_connections, 1);
    assert_eq!(m.total_connections, 2);
    assert_eq!(m.tcp_connections, 1);
    assert_eq!(m.udp_connections, 1);
    assert_eq!(m.total_bytes_sent, 100);
    assert_eq!(m.total_bytes_received, 50);
    assert_eq!(m.avg_rtt_us, 100.0);
    assert_eq!(m.avg_connection_duration_ms, 5.0);

    // One on_event delivery per decoded record.
    assert_eq!(events.load(Ordering::Relaxed), 4);
}

#[tokio::test]
async fn test_queue_drop_law_under_load() {
    let capacity = 50;
    let extra = 17;
    let agg = Arc::new(Aggregator::new(Vec::new()));

    let records: Vec<Vec<u8>> = (0..capacity + extra).map(|_| open(6)).collect();
    let dropped = run_pipeline(records, capacity, Arc::clone(&agg)).await;

    assert_eq!(dropped, extra as u64);
    assert_eq!(agg.snapshot().open_connections, capacity as i64);
}

#[tokio::test]
async fn test_undecodable_records_do_not_reach_state() {
    let agg = Arc::new(Aggregator::new(Vec::new()));

    let mut bad_type = open(6);
    bad_type[20] = 42;
    let records = vec![
        open(6),
        vec![0u8; 5],          // truncated
        bad_type,              // unknown event type
        record(5, 6, 0, 0, 0, 0, 0), // Failed
    ];

    run_pipeline(records, 100, Arc::clone(&agg)).await;

    let m = agg.snapshot();
    assert_eq!(m.open_connections, 1);
    assert_eq!(m.failed_connections, 1);
    assert_eq!(m.total_connections, 1);
}

#[tokio::test]
async fn test_failing_sink_does_not_block_pipeline() {
    let failing = CountingSink::new(true);
    let healthy = CountingSink::new(false);
    let failing_events = Arc::clone(&failing.events);
    let healthy_events = Arc::clone(&healthy.events);
    let healthy_snapshots = Arc::clone(&healthy.snapshots);

    let agg = Arc::new(Aggregator::new(vec![Box::new(failing), Box::new(healthy)]));

    let records = vec![open(6), open(6), record(2, 6, 0, 0, 0, 0, 0)];
    run_pipeline(records, 100, Arc::clone(&agg)).await;
    agg.publish();

    // Every event reached both sinks despite the first one failing.
    assert_eq!(failing_events.load(Ordering::Relaxed), 3);
    assert_eq!(healthy_events.load(Ordering::Relaxed), 3);
    assert_eq!(healthy_snapshots.load(Ordering::Relaxed), 1);
    assert_eq!(agg.snapshot().open_connections, 1);
}

#[test]
fn test_decode_determinism_across_the_wire_layout() {
    let raw = record(2, 17, 7, 9, 33, 44, 0);
    let a = decode_record(&raw).expect("decode");
    let b = decode_record(&raw).expect("decode");
    assert_eq!(a, b);
    assert_eq!(a.event_type, EventType::Close);
    assert_eq!(a.bytes_sent, 7);
    assert_eq!(a.rtt_us, 33);

    for len in 0..RECORD_SIZE {
        assert!(decode_record(&raw[..len]).is_err(), "len {len} must fail");
    }
}
