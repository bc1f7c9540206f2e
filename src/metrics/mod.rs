//! Aggregate connection metrics.
//!
//! A single [`ConnMetrics`] instance accumulates lifecycle transitions behind
//! a read-write lock. The consumer task is the only writer (`apply`); the
//! exporter reads snapshots concurrently.

use anyhow::Result;
use parking_lot::RwLock;
use tracing::{error, warn};

use crate::sink::Sink;
use crate::tracer::event::{ConnEvent, EventType, Protocol};

/// Aggregate connection statistics.
///
/// Counters are monotonic; `open_connections` and `idle_connections` are
/// gauges and are never clamped at zero. A Close or Reset with no preceding
/// Open drives `open_connections` negative, which is visible in exported data
/// and signals event loss rather than being papered over.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConnMetrics {
    pub total_connections: u64,
    pub open_connections: i64,
    pub closed_connections: u64,
    pub reset_connections: u64,
    pub failed_connections: u64,
    pub idle_connections: i64,
    pub tcp_connections: u64,
    pub udp_connections: u64,
    pub total_bytes_sent: u64,
    pub total_bytes_received: u64,
    /// Smoothed running average: `avg = (avg + sample) / 2` per non-zero sample.
    pub avg_connection_duration_ms: f64,
    /// Smoothed running average: `avg = (avg + sample) / 2` per non-zero sample.
    pub avg_rtt_us: f64,
}

impl ConnMetrics {
    fn update_perf(&mut self, event: &ConnEvent) {
        self.total_bytes_sent += event.bytes_sent;
        self.total_bytes_received += event.bytes_received;

        // 0 is the "not applicable" sentinel, never a real sample.
        if event.rtt_us > 0 {
            self.avg_rtt_us = (self.avg_rtt_us + f64::from(event.rtt_us)) / 2.0;
        }
        if event.duration_ms > 0 {
            self.avg_connection_duration_ms =
                (self.avg_connection_duration_ms + f64::from(event.duration_ms)) / 2.0;
        }
    }
}

/// Owns the aggregate state and the registered sinks.
///
/// `apply` is called from the single consumer task; `publish` from the
/// exporter task. The lock is never held across sink calls: a slow sink
/// delays delivery, not state updates from the other side.
pub struct Aggregator {
    state: RwLock<ConnMetrics>,
    sinks: Vec<Box<dyn Sink>>,
}

impl Aggregator {
    pub fn new(sinks: Vec<Box<dyn Sink>>) -> Self {
        Self {
            state: RwLock::new(ConnMetrics::default()),
            sinks,
        }
    }

    /// Apply one event to the aggregate state, then notify every sink in
    /// registration order. A failing sink is logged and skipped; it never
    /// affects the state update or the other sinks.
    pub fn apply(&self, event: &ConnEvent) {
        {
            let mut m = self.state.write();
            match event.event_type {
                EventType::Open => {
                    m.open_connections += 1;
                    m.total_connections += 1;
                    match event.protocol {
                        Protocol::Tcp => m.tcp_connections += 1,
                        Protocol::Udp => m.udp_connections += 1,
                        Protocol::Unknown => {}
                    }
                }
                EventType::Close => {
                    m.open_connections -= 1;
                    m.closed_connections += 1;
                    m.update_perf(event);
                }
                EventType::Reset => {
                    m.open_connections -= 1;
                    m.reset_connections += 1;
                    m.update_perf(event);
                }
                EventType::Failed => {
                    m.failed_connections += 1;
                }
                EventType::Idle => {
                    m.idle_connections += 1;
                }
                EventType::Data => {}
            }
        }

        for sink in &self.sinks {
            if let Err(e) = sink.on_event(event) {
                warn!(sink = sink.name(), error = %e, "sink event delivery failed");
            }
        }
    }

    /// Value copy of the current aggregate state.
    pub fn snapshot(&self) -> ConnMetrics {
        *self.state.read()
    }

    /// Push the current snapshot to every sink in registration order, with
    /// per-sink error isolation.
    pub fn publish(&self) {
        let snap = self.snapshot();
        for sink in &self.sinks {
            if let Err(e) = sink.on_metrics(&snap) {
                warn!(sink = sink.name(), error = %e, "sink metrics delivery failed");
            }
        }
    }

    /// Close every sink. All sinks are attempted; the first error is
    /// returned after the loop so shutdown never short-circuits.
    pub fn close(&self) -> Result<()> {
        let mut first_err = None;
        for sink in &self.sinks {
            if let Err(e) = sink.close() {
                error!(sink = sink.name(), error = %e, "sink close failed");
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
