//! Statsd sink speaking the plain UDP line protocol with datadog-style tags.

use std::collections::HashMap;
use std::net::UdpSocket;

use anyhow::{Context, Result};

use super::Sink;
use crate::metrics::ConnMetrics;
use crate::tracer::event::ConnEvent;

/// Statsd sink.
///
/// Fire-and-forget UDP; a lost datagram is a lost sample. Gauges carry the
/// snapshot values, counts carry the cumulative totals, per-event increments
/// carry the connection tags.
pub struct StatsdSink {
    socket: UdpSocket,
    prefix: String,
}

impl StatsdSink {
    /// Connect to `settings["host"]` (default `localhost:8125`) with the
    /// metric prefix from `settings["prefix"]` (default `conwatch`).
    pub fn new(settings: &HashMap<String, String>) -> Result<Self> {
        let host = settings
            .get("host")
            .map(String::as_str)
            .unwrap_or("localhost:8125");
        let prefix = settings
            .get("prefix")
            .cloned()
            .unwrap_or_else(|| "conwatch".to_string());

        let socket = UdpSocket::bind("0.0.0.0:0").context("binding statsd socket")?;
        socket
            .connect(host)
            .with_context(|| format!("connecting statsd socket to {host}"))?;

        Ok(Self { socket, prefix })
    }

    fn send(&self, line: &str) -> Result<()> {
        self.socket
            .send(line.as_bytes())
            .with_context(|| format!("sending statsd line: {line}"))?;
        Ok(())
    }

    fn gauge(&self, name: &str, value: f64) -> Result<()> {
        self.send(&format!("{}.{}:{}|g", self.prefix, name, value))
    }

    fn count(&self, name: &str, value: u64) -> Result<()> {
        self.send(&format!("{}.{}:{}|c", self.prefix, name, value))
    }
}

/// Format a packed little-endian IPv4 address with port as `a.b.c.d:port`.
fn format_addr(addr: u32, port: u16) -> String {
    format!(
        "{}.{}.{}.{}:{}",
        addr & 0xFF,
        (addr >> 8) & 0xFF,
        (addr >> 16) & 0xFF,
        (addr >> 24) & 0xFF,
        port
    )
}

impl Sink for StatsdSink {
    fn name(&self) -> &str {
        "statsd"
    }

    fn on_event(&self, event: &ConnEvent) -> Result<()> {
        let line = format!(
            "{}.connection_events:1|c|#event_type:{},pid:{},src:{},dst:{}",
            self.prefix,
            event.event_type.as_str(),
            event.pid,
            format_addr(event.saddr, event.sport),
            format_addr(event.daddr, event.dport),
        );
        self.send(&line)
    }

    fn on_metrics(&self, snapshot: &ConnMetrics) -> Result<()> {
        self.gauge("open_connections", snapshot.open_connections as f64)?;
        self.gauge("idle_connections", snapshot.idle_connections as f64)?;
        self.count("closed_connections", snapshot.closed_connections)?;
        self.count("total_connections", snapshot.total_connections)?;
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
