//! Prometheus sink: exposes the aggregate snapshot and per-event counters
//! over an embedded HTTP server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use prometheus::{CounterVec, Encoder, Gauge, Opts, Registry, TextEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use super::Sink;
use crate::metrics::ConnMetrics;
use crate::tracer::event::{ConnEvent, EventType};

/// Prometheus exposition sink.
///
/// Snapshot-derived values are exported as gauges set to the current
/// cumulative value; re-adding a cumulative snapshot into a counter on every
/// export tick would double count. The per-event vectors are the only truly
/// monotonic series here, incremented once per delivered event.
pub struct PrometheusSink {
    shutdown: parking_lot::Mutex<Option<CancellationToken>>,

    // Connection counts
    open_connections: Gauge,
    closed_connections: Gauge,
    idle_connections: Gauge,
    reset_connections: Gauge,
    failed_connections: Gauge,
    total_connections: Gauge,

    // Performance
    bytes_sent: Gauge,
    bytes_received: Gauge,
    avg_connection_duration: Gauge,
    avg_rtt: Gauge,

    // Protocol distribution
    tcp_connections: Gauge,
    udp_connections: Gauge,

    // Event tracking
    connection_events: CounterVec,
    connection_bandwidth: CounterVec,
}

impl PrometheusSink {
    /// Build the metric set and spawn the HTTP server on `settings["port"]`
    /// (default 8080). Must be called from within a tokio runtime.
    pub fn new(settings: &HashMap<String, String>) -> Result<Self> {
        let port: u16 = match settings.get("port") {
            Some(p) => p
                .parse()
                .with_context(|| format!("invalid prometheus port: {p}"))?,
            None => 8080,
        };

        let registry = Registry::new();

        let open_connections = Gauge::with_opts(
            Opts::new("open_connections", "Number of currently open connections.")
                .namespace("conwatch"),
        )?;
        let closed_connections = Gauge::with_opts(
            Opts::new("closed_connections", "Total number of closed connections.")
                .namespace("conwatch"),
        )?;
        let idle_connections = Gauge::with_opts(
            Opts::new("idle_connections", "Number of idle connections.").namespace("conwatch"),
        )?;
        let reset_connections = Gauge::with_opts(
            Opts::new("reset_connections", "Total number of reset connections.")
                .namespace("conwatch"),
        )?;
        let failed_connections = Gauge::with_opts(
            Opts::new(
                "failed_connections",
                "Total number of failed connection attempts.",
            )
            .namespace("conwatch"),
        )?;
        let total_connections = Gauge::with_opts(
            Opts::new("total_connections", "Total number of connections seen.")
                .namespace("conwatch"),
        )?;
        let bytes_sent = Gauge::with_opts(
            Opts::new("bytes_sent", "Total bytes sent across all connections.")
                .namespace("conwatch"),
        )?;
        let bytes_received = Gauge::with_opts(
            Opts::new(
                "bytes_received",
                "Total bytes received across all connections.",
            )
            .namespace("conwatch"),
        )?;
        let avg_connection_duration = Gauge::with_opts(
            Opts::new(
                "avg_connection_duration_ms",
                "Average connection duration in milliseconds.",
            )
            .namespace("conwatch"),
        )?;
        let avg_rtt = Gauge::with_opts(
            Opts::new(
                "avg_rtt_microseconds",
                "Average round trip time in microseconds.",
            )
            .namespace("conwatch"),
        )?;
        let tcp_connections = Gauge::with_opts(
            Opts::new("tcp_connections", "Total number of TCP connections.").namespace("conwatch"),
        )?;
        let udp_connections = Gauge::with_opts(
            Opts::new("udp_connections", "Total number of UDP connections.").namespace("conwatch"),
        )?;
        let connection_events = CounterVec::new(
            Opts::new(
                "connection_events_total",
                "Total number of connection events by type.",
            )
            .namespace("conwatch"),
            &["event_type", "protocol", "reset_reason"],
        )?;
        let connection_bandwidth = CounterVec::new(
            Opts::new(
                "connection_bandwidth_bytes_total",
                "Total bandwidth usage by direction.",
            )
            .namespace("conwatch"),
            &["direction", "protocol"],
        )?;

        registry.register(Box::new(open_connections.clone()))?;
        registry.register(Box::new(closed_connections.clone()))?;
        registry.register(Box::new(idle_connections.clone()))?;
        registry.register(Box::new(reset_connections.clone()))?;
        registry.register(Box::new(failed_connections.clone()))?;
        registry.register(Box::new(total_connections.clone()))?;
        registry.register(Box::new(bytes_sent.clone()))?;
        registry.register(Box::new(bytes_received.clone()))?;
        registry.register(Box::new(avg_connection_duration.clone()))?;
        registry.register(Box::new(avg_rtt.clone()))?;
        registry.register(Box::new(tcp_connections.clone()))?;
        registry.register(Box::new(udp_connections.clone()))?;
        registry.register(Box::new(connection_events.clone()))?;
        registry.register(Box::new(connection_bandwidth.clone()))?;

        let cancel = CancellationToken::new();
        spawn_server(registry, port, cancel.clone());

        Ok(Self {
            shutdown: parking_lot::Mutex::new(Some(cancel)),
            open_connections,
            closed_connections,
            idle_connections,
            reset_connections,
            failed_connections,
            total_connections,
            bytes_sent,
            bytes_received,
            avg_connection_duration,
            avg_rtt,
            tcp_connections,
            udp_connections,
            connection_events,
            connection_bandwidth,
        })
    }
}

impl Sink for PrometheusSink {
    fn name(&self) -> &str {
        "prometheus"
    }

    fn on_event(&self, event: &ConnEvent) -> Result<()> {
        let protocol = event.protocol.as_str();
        let reset_reason = if event.event_type == EventType::Reset {
            event.reset_reason.as_str()
        } else {
            ""
        };

        self.connection_events
            .with_label_values(&[event.event_type.as_str(), protocol, reset_reason])
            .inc();

        if event.bytes_sent > 0 {
            self.connection_bandwidth
                .with_label_values(&["sent", protocol])
                .inc_by(event.bytes_sent as f64);
        }
        if event.bytes_received > 0 {
            self.connection_bandwidth
                .with_label_values(&["received", protocol])
                .inc_by(event.bytes_received as f64);
        }

        Ok(())
    }

    fn on_metrics(&self, snapshot: &ConnMetrics) -> Result<()> {
        self.open_connections.set(snapshot.open_connections as f64);
        self.idle_connections.set(snapshot.idle_connections as f64);
        self.closed_connections
            .set(snapshot.closed_connections as f64);
        self.reset_connections
            .set(snapshot.reset_connections as f64);
        self.failed_connections
            .set(snapshot.failed_connections as f64);
        self.total_connections
            .set(snapshot.total_connections as f64);

        self.bytes_sent.set(snapshot.total_bytes_sent as f64);
        self.bytes_received
            .set(snapshot.total_bytes_received as f64);
        self.avg_connection_duration
            .set(snapshot.avg_connection_duration_ms);
        self.avg_rtt.set(snapshot.avg_rtt_us);

        self.tcp_connections.set(snapshot.tcp_connections as f64);
        self.udp_connections.set(snapshot.udp_connections as f64);

        Ok(())
    }

    fn close(&self) -> Result<()> {
        if let Some(cancel) = self.shutdown.lock().take() {
            cancel.cancel();
        }
        Ok(())
    }
}

/// Spawn the /metrics HTTP server with graceful shutdown.
fn spawn_server(registry: Registry, port: u16, cancel: CancellationToken) {
    let app_state = Arc::new(AppState { registry });

    tokio::spawn(async move {
        let app = Router::new()
            .route("/metrics", get(metrics_handler))
            .route("/healthz", get(healthz_handler))
            .with_state(app_state);

        let bind_addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&bind_addr).await {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(addr = %bind_addr, error = %e, "metrics server bind failed");
                return;
            }
        };

        match listener.local_addr() {
            Ok(addr) => tracing::info!(addr = %addr, "metrics server started"),
            Err(e) => tracing::warn!(error = %e, "getting metrics server address"),
        }

        let result = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
        })
        .await;

        if let Err(e) = result {
            tracing::error!(error = %e, "metrics server error");
        }
    });
}

/// Shared state for axum handlers.
struct AppState {
    registry: Registry,
}

/// GET /metrics - Prometheus text format.
async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = state.registry.gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::error!(error = %e, "encoding metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "encoding error".to_string(),
        );
    }

    match String::from_utf8(buffer) {
        Ok(text) => (StatusCode::OK, text),
        Err(e) => {
            tracing::error!(error = %e, "converting metrics to string");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "encoding error".to_string(),
            )
        }
    }
}

/// GET /healthz - Simple health check.
async fn healthz_handler() -> &'static str {
    "ok"
}
