pub mod noop;
pub mod prometheus;
pub mod statsd;

use anyhow::Result;
use tracing::warn;

use crate::config::AdapterConfig;
use crate::metrics::ConnMetrics;
use crate::tracer::event::ConnEvent;

/// Sink receives per-event notifications and periodic metrics snapshots.
///
/// `on_event` runs synchronously on the consumer task, so a slow sink caps
/// pipeline throughput. Sinks must not retry internally; a failed delivery
/// is reported once via the returned error and the event is gone.
pub trait Sink: Send + Sync {
    /// Returns the sink's name for logging.
    fn name(&self) -> &str;

    /// Deliver a single decoded event.
    fn on_event(&self, event: &ConnEvent) -> Result<()>;

    /// Deliver an aggregate metrics snapshot.
    fn on_metrics(&self, snapshot: &ConnMetrics) -> Result<()>;

    /// Flush and release resources. Called once at shutdown.
    fn close(&self) -> Result<()>;
}

/// Construct a sink from its config entry.
///
/// Unrecognized type tags log a warning and fall back to the no-op sink, so
/// a config typo degrades to no output rather than a startup failure.
pub fn build_sink(cfg: &AdapterConfig) -> Result<Box<dyn Sink>> {
    match cfg.kind.as_str() {
        "noop" => Ok(Box::new(noop::NoopSink::new())),
        "prometheus" => Ok(Box::new(prometheus::PrometheusSink::new(&cfg.settings)?)),
        "statsd" => Ok(Box::new(statsd::StatsdSink::new(&cfg.settings)?)),
        other => {
            warn!(kind = other, "unknown adapter type, using noop sink");
            Ok(Box::new(noop::NoopSink::new()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_build_noop() {
        let cfg = AdapterConfig {
            kind: "noop".to_string(),
            settings: HashMap::new(),
        };
        let sink = build_sink(&cfg).expect("build");
        assert_eq!(sink.name(), "noop");
    }

    #[test]
    fn test_unknown_kind_falls_back_to_noop() {
        let cfg = AdapterConfig {
            kind: "graphite".to_string(),
            settings: HashMap::new(),
        };
        let sink = build_sink(&cfg).expect("build");
        assert_eq!(sink.name(), "noop");
    }

    #[test]
    fn test_build_statsd() {
        let cfg = AdapterConfig {
            kind: "statsd".to_string(),
            settings: HashMap::new(),
        };
        let sink = build_sink(&cfg).expect("build");
        assert_eq!(sink.name(), "statsd");
    }
}
