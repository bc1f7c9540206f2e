use anyhow::Result;

use super::Sink;
use crate::metrics::ConnMetrics;
use crate::tracer::event::ConnEvent;

/// Sink that accepts everything and does nothing. Fallback for unknown
/// adapter types, also useful for load testing the pipeline itself.
pub struct NoopSink;

impl NoopSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for NoopSink {
    fn default() -> Self {
        Self::new()
    }
}

impl Sink for NoopSink {
    fn name(&self) -> &str {
        "noop"
    }

    fn on_event(&self, _event: &ConnEvent) -> Result<()> {
        Ok(())
    }

    fn on_metrics(&self, _snapshot: &ConnMetrics) -> Result<()> {
        Ok(())
    }

    fn close(&self) -> Result<()> {
        Ok(())
    }
}
