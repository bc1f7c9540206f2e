//! Periodic snapshot exporter.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::metrics::Aggregator;

/// Drives the export cadence: one `publish` per tick, one final publish on
/// shutdown so the last partial interval is not lost.
pub struct Exporter;

impl Exporter {
    pub fn spawn(
        aggregator: Arc<Aggregator>,
        interval: Duration,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so the initial
            // publish happens one full interval after startup.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        aggregator.publish();
                        debug!("final metrics publish complete");
                        return;
                    }
                    _ = ticker.tick() => {
                        aggregator.publish();
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::ConnMetrics;
    use crate::sink::Sink;
    use crate::tracer::event::ConnEvent;
    use anyhow::Result;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct CountingSink {
        snapshots: Arc<AtomicU64>,
    }

    impl Sink for CountingSink {
        fn name(&self) -> &str {
            "counting"
        }

        fn on_event(&self, _event: &ConnEvent) -> Result<()> {
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

    #[tokio::test(start_paused = true)]
    async fn test_publishes_on_each_tick() {
        let snapshots = Arc::new(AtomicU64::new(0));
        let sink = CountingSink {
            snapshots: Arc::clone(&snapshots),
        };
        let aggregator = Arc::new(Aggregator::new(vec![Box::new(sink)]));
        let cancel = CancellationToken::new();

        let handle = Exporter::spawn(
            Arc::clone(&aggregator),
            Duration::from_secs(10),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(snapshots.load(Ordering::Relaxed), 2);

        cancel.cancel();
        handle.await.expect("join");

        // One final publish on shutdown.
        assert_eq!(snapshots.load(Ordering::Relaxed), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_final_publish_without_any_tick() {
        let snapshots = Arc::new(AtomicU64::new(0));
        let sink = CountingSink {
            snapshots: Arc::clone(&snapshots),
        };
        let aggregator = Arc::new(Aggregator::new(vec![Box::new(sink)]));
        let cancel = CancellationToken::new();

        let handle = Exporter::spawn(
            Arc::clone(&aggregator),
            Duration::from_secs(60),
            cancel.clone(),
        );

        tokio::time::sleep(Duration::from_secs(1)).await;
        cancel.cancel();
        handle.await.expect("join");

        assert_eq!(snapshots.load(Ordering::Relaxed), 1);
    }
}
