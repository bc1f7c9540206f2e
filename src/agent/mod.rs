//! Agent orchestration: sinks, aggregator, queue, consumer, exporter, tracer.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::export::Exporter;
use crate::metrics::Aggregator;
use crate::queue::EventQueue;
use crate::sink::build_sink;
use crate::tracer::parse::decode_record;
use crate::tracer::stats::IngestStats;

#[cfg(feature = "bpf")]
use crate::tracer::bpf::BpfTracer;
#[cfg(feature = "bpf")]
use crate::tracer::Tracer;

/// Producer-facing pipeline entry: decode a raw record, count it, enqueue it.
///
/// Decode failures and queue overflows are counted and logged at debug, never
/// propagated; the read loop must keep draining the ring buffer.
#[derive(Clone)]
pub struct RecordIngress {
    queue: EventQueue,
    stats: Arc<IngestStats>,
}

impl RecordIngress {
    pub fn new(queue: EventQueue, stats: Arc<IngestStats>) -> Self {
        Self { queue, stats }
    }

    pub fn handle(&self, data: &[u8]) {
        let event = match decode_record(data) {
            Ok(event) => event,
            Err(e) => {
                self.stats.record_decode_error();
                debug!(error = %e, "record decode failed");
                return;
            }
        };

        self.stats.record(event.event_type);

        if !self.queue.push(event) {
            self.stats.record_queue_drop();
        }
    }
}

/// Agent wires all components together and owns their lifecycles.
pub struct Agent {
    cfg: Config,
    aggregator: Option<Arc<Aggregator>>,
    ingress: Option<RecordIngress>,
    consumer: Option<JoinHandle<()>>,
    exporter: Option<JoinHandle<()>>,
    exporter_cancel: CancellationToken,
    #[cfg(feature = "bpf")]
    tracer: Option<BpfTracer>,
    stats: Arc<IngestStats>,
    cancel: CancellationToken,
}

impl Agent {
    pub fn new(cfg: Config) -> Self {
        let cancel = CancellationToken::new();
        Self {
            cfg,
            aggregator: None,
            ingress: None,
            consumer: None,
            exporter: None,
            // Deliberately not a child of `cancel`: the exporter must keep
            // running until the consumer has drained the queue, so stop()
            // cancels it separately.
            exporter_cancel: CancellationToken::new(),
            #[cfg(feature = "bpf")]
            tracer: None,
            stats: Arc::new(IngestStats::new()),
            cancel,
        }
    }

    /// Start all components and begin observation.
    pub async fn start(&mut self) -> Result<()> {
        // 1. Build sinks. A broken sink config is fatal: running with fewer
        // sinks than configured would silently lose data.
        let mut sinks = Vec::with_capacity(self.cfg.adapters.len());
        for adapter in &self.cfg.adapters {
            let sink = build_sink(adapter)
                .with_context(|| format!("building {} sink", adapter.kind))?;
            info!(sink = sink.name(), "sink configured");
            sinks.push(sink);
        }

        let aggregator = Arc::new(Aggregator::new(sinks));

        // 2. Bounded queue between the read loop and the consumer.
        let (queue, mut rx) = EventQueue::new(self.cfg.queue_capacity);
        let ingress = RecordIngress::new(queue, Arc::clone(&self.stats));

        // 3. Consumer task: sole writer of the aggregate state. Runs until
        // every producer handle is dropped and the queue is drained.
        let consumer_agg = Arc::clone(&aggregator);
        self.consumer = Some(tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                consumer_agg.apply(&event);
            }
            debug!("event queue drained, consumer exiting");
        }));

        // 4. Periodic snapshot exporter.
        self.exporter = Some(Exporter::spawn(
            Arc::clone(&aggregator),
            self.cfg.export_interval,
            self.exporter_cancel.clone(),
        ));

        self.spawn_ingest_stats_reporter();

        // 5. BPF tracer (Linux with bpf feature only). Attach failure is
        // fatal: without a producer the agent would export zeros forever.
        #[cfg(feature = "bpf")]
        {
            let ring_buf_size = u32::try_from(self.cfg.ring_buffer_size).unwrap_or(u32::MAX);
            let mut tracer = BpfTracer::new(ring_buf_size);

            let record_ingress = ingress.clone();
            tracer.on_record(Box::new(move |data| {
                record_ingress.handle(data);
            }));

            tracer.on_error(Box::new(move |err| {
                tracing::warn!(error = %err, "tracer error");
            }));

            tracer
                .start(self.cancel.child_token())
                .await
                .context("starting BPF tracer")?;

            self.tracer = Some(tracer);
        }

        self.aggregator = Some(aggregator);
        self.ingress = Some(ingress);

        info!("agent fully started");

        Ok(())
    }

    /// Gracefully stop all components.
    ///
    /// Order matters: the producer stops first, then dropping the ingress
    /// closes the queue so the consumer drains what is left, and only then
    /// does the exporter take its final snapshot.
    pub async fn stop(&mut self) -> Result<()> {
        self.cancel.cancel();

        #[cfg(feature = "bpf")]
        if let Some(tracer) = &mut self.tracer {
            if let Err(e) = tracer.stop().await {
                error!(error = %e, "error stopping tracer");
            }
        }
        #[cfg(feature = "bpf")]
        {
            // Dropping the tracer releases its ingress handle.
            self.tracer = None;
        }

        // Close the queue; the consumer drains the remaining events.
        self.ingress = None;
        if let Some(consumer) = self.consumer.take() {
            if let Err(e) = consumer.await {
                error!(error = %e, "consumer task panicked");
            }
        }

        // Final publish now sees the fully drained state.
        self.exporter_cancel.cancel();
        if let Some(exporter) = self.exporter.take() {
            if let Err(e) = exporter.await {
                error!(error = %e, "exporter task panicked");
            }
        }

        if let Some(aggregator) = &self.aggregator {
            if let Err(e) = aggregator.close() {
                error!(error = %e, "error closing sinks");
            }
        }

        Ok(())
    }

    /// Spawn the periodic ingest summary log line.
    fn spawn_ingest_stats_reporter(&self) {
        let cancel = self.cancel.clone();
        let stats = Arc::clone(&self.stats);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(60));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {
                        let snapshot = stats.snapshot();
                        if snapshot.is_empty() {
                            continue;
                        }

                        let decoded: u64 = snapshot.decoded.iter().map(|(_, n)| n).sum();
                        info!(
                            decoded,
                            decode_errors = snapshot.decode_errors,
                            queue_drops = snapshot.queue_drops,
                            "ingest stats (60s)",
                        );

                        for (event_type, count) in &snapshot.decoded {
                            debug!(
                                event_type = %event_type,
                                count,
                                "  by type (60s)",
                            );
                        }
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracer::event::EventType;
    use crate::tracer::parse::RECORD_SIZE;

    fn open_record() -> Vec<u8> {
        let mut buf = vec![0u8; RECORD_SIZE];
        buf[20] = 1; // Open
        buf[21] = 6; // TCP
        buf
    }

    #[tokio::test]
    async fn test_ingress_decodes_and_enqueues() {
        let (queue, mut rx) = EventQueue::new(8);
        let stats = Arc::new(IngestStats::new());
        let ingress = RecordIngress::new(queue, Arc::clone(&stats));

        ingress.handle(&open_record());
        drop(ingress);

        let event = rx.recv().await.expect("event");
        assert_eq!(event.event_type, EventType::Open);

        let snap = stats.snapshot();
        assert_eq!(snap.decoded, vec![(EventType::Open, 1)]);
        assert_eq!(snap.decode_errors, 0);
    }

    #[tokio::test]
    async fn test_ingress_counts_decode_errors() {
        let (queue, _rx) = EventQueue::new(8);
        let stats = Arc::new(IngestStats::new());
        let ingress = RecordIngress::new(queue, Arc::clone(&stats));

        ingress.handle(&[0u8; 3]);
        let mut bad_type = open_record();
        bad_type[20] = 200;
        ingress.handle(&bad_type);

        let snap = stats.snapshot();
        assert_eq!(snap.decode_errors, 2);
        assert!(snap.decoded.is_empty());
    }

    #[tokio::test]
    async fn test_ingress_counts_queue_drops() {
        let (queue, _rx) = EventQueue::new(1);
        let stats = Arc::new(IngestStats::new());
        let ingress = RecordIngress::new(queue, Arc::clone(&stats));

        ingress.handle(&open_record());
        ingress.handle(&open_record());
        ingress.handle(&open_record());

        let snap = stats.snapshot();
        assert_eq!(snap.queue_drops, 2);
    }

    #[tokio::test]
    async fn test_agent_start_stop() {
        let cfg = Config {
            adapters: vec![crate::config::AdapterConfig {
                kind: "noop".to_string(),
                settings: Default::default(),
            }],
            export_interval: Duration::from_secs(3600),
            ..Default::default()
        };

        let mut agent = Agent::new(cfg);
        agent.start().await.expect("start");

        // Feed a few records through the producer seam.
        let ingress = agent.ingress.clone().expect("ingress");
        ingress.handle(&open_record());
        ingress.handle(&open_record());
        drop(ingress);

        agent.stop().await.expect("stop");

        let aggregator = agent.aggregator.as_ref().expect("aggregator");
        assert_eq!(aggregator.snapshot().open_connections, 2);
    }
}
