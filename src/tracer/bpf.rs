//! BPF program loading, attachment, and ring buffer reading.
//!
//! Implements the [`Tracer`] trait using aya. All code is gated behind
//! `#[cfg(feature = "bpf")]`.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::unix::AsyncFd;

use aya::maps::RingBuf;
use aya::programs::KProbe;
use aya::{Ebpf, EbpfLoader};

use super::{ErrorHandler, RawRecordHandler, Tracer};

/// Compiled BPF object, embedded at build time.
///
/// Uses `include_bytes_aligned!` to guarantee alignment; plain
/// `include_bytes!` gives 1-byte alignment and aya's ELF parser rejects the
/// data when the pointer lands at an odd address.
#[cfg(target_os = "linux")]
const BPF_OBJ: &[u8] = aya::include_bytes_aligned!(concat!(env!("OUT_DIR"), "/conn_tracker.bpf.o"));

/// Kprobe attach points, (program name, symbol).
const KPROBES: &[(&str, &str)] = &[
    ("trace_connect_entry", "sys_connect"),
    ("trace_close_entry", "sys_close"),
];

/// BPF-backed tracer implementation.
pub struct BpfTracer {
    ring_buf_size: u32,
    record_handlers: Vec<RawRecordHandler>,
    error_handlers: Vec<ErrorHandler>,
    ebpf: Option<Ebpf>,
    read_task: Option<tokio::task::JoinHandle<()>>,
}

impl BpfTracer {
    /// Create a new BPF tracer with the given ring buffer size in bytes.
    pub fn new(ring_buf_size: u32) -> Self {
        Self {
            ring_buf_size,
            record_handlers: Vec::with_capacity(2),
            error_handlers: Vec::with_capacity(2),
            ebpf: None,
            read_task: None,
        }
    }
}

impl Tracer for BpfTracer {
    async fn start(&mut self, ctx: tokio_util::sync::CancellationToken) -> Result<()> {
        let mut ebpf = EbpfLoader::new()
            .set_max_entries("events", self.ring_buf_size)
            .load(BPF_OBJ)
            .context("loading BPF objects")?;

        for (prog_name, symbol) in KPROBES {
            let program: &mut KProbe = ebpf
                .program_mut(prog_name)
                .ok_or_else(|| anyhow::anyhow!("program {prog_name} not found"))?
                .try_into()
                .with_context(|| format!("{prog_name} is not a kprobe"))?;
            program
                .load()
                .with_context(|| format!("loading {prog_name}"))?;
            program
                .attach(symbol, 0)
                .with_context(|| format!("attaching {prog_name} to {symbol}"))?;

            tracing::debug!(program = prog_name, symbol, "kprobe attached");
        }

        // Take the ring buffer map for the read task.
        let events_map = ebpf
            .take_map("events")
            .ok_or_else(|| anyhow::anyhow!("events map not found"))?;
        let ring_buf =
            RingBuf::try_from(events_map).context("creating ring buffer from events map")?;

        // Move handlers into the read task.
        let record_handlers = Arc::new(std::mem::take(&mut self.record_handlers));
        let error_handlers = Arc::new(std::mem::take(&mut self.error_handlers));

        let handle = tokio::spawn(async move {
            read_loop(ring_buf, record_handlers, error_handlers, ctx).await;
        });

        self.read_task = Some(handle);
        self.ebpf = Some(ebpf);

        tracing::info!("BPF tracer started");
        Ok(())
    }

    async fn stop(&mut self) -> Result<()> {
        // The read task exits when the CancellationToken is cancelled.
        if let Some(handle) = self.read_task.take() {
            handle.await.context("waiting for read task")?;
        }

        // Drop the Ebpf object which detaches all programs and closes maps.
        self.ebpf = None;

        tracing::info!("BPF tracer stopped");
        Ok(())
    }

    fn on_record(&mut self, handler: RawRecordHandler) {
        self.record_handlers.push(handler);
    }

    fn on_error(&mut self, handler: ErrorHandler) {
        self.error_handlers.push(handler);
    }
}

// ---------------------------------------------------------------------------
// Ring buffer read loop
// ---------------------------------------------------------------------------

async fn read_loop(
    ring_buf: RingBuf<aya::maps::MapData>,
    record_handlers: Arc<Vec<RawRecordHandler>>,
    error_handlers: Arc<Vec<ErrorHandler>>,
    cancel: tokio_util::sync::CancellationToken,
) {
    let mut async_fd = match AsyncFd::new(ring_buf) {
        Ok(fd) => fd,
        Err(e) => {
            tracing::error!(error = %e, "failed to create async fd for ring buffer");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = async_fd.readable_mut() => {
                let mut guard = match result {
                    Ok(g) => g,
                    Err(e) => {
                        tracing::warn!(error = %e, "ring buffer poll error");
                        for handler in error_handlers.iter() {
                            handler(anyhow::anyhow!("ring buffer poll error: {e}"));
                        }
                        continue;
                    }
                };

                // Drain all available records.
                let rb = guard.get_inner_mut();
                while let Some(item) = rb.next() {
                    let data: &[u8] = &item;

                    // Empty record indicates ring buffer overflow.
                    if data.is_empty() {
                        tracing::warn!("ring buffer overflow detected");
                        continue;
                    }

                    for handler in record_handlers.iter() {
                        handler(data);
                    }
                }

                guard.clear_ready();
            }
        }
    }
}
