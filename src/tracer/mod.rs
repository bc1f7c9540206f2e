pub mod event;
pub mod parse;
pub mod stats;

#[cfg(feature = "bpf")]
pub mod bpf;

use anyhow::Result;
use tokio_util::sync::CancellationToken;

/// Callback for raw ring buffer records.
pub type RawRecordHandler = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Callback for tracer errors.
pub type ErrorHandler = Box<dyn Fn(anyhow::Error) + Send + Sync>;

/// Tracer manages BPF program loading, attachment, and record reading.
pub trait Tracer: Send {
    /// Load BPF programs, attach kprobes, start the ring buffer reader.
    fn start(
        &mut self,
        ctx: CancellationToken,
    ) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Detach BPF programs and stop the ring buffer reader.
    fn stop(&mut self) -> impl std::future::Future<Output = Result<()>> + Send;

    /// Register a handler for raw records.
    fn on_record(&mut self, handler: RawRecordHandler);

    /// Register a handler for tracer errors.
    fn on_error(&mut self, handler: ErrorHandler);
}
