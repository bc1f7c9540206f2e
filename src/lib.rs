//! Connection lifecycle monitoring agent.
//!
//! Pipeline: eBPF ring buffer records are decoded into [`tracer::event::ConnEvent`]
//! values, pass through a bounded [`queue::EventQueue`], feed the
//! [`metrics::Aggregator`] state machine, and fan out to backend
//! [`sink::Sink`]s both per-event and as periodic snapshots.

pub mod agent;
pub mod config;
pub mod export;
pub mod metrics;
pub mod queue;
pub mod sink;
pub mod tracer;
