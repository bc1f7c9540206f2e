//! Bounded event queue between the tracer read loop and the consumer task.
//!
//! The producer side never blocks: when the buffer is full the event is
//! dropped and counted. Losing events under pressure is preferable to
//! stalling the ring buffer reader.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::tracer::event::ConnEvent;

/// Producer handle for the bounded event queue.
///
/// Cloneable; the queue closes once every handle has been dropped, after
/// which the receiver drains the remaining buffered events and then yields
/// `None`.
#[derive(Clone)]
pub struct EventQueue {
    tx: mpsc::Sender<ConnEvent>,
    dropped: Arc<AtomicU64>,
}

/// Consumer side of the event queue.
pub type EventReceiver = mpsc::Receiver<ConnEvent>;

impl EventQueue {
    /// Create a queue with the given capacity. Returns the producer handle
    /// and the single consumer receiver.
    pub fn new(capacity: usize) -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Enqueue an event without blocking. Returns false when the queue is
    /// full (the event is dropped and counted) or closed.
    pub fn push(&self, event: ConnEvent) -> bool {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    /// Total events dropped on a full or closed queue since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
