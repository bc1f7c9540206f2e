use std::sync::atomic::{AtomicU64, Ordering};

use super::event::{EventType, MAX_EVENT_TYPE};

/// Lock-free ingest counters.
///
/// Tracks decoded events per type plus decode failures and queue drops.
/// `snapshot()` atomically reads and resets all counters, making it suitable
/// for periodic reporting without contention.
pub struct IngestStats {
    counts: [AtomicU64; MAX_EVENT_TYPE + 1],
    decode_errors: AtomicU64,
    queue_drops: AtomicU64,
}

/// One read-and-reset view of the ingest counters.
pub struct IngestSnapshot {
    pub decoded: Vec<(EventType, u64)>,
    pub decode_errors: u64,
    pub queue_drops: u64,
}

impl IngestSnapshot {
    /// True when nothing was counted since the previous snapshot.
    pub fn is_empty(&self) -> bool {
        self.decoded.is_empty() && self.decode_errors == 0 && self.queue_drops == 0
    }
}

impl IngestStats {
    /// Create a new zeroed IngestStats.
    pub fn new() -> Self {
        Self {
            counts: std::array::from_fn(|_| AtomicU64::new(0)),
            decode_errors: AtomicU64::new(0),
            queue_drops: AtomicU64::new(0),
        }
    }

    /// Increment the counter for the given event type by one.
    pub fn record(&self, t: EventType) {
        if let Some(counter) = self.counts.get(t as usize) {
            counter.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Count one record that failed to decode.
    pub fn record_decode_error(&self) {
        self.decode_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one event dropped on a full queue.
    pub fn record_queue_drop(&self) {
        self.queue_drops.fetch_add(1, Ordering::Relaxed);
    }

    /// Atomically read and reset all counters. Decoded counts include only
    /// non-zero entries.
    pub fn snapshot(&self) -> IngestSnapshot {
        let mut decoded = Vec::new();

        for (i, counter) in self.counts.iter().enumerate() {
            let v = counter.swap(0, Ordering::Relaxed);
            if v > 0 {
                if let Some(et) = EventType::from_u8(i as u8) {
                    decoded.push((et, v));
                }
            }
        }

        IngestSnapshot {
            decoded,
            decode_errors: self.decode_errors.swap(0, Ordering::Relaxed),
            queue_drops: self.queue_drops.swap(0, Ordering::Relaxed),
        }
    }
}

impl Default for IngestStats {
    fn default() -> Self {
        Self::new()
    }
}
