//! Record decoding for raw BPF ring buffer samples.
//!
//! Decodes fixed-layout little-endian byte slices from the ring buffer into
//! typed [`ConnEvent`] values. The length check happens once per record, then
//! fixed-width reads use unchecked unaligned loads to minimize decoder
//! overhead.

use thiserror::Error;

use super::event::{ConnEvent, EventType, Protocol, ResetReason};

/// Record size in bytes (matches `struct conn_event` in conn_tracker.c).
pub const RECORD_SIZE: usize = 56;

/// Errors that can occur during record decoding.
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("record too short: {size} bytes")]
    Truncated { size: usize },

    #[error("unknown event type: {raw}")]
    UnknownEventType { raw: u8 },

    #[error("unknown protocol: {raw}")]
    UnknownProtocol { raw: u8 },

    #[error("unknown reset reason: {raw}")]
    UnknownResetReason { raw: u8 },
}

/// Decode a raw ring buffer sample into a [`ConnEvent`].
///
/// Pure function of the input bytes. Trailing bytes beyond [`RECORD_SIZE`]
/// are ignored.
pub fn decode_record(data: &[u8]) -> Result<ConnEvent, DecodeError> {
    if data.len() < RECORD_SIZE {
        return Err(DecodeError::Truncated { size: data.len() });
    }

    let event_type_raw = read_u8(data, 20);
    let protocol_raw = read_u8(data, 21);
    let reset_reason_raw = read_u8(data, 55);

    let event_type = EventType::from_u8(event_type_raw).ok_or(DecodeError::UnknownEventType {
        raw: event_type_raw,
    })?;
    let protocol = Protocol::from_u8(protocol_raw).ok_or(DecodeError::UnknownProtocol {
        raw: protocol_raw,
    })?;
    let reset_reason =
        ResetReason::from_u8(reset_reason_raw).ok_or(DecodeError::UnknownResetReason {
            raw: reset_reason_raw,
        })?;

    Ok(ConnEvent {
        pid: read_u32_le(data, 0),
        tid: read_u32_le(data, 4),
        saddr: read_u32_le(data, 8),
        daddr: read_u32_le(data, 12),
        sport: read_u16_le(data, 16),
        dport: read_u16_le(data, 18),
        event_type,
        protocol,
        timestamp_ns: read_u64_le(data, 22),
        bytes_sent: read_u64_le(data, 30),
        bytes_received: read_u64_le(data, 38),
        rtt_us: read_u32_le(data, 46),
        duration_ms: read_u32_le(data, 50),
        tcp_state: read_u8(data, 54),
        reset_reason,
    })
}

// ---------------------------------------------------------------------------
// Safe byte-reading helpers (no indexing, no panics)
// ---------------------------------------------------------------------------

#[inline(always)]
fn read_u8(data: &[u8], offset: usize) -> u8 {
    debug_assert!(offset < data.len());
    // Safety: decode_record verifies `data.len() >= RECORD_SIZE` at entry.
    unsafe { *data.as_ptr().add(offset) }
}

#[inline(always)]
fn read_u16_le(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes(read_fixed::<2>(data, offset))
}

#[inline(always)]
fn read_u32_le(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes(read_fixed::<4>(data, offset))
}

#[inline(always)]
fn read_u64_le(data: &[u8], offset: usize) -> u64 {
    u64::from_le_bytes(read_fixed::<8>(data, offset))
}

#[inline(always)]
fn read_fixed<const N: usize>(data: &[u8], offset: usize) -> [u8; N] {
    debug_assert!(offset + N <= data.len());
    // Safety: all fixed offsets lie within RECORD_SIZE, checked at entry.
    unsafe { (data.as_ptr().add(offset) as *const [u8; N]).read_unaligned() }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
