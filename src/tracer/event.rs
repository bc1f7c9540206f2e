use std::fmt;

/// EventType identifies the connection lifecycle transition a record reports.
/// Values must match `enum event_type` in `bpf/conn_tracker.c`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum EventType {
    Open = 1,
    Close = 2,
    Idle = 3,
    Reset = 4,
    Failed = 5,
    Data = 6,
}

/// Maximum EventType value, used for array sizing.
pub const MAX_EVENT_TYPE: usize = 6;

impl EventType {
    /// Returns the canonical metric/log label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Idle => "idle",
            Self::Reset => "reset",
            Self::Failed => "failed",
            Self::Data => "data",
        }
    }

    /// Convert from a raw u8 value.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            1 => Some(Self::Open),
            2 => Some(Self::Close),
            3 => Some(Self::Idle),
            4 => Some(Self::Reset),
            5 => Some(Self::Failed),
            6 => Some(Self::Data),
            _ => None,
        }
    }

    /// Return all event types in numeric order.
    pub fn all() -> &'static [Self] {
        &[
            Self::Open,
            Self::Close,
            Self::Idle,
            Self::Reset,
            Self::Failed,
            Self::Data,
        ]
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transport protocol of the observed connection.
/// Values are IANA protocol numbers and must match the producer ABI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Protocol {
    Unknown = 0,
    Tcp = 6,
    Udp = 17,
}

impl Protocol {
    /// Returns the canonical metric/log label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Tcp => "tcp",
            Self::Udp => "udp",
        }
    }

    /// Convert from a raw u8 value.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Unknown),
            6 => Some(Self::Tcp),
            17 => Some(Self::Udp),
            _ => None,
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a connection was reset. Meaningful only when the event type is Reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ResetReason {
    Normal = 0,
    Timeout = 1,
    Refused = 2,
    Abort = 3,
}

impl ResetReason {
    /// Returns the canonical metric/log label name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Normal => "normal",
            Self::Timeout => "timeout",
            Self::Refused => "refused",
            Self::Abort => "abort",
        }
    }

    /// Convert from a raw u8 value.
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(Self::Normal),
            1 => Some(Self::Timeout),
            2 => Some(Self::Refused),
            3 => Some(Self::Abort),
            _ => None,
        }
    }
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One decoded connection lifecycle event.
///
/// Produced once by the decoder, consumed once by the aggregator and once per
/// sink, then discarded. Addresses are packed IPv4 as emitted by the probe;
/// `timestamp_ns` is the kernel monotonic clock value, passed through raw.
/// `rtt_us` and `duration_ms` use 0 as a "not applicable" sentinel, never as
/// a real sample. `tcp_state` is the raw kernel state code, uninterpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnEvent {
    pub pid: u32,
    pub tid: u32,
    pub saddr: u32,
    pub daddr: u32,
    pub sport: u16,
    pub dport: u16,
    pub event_type: EventType,
    pub protocol: Protocol,
    pub timestamp_ns: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub rtt_us: u32,
    pub duration_ms: u32,
    pub tcp_state: u8,
    pub reset_reason: ResetReason,
}
