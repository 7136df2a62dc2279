//! Identity types for Shoal
//!
//! Entities and indexes are addressed by string keys; the types here
//! cover the numeric tags that travel alongside them.

use std::fmt;

/// Write-batch tag used to align a snapshot with a position in the change log.
///
/// Epochs from different writers are compared for equality only; within
/// one writer's tag the sequence orders batches on a key. Stored as 8
/// little-endian bytes both in update records and in the reserved `_epoch`
/// hash field.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Epoch(pub i64);

impl Epoch {
    pub const ZERO: Epoch = Epoch(0);

    /// Encoded width in bytes
    pub const SIZE: usize = 8;

    #[inline]
    pub fn new(value: i64) -> Self {
        Epoch(value)
    }

    /// Compose an epoch from a per-writer tag and a per-key sequence number.
    /// Format: \[0:1\]\[tag:23\]\[seq:40\]
    #[inline]
    pub fn from_tag_seq(tag: u32, seq: u64) -> Self {
        let tag = (tag & 0x7F_FFFF) as i64;
        Epoch((tag << 40) | (seq & 0xFF_FFFF_FFFF) as i64)
    }

    #[inline]
    pub fn tag(self) -> u32 {
        (self.0 >> 40) as u32
    }

    #[inline]
    pub fn seq(self) -> u64 {
        (self.0 as u64) & 0xFF_FFFF_FFFF
    }

    #[inline]
    pub fn to_bytes(self) -> [u8; 8] {
        self.0.to_le_bytes()
    }

    #[inline]
    pub fn from_bytes(bytes: [u8; 8]) -> Self {
        Epoch(i64::from_le_bytes(bytes))
    }

    /// Parse from a slice, returning `None` unless it is exactly 8 bytes
    #[inline]
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; 8] = bytes.try_into().ok()?;
        Some(Epoch::from_bytes(bytes))
    }
}

impl fmt::Debug for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Epoch({:06x}:{})", self.tag(), self.seq())
    }
}

impl fmt::Display for Epoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:06x}:{}", self.tag(), self.seq())
    }
}

/// Handle of a reader inside a `StreamContext` arena
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ReaderId(pub u64);

impl ReaderId {
    #[inline]
    pub fn new(id: u64) -> Self {
        ReaderId(id)
    }
}

impl fmt::Debug for ReaderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reader({})", self.0)
    }
}

/// Correlates a command sent on a connection with its reply.
///
/// Handles are assigned in send order per connection; replies carry the
/// handle of the command they answer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct CommandHandle(pub u64);

impl CommandHandle {
    #[inline]
    pub fn new(id: u64) -> Self {
        CommandHandle(id)
    }

    #[inline]
    pub fn next(self) -> Self {
        CommandHandle(self.0.wrapping_add(1))
    }
}

impl fmt::Debug for CommandHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Cmd({})", self.0)
    }
}
