//! In-memory FIFO acquisition buffer
//!
//! This module provides the bounded sample store that sits between a fast
//! producer (acquisition ticks) and a slower consumer (file writes). Key
//! components include:
//!
//! - `FifoBuffer`, the fixed-capacity ring of sample slots
//! - `SharedFifoBuffer`, the same ring behind a mutex for producer/consumer threads
//! - Overrun and end-of-data policies
//! - `PacketGate`, which turns single writes into packet-sized batches
//! - `CursorIndex`, a cursor that wraps modulo the capacity
//!
//! Counters never wrap; cursors always stay in `[0, capacity)`.

pub mod fifo;
pub mod policy;
pub mod shared;

/// Notifications emitted by a `FifoBuffer`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferEvent {
    /// The write counter reached a multiple of the packet length
    PacketFilled {
        /// Number of complete packets written so far
        packet: u64,
    },
    /// The write cursor wrapped back to slot 0
    Filled,
    /// A write found no free capacity
    Overrun {
        /// Total writes skipped since the last reset
        write_skip: u64,
    },
    /// A read found nothing unread
    End {
        /// Total reads skipped since the last reset
        read_skip: u64,
    },
    /// Cursors, counters and slots were reset
    Reinitialized,
    /// The capacity changed
    Resized {
        /// New capacity in slots
        capacity: usize,
    },
}

/// Snapshot of the buffer's geometry and counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BufferStatus {
    /// Total slots
    pub capacity: usize,
    /// Batching unit
    pub packet_length: usize,
    /// Next slot to write
    pub write_cursor: usize,
    /// Next slot to read
    pub read_cursor: usize,
    /// Samples written since the last reset
    pub write_counter: u64,
    /// Samples read since the last reset
    pub read_counter: u64,
    /// Writes skipped by a non-fatal overrun policy
    pub write_skip: u64,
    /// Reads skipped by a non-fatal end policy
    pub read_skip: u64,
}

impl BufferStatus {
    /// Samples written but not yet read
    pub fn unread(&self) -> u64 {
        self.write_counter - self.read_counter
    }

    /// Free slots left before the next write overruns
    pub fn free(&self) -> usize {
        self.capacity.saturating_sub(self.unread() as usize)
    }

    /// Buffer usage as a percentage of capacity
    pub fn usage_percent(&self) -> f32 {
        if self.capacity == 0 {
            return 0.0;
        }
        (self.unread() as f32 / self.capacity as f32) * 100.0
    }
}

/// Result of a successful call to `write`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WriteOutcome {
    /// Whether the values were stored (false when a policy skipped the write)
    pub written: bool,
    /// Whether this write completed a packet
    pub packet_filled: bool,
    /// Whether this write wrapped the cursor back to slot 0
    pub filled: bool,
    /// Unread samples discarded to make room (the `none` overrun policy)
    pub dropped: u64,
}

/// Cursor into the slot array, wrapping modulo the capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CursorIndex {
    value: usize,
    capacity: usize,
}

impl CursorIndex {
    /// Create a cursor at slot 0
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be at least one slot");
        Self { value: 0, capacity }
    }

    /// Current slot
    pub fn get(&self) -> usize {
        self.value
    }

    /// Advance by `step` slots, wrapping around the capacity
    pub fn advance(&mut self, step: usize) {
        self.value = self.wrap(self.value + step % self.capacity);
    }

    /// Wrap an arbitrary (possibly negative) offset to a slot index
    pub fn wrap_signed(&self, offset: i64) -> usize {
        offset.rem_euclid(self.capacity as i64) as usize
    }

    /// Wrap a value to the capacity
    pub fn wrap(&self, value: usize) -> usize {
        value % self.capacity
    }

    /// Move back to slot 0
    pub fn reset(&mut self) {
        self.value = 0;
    }
}

/// Cumulative write counter that fires once every `packet_length` writes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketGate {
    packet_length: usize,
    count: u64,
}

impl PacketGate {
    /// Create a gate for packets of `packet_length` samples
    pub fn new(packet_length: usize) -> Self {
        Self {
            packet_length: packet_length.max(1),
            count: 0,
        }
    }

    /// Record `step` writes. Returns `true` if the counter lands on a packet boundary.
    pub fn advance(&mut self, step: usize) -> bool {
        self.count += step as u64;
        step > 0 && self.count % self.packet_length as u64 == 0
    }

    /// Total writes recorded
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Complete packets recorded
    pub fn packets(&self) -> u64 {
        self.count / self.packet_length as u64
    }

    /// Writes recorded since the last packet boundary
    pub fn pending(&self) -> u64 {
        self.count % self.packet_length as u64
    }

    /// Batching unit
    pub fn packet_length(&self) -> usize {
        self.packet_length
    }

    /// Clear the counter
    pub fn reset(&mut self) {
        self.count = 0;
    }
}
