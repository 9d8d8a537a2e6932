//! Fixed-capacity FIFO ring of sample slots
//!
//! The buffer holds `capacity` slots, each an independent clone of an
//! `init_object` template. Writes land at the write cursor and reads consume
//! from the read cursor; both cursors wrap modulo the capacity while the
//! write and read counters grow monotonically. The invariants
//!
//! - `read_counter <= write_counter`
//! - `write_counter - read_counter <= capacity`
//!
//! hold after every operation. Overrun and end-of-data are resolved by the
//! configured `Policy` before any slot or cursor is touched.
//!
//! The buffer takes `&mut self` for every mutation and is meant to be driven
//! from a single call stack; `SharedFifoBuffer` wraps it for use across threads.

use crate::error::{Error, Result};
use crate::events::{ListenerId, Observers};
use crate::memory::policy::{Condition, Policy, PolicyAction};
use crate::memory::{BufferEvent, BufferStatus, CursorIndex, PacketGate, WriteOutcome};
use tracing::debug;

/// Fixed-capacity ring buffer of `T` samples
pub struct FifoBuffer<T> {
    /// Sample slots
    slots: Vec<T>,
    /// Template every slot is seeded from
    init_object: T,
    /// Next slot to write
    write_cursor: CursorIndex,
    /// Next slot to read
    read_cursor: CursorIndex,
    /// Write counter, doubling as the packet boundary detector
    gate: PacketGate,
    /// Samples consumed since the last reset
    read_counter: u64,
    /// Writes skipped by the overrun policy
    write_skip: u64,
    /// Reads skipped by the end policy
    read_skip: u64,
    overrun_policy: Policy,
    end_policy: Policy,
    observers: Observers<BufferEvent>,
}

impl<T: Clone> FifoBuffer<T> {
    /// Create a buffer of `capacity` slots seeded from `init_object`
    ///
    /// `capacity` is grown to the next multiple of `packet_length`.
    pub fn new(capacity: usize, packet_length: usize, init_object: T) -> Result<Self> {
        let (capacity, packet_length) = checked_geometry(capacity, packet_length)?;

        Ok(Self {
            slots: vec![init_object.clone(); capacity],
            init_object,
            write_cursor: CursorIndex::new(capacity),
            read_cursor: CursorIndex::new(capacity),
            gate: PacketGate::new(packet_length),
            read_counter: 0,
            write_skip: 0,
            read_skip: 0,
            overrun_policy: Policy::default_overrun(),
            end_policy: Policy::default_end(),
            observers: Observers::new(),
        })
    }

    /// Re-create the slot array with a new geometry and template
    ///
    /// Cursors, counters and skip counters are cleared. Emits `Resized` when the
    /// capacity changes, then `Reinitialized`.
    pub fn configure(&mut self, capacity: usize, packet_length: usize, init_object: T) -> Result<()> {
        let (capacity, packet_length) = checked_geometry(capacity, packet_length)?;
        let resized = capacity != self.slots.len();

        self.init_object = init_object;
        self.write_cursor = CursorIndex::new(capacity);
        self.read_cursor = CursorIndex::new(capacity);
        self.gate = PacketGate::new(packet_length);
        self.slots = vec![self.init_object.clone(); capacity];
        self.clear_counters();

        debug!(capacity, packet_length, "Buffer configured");

        if resized {
            self.observers.emit(&BufferEvent::Resized { capacity });
        }
        self.observers.emit(&BufferEvent::Reinitialized);
        Ok(())
    }

    /// Change the capacity, keeping the packet length and template
    pub fn resize(&mut self, capacity: usize) -> Result<()> {
        let packet_length = self.packet_length();
        let init_object = self.init_object.clone();
        self.configure(capacity, packet_length, init_object)
    }

    /// Change the packet length, growing the capacity to a multiple of it
    pub fn set_packet_length(&mut self, packet_length: usize) -> Result<()> {
        let capacity = self.capacity().max(packet_length);
        let init_object = self.init_object.clone();
        self.configure(capacity, packet_length, init_object)
    }

    /// Reset cursors, counters and skip counters, reseeding every slot
    ///
    /// Passing `Some(template)` replaces the template first.
    pub fn reinitialize(&mut self, init_object: Option<T>) {
        if let Some(init_object) = init_object {
            self.init_object = init_object;
        }

        for slot in self.slots.iter_mut() {
            *slot = self.init_object.clone();
        }
        self.write_cursor.reset();
        self.read_cursor.reset();
        self.gate.reset();
        self.clear_counters();

        self.observers.emit(&BufferEvent::Reinitialized);
    }

    /// Write one sample
    pub fn write(&mut self, value: T) -> Result<WriteOutcome> {
        self.write_many(std::slice::from_ref(&value))
    }

    /// Write `values.len()` contiguous samples
    ///
    /// The overrun check runs first; under a skipping policy nothing is written
    /// and the outcome reports `written: false`. Otherwise the samples are
    /// copied at the write cursor, wrapping across the end of the slot array
    /// in two chunks if needed.
    pub fn write_many(&mut self, values: &[T]) -> Result<WriteOutcome> {
        let step = values.len();
        if step == 0 {
            return Ok(WriteOutcome::default());
        }
        let capacity = self.capacity();
        if step > capacity {
            return Err(Error::configuration(format!(
                "cannot write {step} samples into a buffer of {capacity} slots"
            )));
        }

        let mut dropped = 0;
        if self.unread() as usize + step > capacity {
            let status = self.status();
            match self.overrun_policy.resolve(Condition::Overrun, &status)? {
                PolicyAction::Skip => {
                    self.write_skip += 1;
                    self.observers.emit(&BufferEvent::Overrun {
                        write_skip: self.write_skip,
                    });
                    return Ok(WriteOutcome::default());
                }
                PolicyAction::Proceed => {
                    dropped = (self.unread() as usize + step - capacity) as u64;
                    self.observers.emit(&BufferEvent::Overrun {
                        write_skip: self.write_skip,
                    });
                }
            }
        }

        let start = self.write_cursor.get();
        let first = step.min(capacity - start);
        self.slots[start..start + first].clone_from_slice(&values[..first]);
        if first < step {
            self.slots[..step - first].clone_from_slice(&values[first..]);
        }
        self.write_cursor.advance(step);
        let packet_filled = self.gate.advance(step);

        if dropped > 0 {
            // The oldest unread samples were overwritten
            self.read_cursor.advance(dropped as usize);
            self.read_counter += dropped;
            debug!(dropped, "Overwrote unread samples");
        }

        let filled = self.write_cursor.get() == 0 && self.gate.count() != 0;

        if packet_filled {
            debug!(packet = self.gate.packets(), "Packet filled");
            self.observers.emit(&BufferEvent::PacketFilled {
                packet: self.gate.packets(),
            });
        }
        if filled {
            self.observers.emit(&BufferEvent::Filled);
        }

        Ok(WriteOutcome {
            written: true,
            packet_filled,
            filled,
            dropped,
        })
    }

    /// Read up to `step` of the oldest unread samples, in write order
    ///
    /// With nothing unread the end policy decides: skipping policies return an
    /// empty vector, `Ignore` returns the stale slots at the read cursor
    /// without advancing it. When fewer than `step` samples are unread, only
    /// those are returned.
    pub fn read(&mut self, step: usize) -> Result<Vec<T>> {
        if step == 0 {
            return Ok(Vec::new());
        }

        let unread = self.unread() as usize;
        if unread == 0 {
            let status = self.status();
            return match self.end_policy.resolve(Condition::End, &status)? {
                PolicyAction::Skip => {
                    self.read_skip += 1;
                    self.observers.emit(&BufferEvent::End {
                        read_skip: self.read_skip,
                    });
                    Ok(Vec::new())
                }
                PolicyAction::Proceed => {
                    self.observers.emit(&BufferEvent::End {
                        read_skip: self.read_skip,
                    });
                    Ok(self.collect(self.read_cursor.get(), step.min(self.capacity())))
                }
            };
        }

        let count = step.min(unread);
        if count < step {
            debug!(requested = step, available = count, "Short read");
        }

        let values = self.collect(self.read_cursor.get(), count);
        self.read_cursor.advance(count);
        self.read_counter += count as u64;
        Ok(values)
    }

    /// Read a single sample, `None` if a skipping end policy absorbed the read
    pub fn read_one(&mut self) -> Result<Option<T>> {
        Ok(self.read(1)?.into_iter().next())
    }

    /// Slot indices of the `n` most recent writes, newest first
    pub fn newest_indices(&self, n: usize) -> Vec<usize> {
        let cursor = self.write_cursor.get() as i64;
        (0..n as i64)
            .map(|i| self.write_cursor.wrap_signed(cursor - 1 - i))
            .collect()
    }

    /// Slot indices starting at the read cursor, oldest first
    pub fn oldest_indices(&self, n: usize) -> Vec<usize> {
        let cursor = self.read_cursor.get();
        (0..n).map(|i| self.read_cursor.wrap(cursor + i)).collect()
    }

    /// Clones of the `n` most recent slots, newest first, without moving cursors
    pub fn newest(&self, n: usize) -> Vec<T> {
        self.newest_indices(n)
            .into_iter()
            .map(|index| self.slots[index].clone())
            .collect()
    }

    /// Clones of `n` slots from the read cursor on, without moving cursors
    pub fn oldest(&self, n: usize) -> Vec<T> {
        self.oldest_indices(n)
            .into_iter()
            .map(|index| self.slots[index].clone())
            .collect()
    }

    fn collect(&self, start: usize, count: usize) -> Vec<T> {
        let capacity = self.capacity();
        let first = count.min(capacity - start);
        let mut values = Vec::with_capacity(count);
        values.extend_from_slice(&self.slots[start..start + first]);
        values.extend_from_slice(&self.slots[..count - first]);
        values
    }
}

impl<T> FifoBuffer<T> {
    fn clear_counters(&mut self) {
        self.read_counter = 0;
        self.write_skip = 0;
        self.read_skip = 0;
    }

    /// Register a listener for buffer events
    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&BufferEvent) + Send + 'static,
    {
        self.observers.subscribe(listener)
    }

    /// Remove a listener
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Replace the overrun policy
    pub fn set_overrun_policy(&mut self, policy: impl Into<Policy>) {
        self.overrun_policy = policy.into();
    }

    /// Replace the end-of-data policy
    pub fn set_end_policy(&mut self, policy: impl Into<Policy>) {
        self.end_policy = policy.into();
    }

    /// Current overrun policy
    pub fn overrun_policy(&self) -> &Policy {
        &self.overrun_policy
    }

    /// Current end-of-data policy
    pub fn end_policy(&self) -> &Policy {
        &self.end_policy
    }

    /// Snapshot of geometry and counters
    pub fn status(&self) -> BufferStatus {
        BufferStatus {
            capacity: self.capacity(),
            packet_length: self.packet_length(),
            write_cursor: self.write_cursor.get(),
            read_cursor: self.read_cursor.get(),
            write_counter: self.gate.count(),
            read_counter: self.read_counter,
            write_skip: self.write_skip,
            read_skip: self.read_skip,
        }
    }

    /// Total slots
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Batching unit
    pub fn packet_length(&self) -> usize {
        self.gate.packet_length()
    }

    /// Samples written since the last reset
    pub fn write_counter(&self) -> u64 {
        self.gate.count()
    }

    /// Samples read since the last reset
    pub fn read_counter(&self) -> u64 {
        self.read_counter
    }

    /// Samples written but not yet read
    pub fn unread(&self) -> u64 {
        self.gate.count() - self.read_counter
    }

    /// Whether nothing is waiting to be read
    pub fn is_empty(&self) -> bool {
        self.unread() == 0
    }

    /// Whether the next write would overrun
    pub fn is_full(&self) -> bool {
        self.unread() as usize >= self.capacity()
    }

    /// Template the slots are seeded from
    pub fn init_object(&self) -> &T {
        &self.init_object
    }

    /// Raw slot contents, in slot order
    pub fn slots(&self) -> &[T] {
        &self.slots
    }
}

impl<T> std::fmt::Debug for FifoBuffer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FifoBuffer")
            .field("status", &self.status())
            .field("overrun_policy", &self.overrun_policy)
            .field("end_policy", &self.end_policy)
            .finish()
    }
}

/// Validate a geometry, growing `capacity` to a multiple of `packet_length`
fn checked_geometry(capacity: usize, packet_length: usize) -> Result<(usize, usize)> {
    if packet_length == 0 {
        return Err(Error::configuration("packet length must be at least 1"));
    }
    if capacity == 0 {
        return Err(Error::configuration("buffer capacity must be at least 1"));
    }

    let capacity = capacity.div_ceil(packet_length) * packet_length;
    Ok((capacity, packet_length))
}
