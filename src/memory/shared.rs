//! Producer/consumer wrapper around `FifoBuffer`
//!
//! A `FifoBuffer` is correct only while its overrun/end checks and the cursor
//! advance that follows them are not interleaved with another operation. This
//! wrapper keeps both inside one `parking_lot::Mutex` critical region so a
//! producer thread and a consumer thread can share a buffer. Key features:
//!
//! - Every write and read runs check-then-advance under the lock
//! - Condition variable for consumer notification
//! - Counters published through cache-padded atomics, so monitoring threads
//!   can read usage without contending for the lock
//!
//! Buffer listeners run while the lock is held and must not call back into
//! the same `SharedFifoBuffer`.

use crate::error::Result;
use crate::memory::fifo::FifoBuffer;
use crate::memory::{BufferStatus, WriteOutcome};
use crossbeam_utils::CachePadded;
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Thread-safe FIFO buffer shared by one producer and one consumer
pub struct SharedFifoBuffer<T> {
    /// The ring and its policies
    inner: Mutex<FifoBuffer<T>>,
    /// Set by writers, cleared by the consumer when it wakes
    data_ready: Mutex<bool>,
    /// Wakes a consumer blocked in `wait_for_data`
    consumer_signal: Condvar,
    /// Published write counter
    written: CachePadded<AtomicU64>,
    /// Published read counter
    consumed: CachePadded<AtomicU64>,
    /// Overruns seen since creation, across resets
    overruns: CachePadded<AtomicU64>,
    /// Published capacity
    capacity: AtomicUsize,
}

impl<T: Clone> SharedFifoBuffer<T> {
    /// Create a shared buffer; see `FifoBuffer::new`
    pub fn new(capacity: usize, packet_length: usize, init_object: T) -> Result<Self> {
        Ok(Self::from_buffer(FifoBuffer::new(capacity, packet_length, init_object)?))
    }

    /// Wrap an already configured buffer
    pub fn from_buffer(buffer: FifoBuffer<T>) -> Self {
        let status = buffer.status();
        Self {
            inner: Mutex::new(buffer),
            data_ready: Mutex::new(false),
            consumer_signal: Condvar::new(),
            written: CachePadded::new(AtomicU64::new(status.write_counter)),
            consumed: CachePadded::new(AtomicU64::new(status.read_counter)),
            overruns: CachePadded::new(AtomicU64::new(0)),
            capacity: AtomicUsize::new(status.capacity),
        }
    }

    /// Write one sample under the lock and wake the consumer
    pub fn write(&self, value: T) -> Result<WriteOutcome> {
        let outcome = {
            let mut buffer = self.inner.lock();
            let skips_before = buffer.status().write_skip;
            let result = buffer.write(value);

            let status = buffer.status();
            if result.is_err() || status.write_skip > skips_before || matches!(result, Ok(ref o) if o.dropped > 0) {
                self.overruns.fetch_add(1, Ordering::Relaxed);
            }
            self.publish(&status);
            result?
        };

        if outcome.written {
            self.notify_consumer();
        }
        Ok(outcome)
    }

    /// Read up to `step` samples under the lock
    pub fn read(&self, step: usize) -> Result<Vec<T>> {
        let mut buffer = self.inner.lock();
        let result = buffer.read(step);
        self.publish(&buffer.status());
        result
    }

    /// Run `f` with exclusive access to the underlying buffer
    ///
    /// Use this for reconfiguration, policy changes and snapshots.
    pub fn with_buffer<R>(&self, f: impl FnOnce(&mut FifoBuffer<T>) -> R) -> R {
        let mut buffer = self.inner.lock();
        let result = f(&mut buffer);
        self.publish(&buffer.status());
        result
    }
}

impl<T> SharedFifoBuffer<T> {
    fn publish(&self, status: &BufferStatus) {
        self.written.store(status.write_counter, Ordering::Release);
        self.consumed.store(status.read_counter, Ordering::Release);
        self.capacity.store(status.capacity, Ordering::Release);
    }

    /// Notify the consumer that new data is available
    fn notify_consumer(&self) {
        let mut ready = self.data_ready.lock();
        *ready = true;
        self.consumer_signal.notify_one();
    }

    /// Wait for new data to be available
    ///
    /// # Arguments
    ///
    /// * `timeout_ms` - Maximum time to wait in milliseconds, or None to wait indefinitely
    ///
    /// Returns `true` if a write happened since the last wake-up.
    pub fn wait_for_data(&self, timeout_ms: Option<u64>) -> bool {
        let mut ready = self.data_ready.lock();

        if *ready {
            *ready = false;
            return true;
        }

        match timeout_ms {
            Some(timeout) => {
                let timed_out = self
                    .consumer_signal
                    .wait_for(&mut ready, Duration::from_millis(timeout))
                    .timed_out();
                let was_ready = *ready;
                *ready = false;
                !timed_out || was_ready
            }
            None => {
                while !*ready {
                    self.consumer_signal.wait(&mut ready);
                }
                *ready = false;
                true
            }
        }
    }

    /// Snapshot of the buffer's counters, taken under the lock
    pub fn status(&self) -> BufferStatus {
        self.inner.lock().status()
    }

    /// Unread samples as a percentage of capacity, read without locking
    pub fn usage_percent(&self) -> f32 {
        let written = self.written.load(Ordering::Acquire);
        let consumed = self.consumed.load(Ordering::Acquire);
        let capacity = self.capacity.load(Ordering::Acquire);
        if capacity == 0 {
            return 0.0;
        }
        (written.saturating_sub(consumed) as f32 / capacity as f32) * 100.0
    }

    /// Overruns seen since creation, read without locking
    pub fn overruns(&self) -> u64 {
        self.overruns.load(Ordering::Relaxed)
    }

    /// Current capacity in slots, read without locking
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Acquire)
    }
}
