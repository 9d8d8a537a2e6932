//! Tests for the FIFO ring buffer through the public API

use acquisition_buffer::types::{BufferEvent, BufferStatus, Condition, PolicyAction};
use acquisition_buffer::{Error, FifoBuffer, Policy, PolicyKind, SharedFifoBuffer};
use std::sync::{Arc, Mutex};
use std::thread;

/// Writing up to capacity and reading back returns the same values in order
#[test]
fn test_fifo_round_trip() {
    for n in 1..=8 {
        let mut buffer = FifoBuffer::new(8, 1, 0i32).unwrap();
        let values: Vec<i32> = (0..n).map(|i| i * 10 - 3).collect();

        for value in &values {
            buffer.write(*value).unwrap();
        }

        assert_eq!(buffer.read(n as usize).unwrap(), values, "Round trip of {n} values");
        assert!(buffer.is_empty());
    }
}

/// The (C+1)-th write without a read fails, and none before it
#[test]
fn test_overrun_exactness() {
    let capacity = 5;
    let mut buffer = FifoBuffer::new(capacity, 1, 0u8).unwrap();

    for value in 0..capacity as u8 {
        buffer
            .write(value)
            .unwrap_or_else(|e| panic!("Write {value} should fit: {e}"));
    }

    let err = buffer.write(99).unwrap_err();
    assert!(
        matches!(err, Error::BufferOverrun { capacity: 5, unread: 5 }),
        "Unexpected error: {err}"
    );
    assert_eq!(buffer.write_counter(), 5, "The failed write must not advance the counter");
}

/// Packet-filled fires exactly at P, 2P, 3P writes
#[test]
fn test_packet_cadence() {
    let mut buffer = FifoBuffer::new(12, 3, 0u32).unwrap();
    buffer.set_overrun_policy(PolicyKind::None);

    let filled_at = Arc::new(Mutex::new(Vec::new()));
    let sink = filled_at.clone();
    buffer.subscribe(move |event| {
        if let BufferEvent::PacketFilled { packet } = event {
            sink.lock().unwrap().push(*packet);
        }
    });

    let mut write_counts = Vec::new();
    for value in 1..=10 {
        if buffer.write(value).unwrap().packet_filled {
            write_counts.push(buffer.write_counter());
        }
    }

    assert_eq!(write_counts, vec![3, 6, 9]);
    assert_eq!(*filled_at.lock().unwrap(), vec![1, 2, 3]);
}

/// Capacity 4, packet 2, silent skip: a read frees room for two more writes
#[test]
fn test_packet_scenario_with_silent_skip() {
    let mut buffer = FifoBuffer::new(4, 2, 0.0f64).unwrap();
    buffer.set_overrun_policy(PolicyKind::SilentSkip);

    let packets = Arc::new(Mutex::new(0));
    let sink = packets.clone();
    buffer.subscribe(move |event| {
        if matches!(event, BufferEvent::PacketFilled { .. }) {
            *sink.lock().unwrap() += 1;
        }
    });

    for value in [0.0, 1.0, 2.0, 3.0] {
        assert!(buffer.write(value).unwrap().written);
    }
    assert_eq!(*packets.lock().unwrap(), 2);
    assert!(buffer.is_full());

    assert_eq!(buffer.read(2).unwrap(), vec![0.0, 1.0]);

    assert!(buffer.write(4.0).unwrap().written);
    assert!(buffer.write(5.0).unwrap().written);
    assert_eq!(buffer.status().write_skip, 0, "No write should have been skipped");
    assert_eq!(buffer.read(4).unwrap(), vec![2.0, 3.0, 4.0, 5.0]);
}

/// Capacity that is not a multiple of the packet length grows to one
#[test]
fn test_capacity_grows_to_packet_multiple() {
    let buffer = FifoBuffer::new(5, 2, 0u8).unwrap();
    assert_eq!(buffer.capacity(), 6);

    let buffer = FifoBuffer::new(1, 4, 0u8).unwrap();
    assert_eq!(buffer.capacity(), 4, "Capacity is never below the packet length");

    assert!(matches!(FifoBuffer::new(0, 1, 0u8), Err(Error::Configuration(_))));
}

/// Slots are independent copies of the template
#[test]
fn test_slots_are_independent_copies() {
    let mut buffer = FifoBuffer::new(3, 1, vec![0u16; 4]).unwrap();

    let mut frame = vec![7u16; 4];
    buffer.write(frame.clone()).unwrap();
    frame[0] = 1;
    buffer.write(frame).unwrap();

    assert_eq!(buffer.slots()[0], vec![7, 7, 7, 7]);
    assert_eq!(buffer.slots()[1], vec![1, 7, 7, 7]);
    assert_eq!(buffer.slots()[2], vec![0, 0, 0, 0]);
}

/// A custom overrun handler decides per occurrence
#[test]
fn test_custom_overrun_handler() {
    let mut buffer = FifoBuffer::new(2, 1, 0u8).unwrap();
    let mut seen = 0;
    buffer.set_overrun_policy(Policy::custom(move |condition: Condition, _status: &BufferStatus| {
        assert_eq!(condition, Condition::Overrun);
        seen += 1;
        Ok(if seen == 1 { PolicyAction::Skip } else { PolicyAction::Proceed })
    }));

    buffer.write(1).unwrap();
    buffer.write(2).unwrap();
    assert!(!buffer.write(3).unwrap().written, "First overrun is skipped");
    let outcome = buffer.write(4).unwrap();
    assert!(outcome.written, "Second overrun proceeds");
    assert_eq!(outcome.dropped, 1);

    assert_eq!(buffer.read(2).unwrap(), vec![2, 4]);
}

/// Reading past the end under the error policy fails
#[test]
fn test_end_policy_error() {
    let mut buffer = FifoBuffer::new(2, 1, 0u8).unwrap();
    assert!(buffer.read(1).unwrap().is_empty(), "Default end policy is a silent skip");

    buffer.set_end_policy(PolicyKind::Error);
    assert!(matches!(buffer.read(1), Err(Error::BufferEnd { counter: 0 })));
    assert_eq!(buffer.status().read_skip, 1);
}

/// A custom handler can refuse with its own error
#[test]
fn test_custom_end_handler_error() {
    let mut buffer = FifoBuffer::new(2, 1, 0u8).unwrap();
    buffer.set_end_policy(Policy::custom(|_: Condition, status: &BufferStatus| {
        Err(Error::Handler(format!("no data after {} reads", status.read_counter)))
    }));

    buffer.write(5).unwrap();
    assert_eq!(buffer.read(1).unwrap(), vec![5]);
    match buffer.read(1) {
        Err(Error::Handler(message)) => assert_eq!(message, "no data after 1 reads"),
        other => panic!("Unexpected result: {other:?}"),
    }
}

/// Shared buffer keeps order between a producer thread and a consumer thread
#[test]
fn test_shared_buffer_across_threads() {
    const FRAMES: usize = 500;

    let buffer = Arc::new(SharedFifoBuffer::new(16, 4, [0u32; 8]).unwrap());
    buffer.with_buffer(|b| b.set_overrun_policy(PolicyKind::Error));

    let producer = {
        let buffer = buffer.clone();
        thread::spawn(move || {
            let mut index = 0;
            while index < FRAMES {
                if buffer.write([index as u32; 8]).is_ok() {
                    index += 1;
                } else {
                    thread::yield_now();
                }
            }
        })
    };

    let mut frames = Vec::with_capacity(FRAMES);
    while frames.len() < FRAMES {
        if buffer.status().unread() == 0 {
            buffer.wait_for_data(Some(5));
            continue;
        }
        frames.extend(buffer.read(4).unwrap());
    }
    producer.join().unwrap();

    for (index, frame) in frames.iter().enumerate() {
        assert_eq!(frame[0], index as u32, "Frame {index} out of order");
    }
    assert_eq!(buffer.usage_percent(), 0.0);
}
