//! Tests for the triggered persistence session

use acquisition_buffer::types::BufferEvent;
use acquisition_buffer::{
    Append, ArgTemplate, CallArgs, Error, Limit, SaveSession, SessionConfig,
    SessionEvent, StopCondition,
};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// One recorded callback invocation
#[derive(Debug, Clone)]
struct Call {
    path: PathBuf,
    samples: Vec<f64>,
    batch: bool,
    extra: Option<Value>,
}

struct TestContext {
    session: SaveSession<f64>,
    calls: Arc<Mutex<Vec<Call>>>,
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl TestContext {
    fn new(config: SessionConfig) -> Self {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let sink = calls.clone();
        let callback = move |call: &CallArgs<'_, f64>| -> anyhow::Result<()> {
            let data = call.data().expect("template carries data");
            sink.lock().unwrap().push(Call {
                path: call.path().expect("template carries a path").to_path_buf(),
                samples: data.as_slice().to_vec(),
                batch: data.is_batch(),
                extra: call.value("extra").cloned(),
            });
            Ok(())
        };

        let mut session = SaveSession::new(&config, 0.0, callback).unwrap();
        let events = Arc::new(Mutex::new(Vec::new()));
        let event_sink = events.clone();
        session.subscribe(move |event| event_sink.lock().unwrap().push(event.clone()));

        Self {
            session,
            calls,
            events,
        }
    }

    fn count(limit: u64) -> Self {
        Self::new(SessionConfig {
            limit: limit as f64,
            path: Some("out/spectrum.txt".into()),
            append: vec!["count".into()],
            ..SessionConfig::default()
        })
    }

    fn trigger(&mut self, value: f64) {
        self.session.run(&[value]).unwrap();
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    fn saved_counts(&self) -> Vec<u64> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|event| match event {
                SessionEvent::Saved { count, .. } => Some(*count),
                _ => None,
            })
            .collect()
    }
}

/// Count limit 3: three callbacks numbered 0, 1, 2, then the session is idle
#[test]
fn test_count_limit_of_three() {
    let mut ctx = TestContext::count(3);
    ctx.session.start().unwrap();

    ctx.trigger(1.0);
    ctx.trigger(2.0);
    assert!(ctx.session.enabled(), "Session should still run after two triggers");
    ctx.trigger(3.0);
    assert!(!ctx.session.enabled(), "Session should stop on the third trigger");

    ctx.trigger(4.0);

    let paths: Vec<PathBuf> = ctx.calls().into_iter().map(|call| call.path).collect();
    assert_eq!(
        paths,
        vec![
            PathBuf::from("out/spectrum_0.txt"),
            PathBuf::from("out/spectrum_1.txt"),
            PathBuf::from("out/spectrum_2.txt"),
        ]
    );
    assert_eq!(ctx.saved_counts(), vec![0, 1, 2]);
    assert_eq!(ctx.events.lock().unwrap().last(), Some(&SessionEvent::Stopped));
}

/// Decimation: six triggers with save_every 2 buffer three samples
#[test]
fn test_save_every_two() {
    let mut ctx = TestContext::new(SessionConfig {
        limit: 100.0,
        save_every: 2,
        packet_length: 10,
        path: Some("out/x".into()),
        ..SessionConfig::default()
    });
    ctx.session.start().unwrap();

    for value in 1..=6 {
        ctx.trigger(value as f64);
    }

    assert_eq!(ctx.session.buffer().write_counter(), 3);
    assert_eq!(ctx.session.buffer().newest(3), vec![6.0, 4.0, 2.0]);
    assert!(ctx.calls().is_empty(), "No packet of ten is complete");
}

/// Partial packet: packet 10, count limit 3, the three samples flush on the third trigger
#[test]
fn test_partial_packet_flush_on_auto_stop() {
    let mut ctx = TestContext::new(SessionConfig {
        limit: 3.0,
        packet_length: 10,
        path: Some("out/partial.txt".into()),
        ..SessionConfig::default()
    });
    ctx.session.start().unwrap();

    ctx.trigger(0.5);
    ctx.trigger(1.5);
    assert!(ctx.calls().is_empty());
    ctx.trigger(2.5);

    let samples: Vec<f64> = ctx.calls().iter().flat_map(|call| call.samples.clone()).collect();
    assert_eq!(samples, vec![0.5, 1.5, 2.5]);
    assert_eq!(ctx.calls().len(), 3, "One callback per element outside single-file mode");
    assert!(ctx.calls().iter().all(|call| !call.batch));
}

/// Single-file mode hands each packet over in one call
#[test]
fn test_single_file_batches() {
    let mut ctx = TestContext::new(SessionConfig {
        limit: 5.0,
        packet_length: 2,
        single_file: true,
        path: Some("out/batch.txt".into()),
        ..SessionConfig::default()
    });
    ctx.session.start().unwrap();

    for value in 0..5 {
        ctx.trigger(value as f64);
    }

    let batches: Vec<Vec<f64>> = ctx.calls().into_iter().map(|call| call.samples).collect();
    assert_eq!(batches, vec![vec![0.0, 1.0], vec![2.0, 3.0], vec![4.0]]);
    assert_eq!(ctx.session.saved_count(), 3);
}

/// An empty append set escalates to a timestamp suffix for multi-file sessions
#[test]
fn test_naming_escalation() {
    let mut ctx = TestContext::new(SessionConfig {
        limit: 5.0,
        append: vec![],
        path: Some("out/frame.txt".into()),
        ..SessionConfig::default()
    });
    assert_eq!(ctx.session.effective_append(), Append::TIMESTAMP);

    ctx.session.set_limit(Limit::Count(1)).unwrap();
    assert_eq!(ctx.session.effective_append(), Append::NONE);

    ctx.session.start().unwrap();
    ctx.trigger(1.0);
    assert_eq!(ctx.calls()[0].path, PathBuf::from("out/frame.txt"));
}

/// Timestamped names carry date, time and milliseconds before the count
#[test]
fn test_timestamp_and_count_suffix_shape() {
    let mut ctx = TestContext::new(SessionConfig {
        limit: 1.0,
        append: vec!["timestamp".into(), "count".into()],
        path: Some("out/frame".into()),
        default_extension: "dat".into(),
        ..SessionConfig::default()
    });
    ctx.session.start().unwrap();
    ctx.trigger(1.0);

    let name = ctx.calls()[0].path.file_name().unwrap().to_string_lossy().into_owned();
    // frame_YYYYMMDD_HHMMSS.mmm_0.dat
    let parts: Vec<&str> = name.split('_').collect();
    assert_eq!(parts.len(), 4, "Unexpected name {name}");
    assert_eq!(parts[0], "frame");
    assert_eq!(parts[1].len(), 8);
    assert!(parts[1].chars().all(|c| c.is_ascii_digit()));
    assert_eq!(parts[2].len(), 10);
    assert_eq!(&parts[2][6..7], ".");
    assert_eq!(parts[3], "0.dat");
}

/// Time stop condition ends the session once the elapsed time reaches the limit
#[test]
fn test_time_limit() {
    let mut ctx = TestContext::new(SessionConfig {
        stop_condition: "time".into(),
        limit: 0.05,
        packet_length: 100,
        capacity: Some(1000),
        path: Some("out/timed.txt".into()),
        ..SessionConfig::default()
    });
    ctx.session.start().unwrap();

    ctx.trigger(1.0);
    assert!(ctx.session.enabled());
    thread::sleep(Duration::from_millis(60));
    ctx.trigger(2.0);

    assert!(!ctx.session.enabled(), "Session should stop after its time limit");
    let samples: Vec<f64> = ctx.calls().iter().flat_map(|call| call.samples.clone()).collect();
    assert_eq!(samples, vec![1.0, 2.0], "The partial packet is flushed on stop");
    assert!(ctx.session.run_time().unwrap() >= Duration::from_millis(50));
    assert!(ctx.session.stop_time().is_some());
}

/// Restarting clears counters and the buffer
#[test]
fn test_restart_resets_counters() {
    let mut ctx = TestContext::count(2);
    ctx.session.start().unwrap();
    ctx.trigger(1.0);
    ctx.trigger(2.0);
    assert!(!ctx.session.enabled());

    ctx.session.start().unwrap();
    assert_eq!(ctx.session.saved_count(), 0);
    assert_eq!(ctx.session.trigger_count(), 0);
    assert_eq!(ctx.session.buffer().write_counter(), 0);

    ctx.trigger(3.0);
    assert_eq!(ctx.calls().last().unwrap().path, PathBuf::from("out/spectrum_0.txt"));
}

/// Manual stop leaves buffered samples for the caller to flush
#[test]
fn test_manual_stop_and_flush() {
    let mut ctx = TestContext::new(SessionConfig {
        limit: 100.0,
        packet_length: 4,
        path: Some("out/manual.txt".into()),
        ..SessionConfig::default()
    });
    ctx.session.start().unwrap();
    ctx.trigger(1.0);
    ctx.trigger(2.0);

    ctx.session.stop();
    assert!(ctx.calls().is_empty(), "stop() flushes nothing by itself");
    assert_eq!(ctx.session.buffer().unread(), 2);

    assert_eq!(ctx.session.stop_and_flush().unwrap(), 2);
    assert!(ctx.session.buffer().is_empty());
}

/// Keyword arguments resolve literals and live attributes per call
#[test]
fn test_callback_kwargs_with_live_attribute() {
    let mut ctx = TestContext::count(2);
    ctx.session.set_callback_kwargs(
        [("extra".to_string(), ArgTemplate::attribute("averages"))]
            .into_iter()
            .collect(),
    );
    ctx.session.set_attribute("averages", 4);
    ctx.session.start().unwrap();

    ctx.trigger(1.0);
    ctx.session.set_attribute("averages", 8);
    ctx.trigger(2.0);

    let extras: Vec<Option<Value>> = ctx.calls().into_iter().map(|call| call.extra).collect();
    assert_eq!(extras, vec![Some(json!(4)), Some(json!(8))]);
    assert!(ctx.events.lock().unwrap().contains(&SessionEvent::CallbackArgsSet));
}

/// A template naming an unknown attribute fails at flush time
#[test]
fn test_unknown_attribute_fails_flush() {
    let mut ctx = TestContext::count(2);
    ctx.session.set_callback_args(vec![
        ArgTemplate::Path,
        ArgTemplate::Data,
        ArgTemplate::attribute("gain"),
    ]);
    ctx.session.start().unwrap();

    assert!(matches!(ctx.session.run(&[1.0]), Err(Error::Configuration(_))));
}

/// A failing callback surfaces as a typed error and the count does not advance
#[test]
fn test_callback_failure() {
    let mut ctx = TestContext::count(3);
    ctx.session
        .set_callback(|_: &CallArgs<'_, f64>| -> anyhow::Result<()> { anyhow::bail!("disk full") });
    ctx.session.start().unwrap();

    let err = ctx.session.run(&[1.0]).unwrap_err();
    match err {
        Error::Callback { path, source } => {
            assert_eq!(path, PathBuf::from("out/spectrum_0.txt"));
            assert_eq!(source.to_string(), "disk full");
        }
        other => panic!("Unexpected error: {other}"),
    }
    assert_eq!(ctx.session.saved_count(), 0);
}

/// A failed packet flush still stops the session at its limit
#[test]
fn test_failed_flush_still_stops_at_limit() {
    let mut ctx = TestContext::new(SessionConfig {
        limit: 2.0,
        packet_length: 2,
        path: Some("out/spectrum.txt".into()),
        append: vec!["count".into()],
        ..SessionConfig::default()
    });
    let failures = Arc::new(AtomicUsize::new(0));
    let counter = failures.clone();
    ctx.session.set_callback(move |_: &CallArgs<'_, f64>| -> anyhow::Result<()> {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            anyhow::bail!("disk full");
        }
        Ok(())
    });
    ctx.session.start().unwrap();

    ctx.trigger(1.0);
    assert!(matches!(ctx.session.run(&[2.0]), Err(Error::Callback { .. })));
    assert!(!ctx.session.enabled(), "The limit is reached even though the flush failed");

    ctx.session.run(&[3.0]).unwrap();
    assert_eq!(ctx.session.buffer().write_counter(), 2, "Nothing is buffered past the limit");
    assert!(ctx.events.lock().unwrap().contains(&SessionEvent::Stopped));
}

/// Reading past the end under the error policy surfaces from save
#[test]
fn test_buffer_end_propagates_from_save() {
    let mut ctx = TestContext::new(SessionConfig {
        limit: 10.0,
        end_policy: "error".into(),
        path: Some("out/spectrum.txt".into()),
        append: vec!["count".into()],
        ..SessionConfig::default()
    });
    ctx.session.start().unwrap();

    assert!(matches!(ctx.session.save(Some(1)), Err(Error::BufferEnd { counter: 0 })));
    assert!(matches!(ctx.session.save(None), Err(Error::BufferEnd { counter: 0 })));

    ctx.trigger(1.0);
    assert!(matches!(ctx.session.save(None), Err(Error::BufferEnd { counter: 1 })));
    assert_eq!(ctx.calls().len(), 1);
}

/// A packet is dequeued before its callback runs, so a failing callback
/// never backs the buffer up into an overrun
#[test]
fn test_failing_callback_never_overruns() {
    let mut ctx = TestContext::new(SessionConfig {
        limit: 100.0,
        packet_length: 4,
        capacity: Some(4),
        overrun_policy: "error".into(),
        path: Some("out/spectrum.txt".into()),
        append: vec!["count".into()],
        ..SessionConfig::default()
    });
    ctx.session
        .set_callback(|_: &CallArgs<'_, f64>| -> anyhow::Result<()> { anyhow::bail!("disk full") });
    ctx.session.start().unwrap();

    for i in 1..=12 {
        let result = ctx.session.run(&[i as f64]);
        if i % 4 == 0 {
            assert!(matches!(result, Err(Error::Callback { .. })), "Trigger {i}");
        } else {
            assert!(result.is_ok(), "Trigger {i}");
        }
    }

    let status = ctx.session.buffer().status();
    assert_eq!(status.unread(), 0);
    assert_eq!(status.write_skip, 0);
    assert_eq!(ctx.session.buffer().write_counter(), 12);
}

/// Changing the packet length reconfigures the buffer and is announced
#[test]
fn test_packet_length_change_resizes_buffer() {
    let mut ctx = TestContext::count(100);
    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    ctx.session.subscribe_buffer(move |event| sink.lock().unwrap().push(*event));

    ctx.session.set_packet_length(16).unwrap();
    assert_eq!(ctx.session.buffer().capacity(), 16, "Capacity grows to the packet length");
    ctx.session.set_capacity(20).unwrap();
    assert_eq!(ctx.session.buffer().capacity(), 32, "Capacity is a multiple of the packet length");

    assert_eq!(
        *events.lock().unwrap(),
        vec![
            BufferEvent::Resized { capacity: 16 },
            BufferEvent::Reinitialized,
            BufferEvent::Resized { capacity: 32 },
            BufferEvent::Reinitialized,
        ]
    );
    assert!(matches!(ctx.session.set_packet_length(0), Err(Error::Configuration(_))));
}

/// Start without a path fails, and the provider is consulted
#[test]
fn test_path_required_and_provider() {
    let mut ctx = TestContext::new(SessionConfig {
        append: vec![],
        ..SessionConfig::default()
    });
    assert!(matches!(ctx.session.start(), Err(Error::PathRequired)));
    assert!(!ctx.session.enabled());

    ctx.session
        .set_path_provider(|| Some(PathBuf::from("chosen/by/dialog.csv")));
    ctx.session.start().unwrap();
    ctx.trigger(1.0);

    assert_eq!(ctx.calls()[0].path, PathBuf::from("chosen/by/dialog.csv"));
    assert!(ctx
        .events
        .lock()
        .unwrap()
        .contains(&SessionEvent::BasePathSet(Some(PathBuf::from("chosen/by/dialog.csv")))));
}

/// Switching the stop condition resets the limit and is announced
#[test]
fn test_stop_condition_switch() {
    let mut ctx = TestContext::count(9);
    ctx.session.set_stop_condition(StopCondition::Time);

    assert_eq!(ctx.session.limit(), Limit::Time(Duration::from_secs(1)));
    assert_eq!(ctx.session.attribute("limit"), Some(json!(1.0)));
    let events = ctx.events.lock().unwrap();
    assert!(events.contains(&SessionEvent::StopConditionSet(StopCondition::Time)));
    assert!(events.contains(&SessionEvent::AppendSet(Append::COUNT)));
}
