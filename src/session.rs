//! Triggered persistence session
//!
//! A `SaveSession` owns one `FifoBuffer` and drives it from trigger
//! occurrences:
//!
//! 1. `start()` resolves the base path, clears the counters and arms the session
//! 2. every `run(payload)` counts the trigger, decimates by `save_every`, and
//!    writes the selected sample into the buffer
//! 3. each completed packet is flushed through the write callback
//! 4. once the stop condition holds, the session stops itself and flushes the
//!    partial packet left in the buffer
//!
//! Everything runs to completion on the caller's stack: by the time `run`
//! returns, every callback it caused has returned too, so a given trigger
//! sequence always produces the same callback sequence.

use crate::callback::{ArgTemplate, CallbackTemplate, Data, SaveCallback};
use crate::config::SessionConfig;
use crate::error::{Error, Result};
use crate::events::{ListenerId, Observers};
use crate::memory::fifo::FifoBuffer;
use crate::memory::policy::Policy;
use crate::memory::BufferEvent;
use crate::naming::{effective_append, normalize_extension, Append, BasePath};
use crate::stop::{Limit, StopCondition};
use chrono::{DateTime, Local};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// How flushed samples are handed to the callback
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackMode {
    /// One call at a time, on the trigger's stack
    Serial,
    /// Reserved; rejected when selected
    Parallel,
}

impl FromStr for CallbackMode {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "serial" => Ok(Self::Serial),
            "parallel" => Ok(Self::Parallel),
            _ => Err(Error::configuration(format!("unknown callback mode '{value}'"))),
        }
    }
}

/// Trigger payload a sample can be taken from
pub trait Payload<T> {
    /// Sample at `index`, if present
    fn sample(&self, index: usize) -> Option<T>;

    /// Number of values carried
    fn len(&self) -> usize;

    /// Whether the payload carries no values
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Clone> Payload<T> for [T] {
    fn sample(&self, index: usize) -> Option<T> {
        self.get(index).cloned()
    }

    fn len(&self) -> usize {
        <[T]>::len(self)
    }
}

impl<T: Clone> Payload<T> for Vec<T> {
    fn sample(&self, index: usize) -> Option<T> {
        self.get(index).cloned()
    }

    fn len(&self) -> usize {
        Vec::len(self)
    }
}

impl<T: Clone, const N: usize> Payload<T> for [T; N] {
    fn sample(&self, index: usize) -> Option<T> {
        self.get(index).cloned()
    }

    fn len(&self) -> usize {
        N
    }
}

/// Notifications emitted by a `SaveSession`
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The session was armed
    Started,
    /// The session was disarmed
    Stopped,
    /// The callback returned successfully for `path`
    Saved {
        /// File the callback wrote
        path: PathBuf,
        /// Save counter before increment
        count: u64,
        /// Session run time at the time of the save
        run_time: Option<Duration>,
    },
    /// The stop condition changed
    StopConditionSet(StopCondition),
    /// The limit changed
    LimitSet(Limit),
    /// The effective append set may have changed
    AppendSet(Append),
    /// The base path was set or cleared
    BasePathSet(Option<PathBuf>),
    /// The callback argument template changed
    CallbackArgsSet,
}

type PathProvider = Box<dyn FnMut() -> Option<PathBuf> + Send>;

/// Persistence session driving a FIFO buffer from trigger occurrences
pub struct SaveSession<T> {
    buffer: FifoBuffer<T>,
    callback: Box<dyn SaveCallback<T>>,
    template: CallbackTemplate,
    stop_condition: StopCondition,
    limit: Limit,
    save_every: u64,
    append: Append,
    single_file: bool,
    callback_mode: CallbackMode,
    payload_index: usize,
    default_extension: String,
    base_path: Option<BasePath>,
    path_provider: Option<PathProvider>,
    attributes: HashMap<String, Value>,
    saved_count: u64,
    trigger_count: u64,
    enabled: bool,
    started_at: Option<Instant>,
    start_time: Option<DateTime<Local>>,
    stop_time: Option<DateTime<Local>>,
    run_time: Option<Duration>,
    observers: Observers<SessionEvent>,
}

impl<T: Clone + 'static> SaveSession<T> {
    /// Create an idle session from `config`
    ///
    /// `init_object` seeds every buffer slot; `callback` persists flushed samples.
    pub fn new<C>(config: &SessionConfig, init_object: T, callback: C) -> Result<Self>
    where
        C: SaveCallback<T> + 'static,
    {
        let settings = config.validate()?;

        let mut buffer = FifoBuffer::new(settings.capacity, settings.packet_length, init_object)?;
        buffer.set_overrun_policy(settings.overrun_policy);
        buffer.set_end_policy(settings.end_policy);

        let default_extension = normalize_extension(&settings.default_extension);
        let base_path = match settings.path.as_deref() {
            Some(path) if !path.is_empty() => Some(BasePath::parse(path, &default_extension)?),
            _ => None,
        };

        Ok(Self {
            buffer,
            callback: Box::new(callback),
            template: CallbackTemplate::default(),
            stop_condition: settings.stop_condition,
            limit: settings.limit,
            save_every: settings.save_every,
            append: settings.append,
            single_file: settings.single_file,
            callback_mode: settings.callback_mode,
            payload_index: settings.payload_index,
            default_extension,
            base_path,
            path_provider: None,
            attributes: HashMap::new(),
            saved_count: 0,
            trigger_count: 0,
            enabled: false,
            started_at: None,
            start_time: None,
            stop_time: None,
            run_time: None,
            observers: Observers::new(),
        })
    }

    /// Arm the session
    ///
    /// Resolves the base path through the path provider if none is set, then
    /// clears the save and trigger counters and the buffer. Starting a running
    /// session does nothing.
    pub fn start(&mut self) -> Result<()> {
        if self.enabled {
            debug!("Session already running");
            return Ok(());
        }

        if self.base_path.is_none() {
            let provided = self.path_provider.as_mut().and_then(|provider| provider());
            match provided {
                Some(path) if !path.as_os_str().is_empty() => self.set_path(path)?,
                _ => return Err(Error::PathRequired),
            }
        }

        self.saved_count = 0;
        self.trigger_count = 0;
        self.buffer.reinitialize(None);
        self.started_at = Some(Instant::now());
        self.start_time = Some(Local::now());
        self.stop_time = None;
        self.run_time = Some(Duration::ZERO);
        self.enabled = true;

        info!(
            stop_condition = %self.stop_condition,
            limit = %self.limit,
            packet_length = self.buffer.packet_length(),
            save_every = self.save_every,
            "Save session started"
        );
        self.observers.emit(&SessionEvent::Started);
        Ok(())
    }

    /// Handle one trigger occurrence
    ///
    /// Ignored while the session is idle. Buffer overrun or end errors under
    /// the `Error` policy, and callback failures, propagate to the caller.
    pub fn run<P>(&mut self, payload: &P) -> Result<()>
    where
        P: Payload<T> + ?Sized,
    {
        if !self.enabled {
            trace!("Trigger ignored, session is idle");
            return Ok(());
        }

        self.trigger_count += 1;
        self.update_run_time();

        if self.trigger_count % self.save_every != 0 {
            trace!(trigger = self.trigger_count, "Trigger decimated");
            return Ok(());
        }

        let sample = payload.sample(self.payload_index).ok_or_else(|| {
            Error::configuration(format!(
                "payload index {} out of range for a payload of {} values",
                self.payload_index,
                payload.len()
            ))
        })?;

        let outcome = self.buffer.write(sample)?;
        let flushed = if outcome.packet_filled {
            self.save(None).map(drop)
        } else {
            Ok(())
        };

        // The limit holds even when the packet flush failed
        let run_time = self.run_time.unwrap_or_default();
        if self.limit.is_reached(self.buffer.write_counter(), run_time) {
            self.stop();
            let remaining = self.buffer.unread() as usize;
            let tail = self.save(Some(remaining));
            flushed?;
            tail?;
            return Ok(());
        }

        flushed
    }

    /// Flush up to `data_length` buffered samples, a packet by default
    ///
    /// Returns the number of callback invocations made.
    pub fn save(&mut self, data_length: Option<usize>) -> Result<usize> {
        let length = data_length.unwrap_or_else(|| self.buffer.packet_length());
        if length == 0 {
            return Ok(0);
        }

        let batch = self.buffer.read(length)?;
        if batch.is_empty() {
            return Ok(0);
        }

        if self.single_file {
            self.invoke(Data::Batch(&batch))?;
            return Ok(1);
        }

        for element in batch.iter() {
            self.invoke(Data::Element(element))?;
        }
        Ok(batch.len())
    }

    fn invoke(&mut self, data: Data<'_, T>) -> Result<()> {
        let base = self.base_path.as_ref().ok_or(Error::PathRequired)?;
        let path = base.resolve(self.effective_append(), self.saved_count, &Local::now());

        let result = {
            let call = self.template.resolve(&path, data, |name| self.attribute(name))?;
            self.callback.call(&call)
        };

        if let Err(source) = result {
            warn!(path = %path.display(), error = %source, "Write callback failed");
            return Err(Error::Callback { path, source });
        }

        debug!(path = %path.display(), count = self.saved_count, samples = data.len(), "Saved");
        self.observers.emit(&SessionEvent::Saved {
            path,
            count: self.saved_count,
            run_time: self.run_time,
        });
        self.saved_count += 1;
        Ok(())
    }
}

impl<T> SaveSession<T> {
    /// Disarm the session
    ///
    /// Records the stop time and emits `Stopped`. Buffered samples stay in the
    /// buffer; use `stop_and_flush` to persist them as well.
    pub fn stop(&mut self) {
        if !self.enabled {
            return;
        }

        self.enabled = false;
        self.update_run_time();
        self.stop_time = Some(Local::now());

        info!(
            saved = self.saved_count,
            triggers = self.trigger_count,
            run_time_s = self.run_time.unwrap_or_default().as_secs_f64(),
            "Save session stopped"
        );
        self.observers.emit(&SessionEvent::Stopped);
    }

    fn update_run_time(&mut self) {
        self.run_time = self.started_at.map(|started| started.elapsed());
    }

    /// Suffixes applied to the next file name, after escalation
    pub fn effective_append(&self) -> Append {
        effective_append(self.append, &self.limit)
    }

    /// Live read of a session attribute
    ///
    /// Built-in names are `saved_count`, `trigger_count`, `limit`,
    /// `stop_condition`, `packet_length`, `capacity`, `save_every`,
    /// `run_time` (seconds), `enabled` and `append`; any other name is looked
    /// up among the attributes set with `set_attribute`.
    pub fn attribute(&self, name: &str) -> Option<Value> {
        let value = match name {
            "saved_count" | "count" => json!(self.saved_count),
            "trigger_count" => json!(self.trigger_count),
            "limit" => json!(self.limit.as_number()),
            "stop_condition" => json!(self.stop_condition.to_string()),
            "packet_length" => json!(self.buffer.packet_length()),
            "capacity" => json!(self.buffer.capacity()),
            "save_every" => json!(self.save_every),
            "run_time" => self.run_time.map_or(Value::Null, |t| json!(t.as_secs_f64())),
            "enabled" => json!(self.enabled),
            "append" => json!(self.effective_append().to_string()),
            _ => return self.attributes.get(name).cloned(),
        };
        Some(value)
    }

    /// Path the next save would use, `None` without a base path
    pub fn path(&self) -> Option<PathBuf> {
        self.base_path
            .as_ref()
            .map(|base| base.resolve(self.effective_append(), self.saved_count, &Local::now()))
    }

    /// Set or replace a host-provided attribute
    pub fn set_attribute(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    /// Remove a host-provided attribute
    pub fn remove_attribute(&mut self, name: &str) -> Option<Value> {
        self.attributes.remove(name)
    }

    /// Change the stop condition
    ///
    /// A different condition resets the limit to one sample or one second.
    pub fn set_stop_condition(&mut self, condition: StopCondition) {
        if condition == self.stop_condition {
            return;
        }

        self.stop_condition = condition;
        self.limit = Limit::initial(condition);

        self.observers.emit(&SessionEvent::StopConditionSet(condition));
        self.observers.emit(&SessionEvent::LimitSet(self.limit));
        let append = self.effective_append();
        self.observers.emit(&SessionEvent::AppendSet(append));
    }

    /// Change the limit; it must match the current stop condition
    pub fn set_limit(&mut self, limit: Limit) -> Result<()> {
        if limit.condition() != self.stop_condition {
            return Err(Error::configuration(format!(
                "a {} limit does not apply to the '{}' stop condition",
                limit.condition(),
                self.stop_condition
            )));
        }

        self.limit = limit;
        self.observers.emit(&SessionEvent::LimitSet(limit));
        let append = self.effective_append();
        self.observers.emit(&SessionEvent::AppendSet(append));
        Ok(())
    }

    /// Keep one trigger out of every `save_every`; values below 1 become 1
    pub fn set_save_every(&mut self, save_every: u64) {
        self.save_every = save_every.max(1);
    }

    /// Select the file name suffixes
    pub fn set_append(&mut self, append: Append) {
        self.append = append;
        let effective = self.effective_append();
        self.observers.emit(&SessionEvent::AppendSet(effective));
    }

    /// Write each flushed batch with one callback (`true`) or one per sample
    pub fn set_single_file(&mut self, single_file: bool) {
        self.single_file = single_file;
    }

    /// Select the callback mode; only `Serial` is supported
    pub fn set_callback_mode(&mut self, mode: CallbackMode) -> Result<()> {
        if mode == CallbackMode::Parallel {
            return Err(Error::Unsupported("parallel callback mode".into()));
        }
        self.callback_mode = mode;
        Ok(())
    }

    /// Index of the sample within each trigger payload
    pub fn set_payload_index(&mut self, index: usize) {
        self.payload_index = index;
    }

    /// Extension used when the base path has none
    pub fn set_default_extension(&mut self, extension: &str) {
        self.default_extension = normalize_extension(extension);
    }

    /// Set the base path; an empty path clears it
    pub fn set_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            self.clear_path();
            return Ok(());
        }

        let base = BasePath::parse(path, &self.default_extension)?;
        let full = base.to_path_buf();
        self.base_path = Some(base);
        self.observers.emit(&SessionEvent::BasePathSet(Some(full)));
        Ok(())
    }

    /// Forget the base path; the next `start()` asks the path provider
    pub fn clear_path(&mut self) {
        self.base_path = None;
        self.observers.emit(&SessionEvent::BasePathSet(None));
    }

    /// Provider asked for a path when `start()` finds none set
    pub fn set_path_provider<F>(&mut self, provider: F)
    where
        F: FnMut() -> Option<PathBuf> + Send + 'static,
    {
        self.path_provider = Some(Box::new(provider));
    }

    /// Replace the write callback
    pub fn set_callback<C>(&mut self, callback: C)
    where
        C: SaveCallback<T> + 'static,
    {
        self.callback = Box::new(callback);
    }

    /// Replace the positional argument template
    pub fn set_callback_args(&mut self, args: Vec<ArgTemplate>) {
        self.template.args = args;
        self.observers.emit(&SessionEvent::CallbackArgsSet);
    }

    /// Replace the keyword argument template
    pub fn set_callback_kwargs(&mut self, kwargs: BTreeMap<String, ArgTemplate>) {
        self.template.kwargs = kwargs;
        self.observers.emit(&SessionEvent::CallbackArgsSet);
    }

    /// Current argument template
    pub fn callback_template(&self) -> &CallbackTemplate {
        &self.template
    }

    /// Replace the buffer's overrun policy
    pub fn set_overrun_policy(&mut self, policy: impl Into<Policy>) {
        self.buffer.set_overrun_policy(policy);
    }

    /// Replace the buffer's end-of-data policy
    pub fn set_end_policy(&mut self, policy: impl Into<Policy>) {
        self.buffer.set_end_policy(policy);
    }

    /// Register a listener for session events
    pub fn subscribe<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&SessionEvent) + Send + 'static,
    {
        self.observers.subscribe(listener)
    }

    /// Remove a session listener
    pub fn unsubscribe(&mut self, id: ListenerId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Register a listener for the owned buffer's events
    pub fn subscribe_buffer<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&BufferEvent) + Send + 'static,
    {
        self.buffer.subscribe(listener)
    }

    /// The owned buffer
    pub fn buffer(&self) -> &FifoBuffer<T> {
        &self.buffer
    }

    /// Whether the session is running
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// Successful callback invocations since `start()`
    pub fn saved_count(&self) -> u64 {
        self.saved_count
    }

    /// Trigger occurrences since `start()`, before decimation
    pub fn trigger_count(&self) -> u64 {
        self.trigger_count
    }

    /// Time since `start()`, frozen at `stop()`
    pub fn run_time(&self) -> Option<Duration> {
        self.run_time
    }

    /// Wall-clock time of the last `start()`
    pub fn start_time(&self) -> Option<DateTime<Local>> {
        self.start_time
    }

    /// Wall-clock time of the last `stop()`
    pub fn stop_time(&self) -> Option<DateTime<Local>> {
        self.stop_time
    }

    /// Current stop condition
    pub fn stop_condition(&self) -> StopCondition {
        self.stop_condition
    }

    /// Current limit
    pub fn limit(&self) -> Limit {
        self.limit
    }

    /// Decimation factor
    pub fn save_every(&self) -> u64 {
        self.save_every
    }

    /// Configured suffixes, before escalation
    pub fn append(&self) -> Append {
        self.append
    }

    /// Whether batches are written with one callback
    pub fn single_file(&self) -> bool {
        self.single_file
    }

    /// Current callback mode
    pub fn callback_mode(&self) -> CallbackMode {
        self.callback_mode
    }

    /// Index of the sample within each payload
    pub fn payload_index(&self) -> usize {
        self.payload_index
    }

    /// Current base path
    pub fn base_path(&self) -> Option<&BasePath> {
        self.base_path.as_ref()
    }
}

impl<T: Clone + 'static> SaveSession<T> {
    /// Change the packet length, growing the buffer capacity if needed
    pub fn set_packet_length(&mut self, packet_length: usize) -> Result<()> {
        self.buffer.set_packet_length(packet_length)
    }

    /// Change the buffer capacity
    pub fn set_capacity(&mut self, capacity: usize) -> Result<()> {
        self.buffer.resize(capacity)
    }

    /// Replace the slot template and reseed the buffer
    pub fn set_init_object(&mut self, init_object: T) {
        self.buffer.reinitialize(Some(init_object));
    }

    /// Stop, then flush whatever is left in the buffer
    pub fn stop_and_flush(&mut self) -> Result<usize> {
        self.stop();
        let remaining = self.buffer.unread() as usize;
        self.save(Some(remaining))
    }
}

impl<T> fmt::Debug for SaveSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SaveSession")
            .field("enabled", &self.enabled)
            .field("stop_condition", &self.stop_condition)
            .field("limit", &self.limit)
            .field("save_every", &self.save_every)
            .field("append", &self.append)
            .field("single_file", &self.single_file)
            .field("base_path", &self.base_path)
            .field("saved_count", &self.saved_count)
            .field("trigger_count", &self.trigger_count)
            .field("buffer", &self.buffer)
            .finish()
    }
}
