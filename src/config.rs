//! Session configuration
//!
//! `SessionConfig` is the loosely typed surface a host loads from JSON or
//! builds in code: enum-valued options are plain strings and the limit is a
//! plain number. `validate()` turns it into typed `Settings`, rejecting bad
//! values before any session is built.

use crate::error::{Error, Result};
use crate::memory::policy::PolicyKind;
use crate::naming::Append;
use crate::session::CallbackMode;
use crate::stop::{Limit, StopCondition};
use serde::{Deserialize, Serialize};

/// Serializable session configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// `"count"` or `"time"`
    pub stop_condition: String,
    /// Sample count, or seconds for the `time` condition
    pub limit: f64,
    /// Samples per flushed packet
    pub packet_length: usize,
    /// Buffer slots; defaults to `packet_length`
    pub capacity: Option<usize>,
    /// Keep one trigger out of every `save_every`
    pub save_every: u64,
    /// Any of `"count"`, `"timestamp"`
    pub append: Vec<String>,
    /// Write each flushed batch to one file
    pub single_file: bool,
    /// `"serial"`; `"parallel"` is rejected
    pub callback_mode: String,
    /// Index of the sample within each trigger payload
    pub payload_index: usize,
    /// Extension used when the base path has none
    pub default_extension: String,
    /// `"error"`, `"skip"`, `"silent_skip"` or `"none"`
    pub overrun_policy: String,
    /// `"error"`, `"skip"`, `"silent_skip"` or `"none"`
    pub end_policy: String,
    /// Base path; may be left out and supplied by a path provider
    pub path: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stop_condition: "count".into(),
            limit: 1.0,
            packet_length: 1,
            capacity: None,
            save_every: 1,
            append: vec!["timestamp".into()],
            single_file: false,
            callback_mode: "serial".into(),
            payload_index: 0,
            default_extension: ".txt".into(),
            overrun_policy: "error".into(),
            end_policy: "silent_skip".into(),
            path: None,
        }
    }
}

/// Validated, typed form of a `SessionConfig`
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    /// Stop condition
    pub stop_condition: StopCondition,
    /// Limit matching `stop_condition`
    pub limit: Limit,
    /// Samples per packet, at least 1
    pub packet_length: usize,
    /// Requested capacity, at least `packet_length`
    pub capacity: usize,
    /// Decimation factor, at least 1
    pub save_every: u64,
    /// Configured suffixes
    pub append: Append,
    /// Batch-per-file mode
    pub single_file: bool,
    /// Callback mode, always `Serial`
    pub callback_mode: CallbackMode,
    /// Sample index within payloads
    pub payload_index: usize,
    /// Default extension as given
    pub default_extension: String,
    /// Overrun policy
    pub overrun_policy: PolicyKind,
    /// End policy
    pub end_policy: PolicyKind,
    /// Base path, if any
    pub path: Option<String>,
}

impl SessionConfig {
    /// Parse a configuration from JSON; missing keys take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Serialize the configuration to pretty-printed JSON
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check every value and convert to typed settings
    pub fn validate(&self) -> Result<Settings> {
        let stop_condition: StopCondition = self.stop_condition.parse()?;
        let limit = Limit::from_number(stop_condition, self.limit)?;

        if self.packet_length == 0 {
            return Err(Error::configuration("packet_length must be at least 1"));
        }
        let capacity = self.capacity.unwrap_or(self.packet_length);
        if capacity == 0 {
            return Err(Error::configuration("capacity must be at least 1"));
        }

        let callback_mode: CallbackMode = self.callback_mode.parse()?;
        if callback_mode == CallbackMode::Parallel {
            return Err(Error::Unsupported("parallel callback mode".into()));
        }

        Ok(Settings {
            stop_condition,
            limit,
            packet_length: self.packet_length,
            capacity: capacity.max(self.packet_length),
            save_every: self.save_every.max(1),
            append: Append::from_names(&self.append)?,
            single_file: self.single_file,
            callback_mode,
            payload_index: self.payload_index,
            default_extension: self.default_extension.clone(),
            overrun_policy: self.overrun_policy.parse()?,
            end_policy: self.end_policy.parse()?,
            path: self.path.clone(),
        })
    }
}
