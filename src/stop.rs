//! Stop conditions that end a save session automatically

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Rule that ends a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StopCondition {
    /// Stop once `limit` samples have been buffered
    Count,
    /// Stop once the session has run for `limit`
    Time,
}

impl FromStr for StopCondition {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "count" => Ok(Self::Count),
            "time" => Ok(Self::Time),
            _ => Err(Error::configuration(format!("unknown stop condition '{value}'"))),
        }
    }
}

impl fmt::Display for StopCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Count => "count",
            Self::Time => "time",
        })
    }
}

/// Limit paired with a stop condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// Number of buffered samples
    Count(u64),
    /// Elapsed session time
    Time(Duration),
}

impl Limit {
    /// Limit a freshly selected stop condition starts with: one sample, or one second
    pub fn initial(condition: StopCondition) -> Self {
        match condition {
            StopCondition::Count => Self::Count(1),
            StopCondition::Time => Self::Time(Duration::from_secs(1)),
        }
    }

    /// Parse a numeric limit for `condition`: a sample count, or seconds
    pub fn from_number(condition: StopCondition, value: f64) -> Result<Self> {
        if !value.is_finite() || value < 0.0 {
            return Err(Error::configuration(format!(
                "limit must be a non-negative number, got {value}"
            )));
        }

        match condition {
            StopCondition::Count => {
                if value.fract() != 0.0 {
                    return Err(Error::configuration(format!(
                        "count limit must be a whole number, got {value}"
                    )));
                }
                Ok(Self::Count(value as u64))
            }
            StopCondition::Time => Duration::try_from_secs_f64(value)
                .map(Self::Time)
                .map_err(|e| Error::configuration(format!("time limit of {value} s: {e}"))),
        }
    }

    /// Stop condition this limit belongs to
    pub fn condition(&self) -> StopCondition {
        match self {
            Self::Count(_) => StopCondition::Count,
            Self::Time(_) => StopCondition::Time,
        }
    }

    /// Whether a session with this limit can produce more than one file
    pub fn produces_multiple_files(&self) -> bool {
        match self {
            Self::Count(limit) => *limit > 1,
            Self::Time(_) => true,
        }
    }

    /// Whether the session should stop given what it has done so far
    pub fn is_reached(&self, written: u64, run_time: Duration) -> bool {
        match self {
            Self::Count(limit) => written >= *limit,
            Self::Time(limit) => run_time >= *limit,
        }
    }

    /// The limit as a plain number: a count, or seconds
    pub fn as_number(&self) -> f64 {
        match self {
            Self::Count(limit) => *limit as f64,
            Self::Time(limit) => limit.as_secs_f64(),
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Count(limit) => write!(f, "{limit} samples"),
            Self::Time(limit) => write!(f, "{:.3} s", limit.as_secs_f64()),
        }
    }
}
