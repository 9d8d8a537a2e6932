//! Overrun and end-of-data policies
//!
//! When a write finds the buffer full, or a read finds nothing unread, the
//! buffer asks its configured policy what to do. The built-in policies cover
//! fail-fast (`Error`), best-effort (`Skip`, `SilentSkip`) and lossy
//! (`Ignore`) behavior; `Custom` delegates to a caller-supplied handler.

use crate::error::{Error, Result};
use crate::memory::BufferStatus;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Which buffer condition a policy is resolving
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    /// A write found `write_counter - read_counter >= capacity`
    Overrun,
    /// A read found `read_counter == write_counter`
    End,
}

/// What the buffer does after a policy has absorbed a condition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyAction {
    /// Skip the operation and bump the matching skip counter
    Skip,
    /// Perform the operation anyway
    Proceed,
}

/// Strategy consulted on overrun or end-of-data
///
/// Returning an error makes the write or read fail with it.
pub trait ConditionHandler: Send {
    /// Decide how to continue after `condition` was hit
    fn handle(&mut self, condition: Condition, status: &BufferStatus) -> Result<PolicyAction>;
}

impl<F> ConditionHandler for F
where
    F: FnMut(Condition, &BufferStatus) -> Result<PolicyAction> + Send,
{
    fn handle(&mut self, condition: Condition, status: &BufferStatus) -> Result<PolicyAction> {
        self(condition, status)
    }
}

/// Name of a built-in policy, as used in configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    /// Fail the operation
    Error,
    /// Skip the operation and log a warning
    Skip,
    /// Skip the operation quietly
    SilentSkip,
    /// Perform the operation regardless
    None,
}

impl FromStr for PolicyKind {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().replace(['-', ' '], "_").as_str() {
            "error" => Ok(Self::Error),
            "skip" => Ok(Self::Skip),
            "silent_skip" | "silentskip" => Ok(Self::SilentSkip),
            "none" | "ignore" => Ok(Self::None),
            _ => Err(Error::configuration(format!("unknown buffer policy '{value}'"))),
        }
    }
}

impl fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Error => "error",
            Self::Skip => "skip",
            Self::SilentSkip => "silent_skip",
            Self::None => "none",
        };
        f.write_str(name)
    }
}

/// Policy applied by the buffer on overrun or end-of-data
pub enum Policy {
    /// Fail with `BufferOverrun` or `BufferEnd`
    Error,
    /// Skip, count and log a warning
    Skip,
    /// Skip and count without logging
    SilentSkip,
    /// Carry on: overwrite the oldest unread sample, or re-read stale slots
    Ignore,
    /// Delegate to a caller-supplied handler
    Custom(Box<dyn ConditionHandler>),
}

impl Policy {
    /// Wrap a handler as a custom policy
    pub fn custom<H>(handler: H) -> Self
    where
        H: ConditionHandler + 'static,
    {
        Self::Custom(Box::new(handler))
    }

    /// Default policy on overrun: fail fast
    pub fn default_overrun() -> Self {
        Self::Error
    }

    /// Default policy on end-of-data: skip quietly
    pub fn default_end() -> Self {
        Self::SilentSkip
    }

    /// Decide what to do about `condition`
    pub fn resolve(&mut self, condition: Condition, status: &BufferStatus) -> Result<PolicyAction> {
        match self {
            Self::Error => Err(match condition {
                Condition::Overrun => Error::BufferOverrun {
                    capacity: status.capacity,
                    unread: status.unread(),
                },
                Condition::End => Error::BufferEnd {
                    counter: status.write_counter,
                },
            }),
            Self::Skip => {
                match condition {
                    Condition::Overrun => warn!(
                        capacity = status.capacity,
                        unread = status.unread(),
                        skipped = status.write_skip + 1,
                        "Buffer overrun, skipping write"
                    ),
                    Condition::End => warn!(
                        counter = status.read_counter,
                        skipped = status.read_skip + 1,
                        "Buffer end reached, skipping read"
                    ),
                }
                Ok(PolicyAction::Skip)
            }
            Self::SilentSkip => Ok(PolicyAction::Skip),
            Self::Ignore => Ok(PolicyAction::Proceed),
            Self::Custom(handler) => handler.handle(condition, status),
        }
    }

    /// The built-in kind, or `None` for a custom handler
    pub fn kind(&self) -> Option<PolicyKind> {
        match self {
            Self::Error => Some(PolicyKind::Error),
            Self::Skip => Some(PolicyKind::Skip),
            Self::SilentSkip => Some(PolicyKind::SilentSkip),
            Self::Ignore => Some(PolicyKind::None),
            Self::Custom(_) => None,
        }
    }
}

impl From<PolicyKind> for Policy {
    fn from(kind: PolicyKind) -> Self {
        match kind {
            PolicyKind::Error => Self::Error,
            PolicyKind::Skip => Self::Skip,
            PolicyKind::SilentSkip => Self::SilentSkip,
            PolicyKind::None => Self::Ignore,
        }
    }
}

impl fmt::Debug for Policy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind() {
            Some(kind) => write!(f, "Policy::{kind}"),
            None => f.write_str("Policy::Custom(..)"),
        }
    }
}
