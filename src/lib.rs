//! Acquisition Buffer - a fixed-capacity FIFO ring buffer and a
//! trigger-driven persistence session for instrument acquisition data.
//!
//! # Overview
//!
//! The crate decouples a high-rate sample producer (camera frames, spectra)
//! from a slower consumer (file writes) with two main components:
//!
//! 1. A FIFO ring buffer of sample slots with packet detection and
//!    configurable overrun and end-of-data policies
//! 2. A persistence session that pushes one sample per trigger into the
//!    buffer, flushes full packets through a write callback, and stops itself
//!    on a sample count or an elapsed time
//!
//! # Key Features
//!
//! - Packet-batched flushing, with the partial packet flushed on auto-stop
//! - Decimation of trigger occurrences (`save_every`)
//! - Collision-safe file names: count and timestamp suffixes, with a timestamp
//!   added automatically whenever a session can write more than one file
//! - Callback arguments built from literals and placeholders (`Path`, `Data`,
//!   live session attributes)
//! - A mutex-guarded variant of the buffer for producer/consumer threads
//! - Text and CRC32-checked record file writers, plus a memory-mapped reader
//!
//! # Usage
//!
//! The library is typically used by:
//! 1. Building a `SaveSession` from a `SessionConfig` and a write callback
//! 2. Binding it to a `Trigger` with a `SaveManager`
//! 3. Starting the manager and emitting one payload per acquisition tick
//! 4. Listening for `SessionEvent::Saved` and `SessionEvent::Stopped`
//!
//! ```no_run
//! use acquisition_buffer::{SaveManager, SaveSession, SessionConfig, TextWriter, Trigger};
//! use std::sync::Arc;
//!
//! # fn main() -> acquisition_buffer::Result<()> {
//! let config = SessionConfig {
//!     limit: 12.0,
//!     packet_length: 4,
//!     path: Some("spectra/frame.txt".into()),
//!     ..SessionConfig::default()
//! };
//! let session = SaveSession::new(&config, vec![0.0f64; 2048], TextWriter::new())?;
//!
//! let trigger: Arc<Trigger<Vec<Vec<f64>>>> = Arc::new(Trigger::new());
//! let manager = SaveManager::new(session, trigger.clone());
//! manager.start()?;
//!
//! while manager.is_subscribed() {
//!     trigger.emit(&vec![vec![1.0; 2048]])?;
//! }
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]

pub mod callback;
pub mod config;
pub mod disk;
pub mod error;
pub mod events;
pub mod memory;
pub mod naming;
pub mod session;
pub mod stop;
pub mod trigger;

pub use callback::{ArgTemplate, CallArgs, CallbackTemplate, Data, SaveCallback};
pub use config::SessionConfig;
pub use disk::reader::RecordFile;
pub use disk::writer::{RecordFileWriter, TextWriter};
pub use error::{Error, Result};
pub use memory::fifo::FifoBuffer;
pub use memory::policy::{Policy, PolicyKind};
pub use memory::shared::SharedFifoBuffer;
pub use naming::{Append, BasePath};
pub use session::{CallbackMode, Payload, SaveSession, SessionEvent};
pub use stop::{Limit, StopCondition};
pub use trigger::{SaveManager, Trigger};

/// Re-exported data types used in the API
pub mod types {
    pub use crate::callback::Arg;
    pub use crate::config::Settings;
    pub use crate::disk::reader::StoredRecord;
    pub use crate::disk::RecordHeader;
    pub use crate::events::ListenerId;
    pub use crate::memory::policy::{Condition, ConditionHandler, PolicyAction};
    pub use crate::memory::{BufferEvent, BufferStatus, PacketGate, WriteOutcome};
    pub use crate::trigger::SubscriptionId;
}
