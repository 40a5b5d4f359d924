//! Embedded, append-only log store with durable tail cursors.
//!
//! A [`LogBuffer`] persists opaque byte payloads sequentially on local
//! disk. Every written record is assigned a unique, dense 64-bit index
//! and a non-decreasing millisecond timestamp. Readers select records by
//! index range, time range or registered type, or subscribe a *tail*: a
//! named durable cursor whose callback is retried until it succeeds,
//! giving at-least-once delivery.
//!
//! The buffer is divided into rolling segment files in a configurable
//! directory; new files are created when the configured record capacity
//! of the current file is reached. The physical separation is an
//! implementation detail that callers never see.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐ write / write_value
//! │  Callers  ├───────────────────────┐
//! └─────┬─────┘                       ▼
//!       │ select / tails        ┌────────────┐  frames   ┌─────────────┐
//!       ▼                       │ LogBuffer  ├──────────►│ segment     │
//! ┌────────────┐  rounds        │ (appender/ │           │ files under │
//! │ Scheduler  ├───────────────►│  tailer)   │◄──────────┤ data/       │
//! └────────────┘                └─────┬──────┘  records  └─────────────┘
//!                                     │ cursor commits
//!                                     ▼
//!                               tails/<name>/cursor
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use logbuffer::{LogBuffer, LogBufferConfig};
//!
//! let buffer = LogBuffer::open(LogBufferConfig {
//!     base_path: "/var/lib/my-app/logbuffer".into(),
//!     ..Default::default()
//! })?;
//!
//! let record = buffer.write(b"hello")?;
//! assert_eq!(record.index, 0);
//!
//! let records = buffer.select_from(0)?;
//! buffer.close()?;
//! ```

pub mod buffer;
pub mod config;
pub mod error;
pub mod serializer;
pub mod tail;

mod cursor;
mod scheduler;
mod store;

pub use buffer::LogBuffer;
pub use config::LogBufferConfig;
pub use error::{BoxError, Error, Result};
pub use serializer::SerializerRegistry;
pub use tail::{Entry, ForwardResult, Tail, TailError};

pub use logbuffer_core::{DateRange, Record, MAX_INDEX_PER_MS, RAW_TYPE};
