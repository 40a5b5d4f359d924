//! Core types for the logbuffer store.
//!
//! This crate holds everything that is independent of the on-disk segment
//! layout and the delivery machinery:
//!
//! - [`Record`]: one log entry with its assigned index, type tag, timestamp
//!   and payload.
//! - [`codec`]: the fixed binary frame that records are stored in.
//! - [`DateRange`]: the pure mapping between wall-clock intervals and
//!   nominal index ranges, plus GMT formatting of interval starts.
//!
//! The `logbuffer` crate builds the segmented store, the orchestrator and
//! the tail subsystem on top of these types.

pub mod codec;
pub mod dates;
pub mod error;
pub mod record;

pub use dates::{DateRange, MAX_INDEX_PER_MS};
pub use error::{Error, Result};
pub use record::{Record, RAW_TYPE};
