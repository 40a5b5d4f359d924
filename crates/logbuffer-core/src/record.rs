//! Record Data Structure
//!
//! A record is one entry in the log: an opaque payload stamped with a type
//! tag and a writer-assigned millisecond timestamp, addressed by a
//! monotonically increasing 64-bit index.
//!
//! The index is the record's position in the store and is never written
//! inside the frame; it is assigned by the appender and attached when the
//! record is read back.
//!
//! Payloads use `bytes::Bytes` so selects can hand out slices of a read
//! buffer without copying.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec::HEADER_SIZE;

/// Type tag for raw records. Raw records carry plain bytes and are never
/// routed through a registered decoder.
pub const RAW_TYPE: u64 = 0;

/// A single record in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// Position of this record in the store.
    pub index: u64,

    /// Type discriminator; [`RAW_TYPE`] for plain bytes, otherwise a tag
    /// registered with the serializer registry.
    pub type_tag: u64,

    /// Writer-assigned timestamp in milliseconds since epoch,
    /// non-decreasing across the whole store.
    pub timestamp: i64,

    /// Payload bytes.
    pub payload: Bytes,
}

impl Record {
    pub fn new(index: u64, type_tag: u64, timestamp: i64, payload: Bytes) -> Self {
        Self {
            index,
            type_tag,
            timestamp,
            payload,
        }
    }

    /// True when this record carries plain bytes without a registered type.
    pub fn is_raw(&self) -> bool {
        self.type_tag == RAW_TYPE
    }

    /// Size of this record's frame on disk.
    pub fn frame_size(&self) -> usize {
        HEADER_SIZE + self.payload.len()
    }
}
