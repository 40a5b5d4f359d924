//! Frame Codec
//!
//! Every record is stored as a fixed header followed by the payload, all
//! little-endian:
//!
//! ```text
//! ┌───────────┬────────────────┬────────────────┬──────────┐
//! │ type      │ timestamp_ms   │ payload_length │ payload  │
//! │ (8 bytes) │ (8 bytes, i64) │ (4 bytes)      │ (N bytes)│
//! └───────────┴────────────────┴────────────────┴──────────┘
//! ```
//!
//! [`peek_header`] reads only the first 16 bytes. Time-range and type
//! filtered scans rely on it to skip records without materializing
//! payloads they are going to discard.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

/// Full frame header size: type + timestamp + payload length.
pub const HEADER_SIZE: usize = 20;

/// The prefix of the header carrying type and timestamp, enough for scans.
pub const PEEK_SIZE: usize = 16;

/// Largest payload the u32 length prefix can describe.
pub const MAX_PAYLOAD_LEN: usize = i32::MAX as usize;

/// Encode one frame.
pub fn encode_frame(type_tag: u64, timestamp: i64, payload: &[u8]) -> Result<Vec<u8>> {
    if payload.len() > MAX_PAYLOAD_LEN {
        return Err(Error::PayloadTooLarge(payload.len()));
    }

    let mut buf = BytesMut::with_capacity(HEADER_SIZE + payload.len());
    buf.put_u64_le(type_tag);
    buf.put_i64_le(timestamp);
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.to_vec())
}

/// Decode one frame. The buffer must hold exactly one frame; a length
/// prefix that disagrees with the available bytes is corruption.
pub fn decode_frame(buf: &[u8]) -> Result<(u64, i64, Bytes)> {
    if buf.len() < HEADER_SIZE {
        return Err(Error::Corrupt(format!(
            "frame of {} bytes is shorter than the {} byte header",
            buf.len(),
            HEADER_SIZE
        )));
    }

    let mut cursor = buf;
    let type_tag = cursor.get_u64_le();
    let timestamp = cursor.get_i64_le();
    let len = cursor.get_u32_le() as usize;

    if cursor.len() != len {
        return Err(Error::Corrupt(format!(
            "length prefix says {} payload bytes but {} are present",
            len,
            cursor.len()
        )));
    }

    Ok((type_tag, timestamp, Bytes::copy_from_slice(cursor)))
}

/// Read type and timestamp from a frame header without touching the payload.
pub fn peek_header(buf: &[u8]) -> Result<(u64, i64)> {
    if buf.len() < PEEK_SIZE {
        return Err(Error::Corrupt(format!(
            "header peek needs {} bytes, got {}",
            PEEK_SIZE,
            buf.len()
        )));
    }

    let mut cursor = buf;
    let type_tag = cursor.get_u64_le();
    let timestamp = cursor.get_i64_le();
    Ok((type_tag, timestamp))
}
