//! Error types for the core frame codec.
//!
//! These cover only what can go wrong at the frame level. Everything above
//! the codec (store I/O, registry misses, tail failures) has its own error
//! enum in the `logbuffer` crate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The frame header disagrees with the bytes that are actually present.
    #[error("corrupt frame: {0}")]
    Corrupt(String),

    /// Payload length does not fit the frame's u32 length prefix.
    #[error("payload length {0} exceeds the frame limit")]
    PayloadTooLarge(usize),
}
