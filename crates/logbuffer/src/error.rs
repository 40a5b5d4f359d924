//! Error types for the log buffer.
//!
//! All operations return [`Result`] so callers can propagate with `?`.
//! A failed append never advances the write index; a failed tail round
//! never advances the tail's cursor.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Boxed error produced by user-supplied code (tail callbacks, decoders).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Frame-level corruption surfaced by the codec.
    #[error(transparent)]
    Frame(#[from] logbuffer_core::Error),

    /// A typed write was attempted for a type that has no registered encoder.
    #[error("no encoder registered for {type_name}")]
    NoEncoder { type_name: &'static str },

    /// A decode was requested for a tag that has no registry entry.
    #[error("no decoder registered for type tag {tag}")]
    NoDecoder { tag: u64 },

    /// A typed scan hit a record whose tag has no registered decoder.
    #[error("missing decoder for type tag {tag} during typed scan")]
    MissingDecoder { tag: u64 },

    /// The registered decoder for `tag` rejected the stored payload.
    #[error("decoding payload with type tag {tag} failed")]
    Decode {
        tag: u64,
        #[source]
        source: BoxError,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The tail callback failed; its cursor was not advanced.
    #[error("tail {name} failed")]
    TailFailure {
        name: String,
        #[source]
        source: BoxError,
    },

    #[error("tail {0} is not registered")]
    UnknownTail(String),

    #[error("log buffer is closed")]
    Closed,
}
