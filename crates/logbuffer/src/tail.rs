//! Tails
//!
//! A tail is a named, durable read cursor with a delivery callback. The
//! cursor advances only after the callback returns success, so every
//! record is delivered at least once; a failed round redelivers the same
//! range (plus anything written since) on the next attempt.
//!
//! Two delivery policies:
//!
//! - **Whole backlog** (default): each round hands the callback
//!   everything between the cursor and the current write index, then
//!   moves the cursor to the write index.
//! - **Chunked**: each round processes one fixed wall-clock window of
//!   `chunk_ms` milliseconds, aligned on window boundaries. Windows that
//!   reach into the future are left alone until they close, so a window
//!   is never delivered half-full.
//!
//! The type filter is expressed through the `T` in [`Tail<T>`]:
//! `Tail<Record>` receives every record undecoded, while a tail over a
//! registered type receives only records carrying that type's tag,
//! decoded.

use std::any::Any;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::buffer::{now_ms, Shared};
use crate::cursor::CursorStore;
use crate::error::{BoxError, Error, Result};

/// Error type for tail callbacks.
pub type TailError = BoxError;

/// One delivered record. `value` is the decoded payload for typed tails
/// and the whole [`Record`](logbuffer_core::Record) for untyped ones.
#[derive(Debug, Clone, PartialEq)]
pub struct Entry<T> {
    pub index: u64,
    pub timestamp: i64,
    pub value: T,
}

/// Outcome of one delivery round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardResult {
    /// False when the round knows more unprocessed records are already
    /// waiting; the scheduler then fires the next round immediately.
    pub reached_tip: bool,
}

impl ForwardResult {
    fn tip() -> Self {
        Self { reached_tip: true }
    }
}

/// A delivery callback with a stable name.
///
/// The name identifies the tail across registrations and derives the
/// on-disk cursor path, so it must stay stable across process restarts.
pub trait Tail<T>: Send + 'static {
    fn name(&self) -> &str;

    /// Handles one batch. Returning an error leaves the cursor untouched
    /// and the batch is redelivered on the next round.
    fn process(&mut self, batch: Vec<Entry<T>>) -> std::result::Result<(), TailError>;
}

/// Object-safe view of a tail runner, independent of its payload type.
pub(crate) trait Runner: Send {
    fn round(&mut self) -> Result<ForwardResult>;
    fn read_index(&self) -> u64;
}

/// Per-tail state: the callback, its durable cursor and the delivery
/// policy. Boxed behind [`Runner`] in the buffer's tail map.
pub(crate) struct TailRunner<T, L> {
    name: String,
    tail: L,
    shared: Arc<Shared>,
    cursor: CursorStore,
    chunk_ms: Option<i64>,
    abort: Arc<AtomicBool>,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Any + Send, L: Tail<T>> TailRunner<T, L> {
    pub(crate) fn new(
        tail: L,
        shared: Arc<Shared>,
        chunk_ms: Option<i64>,
        abort: Arc<AtomicBool>,
    ) -> Result<Self> {
        let name = tail.name().to_string();
        let cursor = CursorStore::open(shared.base_path(), &name, shared.sync_on_write())?;
        Ok(Self {
            name,
            tail,
            shared,
            cursor,
            chunk_ms,
            abort,
            _payload: PhantomData,
        })
    }

    fn aborted(&self) -> bool {
        self.abort.load(Ordering::SeqCst)
    }

    fn process(&mut self, batch: Vec<Entry<T>>) -> Result<()> {
        self.tail.process(batch).map_err(|source| Error::TailFailure {
            name: self.name.clone(),
            source,
        })
    }

    fn whole_round(&mut self) -> Result<ForwardResult> {
        let from = self.cursor.read_index();
        let to = self.shared.write_index()?;
        if from == to {
            return Ok(ForwardResult::tip());
        }

        let batch = self.shared.select_entries::<T>(from, to)?;
        if self.aborted() {
            return Ok(ForwardResult::tip());
        }

        self.process(batch)?;
        self.cursor.advance(to)?;
        debug!(tail = %self.name, read_index = to, "cursor advanced");
        Ok(ForwardResult::tip())
    }

    fn chunked_round(&mut self, chunk_ms: i64) -> Result<ForwardResult> {
        let from = self.cursor.read_index();
        let Some(latest) = self.shared.latest_write()? else {
            return Ok(ForwardResult::tip());
        };
        let Some(first) = self.shared.get(from)? else {
            return Ok(ForwardResult::tip());
        };

        // Fix the window on chunk boundaries around the oldest
        // unprocessed record.
        let fixed_from = first.timestamp - first.timestamp % chunk_ms;
        let fixed_to = fixed_from + chunk_ms - 1;

        // The window is still open; nothing is delivered until it closes.
        if fixed_to > now_ms() {
            return Ok(ForwardResult::tip());
        }

        let range = self.shared.date_range();
        debug!(
            tail = %self.name,
            window_start = %range.format_time(fixed_from),
            window_end = %range.format_time(fixed_to),
            "processing chunk window"
        );

        let batch = self
            .shared
            .select_forward_entries::<T>(from, fixed_from, fixed_to)?;

        let (new_cursor, reached_tip) = match batch.last() {
            Some(last) => (last.index + 1, last.timestamp >= latest.timestamp),
            // Closed window with nothing matching the type filter: skip
            // past it so the next round can look at the next window.
            None => {
                let next = self.shared.skip_past(from, fixed_to)?;
                (next, next > latest.index)
            }
        };

        if self.aborted() {
            return Ok(ForwardResult::tip());
        }

        if !batch.is_empty() {
            self.process(batch)?;
        }
        self.cursor.advance(new_cursor)?;
        debug!(tail = %self.name, read_index = new_cursor, "cursor advanced");
        Ok(ForwardResult { reached_tip })
    }
}

impl<T: Any + Send, L: Tail<T>> Runner for TailRunner<T, L> {
    fn round(&mut self) -> Result<ForwardResult> {
        if self.aborted() {
            return Ok(ForwardResult::tip());
        }
        match self.chunk_ms {
            Some(chunk_ms) => self.chunked_round(chunk_ms),
            None => self.whole_round(),
        }
    }

    fn read_index(&self) -> u64 {
        self.cursor.read_index()
    }
}
