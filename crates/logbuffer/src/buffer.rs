//! Log Buffer
//!
//! The orchestrator that ties the pieces together. A [`LogBuffer`] owns:
//!
//! - the segmented store (appender and tailer halves, one mutex each),
//! - the serializer registry for typed payloads,
//! - the tail map and the shared scheduler.
//!
//! ```text
//! write(payload) ──► appender mutex ──► frame ──► segment file
//!
//! scheduler tick ──► tail runner ──► cursor ──► tailer mutex ──► scan
//!                        │                                        │
//!                        └────────── process(batch) ◄─────────────┘
//! ```
//!
//! ## Concurrency
//!
//! Appends from any number of threads serialize behind the appender
//! mutex, which is what makes index assignment dense and timestamps
//! non-decreasing. Scans serialize behind the tailer mutex. The two do
//! not block each other; a reader racing an append simply may or may not
//! see the newest record. `write_index()` takes the appender mutex, so a
//! caller that needs a consistent upper bound reads it explicitly.
//!
//! ## Timestamps
//!
//! The appender stamps every record with
//! `max(system_now_ms, last_written_timestamp)`, so timestamps stay
//! non-decreasing even when the wall clock jumps backwards.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use logbuffer_core::codec::encode_frame;
use logbuffer_core::{DateRange, Record, RAW_TYPE};
use tracing::{debug, info};

use crate::config::LogBufferConfig;
use crate::error::{Error, Result};
use crate::scheduler::{Scheduler, TaskHandle};
use crate::serializer::SerializerRegistry;
use crate::store::{self, StoreAppender, StoreTailer};
use crate::tail::{Entry, ForwardResult, Runner, Tail, TailRunner};

/// Milliseconds since epoch.
pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// A user callback that panicked poisons the mutex it was running under;
/// the state behind these locks stays consistent across rounds, so
/// recover the guard instead of propagating the poison.
pub(crate) fn lock<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// State shared between the buffer and its tail runners. Runners hold an
/// `Arc<Shared>` and never the `LogBuffer` itself, so closing the buffer
/// (which cancels all tails before releasing the store) cannot cycle.
pub(crate) struct Shared {
    config: LogBufferConfig,
    registry: SerializerRegistry,
    /// Write half; `None` once the buffer is closed.
    appender: Mutex<Option<StoreAppender>>,
    /// Read half; `None` once the buffer is closed.
    tailer: Mutex<Option<StoreTailer>>,
}

impl Shared {
    pub(crate) fn base_path(&self) -> &Path {
        &self.config.base_path
    }

    pub(crate) fn sync_on_write(&self) -> bool {
        self.config.sync_on_write
    }

    pub(crate) fn date_range(&self) -> DateRange {
        self.config.date_range
    }

    fn with_appender<R>(&self, f: impl FnOnce(&mut StoreAppender) -> Result<R>) -> Result<R> {
        let mut guard = lock(&self.appender);
        let appender = guard.as_mut().ok_or(Error::Closed)?;
        f(appender)
    }

    fn with_tailer<R>(&self, f: impl FnOnce(&mut StoreTailer) -> Result<R>) -> Result<R> {
        let mut guard = lock(&self.tailer);
        let tailer = guard.as_mut().ok_or(Error::Closed)?;
        f(tailer)
    }

    pub(crate) fn write_index(&self) -> Result<u64> {
        self.with_appender(|appender| Ok(appender.write_index()))
    }

    pub(crate) fn write_frame(&self, type_tag: u64, payload: &[u8]) -> Result<Record> {
        self.with_appender(|appender| {
            let timestamp = now_ms().max(appender.last_timestamp());
            let frame = encode_frame(type_tag, timestamp, payload)?;
            let index = appender.append(&frame)?;
            appender.set_last_timestamp(timestamp);
            Ok(Record::new(
                index,
                type_tag,
                timestamp,
                Bytes::copy_from_slice(payload),
            ))
        })
    }

    pub(crate) fn get(&self, index: u64) -> Result<Option<Record>> {
        self.with_tailer(|tailer| tailer.read(index))
    }

    pub(crate) fn latest_write(&self) -> Result<Option<Record>> {
        let write_index = self.write_index()?;
        self.get(write_index.saturating_sub(1))
    }

    pub(crate) fn select(&self, from_index: u64, to_index: u64) -> Result<Vec<Record>> {
        if from_index > to_index {
            return Err(Error::InvalidArgument("from_index must not exceed to_index"));
        }
        self.with_tailer(|tailer| {
            let mut records = Vec::new();
            for index in from_index..to_index {
                match tailer.read(index)? {
                    Some(record) => records.push(record),
                    None => break,
                }
            }
            Ok(records)
        })
    }

    pub(crate) fn select_forward_at(
        &self,
        from_index: u64,
        from_time_ms: i64,
        to_time_ms: i64,
    ) -> Result<Vec<Record>> {
        if from_time_ms > to_time_ms {
            return Err(Error::InvalidArgument("from_time must not exceed to_time"));
        }
        let write_index = self.write_index()?;
        self.with_tailer(|tailer| {
            let mut records = Vec::new();
            for index in from_index..write_index {
                let Some((_, timestamp)) = tailer.peek(index)? else {
                    break;
                };
                if timestamp >= from_time_ms && timestamp <= to_time_ms {
                    if let Some(record) = tailer.read(index)? {
                        records.push(record);
                    }
                }
                if timestamp > to_time_ms {
                    // timestamps are non-decreasing, nothing further back
                    // in the range can follow
                    break;
                }
            }
            Ok(records)
        })
    }

    pub(crate) fn select_backward_at(
        &self,
        from_index: u64,
        from_time_ms: i64,
        to_time_ms: i64,
    ) -> Result<Vec<Record>> {
        if from_time_ms > to_time_ms {
            return Err(Error::InvalidArgument("from_time must not exceed to_time"));
        }
        self.with_tailer(|tailer| {
            let mut records = Vec::new();
            for index in (0..=from_index).rev() {
                let Some((_, timestamp)) = tailer.peek(index)? else {
                    continue;
                };
                if timestamp >= from_time_ms && timestamp <= to_time_ms {
                    if let Some(record) = tailer.read(index)? {
                        records.push(record);
                    }
                }
                if timestamp < from_time_ms {
                    break;
                }
            }
            records.reverse();
            Ok(records)
        })
    }

    /// First index at or after `from_index` whose timestamp is past
    /// `to_time_ms`, or the write index when the scan drains the store.
    pub(crate) fn skip_past(&self, from_index: u64, to_time_ms: i64) -> Result<u64> {
        let write_index = self.write_index()?;
        self.with_tailer(|tailer| {
            let mut index = from_index;
            while index < write_index {
                match tailer.peek(index)? {
                    Some((_, timestamp)) if timestamp <= to_time_ms => index += 1,
                    _ => break,
                }
            }
            Ok(index)
        })
    }

    pub(crate) fn select_entries<T: Any + Send>(
        &self,
        from_index: u64,
        to_index: u64,
    ) -> Result<Vec<Entry<T>>> {
        let records = self.select(from_index, to_index)?;
        self.convert(records)
    }

    pub(crate) fn select_forward_entries<T: Any + Send>(
        &self,
        from_index: u64,
        from_time_ms: i64,
        to_time_ms: i64,
    ) -> Result<Vec<Entry<T>>> {
        let records = self.select_forward_at(from_index, from_time_ms, to_time_ms)?;
        self.convert(records)
    }

    /// Projects records through the tail/select type filter.
    ///
    /// `T = Record` means "all records": everything is passed through
    /// undecoded, unknown tags included. A concrete `T` keeps only
    /// records carrying `T`'s registered tag (decoded); raw records are
    /// excluded and a record whose tag has no registry entry aborts the
    /// projection, because the caller asked for decoded values.
    fn convert<T: Any + Send>(&self, records: Vec<Record>) -> Result<Vec<Entry<T>>> {
        let deliver_all = TypeId::of::<T>() == TypeId::of::<Record>();
        let wanted = TypeId::of::<T>();

        let mut entries = Vec::with_capacity(records.len());
        for record in records {
            if deliver_all {
                if let Some(value) = record_as::<T>(&record) {
                    entries.push(Entry {
                        index: record.index,
                        timestamp: record.timestamp,
                        value,
                    });
                }
                continue;
            }
            if record.is_raw() {
                continue;
            }
            match self.registry.type_id(record.type_tag) {
                None => {
                    return Err(Error::MissingDecoder {
                        tag: record.type_tag,
                    })
                }
                Some(type_id) if type_id == wanted => {
                    let value = self.registry.decode_to::<T>(record.type_tag, &record.payload)?;
                    entries.push(Entry {
                        index: record.index,
                        timestamp: record.timestamp,
                        value,
                    });
                }
                Some(_) => {}
            }
        }
        Ok(entries)
    }

    fn get_next_of_type<T: Any>(&self, from_index: u64) -> Result<Option<Record>> {
        let deliver_all = TypeId::of::<T>() == TypeId::of::<Record>();
        let wanted = TypeId::of::<T>();
        let write_index = self.write_index()?;
        self.with_tailer(|tailer| {
            for index in from_index..write_index {
                let Some((type_tag, _)) = tailer.peek(index)? else {
                    break;
                };
                let matches = deliver_all
                    || (type_tag != RAW_TYPE && self.registry.type_id(type_tag) == Some(wanted));
                if matches {
                    return tailer.read(index);
                }
            }
            Ok(None)
        })
    }
}

/// `T = Record` projection: hand the record itself through.
fn record_as<T: Any>(record: &Record) -> Option<T> {
    let boxed: Box<dyn Any> = Box::new(record.clone());
    boxed.downcast::<T>().ok().map(|value| *value)
}

struct TailSlot {
    runner: Arc<Mutex<dyn Runner>>,
    abort: Arc<AtomicBool>,
    handle: Option<TaskHandle>,
}

/// An embedded, append-only log store with durable tail cursors.
///
/// See the crate docs for the full model. In short: [`write`] appends
/// raw bytes, [`write_value`] appends a registered type; `select*` read
/// by index or time; [`forward`], [`schedule`] and [`schedule_chunked`]
/// drive tails. [`close`] cancels all tails, stops the scheduler and
/// releases the store; it also runs on drop.
///
/// [`write`]: LogBuffer::write
/// [`write_value`]: LogBuffer::write_value
/// [`forward`]: LogBuffer::forward
/// [`schedule`]: LogBuffer::schedule
/// [`schedule_chunked`]: LogBuffer::schedule_chunked
/// [`close`]: LogBuffer::close
pub struct LogBuffer {
    shared: Arc<Shared>,
    tails: Mutex<HashMap<String, TailSlot>>,
    scheduler: Scheduler,
}

impl LogBuffer {
    /// Opens a buffer without typed serializers.
    pub fn open(config: LogBufferConfig) -> Result<Self> {
        Self::open_with_serializers(config, SerializerRegistry::new())
    }

    /// Opens a buffer, recovering state from `base_path` if present.
    pub fn open_with_serializers(
        config: LogBufferConfig,
        registry: SerializerRegistry,
    ) -> Result<Self> {
        config.validate()?;
        let data_dir = config.base_path.join("data");
        let (appender, tailer) =
            store::open(&data_dir, config.logs_per_file, config.sync_on_write)?;
        info!(
            base_path = %config.base_path.display(),
            write_index = appender.write_index(),
            "log buffer opened"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                registry,
                appender: Mutex::new(Some(appender)),
                tailer: Mutex::new(Some(tailer)),
            }),
            tails: Mutex::new(HashMap::new()),
            scheduler: Scheduler::new(),
        })
    }

    /// Directory this buffer is stored under.
    pub fn base_path(&self) -> &Path {
        self.shared.base_path()
    }

    /// Configured bucketing granularity.
    pub fn date_range(&self) -> DateRange {
        self.shared.date_range()
    }

    /// The next index that will be assigned; equivalently, the number of
    /// records written so far.
    pub fn write_index(&self) -> Result<u64> {
        self.shared.write_index()
    }

    /// Appends raw bytes. Returns the record with its assigned index and
    /// timestamp.
    pub fn write(&self, payload: &[u8]) -> Result<Record> {
        self.shared.write_frame(RAW_TYPE, payload)
    }

    /// Encodes `value` through its registered serializer and appends it.
    pub fn write_value<T: Any>(&self, value: &T) -> Result<Record> {
        let (type_tag, payload) = self.shared.registry.encode_value(value)?;
        self.shared.write_frame(type_tag, &payload)
    }

    /// Reads one record, `None` at or past the write index.
    pub fn get(&self, index: u64) -> Result<Option<Record>> {
        self.shared.get(index)
    }

    /// The most recently written record, if any.
    pub fn latest_write(&self) -> Result<Option<Record>> {
        self.shared.latest_write()
    }

    /// Records with indexes in `[from_index, to_index)`.
    pub fn select(&self, from_index: u64, to_index: u64) -> Result<Vec<Record>> {
        self.shared.select(from_index, to_index)
    }

    /// Records from `from_index` up to the current write index.
    pub fn select_from(&self, from_index: u64) -> Result<Vec<Record>> {
        let write_index = self.shared.write_index()?;
        self.shared.select(from_index, write_index)
    }

    /// Records with `timestamp` in `[from_time_ms, to_time_ms]`, scanning
    /// forward from the newest index. See [`select_forward_at`] to start
    /// the scan at a known index.
    ///
    /// [`select_forward_at`]: LogBuffer::select_forward_at
    pub fn select_forward(&self, from_time_ms: i64, to_time_ms: i64) -> Result<Vec<Record>> {
        let start = self.shared.write_index()?.saturating_sub(1);
        self.shared.select_forward_at(start, from_time_ms, to_time_ms)
    }

    /// Forward time scan starting at `from_index`. Breaks as soon as a
    /// timestamp past `to_time_ms` is seen.
    pub fn select_forward_at(
        &self,
        from_index: u64,
        from_time_ms: i64,
        to_time_ms: i64,
    ) -> Result<Vec<Record>> {
        self.shared
            .select_forward_at(from_index, from_time_ms, to_time_ms)
    }

    /// Records with `timestamp` in `[from_time_ms, to_time_ms]`, scanning
    /// backward from the newest record. Result is in ascending time
    /// order.
    pub fn select_backward(&self, from_time_ms: i64, to_time_ms: i64) -> Result<Vec<Record>> {
        let write_index = self.shared.write_index()?;
        if write_index == 0 {
            if from_time_ms > to_time_ms {
                return Err(Error::InvalidArgument("from_time must not exceed to_time"));
            }
            return Ok(Vec::new());
        }
        self.shared
            .select_backward_at(write_index - 1, from_time_ms, to_time_ms)
    }

    /// Backward time scan starting at `from_index`.
    pub fn select_backward_at(
        &self,
        from_index: u64,
        from_time_ms: i64,
        to_time_ms: i64,
    ) -> Result<Vec<Record>> {
        self.shared
            .select_backward_at(from_index, from_time_ms, to_time_ms)
    }

    /// Typed projection of `[from_index, to_index)`; see [`Entry`] for
    /// the filter semantics.
    pub fn select_typed<T: Any + Send>(
        &self,
        from_index: u64,
        to_index: u64,
    ) -> Result<Vec<Entry<T>>> {
        self.shared.select_entries(from_index, to_index)
    }

    /// Typed projection from `from_index` to the current write index.
    pub fn select_typed_from<T: Any + Send>(&self, from_index: u64) -> Result<Vec<Entry<T>>> {
        let write_index = self.shared.write_index()?;
        self.shared.select_entries(from_index, write_index)
    }

    /// Typed forward time scan starting at `from_index`.
    pub fn select_forward_typed<T: Any + Send>(
        &self,
        from_index: u64,
        from_time_ms: i64,
        to_time_ms: i64,
    ) -> Result<Vec<Entry<T>>> {
        self.shared
            .select_forward_entries(from_index, from_time_ms, to_time_ms)
    }

    /// Typed backward time scan from the newest record.
    pub fn select_backward_typed<T: Any + Send>(
        &self,
        from_time_ms: i64,
        to_time_ms: i64,
    ) -> Result<Vec<Entry<T>>> {
        let records = self.select_backward(from_time_ms, to_time_ms)?;
        self.shared.convert(records)
    }

    /// First record at or after `from_index` whose tag is registered to
    /// `T`, scanning headers only. `T = Record` matches any record.
    pub fn get_next_of_type<T: Any>(&self, from_index: u64) -> Result<Option<Record>> {
        self.shared.get_next_of_type::<T>(from_index)
    }

    /// Registers the tail if its name is new, then synchronously runs one
    /// delivery round. A callback failure surfaces as
    /// [`Error::TailFailure`] and leaves the cursor untouched.
    pub fn forward<T: Any + Send, L: Tail<T>>(&self, tail: L) -> Result<ForwardResult> {
        let runner = self.tail_runner(tail, None)?;
        let result = lock(&runner).round();
        result
    }

    /// Like [`forward`], but the tail processes one fixed `chunk` window
    /// per call.
    ///
    /// [`forward`]: LogBuffer::forward
    pub fn forward_chunked<T: Any + Send, L: Tail<T>>(
        &self,
        tail: L,
        chunk: Duration,
    ) -> Result<ForwardResult> {
        let chunk_ms = chunk.as_millis() as i64;
        if chunk_ms == 0 {
            return Err(Error::InvalidArgument("chunk must be at least 1ms"));
        }
        let runner = self.tail_runner(tail, Some(chunk_ms))?;
        let result = lock(&runner).round();
        result
    }

    /// Registers the tail if its name is new and runs rounds with the
    /// given inter-round delay on the shared scheduler thread.
    pub fn schedule<T: Any + Send, L: Tail<T>>(&self, tail: L, delay: Duration) -> Result<()> {
        let name = tail.name().to_string();
        let runner = self.tail_runner(tail, None)?;
        self.bind_schedule(&name, runner, delay)
    }

    /// Like [`schedule`], but the tail processes fixed `chunk` windows of
    /// wall-clock time per round instead of the whole backlog.
    ///
    /// [`schedule`]: LogBuffer::schedule
    pub fn schedule_chunked<T: Any + Send, L: Tail<T>>(
        &self,
        tail: L,
        chunk: Duration,
        delay: Duration,
    ) -> Result<()> {
        let chunk_ms = chunk.as_millis() as i64;
        if chunk_ms == 0 {
            return Err(Error::InvalidArgument("chunk must be at least 1ms"));
        }
        let name = tail.name().to_string();
        let runner = self.tail_runner(tail, Some(chunk_ms))?;
        self.bind_schedule(&name, runner, delay)
    }

    /// Stops a scheduled tail and forgets it. The cursor file is kept, so
    /// registering the same name later resumes where it left off. With
    /// `may_interrupt_if_running` the in-flight round is signalled to
    /// abort at its next step boundary; the callback itself is never
    /// interrupted. Unknown names are a no-op.
    pub fn cancel(&self, name: &str, may_interrupt_if_running: bool) -> Result<()> {
        let slot = lock(&self.tails).remove(name);
        if let Some(slot) = slot {
            if may_interrupt_if_running {
                slot.abort.store(true, std::sync::atomic::Ordering::SeqCst);
            }
            if let Some(handle) = slot.handle {
                handle.cancel();
            }
            debug!(tail = name, "tail cancelled");
        }
        Ok(())
    }

    /// The persisted cursor of a registered tail.
    pub fn read_index(&self, name: &str) -> Result<u64> {
        let runner = {
            let tails = lock(&self.tails);
            let slot = tails
                .get(name)
                .ok_or_else(|| Error::UnknownTail(name.to_string()))?;
            Arc::clone(&slot.runner)
        };
        let index = lock(&runner).read_index();
        Ok(index)
    }

    /// Closes the buffer: cancels all tails, joins the scheduler thread
    /// (an in-flight round completes first) and releases the store's file
    /// handles. Idempotent; later operations fail with [`Error::Closed`].
    pub fn close(&self) -> Result<()> {
        let slots: Vec<TailSlot> = lock(&self.tails).drain().map(|(_, slot)| slot).collect();
        for slot in &slots {
            if let Some(handle) = &slot.handle {
                handle.cancel();
            }
        }
        self.scheduler.shutdown();
        drop(slots);

        let appender = lock(&self.shared.appender).take();
        lock(&self.shared.tailer).take();
        if appender.is_some() {
            info!(base_path = %self.shared.base_path().display(), "log buffer closed");
        }
        Ok(())
    }

    /// Looks up the runner for `tail.name()`, creating and registering it
    /// if absent. Registration under an existing name is a no-op and the
    /// original runner (including its delivery policy) is kept.
    fn tail_runner<T: Any + Send, L: Tail<T>>(
        &self,
        tail: L,
        chunk_ms: Option<i64>,
    ) -> Result<Arc<Mutex<dyn Runner>>> {
        // fail fast on a closed buffer before touching the cursor store
        self.shared.write_index()?;

        let name = tail.name().to_string();
        let mut tails = lock(&self.tails);
        if let Some(slot) = tails.get(&name) {
            return Ok(Arc::clone(&slot.runner));
        }

        let abort = Arc::new(AtomicBool::new(false));
        let runner = TailRunner::new(
            tail,
            Arc::clone(&self.shared),
            chunk_ms,
            Arc::clone(&abort),
        )?;
        let runner: Arc<Mutex<dyn Runner>> = Arc::new(Mutex::new(runner));
        tails.insert(
            name,
            TailSlot {
                runner: Arc::clone(&runner),
                abort,
                handle: None,
            },
        );
        Ok(runner)
    }

    fn bind_schedule(
        &self,
        name: &str,
        runner: Arc<Mutex<dyn Runner>>,
        delay: Duration,
    ) -> Result<()> {
        let mut tails = lock(&self.tails);
        let Some(slot) = tails.get_mut(name) else {
            // cancelled between registration and scheduling
            return Ok(());
        };
        if slot.handle.is_none() {
            slot.handle = Some(self.scheduler.schedule(name.to_string(), runner, delay)?);
        }
        Ok(())
    }
}

impl Drop for LogBuffer {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
