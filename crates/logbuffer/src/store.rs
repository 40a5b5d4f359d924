//! Segmented Store
//!
//! A logical, infinite append-only array of framed records over rolling
//! segment files. One file holds `logs_per_file` records, so a record's
//! index maps straight to its segment:
//!
//! ```text
//! base_path/data/
//! ├── 00000000.seg    indexes [0, logs_per_file)
//! ├── 00000001.seg    indexes [logs_per_file, 2 * logs_per_file)
//! └── ...
//! ```
//!
//! The store is split into two halves with no shared mutable state:
//!
//! - [`StoreAppender`]: owns the current segment file, assigns indexes,
//!   rolls to a new file when the segment is full.
//! - [`StoreTailer`]: positional reads. Keeps an offset cache for the
//!   segment it last touched and extends it incrementally as the appender
//!   grows the file.
//!
//! Each half is single-threaded by contract; the `LogBuffer` puts one
//! mutex in front of each.
//!
//! ## Recovery
//!
//! On open the last segment is scanned frame by frame. A trailing frame
//! whose length prefix points past the end of the file is the leftover of
//! a crashed append; it is logged and cut off so the next append starts
//! on a clean frame boundary. The write index and the last written
//! timestamp are rebuilt from the scan.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use bytes::{Buf, Bytes};
use logbuffer_core::codec::{HEADER_SIZE, PEEK_SIZE};
use logbuffer_core::Record;
use tracing::{debug, info, warn};

use crate::error::Result;

const SEGMENT_EXT: &str = "seg";

fn segment_path(dir: &Path, segment_no: u64) -> PathBuf {
    dir.join(format!("{segment_no:08}.{SEGMENT_EXT}"))
}

/// Opens the store rooted at `dir`, recovering state from existing
/// segment files. Returns the two independent halves.
pub(crate) fn open(
    dir: &Path,
    logs_per_file: u64,
    sync_on_write: bool,
) -> Result<(StoreAppender, StoreTailer)> {
    fs::create_dir_all(dir)?;

    let segment_no = last_segment_no(dir)?.unwrap_or(0);
    let path = segment_path(dir, segment_no);
    let scan = scan_segment(&path)?;

    if scan.truncated {
        warn!(
            path = %path.display(),
            new_len = scan.good_len,
            "dropping torn trailing frame during recovery"
        );
        let file = OpenOptions::new().write(true).open(&path)?;
        file.set_len(scan.good_len)?;
    }

    // The last timestamp lives in the newest record; when the newest
    // segment is still empty it is in the previous one.
    let mut last_timestamp = scan.last_timestamp;
    if last_timestamp.is_none() && segment_no > 0 {
        last_timestamp = scan_segment(&segment_path(dir, segment_no - 1))?.last_timestamp;
    }

    let segment = OpenOptions::new().create(true).append(true).open(&path)?;
    let write_index = segment_no * logs_per_file + scan.records;

    info!(dir = %dir.display(), write_index, "segmented store opened");

    let appender = StoreAppender {
        dir: dir.to_path_buf(),
        logs_per_file,
        sync_on_write,
        segment_no,
        segment,
        segment_len: scan.good_len,
        records_in_segment: scan.records,
        write_index,
        last_timestamp: last_timestamp.unwrap_or(0),
    };
    let tailer = StoreTailer {
        dir: dir.to_path_buf(),
        logs_per_file,
        cache: None,
    };
    Ok((appender, tailer))
}

fn last_segment_no(dir: &Path) -> Result<Option<u64>> {
    let mut last = None;
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(SEGMENT_EXT) {
            continue;
        }
        let Some(no) = path
            .file_stem()
            .and_then(|s| s.to_str())
            .and_then(|s| s.parse::<u64>().ok())
        else {
            continue;
        };
        last = Some(last.map_or(no, |prev: u64| prev.max(no)));
    }
    Ok(last)
}

struct SegmentScan {
    records: u64,
    good_len: u64,
    last_timestamp: Option<i64>,
    truncated: bool,
}

/// Walks a segment file frame by frame. Stops at the first frame that is
/// not completely present.
fn scan_segment(path: &Path) -> Result<SegmentScan> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            return Ok(SegmentScan {
                records: 0,
                good_len: 0,
                last_timestamp: None,
                truncated: false,
            });
        }
        Err(err) => return Err(err.into()),
    };
    let file_len = file.metadata()?.len();

    let mut header = [0u8; HEADER_SIZE];
    let mut offset = 0u64;
    let mut records = 0u64;
    let mut last_timestamp = None;

    while offset + HEADER_SIZE as u64 <= file_len {
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(&mut header)?;

        let mut cursor = &header[..];
        let _type_tag = cursor.get_u64_le();
        let timestamp = cursor.get_i64_le();
        let payload_len = cursor.get_u32_le() as u64;

        let end = offset + HEADER_SIZE as u64 + payload_len;
        if end > file_len {
            break;
        }

        last_timestamp = Some(timestamp);
        records += 1;
        offset = end;
    }

    Ok(SegmentScan {
        records,
        good_len: offset,
        last_timestamp,
        truncated: offset < file_len,
    })
}

/// Write half of the store. Assigns indexes and rolls segment files.
pub(crate) struct StoreAppender {
    dir: PathBuf,
    logs_per_file: u64,
    sync_on_write: bool,
    segment_no: u64,
    segment: File,
    segment_len: u64,
    records_in_segment: u64,
    write_index: u64,
    last_timestamp: i64,
}

impl StoreAppender {
    /// Appends one framed record, returning its assigned index.
    ///
    /// On a write failure the segment is truncated back to its previous
    /// length so a retry cannot interleave with a torn frame, and the
    /// write index does not advance.
    pub(crate) fn append(&mut self, frame: &[u8]) -> Result<u64> {
        if self.records_in_segment >= self.logs_per_file {
            self.roll()?;
        }

        if let Err(err) = self.write_frame(frame) {
            let _ = self.segment.set_len(self.segment_len);
            return Err(err);
        }

        self.segment_len += frame.len() as u64;
        self.records_in_segment += 1;
        let index = self.write_index;
        self.write_index += 1;
        Ok(index)
    }

    fn write_frame(&mut self, frame: &[u8]) -> Result<()> {
        self.segment.write_all(frame)?;
        if self.sync_on_write {
            self.segment.sync_data()?;
        }
        Ok(())
    }

    fn roll(&mut self) -> Result<()> {
        let next = self.segment_no + 1;
        let path = segment_path(&self.dir, next);
        let segment = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(segment = next, path = %path.display(), "rolled to new segment file");

        self.segment = segment;
        self.segment_no = next;
        self.segment_len = 0;
        self.records_in_segment = 0;
        Ok(())
    }

    /// Next index that will be assigned.
    pub(crate) fn write_index(&self) -> u64 {
        self.write_index
    }

    /// Timestamp of the newest record, 0 when the store is empty.
    pub(crate) fn last_timestamp(&self) -> i64 {
        self.last_timestamp
    }

    pub(crate) fn set_last_timestamp(&mut self, timestamp: i64) {
        self.last_timestamp = timestamp;
    }
}

/// Read half of the store. Not safe for concurrent positional reads; the
/// `LogBuffer` serializes access behind its reader mutex.
pub(crate) struct StoreTailer {
    dir: PathBuf,
    logs_per_file: u64,
    cache: Option<SegmentCache>,
}

/// Frame offsets of the segment the tailer last touched, extended lazily
/// as the file grows.
struct SegmentCache {
    segment_no: u64,
    file: File,
    scan_pos: u64,
    offsets: Vec<u64>,
}

impl StoreTailer {
    /// Reads the record at `index`, or `None` at or past the tip.
    pub(crate) fn read(&mut self, index: u64) -> Result<Option<Record>> {
        let Some((cache, slot)) = self.locate(index)? else {
            return Ok(None);
        };

        let mut header = [0u8; HEADER_SIZE];
        cache.file.seek(SeekFrom::Start(cache.offsets[slot]))?;
        cache.file.read_exact(&mut header)?;

        let mut cursor = &header[..];
        let type_tag = cursor.get_u64_le();
        let timestamp = cursor.get_i64_le();
        let payload_len = cursor.get_u32_le() as usize;

        let mut payload = vec![0u8; payload_len];
        cache.file.read_exact(&mut payload)?;

        Ok(Some(Record::new(
            index,
            type_tag,
            timestamp,
            Bytes::from(payload),
        )))
    }

    /// Reads only type and timestamp of the record at `index`. Scans use
    /// this to skip records without materializing payloads.
    pub(crate) fn peek(&mut self, index: u64) -> Result<Option<(u64, i64)>> {
        let Some((cache, slot)) = self.locate(index)? else {
            return Ok(None);
        };

        let mut header = [0u8; PEEK_SIZE];
        cache.file.seek(SeekFrom::Start(cache.offsets[slot]))?;
        cache.file.read_exact(&mut header)?;

        let mut cursor = &header[..];
        Ok(Some((cursor.get_u64_le(), cursor.get_i64_le())))
    }

    /// Switches the cache to the segment holding `index` and makes sure
    /// its offset list covers the slot if the record exists.
    fn locate(&mut self, index: u64) -> Result<Option<(&mut SegmentCache, usize)>> {
        let segment_no = index / self.logs_per_file;
        let slot = (index % self.logs_per_file) as usize;

        let cached = matches!(&self.cache, Some(c) if c.segment_no == segment_no);
        if !cached {
            let path = segment_path(&self.dir, segment_no);
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    self.cache = None;
                    return Ok(None);
                }
                Err(err) => return Err(err.into()),
            };
            self.cache = Some(SegmentCache {
                segment_no,
                file,
                scan_pos: 0,
                offsets: Vec::new(),
            });
        }

        let Some(cache) = self.cache.as_mut() else {
            return Ok(None);
        };
        cache.extend_to(slot)?;
        if slot < cache.offsets.len() {
            Ok(Some((cache, slot)))
        } else {
            Ok(None)
        }
    }
}

impl SegmentCache {
    fn extend_to(&mut self, slot: usize) -> Result<()> {
        if slot < self.offsets.len() {
            return Ok(());
        }

        // Re-stat on every call: the appender may have grown the file
        // since the last scan.
        let file_len = self.file.metadata()?.len();
        let mut header = [0u8; HEADER_SIZE];

        while self.offsets.len() <= slot {
            if self.scan_pos + HEADER_SIZE as u64 > file_len {
                break;
            }
            self.file.seek(SeekFrom::Start(self.scan_pos))?;
            self.file.read_exact(&mut header)?;

            let mut len_bytes = &header[16..HEADER_SIZE];
            let payload_len = len_bytes.get_u32_le() as u64;
            let end = self.scan_pos + HEADER_SIZE as u64 + payload_len;
            if end > file_len {
                // In-flight or torn frame; a later call picks it up once
                // the appender has completed it.
                break;
            }

            self.offsets.push(self.scan_pos);
            self.scan_pos = end;
        }
        Ok(())
    }
}
