//! Durable tail cursors.
//!
//! Every tail owns a tiny append-only store under
//! `base_path/tails/<name>/cursor`. A commit appends one fixed 8-byte
//! big-endian index; recovery simply reads the last complete entry. This
//! reuses the same durable primitive as the main log instead of
//! rewriting a state file in place.
//!
//! A crash between a delivered batch and the cursor commit redelivers
//! the batch on the next round, which is the at-least-once contract.

use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::error::Result;

const ENTRY_SIZE: u64 = 8;

pub(crate) struct CursorStore {
    file: File,
    sync_on_write: bool,
    last: Option<u64>,
}

impl CursorStore {
    /// Opens (or creates) the cursor store for the named tail.
    pub(crate) fn open(base_path: &Path, name: &str, sync_on_write: bool) -> Result<Self> {
        let dir = base_path.join("tails").join(name);
        fs::create_dir_all(&dir)?;

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(dir.join("cursor"))?;

        let len = file.metadata()?.len();
        let complete = len - len % ENTRY_SIZE;
        let last = if complete >= ENTRY_SIZE {
            let mut buf = [0u8; ENTRY_SIZE as usize];
            file.seek(SeekFrom::Start(complete - ENTRY_SIZE))?;
            file.read_exact(&mut buf)?;
            Some(u64::from_be_bytes(buf))
        } else {
            None
        };

        Ok(Self {
            file,
            sync_on_write,
            last,
        })
    }

    /// Next index this tail should deliver; 0 for a fresh tail.
    pub(crate) fn read_index(&self) -> u64 {
        self.last.unwrap_or(0)
    }

    /// Persists a new cursor position.
    pub(crate) fn advance(&mut self, index: u64) -> Result<()> {
        self.file.write_all(&index.to_be_bytes())?;
        if self.sync_on_write {
            self.file.sync_data()?;
        }
        self.last = Some(index);
        Ok(())
    }
}
