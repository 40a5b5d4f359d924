//! Log buffer configuration.

use std::path::PathBuf;

use logbuffer_core::DateRange;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Configuration for a [`LogBuffer`](crate::LogBuffer).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogBufferConfig {
    /// Root directory. Segment files live under `data/`, tail cursors
    /// under `tails/<name>/`.
    pub base_path: PathBuf,

    /// Records per segment file before rolling to the next one.
    pub logs_per_file: u64,

    /// Force `fdatasync` after every append and cursor commit.
    pub sync_on_write: bool,

    /// Interval granularity for index/time bucketing and window logging.
    pub date_range: DateRange,
}

impl Default for LogBufferConfig {
    fn default() -> Self {
        Self {
            base_path: std::env::temp_dir().join("logbuffer"),
            logs_per_file: 32767,
            sync_on_write: false,
            date_range: DateRange::default(),
        }
    }
}

impl LogBufferConfig {
    /// Validates the configuration, returning an error if invalid.
    pub(crate) fn validate(&self) -> Result<()> {
        if self.logs_per_file == 0 {
            return Err(Error::InvalidArgument(
                "logs_per_file must be greater than 0",
            ));
        }
        Ok(())
    }
}
