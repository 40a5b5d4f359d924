//! Date Ranges
//!
//! A [`DateRange`] correlates absolute wall-clock intervals with nominal,
//! contiguous index ranges so that time queries can be bucketed without a
//! secondary index.
//!
//! Each interval reserves `interval_ms * MAX_INDEX_PER_MS` indexes. The
//! reservation is a scaling factor for the index-to-time estimate, not a
//! cap on actual append rates: real indexes are assigned densely by the
//! appender and the bounds returned here are used for bucketing and
//! display only.
//!
//! Interval starts format in GMT as `yyyy-MM-dd`, `yyyy-MM-dd-HH-GMT`,
//! `yyyy-MM-dd-HH-mm-GMT` or `yyyy-MM-dd-HH-mm-ss-GMT` depending on the
//! granularity.

use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Number of indexes reserved per millisecond of interval.
pub const MAX_INDEX_PER_MS: u64 = 1000;

/// Interval granularity for bucketing and formatting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DateRange {
    Secondly,
    Minutely,
    #[default]
    Hourly,
    Daily,
}

impl DateRange {
    /// Length of one interval in milliseconds.
    pub fn interval_ms(self) -> i64 {
        match self {
            DateRange::Secondly => 1_000,
            DateRange::Minutely => 60 * 1_000,
            DateRange::Hourly => 60 * 60 * 1_000,
            DateRange::Daily => 24 * 60 * 60 * 1_000,
        }
    }

    /// Reserved index capacity of one interval.
    pub fn indexes_per_interval(self) -> u64 {
        self.interval_ms() as u64 * MAX_INDEX_PER_MS
    }

    /// Nominal first and last index of the interval containing `time_ms`.
    pub fn index_bounds(self, time_ms: i64) -> (u64, u64) {
        let interval = self.interval_ms();
        let ipi = self.indexes_per_interval();
        let from = (time_ms / interval) as u64 * ipi;
        let to = ((time_ms + interval) / interval) as u64 * ipi - 1;
        (from, to)
    }

    /// Start time of the interval that `index` falls in.
    pub fn start_time(self, index: u64) -> i64 {
        let ipi = self.indexes_per_interval();
        let first_index_of_interval = index - index % ipi;
        (first_index_of_interval / ipi) as i64 * self.interval_ms()
    }

    /// Format `time_ms` at this granularity, in GMT.
    pub fn format_time(self, time_ms: i64) -> String {
        let Some(dt) = Utc.timestamp_millis_opt(time_ms).single() else {
            return format!("out-of-range({time_ms})");
        };
        dt.format(self.format_pattern()).to_string()
    }

    /// Format the start time of the interval that `index` falls in.
    pub fn format_start(self, index: u64) -> String {
        self.format_time(self.start_time(index))
    }

    fn format_pattern(self) -> &'static str {
        match self {
            DateRange::Secondly => "%Y-%m-%d-%H-%M-%S-GMT",
            DateRange::Minutely => "%Y-%m-%d-%H-%M-GMT",
            DateRange::Hourly => "%Y-%m-%d-%H-GMT",
            DateRange::Daily => "%Y-%m-%d",
        }
    }
}
