//! Second-resolution backup timestamps.
//!
//! Every artifact written by a cycle embeds the same timestamp in its file
//! name. The text form is fixed width (`YYYYMMDD_HHMMSS`, UTC), so ordering
//! the text lexicographically is the same as ordering chronologically.

use chrono::{DateTime, NaiveDateTime, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

/// Length of the formatted timestamp, e.g. `20260101_120000`.
pub const TIMESTAMP_LEN: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BackupTimestamp(NaiveDateTime);

impl BackupTimestamp {
    pub fn now() -> Self {
        Self::from_datetime(Utc::now())
    }

    /// Truncates sub-second precision.
    pub fn from_datetime(datetime: DateTime<Utc>) -> Self {
        let naive = datetime.naive_utc();
        Self(naive.with_nanosecond(0).unwrap_or(naive))
    }

    pub fn to_datetime(&self) -> DateTime<Utc> {
        Utc.from_utc_datetime(&self.0)
    }
}

impl fmt::Display for BackupTimestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format(TIMESTAMP_FORMAT))
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Invalid backup timestamp: {0:?}")]
pub struct InvalidTimestamp(String);

impl FromStr for BackupTimestamp {
    type Err = InvalidTimestamp;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        // chrono accepts non-padded fields, the file names never contain them
        if s.len() != TIMESTAMP_LEN || !s.is_ascii() {
            return Err(InvalidTimestamp(s.to_string()));
        }
        NaiveDateTime::parse_from_str(s, TIMESTAMP_FORMAT)
            .map(Self)
            .map_err(|_| InvalidTimestamp(s.to_string()))
    }
}

impl TryFrom<String> for BackupTimestamp {
    type Error = InvalidTimestamp;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BackupTimestamp> for String {
    fn from(value: BackupTimestamp) -> Self {
        value.to_string()
    }
}
