//! Append-only campaign logs.
//!
//! Two CSV logs carry all durable state:
//!
//! ```text
//! send_log.csv    timestamp,recipient_key,channel,template_id,mode,result,detail
//! status_log.csv  timestamp,recipient_key,channel,status,detail
//! ```
//!
//! Rows are only ever appended. Each row is encoded in memory and written
//! with a single `write_all` followed by `sync_data`, so an interrupted
//! process leaves at most one unterminated trailing line. Readers go
//! through [`snapshot`], which ignores such a tail.

mod send_log;
pub mod snapshot;
mod status_log;
mod writer;

pub use send_log::{SendAttempt, SendMode, SendResult};
pub use snapshot::{CorruptRow, LogSnapshot};
pub use status_log::{DeliveryStatus, StatusEvent, StatusOutcome};
pub use writer::LogWriter;

use chrono::{DateTime, SecondsFormat, Utc};
use csv::StringRecord;

pub const SEND_LOG_FILE: &str = "send_log.csv";
pub const STATUS_LOG_FILE: &str = "status_log.csv";

/// A row type stored in one of the campaign logs.
pub trait LogRecord: Sized {
    /// Log name used in anomalies and diagnostics.
    const LOG_NAME: &'static str;
    /// Column names, in on-disk order.
    const HEADER: &'static [&'static str];

    /// Field values in [`Self::HEADER`] order.
    fn to_fields(&self) -> Vec<String>;

    /// Decode a row. The error string explains what was wrong.
    fn from_fields(record: &StringRecord) -> Result<Self, String>;
}

/// Log timestamp format: RFC 3339, UTC, millisecond precision.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 timestamp in any offset into UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("bad timestamp '{}': {}", raw, e))
}

/// Fetch field `idx` of a row, checking the overall width first.
pub(crate) fn field<'r>(
    record: &'r StringRecord,
    idx: usize,
    expected_len: usize,
) -> Result<&'r str, String> {
    if record.len() != expected_len {
        return Err(format!(
            "expected {} fields, found {}",
            expected_len,
            record.len()
        ));
    }
    record
        .get(idx)
        .map(str::trim)
        .ok_or_else(|| format!("missing field {}", idx))
}

/// Fetch a field that must not be empty.
pub(crate) fn required<'r>(
    record: &'r StringRecord,
    idx: usize,
    expected_len: usize,
    name: &str,
) -> Result<&'r str, String> {
    let value = field(record, idx, expected_len)?;
    if value.is_empty() {
        return Err(format!("empty {}", name));
    }
    Ok(value)
}
