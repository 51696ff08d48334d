//! Send log rows.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use csv::StringRecord;
use serde::Serialize;

use crate::channels::Channel;
use crate::logs::{LogRecord, format_timestamp, parse_timestamp, required};

/// Whether an attempt reached the transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendMode {
    DryRun,
    Live,
}

impl SendMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendMode::DryRun => "dry_run",
            SendMode::Live => "live",
        }
    }
}

impl fmt::Display for SendMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SendMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "dry_run" => Ok(SendMode::DryRun),
            "live" => Ok(SendMode::Live),
            other => Err(format!("unknown mode '{}'", other)),
        }
    }
}

/// Outcome of one attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendResult {
    Sent,
    Failed,
    Skipped,
}

impl SendResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendResult::Sent => "sent",
            SendResult::Failed => "failed",
            SendResult::Skipped => "skipped",
        }
    }
}

impl fmt::Display for SendResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SendResult {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sent" => Ok(SendResult::Sent),
            "failed" => Ok(SendResult::Failed),
            "skipped" => Ok(SendResult::Skipped),
            other => Err(format!("unknown result '{}'", other)),
        }
    }
}

/// One row of the send log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendAttempt {
    pub timestamp: DateTime<Utc>,
    pub recipient_key: String,
    pub channel: Channel,
    pub template_id: String,
    pub mode: SendMode,
    pub result: SendResult,
    /// Provider message id, error text or skip reason.
    pub detail: String,
}

impl LogRecord for SendAttempt {
    const LOG_NAME: &'static str = "send_log";
    const HEADER: &'static [&'static str] = &[
        "timestamp",
        "recipient_key",
        "channel",
        "template_id",
        "mode",
        "result",
        "detail",
    ];

    fn to_fields(&self) -> Vec<String> {
        vec![
            format_timestamp(&self.timestamp),
            self.recipient_key.clone(),
            self.channel.to_string(),
            self.template_id.clone(),
            self.mode.to_string(),
            self.result.to_string(),
            self.detail.clone(),
        ]
    }

    fn from_fields(record: &StringRecord) -> Result<Self, String> {
        let n = Self::HEADER.len();
        let timestamp = parse_timestamp(required(record, 0, n, "timestamp")?)?;
        let recipient_key = required(record, 1, n, "recipient_key")?.to_string();
        let channel = required(record, 2, n, "channel")?
            .parse::<Channel>()
            .map_err(|e| e.to_string())?;
        let template_id = required(record, 3, n, "template_id")?.to_string();
        let mode = required(record, 4, n, "mode")?.parse::<SendMode>()?;
        let result = required(record, 5, n, "result")?.parse::<SendResult>()?;
        let detail = crate::logs::field(record, 6, n)?.to_string();

        Ok(Self {
            timestamp,
            recipient_key,
            channel,
            template_id,
            mode,
            result,
            detail,
        })
    }
}
