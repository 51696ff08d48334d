//! Status log rows, appended by delivery callbacks.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use csv::StringRecord;
use serde::Serialize;

use crate::channels::Channel;
use crate::logs::{LogRecord, field, format_timestamp, parse_timestamp, required};

/// Provider-reported message status.
///
/// The provider vocabulary is open-ended; anything not listed is kept
/// verbatim as [`DeliveryStatus::Other`] and treated as in flight.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeliveryStatus {
    Queued,
    Accepted,
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
    Undelivered,
    Bounced,
    Canceled,
    Other(String),
}

/// How a status bears on the campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusOutcome {
    /// Reached the handset.
    Positive,
    /// Will never be delivered.
    Negative,
    /// Still moving through the provider.
    InFlight,
}

impl DeliveryStatus {
    pub fn as_str(&self) -> &str {
        match self {
            DeliveryStatus::Queued => "queued",
            DeliveryStatus::Accepted => "accepted",
            DeliveryStatus::Sending => "sending",
            DeliveryStatus::Sent => "sent",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Read => "read",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Undelivered => "undelivered",
            DeliveryStatus::Bounced => "bounced",
            DeliveryStatus::Canceled => "canceled",
            DeliveryStatus::Other(s) => s,
        }
    }

    pub fn outcome(&self) -> StatusOutcome {
        match self {
            DeliveryStatus::Delivered | DeliveryStatus::Read => StatusOutcome::Positive,
            DeliveryStatus::Failed
            | DeliveryStatus::Undelivered
            | DeliveryStatus::Bounced
            | DeliveryStatus::Canceled => StatusOutcome::Negative,
            DeliveryStatus::Queued
            | DeliveryStatus::Accepted
            | DeliveryStatus::Sending
            | DeliveryStatus::Sent
            | DeliveryStatus::Other(_) => StatusOutcome::InFlight,
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        Ok(match normalized.as_str() {
            "" => return Err("empty status".to_string()),
            "queued" => DeliveryStatus::Queued,
            "accepted" => DeliveryStatus::Accepted,
            "sending" => DeliveryStatus::Sending,
            "sent" => DeliveryStatus::Sent,
            "delivered" => DeliveryStatus::Delivered,
            "read" => DeliveryStatus::Read,
            "failed" => DeliveryStatus::Failed,
            "undelivered" => DeliveryStatus::Undelivered,
            "bounced" => DeliveryStatus::Bounced,
            "canceled" | "cancelled" => DeliveryStatus::Canceled,
            _ => DeliveryStatus::Other(normalized),
        })
    }
}

impl Serialize for DeliveryStatus {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// One row of the status log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusEvent {
    pub timestamp: DateTime<Utc>,
    pub recipient_key: String,
    pub channel: Channel,
    pub status: DeliveryStatus,
    /// Provider error code or message id.
    pub detail: String,
}

impl LogRecord for StatusEvent {
    const LOG_NAME: &'static str = "status_log";
    const HEADER: &'static [&'static str] =
        &["timestamp", "recipient_key", "channel", "status", "detail"];

    fn to_fields(&self) -> Vec<String> {
        vec![
            format_timestamp(&self.timestamp),
            self.recipient_key.clone(),
            self.channel.to_string(),
            self.status.to_string(),
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
        let status = required(record, 3, n, "status")?.parse::<DeliveryStatus>()?;
        let detail = field(record, 4, n)?.to_string();

        Ok(Self {
            timestamp,
            recipient_key,
            channel,
            status,
            detail,
        })
    }
}
