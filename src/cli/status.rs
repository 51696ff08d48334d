//! `outreach record-status`: append one delivery status event.

use anyhow::Context;
use chrono::Utc;
use clap::Args;

use crate::channels::Channel;
use crate::config::Config;
use crate::contacts::phone;
use crate::logs::{DeliveryStatus, LogWriter, StatusEvent, parse_timestamp};

#[derive(Args, Debug, Clone)]
pub struct RecordStatusArgs {
    /// Recipient phone number
    pub key: String,

    /// Channel: WA or SMS
    pub channel: Channel,

    /// Provider status (queued, sent, delivered, read, failed, undelivered, ...)
    pub status: DeliveryStatus,

    /// Provider error code or message id
    #[arg(long, default_value = "")]
    pub detail: String,

    /// Event time, RFC 3339 (defaults to now)
    #[arg(long)]
    pub at: Option<String>,
}

/// Run a record-status command.
pub fn run_record_status_command(args: RecordStatusArgs, config: &Config) -> anyhow::Result<()> {
    let key = phone::normalize(&args.key)
        .map(|p| p.e164)
        .with_context(|| format!("'{}' is not a usable phone number", args.key))?;
    let timestamp = match &args.at {
        Some(raw) => parse_timestamp(raw).map_err(anyhow::Error::msg)?,
        None => Utc::now(),
    };

    let event = StatusEvent {
        timestamp,
        recipient_key: key,
        channel: args.channel,
        status: args.status,
        detail: args.detail,
    };

    let mut log = LogWriter::<StatusEvent>::open_blocking(config.status_log_path())?;
    log.append(&event)?;
    tracing::info!(
        recipient = %event.recipient_key,
        channel = %event.channel,
        status = %event.status,
        "Recorded status"
    );
    println!(
        "Recorded {} for {} on {}",
        event.status, event.recipient_key, event.channel
    );
    Ok(())
}
