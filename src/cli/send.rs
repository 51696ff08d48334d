//! `outreach send`: run one campaign batch.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Args;

use crate::channels::{
    ChannelMode, HttpRelayTransport, MessageTransport, RetryConfig, RetryingTransport,
};
use crate::config::{Config, display_path};
use crate::contacts::ContactList;
use crate::logs::{LogWriter, SendAttempt};
use crate::sender::{BatchRequest, BatchResult, BatchSender};

#[derive(Args, Debug, Clone)]
pub struct SendArgs {
    /// Contact source CSV (Name, Phone_E164, optional Channel/OptIn/FirstName/GreetingName)
    pub source: PathBuf,

    /// Channel mode: WA, WA_TEMPLATE or SMS
    pub mode: ChannelMode,

    /// Simulate sends without contacting the relay
    #[arg(long)]
    pub dry_run: bool,

    /// 0-based contact index to start from
    #[arg(long, default_value = "0")]
    pub start_from: usize,

    /// Maximum number of contacts to process (at least 1)
    #[arg(long, value_parser = super::parse_limit_arg)]
    pub limit: Option<usize>,

    /// Seconds between live sends (overrides OUTREACH_DELAY_SECS)
    #[arg(long, value_parser = super::parse_duration_arg)]
    pub delay: Option<Duration>,
}

/// Run a send command.
pub async fn run_send_command(args: SendArgs, config: &Config) -> anyhow::Result<()> {
    let channel = args.mode.channel();
    let contacts = ContactList::from_path(&args.source, channel, &config.fallback_name)?;

    let mut sender = BatchSender::new(config.templates.clone());
    if !args.dry_run {
        let relay: Arc<dyn MessageTransport> =
            Arc::new(HttpRelayTransport::new(config.relay_config()?));
        let transport: Arc<dyn MessageTransport> = if config.send_retries > 0 {
            Arc::new(RetryingTransport::new(
                relay,
                RetryConfig::with_max_retries(config.send_retries),
            ))
        } else {
            relay
        };
        sender = sender.with_transport(transport, config.from_address(channel)?);
    }

    let log_path = config.send_log_path();
    let mut log = LogWriter::<SendAttempt>::open(&log_path)?;

    let request = BatchRequest {
        mode: args.mode,
        start_from: args.start_from,
        limit: args.limit,
        delay: args.delay.unwrap_or(config.delay),
        dry_run: args.dry_run,
    };
    let result = sender.run(&contacts, &request, &mut log).await?;

    print_result(&result, &display_path(&log_path));
    Ok(())
}

fn print_result(result: &BatchResult, log_path: &str) {
    let label = if result.dry_run { " (dry run)" } else { "" };
    println!(
        "Processed {} of {} contacts{} [{}..{})",
        result.processed, result.total, label, result.start, result.end
    );
    println!(
        "  sent: {}  failed: {}  skipped: {}  no phone: {}",
        result.sent, result.failed, result.skipped, result.skipped_unkeyed
    );
    println!("  log: {}", log_path);
    if result.is_complete() {
        println!("Batch complete.");
    } else {
        println!(
            "Next batch: --start-from {}",
            result.next_start_from()
        );
    }
}
