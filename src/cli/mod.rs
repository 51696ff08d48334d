//! CLI command handling.
//!
//! Provides subcommands for:
//! - Sending a campaign batch (`send`, alias `send_messages`)
//! - Reconciling deliveries into follow-up lists (`report`, alias `report_delivery`)
//! - Cleaning a contact export into send-ready lists (`prepare`)
//! - Recording a delivery status by hand (`record-status`)

mod prepare;
mod report;
mod send;
mod status;

pub use prepare::{PrepareArgs, run_prepare_command};
pub use report::{ReportArgs, run_report_command};
pub use send::{SendArgs, run_send_command};
pub use status::{RecordStatusArgs, run_record_status_command};

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

use crate::config::{self, Config};

#[derive(Parser, Debug)]
#[command(name = "outreach")]
#[command(about = "Send WhatsApp/SMS outreach batches and reconcile their delivery")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the send and status logs (overrides OUTREACH_DATA_DIR)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    pub log_json: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Send messages to a batch of contacts
    #[command(alias = "send_messages")]
    Send(SendArgs),

    /// Reconcile send and status logs into retry / pending / no-callback lists
    #[command(alias = "report_delivery")]
    Report(ReportArgs),

    /// Clean a contact export into master, WhatsApp and SMS lists
    Prepare(PrepareArgs),

    /// Append a delivery status event to the status log
    RecordStatus(RecordStatusArgs),
}

impl Cli {
    /// Apply global flags on top of the environment configuration.
    pub fn apply(&self, mut config: Config) -> Config {
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        config
    }
}

/// Run the parsed command.
pub async fn run_command(command: Command, config: &Config) -> anyhow::Result<()> {
    match command {
        Command::Send(args) => run_send_command(args, config).await,
        Command::Report(args) => run_report_command(args, config),
        Command::Prepare(args) => run_prepare_command(args, config),
        Command::RecordStatus(args) => run_record_status_command(args, config),
    }
}

/// Parse a seconds argument such as `0.7` or `86400`.
pub(crate) fn parse_duration_arg(raw: &str) -> Result<Duration, String> {
    config::parse_secs("value", raw).map_err(|e| e.to_string())
}

/// Parse a positive batch size.
pub(crate) fn parse_limit_arg(raw: &str) -> Result<usize, String> {
    match raw.trim().parse::<usize>() {
        Ok(0) => Err("limit must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(e) => Err(e.to_string()),
    }
}
