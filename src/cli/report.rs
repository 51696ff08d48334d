//! `outreach report`: reconcile the logs and write follow-up lists.

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;

use crate::channels::Channel;
use crate::config::Config;
use crate::contacts::ContactList;
use crate::logs::{LogSnapshot, SendAttempt, StatusEvent};
use crate::reconcile::ReconciliationEngine;
use crate::reconcile::report::{ReportOutput, render_summary, write_report};

const DEFAULT_REPORT_DIR: &str = "reports";

#[derive(Args, Debug, Clone)]
pub struct ReportArgs {
    /// Seconds a sent message may go without a final status before it counts
    /// as no-callback (0 disables pending)
    #[arg(long, value_parser = super::parse_duration_arg)]
    pub pending_window: Option<Duration>,

    /// Where to write the lists (defaults to <data-dir>/reports)
    #[arg(long)]
    pub out_dir: Option<PathBuf>,

    /// Contact source to join names and extra columns from
    #[arg(long)]
    pub contacts: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long)]
    pub json: bool,
}

/// Run a report command.
pub fn run_report_command(args: ReportArgs, config: &Config) -> anyhow::Result<()> {
    let sends = LogSnapshot::<SendAttempt>::read(config.send_log_path())?;
    let statuses = LogSnapshot::<StatusEvent>::read(config.status_log_path())?;
    if !sends.exists {
        tracing::warn!(path = %sends.path.display(), "No send log found, the report will be empty");
    }

    let contacts = args
        .contacts
        .as_deref()
        .map(|path| ContactList::from_path(path, Channel::WhatsApp, &config.fallback_name))
        .transpose()?;

    let window = args.pending_window.unwrap_or(config.pending_window);
    let reconciliation = ReconciliationEngine::new(window).reconcile(&sends, &statuses);

    let out_dir = args
        .out_dir
        .unwrap_or_else(|| config.data_dir.join(DEFAULT_REPORT_DIR));
    let files = write_report(&reconciliation, &out_dir, contacts.as_ref())?;

    if args.json {
        let output = ReportOutput {
            summary: &reconciliation.summary,
            files: &files,
            anomalies: &reconciliation.anomalies,
        };
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print!("{}", render_summary(&reconciliation.summary, &files));
    }
    Ok(())
}
