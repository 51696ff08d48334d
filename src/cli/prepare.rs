//! `outreach prepare`: clean a contact export.

use std::path::PathBuf;

use clap::Args;

use crate::config::Config;
use crate::contacts::prepare;

#[derive(Args, Debug, Clone)]
pub struct PrepareArgs {
    /// Contact export (CSV or TSV)
    pub input: PathBuf,

    /// Directory for the generated lists
    #[arg(long, default_value = ".")]
    pub out_dir: PathBuf,
}

/// Run a prepare command.
pub fn run_prepare_command(args: PrepareArgs, config: &Config) -> anyhow::Result<()> {
    let summary = prepare(&args.input, &args.out_dir, &config.fallback_name)?;

    println!(
        "Read {} rows, kept {} ({} without a usable phone, {} duplicates dropped)",
        summary.input_rows, summary.kept, summary.dropped_no_phone, summary.dropped_duplicate
    );
    println!("  master:   {}", summary.master_path.display());
    println!(
        "  whatsapp: {} ({} contacts)",
        summary.whatsapp_path.display(),
        summary.whatsapp
    );
    println!(
        "  sms:      {} ({} contacts, US/MX only)",
        summary.sms_path.display(),
        summary.sms
    );
    Ok(())
}
