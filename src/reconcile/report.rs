//! Report files and the printed summary.
//!
//! Each actionable classification gets its own CSV list. The lists start
//! with the columns a contact source needs, so `retry_list.csv` can be fed
//! straight back into `outreach send`. A recipient whose latest attempt was
//! skipped (opted out, or not on the batch channel) is written with
//! `OptIn=no`, so the follow-up batch skips it again.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::contacts::{ContactList, ContactRecord};
use crate::error::LogError;
use crate::logs::{SendResult, format_timestamp};
use crate::reconcile::{Anomaly, Classification, Reconciliation, RecipientOutcome, Summary};

pub const RETRY_LIST: &str = "retry_list.csv";
pub const PENDING_LIST: &str = "pending_list.csv";
pub const NO_CALLBACK_LIST: &str = "no_callback_list.csv";
pub const ANOMALIES_FILE: &str = "anomalies.csv";

const LIST_COLUMNS: [&str; 9] = [
    "Name",
    "Phone_E164",
    "Channel",
    "OptIn",
    "last_attempt_at",
    "last_result",
    "last_detail",
    "last_status",
    "last_status_at",
];

/// Contact columns that are already covered by [`LIST_COLUMNS`].
const RESERVED_CONTACT_COLUMNS: [&str; 6] =
    ["Name", "Phone_E164", "Phone", "Channel", "OptIn", "name"];

const ANOMALY_COLUMNS: [&str; 6] = ["kind", "log", "line", "recipient_key", "channel", "detail"];

/// Paths of the files written by [`write_report`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReportFiles {
    pub retry: PathBuf,
    pub pending: PathBuf,
    pub no_callback: PathBuf,
    pub anomalies: PathBuf,
}

/// Machine-readable report printed with `--json`.
#[derive(Debug, Serialize)]
pub struct ReportOutput<'a> {
    pub summary: &'a Summary,
    pub files: &'a ReportFiles,
    pub anomalies: &'a [Anomaly],
}

/// Write the list files and the anomaly file into `out_dir`.
///
/// `contacts`, when given, supplies names and extra columns for each
/// recipient.
pub fn write_report(
    reconciliation: &Reconciliation,
    out_dir: &Path,
    contacts: Option<&ContactList>,
) -> Result<ReportFiles, LogError> {
    fs::create_dir_all(out_dir).map_err(|e| LogError::io(out_dir, e))?;

    let files = ReportFiles {
        retry: out_dir.join(RETRY_LIST),
        pending: out_dir.join(PENDING_LIST),
        no_callback: out_dir.join(NO_CALLBACK_LIST),
        anomalies: out_dir.join(ANOMALIES_FILE),
    };

    let extras = extra_columns(contacts);
    for (classification, path) in [
        (Classification::Retry, &files.retry),
        (Classification::Pending, &files.pending),
        (Classification::NoCallback, &files.no_callback),
    ] {
        let rows: Vec<&RecipientOutcome> =
            reconciliation.with_classification(classification).collect();
        write_list(path, &rows, contacts, &extras)?;
        tracing::debug!(list = %classification, rows = rows.len(), path = %path.display(), "Wrote list");
    }
    write_anomalies(&files.anomalies, &reconciliation.anomalies)?;

    Ok(files)
}

/// Extra contact columns, sorted, across the whole source.
fn extra_columns(contacts: Option<&ContactList>) -> Vec<String> {
    let Some(contacts) = contacts else {
        return Vec::new();
    };
    contacts
        .records()
        .iter()
        .flat_map(|r| r.template_vars.keys())
        .filter(|k| !RESERVED_CONTACT_COLUMNS.contains(&k.as_str()))
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn write_list(
    path: &Path,
    rows: &[&RecipientOutcome],
    contacts: Option<&ContactList>,
    extras: &[String],
) -> Result<(), LogError> {
    let mut wtr = csv::Writer::from_path(path).map_err(|e| encode_error(path, e))?;

    let header: Vec<&str> = LIST_COLUMNS
        .iter()
        .copied()
        .chain(extras.iter().map(String::as_str))
        .collect();
    wtr.write_record(&header).map_err(|e| encode_error(path, e))?;

    for outcome in rows {
        let contact: Option<&ContactRecord> =
            contacts.and_then(|c| c.find_for(&outcome.recipient_key, outcome.channel));
        let status = outcome.last_status.as_ref();

        let mut record = vec![
            contact.map(display_name).unwrap_or_default(),
            outcome.recipient_key.clone(),
            outcome.channel.list_label().to_string(),
            opt_in(outcome, contact),
            format_timestamp(&outcome.last_attempt.timestamp),
            outcome.last_attempt.result.to_string(),
            outcome.last_attempt.detail.clone(),
            status.map(|s| s.status.to_string()).unwrap_or_default(),
            status
                .map(|s| format_timestamp(&s.timestamp))
                .unwrap_or_default(),
        ];
        record.extend(extras.iter().map(|column| {
            contact
                .and_then(|c| c.template_vars.get(column))
                .cloned()
                .unwrap_or_default()
        }));
        wtr.write_record(&record).map_err(|e| encode_error(path, e))?;
    }

    wtr.flush().map_err(|e| LogError::io(path, e))
}

/// `no` for a skipped latest attempt, otherwise the joined contact's value.
fn opt_in(outcome: &RecipientOutcome, contact: Option<&ContactRecord>) -> String {
    if outcome.last_attempt.result == SendResult::Skipped {
        return "no".to_string();
    }
    contact
        .and_then(|c| c.template_vars.get("OptIn"))
        .cloned()
        .unwrap_or_default()
}

fn display_name(contact: &ContactRecord) -> String {
    contact
        .template_vars
        .get("Name")
        .filter(|n| !n.is_empty())
        .cloned()
        .unwrap_or_else(|| contact.name().to_string())
}

fn write_anomalies(path: &Path, anomalies: &[Anomaly]) -> Result<(), LogError> {
    let mut wtr = csv::Writer::from_path(path).map_err(|e| encode_error(path, e))?;
    wtr.write_record(ANOMALY_COLUMNS)
        .map_err(|e| encode_error(path, e))?;
    for a in anomalies {
        wtr.write_record([
            a.kind.as_str().to_string(),
            a.log.to_string(),
            a.line.map(|l| l.to_string()).unwrap_or_default(),
            a.recipient_key.clone().unwrap_or_default(),
            a.channel.map(|c| c.to_string()).unwrap_or_default(),
            a.detail.clone(),
        ])
        .map_err(|e| encode_error(path, e))?;
    }
    wtr.flush().map_err(|e| LogError::io(path, e))
}

fn encode_error(path: &Path, e: csv::Error) -> LogError {
    let message = format!("{}: {}", path.display(), e);
    match e.into_kind() {
        csv::ErrorKind::Io(io) => LogError::io(path, io),
        _ => LogError::Encode(message),
    }
}

/// Human-readable summary for stdout.
pub fn render_summary(summary: &Summary, files: &ReportFiles) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Delivery report ({} recipients)", summary.recipients);
    for class in Classification::ALL {
        let _ = writeln!(out, "  {:<12} {}", class.as_str(), summary.counts.get(class));
    }
    for (channel, counts) in &summary.by_channel {
        let _ = writeln!(
            out,
            "  {:<12} retry={} pending={} no_callback={} delivered={}",
            channel.list_label(),
            counts.retry,
            counts.pending,
            counts.no_callback,
            counts.delivered
        );
    }
    if summary.dry_run_rows_ignored > 0 {
        let _ = writeln!(out, "  dry-run rows ignored: {}", summary.dry_run_rows_ignored);
    }
    if summary.anomalies > 0 {
        let _ = writeln!(
            out,
            "  anomalies: {} (see {})",
            summary.anomalies,
            files.anomalies.display()
        );
    }
    let _ = writeln!(out, "  pending window: {}s", summary.pending_window_secs);
    let _ = writeln!(out, "  send log sha256:   {}", summary.send_log_digest);
    let _ = writeln!(out, "  status log sha256: {}", summary.status_log_digest);
    let _ = writeln!(out, "Lists:");
    for path in [&files.retry, &files.pending, &files.no_callback] {
        let _ = writeln!(out, "  {}", path.display());
    }
    out
}
