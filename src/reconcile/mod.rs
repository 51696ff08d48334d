//! Delivery reconciliation.
//!
//! Joins the send log with the status log and classifies every recipient
//! that had a live attempt:
//!
//! ```text
//! latest attempt failed/skipped ─────────────────────────► retry
//! latest attempt sent ─┬─ no status ───────── window ───► pending | no_callback
//!                      ├─ failed/undelivered/... ───────► retry
//!                      ├─ delivered/read ───────────────► delivered
//!                      └─ queued/sent/other ── window ──► pending | no_callback
//! ```
//!
//! "Latest" means the maximum by (timestamp, position in the log): a row
//! written later wins a timestamp tie, and an older row appended late never
//! overrides a newer one. Dry-run rows never take part.

pub mod report;

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::channels::Channel;
use crate::logs::snapshot::Positioned;
use crate::logs::{
    CorruptRow, LogRecord, LogSnapshot, SendAttempt, SendMode, SendResult, StatusEvent,
    StatusOutcome,
};

/// Where a recipient stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Retry,
    Pending,
    NoCallback,
    Delivered,
}

impl Classification {
    pub const ALL: [Classification; 4] = [
        Classification::Retry,
        Classification::Pending,
        Classification::NoCallback,
        Classification::Delivered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Classification::Retry => "retry",
            Classification::Pending => "pending",
            Classification::NoCallback => "no_callback",
            Classification::Delivered => "delivered",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The reduced state of one (recipient, channel) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RecipientOutcome {
    pub recipient_key: String,
    pub channel: Channel,
    pub classification: Classification,
    pub last_attempt: SendAttempt,
    pub last_status: Option<StatusEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyKind {
    /// A log row that could not be decoded.
    CorruptRow,
    /// A status event for a recipient with no live attempt.
    OrphanStatus,
}

impl AnomalyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyKind::CorruptRow => "corrupt_row",
            AnomalyKind::OrphanStatus => "orphan_status",
        }
    }
}

/// Something in the logs the operator should look at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Anomaly {
    pub kind: AnomalyKind,
    pub log: &'static str,
    pub line: Option<u64>,
    pub recipient_key: Option<String>,
    pub channel: Option<Channel>,
    pub detail: String,
}

impl From<&CorruptRow> for Anomaly {
    fn from(row: &CorruptRow) -> Self {
        Self {
            kind: AnomalyKind::CorruptRow,
            log: row.log,
            line: Some(row.line),
            recipient_key: None,
            channel: None,
            detail: format!("{}: {}", row.reason, row.raw),
        }
    }
}

/// Per-classification counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub retry: usize,
    pub pending: usize,
    pub no_callback: usize,
    pub delivered: usize,
}

impl Counts {
    fn add(&mut self, classification: Classification) {
        *self.get_mut(classification) += 1;
    }

    fn get_mut(&mut self, classification: Classification) -> &mut usize {
        match classification {
            Classification::Retry => &mut self.retry,
            Classification::Pending => &mut self.pending,
            Classification::NoCallback => &mut self.no_callback,
            Classification::Delivered => &mut self.delivered,
        }
    }

    pub fn get(&self, classification: Classification) -> usize {
        match classification {
            Classification::Retry => self.retry,
            Classification::Pending => self.pending,
            Classification::NoCallback => self.no_callback,
            Classification::Delivered => self.delivered,
        }
    }

    pub fn total(&self) -> usize {
        self.retry + self.pending + self.no_callback + self.delivered
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub recipients: usize,
    pub counts: Counts,
    pub by_channel: BTreeMap<Channel, Counts>,
    pub dry_run_rows_ignored: usize,
    pub anomalies: usize,
    pub send_log_digest: String,
    pub status_log_digest: String,
    pub pending_window_secs: u64,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// One entry per (recipient, channel), in order of first live attempt.
    pub outcomes: Vec<RecipientOutcome>,
    pub anomalies: Vec<Anomaly>,
    pub summary: Summary,
}

impl Reconciliation {
    pub fn with_classification(
        &self,
        classification: Classification,
    ) -> impl Iterator<Item = &RecipientOutcome> {
        self.outcomes
            .iter()
            .filter(move |o| o.classification == classification)
    }
}

/// Classifies recipients from log snapshots.
#[derive(Debug, Clone)]
pub struct ReconciliationEngine {
    pending_window: Duration,
    now: DateTime<Utc>,
}

impl ReconciliationEngine {
    /// Engine evaluating ages against the current time. A zero window
    /// disables the pending classification.
    pub fn new(pending_window: Duration) -> Self {
        Self {
            pending_window,
            now: Utc::now(),
        }
    }

    /// Evaluate ages against a fixed instant.
    pub fn at(mut self, now: DateTime<Utc>) -> Self {
        self.now = now;
        self
    }

    pub fn reconcile(
        &self,
        sends: &LogSnapshot<SendAttempt>,
        statuses: &LogSnapshot<StatusEvent>,
    ) -> Reconciliation {
        let dry_run_rows_ignored = sends
            .records
            .iter()
            .filter(|p| p.record.mode == SendMode::DryRun)
            .count();
        let attempts = latest_by_key(
            sends
                .records
                .iter()
                .filter(|p| p.record.mode == SendMode::Live),
            |a| (&a.recipient_key, a.channel),
            |a| a.timestamp,
        );
        let latest_status = latest_by_key(
            statuses.records.iter(),
            |e| (&e.recipient_key, e.channel),
            |e| e.timestamp,
        );

        let mut anomalies: Vec<Anomaly> = sends
            .corrupt
            .iter()
            .chain(statuses.corrupt.iter())
            .map(Anomaly::from)
            .collect();

        let attempted: HashSet<(&str, Channel)> = attempts
            .iter()
            .map(|p| (p.record.recipient_key.as_str(), p.record.channel))
            .collect();
        for p in &latest_status {
            let event = &p.record;
            if !attempted.contains(&(event.recipient_key.as_str(), event.channel)) {
                tracing::warn!(
                    recipient = %event.recipient_key,
                    channel = %event.channel,
                    line = p.line,
                    "Status event without a live send attempt"
                );
                anomalies.push(Anomaly {
                    kind: AnomalyKind::OrphanStatus,
                    log: StatusEvent::LOG_NAME,
                    line: Some(p.line),
                    recipient_key: Some(event.recipient_key.clone()),
                    channel: Some(event.channel),
                    detail: format!("status '{}' with no live send attempt", event.status),
                });
            }
        }

        let status_index: HashMap<(&str, Channel), &StatusEvent> = latest_status
            .iter()
            .map(|p| ((p.record.recipient_key.as_str(), p.record.channel), &p.record))
            .collect();

        let mut counts = Counts::default();
        let mut by_channel: BTreeMap<Channel, Counts> = BTreeMap::new();
        let outcomes: Vec<RecipientOutcome> = attempts
            .iter()
            .map(|p| {
                let attempt = &p.record;
                let status = status_index
                    .get(&(attempt.recipient_key.as_str(), attempt.channel))
                    .copied();
                let classification = self.classify(attempt, status);
                counts.add(classification);
                by_channel.entry(attempt.channel).or_default().add(classification);
                RecipientOutcome {
                    recipient_key: attempt.recipient_key.clone(),
                    channel: attempt.channel,
                    classification,
                    last_attempt: attempt.clone(),
                    last_status: status.cloned(),
                }
            })
            .collect();

        let summary = Summary {
            recipients: outcomes.len(),
            counts,
            by_channel,
            dry_run_rows_ignored,
            anomalies: anomalies.len(),
            send_log_digest: sends.digest.clone(),
            status_log_digest: statuses.digest.clone(),
            pending_window_secs: self.pending_window.as_secs(),
            generated_at: self.now,
        };

        tracing::info!(
            recipients = summary.recipients,
            retry = counts.retry,
            pending = counts.pending,
            no_callback = counts.no_callback,
            delivered = counts.delivered,
            anomalies = summary.anomalies,
            "Reconciliation complete"
        );

        Reconciliation {
            outcomes,
            anomalies,
            summary,
        }
    }

    /// Classify one recipient from its latest attempt and latest status.
    pub fn classify(&self, attempt: &SendAttempt, status: Option<&StatusEvent>) -> Classification {
        if matches!(attempt.result, SendResult::Failed | SendResult::Skipped) {
            return Classification::Retry;
        }
        match status.map(|s| s.status.outcome()) {
            Some(StatusOutcome::Negative) => Classification::Retry,
            Some(StatusOutcome::Positive) => Classification::Delivered,
            Some(StatusOutcome::InFlight) | None => self.by_age(attempt.timestamp),
        }
    }

    fn by_age(&self, sent_at: DateTime<Utc>) -> Classification {
        if self.pending_window.is_zero() {
            return Classification::NoCallback;
        }
        // Clock skew can put a send in the future; treat it as fresh.
        let age = (self.now - sent_at).to_std().unwrap_or(Duration::ZERO);
        if age < self.pending_window {
            Classification::Pending
        } else {
            Classification::NoCallback
        }
    }
}

/// Keep the latest record per key, where later log position wins ties.
/// The result is ordered by each key's first appearance.
fn latest_by_key<'a, R, T>(
    records: impl Iterator<Item = &'a Positioned<R>>,
    key: impl Fn(&R) -> (&String, Channel),
    timestamp: impl Fn(&R) -> T,
) -> Vec<&'a Positioned<R>>
where
    R: 'a,
    T: Ord,
{
    let mut order: Vec<&'a Positioned<R>> = Vec::new();
    let mut index: HashMap<(String, Channel), usize> = HashMap::new();

    for p in records {
        let (k, channel) = key(&p.record);
        match index.get(&(k.clone(), channel)) {
            Some(&i) => {
                if timestamp(&p.record) >= timestamp(&order[i].record) {
                    order[i] = p;
                }
            }
            None => {
                index.insert((k.clone(), channel), order.len());
                order.push(p);
            }
        }
    }
    order
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    use super::*;

    const SEND_HEADER: &str = "timestamp,recipient_key,channel,template_id,mode,result,detail\n";
    const STATUS_HEADER: &str = "timestamp,recipient_key,channel,status,detail\n";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 9, 2, 12, 0, 0).unwrap()
    }

    fn sends(rows: &str) -> LogSnapshot<SendAttempt> {
        LogSnapshot::from_bytes(Path::new("send_log.csv"), format!("{SEND_HEADER}{rows}").as_bytes())
            .unwrap()
    }

    fn statuses(rows: &str) -> LogSnapshot<StatusEvent> {
        LogSnapshot::from_bytes(
            Path::new("status_log.csv"),
            format!("{STATUS_HEADER}{rows}").as_bytes(),
        )
        .unwrap()
    }

    fn engine(window_secs: u64) -> ReconciliationEngine {
        ReconciliationEngine::new(Duration::from_secs(window_secs)).at(now())
    }

    fn classes(r: &Reconciliation) -> Vec<(String, Classification)> {
        r.outcomes
            .iter()
            .map(|o| (o.recipient_key.clone(), o.classification))
            .collect()
    }

    #[test]
    fn test_failed_attempt_is_retry() {
        let r = engine(0).reconcile(
            &sends("2025-09-01T18:00:00Z,+12145550101,SMS,sms,live,failed,HTTP 500\n"),
            &statuses(""),
        );
        assert_eq!(classes(&r), vec![("+12145550101".to_string(), Classification::Retry)]);
    }

    #[test]
    fn test_skipped_attempt_is_retry() {
        let r = engine(0).reconcile(
            &sends("2025-09-01T18:00:00Z,+12145550101,SMS,sms,live,skipped,opted out\n"),
            &statuses(""),
        );
        assert_eq!(r.outcomes[0].classification, Classification::Retry);
    }

    #[test]
    fn test_sent_without_status_and_zero_window_is_no_callback() {
        let r = engine(0).reconcile(
            &sends("2025-09-02T11:59:59Z,+12145550101,SMS,sms,live,sent,SM1\n"),
            &statuses(""),
        );
        assert_eq!(r.outcomes[0].classification, Classification::NoCallback);
    }

    #[test]
    fn test_window_separates_pending_from_no_callback() {
        let r = engine(3600).reconcile(
            &sends(
                "2025-09-02T11:30:00Z,+12145550101,SMS,sms,live,sent,SM1\n\
                 2025-09-02T10:00:00Z,+12145550102,SMS,sms,live,sent,SM2\n",
            ),
            &statuses(""),
        );
        assert_eq!(
            classes(&r),
            vec![
                ("+12145550101".to_string(), Classification::Pending),
                ("+12145550102".to_string(), Classification::NoCallback),
            ]
        );
    }

    #[test]
    fn test_in_flight_status_follows_window() {
        let r = engine(3600).reconcile(
            &sends("2025-09-02T11:30:00Z,+12145550101,SMS,sms,live,sent,SM1\n"),
            &statuses("2025-09-02T11:30:02Z,+12145550101,SMS,queued,\n"),
        );
        assert_eq!(r.outcomes[0].classification, Classification::Pending);
        assert_eq!(
            r.outcomes[0].last_status.as_ref().map(|s| s.status.to_string()),
            Some("queued".to_string())
        );
    }

    #[test]
    fn test_delivered_and_negative_statuses() {
        let r = engine(0).reconcile(
            &sends(
                "2025-09-01T18:00:00Z,+12145550101,SMS,sms,live,sent,SM1\n\
                 2025-09-01T18:00:01Z,+12145550102,SMS,sms,live,sent,SM2\n",
            ),
            &statuses(
                "2025-09-01T18:01:00Z,+12145550101,SMS,delivered,\n\
                 2025-09-01T18:01:00Z,+12145550102,SMS,undelivered,30003\n",
            ),
        );
        assert_eq!(
            classes(&r),
            vec![
                ("+12145550101".to_string(), Classification::Delivered),
                ("+12145550102".to_string(), Classification::Retry),
            ]
        );
        assert_eq!(r.summary.counts.delivered, 1);
        assert_eq!(r.summary.counts.retry, 1);
    }

    #[test]
    fn test_latest_status_wins() {
        let r = engine(0).reconcile(
            &sends("2025-09-01T18:00:00Z,+12145550101,SMS,sms,live,sent,SM1\n"),
            &statuses(
                "2025-09-01T18:00:05Z,+12145550101,SMS,sent,\n\
                 2025-09-01T18:01:00Z,+12145550101,SMS,delivered,\n",
            ),
        );
        assert_eq!(r.outcomes[0].classification, Classification::Delivered);
    }

    #[test]
    fn test_older_attempt_appended_late_does_not_override() {
        let r = engine(0).reconcile(
            &sends(
                "2025-09-01T18:00:00Z,+12145550101,SMS,sms,live,sent,SM1\n\
                 2025-09-01T17:00:00Z,+12145550101,SMS,sms,live,failed,HTTP 500\n",
            ),
            &statuses("2025-09-01T18:01:00Z,+12145550101,SMS,delivered,\n"),
        );
        assert_eq!(r.outcomes[0].classification, Classification::Delivered);
        assert_eq!(r.outcomes[0].last_attempt.detail, "SM1");
    }

    #[test]
    fn test_timestamp_tie_later_row_wins() {
        let r = engine(0).reconcile(
            &sends(
                "2025-09-01T18:00:00Z,+12145550101,SMS,sms,live,failed,HTTP 500\n\
                 2025-09-01T18:00:00Z,+12145550101,SMS,sms,live,sent,SM2\n",
            ),
            &statuses(""),
        );
        assert_eq!(r.outcomes[0].classification, Classification::NoCallback);
    }

    #[test]
    fn test_channels_reconcile_independently() {
        let r = engine(0).reconcile(
            &sends(
                "2025-09-01T18:00:00Z,+12145550101,SMS,sms,live,sent,SM1\n\
                 2025-09-01T18:00:00Z,+12145550101,WA,wa_template,live,failed,err\n",
            ),
            &statuses("2025-09-01T18:01:00Z,+12145550101,SMS,delivered,\n"),
        );
        assert_eq!(r.outcomes.len(), 2);
        assert_eq!(r.summary.by_channel[&Channel::Sms].delivered, 1);
        assert_eq!(r.summary.by_channel[&Channel::WhatsApp].retry, 1);
    }

    #[test]
    fn test_dry_run_rows_excluded_and_counted() {
        let r = engine(0).reconcile(
            &sends(
                "2025-09-01T18:00:00Z,+12145550101,SMS,sms,dry_run,sent,simulated\n\
                 2025-09-01T18:00:01Z,+12145550102,SMS,sms,dry_run,sent,simulated\n",
            ),
            &statuses(""),
        );
        assert!(r.outcomes.is_empty());
        assert_eq!(r.summary.dry_run_rows_ignored, 2);
    }

    #[test]
    fn test_orphan_status_reported() {
        let r = engine(0).reconcile(
            &sends("2025-09-01T18:00:00Z,+12145550101,SMS,sms,live,sent,SM1\n"),
            &statuses("2025-09-01T18:01:00Z,+12145550199,SMS,delivered,\n"),
        );
        assert_eq!(r.outcomes.len(), 1);
        assert_eq!(r.anomalies.len(), 1);
        let anomaly = &r.anomalies[0];
        assert_eq!(anomaly.kind, AnomalyKind::OrphanStatus);
        assert_eq!(anomaly.recipient_key.as_deref(), Some("+12145550199"));
        assert_eq!(anomaly.line, Some(2));
    }

    #[test]
    fn test_corrupt_rows_become_anomalies() {
        let r = engine(0).reconcile(
            &sends(
                "2025-09-01T18:00:00Z,+12145550101,SMS,sms,live,sent,SM1\n\
                 garbage,+12145550102,SMS,sms,live,sent,SM2\n",
            ),
            &statuses("2025-09-01T18:01:00Z,+12145550101,PIGEON,delivered,\n"),
        );
        assert_eq!(r.outcomes.len(), 1);
        let kinds: Vec<_> = r.anomalies.iter().map(|a| (a.kind, a.log, a.line)).collect();
        assert_eq!(
            kinds,
            vec![
                (AnomalyKind::CorruptRow, "send_log", Some(3)),
                (AnomalyKind::CorruptRow, "status_log", Some(2)),
            ]
        );
        assert_eq!(r.summary.anomalies, 2);
    }

    #[test]
    fn test_partition_is_exact() {
        let r = engine(3600).reconcile(
            &sends(
                "2025-09-02T11:50:00Z,+12145550101,SMS,sms,live,sent,SM1\n\
                 2025-09-01T11:50:00Z,+12145550102,SMS,sms,live,sent,SM2\n\
                 2025-09-01T11:50:00Z,+12145550103,SMS,sms,live,failed,x\n\
                 2025-09-01T11:50:00Z,+12145550104,WA,wa_text,live,sent,SM4\n\
                 2025-09-01T11:50:00Z,+12145550101,SMS,sms,dry_run,sent,simulated\n",
            ),
            &statuses("2025-09-01T11:51:00Z,+12145550104,WA,read,\n"),
        );
        let mut seen = HashSet::new();
        for class in Classification::ALL {
            for o in r.with_classification(class) {
                assert!(seen.insert((o.recipient_key.clone(), o.channel)));
            }
        }
        assert_eq!(seen.len(), 4);
        assert_eq!(r.summary.counts.total(), 4);
        assert_eq!(
            (r.summary.counts.pending, r.summary.counts.no_callback),
            (1, 1)
        );
    }

    #[test]
    fn test_digests_carried_into_summary() {
        let s = sends("2025-09-01T18:00:00Z,+12145550101,SMS,sms,live,sent,SM1\n");
        let t = statuses("");
        let r = engine(0).reconcile(&s, &t);
        assert_eq!(r.summary.send_log_digest, s.digest);
        assert_eq!(r.summary.status_log_digest, t.digest);
    }
}
