//! Batch sending.
//!
//! A batch walks a contact list in source order from `start_from`, renders
//! each recipient's message and hands it to the transport (or simulates it
//! in a dry run). Every keyed recipient gets exactly one send log row,
//! synced to disk before the next recipient is touched, so a batch killed
//! at any point can be resumed from the row after the last logged one.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::channels::{ChannelMode, MessageTransport, OutboundMessage};
use crate::contacts::{ContactList, ContactRecord};
use crate::error::{ConfigError, Error};
use crate::logs::{LogWriter, SendAttempt, SendMode, SendResult};
use crate::message::MessageTemplates;

const DETAIL_SIMULATED: &str = "simulated";
const DETAIL_CHANNEL_MISMATCH: &str = "channel mismatch";
const DETAIL_OPTED_OUT: &str = "opted out";

/// Parameters of one batch.
#[derive(Debug, Clone)]
pub struct BatchRequest {
    pub mode: ChannelMode,
    /// 0-based contact index to start at.
    pub start_from: usize,
    /// Maximum contacts to process; `None` runs to the end of the source.
    pub limit: Option<usize>,
    /// Pause between consecutive live transport calls.
    pub delay: Duration,
    pub dry_run: bool,
}

impl BatchRequest {
    pub fn new(mode: ChannelMode) -> Self {
        Self {
            mode,
            start_from: 0,
            limit: None,
            delay: Duration::ZERO,
            dry_run: false,
        }
    }
}

/// Counters for a finished batch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    /// Contacts in the source.
    pub total: usize,
    /// First index processed.
    pub start: usize,
    /// One past the last index processed.
    pub end: usize,
    pub processed: usize,
    pub sent: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Rows without a usable phone; these are not logged.
    pub skipped_unkeyed: usize,
    pub dry_run: bool,
}

impl BatchResult {
    /// Index to pass as `start_from` to continue where this batch stopped.
    pub fn next_start_from(&self) -> usize {
        self.end
    }

    /// Whether the batch reached the end of the source.
    pub fn is_complete(&self) -> bool {
        self.end >= self.total
    }
}

/// Live transport plus the sender address to use with it.
struct LiveRoute {
    transport: Arc<dyn MessageTransport>,
    from: String,
}

/// Sends campaign batches.
pub struct BatchSender {
    templates: MessageTemplates,
    live: Option<LiveRoute>,
}

impl BatchSender {
    /// A sender that can only run dry batches.
    pub fn new(templates: MessageTemplates) -> Self {
        Self {
            templates,
            live: None,
        }
    }

    /// Attach the transport and sender address used for live batches.
    pub fn with_transport(mut self, transport: Arc<dyn MessageTransport>, from: String) -> Self {
        self.live = Some(LiveRoute { transport, from });
        self
    }

    /// Run one batch, appending a row per keyed contact to `log`.
    ///
    /// Transport failures are recorded and the batch carries on. Only a
    /// missing transport for a live batch or a log write failure abort it.
    pub async fn run(
        &self,
        contacts: &ContactList,
        request: &BatchRequest,
        log: &mut LogWriter<SendAttempt>,
    ) -> Result<BatchResult, Error> {
        let live = match (&self.live, request.dry_run) {
            (_, true) => None,
            (Some(route), false) => Some(route),
            (None, false) => {
                return Err(ConfigError::MissingRequired {
                    key: "transport".to_string(),
                    hint: "Live sends need relay credentials, or use --dry-run.".to_string(),
                }
                .into());
            }
        };

        let total = contacts.len();
        let mut result = BatchResult {
            total,
            start: request.start_from,
            end: request.start_from,
            dry_run: request.dry_run,
            ..Default::default()
        };

        if request.start_from >= total {
            tracing::warn!(
                start_from = request.start_from,
                total,
                "start_from is past the end of the contact source, nothing to send"
            );
            return Ok(result);
        }

        let end = match request.limit {
            Some(limit) => request.start_from.saturating_add(limit).min(total),
            None => total,
        };

        tracing::info!(
            mode = %request.mode,
            start = request.start_from,
            end,
            total,
            dry_run = request.dry_run,
            "Starting batch"
        );

        let mut made_live_call = false;
        for contact in &contacts.records()[request.start_from..end] {
            result.processed += 1;
            result.end = contact.index + 1;

            let Some(key) = contact.key.as_deref() else {
                tracing::warn!(index = contact.index, name = contact.name(), "Contact has no usable phone, skipping");
                result.skipped_unkeyed += 1;
                continue;
            };

            let attempt = match self.skip_reason(contact, request.mode) {
                Some(reason) => {
                    tracing::info!(index = contact.index, recipient = key, reason, "Skipping contact");
                    self.attempt(key, request, SendResult::Skipped, reason.to_string())
                }
                None => {
                    let body = self.templates.render(request.mode, &contact.template_vars);
                    match live {
                        None => {
                            tracing::info!(index = contact.index, recipient = key, body = %body, "Dry run");
                            self.attempt(key, request, SendResult::Sent, DETAIL_SIMULATED.to_string())
                        }
                        Some(route) => {
                            if made_live_call && !request.delay.is_zero() {
                                tokio::time::sleep(request.delay).await;
                            }
                            made_live_call = true;
                            self.deliver(route, contact, key, body, request).await
                        }
                    }
                }
            };

            match attempt.result {
                SendResult::Sent => result.sent += 1,
                SendResult::Failed => result.failed += 1,
                SendResult::Skipped => result.skipped += 1,
            }
            log.append(&attempt)?;
        }

        tracing::info!(
            processed = result.processed,
            sent = result.sent,
            failed = result.failed,
            skipped = result.skipped,
            skipped_unkeyed = result.skipped_unkeyed,
            next_start_from = result.next_start_from(),
            "Batch finished"
        );
        Ok(result)
    }

    fn skip_reason(&self, contact: &ContactRecord, mode: ChannelMode) -> Option<&'static str> {
        if contact.channel != mode.channel() {
            Some(DETAIL_CHANNEL_MISMATCH)
        } else if contact.opted_out {
            Some(DETAIL_OPTED_OUT)
        } else {
            None
        }
    }

    async fn deliver(
        &self,
        route: &LiveRoute,
        contact: &ContactRecord,
        key: &str,
        body: String,
        request: &BatchRequest,
    ) -> SendAttempt {
        let channel = request.mode.channel();
        let message = OutboundMessage {
            to: channel.address(key),
            from: route.from.clone(),
            channel,
            template_id: request.mode.template_id().to_string(),
            body,
        };

        match route.transport.send(&message).await {
            Ok(receipt) => {
                tracing::info!(
                    index = contact.index,
                    recipient = key,
                    channel = %channel,
                    message_id = receipt.message_id.as_deref().unwrap_or(""),
                    "Message sent"
                );
                self.attempt(key, request, SendResult::Sent, receipt.message_id.unwrap_or_default())
            }
            Err(e) => {
                tracing::warn!(
                    index = contact.index,
                    recipient = key,
                    channel = %channel,
                    error = %e,
                    "Send failed"
                );
                self.attempt(key, request, SendResult::Failed, e.to_string())
            }
        }
    }

    fn attempt(
        &self,
        key: &str,
        request: &BatchRequest,
        result: SendResult,
        detail: String,
    ) -> SendAttempt {
        SendAttempt {
            timestamp: Utc::now(),
            recipient_key: key.to_string(),
            channel: request.mode.channel(),
            template_id: request.mode.template_id().to_string(),
            mode: if request.dry_run {
                SendMode::DryRun
            } else {
                SendMode::Live
            },
            result,
            detail,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Instant;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::channels::{Channel, DeliveryReceipt};
    use crate::error::SendError;
    use crate::logs::LogSnapshot;

    /// Records every call; fails for recipients listed in `fail_for`.
    #[derive(Default)]
    struct RecordingTransport {
        calls: Mutex<Vec<(Instant, OutboundMessage)>>,
        fail_for: Vec<String>,
    }

    impl RecordingTransport {
        fn failing(keys: &[&str]) -> Self {
            Self {
                fail_for: keys.iter().map(|k| k.to_string()).collect(),
                ..Default::default()
            }
        }

        fn recipients(&self) -> Vec<String> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .map(|(_, m)| m.to.clone())
                .collect()
        }
    }

    #[async_trait]
    impl MessageTransport for RecordingTransport {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, SendError> {
            let n = {
                let mut calls = self.calls.lock().unwrap();
                calls.push((Instant::now(), message.clone()));
                calls.len()
            };
            if self.fail_for.iter().any(|k| message.to.ends_with(k.as_str())) {
                return Err(SendError::RequestFailed {
                    transport: "recording".to_string(),
                    reason: "HTTP 500: boom".to_string(),
                });
            }
            Ok(DeliveryReceipt {
                message_id: Some(format!("SM{}", n)),
            })
        }
    }

    fn contacts(csv: &str) -> ContactList {
        ContactList::from_reader(csv.as_bytes(), Channel::Sms, "friend").unwrap()
    }

    fn abc() -> ContactList {
        contacts(
            "Name,Phone_E164\n\
             Ana,+12145550101\n\
             Beto,+12145550102\n\
             Ceci,+12145550103\n",
        )
    }

    fn request(start_from: usize, limit: Option<usize>, dry_run: bool) -> BatchRequest {
        BatchRequest {
            start_from,
            limit,
            dry_run,
            ..BatchRequest::new(ChannelMode::Sms)
        }
    }

    fn live_sender(transport: Arc<RecordingTransport>) -> BatchSender {
        BatchSender::new(MessageTemplates::default())
            .with_transport(transport, "+12145550000".to_string())
    }

    fn logged(path: &Path) -> Vec<SendAttempt> {
        LogSnapshot::<SendAttempt>::read(path)
            .unwrap()
            .records
            .into_iter()
            .map(|p| p.record)
            .collect()
    }

    /// Comparable view of a log row without its timestamp.
    fn shape(a: &SendAttempt) -> (String, Channel, SendMode, SendResult, String) {
        (a.recipient_key.clone(), a.channel, a.mode, a.result, a.detail.clone())
    }

    #[tokio::test]
    async fn test_limit_stops_after_n_contacts() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("send_log.csv");
        let transport = Arc::new(RecordingTransport::default());
        let sender = live_sender(transport.clone());

        let mut log = LogWriter::open(&path).unwrap();
        let result = sender.run(&abc(), &request(0, Some(2), false), &mut log).await.unwrap();
        drop(log);

        assert_eq!(transport.recipients(), vec!["+12145550101", "+12145550102"]);
        assert_eq!(result.processed, 2);
        assert_eq!(result.sent, 2);
        assert_eq!(result.next_start_from(), 2);
        assert!(!result.is_complete());

        let rows = logged(&path);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].detail, "SM1");
        assert_eq!(rows[1].template_id, "sms");
    }

    #[tokio::test]
    async fn test_split_batches_match_single_batch() {
        let dir = tempfile::tempdir().unwrap();
        let source = contacts(
            "Name,Phone_E164,Channel,OptIn\n\
             Ana,+12145550101,SMS,yes\n\
             Beto,+12145550102,WA,yes\n\
             Ceci,+12145550103,SMS,no\n\
             Dora,,SMS,yes\n\
             Eli,+12145550105,SMS,yes\n",
        );

        let split_path = dir.path().join("split.csv");
        let split_transport = Arc::new(RecordingTransport::default());
        let sender = live_sender(split_transport.clone());
        let mut log = LogWriter::open(&split_path).unwrap();
        let first = sender.run(&source, &request(0, Some(2), false), &mut log).await.unwrap();
        let second = sender
            .run(&source, &request(first.next_start_from(), Some(3), false), &mut log)
            .await
            .unwrap();
        drop(log);
        assert!(second.is_complete());

        let whole_path = dir.path().join("whole.csv");
        let whole_transport = Arc::new(RecordingTransport::default());
        let sender = live_sender(whole_transport.clone());
        let mut log = LogWriter::open(&whole_path).unwrap();
        sender.run(&source, &request(0, Some(5), false), &mut log).await.unwrap();
        drop(log);

        let split: Vec<_> = logged(&split_path)
            .iter()
            .map(|a| (a.recipient_key.clone(), a.result))
            .collect();
        let whole: Vec<_> = logged(&whole_path)
            .iter()
            .map(|a| (a.recipient_key.clone(), a.result))
            .collect();
        assert_eq!(split, whole);
        assert_eq!(split_transport.recipients(), whole_transport.recipients());
    }

    #[tokio::test]
    async fn test_dry_run_never_calls_transport() {
        let dir = tempfile::tempdir().unwrap();
        let source = abc();

        let dry_path = dir.path().join("dry.csv");
        let transport = Arc::new(RecordingTransport::default());
        let sender = live_sender(transport.clone());
        let mut log = LogWriter::open(&dry_path).unwrap();
        let result = sender.run(&source, &request(0, None, true), &mut log).await.unwrap();
        drop(log);

        assert!(transport.recipients().is_empty());
        assert!(result.dry_run);
        assert_eq!(result.sent, 3);

        let dry_rows = logged(&dry_path);
        assert!(dry_rows.iter().all(|a| a.mode == SendMode::DryRun));
        assert!(dry_rows.iter().all(|a| a.detail == "simulated"));

        let live_path = dir.path().join("live.csv");
        let mut log = LogWriter::open(&live_path).unwrap();
        sender.run(&source, &request(0, None, false), &mut log).await.unwrap();
        drop(log);

        let dry_keys: Vec<_> = dry_rows.iter().map(|a| a.recipient_key.clone()).collect();
        let live_keys: Vec<_> = logged(&live_path).iter().map(|a| a.recipient_key.clone()).collect();
        assert_eq!(dry_keys, live_keys);
    }

    #[tokio::test]
    async fn test_dry_run_needs_no_transport() {
        let dir = tempfile::tempdir().unwrap();
        let sender = BatchSender::new(MessageTemplates::default());
        let mut log = LogWriter::open(dir.path().join("send_log.csv")).unwrap();
        let result = sender.run(&abc(), &request(0, None, true), &mut log).await.unwrap();
        assert_eq!(result.sent, 3);
    }

    #[tokio::test]
    async fn test_live_run_without_transport_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("send_log.csv");
        let sender = BatchSender::new(MessageTemplates::default());
        let mut log = LogWriter::open(&path).unwrap();

        let err = sender.run(&abc(), &request(0, None, false), &mut log).await.unwrap_err();
        assert!(matches!(err, Error::Config(ConfigError::MissingRequired { .. })));
        drop(log);
        assert!(logged(&path).is_empty());
    }

    #[tokio::test]
    async fn test_failure_is_logged_and_batch_continues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("send_log.csv");
        let transport = Arc::new(RecordingTransport::failing(&["+12145550102"]));
        let sender = live_sender(transport.clone());

        let mut log = LogWriter::open(&path).unwrap();
        let result = sender.run(&abc(), &request(0, None, false), &mut log).await.unwrap();
        drop(log);

        assert_eq!(transport.recipients().len(), 3);
        assert_eq!((result.sent, result.failed), (2, 1));
        let rows = logged(&path);
        assert_eq!(rows[1].result, SendResult::Failed);
        assert!(rows[1].detail.contains("HTTP 500"));
        assert_eq!(rows[2].result, SendResult::Sent);
    }

    #[tokio::test]
    async fn test_skips_are_logged_but_unkeyed_rows_are_not() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("send_log.csv");
        let source = contacts(
            "Name,Phone_E164,Channel,OptIn\n\
             Ana,+12145550101,SMS,yes\n\
             Beto,+12145550102,WA,yes\n\
             Ceci,+12145550103,SMS,STOP\n\
             Dora,n/a,SMS,yes\n",
        );
        let transport = Arc::new(RecordingTransport::default());
        let sender = live_sender(transport.clone());

        let mut log = LogWriter::open(&path).unwrap();
        let result = sender.run(&source, &request(0, None, false), &mut log).await.unwrap();
        drop(log);

        assert_eq!(transport.recipients(), vec!["+12145550101"]);
        assert_eq!(
            (result.processed, result.sent, result.skipped, result.skipped_unkeyed),
            (4, 1, 2, 1)
        );
        let rows: Vec<_> = logged(&path).iter().map(shape).collect();
        assert_eq!(
            rows[1..],
            [
                (
                    "+12145550102".to_string(),
                    Channel::Sms,
                    SendMode::Live,
                    SendResult::Skipped,
                    "channel mismatch".to_string()
                ),
                (
                    "+12145550103".to_string(),
                    Channel::Sms,
                    SendMode::Live,
                    SendResult::Skipped,
                    "opted out".to_string()
                ),
            ]
        );
    }

    #[tokio::test]
    async fn test_delay_between_live_calls_only() {
        let dir = tempfile::tempdir().unwrap();
        let source = contacts(
            "Name,Phone_E164,OptIn\n\
             Ana,+12145550101,yes\n\
             Beto,+12145550102,no\n\
             Ceci,+12145550103,yes\n",
        );
        let transport = Arc::new(RecordingTransport::failing(&["+12145550101"]));
        let sender = live_sender(transport.clone());
        let delay = Duration::from_millis(40);

        let started = Instant::now();
        let mut log = LogWriter::open(dir.path().join("send_log.csv")).unwrap();
        sender
            .run(&source, &BatchRequest { delay, ..request(0, None, false) }, &mut log)
            .await
            .unwrap();

        let calls = transport.calls.lock().unwrap();
        assert_eq!(calls.len(), 2);
        // No pause before the first call, one pause before the second even
        // though the first failed.
        assert!(calls[0].0.duration_since(started) < delay);
        assert!(calls[1].0.duration_since(calls[0].0) >= delay);
    }

    #[tokio::test]
    async fn test_dry_run_does_not_sleep() {
        let dir = tempfile::tempdir().unwrap();
        let sender = BatchSender::new(MessageTemplates::default());
        let started = Instant::now();
        let mut log = LogWriter::open(dir.path().join("send_log.csv")).unwrap();
        sender
            .run(
                &abc(),
                &BatchRequest {
                    delay: Duration::from_secs(5),
                    ..request(0, None, true)
                },
                &mut log,
            )
            .await
            .unwrap();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_start_past_end_is_a_zero_batch() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("send_log.csv");
        let transport = Arc::new(RecordingTransport::default());
        let sender = live_sender(transport.clone());

        let mut log = LogWriter::open(&path).unwrap();
        let result = sender.run(&abc(), &request(7, None, false), &mut log).await.unwrap();
        drop(log);

        assert_eq!(result.processed, 0);
        assert_eq!(result.next_start_from(), 7);
        assert!(transport.recipients().is_empty());
        assert!(logged(&path).is_empty());
    }

    #[tokio::test]
    async fn test_whatsapp_message_shape() {
        let dir = tempfile::tempdir().unwrap();
        let source = ContactList::from_reader(
            "Name,Phone_E164,GreetingName\nAna Ruiz,+525512345678,Ana\n".as_bytes(),
            Channel::WhatsApp,
            "amigo",
        )
        .unwrap();
        let transport = Arc::new(RecordingTransport::default());
        let sender = BatchSender::new(MessageTemplates {
            whatsapp: "Hola {{name}}".to_string(),
            sms: String::new(),
        })
        .with_transport(transport.clone(), "whatsapp:+12145550000".to_string());

        let mut log = LogWriter::open(dir.path().join("send_log.csv")).unwrap();
        sender
            .run(&source, &BatchRequest::new(ChannelMode::WaTemplate), &mut log)
            .await
            .unwrap();

        let calls = transport.calls.lock().unwrap();
        let message = &calls[0].1;
        assert_eq!(message.to, "whatsapp:+525512345678");
        assert_eq!(message.from, "whatsapp:+12145550000");
        assert_eq!(message.template_id, "wa_template");
        assert_eq!(message.body, "Hola Ana");
    }
}
