//! Per-send retry with exponential backoff.
//!
//! Wraps a [`MessageTransport`] so a transient failure on one recipient is
//! retried before the batch records it as `failed`. The batch still writes
//! one send-log row per recipient; retries are invisible to the log except
//! through the final outcome.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::channels::transport::{DeliveryReceipt, MessageTransport, OutboundMessage};
use crate::error::SendError;

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of retries after the first attempt.
    pub max_retries: u32,
    /// Base delay for exponential backoff (milliseconds).
    pub base_delay_ms: u64,
    /// Maximum delay cap (milliseconds).
    pub max_delay_ms: u64,
    /// Jitter factor (0.0 to 1.0) - randomness added to delay.
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            base_delay_ms: 500,
            max_delay_ms: 30_000,
            jitter_factor: 0.25,
        }
    }
}

impl RetryConfig {
    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            ..Self::default()
        }
    }

    /// Calculate delay before retry number `attempt` (0-based) with jitter.
    ///
    /// Uses exponential backoff: `base_delay * 2^attempt`, capped at `max_delay`,
    /// with additive jitter of up to `jitter_factor * computed_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp_delay_ms = self
            .base_delay_ms
            .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
        let capped_delay_ms = exp_delay_ms.min(self.max_delay_ms);

        let jitter_range = (capped_delay_ms as f64 * self.jitter_factor) as u64;
        let jitter = if jitter_range > 0 {
            let seed = std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .subsec_nanos() as u64;
            seed % (jitter_range + 1)
        } else {
            0
        };

        Duration::from_millis(capped_delay_ms.saturating_add(jitter))
    }
}

/// Whether another attempt could plausibly succeed.
///
/// Credential rejections and unparseable answers are final: the provider
/// either refused us or may already have accepted the message.
fn is_retryable(err: &SendError) -> bool {
    matches!(
        err,
        SendError::RequestFailed { .. } | SendError::RateLimited { .. }
    )
}

/// [`MessageTransport`] decorator that retries transient failures.
pub struct RetryingTransport {
    inner: Arc<dyn MessageTransport>,
    config: RetryConfig,
}

impl RetryingTransport {
    pub fn new(inner: Arc<dyn MessageTransport>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl MessageTransport for RetryingTransport {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, SendError> {
        let mut last_error = match self.inner.send(message).await {
            Ok(receipt) => return Ok(receipt),
            Err(e) => e,
        };

        for attempt in 0..self.config.max_retries {
            if !is_retryable(&last_error) {
                break;
            }

            // Honour the provider's own back-off hint when it is longer.
            let mut delay = self.config.delay_for(attempt);
            if let SendError::RateLimited {
                retry_after: Some(hint),
                ..
            } = &last_error
            {
                delay = delay.max(*hint);
            }

            tracing::debug!(
                to = %message.to,
                attempt = attempt + 2,
                delay_ms = delay.as_millis() as u64,
                error = %last_error,
                "Send failed, retrying"
            );
            tokio::time::sleep(delay).await;

            match self.inner.send(message).await {
                Ok(receipt) => {
                    tracing::debug!(to = %message.to, attempts = attempt + 2, "Send succeeded after retry");
                    return Ok(receipt);
                }
                Err(e) => last_error = e,
            }
        }

        Err(last_error)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::channels::Channel;

    /// Fails the first `fail_times` calls with the given error factory.
    struct Flaky {
        calls: AtomicU32,
        fail_times: u32,
        error: fn() -> SendError,
    }

    #[async_trait]
    impl MessageTransport for Flaky {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn send(&self, _message: &OutboundMessage) -> Result<DeliveryReceipt, SendError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err((self.error)())
            } else {
                Ok(DeliveryReceipt {
                    message_id: Some(format!("SM{}", n)),
                })
            }
        }
    }

    fn transient() -> SendError {
        SendError::RequestFailed {
            transport: "flaky".to_string(),
            reason: "connection reset".to_string(),
        }
    }

    fn auth() -> SendError {
        SendError::AuthFailed {
            transport: "flaky".to_string(),
        }
    }

    fn fast(max_retries: u32) -> RetryConfig {
        RetryConfig {
            max_retries,
            base_delay_ms: 1,
            max_delay_ms: 5,
            jitter_factor: 0.0,
        }
    }

    fn message() -> OutboundMessage {
        OutboundMessage {
            to: "+12145550123".to_string(),
            from: "+12145550100".to_string(),
            channel: Channel::Sms,
            template_id: "sms".to_string(),
            body: "hi".to_string(),
        }
    }

    fn flaky(fail_times: u32, error: fn() -> SendError) -> Arc<Flaky> {
        Arc::new(Flaky {
            calls: AtomicU32::new(0),
            fail_times,
            error,
        })
    }

    // ── Backoff arithmetic ──

    #[test]
    fn test_delay_grows_exponentially_without_jitter() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay_ms: 100,
            max_delay_ms: 10_000,
            jitter_factor: 0.0,
        };
        assert_eq!(config.delay_for(0), Duration::from_millis(100));
        assert_eq!(config.delay_for(1), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(800));
    }

    #[test]
    fn test_delay_is_capped() {
        let config = RetryConfig {
            max_retries: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 2_500,
            jitter_factor: 0.0,
        };
        assert_eq!(config.delay_for(10), Duration::from_millis(2_500));
        assert_eq!(config.delay_for(200), Duration::from_millis(2_500));
    }

    #[test]
    fn test_jitter_stays_within_factor() {
        let config = RetryConfig {
            max_retries: 1,
            base_delay_ms: 1_000,
            max_delay_ms: 1_000,
            jitter_factor: 0.5,
        };
        let d = config.delay_for(0);
        assert!(d >= Duration::from_millis(1_000));
        assert!(d <= Duration::from_millis(1_500));
    }

    // ── Retry behaviour ──

    #[tokio::test]
    async fn test_default_config_does_not_retry() {
        let inner = flaky(1, transient);
        let transport = RetryingTransport::new(inner.clone(), RetryConfig::default());
        assert!(transport.send(&message()).await.is_err());
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_transient_failure_then_success() {
        let inner = flaky(2, transient);
        let transport = RetryingTransport::new(inner.clone(), fast(3));
        let receipt = transport.send(&message()).await.unwrap();
        assert_eq!(receipt.message_id.as_deref(), Some("SM2"));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted_returns_last_error() {
        let inner = flaky(10, transient);
        let transport = RetryingTransport::new(inner.clone(), fast(2));
        let err = transport.send(&message()).await.unwrap_err();
        assert!(matches!(err, SendError::RequestFailed { .. }));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_auth_failure_is_not_retried() {
        let inner = flaky(10, auth);
        let transport = RetryingTransport::new(inner.clone(), fast(5));
        let err = transport.send(&message()).await.unwrap_err();
        assert!(matches!(err, SendError::AuthFailed { .. }));
        assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_name_is_delegated() {
        let transport = RetryingTransport::new(flaky(0, transient), fast(1));
        assert_eq!(transport.name(), "flaky");
    }
}
