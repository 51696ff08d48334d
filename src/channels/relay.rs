//! HTTP relay transport.
//!
//! Posts each rendered message as JSON to a relay endpoint that owns the
//! provider integration (WhatsApp Business / SMS gateway). The relay
//! authenticates us with basic auth and answers with the provider message
//! id on success.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;

use crate::channels::transport::{DeliveryReceipt, MessageTransport, OutboundMessage};
use crate::error::SendError;

const TRANSPORT_NAME: &str = "relay";

/// Connection settings for the relay.
#[derive(Debug, Clone)]
pub struct HttpRelayConfig {
    /// Full URL messages are POSTed to.
    pub endpoint: String,
    pub account_id: String,
    pub auth_token: SecretString,
    pub timeout: Duration,
}

/// Body the relay answers with. Both spellings of the id are accepted.
#[derive(Debug, Deserialize)]
struct RelayResponse {
    #[serde(default)]
    sid: Option<String>,
    #[serde(default)]
    message_id: Option<String>,
}

/// [`MessageTransport`] backed by an HTTP relay.
pub struct HttpRelayTransport {
    client: Client,
    config: HttpRelayConfig,
}

impl HttpRelayTransport {
    pub fn new(config: HttpRelayConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client, config }
    }
}

#[async_trait]
impl MessageTransport for HttpRelayTransport {
    fn name(&self) -> &str {
        TRANSPORT_NAME
    }

    async fn send(&self, message: &OutboundMessage) -> Result<DeliveryReceipt, SendError> {
        tracing::debug!(
            to = %message.to,
            template = %message.template_id,
            "Posting message to relay"
        );

        let response = self
            .client
            .post(&self.config.endpoint)
            .basic_auth(
                &self.config.account_id,
                Some(self.config.auth_token.expose_secret()),
            )
            .json(message)
            .send()
            .await
            .map_err(|e| SendError::RequestFailed {
                transport: TRANSPORT_NAME.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<u64>().ok())
            .map(Duration::from_secs);
        let text = response.text().await.unwrap_or_default();

        if !status.is_success() {
            return Err(match status.as_u16() {
                401 | 403 => SendError::AuthFailed {
                    transport: TRANSPORT_NAME.to_string(),
                },
                429 => SendError::RateLimited {
                    transport: TRANSPORT_NAME.to_string(),
                    retry_after,
                },
                _ => SendError::RequestFailed {
                    transport: TRANSPORT_NAME.to_string(),
                    reason: format!("HTTP {}: {}", status, text),
                },
            });
        }

        if text.trim().is_empty() {
            return Ok(DeliveryReceipt::default());
        }

        let parsed: RelayResponse =
            serde_json::from_str(&text).map_err(|e| SendError::InvalidResponse {
                transport: TRANSPORT_NAME.to_string(),
                reason: format!("JSON parse error: {}. Raw: {}", e, text),
            })?;

        Ok(DeliveryReceipt {
            message_id: parsed.sid.or(parsed.message_id),
        })
    }
}
