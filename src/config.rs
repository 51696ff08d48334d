//! Runtime configuration.
//!
//! Everything comes from `OUTREACH_*` environment variables (a `.env` file
//! is loaded by `main` first). CLI flags override individual values after
//! loading.

use std::env::VarError;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;

use crate::channels::{Channel, HttpRelayConfig};
use crate::error::ConfigError;
use crate::logs::{SEND_LOG_FILE, STATUS_LOG_FILE};
use crate::message::MessageTemplates;

const DEFAULT_DELAY_SECS: f64 = 0.7;
const DEFAULT_PENDING_WINDOW_SECS: u64 = 24 * 60 * 60;
const DEFAULT_FALLBACK_NAME: &str = "friend";
const RELAY_TIMEOUT: Duration = Duration::from_secs(30);

/// Resolved configuration for one invocation.
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding `send_log.csv` and `status_log.csv`.
    pub data_dir: PathBuf,

    /// Relay endpoint and credentials. Only needed for live sends.
    pub relay_url: Option<String>,
    pub account_id: Option<String>,
    pub auth_token: Option<SecretString>,

    /// Sender addresses per channel.
    pub sms_from: Option<String>,
    pub whatsapp_from: Option<String>,

    /// Pause between consecutive live transport calls.
    pub delay: Duration,
    /// Transport-level retries per recipient.
    pub send_retries: u32,
    /// Age below which an unconfirmed send is still pending.
    pub pending_window: Duration,
    /// Greeting used when a contact has no usable first name.
    pub fallback_name: String,
    pub templates: MessageTemplates,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Load configuration from a custom variable reader.
    ///
    /// Tests use this to supply variables without touching the process
    /// environment.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let optional = |key: &str| -> Option<String> {
            reader(key)
                .ok()
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        let data_dir = optional("OUTREACH_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let delay = match optional("OUTREACH_DELAY_SECS") {
            Some(raw) => parse_secs("OUTREACH_DELAY_SECS", &raw)?,
            None => Duration::from_secs_f64(DEFAULT_DELAY_SECS),
        };

        let send_retries = match optional("OUTREACH_SEND_RETRIES") {
            Some(raw) => raw.parse::<u32>().map_err(|e| ConfigError::InvalidValue {
                key: "OUTREACH_SEND_RETRIES".to_string(),
                message: e.to_string(),
            })?,
            None => 0,
        };

        let pending_window = match optional("OUTREACH_PENDING_WINDOW_SECS") {
            Some(raw) => parse_secs("OUTREACH_PENDING_WINDOW_SECS", &raw)?,
            None => Duration::from_secs(DEFAULT_PENDING_WINDOW_SECS),
        };

        let mut templates = MessageTemplates::default();
        if let Some(body) = optional("OUTREACH_WA_BODY") {
            templates.whatsapp = body;
        }
        if let Some(body) = optional("OUTREACH_SMS_BODY") {
            templates.sms = body;
        }

        Ok(Self {
            data_dir,
            relay_url: optional("OUTREACH_RELAY_URL"),
            account_id: optional("OUTREACH_ACCOUNT_ID"),
            auth_token: optional("OUTREACH_AUTH_TOKEN").map(SecretString::from),
            sms_from: optional("OUTREACH_SMS_FROM"),
            whatsapp_from: optional("OUTREACH_WHATSAPP_FROM"),
            delay,
            send_retries,
            pending_window,
            fallback_name: optional("OUTREACH_FALLBACK_NAME")
                .unwrap_or_else(|| DEFAULT_FALLBACK_NAME.to_string()),
            templates,
        })
    }

    pub fn send_log_path(&self) -> PathBuf {
        self.data_dir.join(SEND_LOG_FILE)
    }

    pub fn status_log_path(&self) -> PathBuf {
        self.data_dir.join(STATUS_LOG_FILE)
    }

    /// Relay settings for a live batch. Fails when any credential is unset.
    pub fn relay_config(&self) -> Result<HttpRelayConfig, ConfigError> {
        let endpoint = self.relay_url.clone().ok_or_else(|| {
            missing(
                "OUTREACH_RELAY_URL",
                "Set it to the relay endpoint, or use --dry-run.",
            )
        })?;
        let account_id = self.account_id.clone().ok_or_else(|| {
            missing(
                "OUTREACH_ACCOUNT_ID",
                "Live sends need relay credentials, or use --dry-run.",
            )
        })?;
        let auth_token = self.auth_token.clone().ok_or_else(|| {
            missing(
                "OUTREACH_AUTH_TOKEN",
                "Live sends need relay credentials, or use --dry-run.",
            )
        })?;

        Ok(HttpRelayConfig {
            endpoint,
            account_id,
            auth_token,
            timeout: RELAY_TIMEOUT,
        })
    }

    /// Sender address for `channel`, in the form the relay expects.
    pub fn from_address(&self, channel: Channel) -> Result<String, ConfigError> {
        match channel {
            Channel::Sms => self.sms_from.clone().ok_or_else(|| {
                missing("OUTREACH_SMS_FROM", "Set the SMS sender number (E.164).")
            }),
            Channel::WhatsApp => self
                .whatsapp_from
                .as_deref()
                .map(|from| channel.address(from))
                .ok_or_else(|| {
                    missing(
                        "OUTREACH_WHATSAPP_FROM",
                        "Set the WhatsApp sender number (E.164).",
                    )
                }),
        }
    }
}

fn missing(key: &str, hint: &str) -> ConfigError {
    ConfigError::MissingRequired {
        key: key.to_string(),
        hint: hint.to_string(),
    }
}

/// Parse a non-negative number of seconds, fractions allowed.
pub fn parse_secs(key: &str, raw: &str) -> Result<Duration, ConfigError> {
    let invalid = |message: String| ConfigError::InvalidValue {
        key: key.to_string(),
        message,
    };
    let secs = raw
        .trim()
        .parse::<f64>()
        .map_err(|e| invalid(format!("'{}': {}", raw, e)))?;
    Duration::try_from_secs_f64(secs)
        .map_err(|_| invalid(format!("'{}' is not a non-negative number of seconds", raw)))
}

/// Default data directory (`~/.outreach`).
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".outreach")
}

/// Render a path with the home directory abbreviated to `~`.
pub fn display_path(path: &Path) -> String {
    if let Some(home) = dirs::home_dir()
        && let Ok(rest) = path.strip_prefix(&home)
    {
        return format!("~/{}", rest.display());
    }
    path.display().to_string()
}
