//! Outbound messaging channels.
//!
//! A campaign batch targets one [`ChannelMode`], which fixes the
//! [`Channel`] recipients are reached on and the template used to render
//! the message. The transport seam lives in [`transport`]; the HTTP relay
//! implementation and the retry wrapper sit beside it.
//!
//! ```text
//! ChannelMode::WaTemplate ──► Channel::WhatsApp + "wa_template"
//! ChannelMode::WaText     ──► Channel::WhatsApp + "wa_text"
//! ChannelMode::Sms        ──► Channel::Sms      + "sms"
//! ```

pub mod delivery_retry;
mod relay;
pub mod transport;

pub use delivery_retry::{RetryConfig, RetryingTransport};
pub use relay::{HttpRelayConfig, HttpRelayTransport};
pub use transport::{DeliveryReceipt, MessageTransport, OutboundMessage};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// Messaging medium a recipient is reached on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Channel {
    #[serde(rename = "WA")]
    WhatsApp,
    #[serde(rename = "SMS")]
    Sms,
}

impl Channel {
    /// Canonical log spelling.
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::WhatsApp => "WA",
            Channel::Sms => "SMS",
        }
    }

    /// Spelling used in contact lists (`Channel` column).
    pub fn list_label(&self) -> &'static str {
        match self {
            Channel::WhatsApp => "WhatsApp",
            Channel::Sms => "SMS",
        }
    }

    /// Provider address for a phone number on this channel.
    pub fn address(&self, phone: &str) -> String {
        match self {
            Channel::WhatsApp if !phone.starts_with("whatsapp:") => format!("whatsapp:{}", phone),
            _ => phone.to_string(),
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Channel {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "wa" | "whatsapp" => Ok(Channel::WhatsApp),
            "sms" => Ok(Channel::Sms),
            _ => Err(InputError::UnknownChannel(s.to_string())),
        }
    }
}

/// How a batch uses its channel. Selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelMode {
    /// Free-form WhatsApp text. Only accepted by the provider inside an open
    /// 24h customer-service window.
    WaText,
    /// Approved WhatsApp template body. Required for first contact.
    WaTemplate,
    Sms,
}

impl ChannelMode {
    pub fn channel(&self) -> Channel {
        match self {
            ChannelMode::WaText | ChannelMode::WaTemplate => Channel::WhatsApp,
            ChannelMode::Sms => Channel::Sms,
        }
    }

    /// Identifier written to the send log's `template_id` column.
    pub fn template_id(&self) -> &'static str {
        match self {
            ChannelMode::WaText => "wa_text",
            ChannelMode::WaTemplate => "wa_template",
            ChannelMode::Sms => "sms",
        }
    }
}

impl fmt::Display for ChannelMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelMode::WaText => "WA",
            ChannelMode::WaTemplate => "WA_TEMPLATE",
            ChannelMode::Sms => "SMS",
        };
        f.write_str(s)
    }
}

impl FromStr for ChannelMode {
    type Err = InputError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WA" => Ok(ChannelMode::WaText),
            "WA_TEMPLATE" => Ok(ChannelMode::WaTemplate),
            "SMS" => Ok(ChannelMode::Sms),
            _ => Err(InputError::UnknownMode(s.to_string())),
        }
    }
}
