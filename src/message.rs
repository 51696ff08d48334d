//! Message body rendering.
//!
//! Bodies reference contact columns with `{{column}}` (WhatsApp template
//! style) or `{column}`. `name` is always available; any other column of
//! the contact list can be used too. Unknown placeholders are left in place
//! so a typo shows up in a dry run instead of silently vanishing.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::channels::ChannelMode;

static RE_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}|\{([A-Za-z0-9_]+)\}").expect("valid placeholder regex")
});

/// Default WhatsApp body. Must match the approved template wording exactly
/// when used with `WA_TEMPLATE`.
pub const DEFAULT_WA_BODY: &str = "Hola {{name}} 👋 Te invito a apoyar nuestra recaudación de fondos. \
     ¿Te puedo enviar el enlace?";

/// Default SMS body.
pub const DEFAULT_SMS_BODY: &str =
    "Hi {name}, we're raising funds for our band program. Can I send you the link? Reply STOP to opt out.";

/// Message bodies for each channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageTemplates {
    pub whatsapp: String,
    pub sms: String,
}

impl Default for MessageTemplates {
    fn default() -> Self {
        Self {
            whatsapp: DEFAULT_WA_BODY.to_string(),
            sms: DEFAULT_SMS_BODY.to_string(),
        }
    }
}

impl MessageTemplates {
    pub fn body_for(&self, mode: ChannelMode) -> &str {
        match mode {
            ChannelMode::WaText | ChannelMode::WaTemplate => &self.whatsapp,
            ChannelMode::Sms => &self.sms,
        }
    }

    /// Render the body for `mode` with the recipient's variables.
    pub fn render(&self, mode: ChannelMode, vars: &BTreeMap<String, String>) -> String {
        render(self.body_for(mode), vars)
    }
}

/// Substitute placeholders in `template` from `vars`.
pub fn render(template: &str, vars: &BTreeMap<String, String>) -> String {
    RE_PLACEHOLDER
        .replace_all(template, |caps: &Captures<'_>| {
            let key = caps
                .get(1)
                .or_else(|| caps.get(2))
                .map(|m| m.as_str())
                .unwrap_or_default();
            match vars.get(key) {
                Some(value) => value.clone(),
                None => {
                    tracing::warn!(placeholder = key, "Template placeholder has no value");
                    caps[0].to_string()
                }
            }
        })
        .into_owned()
}
