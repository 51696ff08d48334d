//! Contact list loading.
//!
//! A contact source is a CSV file with a header row. The columns the
//! campaign understands are `Name`, `Phone_E164` (or `Phone`), `Channel`,
//! `OptIn`, `FirstName` and `GreetingName`; every column, known or not, is
//! exposed to message templates.

use std::collections::{BTreeMap, HashMap};
use std::io::Read;
use std::path::Path;

use crate::channels::Channel;
use crate::contacts::phone;
use crate::error::InputError;

const UTF8_BOM: &[u8] = &[0xEF, 0xBB, 0xBF];

const PHONE_COLUMNS: [&str; 2] = ["Phone_E164", "Phone"];
const NAME_COLUMNS: [&str; 3] = ["GreetingName", "FirstName", "Name"];

/// One recipient row from a contact source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRecord {
    /// 0-based data row position, stable across runs over the same file.
    pub index: usize,
    /// Normalised phone number. `None` when the row has no usable phone.
    pub key: Option<String>,
    pub channel: Channel,
    /// The row explicitly declined contact (`OptIn` = no/false/0/stop).
    pub opted_out: bool,
    /// Every column of the row plus the resolved `name`.
    pub template_vars: BTreeMap<String, String>,
}

impl ContactRecord {
    /// The name used to greet this recipient.
    pub fn name(&self) -> &str {
        self.template_vars
            .get("name")
            .map(String::as_str)
            .unwrap_or_default()
    }
}

/// An ordered, validated contact source.
#[derive(Debug, Clone, Default)]
pub struct ContactList {
    records: Vec<ContactRecord>,
}

impl ContactList {
    /// Load a contact source from disk.
    ///
    /// `default_channel` applies to rows without a `Channel` column value;
    /// `fallback_name` fills `name` when the row carries no usable name.
    pub fn from_path(
        path: &Path,
        default_channel: Channel,
        fallback_name: &str,
    ) -> Result<Self, InputError> {
        let data = std::fs::read(path).map_err(|e| InputError::Unreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        Self::from_bytes(&data, default_channel, fallback_name)
    }

    /// Load a contact source from any reader.
    pub fn from_reader<R: Read>(
        mut reader: R,
        default_channel: Channel,
        fallback_name: &str,
    ) -> Result<Self, InputError> {
        let mut data = Vec::new();
        reader
            .read_to_end(&mut data)
            .map_err(|e| InputError::Unreadable {
                path: "<reader>".into(),
                reason: e.to_string(),
            })?;
        Self::from_bytes(&data, default_channel, fallback_name)
    }

    fn from_bytes(
        data: &[u8],
        default_channel: Channel,
        fallback_name: &str,
    ) -> Result<Self, InputError> {
        let data = data.strip_prefix(UTF8_BOM).unwrap_or(data);
        if data.iter().all(u8::is_ascii_whitespace) {
            return Err(InputError::Empty);
        }

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(data);

        let headers: Vec<String> = reader
            .headers()
            .map_err(|e| InputError::MalformedRow {
                index: 0,
                reason: format!("Failed to read CSV headers: {}", e),
            })?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        if !PHONE_COLUMNS.iter().any(|c| headers.iter().any(|h| h == c)) {
            return Err(InputError::MissingPhoneColumn);
        }

        let mut records = Vec::new();
        let mut seen: HashMap<(String, Channel), usize> = HashMap::new();

        for (index, result) in reader.records().enumerate() {
            let row = result.map_err(|e| InputError::MalformedRow {
                index,
                reason: e.to_string(),
            })?;

            let mut vars: BTreeMap<String, String> = headers
                .iter()
                .zip(row.iter())
                .filter(|(h, _)| !h.is_empty())
                .map(|(h, v)| (h.clone(), v.trim().to_string()))
                .collect();

            let channel = match vars.get("Channel").filter(|v| !v.is_empty()) {
                Some(raw) => raw.parse::<Channel>().map_err(|_| InputError::MalformedRow {
                    index,
                    reason: format!("unknown channel '{}'", raw),
                })?,
                None => default_channel,
            };

            let key = PHONE_COLUMNS
                .iter()
                .filter_map(|c| vars.get(*c))
                .find(|v| !v.is_empty())
                .and_then(|raw| phone::normalize(raw))
                .map(|p| p.e164);

            let opted_out = vars.get("OptIn").is_some_and(|v| is_opt_out(v));

            let name = NAME_COLUMNS
                .iter()
                .filter_map(|c| vars.get(*c))
                .find(|v| !v.is_empty())
                .cloned()
                .unwrap_or_else(|| fallback_name.to_string());
            vars.insert("name".to_string(), name);

            if let Some(k) = &key
                && let Some(first) = seen.insert((k.clone(), channel), index)
            {
                return Err(InputError::DuplicateRecipient {
                    key: k.clone(),
                    channel: channel.to_string(),
                    first,
                    second: index,
                });
            }

            records.push(ContactRecord {
                index,
                key,
                channel,
                opted_out,
                template_vars: vars,
            });
        }

        Ok(Self { records })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[ContactRecord] {
        &self.records
    }

    /// Look up a record by recipient key and channel.
    pub fn find(&self, key: &str, channel: Channel) -> Option<&ContactRecord> {
        self.records
            .iter()
            .find(|r| r.channel == channel && r.key.as_deref() == Some(key))
    }

    /// Look up a record by recipient key alone, preferring `channel`.
    pub fn find_for(&self, key: &str, channel: Channel) -> Option<&ContactRecord> {
        self.find(key, channel).or_else(|| {
            self.records
                .iter()
                .find(|r| r.key.as_deref() == Some(key))
        })
    }
}

fn is_opt_out(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "no" | "n" | "false" | "0" | "stop"
    )
}
