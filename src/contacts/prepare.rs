//! Contact list preparation.
//!
//! Turns an address-book export into the per-channel lists `send` reads:
//!
//! ```text
//! export.csv/tsv ──► normalise phones ──► dedupe ──► greeting names
//!                                                        │
//!                         ┌──────────────────────────────┼───────────────────────┐
//!                         ▼                              ▼                       ▼
//!                 contacts_master.csv          whatsapp_contacts.csv     sms_contacts.csv
//!                                                (every contact)          (US + MX only)
//! ```

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::channels::Channel;
use crate::contacts::greeting::{derive_first_name, greeting_name};
use crate::contacts::phone::{self, Country, PhoneNumber};
use crate::error::InputError;

pub const MASTER_FILE: &str = "contacts_master.csv";
pub const WHATSAPP_FILE: &str = "whatsapp_contacts.csv";
pub const SMS_FILE: &str = "sms_contacts.csv";

/// Address-book exports carry up to six numbers per contact.
const MAX_PHONE_SLOTS: usize = 6;
const MOBILE_LABELS: [&str; 3] = ["mobile", "cell", "móvil"];

/// A cleaned contact as written to the prepared lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PreparedContact {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Phone_E164")]
    pub phone_e164: String,
    #[serde(rename = "Country")]
    pub country: String,
    #[serde(rename = "Channel")]
    pub channel: String,
    #[serde(rename = "OptIn")]
    pub opt_in: String,
    #[serde(rename = "FirstName")]
    pub first_name: String,
    #[serde(rename = "GreetingName")]
    pub greeting_name: String,
}

/// Counts and output locations of one preparation run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PrepareSummary {
    pub input_rows: usize,
    pub kept: usize,
    pub dropped_no_phone: usize,
    pub dropped_duplicate: usize,
    pub whatsapp: usize,
    pub sms: usize,
    pub master_path: PathBuf,
    pub whatsapp_path: PathBuf,
    pub sms_path: PathBuf,
}

/// Result of cleaning an export in memory.
#[derive(Debug, Clone, Default)]
pub struct CleanedExport {
    /// Deduplicated contacts in input order.
    pub contacts: Vec<PreparedContact>,
    pub input_rows: usize,
    pub dropped_no_phone: usize,
    pub dropped_duplicate: usize,
}

/// Clean an export held in memory.
pub fn clean_export(text: &str, fallback_name: &str) -> Result<CleanedExport, InputError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let Some(header_line) = text.lines().next() else {
        return Err(InputError::Empty);
    };
    let delimiter = if header_line.contains('\t') { b'\t' } else { b',' };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| InputError::MalformedRow {
            index: 0,
            reason: format!("Failed to read headers: {}", e),
        })?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let address_book = headers.iter().any(|h| h == "Phone 1 - Value");

    let mut cleaned = CleanedExport::default();
    let mut seen: HashSet<String> = HashSet::new();

    for (index, result) in reader.records().enumerate() {
        let record = result.map_err(|e| InputError::MalformedRow {
            index,
            reason: e.to_string(),
        })?;
        cleaned.input_rows += 1;

        let row: HashMap<&str, &str> = headers
            .iter()
            .map(String::as_str)
            .zip(record.iter().map(str::trim))
            .collect();
        let field = |name: &str| row.get(name).copied().unwrap_or_default();

        let (name, number) = if address_book {
            (address_book_name(&field), pick_best_number(&field))
        } else {
            let raw = [field("Phone_E164"), field("Phone")]
                .into_iter()
                .find(|v| !v.is_empty())
                .unwrap_or_default();
            let name = match field("Name") {
                "" => "Unknown".to_string(),
                n => n.to_string(),
            };
            (name, phone::extract_candidates(raw).into_iter().next())
        };

        let Some(number) = number else {
            tracing::debug!(row = index, name = %name, "Dropping contact without a usable phone");
            cleaned.dropped_no_phone += 1;
            continue;
        };

        if !seen.insert(number.e164.clone()) {
            cleaned.dropped_duplicate += 1;
            continue;
        }

        let first_name = derive_first_name(&name);
        let greeting = greeting_name(&first_name, fallback_name);
        cleaned.contacts.push(PreparedContact {
            name,
            phone_e164: number.e164,
            country: number.country.to_string(),
            channel: Channel::WhatsApp.list_label().to_string(),
            opt_in: field("OptIn").to_string(),
            first_name,
            greeting_name: greeting,
        });
    }

    Ok(cleaned)
}

/// Display name for an address-book row: first + last, nickname,
/// organisation, e-mail, in that order.
fn address_book_name<'a>(field: &impl Fn(&str) -> &'a str) -> String {
    let full = [field("First Name"), field("Last Name")]
        .into_iter()
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    [
        full.as_str(),
        field("Nickname"),
        field("Organization Name"),
        field("E-mail 1 - Value"),
    ]
    .into_iter()
    .find(|s| !s.is_empty())
    .unwrap_or("Unknown")
    .to_string()
}

/// Prefer a number from a mobile-labelled slot; otherwise the first number
/// found in any slot.
fn pick_best_number<'a>(field: &impl Fn(&str) -> &'a str) -> Option<PhoneNumber> {
    let mut best = None;
    for slot in 1..=MAX_PHONE_SLOTS {
        let value = field(&format!("Phone {} - Value", slot));
        if value.is_empty() {
            continue;
        }
        let Some(candidate) = phone::extract_candidates(value).into_iter().next() else {
            continue;
        };
        let label = field(&format!("Phone {} - Label", slot)).to_lowercase();
        if MOBILE_LABELS.iter().any(|k| label.contains(k)) {
            return Some(candidate);
        }
        best.get_or_insert(candidate);
    }
    best
}

/// Read an export from disk and write the three prepared lists into
/// `out_dir`.
pub fn prepare(
    input: &Path,
    out_dir: &Path,
    fallback_name: &str,
) -> Result<PrepareSummary, InputError> {
    let bytes = std::fs::read(input).map_err(|e| InputError::Unreadable {
        path: input.to_path_buf(),
        reason: e.to_string(),
    })?;
    let text = String::from_utf8_lossy(&bytes);
    let cleaned = clean_export(&text, fallback_name)?;
    let contacts = &cleaned.contacts;

    let whatsapp = contacts;
    let sms: Vec<PreparedContact> = contacts
        .iter()
        .filter(|c| c.country == Country::Us.as_str() || c.country == Country::Mx.as_str())
        .map(|c| PreparedContact {
            channel: Channel::Sms.list_label().to_string(),
            ..c.clone()
        })
        .collect();

    std::fs::create_dir_all(out_dir).map_err(|e| InputError::Unreadable {
        path: out_dir.to_path_buf(),
        reason: e.to_string(),
    })?;

    let summary = PrepareSummary {
        input_rows: cleaned.input_rows,
        kept: contacts.len(),
        dropped_no_phone: cleaned.dropped_no_phone,
        dropped_duplicate: cleaned.dropped_duplicate,
        whatsapp: whatsapp.len(),
        sms: sms.len(),
        master_path: out_dir.join(MASTER_FILE),
        whatsapp_path: out_dir.join(WHATSAPP_FILE),
        sms_path: out_dir.join(SMS_FILE),
    };

    write_list(&summary.master_path, contacts)?;
    write_list(&summary.whatsapp_path, whatsapp)?;
    write_list(&summary.sms_path, &sms)?;

    tracing::info!(
        input = summary.input_rows,
        kept = summary.kept,
        no_phone = summary.dropped_no_phone,
        duplicates = summary.dropped_duplicate,
        "Prepared contact lists"
    );
    Ok(summary)
}

fn write_list(path: &Path, contacts: &[PreparedContact]) -> Result<(), InputError> {
    let to_err = |reason: String| InputError::Unreadable {
        path: path.to_path_buf(),
        reason,
    };
    let mut writer = csv::Writer::from_path(path).map_err(|e| to_err(e.to_string()))?;
    if contacts.is_empty() {
        writer
            .write_record([
                "Name",
                "Phone_E164",
                "Country",
                "Channel",
                "OptIn",
                "FirstName",
                "GreetingName",
            ])
            .map_err(|e| to_err(e.to_string()))?;
    }
    for contact in contacts {
        writer
            .serialize(contact)
            .map_err(|e| to_err(e.to_string()))?;
    }
    writer.flush().map_err(|e| to_err(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contacts::ContactList;

    #[test]
    fn test_simple_layout_is_cleaned_and_deduped() {
        let export = "Name,Phone\n\
                      Dr. Ana Perez,214-555-0101\n\
                      Ana P,(214) 555 0101\n\
                      No Phone,\n\
                      Beto,+52 1 55 1234 5678\n";
        let cleaned = clean_export(export, "amig@").unwrap();
        assert_eq!(
            (cleaned.input_rows, cleaned.dropped_no_phone, cleaned.dropped_duplicate),
            (4, 1, 1)
        );
        let contacts = cleaned.contacts;
        assert_eq!(contacts.len(), 2);
        assert_eq!(contacts[0].phone_e164, "+12145550101");
        assert_eq!(contacts[0].first_name, "Ana");
        assert_eq!(contacts[0].greeting_name, "Ana");
        assert_eq!(contacts[1].country, "MX");
        assert_eq!(contacts[1].channel, "WhatsApp");
    }

    #[test]
    fn test_phone_like_name_gets_fallback_greeting() {
        let contacts = clean_export("Name,Phone\n214-555-0101,2145550101\n", "amig@")
            .unwrap()
            .contacts;
        assert_eq!(contacts[0].first_name, "");
        assert_eq!(contacts[0].greeting_name, "amig@");
    }

    #[test]
    fn test_address_book_prefers_mobile_slot() {
        let export = "First Name\tLast Name\tNickname\tPhone 1 - Label\tPhone 1 - Value\tPhone 2 - Label\tPhone 2 - Value\n\
                      Luis\tCarlos\t\tHome\t972 555 0100\tMobile\t214-555-0101\n";
        let contacts = clean_export(export, "friend").unwrap().contacts;
        assert_eq!(contacts.len(), 1);
        assert_eq!(contacts[0].name, "Luis Carlos");
        assert_eq!(contacts[0].phone_e164, "+12145550101");
    }

    #[test]
    fn test_address_book_falls_back_to_first_number_and_nickname() {
        let export = "First Name,Last Name,Nickname,Phone 1 - Label,Phone 1 - Value\n\
                      ,,Tito,Work,+44 20 7946 0958\n";
        let contacts = clean_export(export, "friend").unwrap().contacts;
        assert_eq!(contacts[0].name, "Tito");
        assert_eq!(contacts[0].country, "INTL");
    }

    #[test]
    fn test_empty_export_is_rejected() {
        assert!(matches!(clean_export("", "friend"), Err(InputError::Empty)));
    }

    #[test]
    fn test_prepare_writes_lists_loadable_as_sources() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("export.csv");
        std::fs::write(
            &input,
            "Name,Phone\nAna,2145550101\nBeto,+5215512345678\nCeci,+442079460958\n",
        )
        .unwrap();

        let out = dir.path().join("lists");
        let summary = prepare(&input, &out, "friend").unwrap();
        assert_eq!(summary.kept, 3);
        assert_eq!(summary.whatsapp, 3);
        assert_eq!(summary.sms, 2);

        let wa = ContactList::from_path(&summary.whatsapp_path, Channel::Sms, "friend").unwrap();
        assert!(wa.records().iter().all(|r| r.channel == Channel::WhatsApp));

        let sms = ContactList::from_path(&summary.sms_path, Channel::WhatsApp, "friend").unwrap();
        assert_eq!(sms.len(), 2);
        assert!(sms.records().iter().all(|r| r.channel == Channel::Sms));
        assert_eq!(sms.records()[0].name(), "Ana");
    }
}
