//! Friendly first names for message personalisation.

use std::sync::LazyLock;

use regex::Regex;

static RE_PHONE_LIKE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+()\-.\s0-9]+$").expect("valid phone-like regex"));
static RE_HONORIFIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(mr|mrs|ms|dr|ing\.|sr|sra|srta|ing|lic)\.?[\s,]+")
        .expect("valid honorific regex")
});

/// Derive a first name from a free-form display name.
///
/// Returns an empty string when nothing usable remains, e.g. when the
/// "name" is really a phone number.
pub fn derive_first_name(full_name: &str) -> String {
    let name = full_name.trim();
    if name.is_empty() || RE_PHONE_LIKE.is_match(name) {
        return String::new();
    }

    let name = RE_HONORIFIC.replace(name, "");
    // "Garcia, Ana" style entries: the part before the comma is still the
    // best token we have.
    let name = name.split(',').next().unwrap_or_default().trim();

    let Some(first) = name.split_whitespace().next() else {
        return String::new();
    };
    first.trim_matches(|c: char| !c.is_alphabetic()).to_string()
}

/// The name a message greets the recipient with.
pub fn greeting_name(first_name: &str, fallback: &str) -> String {
    if first_name.is_empty() {
        fallback.to_string()
    } else {
        first_name.to_string()
    }
}
