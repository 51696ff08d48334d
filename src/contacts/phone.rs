//! Phone number normalisation to E.164.
//!
//! Campaign lists are mostly North American and Mexican numbers typed by
//! hand into an address book, so the rules are tuned for `+1` and `+52`:
//!
//! - `+` followed by at least 8 digits is kept as-is (separators stripped).
//! - `52` + 10 digits or `521` + 10 digits without `+` is Mexican.
//! - 10 digits, or `1` + 10 digits, is US/Canada.
//! - Any other run of 8+ digits is treated as international.
//!
//! Free-text cells ("cell 214-555-0101 / home ...") are scanned for every
//! phone-like chunk; the first usable one wins.

use std::fmt;
use std::sync::LazyLock;

use regex::Regex;

static RE_E164: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+\d{8,15}").expect("valid regex"));
static RE_DIGIT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\d+").expect("valid regex"));
static RE_LOOSE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+?\d[\d\-\s().]{6,}\d").expect("valid regex"));
static RE_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":::|[,|/;:\t]|\s{2,}").expect("valid regex"));
static RE_US_WINDOW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+1\d{10}").expect("valid regex"));
static RE_MX_WINDOW: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\+521?\d{10}").expect("valid regex"));

/// E.164 allows at most 15 digits.
const MAX_E164_DIGITS: usize = 15;
const MIN_DIGITS: usize = 8;

/// Country bucket derived from the dialling prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Country {
    Us,
    Mx,
    Intl,
}

impl Country {
    pub fn as_str(&self) -> &'static str {
        match self {
            Country::Us => "US",
            Country::Mx => "MX",
            Country::Intl => "INTL",
        }
    }

    fn of(e164: &str) -> Self {
        if e164.starts_with("+1") {
            Country::Us
        } else if e164.starts_with("+52") {
            Country::Mx
        } else {
            Country::Intl
        }
    }
}

impl fmt::Display for Country {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A phone number in `+<digits>` form with its country bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PhoneNumber {
    pub e164: String,
    pub country: Country,
}

impl PhoneNumber {
    fn new(e164: String) -> Self {
        let country = Country::of(&e164);
        Self { e164, country }
    }
}

fn only_digits(s: &str) -> String {
    s.chars().filter(char::is_ascii_digit).collect()
}

/// Normalise a single phone-ish value. Returns `None` when no plausible
/// number can be derived.
pub fn normalize(raw: &str) -> Option<PhoneNumber> {
    let s = raw.trim();
    if s.is_empty() {
        return None;
    }

    let digits = only_digits(s);
    if digits.is_empty() {
        return None;
    }

    if s.starts_with('+') {
        if digits.len() < MIN_DIGITS {
            return None;
        }
        return Some(PhoneNumber::new(narrow_long_number(&format!("+{}", digits))));
    }

    if digits.starts_with("52") && matches!(digits.len(), 12 | 13) {
        return Some(PhoneNumber::new(format!("+{}", digits)));
    }
    if digits.len() == 11 && digits.starts_with('1') {
        return Some(PhoneNumber::new(format!("+{}", digits)));
    }
    if digits.len() == 10 {
        return Some(PhoneNumber::new(format!("+1{}", digits)));
    }
    if digits.len() >= MIN_DIGITS {
        return Some(PhoneNumber::new(narrow_long_number(&format!("+{}", digits))));
    }
    None
}

/// Cut an over-long value down to one plausible number.
///
/// Two numbers pasted into one cell end up as a 20+ digit string after
/// separator stripping. Prefer a `+1` window, then a `+52`/`+521` window,
/// then any `+` window of 8 to 15 digits, and finally the first 15 digits.
pub fn narrow_long_number(s: &str) -> String {
    let s = s.trim();
    let digits = only_digits(s);
    if digits.len() <= MAX_E164_DIGITS {
        return s.to_string();
    }
    for re in [&*RE_US_WINDOW, &*RE_MX_WINDOW, &*RE_E164] {
        if let Some(m) = re.find(s) {
            return m.as_str().to_string();
        }
    }
    format!("+{}", &digits[..MAX_E164_DIGITS])
}

/// Extract every distinct phone number mentioned in a free-text cell,
/// in priority order: explicit `+` numbers, Mexican digit runs, US digit
/// runs, then loosely formatted chunks such as `(214) 555-0101`.
pub fn extract_candidates(text: &str) -> Vec<PhoneNumber> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let mut raw_hits: Vec<&str> = RE_E164.find_iter(text).map(|m| m.as_str()).collect();

    let runs: Vec<&str> = RE_DIGIT_RUN.find_iter(text).map(|m| m.as_str()).collect();
    raw_hits.extend(runs.iter().copied().filter(|run| {
        (run.len() == 12 && run.starts_with("52")) || (run.len() == 13 && run.starts_with("521"))
    }));
    raw_hits.extend(
        runs.iter()
            .copied()
            .filter(|run| run.len() == 10 || (run.len() == 11 && run.starts_with('1'))),
    );

    for piece in RE_SEPARATORS.split(text) {
        raw_hits.extend(RE_LOOSE.find_iter(piece).map(|m| m.as_str()));
    }

    let mut out: Vec<PhoneNumber> = Vec::new();
    for hit in raw_hits {
        if let Some(phone) = normalize(hit)
            && !out.iter().any(|p| p.e164 == phone.e164)
        {
            out.push(phone);
        }
    }
    out
}
