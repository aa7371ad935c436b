//! Free-form US address normalization.
//!
//! Turns arbitrary address text into structured components plus a canonical
//! string suitable for geocoding. Parsing is best-effort: malformed but
//! non-empty input always yields some normalization; only empty/whitespace
//! input produces the empty result.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Geocoding method implied by the components present in an address.
/// Ordered strongest to weakest; `Raw` means nothing structured was found
/// and the cleaned input itself is sent to the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeocodeMethod {
    FullAddress,
    ZipOnly,
    CityState,
    Raw,
}

impl GeocodeMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            GeocodeMethod::FullAddress => "full_address",
            GeocodeMethod::ZipOnly => "zip_only",
            GeocodeMethod::CityState => "city_state",
            GeocodeMethod::Raw => "raw",
        }
    }
}

/// Presence flags for the parsed components.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressFlags {
    pub has_street_number: bool,
    pub has_street_name: bool,
    pub has_city: bool,
    pub has_state: bool,
    pub has_zip: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedAddress {
    /// Original input text, untouched.
    pub raw: String,
    /// Input after whitespace/quote/comma cleanup and country-token removal.
    pub cleaned: String,
    pub street: Option<String>,
    pub city: Option<String>,
    pub state: Option<String>,
    pub zip: Option<String>,
    pub flags: AddressFlags,
    pub method: GeocodeMethod,
    /// Weighted component score in [0, 1].
    pub quality: f64,
    /// String handed to the geocoding provider. Always suffixed with ", USA"
    /// when non-empty so the provider does not wander abroad.
    pub canonical_string: String,
}

impl NormalizedAddress {
    pub fn is_empty(&self) -> bool {
        self.cleaned.is_empty()
    }

    fn empty(raw: &str) -> Self {
        Self {
            raw: raw.to_string(),
            cleaned: String::new(),
            street: None,
            city: None,
            state: None,
            zip: None,
            flags: AddressFlags::default(),
            method: GeocodeMethod::Raw,
            quality: 0.0,
            canonical_string: String::new(),
        }
    }
}

static ZIP_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{5})(?:-\d{4})?\b").expect("zip regex"));

/// Two-letter codes: 50 states + DC + 5 territories.
const STATE_CODES: [&str; 56] = [
    "AL", "AK", "AZ", "AR", "CA", "CO", "CT", "DE", "FL", "GA", "HI", "ID", "IL", "IN", "IA",
    "KS", "KY", "LA", "ME", "MD", "MA", "MI", "MN", "MS", "MO", "MT", "NE", "NV", "NH", "NJ",
    "NM", "NY", "NC", "ND", "OH", "OK", "OR", "PA", "RI", "SC", "SD", "TN", "TX", "UT", "VT",
    "VA", "WA", "WV", "WI", "WY", "DC", "PR", "VI", "GU", "AS", "MP",
];

static STATE_NAMES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("alabama", "AL"),
        ("alaska", "AK"),
        ("arizona", "AZ"),
        ("arkansas", "AR"),
        ("california", "CA"),
        ("colorado", "CO"),
        ("connecticut", "CT"),
        ("delaware", "DE"),
        ("florida", "FL"),
        ("georgia", "GA"),
        ("hawaii", "HI"),
        ("idaho", "ID"),
        ("illinois", "IL"),
        ("indiana", "IN"),
        ("iowa", "IA"),
        ("kansas", "KS"),
        ("kentucky", "KY"),
        ("louisiana", "LA"),
        ("maine", "ME"),
        ("maryland", "MD"),
        ("massachusetts", "MA"),
        ("michigan", "MI"),
        ("minnesota", "MN"),
        ("mississippi", "MS"),
        ("missouri", "MO"),
        ("montana", "MT"),
        ("nebraska", "NE"),
        ("nevada", "NV"),
        ("new hampshire", "NH"),
        ("new jersey", "NJ"),
        ("new mexico", "NM"),
        ("new york", "NY"),
        ("north carolina", "NC"),
        ("north dakota", "ND"),
        ("ohio", "OH"),
        ("oklahoma", "OK"),
        ("oregon", "OR"),
        ("pennsylvania", "PA"),
        ("rhode island", "RI"),
        ("south carolina", "SC"),
        ("south dakota", "SD"),
        ("tennessee", "TN"),
        ("texas", "TX"),
        ("utah", "UT"),
        ("vermont", "VT"),
        ("virginia", "VA"),
        ("washington", "WA"),
        ("west virginia", "WV"),
        ("wisconsin", "WI"),
        ("wyoming", "WY"),
        ("district of columbia", "DC"),
        ("puerto rico", "PR"),
    ])
});

/// Street-type suffixes used to recognize street parts and to skip them
/// during city extraction.
const STREET_TYPES: [&str; 30] = [
    "st", "street", "ave", "avenue", "blvd", "boulevard", "rd", "road", "dr", "drive", "ln",
    "lane", "ct", "court", "pl", "place", "pkwy", "parkway", "ter", "terrace", "way", "hwy",
    "highway", "cir", "circle", "sq", "square", "plz", "plaza", "expy",
];

fn is_street_type(token: &str) -> bool {
    let t = token.trim_end_matches('.').to_ascii_lowercase();
    STREET_TYPES.contains(&t.as_str())
}

fn is_country_token(part: &str) -> bool {
    matches!(
        part.trim().to_ascii_lowercase().as_str(),
        "usa" | "us" | "u.s." | "u.s.a." | "united states" | "united states of america"
    )
}

/// Whitespace collapse, quote canonicalization, comma spacing.
fn clean(input: &str) -> String {
    let mut s = input
        .replace(['\u{2018}', '\u{2019}', '\u{201B}', '`'], "'")
        .replace(['\u{201C}', '\u{201D}'], "\"");
    s = s.split_whitespace().collect::<Vec<_>>().join(" ");
    // " ," -> ","  then ","/",x" -> ", "
    s = s.replace(" ,", ",");
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        out.push(c);
        if c == ',' && chars.peek().is_some_and(|n| *n != ' ') {
            out.push(' ');
        }
    }
    out.trim_matches(|c: char| c == ',' || c.is_whitespace())
        .to_string()
}

fn extract_zip(cleaned: &str) -> Option<String> {
    ZIP_RE
        .captures(cleaned)
        .map(|c| c.get(1).expect("zip group").as_str().to_string())
}

/// Find a state by two-letter code (scanning tokens from the right) or by
/// full-name lookup anywhere in the string.
fn extract_state(cleaned: &str) -> Option<String> {
    let tokens: Vec<&str> = cleaned
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();
    for token in tokens.iter().rev() {
        let t = token.trim_matches(|c: char| !c.is_ascii_alphanumeric());
        if t.len() == 2 {
            let upper = t.to_ascii_uppercase();
            if STATE_CODES.contains(&upper.as_str()) {
                return Some(upper);
            }
        }
    }
    let lower = cleaned.to_ascii_lowercase();
    // Longer names first so "west virginia" is not read as "virginia".
    let mut names: Vec<(&&str, &&str)> = STATE_NAMES.iter().collect();
    names.sort_by_key(|(name, _)| std::cmp::Reverse(name.len()));
    for (name, code) in names {
        if lower.contains(name) {
            return Some((*code).to_string());
        }
    }
    None
}

/// Strip zip and state tokens out of a candidate city part.
fn strip_admin_tokens(part: &str, state: Option<&str>, zip: Option<&str>) -> String {
    part.split_whitespace()
        .filter(|t| {
            let bare = t.trim_matches(|c: char| !c.is_ascii_alphanumeric());
            if let Some(z) = zip
                && (bare == z || bare.starts_with(&format!("{z}-")))
            {
                return false;
            }
            if let Some(st) = state
                && bare.eq_ignore_ascii_case(st)
            {
                return false;
            }
            true
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Scan comma-separated parts from the right for something city-shaped:
/// non-numeric, not a street part, not swallowed entirely by state/zip.
fn extract_city(parts: &[&str], state: Option<&str>, zip: Option<&str>) -> Option<String> {
    for part in parts.iter().rev() {
        if is_country_token(part) {
            continue;
        }
        let candidate = strip_admin_tokens(part, state, zip);
        if candidate.is_empty() {
            continue;
        }
        if candidate.chars().next().is_some_and(|c| c.is_ascii_digit()) {
            continue;
        }
        if candidate.split_whitespace().any(is_street_type) {
            continue;
        }
        return Some(candidate);
    }
    None
}

/// A part is street-shaped when it leads with a digit or contains a known
/// street-type token.
fn extract_street(parts: &[&str]) -> Option<String> {
    for part in parts {
        if is_country_token(part) {
            continue;
        }
        let leads_with_digit = part
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_digit());
        let has_street_type = part.split_whitespace().any(is_street_type);
        if leads_with_digit || has_street_type {
            return Some(part.trim().to_string());
        }
    }
    None
}

/// Normalize arbitrary US address text.
pub fn normalize(input: &str) -> NormalizedAddress {
    let cleaned_full = clean(input);
    if cleaned_full.is_empty() {
        return NormalizedAddress::empty(input);
    }

    // Country tokens carry no information for US-domestic parsing and would
    // otherwise be mistaken for a city.
    let parts: Vec<&str> = cleaned_full
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty() && !is_country_token(p))
        .collect();
    let cleaned = parts.join(", ");
    if cleaned.is_empty() {
        return NormalizedAddress::empty(input);
    }

    let zip = extract_zip(&cleaned);
    let state = extract_state(&cleaned);
    let street = extract_street(&parts);
    let city_parts: Vec<&str> = match street {
        // The street part never doubles as the city part.
        Some(ref s) => parts
            .iter()
            .filter(|p| !p.eq_ignore_ascii_case(s))
            .copied()
            .collect(),
        None => parts.clone(),
    };
    let city = extract_city(&city_parts, state.as_deref(), zip.as_deref());

    let (has_street_number, has_street_name) = match street {
        Some(ref s) => {
            let mut tokens = s.split_whitespace();
            let first_numeric = tokens
                .next()
                .is_some_and(|t| t.chars().all(|c| c.is_ascii_digit()));
            let named = s
                .split_whitespace()
                .skip(if first_numeric { 1 } else { 0 })
                .any(|t| t.chars().any(|c| c.is_ascii_alphabetic()));
            (first_numeric, named)
        }
        None => (false, false),
    };

    let flags = AddressFlags {
        has_street_number,
        has_street_name,
        has_city: city.is_some(),
        has_state: state.is_some(),
        has_zip: zip.is_some(),
    };

    let quality = 0.25 * f64::from(u8::from(flags.has_street_number))
        + 0.25 * f64::from(u8::from(flags.has_street_name))
        + 0.20 * f64::from(u8::from(flags.has_city))
        + 0.15 * f64::from(u8::from(flags.has_state))
        + 0.15 * f64::from(u8::from(flags.has_zip));

    let method = if flags.has_street_number
        && flags.has_street_name
        && (flags.has_city || flags.has_zip)
        && flags.has_state
    {
        GeocodeMethod::FullAddress
    } else if flags.has_zip {
        GeocodeMethod::ZipOnly
    } else if flags.has_city && flags.has_state {
        GeocodeMethod::CityState
    } else {
        GeocodeMethod::Raw
    };

    let canonical_body = match method {
        GeocodeMethod::FullAddress => {
            let mut pieces: Vec<String> = vec![street.clone().expect("street present")];
            if let Some(ref c) = city {
                pieces.push(c.clone());
            }
            let mut tail = state.clone().expect("state present");
            if let Some(ref z) = zip {
                tail.push(' ');
                tail.push_str(z);
            }
            pieces.push(tail);
            pieces.join(", ")
        }
        GeocodeMethod::ZipOnly => zip.clone().expect("zip present"),
        GeocodeMethod::CityState => format!(
            "{}, {}",
            city.clone().expect("city present"),
            state.clone().expect("state present")
        ),
        GeocodeMethod::Raw => cleaned.clone(),
    };
    let canonical_string = format!("{canonical_body}, USA");

    NormalizedAddress {
        raw: input.to_string(),
        cleaned,
        street,
        city,
        state,
        zip,
        flags,
        method,
        quality,
        canonical_string,
    }
}

/// Normalize pre-split components, e.g. from a CRM record or manual entry.
pub fn normalize_components(
    street: Option<&str>,
    city: Option<&str>,
    state: Option<&str>,
    zip: Option<&str>,
) -> NormalizedAddress {
    let joined = [street, city, state, zip]
        .iter()
        .filter_map(|p| *p)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(", ");
    normalize(&joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_address_is_strongest_method() {
        let n = normalize("123 Main St, Brooklyn, NY 11201");
        assert_eq!(n.method, GeocodeMethod::FullAddress);
        assert_eq!(n.street.as_deref(), Some("123 Main St"));
        assert_eq!(n.city.as_deref(), Some("Brooklyn"));
        assert_eq!(n.state.as_deref(), Some("NY"));
        assert_eq!(n.zip.as_deref(), Some("11201"));
        assert_eq!(n.canonical_string, "123 Main St, Brooklyn, NY 11201, USA");
        assert!((n.quality - 1.0).abs() < 1e-9);
    }

    #[test]
    fn zip_only_when_street_missing() {
        let n = normalize("somewhere 11201");
        assert_eq!(n.method, GeocodeMethod::ZipOnly);
        assert_eq!(n.canonical_string, "11201, USA");
        assert!(n.flags.has_zip);
        assert!(!n.flags.has_street_number);
    }

    #[test]
    fn city_state_without_zip() {
        let n = normalize("Brooklyn, NY");
        assert_eq!(n.method, GeocodeMethod::CityState);
        assert_eq!(n.canonical_string, "Brooklyn, NY, USA");
        assert_eq!(n.quality, 0.35);
    }

    #[test]
    fn full_state_name_is_recognized() {
        let n = normalize("Albany, New York");
        assert_eq!(n.state.as_deref(), Some("NY"));
        assert_eq!(n.method, GeocodeMethod::CityState);
    }

    #[test]
    fn west_virginia_not_mistaken_for_virginia() {
        let n = normalize("Charleston, West Virginia");
        assert_eq!(n.state.as_deref(), Some("WV"));
    }

    #[test]
    fn street_without_number_still_detected_by_type_token() {
        let n = normalize("Main Street, Brooklyn, NY 11201");
        assert_eq!(n.street.as_deref(), Some("Main Street"));
        assert!(!n.flags.has_street_number);
        // No street number: falls back to zip_only.
        assert_eq!(n.method, GeocodeMethod::ZipOnly);
    }

    #[test]
    fn empty_input_yields_empty_normalization() {
        assert!(normalize("").is_empty());
        assert!(normalize("   \t ").is_empty());
        let n = normalize("");
        assert_eq!(n.quality, 0.0);
        assert_eq!(n.canonical_string, "");
    }

    #[test]
    fn malformed_input_is_best_effort() {
        let n = normalize("???");
        assert!(!n.is_empty());
        assert_eq!(n.method, GeocodeMethod::Raw);
        assert_eq!(n.canonical_string, "???, USA");
    }

    #[test]
    fn messy_whitespace_and_quotes_are_cleaned() {
        let n = normalize("  12  O\u{2019}Brien   Ave ,Queens,NY   11375 ");
        assert_eq!(n.cleaned, "12 O'Brien Ave, Queens, NY 11375");
        assert_eq!(n.method, GeocodeMethod::FullAddress);
    }

    #[test]
    fn zip_plus_four_keeps_five_digit_zip() {
        let n = normalize("44 Court St, Brooklyn, NY 11201-4401");
        assert_eq!(n.zip.as_deref(), Some("11201"));
    }

    #[test]
    fn country_suffix_is_not_a_city() {
        let n = normalize("11201, USA");
        assert_eq!(n.method, GeocodeMethod::ZipOnly);
        assert_eq!(n.city, None);
        assert_eq!(n.canonical_string, "11201, USA");
    }

    #[test]
    fn normalization_is_idempotent() {
        for input in [
            "123 Main St, Brooklyn, NY 11201",
            "Brooklyn, NY",
            "11201",
            "44 Court St,Brooklyn,NY 11201-4401",
            "nonsense input with no structure",
        ] {
            let first = normalize(input);
            let second = normalize(&first.canonical_string);
            assert_eq!(first.canonical_string, second.canonical_string, "{input}");
            assert_eq!(first.method, second.method, "{input}");
            assert_eq!(first.flags, second.flags, "{input}");
            assert_eq!(first.city, second.city, "{input}");
            assert_eq!(first.state, second.state, "{input}");
            assert_eq!(first.zip, second.zip, "{input}");
        }
    }

    #[test]
    fn quality_weights_sum_per_component() {
        let n = normalize("123 Main St, NY");
        // street number + street name + state
        assert!((n.quality - 0.65).abs() < 1e-9);
    }

    #[test]
    fn components_helper_joins_before_parsing() {
        let n = normalize_components(Some("123 Main St"), Some("Brooklyn"), Some("NY"), None);
        assert_eq!(n.method, GeocodeMethod::FullAddress);
        assert_eq!(n.canonical_string, "123 Main St, Brooklyn, NY, USA");
    }
}
