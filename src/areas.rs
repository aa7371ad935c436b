//! Area-equivalence groups for service-area labels.
//!
//! CRM records, operator entry and geocoder responses spell the same urban
//! subdivision several ways (borough name, county name, colloquial name).
//! The validator and the geocoder's component filter both need to treat
//! those spellings as one area.

/// Alias groups. First entry of each group is the canonical label.
const AREA_ALIASES: [&[&str]; 8] = [
    &["brooklyn", "kings", "kings county", "bklyn"],
    &["manhattan", "new york", "new york city", "new york county", "nyc"],
    &["queens", "queens county"],
    &["bronx", "the bronx", "bronx county"],
    &["staten island", "richmond", "richmond county"],
    &["jersey city", "jc"],
    &["hoboken"],
    &["yonkers"],
];

/// Canonical label for an area spelling, if the spelling is recognized.
pub fn canonical_area(label: &str) -> Option<&'static str> {
    let needle = label.trim().to_ascii_lowercase();
    if needle.is_empty() {
        return None;
    }
    AREA_ALIASES
        .iter()
        .find(|group| group.iter().any(|alias| *alias == needle))
        .map(|group| group[0])
}

/// Whether two labels name the same area under the alias relation.
/// Unrecognized labels fall back to case-insensitive equality.
pub fn areas_equivalent(a: &str, b: &str) -> bool {
    match (canonical_area(a), canonical_area(b)) {
        (Some(ca), Some(cb)) => ca == cb,
        _ => a.trim().eq_ignore_ascii_case(b.trim()),
    }
}

/// Whether a city label names a recognized major urban subdivision, in which
/// case the geocoder sends a structured component filter to disambiguate
/// same-ZIP sub-areas.
pub fn is_major_subdivision(label: &str) -> bool {
    canonical_area(label).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn borough_and_county_spellings_match() {
        assert!(areas_equivalent("Brooklyn", "Kings County"));
        assert!(areas_equivalent("Staten Island", "richmond"));
        assert!(areas_equivalent("NYC", "Manhattan"));
    }

    #[test]
    fn different_areas_do_not_match() {
        assert!(!areas_equivalent("Brooklyn", "Queens"));
        assert!(!areas_equivalent("Bronx", "Manhattan"));
    }

    #[test]
    fn unknown_labels_compare_literally() {
        assert!(areas_equivalent("Ridgewood", "ridgewood"));
        assert!(!areas_equivalent("Ridgewood", "Maspeth"));
    }

    #[test]
    fn subdivision_recognition() {
        assert!(is_major_subdivision("brooklyn"));
        assert!(is_major_subdivision("The Bronx"));
        assert!(!is_major_subdivision("Poughkeepsie"));
        assert!(!is_major_subdivision(""));
    }
}
