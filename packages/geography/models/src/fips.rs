//! US state reference table.
//!
//! One immutable table maps two-digit FIPS codes, two-letter postal
//! abbreviations, and full names for the 50 states + DC. Every lookup in
//! the toolchain goes through this table.

/// A single row of the state reference table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateInfo {
    /// Two-digit FIPS code (e.g. `"06"`).
    pub fips: &'static str,
    /// Two-letter postal abbreviation (e.g. `"CA"`).
    pub abbr: &'static str,
    /// Full state name (e.g. `"California"`).
    pub name: &'static str,
}

const fn state(fips: &'static str, abbr: &'static str, name: &'static str) -> StateInfo {
    StateInfo { fips, abbr, name }
}

/// The 50 US states + DC, ordered by FIPS code.
pub const STATES: &[StateInfo] = &[
    state("01", "AL", "Alabama"),
    state("02", "AK", "Alaska"),
    state("04", "AZ", "Arizona"),
    state("05", "AR", "Arkansas"),
    state("06", "CA", "California"),
    state("08", "CO", "Colorado"),
    state("09", "CT", "Connecticut"),
    state("10", "DE", "Delaware"),
    state("11", "DC", "District of Columbia"),
    state("12", "FL", "Florida"),
    state("13", "GA", "Georgia"),
    state("15", "HI", "Hawaii"),
    state("16", "ID", "Idaho"),
    state("17", "IL", "Illinois"),
    state("18", "IN", "Indiana"),
    state("19", "IA", "Iowa"),
    state("20", "KS", "Kansas"),
    state("21", "KY", "Kentucky"),
    state("22", "LA", "Louisiana"),
    state("23", "ME", "Maine"),
    state("24", "MD", "Maryland"),
    state("25", "MA", "Massachusetts"),
    state("26", "MI", "Michigan"),
    state("27", "MN", "Minnesota"),
    state("28", "MS", "Mississippi"),
    state("29", "MO", "Missouri"),
    state("30", "MT", "Montana"),
    state("31", "NE", "Nebraska"),
    state("32", "NV", "Nevada"),
    state("33", "NH", "New Hampshire"),
    state("34", "NJ", "New Jersey"),
    state("35", "NM", "New Mexico"),
    state("36", "NY", "New York"),
    state("37", "NC", "North Carolina"),
    state("38", "ND", "North Dakota"),
    state("39", "OH", "Ohio"),
    state("40", "OK", "Oklahoma"),
    state("41", "OR", "Oregon"),
    state("42", "PA", "Pennsylvania"),
    state("44", "RI", "Rhode Island"),
    state("45", "SC", "South Carolina"),
    state("46", "SD", "South Dakota"),
    state("47", "TN", "Tennessee"),
    state("48", "TX", "Texas"),
    state("49", "UT", "Utah"),
    state("50", "VT", "Vermont"),
    state("51", "VA", "Virginia"),
    state("53", "WA", "Washington"),
    state("54", "WV", "West Virginia"),
    state("55", "WI", "Wisconsin"),
    state("56", "WY", "Wyoming"),
];

/// Looks up a state by its two-digit FIPS code.
#[must_use]
pub fn by_fips(fips: &str) -> Option<&'static StateInfo> {
    STATES.iter().find(|s| s.fips == fips)
}

/// Looks up a state by its postal abbreviation (case-insensitive).
#[must_use]
pub fn by_abbr(abbr: &str) -> Option<&'static StateInfo> {
    STATES.iter().find(|s| s.abbr.eq_ignore_ascii_case(abbr))
}

/// Looks up a state by its full name (case-insensitive, surrounding
/// whitespace ignored).
#[must_use]
pub fn by_name(name: &str) -> Option<&'static StateInfo> {
    let name = name.trim();
    STATES.iter().find(|s| s.name.eq_ignore_ascii_case(name))
}

/// Resolves a free-form state reference: a FIPS code (zero-padded or
/// not), a postal abbreviation, or a full name.
#[must_use]
pub fn resolve(reference: &str) -> Option<&'static StateInfo> {
    let reference = reference.trim();
    if !reference.is_empty() && reference.bytes().all(|b| b.is_ascii_digit()) {
        return by_fips(&pad_code(reference, 2));
    }
    by_abbr(reference).or_else(|| by_name(reference))
}

/// Returns `true` if `fips` is one of the 50 states + DC.
#[must_use]
pub fn is_state_fips(fips: &str) -> bool {
    by_fips(fips).is_some()
}

/// Left-pads a numeric code with zeros to `width` characters.
///
/// Source files frequently drop leading zeros (`"6"` for California), so
/// every code is normalized before it is used as a key.
#[must_use]
pub fn pad_code(code: &str, width: usize) -> String {
    let code = code.trim();
    // Spreadsheet exports sometimes render codes as floats ("6.0").
    let code = code.strip_suffix(".0").unwrap_or(code);
    format!("{code:0>width$}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_count() {
        assert_eq!(STATES.len(), 51);
    }

    #[test]
    fn codes_are_unique_and_sorted() {
        for pair in STATES.windows(2) {
            assert!(pair[0].fips < pair[1].fips, "{:?}", pair);
        }
        let mut abbrs: Vec<&str> = STATES.iter().map(|s| s.abbr).collect();
        abbrs.sort_unstable();
        abbrs.dedup();
        assert_eq!(abbrs.len(), STATES.len());
    }

    #[test]
    fn lookups_agree() {
        for info in STATES {
            assert_eq!(by_fips(info.fips), Some(info));
            assert_eq!(by_abbr(info.abbr), Some(info));
            assert_eq!(by_name(info.name), Some(info));
        }
    }

    #[test]
    fn resolve_accepts_any_form() {
        assert_eq!(resolve("6").map(|s| s.abbr), Some("CA"));
        assert_eq!(resolve("06").map(|s| s.abbr), Some("CA"));
        assert_eq!(resolve("ca").map(|s| s.fips), Some("06"));
        assert_eq!(resolve(" west virginia ").map(|s| s.abbr), Some("WV"));
        assert_eq!(resolve("72"), None);
        assert_eq!(resolve("XX"), None);
    }

    #[test]
    fn pads_codes() {
        assert_eq!(pad_code("6", 2), "06");
        assert_eq!(pad_code("1", 3), "001");
        assert_eq!(pad_code("6.0", 2), "06");
        assert_eq!(pad_code("06075", 5), "06075");
    }
}
