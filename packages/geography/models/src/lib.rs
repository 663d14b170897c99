#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Geography identifiers and static reference data.
//!
//! Geographies are identified by Census FIPS strings: two digits for a
//! state (`"06"`) and five digits for a county (`"06075"`). The helpers
//! here classify those keys and map them onto the presentation key used by
//! the map (state abbreviation for states, FIPS otherwise).

pub mod fips;

use serde::{Deserialize, Serialize};

/// The administrative level a geography identifier refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeographyLevel {
    /// Two-digit state FIPS code.
    State,
    /// Five-digit state + county FIPS code.
    County,
    /// Anything else (school districts, custom regions).
    Other,
}

impl GeographyLevel {
    /// Classifies a geography identifier by its shape.
    #[must_use]
    pub fn of(geography_id: &str) -> Self {
        let numeric = geography_id.bytes().all(|b| b.is_ascii_digit());
        match geography_id.len() {
            2 if numeric => Self::State,
            5 if numeric => Self::County,
            _ => Self::Other,
        }
    }
}

/// Returns the two-digit state FIPS prefix of a state or county key, if it
/// names one of the 50 states + DC.
#[must_use]
pub fn state_fips_of(geography_id: &str) -> Option<&'static str> {
    match GeographyLevel::of(geography_id) {
        GeographyLevel::State | GeographyLevel::County => {
            fips::by_fips(&geography_id[..2]).map(|s| s.fips)
        }
        GeographyLevel::Other => None,
    }
}

/// Returns the key a geography is published under.
///
/// State-level geographies are keyed by postal abbreviation (`"CA"`);
/// everything else keeps its identifier.
#[must_use]
pub fn display_key(geography_id: &str) -> String {
    if GeographyLevel::of(geography_id) == GeographyLevel::State
        && let Some(info) = fips::by_fips(geography_id)
    {
        return info.abbr.to_string();
    }
    geography_id.to_string()
}

/// Returns a human-readable label for a geography.
///
/// States resolve to their full name; counties fall back to
/// `"<fips>, <state abbr>"` until a caller supplies a real county name.
#[must_use]
pub fn display_name(geography_id: &str) -> String {
    match GeographyLevel::of(geography_id) {
        GeographyLevel::State => fips::by_fips(geography_id)
            .map_or_else(|| geography_id.to_string(), |s| s.name.to_string()),
        GeographyLevel::County => fips::by_fips(&geography_id[..2]).map_or_else(
            || geography_id.to_string(),
            |s| format!("{geography_id}, {}", s.abbr),
        ),
        GeographyLevel::Other => geography_id.to_string(),
    }
}
