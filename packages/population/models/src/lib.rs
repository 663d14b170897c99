#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Population extract types.
//!
//! A raw extract is a stream of [`PopulationRow`]s, one per
//! geography/year/age-band cell. The aggregator folds those rows into one
//! [`GeographyYearAggregate`] per geography and year, with a grand total
//! and any number of named subtotals selected by [`SubtotalRule`]s.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

/// Number of five-year age bands in the standard layout (0-4 ... 85+).
pub const STANDARD_BAND_COUNT: u8 = 18;

/// A five-year age band, identified by its 1-based index.
///
/// Band 1 is ages 0-4, band 2 is 5-9, and so on. The last band of a
/// layout is open-ended (85+ in the standard 18-band layout).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgeBand(u8);

impl AgeBand {
    /// Creates a band from its index, rejecting indexes outside
    /// `1..=band_count`.
    #[must_use]
    pub const fn from_index(index: u8, band_count: u8) -> Option<Self> {
        if index >= 1 && index <= band_count {
            Some(Self(index))
        } else {
            None
        }
    }

    /// Parses an age-band code or label.
    ///
    /// Accepts a bare band index (`"14"`) or a label such as `"0-4"`,
    /// `"5 to 9"`, `"85+"`, `"85 and over"`, or `"Under 5"`. Labels map
    /// onto the band containing their lower age bound, with everything at
    /// or past the last band folded into it.
    #[must_use]
    pub fn parse(code: &str, band_count: u8) -> Option<Self> {
        let code = code.trim();
        if code.is_empty() {
            return None;
        }

        if code.bytes().all(|b| b.is_ascii_digit()) {
            return code
                .parse::<u8>()
                .ok()
                .and_then(|index| Self::from_index(index, band_count));
        }

        let lower = label_lower_bound(code)?;
        let index = (lower / 5).saturating_add(1).min(u32::from(band_count));
        u8::try_from(index)
            .ok()
            .and_then(|index| Self::from_index(index, band_count))
    }

    /// Returns the 1-based band index.
    #[must_use]
    pub const fn index(self) -> u8 {
        self.0
    }

    /// Returns the youngest age included in this band.
    #[must_use]
    pub fn lower_age(self) -> u32 {
        (u32::from(self.0) - 1) * 5
    }
}

/// Extracts the lower age bound from a range label.
fn label_lower_bound(label: &str) -> Option<u32> {
    let lowered = label.to_ascii_lowercase();

    if let Some(rest) = lowered.strip_prefix("under") {
        return rest.trim().parse::<u32>().ok().map(|_| 0);
    }

    let digits_end = lowered
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(lowered.len());
    if digits_end == 0 {
        return None;
    }
    let lower = lowered[..digits_end].parse::<u32>().ok()?;
    let rest = lowered[digits_end..].trim_start();

    let recognized = ["+", "-", "\u{2013}", "\u{2014}", "to", "and", "plus"]
        .iter()
        .any(|prefix| rest.starts_with(prefix));

    recognized.then_some(lower)
}

/// A single raw observation from a population extract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PopulationRow {
    /// Geography key (state or county FIPS).
    pub geography_id: String,
    /// Calendar year of the observation.
    pub year: i32,
    /// Five-year age band.
    pub age_band: AgeBand,
    /// Population count. Never negative.
    pub value: f64,
}

/// A band that only partially counts towards a subtotal.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PartialBand {
    /// Band index.
    pub band: u8,
    /// Fraction of the band's population that counts, in `(0, 1]`.
    pub weight: f64,
}

/// Selects which age bands contribute to a named subtotal.
///
/// A band contributes fully if it is at or above `min_band` or listed in
/// `bands`, and fractionally if listed in `partial`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubtotalRule {
    /// Subtotal name (e.g. `"school_age"`, `"65plus"`).
    pub name: String,
    /// Every band with an index at or above this one contributes.
    #[serde(default)]
    pub min_band: Option<u8>,
    /// Explicit list of fully contributing bands.
    #[serde(default)]
    pub bands: Vec<u8>,
    /// Fractionally contributing bands.
    #[serde(default)]
    pub partial: Vec<PartialBand>,
}

impl SubtotalRule {
    /// Subtotal of every band at or above `min_band`.
    #[must_use]
    pub fn at_least(name: impl Into<String>, min_band: u8) -> Self {
        Self {
            name: name.into(),
            min_band: Some(min_band),
            bands: Vec::new(),
            partial: Vec::new(),
        }
    }

    /// Subtotal of an explicit set of bands.
    #[must_use]
    pub fn members(name: impl Into<String>, bands: &[u8]) -> Self {
        Self {
            name: name.into(),
            min_band: None,
            bands: bands.to_vec(),
            partial: Vec::new(),
        }
    }

    /// Adds a fractionally contributing band.
    #[must_use]
    pub fn with_partial(mut self, band: u8, weight: f64) -> Self {
        self.partial.push(PartialBand { band, weight });
        self
    }

    /// Returns the fraction of `band` that contributes to this subtotal
    /// (`0.0` when it does not contribute at all).
    #[must_use]
    pub fn weight_for(&self, band: AgeBand) -> f64 {
        let index = band.index();
        if self.bands.contains(&index) || self.min_band.is_some_and(|min| index >= min) {
            return 1.0;
        }
        self.partial
            .iter()
            .find(|p| p.band == index)
            .map_or(0.0, |p| p.weight)
    }
}

/// Summed population for one geography in one year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeographyYearAggregate {
    /// Geography key.
    pub geography_id: String,
    /// Calendar year.
    pub year: i32,
    /// Sum over every age band.
    pub total: f64,
    /// Named subtotals, each no larger than `total`.
    pub subtotals: BTreeMap<String, f64>,
}

impl GeographyYearAggregate {
    /// Name under which [`Self::total`] is addressed by [`Self::metric`].
    pub const TOTAL: &'static str = "total";

    /// Returns the total (`"total"`) or a named subtotal.
    #[must_use]
    pub fn metric(&self, name: &str) -> Option<f64> {
        if name == Self::TOTAL {
            Some(self.total)
        } else {
            self.subtotals.get(name).copied()
        }
    }
}

/// Why a raw row was rejected.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum MalformedReason {
    /// A required column was absent or empty.
    MissingField,
    /// The year column did not parse as an integer.
    InvalidYear,
    /// The value column did not parse as a finite number.
    InvalidNumber,
    /// The value column was negative.
    NegativeValue,
    /// The value is too large to be a population count.
    ValueOutOfRange,
    /// The age-band code is not part of the layout.
    UnknownAgeBand,
    /// The underlying CSV record could not be decoded.
    Unreadable,
}

/// A rejected raw row. Counted, never fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedRecord {
    /// 1-based line number in the source, when known.
    pub line: Option<u64>,
    /// Rejection reason.
    pub reason: MalformedReason,
}

impl std::fmt::Display for MalformedRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.line {
            Some(line) => write!(f, "malformed record at line {line}: {}", self.reason),
            None => write!(f, "malformed record: {}", self.reason),
        }
    }
}

impl std::error::Error for MalformedRecord {}

/// Row accounting for one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateStats {
    /// Rows offered to the aggregator, including malformed ones.
    pub rows_read: u64,
    /// Rows that were accumulated.
    pub rows_kept: u64,
    /// Rows dropped because their year is not a target year.
    pub rows_filtered_year: u64,
    /// Rows dropped because their geography is not known.
    pub rows_filtered_geography: u64,
    /// Malformed rows by reason.
    pub malformed: BTreeMap<MalformedReason, u64>,
}

impl AggregateStats {
    /// Total malformed rows across all reasons.
    #[must_use]
    pub fn malformed_total(&self) -> u64 {
        self.malformed.values().sum()
    }

    /// Adds another pass's counters to this one.
    pub fn absorb(&mut self, other: &Self) {
        self.rows_read += other.rows_read;
        self.rows_kept += other.rows_kept;
        self.rows_filtered_year += other.rows_filtered_year;
        self.rows_filtered_geography += other.rows_filtered_geography;
        for (reason, count) in &other.malformed {
            *self.malformed.entry(*reason).or_default() += count;
        }
    }
}

/// Output of an aggregation pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    /// One aggregate per `(geography_id, year)`, sorted by that key.
    pub aggregates: Vec<GeographyYearAggregate>,
    /// Row accounting.
    pub stats: AggregateStats,
}

impl AggregateReport {
    /// Returns `true` when no row survived filtering.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aggregates.is_empty()
    }
}
