#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Projection types: sparse year series, decline trajectories, and the
//! grade-pipeline parameters of the cohort-lag model.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// A sparse `{year: value}` series for one geography.
///
/// Years are kept in a [`BTreeMap`], so they are always strictly
/// increasing and unique.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct YearSeries {
    /// Geography the series belongs to.
    pub geography_id: String,
    /// Known values by year.
    pub values: BTreeMap<i32, f64>,
}

impl YearSeries {
    /// Creates a series from `(year, value)` points. Later points for the
    /// same year replace earlier ones; non-finite values are dropped.
    #[must_use]
    pub fn new(
        geography_id: impl Into<String>,
        points: impl IntoIterator<Item = (i32, f64)>,
    ) -> Self {
        Self {
            geography_id: geography_id.into(),
            values: points.into_iter().filter(|(_, v)| v.is_finite()).collect(),
        }
    }

    /// Returns `true` if the series has no known years.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Returns the known value for `year`, if any.
    #[must_use]
    pub fn get(&self, year: i32) -> Option<f64> {
        self.values.get(&year).copied()
    }

    /// Returns the earliest and latest known years.
    #[must_use]
    pub fn span(&self) -> Option<(i32, i32)> {
        let first = *self.values.keys().next()?;
        let last = *self.values.keys().next_back()?;
        Some((first, last))
    }
}

/// How a series is extended outside its known years.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ExtrapolationPolicy {
    /// Hold the nearest boundary value flat.
    #[default]
    InterpolateBounded,
    /// Extend the slope between the two known years nearest the boundary.
    ExtrapolateTrend,
}

/// A birth (or enrollment) decline trajectory for one geography under one
/// scenario.
///
/// `decline_pct` is in percent; negative values mean growth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScenarioTrajectory {
    /// Scenario the trajectory belongs to (e.g. `"census"`).
    pub scenario_id: String,
    /// Geography key.
    pub geography_id: String,
    /// Decline in percent by year.
    pub decline_pct: BTreeMap<i32, f64>,
}

impl ScenarioTrajectory {
    /// Creates an empty trajectory.
    #[must_use]
    pub fn new(scenario_id: impl Into<String>, geography_id: impl Into<String>) -> Self {
        Self {
            scenario_id: scenario_id.into(),
            geography_id: geography_id.into(),
            decline_pct: BTreeMap::new(),
        }
    }

    /// Returns the decline for `year`, treating years the trajectory does
    /// not cover as no decline.
    #[must_use]
    pub fn decline_at(&self, year: i32) -> f64 {
        self.decline_pct.get(&year).copied().unwrap_or(0.0)
    }
}

/// Grade-pipeline parameters for the cohort-lag model.
///
/// An institution serving `pipeline_length` consecutive single-year
/// cohorts, where the youngest enrolled cohort is `entry_age` years old,
/// holds in year `Y` the birth years
/// `Y - entry_age - (pipeline_length - 1) ..= Y - entry_age`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohortPipeline {
    /// Number of grades (13 for K-12).
    pub pipeline_length: i32,
    /// Age of the youngest enrolled cohort (5 for kindergarten).
    pub entry_age: i32,
    /// Last birth year not yet affected by the decline.
    pub cutoff_year: i32,
}

impl Default for CohortPipeline {
    fn default() -> Self {
        Self {
            pipeline_length: 13,
            entry_age: 5,
            cutoff_year: 2022,
        }
    }
}

impl CohortPipeline {
    /// Returns the inclusive range of birth years enrolled in `year`.
    #[must_use]
    pub const fn enrolled_birth_years(&self, year: i32) -> (i32, i32) {
        let youngest = year - self.entry_age;
        (youngest - (self.pipeline_length - 1), youngest)
    }
}

/// Enrollment decline in one target year, derived from a birth trajectory.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentDecline {
    /// Target year.
    pub year: i32,
    /// Enrolled birth years after the cutoff year.
    pub affected_grades: u32,
    /// Mean birth decline (percent) over the affected birth years.
    pub avg_birth_decline: f64,
    /// `affected_grades / pipeline_length`.
    pub pipeline_fraction: f64,
    /// `pipeline_fraction * avg_birth_decline`, in percent.
    pub enrollment_decline_pct: f64,
}

impl EnrollmentDecline {
    /// Returns the decline as a fraction (`1.0` = total loss).
    #[must_use]
    pub fn ratio(&self) -> f64 {
        self.enrollment_decline_pct / 100.0
    }
}

/// How a participation share is projected forward.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ShareMethod {
    /// Mean share over the window, held constant.
    Hold,
    /// Least-squares line over the window, evaluated at the target year.
    Trend,
}
