//! Scenario composition.
//!
//! Independent decline sources (a demographic trend, a participation-share
//! trend) each form an axis of named entries. A scenario is one entry from
//! every axis; its composite ratio is the complement of the product of the
//! entries' survival fractions.

use std::collections::{BTreeMap, BTreeSet};

use closure_risk_risk_models::{ScenarioResult, SizeBucket};

use crate::RiskError;
use crate::scorer::Scorer;

/// Separator between entry ids in a scenario id.
pub const SCENARIO_SEPARATOR: &str = "_";

/// Combines decline ratios: `1 - (1 - a) * (1 - b) * ...`.
///
/// Zero is the identity and one is absorbing. Ratios above one are
/// treated as total loss.
#[must_use]
pub fn compose_ratios(ratios: impl IntoIterator<Item = f64>) -> f64 {
    let survival: f64 = ratios.into_iter().map(|r| 1.0 - r.min(1.0)).product();
    1.0 - survival
}

/// One named assumption on an axis, with ratios by geography and year.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AxisEntry {
    id: String,
    by_geography: BTreeMap<String, BTreeMap<i32, f64>>,
    uniform: BTreeMap<i32, f64>,
}

impl AxisEntry {
    /// An entry whose ratios differ per geography.
    #[must_use]
    pub fn per_geography(
        id: impl Into<String>,
        by_geography: BTreeMap<String, BTreeMap<i32, f64>>,
    ) -> Self {
        Self {
            id: id.into(),
            by_geography,
            uniform: BTreeMap::new(),
        }
    }

    /// An entry whose ratios apply to every geography.
    #[must_use]
    pub fn uniform(id: impl Into<String>, ratios: BTreeMap<i32, f64>) -> Self {
        Self {
            id: id.into(),
            by_geography: BTreeMap::new(),
            uniform: ratios,
        }
    }

    /// Sets the fallback ratios for geographies without their own.
    #[must_use]
    pub fn with_uniform(mut self, ratios: BTreeMap<i32, f64>) -> Self {
        self.uniform = ratios;
        self
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Geographies with their own ratios.
    pub fn geographies(&self) -> impl Iterator<Item = &str> {
        self.by_geography.keys().map(String::as_str)
    }

    /// Ratio for a geography in a year: the geography's own value, else
    /// the uniform value.
    #[must_use]
    pub fn ratio(&self, geography_id: &str, year: i32) -> Option<f64> {
        self.by_geography
            .get(geography_id)
            .and_then(|years| years.get(&year))
            .or_else(|| self.uniform.get(&year))
            .copied()
    }
}

/// An independent scenario dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct ScenarioAxis {
    name: String,
    max_decline: Option<f64>,
    entries: Vec<AxisEntry>,
}

impl ScenarioAxis {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            max_decline: None,
            entries: Vec::new(),
        }
    }

    /// Caps this axis's ratios before composition.
    #[must_use]
    pub const fn with_max_decline(mut self, max_decline: f64) -> Self {
        self.max_decline = Some(max_decline);
        self
    }

    #[must_use]
    pub fn with_entry(mut self, entry: AxisEntry) -> Self {
        self.entries.push(entry);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn entries(&self) -> &[AxisEntry] {
        &self.entries
    }

    fn capped(&self, ratio: f64) -> f64 {
        self.max_decline.map_or(ratio, |cap| ratio.min(cap))
    }
}

/// Drives a [`Scorer`] over every scenario combination and target year.
#[derive(Debug, Clone)]
pub struct ScenarioComposer<'a> {
    scorer: &'a Scorer,
    axes: Vec<ScenarioAxis>,
    years: Vec<i32>,
}

impl<'a> ScenarioComposer<'a> {
    /// Creates a composer after validating the axes.
    ///
    /// # Errors
    ///
    /// Returns [`RiskError::Configuration`] if there are no axes or target
    /// years, an axis has no entries, entry ids repeat within an axis, a
    /// cap is outside `[0, 1]`, or two combinations join to the same
    /// scenario id.
    pub fn new(
        scorer: &'a Scorer,
        axes: Vec<ScenarioAxis>,
        years: impl IntoIterator<Item = i32>,
    ) -> Result<Self, RiskError> {
        let fail = |message: String| Err(RiskError::Configuration { message });

        let years: Vec<i32> = years.into_iter().collect();
        if years.is_empty() {
            return fail("no target years to score".to_string());
        }
        if axes.is_empty() {
            return fail("no scenario axes".to_string());
        }
        for axis in &axes {
            if axis.entries.is_empty() {
                return fail(format!("scenario axis {:?} has no entries", axis.name));
            }
            if let Some(cap) = axis.max_decline
                && !(0.0..=1.0).contains(&cap)
            {
                return fail(format!(
                    "scenario axis {:?} cap {cap} is outside [0, 1]",
                    axis.name
                ));
            }
            for (i, entry) in axis.entries.iter().enumerate() {
                if entry.id.is_empty() || axis.entries[..i].iter().any(|e| e.id == entry.id) {
                    return fail(format!(
                        "scenario axis {:?} entry {:?} is empty or repeated",
                        axis.name, entry.id
                    ));
                }
            }
        }

        let composer = Self {
            scorer,
            axes,
            years,
        };

        let mut ids = BTreeSet::new();
        for id in composer.scenario_ids() {
            if ids.contains(&id) {
                return fail(format!(
                    "scenario id {id:?} is produced by more than one combination; \
                     entry ids joined with {SCENARIO_SEPARATOR:?} must stay distinct"
                ));
            }
            ids.insert(id);
        }

        Ok(composer)
    }

    #[must_use]
    pub fn axes(&self) -> &[ScenarioAxis] {
        &self.axes
    }

    /// Every combination of one entry per axis, in axis order.
    #[must_use]
    pub fn combinations(&self) -> Vec<Vec<&AxisEntry>> {
        self.axes.iter().fold(vec![Vec::new()], |acc, axis| {
            acc.iter()
                .flat_map(|prefix| {
                    axis.entries.iter().map(move |entry| {
                        let mut combo = prefix.clone();
                        combo.push(entry);
                        combo
                    })
                })
                .collect()
        })
    }

    /// Scenario ids in combination order.
    #[must_use]
    pub fn scenario_ids(&self) -> Vec<String> {
        self.combinations()
            .iter()
            .map(|combo| scenario_id(combo))
            .collect()
    }

    /// Composite ratio of one combination for a geography in a year.
    ///
    /// # Errors
    ///
    /// Returns [`RiskError::MissingRatio`] naming the first axis with no
    /// ratio for the geography and year.
    pub fn composite(
        &self,
        geography_id: &str,
        combination: &[&AxisEntry],
        year: i32,
    ) -> Result<f64, RiskError> {
        let mut ratios = Vec::with_capacity(combination.len());
        for (axis, entry) in self.axes.iter().zip(combination) {
            let ratio = entry
                .ratio(geography_id, year)
                .ok_or_else(|| RiskError::MissingRatio {
                    geography_id: geography_id.to_string(),
                    axis: axis.name.clone(),
                    entry: entry.id.clone(),
                    year,
                })?;
            ratios.push(axis.capped(ratio));
        }
        Ok(compose_ratios(ratios))
    }

    /// Scores every combination in every target year for one geography.
    ///
    /// # Errors
    ///
    /// Fails on the first combination that cannot be composed or scored;
    /// the geography should then be excluded as a whole.
    pub fn run_geography(
        &self,
        geography_id: &str,
        buckets: &[SizeBucket],
    ) -> Result<Vec<ScenarioResult>, RiskError> {
        let combinations = self.combinations();
        let mut results = Vec::with_capacity(combinations.len() * self.years.len());

        for combination in &combinations {
            let id = scenario_id(combination);
            for &year in &self.years {
                let ratio = self.composite(geography_id, combination, year)?;
                results.push(self.scorer.score(geography_id, &id, buckets, ratio, year)?);
            }
        }

        log::debug!("{geography_id}: scored {} scenario-years", results.len());
        Ok(results)
    }
}

fn scenario_id(combination: &[&AxisEntry]) -> String {
    combination
        .iter()
        .map(|entry| entry.id.as_str())
        .collect::<Vec<_>>()
        .join(SCENARIO_SEPARATOR)
}
