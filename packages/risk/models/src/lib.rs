#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Closure-risk model and result types.
//!
//! [`ModelDefinition`] is the serialized form of a closure model (size
//! buckets, ordered rule table, tier breakpoints) as it appears in preset
//! and run-config TOML. Scoring produces one [`ScenarioResult`] per
//! geography, scenario, and year.

use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// How risky an institution matched by a rule is considered.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum RuleSeverity {
    /// Ordinary background risk.
    #[default]
    None,
    /// Elevated risk.
    Elevated,
    /// Severe risk. Also counted as elevated.
    Severe,
}

/// How a composite ratio at or below zero (no decline, or growth) is
/// scored.
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
pub enum GrowthPolicy {
    /// Evaluate the rule table as usual.
    #[default]
    Background,
    /// Expect no closures at all.
    NoClosures,
}

/// One size bucket in a model definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketDefinition {
    /// Bucket label (e.g. `"100_199"`).
    pub label: String,
    /// Institutions with enrollment strictly below this fall in the bucket.
    /// `None` marks the open-ended top bucket.
    #[serde(default)]
    pub upper: Option<f64>,
    /// Representative enrollment for the bucket. For the open-ended bucket
    /// this is a minimum; the mean of its members is used if larger.
    pub average: f64,
}

/// One row of the ordered closure rule table.
///
/// A rule matches when every condition it sets holds. A rule with no
/// conditions matches everything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureRule {
    /// Rule label (e.g. `"small_steep"`).
    pub label: String,
    /// Matches when projected enrollment is strictly below this.
    #[serde(default)]
    pub projected_below: Option<f64>,
    /// Matches when the decline ratio is strictly above this.
    #[serde(default)]
    pub decline_above: Option<f64>,
    /// Annual closure probability in `[0, 1]`.
    pub annual_probability: f64,
    /// Severity tally the rule contributes to.
    #[serde(default)]
    pub severity: RuleSeverity,
}

impl ClosureRule {
    /// Returns `true` if this rule applies.
    #[must_use]
    pub fn matches(&self, projected: f64, decline_ratio: f64) -> bool {
        self.projected_below.is_none_or(|limit| projected < limit)
            && self.decline_above.is_none_or(|limit| decline_ratio > limit)
    }

    /// Returns `true` if the rule has no conditions.
    #[must_use]
    pub const fn is_catch_all(&self) -> bool {
        self.projected_below.is_none() && self.decline_above.is_none()
    }

    /// Returns `true` if every input `other` matches is also
    /// matched by `self`.
    #[must_use]
    pub fn subsumes(&self, other: &Self) -> bool {
        let projected_wider = match (self.projected_below, other.projected_below) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(mine), Some(theirs)) => mine >= theirs,
        };
        let decline_wider = match (self.decline_above, other.decline_above) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(mine), Some(theirs)) => mine <= theirs,
        };
        projected_wider && decline_wider
    }
}

/// Risk tiers by decline percentage.
///
/// An institution falls in the first tier whose breakpoint its decline
/// percentage is strictly below; past the last breakpoint it falls in the
/// last tier. There is always one more label than breakpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierBreakpoints {
    /// Increasing breakpoints in percent.
    pub breakpoints: Vec<f64>,
    /// Tier labels, lowest risk first.
    pub labels: Vec<String>,
}

impl Default for TierBreakpoints {
    fn default() -> Self {
        Self {
            breakpoints: vec![10.0, 25.0, 50.0],
            labels: ["green", "yellow", "orange", "red"]
                .into_iter()
                .map(str::to_string)
                .collect(),
        }
    }
}

impl TierBreakpoints {
    /// Returns the index of the tier `decline_pct` falls in.
    #[must_use]
    pub fn tier_of(&self, decline_pct: f64) -> usize {
        self.breakpoints
            .iter()
            .position(|b| decline_pct < *b)
            .unwrap_or(self.breakpoints.len())
    }
}

fn default_min_viable_size() -> f64 {
    100.0
}

/// Serialized closure model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDefinition {
    /// Short name (preset key).
    #[serde(default)]
    pub name: String,
    /// One-line description.
    #[serde(default)]
    pub description: String,
    /// Size buckets, smallest first.
    pub buckets: Vec<BucketDefinition>,
    /// Ordered rule table; the first match wins.
    pub rules: Vec<ClosureRule>,
    /// Probability when no rule matches. May be omitted if the last rule
    /// is a catch-all.
    #[serde(default)]
    pub default_probability: Option<f64>,
    /// Decline tiers.
    #[serde(default)]
    pub tiers: TierBreakpoints,
    /// Institutions projected below this size count as below minimum.
    #[serde(default = "default_min_viable_size")]
    pub min_viable_size: f64,
    /// Treatment of no-decline and growth ratios.
    #[serde(default)]
    pub growth_policy: GrowthPolicy,
}

/// One institution from a directory extract.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Institution {
    /// Geography the institution is counted in.
    pub geography_id: String,
    /// Directory identifier, unique within the extract.
    pub institution_id: String,
    /// Current enrollment.
    pub enrollment: f64,
}

/// Institutions of one size bucket in one geography.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SizeBucket {
    /// Bucket label.
    pub label: String,
    /// Representative current enrollment.
    pub avg_enrollment: f64,
    /// Number of institutions.
    pub count: u64,
}

/// Scoring detail for one bucket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosureEstimate {
    /// Bucket label.
    pub bucket: String,
    /// Institutions in the bucket.
    pub count: u64,
    /// Representative enrollment after decline.
    pub projected_enrollment: f64,
    /// Label of the rule that matched (`"default"` if none did).
    pub rule: String,
    /// Annual closure probability.
    pub annual_probability: f64,
    /// Cumulative closure probability over the horizon.
    pub cumulative_probability: f64,
    /// `count * cumulative_probability`.
    pub expected_closures: f64,
}

/// Institution count in one risk tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TierCount {
    /// Tier label.
    pub label: String,
    /// Institutions in the tier.
    pub count: u64,
    /// Percent of the institution stock.
    pub pct: f64,
}

/// Score for one geography under one scenario in one year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenarioResult {
    /// Geography key.
    pub geography_id: String,
    /// Scenario combination id.
    pub scenario_id: String,
    /// Target year.
    pub year: i32,
    /// Composite decline ratio (`1.0` = total loss, negative = growth).
    pub decline_ratio: f64,
    /// `decline_ratio * 100`.
    pub decline_pct: f64,
    /// Institutions scored.
    pub institution_count: u64,
    /// Sum of representative enrollment before decline.
    pub current_value: f64,
    /// Sum of representative enrollment after decline.
    pub projected_value: f64,
    /// Expected closures over the horizon. Never negative.
    pub expected_closures: f64,
    /// Expected closures as percent of the institution stock.
    pub expected_closures_pct: f64,
    /// Tier counts, summing to `institution_count`.
    pub tiers: Vec<TierCount>,
    /// Institutions projected below the minimum viable size.
    pub below_minimum: u64,
    /// `below_minimum` as percent of the stock.
    pub below_minimum_pct: f64,
    /// Institutions matched by elevated or severe rules.
    pub elevated_risk: u64,
    /// `elevated_risk` as percent of the stock.
    pub elevated_risk_pct: f64,
    /// Institutions matched by severe rules.
    pub severe_risk: u64,
    /// `severe_risk` as percent of the stock.
    pub severe_risk_pct: f64,
    /// Per-bucket detail.
    pub buckets: Vec<ClosureEstimate>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(projected_below: Option<f64>, decline_above: Option<f64>) -> ClosureRule {
        ClosureRule {
            label: "r".to_string(),
            projected_below,
            decline_above,
            annual_probability: 0.01,
            severity: RuleSeverity::None,
        }
    }

    #[test]
    fn rule_matching_is_strict() {
        let r = rule(Some(200.0), Some(0.25));
        assert!(r.matches(199.0, 0.26));
        assert!(!r.matches(200.0, 0.26));
        assert!(!r.matches(150.0, 0.25));
        assert!(rule(None, None).matches(1e9, -1.0));
    }

    #[test]
    fn subsumption() {
        let catch_all = rule(None, None);
        let small = rule(Some(100.0), None);
        let small_steep = rule(Some(200.0), Some(0.25));

        assert!(catch_all.subsumes(&small));
        assert!(!small.subsumes(&catch_all));
        assert!(!small.subsumes(&small_steep));
        assert!(!small_steep.subsumes(&small));
        assert!(rule(Some(300.0), Some(0.10)).subsumes(&small_steep));
    }

    #[test]
    fn default_tiers() {
        let tiers = TierBreakpoints::default();
        assert_eq!(tiers.tier_of(-5.0), 0);
        assert_eq!(tiers.tier_of(9.99), 0);
        assert_eq!(tiers.tier_of(10.0), 1);
        assert_eq!(tiers.tier_of(49.0), 2);
        assert_eq!(tiers.tier_of(50.0), 3);
        assert_eq!(tiers.tier_of(100.0), 3);
    }
}
