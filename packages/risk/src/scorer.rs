//! Closure risk scoring for one geography, scenario, and year.

use closure_risk_risk_models::{
    ClosureEstimate, GrowthPolicy, RuleSeverity, ScenarioResult, SizeBucket, TierCount,
};

use crate::RiskError;
use crate::model::ClosureModel;

/// Rule label reported when the growth policy suppresses closures.
pub const NO_CLOSURES_RULE: &str = "no_closures";

/// Cumulative probability of at least one closure event over `years`
/// independent years at `annual` probability each.
#[must_use]
pub fn cumulative_probability(annual: f64, years: i32) -> f64 {
    1.0 - (1.0 - annual).powi(years)
}

#[allow(clippy::cast_precision_loss)]
fn pct(part: f64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part / whole as f64 * 100.0
    }
}

#[allow(clippy::cast_precision_loss)]
fn pct_count(part: u64, whole: u64) -> f64 {
    pct(part as f64, whole)
}

/// Scores size buckets against a [`ClosureModel`] relative to a base year.
#[derive(Debug, Clone, PartialEq)]
pub struct Scorer {
    model: ClosureModel,
    base_year: i32,
}

impl Scorer {
    #[must_use]
    pub const fn new(model: ClosureModel, base_year: i32) -> Self {
        Self { model, base_year }
    }

    #[must_use]
    pub const fn model(&self) -> &ClosureModel {
        &self.model
    }

    #[must_use]
    pub const fn base_year(&self) -> i32 {
        self.base_year
    }

    /// Years of closure exposure by `year`, never less than one.
    #[must_use]
    pub fn horizon_years(&self, year: i32) -> i32 {
        year.saturating_sub(self.base_year).max(1)
    }

    /// Scores one geography's buckets at `decline_ratio` in `year`.
    ///
    /// # Errors
    ///
    /// Returns [`RiskError::NoInstitutions`] if the buckets hold no
    /// institutions and [`RiskError::Configuration`] if the ratio is not a
    /// finite number.
    pub fn score(
        &self,
        geography_id: &str,
        scenario_id: &str,
        buckets: &[SizeBucket],
        decline_ratio: f64,
        year: i32,
    ) -> Result<ScenarioResult, RiskError> {
        if !decline_ratio.is_finite() {
            return Err(RiskError::Configuration {
                message: format!(
                    "decline ratio for {geography_id} / {scenario_id} in {year} is not finite"
                ),
            });
        }

        let institution_count: u64 = buckets.iter().map(|b| b.count).sum();
        if institution_count == 0 {
            return Err(RiskError::NoInstitutions {
                geography_id: geography_id.to_string(),
            });
        }

        let years = self.horizon_years(year);
        let suppress = decline_ratio <= 0.0 && self.model.growth_policy() == GrowthPolicy::NoClosures;

        let mut estimates = Vec::with_capacity(buckets.len());
        let mut current_value = 0.0;
        let mut projected_value = 0.0;
        let mut expected_closures = 0.0;
        let mut below_minimum = 0;
        let mut elevated_risk = 0;
        let mut severe_risk = 0;

        for bucket in buckets.iter().filter(|b| b.count > 0) {
            #[allow(clippy::cast_precision_loss)]
            let count = bucket.count as f64;
            let projected = bucket.avg_enrollment * (1.0 - decline_ratio);

            current_value += count * bucket.avg_enrollment;
            projected_value += count * projected;
            if projected < self.model.min_viable_size() {
                below_minimum += bucket.count;
            }

            let (rule, annual) = if suppress {
                (NO_CLOSURES_RULE.to_string(), 0.0)
            } else {
                let matched = self.model.rule_for(projected, decline_ratio);
                match matched.severity {
                    RuleSeverity::Severe => {
                        severe_risk += bucket.count;
                        elevated_risk += bucket.count;
                    }
                    RuleSeverity::Elevated => elevated_risk += bucket.count,
                    RuleSeverity::None => {}
                }
                (matched.label.to_string(), matched.annual_probability)
            };

            let cumulative = cumulative_probability(annual, years);
            let expected = count * cumulative;
            expected_closures += expected;

            estimates.push(ClosureEstimate {
                bucket: bucket.label.clone(),
                count: bucket.count,
                projected_enrollment: projected,
                rule,
                annual_probability: annual,
                cumulative_probability: cumulative,
                expected_closures: expected,
            });
        }

        let decline_pct = decline_ratio * 100.0;
        let tiers = self.model.tiers();
        let tier = tiers.tier_of(decline_pct);
        let tier_counts = tiers
            .labels
            .iter()
            .enumerate()
            .map(|(i, label)| {
                let count = if i == tier { institution_count } else { 0 };
                TierCount {
                    label: label.clone(),
                    count,
                    pct: pct_count(count, institution_count),
                }
            })
            .collect();

        Ok(ScenarioResult {
            geography_id: geography_id.to_string(),
            scenario_id: scenario_id.to_string(),
            year,
            decline_ratio,
            decline_pct,
            institution_count,
            current_value,
            projected_value,
            expected_closures,
            expected_closures_pct: pct(expected_closures, institution_count),
            tiers: tier_counts,
            below_minimum,
            below_minimum_pct: pct_count(below_minimum, institution_count),
            elevated_risk,
            elevated_risk_pct: pct_count(elevated_risk, institution_count),
            severe_risk,
            severe_risk_pct: pct_count(severe_risk, institution_count),
            buckets: estimates,
        })
    }
}

#[cfg(test)]
mod tests {
    use closure_risk_risk_models::{
        BucketDefinition, ClosureRule, ModelDefinition, TierBreakpoints,
    };

    use super::*;

    fn model(growth_policy: GrowthPolicy) -> ClosureModel {
        ClosureModel::new(ModelDefinition {
            name: "golden".to_string(),
            description: String::new(),
            buckets: vec![
                BucketDefinition {
                    label: "small".to_string(),
                    upper: Some(300.0),
                    average: 150.0,
                },
                BucketDefinition {
                    label: "large".to_string(),
                    upper: None,
                    average: 750.0,
                },
            ],
            rules: vec![ClosureRule {
                label: "small_steep".to_string(),
                projected_below: Some(200.0),
                decline_above: Some(0.25),
                annual_probability: 0.02,
                severity: RuleSeverity::Severe,
            }],
            default_probability: Some(0.0075),
            tiers: TierBreakpoints::default(),
            min_viable_size: 110.0,
            growth_policy,
        })
        .unwrap()
    }

    fn buckets(small: u64, large: u64) -> Vec<SizeBucket> {
        vec![
            SizeBucket {
                label: "small".to_string(),
                avg_enrollment: 150.0,
                count: small,
            },
            SizeBucket {
                label: "large".to_string(),
                avg_enrollment: 750.0,
                count: large,
            },
        ]
    }

    #[test]
    fn golden_two_bucket_estimate() {
        let scorer = Scorer::new(model(GrowthPolicy::Background), 2025);
        let result = scorer
            .score("06", "census_baseline", &buckets(50, 50), 0.30, 2035)
            .unwrap();

        let expected = 50.0 * (1.0 - 0.98_f64.powi(10)) + 50.0 * (1.0 - 0.9925_f64.powi(10));
        assert!((result.expected_closures - expected).abs() < 1e-9);
        assert!((50.0 * (1.0 - 0.98_f64.powi(10)) - 9.146_359_655_622_663).abs() < 1e-9);
        assert!((result.expected_closures_pct - expected).abs() < 1e-9);

        assert_eq!(result.buckets[0].rule, "small_steep");
        assert_eq!(result.buckets[1].rule, "default");
        assert_eq!(result.severe_risk, 50);
        assert_eq!(result.elevated_risk, 50);
        assert!((result.severe_risk_pct - 50.0).abs() < 1e-9);

        // 150 * 0.7 = 105 falls below 110.
        assert_eq!(result.below_minimum, 50);
        assert!((result.projected_value - 0.7 * 50.0 * 900.0).abs() < 1e-6);

        // 30% decline lands in the orange tier.
        let orange = result.tiers.iter().find(|t| t.label == "orange").unwrap();
        assert_eq!(orange.count, 100);
    }

    #[test]
    fn tier_counts_sum_to_institutions() {
        let scorer = Scorer::new(model(GrowthPolicy::Background), 2025);
        for (small, large) in [(1, 0), (7, 13), (0, 42), (250, 3)] {
            for step in 0..=20 {
                let ratio = f64::from(step) / 20.0;
                let result = scorer
                    .score("26", "s", &buckets(small, large), ratio, 2040)
                    .unwrap();
                let sum: u64 = result.tiers.iter().map(|t| t.count).sum();
                assert_eq!(sum, small + large);
                assert!(result.expected_closures >= 0.0);
                let pct_sum: f64 = result.tiers.iter().map(|t| t.pct).sum();
                assert!((pct_sum - 100.0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn cumulative_probability_grows_with_horizon() {
        assert!((cumulative_probability(0.04, 1) - 0.04).abs() < 1e-15);
        let mut previous = 0.0;
        for years in 1..=30 {
            let cum = cumulative_probability(0.015, years);
            assert!(cum >= previous);
            previous = cum;
        }
    }

    #[test]
    fn horizon_is_at_least_one_year() {
        let scorer = Scorer::new(model(GrowthPolicy::Background), 2025);
        assert_eq!(scorer.horizon_years(2025), 1);
        assert_eq!(scorer.horizon_years(2020), 1);
        assert_eq!(scorer.horizon_years(2040), 15);

        let same_year = scorer.score("06", "s", &buckets(0, 10), 0.0, 2025).unwrap();
        assert!((same_year.expected_closures - 10.0 * 0.0075).abs() < 1e-12);
    }

    #[test]
    fn growth_policy() {
        let background = Scorer::new(model(GrowthPolicy::Background), 2025);
        let none = Scorer::new(model(GrowthPolicy::NoClosures), 2025);

        let grown = background.score("49", "s", &buckets(5, 5), -0.1, 2035).unwrap();
        assert!(grown.expected_closures > 0.0);
        assert_eq!(grown.tiers[0].count, 10);

        let suppressed = none.score("49", "s", &buckets(5, 5), -0.1, 2035).unwrap();
        assert!(suppressed.expected_closures.abs() < f64::EPSILON);
        assert_eq!(suppressed.buckets[0].rule, NO_CLOSURES_RULE);

        let flat = none.score("49", "s", &buckets(5, 5), 0.0, 2035).unwrap();
        assert!(flat.expected_closures.abs() < f64::EPSILON);
    }

    #[test]
    fn empty_geography_is_an_error() {
        let scorer = Scorer::new(model(GrowthPolicy::Background), 2025);
        assert!(matches!(
            scorer.score("02", "s", &buckets(0, 0), 0.2, 2030),
            Err(RiskError::NoInstitutions { .. })
        ));
        assert!(scorer.score("02", "s", &buckets(1, 0), f64::NAN, 2030).is_err());
    }
}
