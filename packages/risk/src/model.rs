//! Validated closure model.

use std::collections::BTreeSet;

use closure_risk_risk_models::{
    BucketDefinition, ClosureRule, GrowthPolicy, ModelDefinition, RuleSeverity, TierBreakpoints,
};

use crate::RiskError;

/// Label reported for inputs that fall through to the default probability.
pub const DEFAULT_RULE: &str = "default";

/// The rule (or default) chosen for one bucket.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuleMatch<'a> {
    /// Matched rule label or [`DEFAULT_RULE`].
    pub label: &'a str,
    /// Annual closure probability.
    pub annual_probability: f64,
    /// Severity tally.
    pub severity: RuleSeverity,
}

/// A closure model whose rule table, buckets, and tiers have been checked.
///
/// Exactly one rule or the default applies to every input, and every rule
/// in the table can be reached.
#[derive(Debug, Clone, PartialEq)]
pub struct ClosureModel {
    definition: ModelDefinition,
}

impl ClosureModel {
    /// Validates a definition.
    ///
    /// # Errors
    ///
    /// Returns [`RiskError::Configuration`] describing the first problem
    /// found.
    pub fn new(definition: ModelDefinition) -> Result<Self, RiskError> {
        validate_buckets(&definition.buckets)?;
        validate_rules(&definition.rules, definition.default_probability)?;
        validate_tiers(&definition.tiers)?;

        if !(definition.min_viable_size.is_finite() && definition.min_viable_size >= 0.0) {
            return Err(config(format!(
                "minimum viable size {} must be a non-negative number",
                definition.min_viable_size
            )));
        }

        Ok(Self { definition })
    }

    /// Parses and validates a TOML definition.
    ///
    /// # Errors
    ///
    /// Returns [`RiskError::Parse`] or [`RiskError::Configuration`].
    pub fn from_toml(source: &str) -> Result<Self, RiskError> {
        Self::new(toml::from_str(source)?)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    #[must_use]
    pub const fn definition(&self) -> &ModelDefinition {
        &self.definition
    }

    #[must_use]
    pub fn buckets(&self) -> &[BucketDefinition] {
        &self.definition.buckets
    }

    #[must_use]
    pub fn rules(&self) -> &[ClosureRule] {
        &self.definition.rules
    }

    #[must_use]
    pub const fn tiers(&self) -> &TierBreakpoints {
        &self.definition.tiers
    }

    #[must_use]
    pub const fn min_viable_size(&self) -> f64 {
        self.definition.min_viable_size
    }

    #[must_use]
    pub const fn growth_policy(&self) -> GrowthPolicy {
        self.definition.growth_policy
    }

    /// Picks the first matching rule, or the default.
    #[must_use]
    pub fn rule_for(&self, projected: f64, decline_ratio: f64) -> RuleMatch<'_> {
        self.definition
            .rules
            .iter()
            .find(|rule| rule.matches(projected, decline_ratio))
            .map_or_else(
                || RuleMatch {
                    label: DEFAULT_RULE,
                    // Validation guarantees a default when no catch-all exists.
                    annual_probability: self.definition.default_probability.unwrap_or(0.0),
                    severity: RuleSeverity::None,
                },
                |rule| RuleMatch {
                    label: &rule.label,
                    annual_probability: rule.annual_probability,
                    severity: rule.severity,
                },
            )
    }
}

fn config(message: String) -> RiskError {
    RiskError::Configuration { message }
}

fn is_probability(p: f64) -> bool {
    (0.0..=1.0).contains(&p)
}

fn validate_buckets(buckets: &[BucketDefinition]) -> Result<(), RiskError> {
    if buckets.is_empty() {
        return Err(config("model defines no size buckets".to_string()));
    }

    let mut labels = BTreeSet::new();
    let mut previous_upper = f64::NEG_INFINITY;
    for (i, bucket) in buckets.iter().enumerate() {
        if bucket.label.is_empty() || !labels.insert(bucket.label.as_str()) {
            return Err(config(format!("bucket label {:?} is empty or repeated", bucket.label)));
        }
        if !(bucket.average.is_finite() && bucket.average > 0.0) {
            return Err(config(format!(
                "bucket {:?} average {} must be positive",
                bucket.label, bucket.average
            )));
        }
        match bucket.upper {
            Some(upper) if upper.is_finite() && upper > previous_upper => previous_upper = upper,
            Some(upper) => {
                return Err(config(format!(
                    "bucket {:?} upper bound {upper} is not above the previous bucket",
                    bucket.label
                )));
            }
            None if i + 1 == buckets.len() => {}
            None => {
                return Err(config(format!(
                    "open-ended bucket {:?} must be the last bucket",
                    bucket.label
                )));
            }
        }
    }

    Ok(())
}

fn validate_rules(rules: &[ClosureRule], default_probability: Option<f64>) -> Result<(), RiskError> {
    if let Some(p) = default_probability
        && !is_probability(p)
    {
        return Err(config(format!("default probability {p} is outside [0, 1]")));
    }

    let mut labels = BTreeSet::new();
    for (i, rule) in rules.iter().enumerate() {
        if rule.label.is_empty() || rule.label == DEFAULT_RULE || !labels.insert(rule.label.as_str()) {
            return Err(config(format!("rule label {:?} is empty, reserved, or repeated", rule.label)));
        }
        if !is_probability(rule.annual_probability) {
            return Err(config(format!(
                "rule {:?} probability {} is outside [0, 1]",
                rule.label, rule.annual_probability
            )));
        }
        // Projected size is never negative and decline ratios never exceed 1.
        if rule.projected_below.is_some_and(|limit| limit.is_nan() || limit <= 0.0)
            || rule.decline_above.is_some_and(|limit| limit.is_nan() || limit >= 1.0)
        {
            return Err(config(format!("rule {:?} can never match", rule.label)));
        }
        if let Some(earlier) = rules[..i].iter().find(|earlier| earlier.subsumes(rule)) {
            return Err(config(format!(
                "rule {:?} is unreachable behind rule {:?}",
                rule.label, earlier.label
            )));
        }
    }

    let has_catch_all = rules.iter().any(ClosureRule::is_catch_all);
    if !has_catch_all && default_probability.is_none() {
        return Err(config(
            "rule table has no catch-all rule and no default probability".to_string(),
        ));
    }
    if has_catch_all && default_probability.is_some() {
        log::warn!("Default probability is unreachable behind a catch-all rule");
    }

    Ok(())
}

fn validate_tiers(tiers: &TierBreakpoints) -> Result<(), RiskError> {
    if tiers.labels.len() != tiers.breakpoints.len() + 1 {
        return Err(config(format!(
            "{} tier breakpoints need {} labels, got {}",
            tiers.breakpoints.len(),
            tiers.breakpoints.len() + 1,
            tiers.labels.len()
        )));
    }
    if tiers.breakpoints.iter().any(|b| !b.is_finite())
        || tiers.breakpoints.windows(2).any(|w| w[0] >= w[1])
    {
        return Err(config("tier breakpoints must be finite and increasing".to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(
        label: &str,
        projected_below: Option<f64>,
        decline_above: Option<f64>,
        annual_probability: f64,
        severity: RuleSeverity,
    ) -> ClosureRule {
        ClosureRule {
            label: label.to_string(),
            projected_below,
            decline_above,
            annual_probability,
            severity,
        }
    }

    fn bucket(label: &str, upper: Option<f64>, average: f64) -> BucketDefinition {
        BucketDefinition {
            label: label.to_string(),
            upper,
            average,
        }
    }

    fn definition() -> ModelDefinition {
        ModelDefinition {
            name: "test".to_string(),
            description: String::new(),
            buckets: vec![
                bucket("small", Some(200.0), 150.0),
                bucket("large", None, 750.0),
            ],
            rules: vec![
                rule("tiny", Some(100.0), None, 0.04, RuleSeverity::Severe),
                rule("steep", None, Some(0.10), 0.015, RuleSeverity::Elevated),
            ],
            default_probability: Some(0.0075),
            tiers: TierBreakpoints::default(),
            min_viable_size: 100.0,
            growth_policy: GrowthPolicy::Background,
        }
    }

    #[test]
    fn first_match_wins() {
        let model = ClosureModel::new(definition()).unwrap();

        let m = model.rule_for(80.0, 0.5);
        assert_eq!(m.label, "tiny");
        assert_eq!(m.severity, RuleSeverity::Severe);

        let m = model.rule_for(400.0, 0.2);
        assert_eq!(m.label, "steep");

        let m = model.rule_for(400.0, 0.05);
        assert_eq!(m.label, DEFAULT_RULE);
        assert!((m.annual_probability - 0.0075).abs() < f64::EPSILON);
    }

    #[test]
    fn rejects_unreachable_rules() {
        let mut d = definition();
        d.rules.insert(0, rule("all", None, None, 0.01, RuleSeverity::None));
        assert!(matches!(ClosureModel::new(d), Err(RiskError::Configuration { .. })));

        let mut d = definition();
        d.rules.push(rule("tiny_again", Some(50.0), Some(0.3), 0.1, RuleSeverity::None));
        assert!(ClosureModel::new(d).is_err());
    }

    #[test]
    fn rejects_rules_that_never_match() {
        let mut d = definition();
        d.rules.push(rule("impossible", None, Some(1.0), 0.1, RuleSeverity::None));
        assert!(ClosureModel::new(d).is_err());

        let mut d = definition();
        d.rules.insert(0, rule("negative", Some(0.0), None, 0.1, RuleSeverity::None));
        assert!(ClosureModel::new(d).is_err());
    }

    #[test]
    fn requires_default_or_catch_all() {
        let mut d = definition();
        d.default_probability = None;
        assert!(ClosureModel::new(d.clone()).is_err());

        d.rules.push(rule("rest", None, None, 0.01, RuleSeverity::None));
        let model = ClosureModel::new(d).unwrap();
        assert_eq!(model.rule_for(1000.0, 0.0).label, "rest");
    }

    #[test]
    fn rejects_bad_probabilities_and_labels() {
        let mut d = definition();
        d.rules[0].annual_probability = 1.5;
        assert!(ClosureModel::new(d).is_err());

        let mut d = definition();
        d.default_probability = Some(-0.1);
        assert!(ClosureModel::new(d).is_err());

        let mut d = definition();
        d.rules[1].label = "tiny".to_string();
        assert!(ClosureModel::new(d).is_err());
    }

    #[test]
    fn rejects_bad_buckets() {
        let mut d = definition();
        d.buckets.reverse();
        assert!(ClosureModel::new(d).is_err());

        let mut d = definition();
        d.buckets[0].upper = Some(900.0);
        d.buckets.push(bucket("mid", Some(500.0), 300.0));
        assert!(ClosureModel::new(d).is_err());

        let mut d = definition();
        d.buckets.clear();
        assert!(ClosureModel::new(d).is_err());
    }

    #[test]
    fn rejects_bad_tiers() {
        let mut d = definition();
        d.tiers.labels.pop();
        assert!(ClosureModel::new(d).is_err());

        let mut d = definition();
        d.tiers.breakpoints = vec![25.0, 10.0, 50.0];
        assert!(ClosureModel::new(d).is_err());
    }
}
