//! Roll-ups and reshaping of finished aggregates.

use std::collections::BTreeMap;

use closure_risk_geography_models::{GeographyLevel, state_fips_of};
use closure_risk_population_models::GeographyYearAggregate;

use crate::aggregator::{from_fixed, to_fixed};

/// Sums county aggregates into state aggregates by FIPS prefix.
///
/// State-level inputs pass through unchanged (and are summed with any
/// counties of the same state). Keys that do not belong to one of the 50
/// states + DC are dropped.
#[must_use]
pub fn rollup_to_states(aggregates: &[GeographyYearAggregate]) -> Vec<GeographyYearAggregate> {
    let mut sums: BTreeMap<(&'static str, i32), (i128, BTreeMap<&str, i128>)> = BTreeMap::new();
    let mut dropped = 0usize;

    for agg in aggregates {
        let Some(state) = state_fips_of(&agg.geography_id) else {
            dropped += 1;
            continue;
        };

        let (total, subtotals) = sums.entry((state, agg.year)).or_default();
        *total = total.saturating_add(to_fixed(agg.total));
        for (name, value) in &agg.subtotals {
            let sum = subtotals.entry(name.as_str()).or_default();
            *sum = sum.saturating_add(to_fixed(*value));
        }
    }

    if dropped > 0 {
        log::debug!("State roll-up dropped {dropped} aggregates outside the 50 states + DC");
    }

    sums.into_iter()
        .map(|((state, year), (total, subtotals))| GeographyYearAggregate {
            geography_id: state.to_string(),
            year,
            total: from_fixed(total),
            subtotals: subtotals
                .into_iter()
                .map(|(name, sum)| (name.to_string(), from_fixed(sum)))
                .collect(),
        })
        .collect()
}

/// Returns `true` if every aggregate is already keyed at state level.
#[must_use]
pub fn is_state_level(aggregates: &[GeographyYearAggregate]) -> bool {
    aggregates
        .iter()
        .all(|a| GeographyLevel::of(&a.geography_id) == GeographyLevel::State)
}

/// Pivots aggregates into one sparse `{year: value}` series per geography
/// for the named metric (`"total"` or a subtotal name).
///
/// Aggregates lacking the metric are skipped.
#[must_use]
pub fn metric_series(
    aggregates: &[GeographyYearAggregate],
    metric: &str,
) -> BTreeMap<String, BTreeMap<i32, f64>> {
    let mut out: BTreeMap<String, BTreeMap<i32, f64>> = BTreeMap::new();
    for agg in aggregates {
        if let Some(value) = agg.metric(metric) {
            out.entry(agg.geography_id.clone())
                .or_default()
                .insert(agg.year, value);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agg(geo: &str, year: i32, total: f64, elder: f64) -> GeographyYearAggregate {
        GeographyYearAggregate {
            geography_id: geo.to_string(),
            year,
            total,
            subtotals: BTreeMap::from([("65plus".to_string(), elder)]),
        }
    }

    #[test]
    fn rolls_counties_into_states() {
        let counties = vec![
            agg("06001", 2030, 100.0, 10.0),
            agg("06003", 2030, 50.5, 5.25),
            agg("26163", 2030, 70.0, 7.0),
            agg("72001", 2030, 999.0, 99.0),
            agg("06001", 2040, 90.0, 12.0),
        ];
        let states = rollup_to_states(&counties);

        assert_eq!(states.len(), 3);
        assert!(is_state_level(&states));
        assert!(!is_state_level(&counties));

        let ca_2030 = &states[0];
        assert_eq!(ca_2030.geography_id, "06");
        assert_eq!(ca_2030.year, 2030);
        assert!((ca_2030.total - 150.5).abs() < 1e-9);
        assert!((ca_2030.metric("65plus").unwrap() - 15.25).abs() < 1e-9);

        assert_eq!(states[1].geography_id, "06");
        assert_eq!(states[1].year, 2040);
        assert_eq!(states[2].geography_id, "26");
    }

    #[test]
    fn pivots_metric_series() {
        let aggs = vec![
            agg("06", 2020, 100.0, 10.0),
            agg("06", 2030, 120.0, 20.0),
            agg("26", 2020, 80.0, 8.0),
        ];

        let totals = metric_series(&aggs, "total");
        assert_eq!(totals["06"].len(), 2);
        assert!((totals["06"][&2030] - 120.0).abs() < f64::EPSILON);

        let elder = metric_series(&aggs, "65plus");
        assert!((elder["26"][&2020] - 8.0).abs() < f64::EPSILON);

        assert!(metric_series(&aggs, "85plus").is_empty());
    }
}
