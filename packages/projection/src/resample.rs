//! Temporal resampling of sparse year series.

use std::collections::BTreeMap;
use std::ops::Bound;

use closure_risk_projection_models::{ExtrapolationPolicy, YearSeries};

use crate::ProjectionError;

/// Resamples [`YearSeries`] onto a target-year grid.
///
/// Known years are returned unchanged and gaps are filled linearly from
/// the nearest known year on each side. Years outside the known range are
/// handled by the [`ExtrapolationPolicy`]. An optional lower bound clamps
/// extrapolated values (trend extension can otherwise run negative).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Resampler {
    policy: ExtrapolationPolicy,
    lower_bound: Option<f64>,
}

impl Resampler {
    #[must_use]
    pub const fn new(policy: ExtrapolationPolicy) -> Self {
        Self {
            policy,
            lower_bound: None,
        }
    }

    /// Clamps extrapolated values to at least `bound`.
    #[must_use]
    pub const fn with_lower_bound(mut self, bound: f64) -> Self {
        self.lower_bound = Some(bound);
        self
    }

    #[must_use]
    pub const fn policy(&self) -> ExtrapolationPolicy {
        self.policy
    }

    /// Returns the value of `series` at every year in `targets`.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::NoData`] if the series has no known year.
    pub fn resample(
        &self,
        series: &YearSeries,
        targets: impl IntoIterator<Item = i32>,
    ) -> Result<BTreeMap<i32, f64>, ProjectionError> {
        if series.is_empty() {
            return Err(ProjectionError::NoData {
                geography_id: series.geography_id.clone(),
            });
        }

        Ok(targets
            .into_iter()
            .map(|year| (year, self.value_at(&series.values, year)))
            .collect())
    }

    fn value_at(&self, known: &BTreeMap<i32, f64>, year: i32) -> f64 {
        if let Some(value) = known.get(&year) {
            return *value;
        }

        let before = known.range(..year).next_back();
        let after = known
            .range((Bound::Excluded(year), Bound::Unbounded))
            .next();

        match (before, after) {
            (Some((&y1, &v1)), Some((&y2, &v2))) => interpolate(y1, v1, y2, v2, year),
            (Some(_), None) => {
                let mut tail = known.iter().rev();
                let last = tail.next();
                let prior = tail.next();
                self.extend(last, prior, year)
            }
            (None, Some(_)) => {
                let mut head = known.iter();
                let first = head.next();
                let next = head.next();
                self.extend(first, next, year)
            }
            (None, None) => 0.0,
        }
    }

    /// Extends from the boundary point `edge`, using `inner` (the next
    /// known point inward) for the slope.
    fn extend(&self, edge: Option<(&i32, &f64)>, inner: Option<(&i32, &f64)>, year: i32) -> f64 {
        let Some((&edge_year, &edge_value)) = edge else {
            return 0.0;
        };

        let value = match (self.policy, inner) {
            (ExtrapolationPolicy::ExtrapolateTrend, Some((&inner_year, &inner_value))) => {
                interpolate(inner_year, inner_value, edge_year, edge_value, year)
            }
            _ => edge_value,
        };

        self.lower_bound.map_or(value, |bound| value.max(bound))
    }
}

/// Evaluates the line through `(y1, v1)` and `(y2, v2)` at `t`.
fn interpolate(y1: i32, v1: f64, y2: i32, v2: f64, t: i32) -> f64 {
    if y1 == y2 {
        return v1;
    }
    let frac = f64::from(t - y1) / f64::from(y2 - y1);
    frac.mul_add(v2 - v1, v1)
}

/// Resamples `series` onto `targets` with `policy` and no lower bound.
///
/// # Errors
///
/// Returns [`ProjectionError::NoData`] if the series has no known year.
pub fn resample(
    series: &YearSeries,
    targets: impl IntoIterator<Item = i32>,
    policy: ExtrapolationPolicy,
) -> Result<BTreeMap<i32, f64>, ProjectionError> {
    Resampler::new(policy).resample(series, targets)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn exact_at_known_years() {
        let series = YearSeries::new("06", [(2020, 10.0), (2025, 17.5), (2040, 3.0)]);
        for policy in [
            ExtrapolationPolicy::InterpolateBounded,
            ExtrapolationPolicy::ExtrapolateTrend,
        ] {
            let out = resample(&series, [2020, 2025, 2040], policy).unwrap();
            assert!(approx(out[&2020], 10.0));
            assert!(approx(out[&2025], 17.5));
            assert!(approx(out[&2040], 3.0));
        }
    }

    #[test]
    fn interpolates_between_known_years() {
        let series = YearSeries::new("06", [(2025, 100.0), (2030, 150.0)]);
        let out = resample(&series, [2027], ExtrapolationPolicy::InterpolateBounded).unwrap();
        assert!(approx(out[&2027], 120.0));
    }

    #[test]
    fn single_year_resolves_everywhere() {
        let series = YearSeries::new("26", [(2022, 42.0)]);
        for policy in [
            ExtrapolationPolicy::InterpolateBounded,
            ExtrapolationPolicy::ExtrapolateTrend,
        ] {
            let out = resample(&series, (2000..=2050).step_by(5), policy).unwrap();
            assert!(out.values().all(|v| approx(*v, 42.0)));
        }
    }

    #[test]
    fn bounded_holds_boundaries() {
        let series = YearSeries::new("06", [(2025, 100.0), (2030, 150.0)]);
        let out = resample(&series, [2020, 2040], ExtrapolationPolicy::InterpolateBounded).unwrap();
        assert!(approx(out[&2020], 100.0));
        assert!(approx(out[&2040], 150.0));
    }

    #[test]
    fn trend_extends_nearest_slope() {
        let series = YearSeries::new("06", [(2020, 0.0), (2025, 100.0), (2031, 160.0)]);
        let out = resample(&series, [2015, 2037], ExtrapolationPolicy::ExtrapolateTrend).unwrap();
        // Left slope comes from 2020-2025, right slope from 2025-2031.
        assert!(approx(out[&2015], -100.0));
        assert!(approx(out[&2037], 220.0));
    }

    #[test]
    fn lower_bound_clamps_extrapolation_only() {
        let series = YearSeries::new("06", [(2025, 50.0), (2031, 20.0)]);
        let resampler =
            Resampler::new(ExtrapolationPolicy::ExtrapolateTrend).with_lower_bound(0.0);
        let out = resampler.resample(&series, [2028, 2050]).unwrap();
        assert!(approx(out[&2028], 35.0));
        assert!(approx(out[&2050], 0.0));
    }

    #[test]
    fn empty_series_names_geography() {
        let series = YearSeries::new("lea-7", Vec::new());
        let err = resample(&series, [2030], ExtrapolationPolicy::InterpolateBounded).unwrap_err();
        assert!(matches!(err, ProjectionError::NoData { geography_id } if geography_id == "lea-7"));
    }
}
