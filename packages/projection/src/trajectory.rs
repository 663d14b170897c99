//! Decline trajectory builders.
//!
//! Each builder yields `{year: decline_pct}` in percent, where positive
//! means decline and negative means growth relative to a base year.

use std::collections::BTreeMap;

use closure_risk_projection_models::{ExtrapolationPolicy, ScenarioTrajectory, YearSeries};

use crate::ProjectionError;
use crate::resample::Resampler;

/// Builds a decline trajectory from a national series (births or the
/// under-5 population used as a birth proxy).
///
/// The series is resampled annually over `years` (interpolating between
/// published years, holding boundaries flat) and each year's multiplier
/// `m = v_t / v_base` becomes `decline_pct = (1 - m) * 100`.
///
/// # Errors
///
/// Returns [`ProjectionError::NoData`] for an empty series and
/// [`ProjectionError::ZeroBaseline`] if the base-year value is zero.
pub fn national_curve(
    series: &YearSeries,
    base_year: i32,
    years: impl IntoIterator<Item = i32>,
) -> Result<BTreeMap<i32, f64>, ProjectionError> {
    let resampler = Resampler::new(ExtrapolationPolicy::InterpolateBounded);
    let baseline = resampler.resample(series, [base_year])?;
    let base = baseline.get(&base_year).copied().unwrap_or(0.0);
    if base.abs() < f64::EPSILON {
        return Err(ProjectionError::ZeroBaseline {
            geography_id: series.geography_id.clone(),
            year: base_year,
        });
    }

    Ok(resampler
        .resample(series, years)?
        .into_iter()
        .map(|(year, value)| (year, (1.0 - value / base) * 100.0))
        .collect())
}

/// Parameters for extending a proportional decline observed over a
/// historical span as a compound annual trend.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompoundTrend {
    /// Rate in the base year (e.g. births per 1,000 women).
    pub base_rate: f64,
    /// Proportional decline over the observed span (`0.2` = 20% lower).
    /// Zero or negative means the rate did not fall.
    pub observed_decline: f64,
    /// Length of the observed span in years.
    pub span_years: u32,
    /// The projected rate never drops below this.
    pub floor_rate: f64,
}

impl CompoundTrend {
    /// Annualized decline `a = 1 - (1 - d)^(1/span)`. A flat or rising
    /// history yields no decline.
    #[must_use]
    pub fn annual_decline(&self) -> f64 {
        if self.observed_decline <= 0.0 || self.span_years == 0 {
            return 0.0;
        }
        let retained = (1.0 - self.observed_decline.min(1.0)).max(0.0);
        1.0 - retained.powf(1.0 / f64::from(self.span_years))
    }

    /// Projected rate `years_after` years past the base year, floored.
    #[must_use]
    pub fn rate_after(&self, years_after: i32) -> f64 {
        let annual = self.annual_decline();
        (self.base_rate * (1.0 - annual).powi(years_after)).max(self.floor_rate)
    }

    /// Builds `{year: decline_pct}` from `base_year` over `years`.
    ///
    /// Years before the base year carry no decline. A floor above the base
    /// rate shows up as growth (negative decline).
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Configuration`] if the base rate is not
    /// positive and finite.
    pub fn trajectory(
        &self,
        base_year: i32,
        years: impl IntoIterator<Item = i32>,
    ) -> Result<BTreeMap<i32, f64>, ProjectionError> {
        if !(self.base_rate.is_finite() && self.base_rate > 0.0) {
            return Err(ProjectionError::Configuration {
                message: format!("base rate must be positive, got {}", self.base_rate),
            });
        }

        Ok(years
            .into_iter()
            .map(|year| {
                let pct = if year < base_year {
                    0.0
                } else {
                    (1.0 - self.rate_after(year - base_year) / self.base_rate) * 100.0
                };
                (year, pct)
            })
            .collect())
    }
}

/// Wraps a `{year: decline_pct}` map as a [`ScenarioTrajectory`].
#[must_use]
pub fn into_trajectory(
    scenario_id: &str,
    geography_id: &str,
    decline_pct: BTreeMap<i32, f64>,
) -> ScenarioTrajectory {
    ScenarioTrajectory {
        scenario_id: scenario_id.to_string(),
        geography_id: geography_id.to_string(),
        decline_pct,
    }
}

/// Computes `ratio = 1 - v_t / v_base` for every target year of a dense
/// (already resampled) series.
///
/// # Errors
///
/// Returns [`ProjectionError::ZeroBaseline`] if the baseline value is zero
/// or missing from `values`.
pub fn ratio_from_series(
    geography_id: &str,
    values: &BTreeMap<i32, f64>,
    baseline_year: i32,
) -> Result<BTreeMap<i32, f64>, ProjectionError> {
    let base = values.get(&baseline_year).copied().unwrap_or(0.0);
    if base.abs() < f64::EPSILON || !base.is_finite() {
        return Err(ProjectionError::ZeroBaseline {
            geography_id: geography_id.to_string(),
            year: baseline_year,
        });
    }

    Ok(values
        .iter()
        .map(|(year, value)| (*year, 1.0 - value / base))
        .collect())
}

/// Resamples a sparse series onto `targets` (plus the baseline year) and
/// computes the decline ratio against the baseline.
///
/// # Errors
///
/// Returns [`ProjectionError::NoData`] for an empty series and
/// [`ProjectionError::ZeroBaseline`] for a zero baseline.
pub fn series_ratios(
    series: &YearSeries,
    resampler: &Resampler,
    baseline_year: i32,
    targets: &[i32],
) -> Result<BTreeMap<i32, f64>, ProjectionError> {
    let mut years: Vec<i32> = targets.to_vec();
    years.push(baseline_year);

    let dense = resampler.resample(series, years)?;
    let mut ratios = ratio_from_series(&series.geography_id, &dense, baseline_year)?;
    if !targets.contains(&baseline_year) {
        ratios.remove(&baseline_year);
    }
    Ok(ratios)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn national_curve_multipliers() {
        let under5 = YearSeries::new("US", [(2022, 19_000.0), (2030, 17_100.0), (2040, 15_200.0)]);
        let curve = national_curve(&under5, 2022, 2022..=2045).unwrap();

        assert!(approx(curve[&2022], 0.0));
        assert!(approx(curve[&2030], 10.0));
        assert!(approx(curve[&2026], 5.0));
        assert!(approx(curve[&2040], 20.0));
        // Held flat past the last published year.
        assert!(approx(curve[&2045], 20.0));
    }

    #[test]
    fn national_curve_zero_base() {
        let series = YearSeries::new("US", [(2022, 0.0), (2030, 5.0)]);
        assert!(matches!(
            national_curve(&series, 2022, [2030]),
            Err(ProjectionError::ZeroBaseline { year: 2022, .. })
        ));
    }

    #[test]
    fn compound_trend_annualizes() {
        let trend = CompoundTrend {
            base_rate: 60.0,
            observed_decline: 0.19,
            span_years: 17,
            floor_rate: 35.0,
        };
        let annual = trend.annual_decline();
        assert!(approx((1.0 - annual).powi(17), 0.81));

        let path = trend.trajectory(2022, 2022..=2050).unwrap();
        assert!(approx(path[&2022], 0.0));
        let expected_2039 = (1.0 - 0.81) * 100.0;
        assert!((path[&2039] - expected_2039).abs() < 1e-6);
        for pair in path.values().collect::<Vec<_>>().windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[test]
    fn compound_trend_respects_floor() {
        let trend = CompoundTrend {
            base_rate: 40.0,
            observed_decline: 0.5,
            span_years: 10,
            floor_rate: 35.0,
        };
        let path = trend.trajectory(2022, [2050]).unwrap();
        assert!(approx(path[&2050], (1.0 - 35.0 / 40.0) * 100.0));
    }

    #[test]
    fn compound_trend_growth_and_flat() {
        let rising = CompoundTrend {
            base_rate: 60.0,
            observed_decline: -0.05,
            span_years: 17,
            floor_rate: 35.0,
        };
        assert!(approx(rising.annual_decline(), 0.0));
        assert!(rising.trajectory(2022, [2040]).unwrap()[&2040].abs() < 1e-12);

        // Already below the floor: the floor reads as growth.
        let low = CompoundTrend {
            base_rate: 30.0,
            observed_decline: 0.1,
            span_years: 17,
            floor_rate: 35.0,
        };
        assert!(low.trajectory(2022, [2030]).unwrap()[&2030] < 0.0);
    }

    #[test]
    fn ratios_against_baseline() {
        let series = YearSeries::new("06001", [(2020, 200.0), (2030, 150.0), (2040, 100.0)]);
        let resampler = Resampler::new(ExtrapolationPolicy::InterpolateBounded);
        let ratios = series_ratios(&series, &resampler, 2020, &[2025, 2040]).unwrap();

        assert_eq!(ratios.len(), 2);
        assert!(approx(ratios[&2025], 0.125));
        assert!(approx(ratios[&2040], 0.5));
    }

    #[test]
    fn zero_baseline_is_geography_error() {
        let series = YearSeries::new("06003", [(2020, 0.0), (2030, 10.0)]);
        let resampler = Resampler::default();
        let err = series_ratios(&series, &resampler, 2020, &[2030]).unwrap_err();
        assert!(matches!(
            err,
            ProjectionError::ZeroBaseline { geography_id, year: 2020 } if geography_id == "06003"
        ));
    }
}
