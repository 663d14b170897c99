//! Participation-share multipliers.
//!
//! Institutions see only the share of the eligible population that enrolls
//! with them. A share projection scales demographic decline: a falling
//! share compounds it, a rising share offsets it. Shares are projected
//! from an observed history either by holding a window mean or by
//! extending a least-squares line fitted over the window, and are floored
//! at a fraction of the current share.

use std::collections::BTreeMap;

use closure_risk_projection_models::ShareMethod;
use serde::{Deserialize, Serialize};

use crate::ProjectionError;

/// Observed participation share by year (`enrolled / population`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ShareHistory {
    shares: BTreeMap<i32, f64>,
}

impl ShareHistory {
    /// Builds a history from `(year, enrolled, population)` observations.
    /// Observations with a non-positive population are skipped.
    #[must_use]
    pub fn from_counts(observations: impl IntoIterator<Item = (i32, f64, f64)>) -> Self {
        Self {
            shares: observations
                .into_iter()
                .filter(|(_, _, population)| *population > 0.0)
                .map(|(year, enrolled, population)| (year, enrolled / population))
                .filter(|(_, share)| share.is_finite())
                .collect(),
        }
    }

    /// Builds a history from already computed shares.
    #[must_use]
    pub fn from_shares(shares: impl IntoIterator<Item = (i32, f64)>) -> Self {
        Self {
            shares: shares.into_iter().filter(|(_, s)| s.is_finite()).collect(),
        }
    }

    #[must_use]
    pub const fn shares(&self) -> &BTreeMap<i32, f64> {
        &self.shares
    }

    /// Share in the latest observed year.
    #[must_use]
    pub fn current(&self) -> Option<(i32, f64)> {
        self.shares.iter().next_back().map(|(y, s)| (*y, *s))
    }

    fn window(&self, start: i32, end: i32) -> Vec<(i32, f64)> {
        self.shares
            .range(start..=end)
            .map(|(y, s)| (*y, *s))
            .collect()
    }
}

/// One participation scenario: a method applied to a window of history.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ShareProjection {
    /// Hold the window mean or extend the window trend.
    pub method: ShareMethod,
    /// First year of the fitting window (inclusive).
    pub window_start: i32,
    /// Last year of the fitting window (inclusive).
    pub window_end: i32,
    /// Projected shares never fall below this fraction of the current
    /// share.
    pub floor_fraction: f64,
}

/// Projected share multiplier per target year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShareMultipliers {
    /// Latest observed share the multipliers are relative to.
    pub current_share: f64,
    /// `projected_share / current_share` by year.
    pub multipliers: BTreeMap<i32, f64>,
}

impl ShareMultipliers {
    /// Decline ratio implied by the multiplier in `year` (`1 - m`).
    /// Years without a multiplier imply no change.
    #[must_use]
    pub fn ratio(&self, year: i32) -> f64 {
        1.0 - self.multipliers.get(&year).copied().unwrap_or(1.0)
    }

    /// Decline ratios for every projected year.
    #[must_use]
    pub fn ratios(&self) -> BTreeMap<i32, f64> {
        self.multipliers.iter().map(|(y, m)| (*y, 1.0 - m)).collect()
    }
}

impl ShareProjection {
    /// Projects the share for every target year and converts it into a
    /// multiplier on the current share.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Configuration`] if the window is
    /// inverted, the floor fraction is outside `[0, 1]`, the window holds
    /// no observations (two for a trend), or the current share is not
    /// positive.
    pub fn multipliers(
        &self,
        history: &ShareHistory,
        targets: impl IntoIterator<Item = i32>,
    ) -> Result<ShareMultipliers, ProjectionError> {
        let fail = |message: String| Err(ProjectionError::Configuration { message });

        if self.window_start > self.window_end {
            return fail(format!(
                "share window {}..={} is inverted",
                self.window_start, self.window_end
            ));
        }
        if !(0.0..=1.0).contains(&self.floor_fraction) {
            return fail(format!(
                "share floor fraction {} is outside [0, 1]",
                self.floor_fraction
            ));
        }

        let Some((current_year, current_share)) = history.current() else {
            return fail("share history is empty".to_string());
        };
        if current_share <= 0.0 {
            return fail(format!("current share in {current_year} is not positive"));
        }

        let window = history.window(self.window_start, self.window_end);
        let projector: Box<dyn Fn(i32) -> f64> = match self.method {
            ShareMethod::Hold => {
                if window.is_empty() {
                    return fail(format!(
                        "no share observations in {}..={}",
                        self.window_start, self.window_end
                    ));
                }
                let mean = mean(window.iter().map(|(_, s)| *s));
                Box::new(move |_| mean)
            }
            ShareMethod::Trend => {
                if window.len() < 2 {
                    return fail(format!(
                        "share trend needs two observations in {}..={}",
                        self.window_start, self.window_end
                    ));
                }
                let (slope, intercept) = least_squares(&window);
                Box::new(move |year| slope.mul_add(f64::from(year), intercept))
            }
        };

        let floor = current_share * self.floor_fraction;
        let multipliers = targets
            .into_iter()
            .map(|year| (year, projector(year).max(floor) / current_share))
            .collect();

        Ok(ShareMultipliers {
            current_share,
            multipliers,
        })
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean(values: impl ExactSizeIterator<Item = f64>) -> f64 {
    let n = values.len();
    values.sum::<f64>() / n as f64
}

/// Fits `share = slope * year + intercept`.
fn least_squares(points: &[(i32, f64)]) -> (f64, f64) {
    let x_mean = mean(points.iter().map(|(y, _)| f64::from(*y)));
    let y_mean = mean(points.iter().map(|(_, s)| *s));

    let (num, den) = points.iter().fold((0.0, 0.0), |(num, den), (year, share)| {
        let dx = f64::from(*year) - x_mean;
        (dx.mul_add(share - y_mean, num), dx.mul_add(dx, den))
    });

    let slope = if den.abs() < f64::EPSILON { 0.0 } else { num / den };
    (slope, slope.mul_add(-x_mean, y_mean))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    fn history() -> ShareHistory {
        ShareHistory::from_shares([
            (2015, 0.85),
            (2016, 0.84),
            (2017, 0.83),
            (2018, 0.82),
            (2019, 0.81),
            (2020, 0.80),
        ])
    }

    fn projection(method: ShareMethod) -> ShareProjection {
        ShareProjection {
            method,
            window_start: 2015,
            window_end: 2019,
            floor_fraction: 0.5,
        }
    }

    #[test]
    fn hold_uses_window_mean() {
        let out = projection(ShareMethod::Hold)
            .multipliers(&history(), [2030, 2040])
            .unwrap();
        assert!(approx(out.current_share, 0.80));
        assert!(approx(out.multipliers[&2030], 0.83 / 0.80));
        assert!(approx(out.multipliers[&2040], 0.83 / 0.80));
        assert!(out.ratio(2030) < 0.0);
    }

    #[test]
    fn trend_extends_line() {
        let out = projection(ShareMethod::Trend)
            .multipliers(&history(), [2025])
            .unwrap();
        assert!(approx(out.multipliers[&2025], 0.75 / 0.80));
        assert!(approx(out.ratio(2025), 0.0625));
    }

    #[test]
    fn trend_is_floored() {
        let out = projection(ShareMethod::Trend)
            .multipliers(&history(), [2080])
            .unwrap();
        assert!(approx(out.multipliers[&2080], 0.5));
        assert!(approx(out.ratios()[&2080], 0.5));
    }

    #[test]
    fn shares_from_counts() {
        let history = ShareHistory::from_counts([(2020, 45.0, 50.0), (2021, 10.0, 0.0)]);
        assert_eq!(history.shares().len(), 1);
        assert_eq!(history.current(), Some((2020, 0.9)));
    }

    #[test]
    fn rejects_bad_windows() {
        let mut p = projection(ShareMethod::Trend);
        p.window_start = 2019;
        p.window_end = 2019;
        assert!(p.multipliers(&history(), [2030]).is_err());

        p.window_start = 2030;
        p.window_end = 2020;
        assert!(p.multipliers(&history(), [2030]).is_err());

        let mut hold = projection(ShareMethod::Hold);
        hold.window_start = 1990;
        hold.window_end = 1995;
        assert!(hold.multipliers(&history(), [2030]).is_err());

        assert!(
            projection(ShareMethod::Hold)
                .multipliers(&ShareHistory::default(), [2030])
                .is_err()
        );
    }

    #[test]
    fn missing_years_mean_no_change() {
        let out = projection(ShareMethod::Hold)
            .multipliers(&history(), [2030])
            .unwrap();
        assert!(approx(out.ratio(2031), 0.0));
    }
}
