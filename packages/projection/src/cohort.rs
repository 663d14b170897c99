//! Cohort-lag enrollment decline.
//!
//! A birth decline reaches a grade-pipeline institution only as the
//! affected birth cohorts age into it. In year `Y` the institution holds
//! birth years `[Y - k - (P - 1), Y - k]`; only those after the cutoff
//! year carry the decline, so the enrollment decline is the mean birth
//! decline over the affected years scaled by the affected share of the
//! pipeline.

use closure_risk_projection_models::{CohortPipeline, EnrollmentDecline, ScenarioTrajectory};

use crate::ProjectionError;

/// Applies the cohort lag for one [`CohortPipeline`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CohortLagModel {
    pipeline: CohortPipeline,
}

impl CohortLagModel {
    /// Creates a model after validating the pipeline.
    ///
    /// # Errors
    ///
    /// Returns [`ProjectionError::Configuration`] if the pipeline length is
    /// not positive or the entry age is negative.
    pub fn new(pipeline: CohortPipeline) -> Result<Self, ProjectionError> {
        if pipeline.pipeline_length <= 0 {
            return Err(ProjectionError::Configuration {
                message: format!(
                    "pipeline length must be positive, got {}",
                    pipeline.pipeline_length
                ),
            });
        }
        if pipeline.entry_age < 0 {
            return Err(ProjectionError::Configuration {
                message: format!("entry age must not be negative, got {}", pipeline.entry_age),
            });
        }
        Ok(Self { pipeline })
    }

    #[must_use]
    pub const fn pipeline(&self) -> &CohortPipeline {
        &self.pipeline
    }

    /// Computes the enrollment decline seen in `year`.
    ///
    /// Affected birth years missing from the trajectory count as zero
    /// decline. Nothing is clamped: a growth trajectory yields a negative
    /// decline.
    #[must_use]
    pub fn decline_for(&self, trajectory: &ScenarioTrajectory, year: i32) -> EnrollmentDecline {
        let (oldest, youngest) = self.pipeline.enrolled_birth_years(year);
        let first_affected = oldest.max(self.pipeline.cutoff_year.saturating_add(1));

        let mut affected_grades = 0u32;
        let mut total_decline = 0.0;
        for birth_year in first_affected..=youngest {
            affected_grades += 1;
            total_decline += trajectory.decline_at(birth_year);
        }

        let avg_birth_decline = if affected_grades == 0 {
            0.0
        } else {
            total_decline / f64::from(affected_grades)
        };
        let pipeline_fraction =
            f64::from(affected_grades) / f64::from(self.pipeline.pipeline_length);

        EnrollmentDecline {
            year,
            affected_grades,
            avg_birth_decline,
            pipeline_fraction,
            enrollment_decline_pct: pipeline_fraction * avg_birth_decline,
        }
    }

    /// Computes the enrollment decline for every target year.
    #[must_use]
    pub fn project(
        &self,
        trajectory: &ScenarioTrajectory,
        targets: impl IntoIterator<Item = i32>,
    ) -> Vec<EnrollmentDecline> {
        targets
            .into_iter()
            .map(|year| self.decline_for(trajectory, year))
            .collect()
    }
}

/// Computes the enrollment decline for every target year.
///
/// # Errors
///
/// Returns [`ProjectionError::Configuration`] if the pipeline is invalid.
pub fn enrollment_decline(
    trajectory: &ScenarioTrajectory,
    pipeline: CohortPipeline,
    targets: impl IntoIterator<Item = i32>,
) -> Result<Vec<EnrollmentDecline>, ProjectionError> {
    let model = CohortLagModel::new(pipeline)?;
    let declines = model.project(trajectory, targets);
    log::debug!(
        "{} / {}: {} enrollment-decline years",
        trajectory.scenario_id,
        trajectory.geography_id,
        declines.len()
    );
    Ok(declines)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat(pct: f64) -> ScenarioTrajectory {
        let mut trajectory = ScenarioTrajectory::new("census", "06");
        for year in 2022..=2050 {
            trajectory.decline_pct.insert(year, pct);
        }
        trajectory
    }

    fn model() -> CohortLagModel {
        CohortLagModel::new(CohortPipeline::default()).unwrap()
    }

    #[test]
    fn no_affected_grades_before_cutoff_cohorts_enroll() {
        let decline = model().decline_for(&flat(10.0), 2025);
        assert_eq!(decline.affected_grades, 0);
        assert!(decline.avg_birth_decline.abs() < f64::EPSILON);
        assert!(decline.pipeline_fraction.abs() < f64::EPSILON);
        assert!(decline.enrollment_decline_pct.abs() < f64::EPSILON);
    }

    #[test]
    fn fully_affected_pipeline() {
        let decline = model().decline_for(&flat(10.0), 2040);
        assert_eq!(decline.affected_grades, 13);
        assert!((decline.pipeline_fraction - 1.0).abs() < f64::EPSILON);
        assert!((decline.enrollment_decline_pct - 10.0).abs() < 1e-9);
        assert!((decline.ratio() - 0.1).abs() < 1e-12);
    }

    #[test]
    fn partially_affected_pipeline() {
        // 2030 holds births 2013-2025; 2023, 2024, 2025 are affected.
        let mut trajectory = ScenarioTrajectory::new("trend", "26");
        trajectory.decline_pct.insert(2023, 3.0);
        trajectory.decline_pct.insert(2024, 6.0);
        trajectory.decline_pct.insert(2025, 9.0);

        let decline = model().decline_for(&trajectory, 2030);
        assert_eq!(decline.affected_grades, 3);
        assert!((decline.avg_birth_decline - 6.0).abs() < 1e-9);
        assert!((decline.pipeline_fraction - 3.0 / 13.0).abs() < 1e-12);
        assert!((decline.enrollment_decline_pct - 18.0 / 13.0).abs() < 1e-9);
    }

    #[test]
    fn missing_years_count_as_zero() {
        let mut trajectory = ScenarioTrajectory::new("trend", "26");
        trajectory.decline_pct.insert(2023, 12.0);

        let decline = model().decline_for(&trajectory, 2029);
        assert_eq!(decline.affected_grades, 2);
        assert!((decline.avg_birth_decline - 6.0).abs() < 1e-9);
    }

    #[test]
    fn growth_passes_through_unclamped() {
        let decline = model().decline_for(&flat(-4.0), 2045);
        assert!((decline.enrollment_decline_pct + 4.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_non_positive_pipeline() {
        for length in [0, -3] {
            let pipeline = CohortPipeline {
                pipeline_length: length,
                ..CohortPipeline::default()
            };
            assert!(matches!(
                enrollment_decline(&flat(1.0), pipeline, [2030]),
                Err(ProjectionError::Configuration { .. })
            ));
        }
    }

    #[test]
    fn projects_every_target() {
        let declines = model().project(&flat(10.0), (2025..=2050).step_by(5));
        assert_eq!(declines.len(), 6);
        for pair in declines.windows(2) {
            assert!(pair[1].enrollment_decline_pct >= pair[0].enrollment_decline_pct);
        }
    }
}
