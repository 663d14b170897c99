//! End-to-end run: inputs, decline axes, composition, scoring.
//!
//! Run-level problems (unreadable inputs, invalid configuration) abort
//! with a [`PipelineError`]. Problems confined to one geography exclude
//! that geography and are listed in the run summary.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use closure_risk_cli_utils::{IndicatifProgress, MultiProgress};
use closure_risk_population::aggregator::StreamingAggregator;
use closure_risk_population::extract::with_extract_rows;
use closure_risk_population::progress::ProgressCallback;
use closure_risk_population::rollup::{is_state_level, metric_series, rollup_to_states};
use closure_risk_population_models::{AggregateReport, AggregateStats, GeographyYearAggregate};
use closure_risk_projection::cohort::CohortLagModel;
use closure_risk_projection::resample::Resampler;
use closure_risk_projection::trajectory::{
    CompoundTrend, into_trajectory, national_curve, series_ratios,
};
use closure_risk_projection_models::{ScenarioTrajectory, YearSeries};
use closure_risk_risk::buckets::{BucketingStats, InstitutionProfile, bucket_institutions};
use closure_risk_risk::composer::{AxisEntry, ScenarioAxis, ScenarioComposer};
use closure_risk_risk::scorer::Scorer;
use closure_risk_risk::RiskError;
use closure_risk_risk_models::ScenarioResult;
use serde::Serialize;

use crate::PipelineError;
use crate::config::{
    BASELINE_PARTICIPATION, DEMOGRAPHIC_AXIS, DemographicEntry, DemographicSource,
    PARTICIPATION_AXIS, RunConfig,
};
use crate::inputs;

/// A geography left out of the results, with the reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Exclusion {
    pub geography_id: String,
    pub reason: String,
}

/// Excluded geographies; the first reason recorded for a geography wins.
#[derive(Debug, Clone, Default)]
pub struct Exclusions(BTreeMap<String, String>);

impl Exclusions {
    pub fn exclude(&mut self, geography_id: &str, reason: impl ToString) {
        if !self.0.contains_key(geography_id) {
            let reason = reason.to_string();
            log::warn!("Excluding {geography_id}: {reason}");
            self.0.insert(geography_id.to_string(), reason);
        }
    }

    #[must_use]
    pub fn contains(&self, geography_id: &str) -> bool {
        self.0.contains_key(geography_id)
    }

    #[must_use]
    pub fn into_vec(self) -> Vec<Exclusion> {
        self.0
            .into_iter()
            .map(|(geography_id, reason)| Exclusion {
                geography_id,
                reason,
            })
            .collect()
    }
}

/// Everything a run produces.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub model: String,
    pub base_year: i32,
    pub years: Vec<i32>,
    pub scenario_ids: Vec<String>,
    pub profiles: BTreeMap<String, InstitutionProfile>,
    /// Scored geographies and their results, in scenario then year order.
    pub results: BTreeMap<String, Vec<ScenarioResult>>,
    pub population: Option<AggregateStats>,
    pub bucketing: BucketingStats,
    /// Malformed rows skipped per input file.
    pub skipped_rows: BTreeMap<String, u64>,
    pub excluded: Vec<Exclusion>,
}

/// Aggregates the configured population extract.
///
/// # Errors
///
/// Fails if there is no population section, its settings are invalid, or
/// the extract cannot be read.
pub fn aggregate_population(
    config: &RunConfig,
    multi: &MultiProgress,
) -> Result<AggregateReport, PipelineError> {
    let aggregator_config = config.aggregator_config()?;
    let Some(population) = &config.population else {
        return Err(PipelineError::invalid("no [population] section"));
    };

    let path = config.resolve(&population.path);
    let progress = IndicatifProgress::rows_spinner(multi, "Aggregating");
    let mut aggregator = StreamingAggregator::new(aggregator_config)?;
    with_extract_rows(&path, &population.layout, population.band_count, |rows| {
        aggregator.consume(rows, progress.as_ref());
    })?;
    let mut report = aggregator.finish();
    progress.finish(format!(
        "Aggregated {} rows into {} geography-years",
        report.stats.rows_kept,
        report.aggregates.len()
    ));

    if population.rollup_to_states && !is_state_level(&report.aggregates) {
        report.aggregates = rollup_to_states(&report.aggregates);
        log::info!("Rolled up to {} state-years", report.aggregates.len());
    }
    if report.stats.malformed_total() > 0 {
        log::warn!(
            "{} malformed extract rows: {:?}",
            report.stats.malformed_total(),
            report.stats.malformed
        );
    }

    Ok(report)
}

/// Runs the whole pipeline.
///
/// # Errors
///
/// Returns the first run-level failure.
pub fn run(config: &RunConfig, multi: &MultiProgress) -> Result<RunOutput, PipelineError> {
    let start = Instant::now();

    config.validate()?;
    let model = config.model.load()?;
    let cohort = CohortLagModel::new(config.cohort)?;
    let years = config.years();
    log::info!(
        "Closure model {:?}, base year {}, target years {years:?}",
        model.name(),
        config.base_year
    );

    let mut skipped_rows = BTreeMap::new();
    let mut exclusions = Exclusions::default();

    let Some(institutions) = &config.institutions else {
        return Err(PipelineError::invalid("no [institutions] section"));
    };
    let institutions_path = config.resolve(&institutions.path);
    let parsed = inputs::read_institutions(&institutions_path, institutions)?;
    skipped_rows.insert(institutions_path.display().to_string(), parsed.skipped);
    let (profiles, bucketing) = bucket_institutions(model.buckets(), parsed.rows);
    log::info!(
        "Bucketed {} institutions across {} geographies",
        bucketing.kept,
        profiles.len()
    );

    let population = if config.needs_population() {
        Some(aggregate_population(config, multi)?)
    } else {
        None
    };

    let sources = AxisSources {
        config,
        cohort: &cohort,
        years: &years,
        aggregates: population.as_ref().map(|r| r.aggregates.as_slice()),
    };

    let mut demographic = ScenarioAxis::new(DEMOGRAPHIC_AXIS);
    if let Some(cap) = config.scenarios.demographic_max_decline {
        demographic = demographic.with_max_decline(cap);
    }
    let mut with_data = BTreeSet::new();
    for entry in &config.demographic {
        let axis_entry = sources.demographic_entry(entry, &mut exclusions, &mut skipped_rows)?;
        with_data.extend(axis_entry.geographies().map(ToString::to_string));
        demographic = demographic.with_entry(axis_entry);
    }

    let participation = participation_axis(config, &years, &mut skipped_rows)?;

    let scorer = Scorer::new(model, config.base_year);
    let composer = ScenarioComposer::new(&scorer, vec![demographic, participation], years.clone())?;

    for geography_id in with_data.iter().filter(|g| !profiles.contains_key(*g)) {
        exclusions.exclude(
            geography_id,
            RiskError::NoInstitutions {
                geography_id: geography_id.clone(),
            },
        );
    }

    let progress = IndicatifProgress::steps_bar(multi, "Scoring", profiles.len() as u64);
    let results = score_all(&composer, &profiles, &mut exclusions, progress.as_ref());
    progress.finish(format!("Scored {} geographies", results.len()));

    let excluded = exclusions.into_vec();
    log::info!(
        "Scored {} geographies x {} scenarios x {} years ({} excluded) in {:.1}s",
        results.len(),
        composer.scenario_ids().len(),
        years.len(),
        excluded.len(),
        start.elapsed().as_secs_f64()
    );

    Ok(RunOutput {
        model: scorer.model().name().to_string(),
        base_year: config.base_year,
        scenario_ids: composer.scenario_ids(),
        years,
        profiles,
        results,
        population: population.map(|r| r.stats),
        bucketing,
        skipped_rows,
        excluded,
    })
}

/// Scores every geography with institutions, excluding those whose
/// scenarios cannot be composed or scored.
pub fn score_all(
    composer: &ScenarioComposer<'_>,
    profiles: &BTreeMap<String, InstitutionProfile>,
    exclusions: &mut Exclusions,
    progress: &dyn ProgressCallback,
) -> BTreeMap<String, Vec<ScenarioResult>> {
    let mut results = BTreeMap::new();

    for (geography_id, profile) in profiles {
        progress.set_message(format!("Scoring {geography_id}"));
        if !exclusions.contains(geography_id) {
            match composer.run_geography(geography_id, &profile.buckets) {
                Ok(scored) => {
                    results.insert(geography_id.clone(), scored);
                }
                Err(e) => exclusions.exclude(geography_id, e),
            }
        }
        progress.inc(1);
    }

    results
}

/// Enrollment decline ratios for a birth trajectory over `years`.
#[must_use]
pub fn cohort_ratios(
    cohort: &CohortLagModel,
    trajectory: &ScenarioTrajectory,
    years: &[i32],
) -> BTreeMap<i32, f64> {
    cohort
        .project(trajectory, years.iter().copied())
        .into_iter()
        .map(|decline| (decline.year, decline.ratio()))
        .collect()
}

/// Inputs shared by every demographic entry.
struct AxisSources<'a> {
    config: &'a RunConfig,
    cohort: &'a CohortLagModel,
    years: &'a [i32],
    aggregates: Option<&'a [GeographyYearAggregate]>,
}

impl AxisSources<'_> {
    /// Birth years a trajectory must cover to feed every target year.
    fn trajectory_years(&self, base_year: i32) -> Vec<i32> {
        let first = base_year.min(self.cohort.pipeline().cutoff_year);
        let last = self.years.last().copied().unwrap_or(first);
        (first..=last).collect()
    }

    fn demographic_entry(
        &self,
        entry: &DemographicEntry,
        exclusions: &mut Exclusions,
        skipped_rows: &mut BTreeMap<String, u64>,
    ) -> Result<AxisEntry, PipelineError> {
        let config = self.config;
        let cutoff = self.cohort.pipeline().cutoff_year;

        let axis_entry = match &entry.source {
            DemographicSource::Population {
                metric,
                baseline_year,
                policy,
                lower_bound,
            } => {
                let aggregates = self.aggregates.ok_or_else(|| {
                    PipelineError::invalid(format!("demographic {:?} has no population", entry.id))
                })?;
                let series: BTreeMap<String, YearSeries> = metric_series(aggregates, metric)
                    .into_iter()
                    .map(|(geo, values)| {
                        let series = YearSeries::new(geo.clone(), values);
                        (geo, series)
                    })
                    .collect();
                let mut resampler = Resampler::new(*policy);
                if let Some(bound) = lower_bound {
                    resampler = resampler.with_lower_bound(*bound);
                }
                resampled_entry(
                    &entry.id,
                    &series,
                    &resampler,
                    baseline_year.unwrap_or(config.base_year),
                    self.years,
                    exclusions,
                )
            }
            DemographicSource::Series {
                path,
                baseline_year,
                policy,
                lower_bound,
            } => {
                let path = config.resolve(path);
                let parsed = inputs::read_series(&path)?;
                skipped_rows.insert(path.display().to_string(), parsed.skipped);
                let mut resampler = Resampler::new(*policy);
                if let Some(bound) = lower_bound {
                    resampler = resampler.with_lower_bound(*bound);
                }
                resampled_entry(
                    &entry.id,
                    &parsed.rows,
                    &resampler,
                    baseline_year.unwrap_or(config.base_year),
                    self.years,
                    exclusions,
                )
            }
            DemographicSource::NationalCurve { path, base_year } => {
                let path = config.resolve(path);
                let parsed = inputs::read_national(&path)?;
                skipped_rows.insert(path.display().to_string(), parsed.skipped);
                let base_year = base_year.unwrap_or(cutoff);
                let curve = national_curve(&parsed.rows, base_year, self.trajectory_years(base_year))?;
                let trajectory = into_trajectory(&entry.id, inputs::NATIONAL, curve);
                AxisEntry::uniform(&entry.id, cohort_ratios(self.cohort, &trajectory, self.years))
            }
            DemographicSource::FertilityTrend {
                path,
                base_year,
                span_years,
                floor_rate,
            } => {
                let path = config.resolve(path);
                let parsed = inputs::read_fertility(&path)?;
                skipped_rows.insert(path.display().to_string(), parsed.skipped);
                let base_year = base_year.unwrap_or(cutoff);

                let mut by_geography = BTreeMap::new();
                for row in parsed.rows {
                    let trend = CompoundTrend {
                        base_rate: row.base_rate,
                        observed_decline: row.observed_decline,
                        span_years: *span_years,
                        floor_rate: *floor_rate,
                    };
                    match trend.trajectory(base_year, self.trajectory_years(base_year)) {
                        Ok(pct) => {
                            let trajectory = into_trajectory(&entry.id, &row.geography_id, pct);
                            by_geography.insert(
                                row.geography_id,
                                cohort_ratios(self.cohort, &trajectory, self.years),
                            );
                        }
                        Err(e) => exclusions.exclude(&row.geography_id, e),
                    }
                }
                AxisEntry::per_geography(&entry.id, by_geography)
            }
            DemographicSource::TrajectoryFile { path, scenario } => {
                let path = config.resolve(path);
                let parsed = inputs::read_trajectories(&path, scenario.as_deref())?;
                skipped_rows.insert(path.display().to_string(), parsed.skipped);

                let mut uniform = BTreeMap::new();
                let mut by_geography = BTreeMap::new();
                for (geography_id, pct) in parsed.rows {
                    let trajectory = into_trajectory(&entry.id, &geography_id, pct);
                    let ratios = cohort_ratios(self.cohort, &trajectory, self.years);
                    if geography_id == inputs::ALL_GEOGRAPHIES {
                        uniform = ratios;
                    } else {
                        by_geography.insert(geography_id, ratios);
                    }
                }
                AxisEntry::per_geography(&entry.id, by_geography).with_uniform(uniform)
            }
        };

        log::info!(
            "Demographic {:?}: ratios for {} geographies",
            entry.id,
            axis_entry.geographies().count()
        );
        Ok(axis_entry)
    }
}

/// Builds a per-geography entry from sparse series resampled onto the
/// target years and compared with the baseline year.
fn resampled_entry(
    id: &str,
    series: &BTreeMap<String, YearSeries>,
    resampler: &Resampler,
    baseline_year: i32,
    years: &[i32],
    exclusions: &mut Exclusions,
) -> AxisEntry {
    let mut by_geography = BTreeMap::new();
    for (geography_id, series) in series {
        match series_ratios(series, resampler, baseline_year, years) {
            Ok(ratios) => {
                by_geography.insert(geography_id.clone(), ratios);
            }
            Err(e) => exclusions.exclude(geography_id, e),
        }
    }
    AxisEntry::per_geography(id, by_geography)
}

fn participation_axis(
    config: &RunConfig,
    years: &[i32],
    skipped_rows: &mut BTreeMap<String, u64>,
) -> Result<ScenarioAxis, PipelineError> {
    let mut axis = ScenarioAxis::new(PARTICIPATION_AXIS);
    if let Some(cap) = config.scenarios.participation_max_decline {
        axis = axis.with_max_decline(cap);
    }

    let Some(participation) = &config.participation else {
        let unchanged = years.iter().map(|&year| (year, 0.0)).collect();
        return Ok(axis.with_entry(AxisEntry::uniform(BASELINE_PARTICIPATION, unchanged)));
    };

    let path = config.resolve(&participation.history);
    let parsed = inputs::read_share_history(&path)?;
    skipped_rows.insert(path.display().to_string(), parsed.skipped);

    for entry in &participation.entries {
        let multipliers = entry
            .projection()
            .multipliers(&parsed.rows, years.iter().copied())?;
        log::info!(
            "Participation {:?}: current share {:.4}",
            entry.id,
            multipliers.current_share
        );
        axis = axis.with_entry(AxisEntry::uniform(&entry.id, multipliers.ratios()));
    }

    Ok(axis)
}

#[cfg(test)]
mod tests {
    use closure_risk_population::progress::NullProgress;
    use closure_risk_projection_models::{CohortPipeline, ExtrapolationPolicy};
    use closure_risk_risk::presets;
    use closure_risk_risk_models::Institution;

    use super::*;

    fn institution(geo: &str, id: &str, enrollment: f64) -> Institution {
        Institution {
            geography_id: geo.to_string(),
            institution_id: id.to_string(),
            enrollment,
        }
    }

    fn aggregate(geo: &str, year: i32, total: f64) -> GeographyYearAggregate {
        GeographyYearAggregate {
            geography_id: geo.to_string(),
            year,
            total,
            subtotals: BTreeMap::new(),
        }
    }

    #[test]
    fn cohort_ratios_follow_the_pipeline() {
        let cohort = CohortLagModel::new(CohortPipeline::default()).unwrap();
        let mut trajectory = ScenarioTrajectory::new("births", "US");
        for year in 2023..=2050 {
            trajectory.decline_pct.insert(year, 13.0);
        }

        let ratios = cohort_ratios(&cohort, &trajectory, &[2025, 2030, 2045]);
        // Births after 2022 reach kindergarten from 2028.
        assert!(ratios[&2025].abs() < 1e-12);
        assert!((ratios[&2030] - 0.03).abs() < 1e-12);
        assert!((ratios[&2045] - 0.13).abs() < 1e-12);
    }

    #[test]
    fn population_entries_exclude_zero_baselines() {
        let series: BTreeMap<String, YearSeries> = [
            YearSeries::new("06", [(2025, 1000.0), (2035, 800.0)]),
            YearSeries::new("26", [(2025, 0.0), (2035, 10.0)]),
        ]
        .into_iter()
        .map(|s| (s.geography_id.clone(), s))
        .collect();

        let mut exclusions = Exclusions::default();
        let resampler = Resampler::new(ExtrapolationPolicy::default());
        let entry = resampled_entry("census", &series, &resampler, 2025, &[2030, 2035], &mut exclusions);

        assert!((entry.ratio("06", 2030).unwrap() - 0.1).abs() < 1e-12);
        assert!((entry.ratio("06", 2035).unwrap() - 0.2).abs() < 1e-12);
        assert_eq!(entry.ratio("26", 2030), None);
        assert!(exclusions.contains("26"));
        assert_eq!(exclusions.into_vec().len(), 1);
    }

    #[test]
    fn scoring_excludes_geographies_without_ratios() {
        let scorer = Scorer::new(presets::preset("calibrated").unwrap(), 2025);
        let aggregates = vec![
            aggregate("06", 2025, 1000.0),
            aggregate("06", 2030, 900.0),
        ];
        let series: BTreeMap<String, YearSeries> =
            metric_series(&aggregates, GeographyYearAggregate::TOTAL)
            .into_iter()
            .map(|(geo, values)| (geo.clone(), YearSeries::new(geo, values)))
            .collect();

        let mut exclusions = Exclusions::default();
        let entry = resampled_entry(
            "census",
            &series,
            &Resampler::new(ExtrapolationPolicy::default()),
            2025,
            &[2030],
            &mut exclusions,
        );
        let demographic = ScenarioAxis::new(DEMOGRAPHIC_AXIS).with_entry(entry);
        let participation = ScenarioAxis::new(PARTICIPATION_AXIS)
            .with_entry(AxisEntry::uniform(BASELINE_PARTICIPATION, [(2030, 0.0)].into()));
        let composer =
            ScenarioComposer::new(&scorer, vec![demographic, participation], [2030]).unwrap();

        let (profiles, _) = bucket_institutions(
            scorer.model().buckets(),
            vec![
                institution("06", "a", 80.0),
                institution("06", "b", 420.0),
                institution("26", "c", 300.0),
            ],
        );
        let results = score_all(&composer, &profiles, &mut exclusions, &NullProgress);

        assert_eq!(results.len(), 1);
        let ca = &results["06"];
        assert_eq!(ca.len(), 1);
        assert_eq!(ca[0].scenario_id, "census_baseline");
        assert!((ca[0].decline_ratio - 0.1).abs() < 1e-12);
        assert_eq!(ca[0].institution_count, 2);

        let excluded = exclusions.into_vec();
        assert_eq!(excluded.len(), 1);
        assert_eq!(excluded[0].geography_id, "26");
    }

    #[test]
    fn runs_from_files_to_json_outputs() {
        let dir = std::env::temp_dir().join(format!("closure_risk_run_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();

        std::fs::write(
            dir.join("extract.csv"),
            "YEAR,STATE,COUNTY,AGE,SSP2\n\
             2025,06,001,1,600\n\
             2035,06,001,1,500\n\
             2025,06,003,2,400\n\
             2035,06,003,2,300\n\
             2025,26,163,3,500\n\
             2035,26,163,3,500\n\
             2025,48,001,1,700\n\
             2035,48,001,1,650\n\
             2025,39,001,1,0\n\
             2035,39,001,1,10\n\
             2025,72,001,1,100\n\
             2025,06,001,99,50\n\
             2040,06,001,1,50\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("schools.csv"),
            b"geography_id,institution_id,enrollment\n\
              06,ca1,120\n\
              06,ca2,450\n\
              06,ca2,300\n\
              06,ca3,\n\
              06,\xff,200\n\
              06,ca4,0\n\
              26,mi1,80\n\
              26,mi2,900\n\
              39,oh1,250\n",
        )
        .unwrap();
        let config_path = dir.join("run.toml");
        std::fs::write(
            &config_path,
            r#"
            target_years = [2025, 2030, 2035]

            [institutions]
            path = "schools.csv"

            [population]
            path = "extract.csv"
            rollup_to_states = true

            [[demographic]]
            id = "census"
            kind = "population"
            metric = "total"
            "#,
        )
        .unwrap();

        let config = RunConfig::load(&config_path).unwrap();
        let output = run(&config, &MultiProgress::new()).unwrap();
        let out_dir = dir.join("out");
        crate::output::write_run(&out_dir, &output, &config_path).unwrap();

        let read = |path: std::path::PathBuf| -> serde_json::Value {
            serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
        };
        let projections = read(crate::paths::projections_path(&out_dir));
        let summary = read(crate::paths::summary_path(&out_dir));

        let geographies = projections["geographies"].as_object().unwrap();
        assert_eq!(geographies.keys().collect::<Vec<_>>(), ["CA", "MI"]);
        for geography in geographies.values() {
            let scenarios = geography["scenarios"].as_object().unwrap();
            assert_eq!(scenarios.keys().collect::<Vec<_>>(), ["census_baseline"]);
            let years = scenarios["census_baseline"].as_object().unwrap();
            assert_eq!(years.keys().collect::<Vec<_>>(), ["2025", "2030", "2035"]);
        }
        let ca = &geographies["CA"];
        assert_eq!(ca["institutions"], 2);
        assert_eq!(ca["current_enrollment"], 570.0);
        let census = &ca["scenarios"]["census_baseline"];
        assert_eq!(census["2025"]["decline_pct"], 0.0);
        assert_eq!(census["2030"]["decline_pct"], 10.0);
        assert_eq!(census["2035"]["decline_pct"], 20.0);
        assert_eq!(geographies["MI"]["scenarios"]["census_baseline"]["2035"]["decline_pct"], 0.0);

        let population = &summary["population"];
        assert_eq!(population["rows_read"], 13);
        assert_eq!(population["rows_kept"], 10);
        assert_eq!(population["rows_filtered_year"], 1);
        assert_eq!(population["rows_filtered_geography"], 1);
        assert_eq!(population["malformed"], serde_json::json!({ "unknown_age_band": 1 }));

        let institutions = &summary["institutions"];
        assert_eq!(institutions["read"], 7);
        assert_eq!(institutions["kept"], 5);
        assert_eq!(institutions["skipped_enrollment"], 1);
        assert_eq!(institutions["skipped_duplicate"], 1);
        let schools = dir.join("schools.csv").display().to_string();
        assert_eq!(summary["skipped_rows"][schools.as_str()], 2);

        assert_eq!(summary["geographies_scored"], 2);
        let excluded: Vec<&str> = summary["excluded"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["geography_id"].as_str().unwrap())
            .collect();
        assert_eq!(excluded, ["39", "48"]);
        assert_eq!(summary["scenarios"], serde_json::json!(["census_baseline"]));
        assert_eq!(summary["years"], serde_json::json!([2025, 2030, 2035]));

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[test]
    fn first_exclusion_reason_wins() {
        let mut exclusions = Exclusions::default();
        exclusions.exclude("06", "zero baseline");
        exclusions.exclude("06", "no institutions");
        let excluded = exclusions.into_vec();
        assert_eq!(excluded[0].reason, "zero baseline");
    }
}
