//! JSON outputs of a run.
//!
//! `projections.json` holds one entry per scored geography, keyed by its
//! published key (state abbreviation or FIPS), with results nested by
//! scenario id and year. `run_summary.json` records row accounting and
//! excluded geographies.

use std::collections::BTreeMap;
use std::path::Path;

use closure_risk_geography_models::{display_key, display_name};
use closure_risk_population_models::{AggregateReport, AggregateStats};
use closure_risk_risk::buckets::BucketingStats;
use closure_risk_risk_models::ScenarioResult;
use serde::Serialize;

use crate::PipelineError;
use crate::paths;
use crate::pipeline::{Exclusion, RunOutput};

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10_f64.powi(decimals);
    (value * factor).round() / factor
}

#[derive(Debug, Serialize)]
pub struct ProjectionsDocument<'a> {
    pub model: &'a str,
    pub base_year: i32,
    pub years: &'a [i32],
    pub scenarios: &'a [String],
    pub geographies: BTreeMap<String, GeographyProjection>,
}

#[derive(Debug, Serialize)]
pub struct GeographyProjection {
    pub geography_id: String,
    pub name: String,
    pub institutions: u64,
    pub current_enrollment: f64,
    pub buckets: Vec<BucketSummary>,
    /// Results by scenario id, then year.
    pub scenarios: BTreeMap<String, BTreeMap<i32, YearProjection>>,
}

#[derive(Debug, Serialize)]
pub struct BucketSummary {
    pub label: String,
    pub count: u64,
    pub avg_enrollment: f64,
}

#[derive(Debug, Serialize)]
pub struct TierSummary {
    pub label: String,
    pub count: u64,
}

/// One scenario-year, rounded for publication.
#[derive(Debug, Serialize)]
pub struct YearProjection {
    pub decline_pct: f64,
    pub projected_enrollment: f64,
    pub expected_closures: f64,
    pub expected_closures_pct: f64,
    pub below_minimum: u64,
    pub elevated_risk: u64,
    pub severe_risk: u64,
    pub tiers: Vec<TierSummary>,
}

impl From<&ScenarioResult> for YearProjection {
    fn from(result: &ScenarioResult) -> Self {
        Self {
            decline_pct: round_to(result.decline_pct, 2),
            projected_enrollment: result.projected_value.round(),
            expected_closures: round_to(result.expected_closures, 1),
            expected_closures_pct: round_to(result.expected_closures_pct, 1),
            below_minimum: result.below_minimum,
            elevated_risk: result.elevated_risk,
            severe_risk: result.severe_risk,
            tiers: result
                .tiers
                .iter()
                .map(|t| TierSummary {
                    label: t.label.clone(),
                    count: t.count,
                })
                .collect(),
        }
    }
}

/// Builds the projections document for a finished run.
#[must_use]
pub fn projections_document(output: &RunOutput) -> ProjectionsDocument<'_> {
    let geographies = output
        .results
        .iter()
        .filter_map(|(geography_id, results)| {
            let profile = output.profiles.get(geography_id)?;

            let mut scenarios: BTreeMap<String, BTreeMap<i32, YearProjection>> = BTreeMap::new();
            for result in results {
                scenarios
                    .entry(result.scenario_id.clone())
                    .or_default()
                    .insert(result.year, YearProjection::from(result));
            }

            let projection = GeographyProjection {
                geography_id: geography_id.clone(),
                name: display_name(geography_id),
                institutions: profile.institution_count(),
                current_enrollment: profile.total_enrollment.round(),
                buckets: profile
                    .buckets
                    .iter()
                    .map(|b| BucketSummary {
                        label: b.label.clone(),
                        count: b.count,
                        avg_enrollment: round_to(b.avg_enrollment, 1),
                    })
                    .collect(),
                scenarios,
            };
            Some((display_key(geography_id), projection))
        })
        .collect();

    ProjectionsDocument {
        model: &output.model,
        base_year: output.base_year,
        years: &output.years,
        scenarios: &output.scenario_ids,
        geographies,
    }
}

#[derive(Debug, Serialize)]
pub struct RunSummary<'a> {
    pub generated_at: String,
    pub config: String,
    pub model: &'a str,
    pub base_year: i32,
    pub years: &'a [i32],
    pub scenarios: &'a [String],
    pub population: Option<&'a AggregateStats>,
    pub institutions: &'a BucketingStats,
    pub skipped_rows: &'a BTreeMap<String, u64>,
    pub geographies_scored: usize,
    pub excluded: &'a [Exclusion],
}

/// Builds the run summary for a finished run.
#[must_use]
pub fn run_summary<'a>(output: &'a RunOutput, config_path: &Path) -> RunSummary<'a> {
    RunSummary {
        generated_at: chrono::Utc::now().to_rfc3339(),
        config: config_path.display().to_string(),
        model: &output.model,
        base_year: output.base_year,
        years: &output.years,
        scenarios: &output.scenario_ids,
        population: output.population.as_ref(),
        institutions: &output.bucketing,
        skipped_rows: &output.skipped_rows,
        geographies_scored: output.results.len(),
        excluded: &output.excluded,
    }
}

fn write_json(path: &Path, value: &impl Serialize) -> Result<(), PipelineError> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent).map_err(PipelineError::io(parent))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).map_err(PipelineError::io(path))?;
    log::info!("Wrote {}", path.display());
    Ok(())
}

/// Writes `projections.json` and `run_summary.json` into `output_dir`.
///
/// # Errors
///
/// Fails if the directory cannot be created or a file cannot be written.
pub fn write_run(
    output_dir: &Path,
    output: &RunOutput,
    config_path: &Path,
) -> Result<(), PipelineError> {
    write_json(&paths::projections_path(output_dir), &projections_document(output))?;
    write_json(
        &paths::summary_path(output_dir),
        &run_summary(output, config_path),
    )
}

/// Writes an aggregation report.
///
/// # Errors
///
/// Fails if the file cannot be written.
pub fn write_aggregates(path: &Path, report: &AggregateReport) -> Result<(), PipelineError> {
    write_json(path, report)
}
