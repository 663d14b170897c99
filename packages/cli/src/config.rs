//! Run configuration.
//!
//! A run is described by one TOML file. Every section has defaults except
//! the inputs themselves; relative paths resolve against the directory
//! holding the config file.
//!
//! ```toml
//! base_year = 2025
//! target_years = [2025, 2030, 2035, 2040]
//!
//! [model]
//! preset = "calibrated"
//!
//! [institutions]
//! path = "schools.csv"
//!
//! [population]
//! path = "cc-est2024-agesex.csv.gz"
//!
//! [[demographic]]
//! id = "census"
//! kind = "population"
//! metric = "school_age"
//! ```

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use closure_risk_population::aggregator::{AggregatorConfig, GeographyFilter};
use closure_risk_population::extract::ExtractLayout;
use closure_risk_population_models::{GeographyYearAggregate, STANDARD_BAND_COUNT, SubtotalRule};
use closure_risk_projection::cohort::CohortLagModel;
use closure_risk_projection::share::ShareProjection;
use closure_risk_projection_models::{CohortPipeline, ExtrapolationPolicy, ShareMethod};
use closure_risk_risk::composer::SCENARIO_SEPARATOR;
use closure_risk_risk::model::ClosureModel;
use closure_risk_risk::presets;
use closure_risk_risk_models::ModelDefinition;
use serde::Deserialize;

use crate::PipelineError;
use crate::paths;

/// Name of the demographic scenario axis.
pub const DEMOGRAPHIC_AXIS: &str = "demographic";
/// Name of the participation-share scenario axis.
pub const PARTICIPATION_AXIS: &str = "participation";
/// Participation entry used when the config has no participation section.
pub const BASELINE_PARTICIPATION: &str = "baseline";

const DEFAULT_BASE_YEAR: i32 = 2025;

fn default_target_years() -> Vec<i32> {
    (2025..=2050).step_by(5).collect()
}

const fn default_span_years() -> u32 {
    17
}

const fn default_floor_rate() -> f64 {
    35.0
}

const fn default_floor_fraction() -> f64 {
    0.5
}

/// Top-level run configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Year closure exposure is measured from.
    pub base_year: i32,
    /// Years to score.
    pub target_years: Vec<i32>,
    /// Where JSON outputs go. Defaults to `data/generated/closure_risk`.
    pub output_dir: Option<PathBuf>,
    pub model: ModelConfig,
    pub institutions: Option<InstitutionsConfig>,
    pub population: Option<PopulationConfig>,
    pub cohort: CohortPipeline,
    pub demographic: Vec<DemographicEntry>,
    pub scenarios: ScenarioCaps,
    pub participation: Option<ParticipationConfig>,
    #[serde(skip)]
    base_dir: PathBuf,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            base_year: DEFAULT_BASE_YEAR,
            target_years: default_target_years(),
            output_dir: None,
            model: ModelConfig::default(),
            institutions: None,
            population: None,
            cohort: CohortPipeline::default(),
            demographic: Vec::new(),
            scenarios: ScenarioCaps::default(),
            participation: None,
            base_dir: PathBuf::new(),
        }
    }
}

/// Closure model selection: a named preset or an inline definition.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub preset: Option<String>,
    pub definition: Option<ModelDefinition>,
}

impl ModelConfig {
    /// Builds the validated closure model.
    ///
    /// # Errors
    ///
    /// Fails if both a preset and a definition are given, the preset is
    /// unknown, or the model does not validate.
    pub fn load(&self) -> Result<ClosureModel, PipelineError> {
        match (&self.preset, &self.definition) {
            (Some(_), Some(_)) => Err(PipelineError::invalid(
                "[model] takes either `preset` or `definition`, not both",
            )),
            (None, Some(definition)) => Ok(ClosureModel::new(definition.clone())?),
            (Some(name), None) => Ok(presets::preset(name)?),
            (None, None) => Ok(presets::preset(presets::DEFAULT_PRESET)?),
        }
    }
}

/// Institution directory CSV.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstitutionsConfig {
    pub path: PathBuf,
    pub geography_column: String,
    pub id_column: String,
    pub enrollment_column: String,
    /// Collapse county keys (and state names or abbreviations) onto
    /// two-digit state FIPS keys.
    pub to_state: bool,
}

impl Default for InstitutionsConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            geography_column: "geography_id".to_string(),
            id_column: "institution_id".to_string(),
            enrollment_column: "enrollment".to_string(),
            to_state: false,
        }
    }
}

/// Which geographies the population extract contributes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeographySelection {
    /// Every key in the extract.
    Any,
    /// State and county keys of the 50 states + DC.
    #[default]
    States,
}

/// Raw population-by-age extract.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    pub path: PathBuf,
    pub layout: ExtractLayout,
    pub geographies: GeographySelection,
    /// Exact geography keys to keep. Overrides `geographies` when set.
    pub only: Vec<String>,
    pub band_count: u8,
    /// Sum county aggregates into state aggregates.
    pub rollup_to_states: bool,
    /// Years to aggregate. Derived from the demographic entries and target
    /// years when empty.
    pub years: Vec<i32>,
    pub subtotals: Vec<SubtotalRule>,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::new(),
            layout: ExtractLayout::default(),
            geographies: GeographySelection::default(),
            only: Vec::new(),
            band_count: STANDARD_BAND_COUNT,
            rollup_to_states: false,
            years: Vec::new(),
            subtotals: Vec::new(),
        }
    }
}

impl PopulationConfig {
    fn has_metric(&self, metric: &str) -> bool {
        metric == GeographyYearAggregate::TOTAL || self.subtotals.iter().any(|s| s.name == metric)
    }
}

/// One entry on the demographic axis.
#[derive(Debug, Clone, Deserialize)]
pub struct DemographicEntry {
    pub id: String,
    #[serde(flatten)]
    pub source: DemographicSource,
}

/// Where a demographic entry's decline ratios come from.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DemographicSource {
    /// A metric of the aggregated population extract, resampled onto the
    /// target years and compared with the baseline year.
    Population {
        metric: String,
        baseline_year: Option<i32>,
        #[serde(default)]
        policy: ExtrapolationPolicy,
        lower_bound: Option<f64>,
    },
    /// A sparse `geography_id,year,value` series file.
    Series {
        path: PathBuf,
        baseline_year: Option<i32>,
        #[serde(default)]
        policy: ExtrapolationPolicy,
        lower_bound: Option<f64>,
    },
    /// A national `year,value` births series, applied to every geography
    /// through the cohort-lag model.
    NationalCurve {
        path: PathBuf,
        base_year: Option<i32>,
    },
    /// Per-geography `geography_id,base_rate,observed_decline` fertility
    /// rates extended as a compound trend, then lagged through the cohort
    /// pipeline.
    FertilityTrend {
        path: PathBuf,
        base_year: Option<i32>,
        #[serde(default = "default_span_years")]
        span_years: u32,
        #[serde(default = "default_floor_rate")]
        floor_rate: f64,
    },
    /// Ready-made `geography_id,year,decline_pct` trajectories, lagged
    /// through the cohort pipeline. A `*` geography applies to all.
    TrajectoryFile {
        path: PathBuf,
        /// Keep only rows whose `scenario_id` column matches.
        scenario: Option<String>,
    },
}

/// Per-axis caps on the decline ratio, applied before composition.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct ScenarioCaps {
    pub demographic_max_decline: Option<f64>,
    pub participation_max_decline: Option<f64>,
}

/// Participation-share history and scenarios.
#[derive(Debug, Clone, Deserialize)]
pub struct ParticipationConfig {
    /// `year,enrolled,population` CSV.
    pub history: PathBuf,
    pub entries: Vec<ParticipationEntry>,
}

/// One participation-share scenario.
#[derive(Debug, Clone, Deserialize)]
pub struct ParticipationEntry {
    pub id: String,
    pub method: ShareMethod,
    pub window_start: i32,
    pub window_end: i32,
    #[serde(default = "default_floor_fraction")]
    pub floor_fraction: f64,
}

impl ParticipationEntry {
    #[must_use]
    pub const fn projection(&self) -> ShareProjection {
        ShareProjection {
            method: self.method,
            window_start: self.window_start,
            window_end: self.window_end,
            floor_fraction: self.floor_fraction,
        }
    }
}

impl RunConfig {
    /// Reads and parses a config file. Call [`Self::validate`] before use.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or is not a valid config.
    pub fn load(path: &Path) -> Result<Self, PipelineError> {
        let text = std::fs::read_to_string(path).map_err(PipelineError::io(path))?;
        let base_dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
        Self::parse(&text, base_dir).map_err(|source| PipelineError::Config {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Parses config text whose relative paths resolve against `base_dir`.
    ///
    /// # Errors
    ///
    /// Returns the TOML error if the text does not match the schema.
    pub fn parse(text: &str, base_dir: PathBuf) -> Result<Self, toml::de::Error> {
        let mut config: Self = toml::from_str(text)?;
        config.base_dir = base_dir;
        Ok(config)
    }

    /// Resolves a path from the config against the config's directory.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        paths::resolve(&self.base_dir, path)
    }

    /// Target years, sorted and deduplicated.
    #[must_use]
    pub fn years(&self) -> Vec<i32> {
        self.target_years
            .iter()
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Output directory: the CLI override, the configured one, or the
    /// project default.
    #[must_use]
    pub fn output_dir(&self, cli_override: Option<&Path>) -> PathBuf {
        cli_override.map_or_else(
            || {
                self.output_dir
                    .as_deref()
                    .map_or_else(paths::default_output_dir, |dir| self.resolve(dir))
            },
            Path::to_path_buf,
        )
    }

    /// Whether any demographic entry reads the population extract.
    #[must_use]
    pub fn needs_population(&self) -> bool {
        self.demographic
            .iter()
            .any(|entry| matches!(entry.source, DemographicSource::Population { .. }))
    }

    /// Years the population extract is aggregated for: the configured
    /// list, or every year from the earliest baseline or target year to
    /// the last target year.
    #[must_use]
    pub fn aggregation_years(&self) -> Vec<i32> {
        if let Some(population) = &self.population
            && !population.years.is_empty()
        {
            return population.years.clone();
        }

        let targets = self.years();
        let baselines = self.demographic.iter().filter_map(|entry| match &entry.source {
            DemographicSource::Population { baseline_year, .. } => {
                Some(baseline_year.unwrap_or(self.base_year))
            }
            _ => None,
        });
        let first = targets.iter().copied().chain(baselines).min();
        let last = targets.last().copied();
        match (first, last) {
            (Some(first), Some(last)) => (first..=last).collect(),
            _ => Vec::new(),
        }
    }

    /// Builds the aggregator settings for the population section.
    ///
    /// # Errors
    ///
    /// Fails if there is no population section or its settings are
    /// invalid.
    pub fn aggregator_config(&self) -> Result<AggregatorConfig, PipelineError> {
        let population = self
            .population
            .as_ref()
            .ok_or_else(|| PipelineError::invalid("no [population] section"))?;

        let filter = if population.only.is_empty() {
            match population.geographies {
                GeographySelection::Any => GeographyFilter::Any,
                GeographySelection::States => GeographyFilter::States,
            }
        } else {
            GeographyFilter::Exact(population.only.iter().cloned().collect())
        };

        let config = population.subtotals.iter().cloned().fold(
            AggregatorConfig::new(self.aggregation_years())
                .with_geographies(filter)
                .with_band_count(population.band_count),
            AggregatorConfig::with_subtotal,
        );
        config.validate()?;
        Ok(config)
    }

    /// Checks everything that can be checked without reading input data.
    ///
    /// # Errors
    ///
    /// Returns the first configuration problem found.
    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.target_years.is_empty() {
            return Err(PipelineError::invalid("target_years is empty"));
        }
        CohortLagModel::new(self.cohort)?;
        self.model.load()?;

        let institutions = self
            .institutions
            .as_ref()
            .ok_or_else(|| PipelineError::invalid("no [institutions] section"))?;
        if institutions.path.as_os_str().is_empty() {
            return Err(PipelineError::invalid("[institutions] path is empty"));
        }

        self.validate_demographic()?;
        self.validate_participation()?;
        self.validate_scenario_ids()?;

        for (axis, cap) in [
            (DEMOGRAPHIC_AXIS, self.scenarios.demographic_max_decline),
            (PARTICIPATION_AXIS, self.scenarios.participation_max_decline),
        ] {
            if let Some(cap) = cap
                && !(0.0..=1.0).contains(&cap)
            {
                return Err(PipelineError::invalid(format!(
                    "{axis} max decline {cap} is outside [0, 1]"
                )));
            }
        }

        if self.population.is_some() {
            self.aggregator_config()?;
        }

        Ok(())
    }

    fn validate_demographic(&self) -> Result<(), PipelineError> {
        if self.demographic.is_empty() {
            return Err(PipelineError::invalid("no [[demographic]] entries"));
        }

        let mut ids = BTreeSet::new();
        for entry in &self.demographic {
            if entry.id.is_empty() || !ids.insert(entry.id.as_str()) {
                return Err(PipelineError::invalid(format!(
                    "demographic id {:?} is empty or repeated",
                    entry.id
                )));
            }

            match &entry.source {
                DemographicSource::Population { metric, .. } => {
                    let population = self.population.as_ref().ok_or_else(|| {
                        PipelineError::invalid(format!(
                            "demographic {:?} needs a [population] section",
                            entry.id
                        ))
                    })?;
                    if !population.has_metric(metric) {
                        return Err(PipelineError::invalid(format!(
                            "demographic {:?} uses unknown metric {metric:?}",
                            entry.id
                        )));
                    }
                }
                DemographicSource::FertilityTrend { floor_rate, .. } if *floor_rate < 0.0 => {
                    return Err(PipelineError::invalid(format!(
                        "demographic {:?} floor rate {floor_rate} is negative",
                        entry.id
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// Scenario ids join one entry id per axis; distinct combinations must
    /// not join to the same id.
    fn validate_scenario_ids(&self) -> Result<(), PipelineError> {
        let participation: Vec<&str> = self.participation.as_ref().map_or_else(
            || vec![BASELINE_PARTICIPATION],
            |p| p.entries.iter().map(|e| e.id.as_str()).collect(),
        );

        let mut ids = BTreeSet::new();
        for demographic in &self.demographic {
            for participation_id in &participation {
                let id = format!("{}{SCENARIO_SEPARATOR}{participation_id}", demographic.id);
                if ids.contains(&id) {
                    return Err(PipelineError::invalid(format!(
                        "scenario id {id:?} is produced by more than one entry combination"
                    )));
                }
                ids.insert(id);
            }
        }

        Ok(())
    }

    fn validate_participation(&self) -> Result<(), PipelineError> {
        let Some(participation) = &self.participation else {
            return Ok(());
        };
        if participation.entries.is_empty() {
            return Err(PipelineError::invalid("[participation] has no entries"));
        }

        let mut ids = BTreeSet::new();
        for entry in &participation.entries {
            if entry.id.is_empty() || !ids.insert(entry.id.as_str()) {
                return Err(PipelineError::invalid(format!(
                    "participation id {:?} is empty or repeated",
                    entry.id
                )));
            }
            if entry.window_start > entry.window_end {
                return Err(PipelineError::invalid(format!(
                    "participation {:?} window {}..={} is inverted",
                    entry.id, entry.window_start, entry.window_end
                )));
            }
            if !(0.0..=1.0).contains(&entry.floor_fraction) {
                return Err(PipelineError::invalid(format!(
                    "participation {:?} floor fraction {} is outside [0, 1]",
                    entry.id, entry.floor_fraction
                )));
            }
        }

        Ok(())
    }
}
