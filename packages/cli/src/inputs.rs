//! Readers for the small CSV inputs of a run.
//!
//! Malformed rows are skipped and counted rather than failing the run;
//! only an unreadable file or a missing header column is fatal.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use closure_risk_geography_models::{GeographyLevel, fips, state_fips_of};
use closure_risk_projection::share::ShareHistory;
use closure_risk_projection_models::YearSeries;
use closure_risk_risk_models::Institution;
use serde::Deserialize;

use crate::PipelineError;
use crate::config::InstitutionsConfig;

/// Geography key of a trajectory row that applies everywhere.
pub const ALL_GEOGRAPHIES: &str = "*";

/// Geography key of a national series.
pub const NATIONAL: &str = "US";

/// Rows parsed from one input file plus the number skipped.
#[derive(Debug, Clone, PartialEq)]
pub struct Parsed<T> {
    pub rows: T,
    pub skipped: u64,
}

fn open(path: &Path) -> Result<BufReader<File>, PipelineError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(PipelineError::io(path))
}

fn csv_reader<R: Read>(reader: R) -> csv::Reader<R> {
    csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(reader)
}

/// Deserializes every row of a headered CSV, skipping rows that do not
/// fit `T`.
fn records<T, R>(reader: R, path: &Path) -> Result<Parsed<Vec<T>>, PipelineError>
where
    T: for<'de> Deserialize<'de>,
    R: Read,
{
    let mut reader = csv_reader(reader);
    reader.headers().map_err(PipelineError::csv(path))?;

    let mut rows = Vec::new();
    let mut skipped = 0;
    for result in reader.deserialize::<T>() {
        match result {
            Ok(row) => rows.push(row),
            Err(e) => {
                log::trace!("{}: skipping malformed row: {e}", path.display());
                skipped += 1;
            }
        }
    }

    if skipped > 0 {
        log::warn!("{}: skipped {skipped} malformed rows", path.display());
    }
    Ok(Parsed { rows, skipped })
}

/// Normalizes a geography key from an input file.
///
/// Numeric keys are zero-padded (one or two digits to a state code, three
/// to five digits to a county code). With `to_state`, county keys collapse
/// to their state and state names or postal abbreviations resolve to
/// FIPS codes.
#[must_use]
pub fn normalize_geography(raw: &str, to_state: bool) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }

    let key = if raw.bytes().all(|b| b.is_ascii_digit()) {
        match raw.len() {
            1..=2 => fips::pad_code(raw, 2),
            3..=5 => fips::pad_code(raw, 5),
            _ => raw.to_string(),
        }
    } else {
        raw.to_string()
    };

    if !to_state {
        return Some(key);
    }
    match GeographyLevel::of(&key) {
        GeographyLevel::State | GeographyLevel::County => {
            state_fips_of(&key).map(ToString::to_string)
        }
        GeographyLevel::Other => fips::resolve(&key).map(|s| s.fips.to_string()),
    }
}

/// Reads the institution directory.
///
/// # Errors
///
/// Fails if the file cannot be opened or lacks a configured column.
/// Unreadable rows are skipped and counted.
pub fn read_institutions(
    path: &Path,
    config: &InstitutionsConfig,
) -> Result<Parsed<Vec<Institution>>, PipelineError> {
    parse_institutions(open(path)?, path, config)
}

fn parse_institutions(
    reader: impl Read,
    path: &Path,
    config: &InstitutionsConfig,
) -> Result<Parsed<Vec<Institution>>, PipelineError> {
    let mut reader = csv_reader(reader);
    let headers = reader.headers().map_err(PipelineError::csv(path))?.clone();
    let column = |name: &str| {
        headers
            .iter()
            .position(|h| h.trim_start_matches('\u{feff}').eq_ignore_ascii_case(name))
            .ok_or_else(|| {
                PipelineError::invalid(format!(
                    "{} has no column {name:?}",
                    path.display()
                ))
            })
    };
    let geography = column(&config.geography_column)?;
    let id = column(&config.id_column)?;
    let enrollment = column(&config.enrollment_column)?;

    let mut rows = Vec::new();
    let mut skipped = 0;
    for result in reader.records() {
        let record = match result {
            Ok(record) => record,
            Err(e) => {
                log::trace!("{}: skipping unreadable row: {e}", path.display());
                skipped += 1;
                continue;
            }
        };
        match institution(&record, [geography, id, enrollment], config.to_state) {
            Some(institution) => rows.push(institution),
            None => skipped += 1,
        }
    }

    if skipped > 0 {
        log::warn!(
            "{}: skipped {skipped} unreadable or incomplete institution rows",
            path.display()
        );
    }
    log::info!("Read {} institutions from {}", rows.len(), path.display());
    Ok(Parsed { rows, skipped })
}

fn institution(
    record: &csv::StringRecord,
    [geography, id, enrollment]: [usize; 3],
    to_state: bool,
) -> Option<Institution> {
    let geography_id = normalize_geography(record.get(geography)?, to_state)?;
    let institution_id = record.get(id).filter(|s| !s.is_empty())?.to_string();
    let enrollment = record.get(enrollment)?.replace(',', "").parse::<f64>().ok()?;
    Some(Institution {
        geography_id,
        institution_id,
        enrollment,
    })
}

#[derive(Debug, Deserialize)]
struct SeriesRow {
    geography_id: String,
    year: i32,
    value: f64,
}

/// Reads a sparse `geography_id,year,value` series file, one series per
/// geography.
///
/// # Errors
///
/// Fails if the file cannot be read.
pub fn read_series(path: &Path) -> Result<Parsed<BTreeMap<String, YearSeries>>, PipelineError> {
    parse_series(open(path)?, path)
}

fn parse_series(
    reader: impl Read,
    path: &Path,
) -> Result<Parsed<BTreeMap<String, YearSeries>>, PipelineError> {
    let Parsed { rows, mut skipped } = records::<SeriesRow, _>(reader, path)?;

    let mut points: BTreeMap<String, Vec<(i32, f64)>> = BTreeMap::new();
    for row in rows {
        match normalize_geography(&row.geography_id, false) {
            Some(key) => points.entry(key).or_default().push((row.year, row.value)),
            None => skipped += 1,
        }
    }

    let series = points
        .into_iter()
        .map(|(key, values)| {
            let series = YearSeries::new(key.clone(), values);
            (key, series)
        })
        .collect();
    Ok(Parsed {
        rows: series,
        skipped,
    })
}

#[derive(Debug, Deserialize)]
struct NationalRow {
    year: i32,
    value: f64,
}

/// Reads a national `year,value` series.
///
/// # Errors
///
/// Fails if the file cannot be read.
pub fn read_national(path: &Path) -> Result<Parsed<YearSeries>, PipelineError> {
    parse_national(open(path)?, path)
}

fn parse_national(reader: impl Read, path: &Path) -> Result<Parsed<YearSeries>, PipelineError> {
    let Parsed { rows, skipped } = records::<NationalRow, _>(reader, path)?;
    Ok(Parsed {
        rows: YearSeries::new(NATIONAL, rows.into_iter().map(|r| (r.year, r.value))),
        skipped,
    })
}

/// Observed fertility for one geography.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct FertilityRow {
    pub geography_id: String,
    /// Births per 1,000 women in the base year.
    pub base_rate: f64,
    /// Proportional decline over the observed span.
    pub observed_decline: f64,
}

/// Reads a `geography_id,base_rate,observed_decline` file.
///
/// # Errors
///
/// Fails if the file cannot be read.
pub fn read_fertility(path: &Path) -> Result<Parsed<Vec<FertilityRow>>, PipelineError> {
    parse_fertility(open(path)?, path)
}

fn parse_fertility(
    reader: impl Read,
    path: &Path,
) -> Result<Parsed<Vec<FertilityRow>>, PipelineError> {
    let Parsed { rows, mut skipped } = records::<FertilityRow, _>(reader, path)?;
    let rows = rows
        .into_iter()
        .filter_map(|row| match normalize_geography(&row.geography_id, false) {
            Some(geography_id) => Some(FertilityRow {
                geography_id,
                ..row
            }),
            None => {
                skipped += 1;
                None
            }
        })
        .collect();
    Ok(Parsed { rows, skipped })
}

#[derive(Debug, Deserialize)]
struct TrajectoryRow {
    #[serde(default)]
    scenario_id: Option<String>,
    geography_id: String,
    year: i32,
    decline_pct: f64,
}

/// Reads `[scenario_id,]geography_id,year,decline_pct` trajectories,
/// keeping only rows of `scenario` when one is given.
///
/// # Errors
///
/// Fails if the file cannot be read.
pub fn read_trajectories(
    path: &Path,
    scenario: Option<&str>,
) -> Result<Parsed<BTreeMap<String, BTreeMap<i32, f64>>>, PipelineError> {
    parse_trajectories(open(path)?, path, scenario)
}

fn parse_trajectories(
    reader: impl Read,
    path: &Path,
    scenario: Option<&str>,
) -> Result<Parsed<BTreeMap<String, BTreeMap<i32, f64>>>, PipelineError> {
    let Parsed { rows, mut skipped } = records::<TrajectoryRow, _>(reader, path)?;

    let mut trajectories: BTreeMap<String, BTreeMap<i32, f64>> = BTreeMap::new();
    for row in rows {
        if let Some(wanted) = scenario
            && row.scenario_id.as_deref() != Some(wanted)
        {
            continue;
        }
        if !row.decline_pct.is_finite() {
            skipped += 1;
            continue;
        }
        let key = if row.geography_id == ALL_GEOGRAPHIES {
            Some(ALL_GEOGRAPHIES.to_string())
        } else {
            normalize_geography(&row.geography_id, false)
        };
        match key {
            Some(key) => {
                trajectories
                    .entry(key)
                    .or_default()
                    .insert(row.year, row.decline_pct);
            }
            None => skipped += 1,
        }
    }

    Ok(Parsed {
        rows: trajectories,
        skipped,
    })
}

#[derive(Debug, Deserialize)]
struct ShareRow {
    year: i32,
    enrolled: f64,
    population: f64,
}

/// Reads a `year,enrolled,population` participation history.
///
/// # Errors
///
/// Fails if the file cannot be read.
pub fn read_share_history(path: &Path) -> Result<Parsed<ShareHistory>, PipelineError> {
    parse_share_history(open(path)?, path)
}

fn parse_share_history(
    reader: impl Read,
    path: &Path,
) -> Result<Parsed<ShareHistory>, PipelineError> {
    let Parsed { rows, skipped } = records::<ShareRow, _>(reader, path)?;
    Ok(Parsed {
        rows: ShareHistory::from_counts(rows.into_iter().map(|r| (r.year, r.enrolled, r.population))),
        skipped,
    })
}
