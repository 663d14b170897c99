//! Row source for raw population extracts.
//!
//! Extracts are wide CSV files with one row per geography, year, and
//! demographic cell. An [`ExtractLayout`] names the columns that matter;
//! every other column (sex, race, alternate scenario values) is ignored,
//! so summing rows sums over those dimensions.
//!
//! Files may be plain CSV, gzip-compressed (`.gz`), or a zip archive whose
//! first `.csv` entry is read (`.zip`).

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use closure_risk_geography_models::fips;
use closure_risk_population_models::{
    AgeBand, MalformedReason, MalformedRecord, PopulationRow,
};
use serde::{Deserialize, Serialize};

use crate::PopulationError;

/// Column names for the fields the aggregator needs.
///
/// Matching is case-insensitive and ignores surrounding whitespace and a
/// leading byte-order mark.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractLayout {
    /// Calendar year column.
    pub year: String,
    /// State FIPS column (zero-padded to two digits). Postal
    /// abbreviations and state names are also accepted.
    pub state: String,
    /// County FIPS column (zero-padded to three digits). When absent the
    /// geography key is the two-digit state code.
    pub county: Option<String>,
    /// A column holding a ready-made geography key. Takes precedence over
    /// `state`/`county` when set.
    pub geography: Option<String>,
    /// Age-band column (band index or range label).
    pub age: String,
    /// Population value column.
    pub value: String,
}

impl Default for ExtractLayout {
    fn default() -> Self {
        Self {
            year: "YEAR".to_string(),
            state: "STATE".to_string(),
            county: Some("COUNTY".to_string()),
            geography: None,
            age: "AGE".to_string(),
            value: "SSP2".to_string(),
        }
    }
}

/// Resolved column indexes for one file.
#[derive(Debug, Clone, Copy)]
enum GeographyColumns {
    Key(usize),
    State(usize),
    StateCounty(usize, usize),
}

#[derive(Debug, Clone, Copy)]
struct Columns {
    year: usize,
    geography: GeographyColumns,
    age: usize,
    value: usize,
}

impl Columns {
    fn resolve(headers: &csv::StringRecord, layout: &ExtractLayout) -> Result<Self, PopulationError> {
        let find = |name: &str| {
            headers
                .iter()
                .position(|h| normalize_header(h).eq_ignore_ascii_case(name.trim()))
                .ok_or_else(|| PopulationError::MissingColumn {
                    column: name.to_string(),
                })
        };

        let geography = match (&layout.geography, &layout.county) {
            (Some(key), _) => GeographyColumns::Key(find(key)?),
            (None, Some(county)) => GeographyColumns::StateCounty(find(&layout.state)?, find(county)?),
            (None, None) => GeographyColumns::State(find(&layout.state)?),
        };

        Ok(Self {
            year: find(&layout.year)?,
            geography,
            age: find(&layout.age)?,
            value: find(&layout.value)?,
        })
    }
}

fn normalize_header(header: &str) -> &str {
    header.trim_start_matches('\u{feff}').trim()
}

/// Streams [`PopulationRow`]s out of a CSV extract.
///
/// Yields `Err(MalformedRecord)` for rows that cannot be parsed and keeps
/// going. An I/O failure in the underlying reader ends the stream; it is
/// surfaced by [`ExtractReader::into_result`].
pub struct ExtractReader<'a> {
    records: csv::StringRecordsIntoIter<Box<dyn Read + 'a>>,
    columns: Columns,
    band_count: u8,
    line: u64,
    failure: Option<csv::Error>,
}

impl<'a> ExtractReader<'a> {
    /// Wraps `reader`, reading its header row immediately.
    ///
    /// # Errors
    ///
    /// Returns an error if the header cannot be read or a layout column is
    /// missing from it.
    pub fn from_reader(
        reader: impl Read + 'a,
        layout: &ExtractLayout,
        band_count: u8,
    ) -> Result<Self, PopulationError> {
        let boxed: Box<dyn Read + 'a> = Box::new(reader);
        let mut csv_reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(boxed);

        let headers = csv_reader.headers()?.clone();
        let columns = Columns::resolve(&headers, layout)?;

        Ok(Self {
            records: csv_reader.into_records(),
            columns,
            band_count,
            line: 1,
            failure: None,
        })
    }

    /// Consumes the reader, returning the I/O error that ended the stream
    /// early, if any.
    ///
    /// # Errors
    ///
    /// Returns the underlying read failure.
    pub fn into_result(self) -> Result<(), PopulationError> {
        self.failure.map_or(Ok(()), |e| Err(e.into()))
    }

    fn parse(&self, record: &csv::StringRecord) -> Result<PopulationRow, MalformedReason> {
        let field = |index: usize| {
            record
                .get(index)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .ok_or(MalformedReason::MissingField)
        };

        let geography_id = match self.columns.geography {
            GeographyColumns::Key(index) => field(index)?.to_string(),
            GeographyColumns::State(state) => state_code(field(state)?)?,
            GeographyColumns::StateCounty(state, county) => {
                let state = state_code(field(state)?)?;
                let county = field(county)?;
                if !is_numeric_code(county) {
                    return Err(MalformedReason::MissingField);
                }
                format!("{state}{}", fips::pad_code(county, 3))
            }
        };

        let year_text = field(self.columns.year)?;
        let year = year_text
            .strip_suffix(".0")
            .unwrap_or(year_text)
            .parse::<i32>()
            .map_err(|_| MalformedReason::InvalidYear)?;

        let age_band = AgeBand::parse(field(self.columns.age)?, self.band_count)
            .ok_or(MalformedReason::UnknownAgeBand)?;

        let value = field(self.columns.value)?
            .replace(',', "")
            .parse::<f64>()
            .map_err(|_| MalformedReason::InvalidNumber)?;
        if !value.is_finite() {
            return Err(MalformedReason::InvalidNumber);
        }
        if value < 0.0 {
            return Err(MalformedReason::NegativeValue);
        }

        Ok(PopulationRow {
            geography_id,
            year,
            age_band,
            value,
        })
    }
}

fn is_numeric_code(code: &str) -> bool {
    let code = code.strip_suffix(".0").unwrap_or(code);
    !code.is_empty() && code.bytes().all(|b| b.is_ascii_digit())
}

fn state_code(raw: &str) -> Result<String, MalformedReason> {
    if is_numeric_code(raw) {
        return Ok(fips::pad_code(raw, 2));
    }
    fips::resolve(raw)
        .map(|s| s.fips.to_string())
        .ok_or(MalformedReason::MissingField)
}

impl Iterator for ExtractReader<'_> {
    type Item = Result<PopulationRow, MalformedRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failure.is_some() {
            return None;
        }

        let next = self.records.next()?;
        self.line += 1;

        match next {
            Ok(record) => {
                let line = record.position().map_or(self.line, csv::Position::line);
                Some(self.parse(&record).map_err(|reason| MalformedRecord {
                    line: Some(line),
                    reason,
                }))
            }
            Err(e) if matches!(e.kind(), csv::ErrorKind::Io(_)) => {
                log::warn!("Extract read stopped at line {}: {e}", self.line);
                self.failure = Some(e);
                None
            }
            Err(e) => Some(Err(MalformedRecord {
                line: e.position().map(csv::Position::line).or(Some(self.line)),
                reason: MalformedReason::Unreadable,
            })),
        }
    }
}

/// Compression wrapper detected from a file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Container {
    Plain,
    Gzip,
    Zip,
}

impl Container {
    fn of(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase)
            .as_deref()
        {
            Some("gz") => Self::Gzip,
            Some("zip") => Self::Zip,
            _ => Self::Plain,
        }
    }
}

/// Opens an extract file and hands a row stream over it to `f`.
///
/// # Errors
///
/// Returns an error if the file cannot be opened, a zip archive holds no
/// CSV entry, the header is missing a layout column, or reading fails
/// partway through.
pub fn with_extract_rows<T>(
    path: &Path,
    layout: &ExtractLayout,
    band_count: u8,
    f: impl FnOnce(&mut ExtractReader<'_>) -> T,
) -> Result<T, PopulationError> {
    log::info!("Reading population extract {}", path.display());
    let file = File::open(path)?;

    match Container::of(path) {
        Container::Plain => drive(BufReader::new(file), layout, band_count, f),
        Container::Gzip => drive(
            flate2::read::MultiGzDecoder::new(BufReader::new(file)),
            layout,
            band_count,
            f,
        ),
        Container::Zip => {
            let mut archive = zip::ZipArchive::new(BufReader::new(file))?;
            let mut found = None;
            for i in 0..archive.len() {
                let name = match archive.by_index(i) {
                    Ok(entry) => entry.name().to_string(),
                    Err(e) => {
                        log::warn!("Skipping corrupt zip entry {i}: {e}");
                        continue;
                    }
                };
                if name.to_ascii_lowercase().ends_with(".csv") {
                    log::debug!("Using archive entry {name}");
                    found = Some(i);
                    break;
                }
            }

            let index = found.ok_or_else(|| PopulationError::NoCsvInArchive {
                path: path.to_path_buf(),
            })?;
            drive(archive.by_index(index)?, layout, band_count, f)
        }
    }
}

fn drive<R: Read, T>(
    reader: R,
    layout: &ExtractLayout,
    band_count: u8,
    f: impl FnOnce(&mut ExtractReader<'_>) -> T,
) -> Result<T, PopulationError> {
    let mut rows = ExtractReader::from_reader(reader, layout, band_count)?;
    let out = f(&mut rows);
    rows.into_result()?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use closure_risk_population_models::STANDARD_BAND_COUNT;

    use super::*;

    const SAMPLE: &str = "\u{feff}YEAR,SEX,STATE,COUNTY,GEOID,RACE,AGE,SSP1,SSP2\n\
        2020,1,6,1,06001,1,1,10,11\n\
        2020,2,06,001,06001,1,14,20,21.5\n\
        2030,1,26,163,26163,2,18,5,6\n\
        2030,1,26,163,26163,2,19,5,6\n\
        2030,1,26,163,26163,2,3,5,-1\n\
        abc,1,26,163,26163,2,3,5,1\n\
        2030,1,26,,26163,2,3,5,1\n\
        2030,1,26,163,26163,2,3,5,n/a\n";

    fn rows(bytes: &[u8]) -> Vec<Result<PopulationRow, MalformedRecord>> {
        ExtractReader::from_reader(bytes, &ExtractLayout::default(), STANDARD_BAND_COUNT)
            .unwrap()
            .collect()
    }

    #[test]
    fn reads_county_rows() {
        let rows = rows(SAMPLE.as_bytes());
        assert_eq!(rows.len(), 8);

        let first = rows[0].as_ref().unwrap();
        assert_eq!(first.geography_id, "06001");
        assert_eq!(first.year, 2020);
        assert_eq!(first.age_band.index(), 1);
        assert!((first.value - 11.0).abs() < f64::EPSILON);

        let second = rows[1].as_ref().unwrap();
        assert_eq!(second.geography_id, "06001");
        assert!((second.value - 21.5).abs() < f64::EPSILON);

        assert_eq!(rows[2].as_ref().unwrap().geography_id, "26163");
    }

    #[test]
    fn classifies_malformed_rows() {
        let rows = rows(SAMPLE.as_bytes());
        let reasons: Vec<MalformedReason> = rows
            .iter()
            .filter_map(|r| r.as_ref().err().map(|e| e.reason))
            .collect();

        assert_eq!(
            reasons,
            vec![
                MalformedReason::UnknownAgeBand,
                MalformedReason::NegativeValue,
                MalformedReason::InvalidYear,
                MalformedReason::MissingField,
                MalformedReason::InvalidNumber,
            ]
        );
        assert_eq!(rows[3].as_ref().unwrap_err().line, Some(5));
    }

    #[test]
    fn state_only_layout() {
        let layout = ExtractLayout {
            county: None,
            value: "SSP1".to_string(),
            ..ExtractLayout::default()
        };
        let first = ExtractReader::from_reader(SAMPLE.as_bytes(), &layout, STANDARD_BAND_COUNT)
            .unwrap()
            .next()
            .unwrap()
            .unwrap();
        assert_eq!(first.geography_id, "06");
        assert!((first.value - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn geography_key_column_and_labels() {
        let data = "geoid,year,age_group,population\n\
            lea-1,2021,5 to 9,120\n\
            lea-1,2021,85+,3\n";
        let layout = ExtractLayout {
            year: "year".to_string(),
            geography: Some("geoid".to_string()),
            age: "age_group".to_string(),
            value: "population".to_string(),
            ..ExtractLayout::default()
        };
        let rows: Vec<PopulationRow> =
            ExtractReader::from_reader(data.as_bytes(), &layout, STANDARD_BAND_COUNT)
                .unwrap()
                .map(Result::unwrap)
                .collect();

        assert_eq!(rows[0].geography_id, "lea-1");
        assert_eq!(rows[0].age_band.index(), 2);
        assert_eq!(rows[1].age_band.index(), 18);
    }

    #[test]
    fn missing_column_is_fatal() {
        let layout = ExtractLayout {
            value: "SSP9".to_string(),
            ..ExtractLayout::default()
        };
        let err = ExtractReader::from_reader(SAMPLE.as_bytes(), &layout, STANDARD_BAND_COUNT)
            .err()
            .unwrap();
        assert!(matches!(err, PopulationError::MissingColumn { column } if column == "SSP9"));
    }

    #[test]
    fn reads_gzip_in_memory() {
        let mut encoder =
            flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(SAMPLE.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let decoder = flate2::read::MultiGzDecoder::new(compressed.as_slice());
        let rows: Vec<_> =
            ExtractReader::from_reader(decoder, &ExtractLayout::default(), STANDARD_BAND_COUNT)
                .unwrap()
                .collect();
        assert_eq!(rows.len(), 8);
        assert_eq!(rows.iter().filter(|r| r.is_ok()).count(), 3);
    }

    #[test]
    fn container_from_extension() {
        assert_eq!(Container::of(Path::new("a/hauer.csv")), Container::Plain);
        assert_eq!(Container::of(Path::new("a/hauer.csv.gz")), Container::Gzip);
        assert_eq!(Container::of(Path::new("a/hauer.ZIP")), Container::Zip);
    }
}
