//! Single-pass, bounded-memory aggregation of [`PopulationRow`]s.
//!
//! Rows are filtered on year and geography *before* they touch the
//! accumulator table, so the table only ever holds one entry per distinct
//! `(geography, year)` key that survives filtering.
//!
//! Sums are kept in fixed point (millionths) so that accumulation is
//! exactly commutative and associative: any permutation or partitioning
//! of the same rows produces bit-identical aggregates.

use std::collections::{BTreeMap, BTreeSet};

use closure_risk_geography_models::fips;
use closure_risk_population_models::{
    AggregateReport, AggregateStats, GeographyYearAggregate, MalformedReason, MalformedRecord,
    PopulationRow, STANDARD_BAND_COUNT, SubtotalRule,
};

use crate::PopulationError;
use crate::progress::ProgressCallback;

/// Fixed-point resolution for accumulated values.
const FIXED_POINT_SCALE: f64 = 1_000_000.0;

/// Largest value a single row may carry. Anything above is treated as a
/// corrupt cell; keeping rows below this leaves room for trillions of rows
/// in an `i128` sum.
pub const MAX_ROW_VALUE: f64 = 1e15;

/// Emit a milestone log line every this many rows.
const LOG_EVERY_ROWS: u64 = 5_000_000;

/// Batch size for progress callback updates.
const PROGRESS_BATCH: u64 = 100_000;

/// Converts a non-negative value to fixed point.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn to_fixed(value: f64) -> i128 {
    (value * FIXED_POINT_SCALE).round() as i128
}

/// Converts a fixed-point sum back to a float.
#[allow(clippy::cast_precision_loss)]
pub(crate) fn from_fixed(sum: i128) -> f64 {
    sum as f64 / FIXED_POINT_SCALE
}

/// Which geography keys the aggregator accepts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum GeographyFilter {
    /// Accept every key.
    #[default]
    Any,
    /// Accept state or county keys whose state prefix is one of the
    /// 50 states + DC (territories are dropped).
    States,
    /// Accept only these exact keys.
    Exact(BTreeSet<String>),
}

impl GeographyFilter {
    /// Returns `true` if rows for `geography_id` should be kept.
    #[must_use]
    pub fn accepts(&self, geography_id: &str) -> bool {
        match self {
            Self::Any => !geography_id.is_empty(),
            Self::States => geography_id
                .get(..2)
                .is_some_and(fips::is_state_fips),
            Self::Exact(keys) => keys.contains(geography_id),
        }
    }
}

/// Aggregation settings: which rows to keep and which subtotals to build.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    /// Years retained; every other year is dropped before accumulation.
    pub target_years: BTreeSet<i32>,
    /// Geography filter applied before accumulation.
    pub geographies: GeographyFilter,
    /// Named subtotals accumulated alongside the total.
    pub subtotals: Vec<SubtotalRule>,
    /// Number of age bands in the extract layout.
    pub band_count: u8,
}

impl AggregatorConfig {
    /// Creates a config retaining `target_years`, accepting any geography,
    /// with no subtotals and the standard 18-band layout.
    #[must_use]
    pub fn new(target_years: impl IntoIterator<Item = i32>) -> Self {
        Self {
            target_years: target_years.into_iter().collect(),
            geographies: GeographyFilter::Any,
            subtotals: Vec::new(),
            band_count: STANDARD_BAND_COUNT,
        }
    }

    /// Sets the geography filter.
    #[must_use]
    pub fn with_geographies(mut self, filter: GeographyFilter) -> Self {
        self.geographies = filter;
        self
    }

    /// Adds a named subtotal.
    #[must_use]
    pub fn with_subtotal(mut self, rule: SubtotalRule) -> Self {
        self.subtotals.push(rule);
        self
    }

    /// Sets the number of age bands in the layout.
    #[must_use]
    pub const fn with_band_count(mut self, band_count: u8) -> Self {
        self.band_count = band_count;
        self
    }

    /// Checks the config for mistakes that would make results meaningless.
    ///
    /// # Errors
    ///
    /// Returns [`PopulationError::Configuration`] if no target year is
    /// set, the band count is zero, or a subtotal rule is empty, refers to
    /// a band outside the layout, has a weight outside `(0, 1]`, reuses
    /// the reserved name `"total"`, or duplicates another subtotal's name.
    pub fn validate(&self) -> Result<(), PopulationError> {
        let fail = |message: String| Err(PopulationError::Configuration { message });

        if self.target_years.is_empty() {
            return fail("aggregation needs at least one target year".to_string());
        }
        if self.band_count == 0 {
            return fail("band count must be positive".to_string());
        }

        let mut names = BTreeSet::new();
        for rule in &self.subtotals {
            if rule.name.is_empty() || rule.name == GeographyYearAggregate::TOTAL {
                return fail(format!("invalid subtotal name {:?}", rule.name));
            }
            if !names.insert(rule.name.as_str()) {
                return fail(format!("duplicate subtotal {:?}", rule.name));
            }
            if rule.min_band.is_none() && rule.bands.is_empty() && rule.partial.is_empty() {
                return fail(format!("subtotal {:?} selects no bands", rule.name));
            }

            let in_layout = |band: u8| (1..=self.band_count).contains(&band);
            let listed = rule
                .min_band
                .iter()
                .chain(&rule.bands)
                .chain(rule.partial.iter().map(|p| &p.band));
            if let Some(band) = listed.copied().find(|&b| !in_layout(b)) {
                return fail(format!(
                    "subtotal {:?} refers to band {band} outside 1..={}",
                    rule.name, self.band_count
                ));
            }

            for partial in &rule.partial {
                if !(partial.weight > 0.0 && partial.weight <= 1.0) {
                    return fail(format!(
                        "subtotal {:?} band {} weight {} is outside (0, 1]",
                        rule.name, partial.band, partial.weight
                    ));
                }
                if rule.bands.contains(&partial.band) {
                    return fail(format!(
                        "subtotal {:?} lists band {} as both full and partial",
                        rule.name, partial.band
                    ));
                }
            }
        }

        Ok(())
    }
}

/// Fixed-point sums for one `(geography, year)` key.
#[derive(Debug, Clone)]
struct Accumulator {
    total: i128,
    subtotals: Vec<i128>,
}

impl Accumulator {
    fn new(subtotal_count: usize) -> Self {
        Self {
            total: 0,
            subtotals: vec![0; subtotal_count],
        }
    }
}

/// Folds population rows into per-geography, per-year sums.
#[derive(Debug, Clone)]
pub struct StreamingAggregator {
    config: AggregatorConfig,
    table: BTreeMap<(String, i32), Accumulator>,
    stats: AggregateStats,
}

impl StreamingAggregator {
    /// Creates an aggregator after validating `config`.
    ///
    /// # Errors
    ///
    /// Returns [`PopulationError::Configuration`] if the config is invalid.
    pub fn new(config: AggregatorConfig) -> Result<Self, PopulationError> {
        config.validate()?;
        Ok(Self {
            config,
            table: BTreeMap::new(),
            stats: AggregateStats::default(),
        })
    }

    /// Returns the config this aggregator was built with.
    #[must_use]
    pub const fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Returns the number of distinct keys accumulated so far.
    #[must_use]
    pub fn key_count(&self) -> usize {
        self.table.len()
    }

    /// Returns the row counters so far.
    #[must_use]
    pub const fn stats(&self) -> &AggregateStats {
        &self.stats
    }

    /// Offers one parsed-or-rejected record to the aggregator.
    pub fn push_record(&mut self, record: Result<PopulationRow, MalformedRecord>) {
        match record {
            Ok(row) => self.push(&row),
            Err(malformed) => {
                self.stats.rows_read += 1;
                self.count_malformed(malformed.reason);
                log::trace!("{malformed}");
            }
        }
    }

    /// Offers one row to the aggregator.
    ///
    /// Rows outside the target years or geography filter are dropped and
    /// counted. Rows with a negative, non-finite, or out-of-range value,
    /// or a band outside the layout, are counted as malformed.
    pub fn push(&mut self, row: &PopulationRow) {
        self.stats.rows_read += 1;

        if !row.value.is_finite() {
            self.count_malformed(MalformedReason::InvalidNumber);
            return;
        }
        if row.value < 0.0 {
            self.count_malformed(MalformedReason::NegativeValue);
            return;
        }
        if row.value > MAX_ROW_VALUE {
            self.count_malformed(MalformedReason::ValueOutOfRange);
            return;
        }
        if row.age_band.index() > self.config.band_count {
            self.count_malformed(MalformedReason::UnknownAgeBand);
            return;
        }
        if !self.config.target_years.contains(&row.year) {
            self.stats.rows_filtered_year += 1;
            return;
        }
        if !self.config.geographies.accepts(&row.geography_id) {
            self.stats.rows_filtered_geography += 1;
            return;
        }

        let subtotal_count = self.config.subtotals.len();
        let acc = self
            .table
            .entry((row.geography_id.clone(), row.year))
            .or_insert_with(|| Accumulator::new(subtotal_count));

        acc.total = acc.total.saturating_add(to_fixed(row.value));
        for (sum, rule) in acc.subtotals.iter_mut().zip(&self.config.subtotals) {
            let weight = rule.weight_for(row.age_band);
            if weight > 0.0 {
                *sum = sum.saturating_add(to_fixed(row.value * weight));
            }
        }

        self.stats.rows_kept += 1;
    }

    /// Drains a row stream into the aggregator, reporting progress.
    pub fn consume<I>(&mut self, rows: I, progress: &dyn ProgressCallback)
    where
        I: IntoIterator<Item = Result<PopulationRow, MalformedRecord>>,
    {
        let mut pending = 0u64;

        for record in rows {
            self.push_record(record);
            pending += 1;

            if pending == PROGRESS_BATCH {
                progress.inc(pending);
                pending = 0;
            }
            if self.stats.rows_read % LOG_EVERY_ROWS == 0 {
                log::info!(
                    "...processed {} rows ({} keys so far)",
                    self.stats.rows_read,
                    self.table.len()
                );
            }
        }

        progress.inc(pending);
    }

    /// Adds another aggregator's partial table into this one.
    ///
    /// Partial tables built from disjoint slices of the same stream merge
    /// into exactly the table a single pass would have built.
    ///
    /// # Errors
    ///
    /// Returns [`PopulationError::Configuration`] if the two aggregators
    /// accumulate different subtotals.
    pub fn merge(&mut self, other: Self) -> Result<(), PopulationError> {
        if self.config.subtotals != other.config.subtotals {
            return Err(PopulationError::Configuration {
                message: "cannot merge aggregators with different subtotals".to_string(),
            });
        }

        for (key, acc) in other.table {
            match self.table.get_mut(&key) {
                Some(existing) => {
                    existing.total = existing.total.saturating_add(acc.total);
                    for (sum, add) in existing.subtotals.iter_mut().zip(&acc.subtotals) {
                        *sum = sum.saturating_add(*add);
                    }
                }
                None => {
                    self.table.insert(key, acc);
                }
            }
        }
        self.stats.absorb(&other.stats);

        Ok(())
    }

    /// Finishes the pass, producing one aggregate per key in key order.
    #[must_use]
    pub fn finish(self) -> AggregateReport {
        let names: Vec<String> = self.config.subtotals.iter().map(|r| r.name.clone()).collect();

        let aggregates = self
            .table
            .into_iter()
            .map(|((geography_id, year), acc)| GeographyYearAggregate {
                geography_id,
                year,
                total: from_fixed(acc.total),
                subtotals: names
                    .iter()
                    .cloned()
                    .zip(acc.subtotals.into_iter().map(from_fixed))
                    .collect(),
            })
            .collect();

        AggregateReport {
            aggregates,
            stats: self.stats,
        }
    }

    fn count_malformed(&mut self, reason: MalformedReason) {
        *self.stats.malformed.entry(reason).or_default() += 1;
    }
}

/// Aggregates a complete row stream in one call.
///
/// # Errors
///
/// Returns [`PopulationError::Configuration`] if the config is invalid.
pub fn aggregate<I>(
    config: AggregatorConfig,
    rows: I,
    progress: &dyn ProgressCallback,
) -> Result<AggregateReport, PopulationError>
where
    I: IntoIterator<Item = Result<PopulationRow, MalformedRecord>>,
{
    let mut aggregator = StreamingAggregator::new(config)?;
    aggregator.consume(rows, progress);
    let report = aggregator.finish();

    if report.is_empty() {
        log::warn!(
            "No rows matched the aggregation filters ({} rows read)",
            report.stats.rows_read
        );
    } else {
        log::info!(
            "Aggregated {} rows into {} geography-year keys ({} malformed, {} filtered)",
            report.stats.rows_kept,
            report.aggregates.len(),
            report.stats.malformed_total(),
            report.stats.rows_filtered_year + report.stats.rows_filtered_geography,
        );
    }

    Ok(report)
}
