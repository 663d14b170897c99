#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Streaming aggregation of population-by-age extracts.
//!
//! Raw extracts can run to tens of millions of rows (one per
//! county/year/sex/race/age cell). [`aggregator::StreamingAggregator`]
//! folds them into one total per geography and year while holding only
//! the per-key accumulator table in memory. [`extract`] turns a CSV file
//! (plain, gzip, or zipped) into the row stream the aggregator consumes.

pub mod aggregator;
pub mod extract;
pub mod progress;
pub mod rollup;

use std::path::PathBuf;

use thiserror::Error;

/// Errors that abort an aggregation run.
///
/// Individual bad rows are never reported through this type; they are
/// counted in [`closure_risk_population_models::AggregateStats`].
#[derive(Debug, Error)]
pub enum PopulationError {
    /// Reading the extract failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The CSV header could not be read.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// The zip archive could not be opened.
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// The extract lacks a column named in the layout.
    #[error("Extract is missing column {column:?}")]
    MissingColumn {
        /// Column name from the layout.
        column: String,
    },

    /// A zip archive holds no `.csv` entry.
    #[error("No CSV entry in archive {}", path.display())]
    NoCsvInArchive {
        /// Archive path.
        path: PathBuf,
    },

    /// The aggregation setup is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of what went wrong.
        message: String,
    },
}
