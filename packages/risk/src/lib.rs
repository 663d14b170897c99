#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Bucketed closure-risk scoring.
//!
//! A geography's institutions are grouped into size [`buckets`]. For a
//! decline ratio, the [`scorer`] projects each bucket's representative
//! enrollment, picks an annual closure probability from the first
//! matching rule of a validated [`model::ClosureModel`], and compounds it
//! over the horizon. The [`composer`] combines independent decline axes
//! into one ratio per scenario and drives the scorer over every
//! combination and target year.
//!
//! Ready-made models ship as [`presets`].

pub mod buckets;
pub mod composer;
pub mod model;
pub mod presets;
pub mod scorer;

use thiserror::Error;

/// Errors from risk scoring.
#[derive(Debug, Error)]
pub enum RiskError {
    /// The model, bucket, or scenario setup is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of what went wrong.
        message: String,
    },

    /// A scenario axis has no ratio for a geography in a year.
    #[error("No {axis} ratio for geography {geography_id} in {year} (entry {entry})")]
    MissingRatio {
        /// Geography key.
        geography_id: String,
        /// Axis name.
        axis: String,
        /// Axis entry id.
        entry: String,
        /// Target year.
        year: i32,
    },

    /// The geography has no institutions to score.
    #[error("Geography {geography_id} has no institutions")]
    NoInstitutions {
        /// Geography key.
        geography_id: String,
    },

    /// A model definition failed to parse.
    #[error("Model parse error: {0}")]
    Parse(#[from] toml::de::Error),
}
