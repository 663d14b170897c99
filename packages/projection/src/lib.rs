#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Turns sparse demographic series into dense decline ratios.
//!
//! - [`resample`] maps a sparse `{year: value}` series onto a target-year
//!   grid by interpolation and bounded or trend extrapolation.
//! - [`trajectory`] builds birth-decline trajectories (national curve,
//!   compound state trend) and decline ratios against a baseline year.
//! - [`cohort`] lags a birth-decline trajectory through a grade pipeline
//!   to get the enrollment decline seen in each target year.
//! - [`share`] projects a participation share forward and turns it into a
//!   multiplier on enrollment.
//!
//! Every function here is pure.

pub mod cohort;
pub mod resample;
pub mod share;
pub mod trajectory;

use thiserror::Error;

/// Errors from projection stages.
#[derive(Debug, Error)]
pub enum ProjectionError {
    /// A series has no usable year.
    #[error("No data for geography {geography_id}")]
    NoData {
        /// Geography the empty series belongs to.
        geography_id: String,
    },

    /// A ratio was requested against a baseline of zero.
    #[error("Geography {geography_id} has a zero baseline in {year}")]
    ZeroBaseline {
        /// Geography key.
        geography_id: String,
        /// Baseline year.
        year: i32,
    },

    /// Model parameters are invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of what went wrong.
        message: String,
    },
}
