#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Terminal plumbing shared by the closure risk binaries.
//!
//! [`IndicatifProgress`] renders aggregation and scoring progress through
//! [`ProgressCallback`]. [`init_logger`] routes `log` output through
//! `indicatif-log-bridge` so log lines print above live bars instead of
//! tearing them.

use std::sync::Arc;
use std::time::Duration;

use closure_risk_population::progress::ProgressCallback;
use indicatif::{ProgressBar, ProgressStyle};

pub use indicatif::MultiProgress;

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info";

const SPINNER_TICK: Duration = Duration::from_millis(120);

/// Progress display backed by an `indicatif` bar or spinner.
pub struct IndicatifProgress {
    bar: ProgressBar,
    unit: &'static str,
}

impl IndicatifProgress {
    fn attach(
        multi: &MultiProgress,
        bar: ProgressBar,
        message: &str,
        unit: &'static str,
    ) -> Arc<dyn ProgressCallback> {
        let bar = multi.add(bar);
        bar.set_message(message.to_string());
        Arc::new(Self { bar, unit })
    }

    /// Spinner counting rows of an extract whose length is unknown.
    #[must_use]
    pub fn rows_spinner(multi: &MultiProgress, message: &str) -> Arc<dyn ProgressCallback> {
        let bar = ProgressBar::new_spinner().with_style(
            ProgressStyle::with_template(
                "{spinner:.cyan} {msg} {human_pos} rows ({per_sec}) [{elapsed}]",
            )
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        bar.enable_steady_tick(SPINNER_TICK);
        Self::attach(multi, bar, message, "rows")
    }

    /// Bar over a known number of steps, e.g. geographies scored.
    #[must_use]
    pub fn steps_bar(
        multi: &MultiProgress,
        message: &str,
        total: u64,
    ) -> Arc<dyn ProgressCallback> {
        let bar = ProgressBar::new(total).with_style(
            ProgressStyle::with_template("{msg} [{bar:40.green/dim}] {pos}/{len} ({eta})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        Self::attach(multi, bar, message, "steps")
    }
}

impl ProgressCallback for IndicatifProgress {
    fn inc(&self, delta: u64) {
        if delta > 0 {
            self.bar.inc(delta);
        }
    }

    fn set_message(&self, msg: String) {
        self.bar.set_message(msg);
    }

    fn finish(&self, msg: String) {
        log::debug!("{msg} after {} {}", self.bar.position(), self.unit);
        self.bar.finish_with_message(msg);
    }
}

/// Installs the global logger behind `indicatif-log-bridge` and returns
/// the [`MultiProgress`] every bar must be added to.
///
/// The filter comes from `RUST_LOG`, falling back to
/// [`DEFAULT_LOG_FILTER`].
#[must_use]
pub fn init_logger() -> MultiProgress {
    let multi = MultiProgress::new();

    let mut builder = pretty_env_logger::formatted_builder();
    match std::env::var("RUST_LOG") {
        Ok(filter) if !filter.trim().is_empty() => builder.parse_filters(&filter),
        _ => builder.parse_filters(DEFAULT_LOG_FILTER),
    };
    let logger = builder.build();
    let level = logger.filter();

    // Already installed when a test harness set up logging first.
    if indicatif_log_bridge::LogWrapper::new(multi.clone(), logger)
        .try_init()
        .is_ok()
    {
        log::set_max_level(level);
    }

    multi
}
