//! Canonical file paths for run inputs and generated outputs.
//!
//! Default outputs land under the project root's `data/generated/`
//! directory; paths inside a run config resolve against the config file.

use std::path::{Path, PathBuf};

/// Returns the workspace root directory.
///
/// Resolved at compile time from `CARGO_MANIFEST_DIR`; falls back to the
/// manifest directory itself if it has too few ancestors.
#[must_use]
pub fn project_root() -> PathBuf {
    let manifest = Path::new(env!("CARGO_MANIFEST_DIR"));
    manifest
        .ancestors()
        .nth(2)
        .map_or_else(|| manifest.to_path_buf(), Path::to_path_buf)
}

/// Returns the `data/` directory path.
#[must_use]
pub fn data_dir() -> PathBuf {
    project_root().join("data")
}

/// Returns the `data/generated/` directory for output artifacts.
#[must_use]
pub fn generated_dir() -> PathBuf {
    data_dir().join("generated")
}

/// Default directory for a run's JSON outputs.
#[must_use]
pub fn default_output_dir() -> PathBuf {
    generated_dir().join("closure_risk")
}

/// Resolves `path` against `base` unless it is already absolute.
#[must_use]
pub fn resolve(base: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Path of the projections document inside `output_dir`.
#[must_use]
pub fn projections_path(output_dir: &Path) -> PathBuf {
    output_dir.join("projections.json")
}

/// Path of the run summary inside `output_dir`.
#[must_use]
pub fn summary_path(output_dir: &Path) -> PathBuf {
    output_dir.join("run_summary.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_relative_paths_against_base() {
        let base = Path::new("/runs/2025");
        assert_eq!(
            resolve(base, Path::new("inputs/schools.csv")),
            PathBuf::from("/runs/2025/inputs/schools.csv")
        );
        assert_eq!(
            resolve(base, Path::new("/data/cc-est.csv.gz")),
            PathBuf::from("/data/cc-est.csv.gz")
        );
    }

    #[test]
    fn outputs_live_under_generated() {
        assert!(default_output_dir().starts_with(generated_dir()));
        assert!(projections_path(Path::new("out")).ends_with("projections.json"));
    }
}
