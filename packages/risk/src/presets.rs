//! Compile-time registry of closure model presets.
//!
//! Each entry is a `(name, toml_content)` pair embedded via `include_str!`.
//! Adding a preset means creating a TOML file in `presets/` and adding an
//! entry here.

use crate::RiskError;
use crate::model::ClosureModel;

/// Number of registered presets. Enforced by a test.
#[cfg(test)]
const EXPECTED_PRESET_COUNT: usize = 2;

/// Preset used when a run names none.
pub const DEFAULT_PRESET: &str = "calibrated";

/// Embedded TOML model definitions.
const PRESET_TOMLS: &[(&str, &str)] = &[
    ("calibrated", include_str!("../presets/calibrated.toml")),
    ("legacy", include_str!("../presets/legacy.toml")),
];

/// Returns the names of all registered presets.
#[must_use]
pub fn preset_names() -> Vec<&'static str> {
    PRESET_TOMLS.iter().map(|(name, _)| *name).collect()
}

/// Returns all registered presets, validated.
///
/// # Panics
///
/// Panics if any embedded TOML file fails to parse or validate. Since
/// these are compile-time constants, failures indicate a development error
/// and are caught by the tests below.
#[must_use]
pub fn all_presets() -> Vec<ClosureModel> {
    PRESET_TOMLS
        .iter()
        .map(|(name, toml_str)| {
            ClosureModel::from_toml(toml_str)
                .unwrap_or_else(|e| panic!("Failed to load closure model preset '{name}': {e}"))
        })
        .collect()
}

/// Looks up a preset by name.
///
/// # Errors
///
/// Returns [`RiskError::Configuration`] if no preset has that name, or the
/// parse/validation error of the embedded definition.
pub fn preset(name: &str) -> Result<ClosureModel, RiskError> {
    let (_, toml_str) = PRESET_TOMLS
        .iter()
        .find(|(key, _)| *key == name)
        .ok_or_else(|| RiskError::Configuration {
            message: format!(
                "unknown closure model preset {name:?} (available: {})",
                preset_names().join(", ")
            ),
        })?;
    ClosureModel::from_toml(toml_str)
}
