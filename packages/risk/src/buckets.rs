//! Institution size bucketing.

use std::collections::{BTreeMap, BTreeSet};

use closure_risk_risk_models::{BucketDefinition, Institution, SizeBucket};
use serde::{Deserialize, Serialize};

/// Institution counters for one bucketing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketingStats {
    /// Institutions offered.
    pub read: u64,
    /// Institutions placed in a bucket.
    pub kept: u64,
    /// Skipped for zero, negative, or non-finite enrollment.
    pub skipped_enrollment: u64,
    /// Skipped because the institution id was already seen.
    pub skipped_duplicate: u64,
}

/// A geography's institutions, grouped by size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstitutionProfile {
    /// Geography key.
    pub geography_id: String,
    /// One entry per defined bucket, in definition order.
    pub buckets: Vec<SizeBucket>,
    /// Sum of actual member enrollment.
    pub total_enrollment: f64,
}

impl InstitutionProfile {
    /// Number of institutions across all buckets.
    #[must_use]
    pub fn institution_count(&self) -> u64 {
        self.buckets.iter().map(|b| b.count).sum()
    }
}

#[derive(Debug, Default)]
struct Tally {
    counts: Vec<u64>,
    sums: Vec<f64>,
    total: f64,
}

/// Groups institutions into size buckets per geography.
///
/// An institution lands in the first bucket whose upper bound its
/// enrollment is strictly below, or in the open-ended bucket. Institutions
/// above every bound of a model without an open-ended bucket go to the
/// last bucket. The open-ended bucket's representative size is the larger
/// of its configured average and the mean of its members; every other
/// bucket uses its configured average.
#[must_use]
pub fn bucket_institutions(
    definitions: &[BucketDefinition],
    institutions: impl IntoIterator<Item = Institution>,
) -> (BTreeMap<String, InstitutionProfile>, BucketingStats) {
    let mut stats = BucketingStats::default();
    let mut seen = BTreeSet::new();
    let mut tallies: BTreeMap<String, Tally> = BTreeMap::new();

    for institution in institutions {
        stats.read += 1;

        if !(institution.enrollment.is_finite() && institution.enrollment > 0.0) {
            stats.skipped_enrollment += 1;
            continue;
        }
        if !seen.insert(institution.institution_id.clone()) {
            stats.skipped_duplicate += 1;
            log::debug!("Skipping duplicate institution {}", institution.institution_id);
            continue;
        }

        let index = definitions
            .iter()
            .position(|d| d.upper.is_none_or(|upper| institution.enrollment < upper))
            .unwrap_or_else(|| definitions.len().saturating_sub(1));

        let tally = tallies
            .entry(institution.geography_id)
            .or_insert_with(|| Tally {
                counts: vec![0; definitions.len()],
                sums: vec![0.0; definitions.len()],
                total: 0.0,
            });
        if let (Some(count), Some(sum)) = (tally.counts.get_mut(index), tally.sums.get_mut(index)) {
            *count += 1;
            *sum += institution.enrollment;
            tally.total += institution.enrollment;
            stats.kept += 1;
        }
    }

    if stats.skipped_enrollment + stats.skipped_duplicate > 0 {
        log::warn!(
            "Skipped {} institutions without enrollment and {} duplicates",
            stats.skipped_enrollment,
            stats.skipped_duplicate
        );
    }

    let profiles = tallies
        .into_iter()
        .map(|(geography_id, tally)| {
            let buckets = definitions
                .iter()
                .zip(tally.counts.iter().zip(&tally.sums))
                .map(|(definition, (&count, &sum))| SizeBucket {
                    label: definition.label.clone(),
                    avg_enrollment: representative_size(definition, count, sum),
                    count,
                })
                .collect();
            let profile = InstitutionProfile {
                geography_id: geography_id.clone(),
                buckets,
                total_enrollment: tally.total,
            };
            (geography_id, profile)
        })
        .collect();

    (profiles, stats)
}

#[allow(clippy::cast_precision_loss)]
fn representative_size(definition: &BucketDefinition, count: u64, sum: f64) -> f64 {
    if definition.upper.is_none() && count > 0 {
        definition.average.max(sum / count as f64)
    } else {
        definition.average
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definitions() -> Vec<BucketDefinition> {
        [
            ("under100", Some(100.0), 55.0),
            ("100_199", Some(200.0), 150.0),
            ("200_299", Some(300.0), 250.0),
            ("300_499", Some(500.0), 400.0),
            ("500plus", None, 750.0),
        ]
        .into_iter()
        .map(|(label, upper, average)| BucketDefinition {
            label: label.to_string(),
            upper,
            average,
        })
        .collect()
    }

    fn institution(geo: &str, id: &str, enrollment: f64) -> Institution {
        Institution {
            geography_id: geo.to_string(),
            institution_id: id.to_string(),
            enrollment,
        }
    }

    #[test]
    fn counts_sum_to_institutions() {
        let (profiles, stats) = bucket_institutions(
            &definitions(),
            vec![
                institution("06", "a", 40.0),
                institution("06", "b", 100.0),
                institution("06", "c", 199.0),
                institution("06", "d", 499.9),
                institution("06", "e", 1200.0),
                institution("26", "f", 310.0),
            ],
        );

        assert_eq!(stats.kept, 6);
        let ca = &profiles["06"];
        assert_eq!(ca.institution_count(), 5);
        let counts: Vec<u64> = ca.buckets.iter().map(|b| b.count).collect();
        assert_eq!(counts, vec![1, 2, 0, 1, 1]);
        assert!((ca.total_enrollment - 2038.9).abs() < 1e-9);

        assert_eq!(profiles["26"].institution_count(), 1);
        assert_eq!(profiles["26"].buckets.len(), 5);
    }

    #[test]
    fn open_bucket_uses_larger_of_default_and_mean() {
        let (profiles, _) = bucket_institutions(
            &definitions(),
            vec![
                institution("06", "a", 1000.0),
                institution("06", "b", 2000.0),
                institution("26", "c", 510.0),
            ],
        );
        assert!((profiles["06"].buckets[4].avg_enrollment - 1500.0).abs() < 1e-9);
        assert!((profiles["26"].buckets[4].avg_enrollment - 750.0).abs() < 1e-9);
        assert!((profiles["06"].buckets[1].avg_enrollment - 150.0).abs() < 1e-9);
    }

    #[test]
    fn skips_bad_and_duplicate_institutions() {
        let (profiles, stats) = bucket_institutions(
            &definitions(),
            vec![
                institution("06", "a", 0.0),
                institution("06", "b", -5.0),
                institution("06", "c", f64::NAN),
                institution("06", "d", 120.0),
                institution("06", "d", 130.0),
            ],
        );
        assert_eq!(stats.read, 5);
        assert_eq!(stats.skipped_enrollment, 3);
        assert_eq!(stats.skipped_duplicate, 1);
        assert_eq!(profiles["06"].institution_count(), 1);
    }
}
