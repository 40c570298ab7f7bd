//! Guard against enrolling the same face under two employees.

use crate::gallery::EnrollmentGallery;
use crate::profile::MatchProfile;
use crate::scorer::{EnsembleMatcher, Matcher};
use crate::types::FaceDescriptor;
use std::sync::Arc;
use thiserror::Error;

pub const DEFAULT_DUPLICATE_THRESHOLD: f32 = 0.80;

#[derive(Error, Debug, Clone, PartialEq)]
#[error("face already enrolled for employee {employee} (confidence {confidence:.3})")]
pub struct DuplicateEnrollment<K> {
    pub employee: K,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
pub struct DuplicateGuard {
    pub threshold: f32,
    profile: MatchProfile,
}

impl DuplicateGuard {
    /// Relax `base` so a single close photo is enough and geometry never vetoes.
    pub fn new(base: &MatchProfile, threshold: f32) -> Self {
        Self {
            threshold,
            profile: MatchProfile {
                min_matches: 1,
                landmark_veto: false,
                ..base.clone()
            },
        }
    }

    /// Reject if any new descriptor scores above the threshold against
    /// another employee's gallery. `exclude` is the employee being re-enrolled.
    pub fn check<K>(
        &self,
        new_descriptors: &[FaceDescriptor],
        existing: &[(K, Arc<EnrollmentGallery>)],
        exclude: Option<&K>,
    ) -> Result<(), DuplicateEnrollment<K>>
    where
        K: Clone + PartialEq + std::fmt::Display,
    {
        let matcher = EnsembleMatcher::new(&self.profile);
        for (employee, gallery) in existing {
            if exclude == Some(employee) {
                continue;
            }
            for descriptor in new_descriptors {
                let verdict = matcher.score(descriptor, None, gallery);
                if verdict.confidence > self.threshold {
                    tracing::warn!(
                        conflict = %employee,
                        confidence = verdict.confidence,
                        "enrollment rejected as duplicate"
                    );
                    return Err(DuplicateEnrollment {
                        employee: employee.clone(),
                        confidence: verdict.confidence,
                    });
                }
            }
        }
        Ok(())
    }
}

impl Default for DuplicateGuard {
    fn default() -> Self {
        Self::new(&MatchProfile::balanced(), DEFAULT_DUPLICATE_THRESHOLD)
    }
}
