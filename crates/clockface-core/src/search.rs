//! 1:N identification over every enrolled employee.

use crate::gallery::EnrollmentGallery;
use crate::profile::MatchProfile;
use crate::scorer::{DistanceMatcher, EnsembleMatcher, MatchVerdict, Matcher};
use crate::types::{FaceDescriptor, LandmarkVector};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Cooperative cancellation flag shared between a caller and a worker.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Score of one scanned employee.
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateScore<K> {
    pub employee: K,
    pub confidence: f32,
    pub is_match: bool,
    /// Scored with the distance-only matcher because the budget ran low.
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchMatch<K> {
    pub employee: K,
    pub verdict: MatchVerdict,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GallerySearchResult<K> {
    /// Highest-confidence matching employee; earliest enrollment wins ties.
    pub best: Option<SearchMatch<K>>,
    /// Highest confidence among all scanned candidates, matching or not.
    pub best_confidence: f32,
    pub candidates: Vec<CandidateScore<K>>,
    pub scanned: usize,
    pub total: usize,
    /// The scan stopped early on budget or cancellation.
    pub partial: bool,
}

/// Scans galleries in enrollment order with a soft time budget.
#[derive(Debug, Clone)]
pub struct GallerySearch {
    pub profile: MatchProfile,
    pub budget: Duration,
    /// Once less than this much budget remains, fall back to [`DistanceMatcher`].
    pub degrade_window: Duration,
}

impl GallerySearch {
    pub fn new(profile: MatchProfile, budget: Duration, degrade_window: Duration) -> Self {
        Self {
            profile,
            budget,
            degrade_window,
        }
    }

    pub fn search<K: Clone>(
        &self,
        probe: &FaceDescriptor,
        landmarks: Option<&LandmarkVector>,
        candidates: &[(K, Arc<EnrollmentGallery>)],
        cancel: &CancelToken,
    ) -> GallerySearchResult<K> {
        let started = Instant::now();
        let ensemble = EnsembleMatcher::new(&self.profile);
        let distance = DistanceMatcher::new(&self.profile);

        let mut result = GallerySearchResult {
            best: None,
            best_confidence: 0.0,
            candidates: Vec::with_capacity(candidates.len()),
            scanned: 0,
            total: candidates.len(),
            partial: false,
        };
        let mut warned_degraded = false;

        for (employee, gallery) in candidates {
            if cancel.is_cancelled() {
                tracing::debug!(scanned = result.scanned, "gallery search cancelled");
                result.partial = true;
                break;
            }
            let elapsed = started.elapsed();
            if elapsed >= self.budget {
                tracing::warn!(
                    scanned = result.scanned,
                    total = result.total,
                    "gallery search budget exhausted"
                );
                result.partial = true;
                break;
            }

            let degraded = self.budget - elapsed < self.degrade_window;
            if degraded && !warned_degraded {
                tracing::warn!(
                    remaining = result.total - result.scanned,
                    "search budget low, scoring remaining candidates by distance only"
                );
                warned_degraded = true;
            }
            let verdict = if degraded {
                distance.score(probe, landmarks, gallery)
            } else {
                ensemble.score(probe, landmarks, gallery)
            };

            result.scanned += 1;
            result.best_confidence = result.best_confidence.max(verdict.confidence);
            result.candidates.push(CandidateScore {
                employee: employee.clone(),
                confidence: verdict.confidence,
                is_match: verdict.is_match,
                degraded,
            });

            let improves = verdict.is_match
                && result
                    .best
                    .as_ref()
                    .map_or(true, |b| verdict.confidence > b.verdict.confidence);
            if improves {
                result.best = Some(SearchMatch {
                    employee: employee.clone(),
                    verdict,
                });
            }
        }

        result
    }
}
