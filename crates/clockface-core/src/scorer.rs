//! Match scorer: one probe descriptor against one employee's gallery.
//!
//! A single distance threshold is too brittle for kiosk cameras, so the
//! ensemble scorer compares the probe against every enrolled descriptor and
//! environmental variant, blends three similarity metrics, and requires
//! several independent enrollment photos to agree before it reports a match.

use crate::gallery::EnrollmentGallery;
use crate::profile::MatchProfile;
use crate::types::{FaceDescriptor, LandmarkVector};
use std::collections::BTreeSet;

/// Bonus when the closest comparison is tighter than `tight_distance`.
const TIGHT_MATCH_BONUS: f32 = 0.03;
/// Bonus when the top scores agree closely.
const CONSISTENCY_BONUS: f32 = 0.02;
/// Spread (std-dev of the top scores) under which the consistency bonus applies.
const CONSISTENT_SPREAD: f32 = 0.02;
/// Spread above which the inconsistency penalty starts.
const INCONSISTENT_SPREAD: f32 = 0.08;
/// Number of top scores the spread is measured over.
const SPREAD_WINDOW: usize = 5;

/// Outcome of scoring one probe against one gallery.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchVerdict {
    pub is_match: bool,
    /// Always within [0, 1].
    pub confidence: f32,
    pub explanation: String,
    /// Comparisons within the distance ceiling.
    pub qualifying: usize,
    /// Enrollment photos with at least one high-quality comparison.
    pub good_sources: usize,
    pub best_distance: Option<f32>,
    pub landmark_similarity: Option<f32>,
}

impl MatchVerdict {
    pub fn no_match(explanation: impl Into<String>) -> Self {
        Self {
            is_match: false,
            confidence: 0.0,
            explanation: explanation.into(),
            qualifying: 0,
            good_sources: 0,
            best_distance: None,
            landmark_similarity: None,
        }
    }
}

/// Strategy for scoring a probe descriptor against one enrolled gallery.
pub trait Matcher {
    fn score(
        &self,
        probe: &FaceDescriptor,
        landmarks: Option<&LandmarkVector>,
        gallery: &EnrollmentGallery,
    ) -> MatchVerdict;
}

/// Clamp into [0, 1]; NaN and infinities contribute nothing.
fn unit(x: f32) -> f32 {
    if x.is_finite() {
        x.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

/// Mean landmark similarity over the stored vectors that are relevant at all.
fn landmark_similarity(
    profile: &MatchProfile,
    probe: Option<&LandmarkVector>,
    gallery: &EnrollmentGallery,
) -> Option<f32> {
    let probe = probe.filter(|p| !p.is_empty())?;
    if gallery.landmarks.is_empty() {
        return None;
    }
    let relevant: Vec<f32> = gallery
        .landmarks
        .iter()
        .map(|stored| unit(probe.similarity(stored)))
        .filter(|&s| s >= profile.landmark_relevance)
        .collect();
    if relevant.is_empty() {
        return Some(0.0);
    }
    Some(relevant.iter().sum::<f32>() / relevant.len() as f32)
}

/// Landmark similarity and whether it vetoes the match under `profile`.
fn landmark_check(
    profile: &MatchProfile,
    probe: Option<&LandmarkVector>,
    gallery: &EnrollmentGallery,
) -> (Option<f32>, bool) {
    let similarity = landmark_similarity(profile, probe, gallery);
    let vetoed =
        profile.landmark_veto && similarity.is_some_and(|s| s < profile.landmark_min_similarity);
    (similarity, vetoed)
}

fn push_landmark_note(
    explanation: &mut String,
    profile: &MatchProfile,
    similarity: Option<f32>,
    vetoed: bool,
) {
    if let Some(s) = similarity {
        explanation.push_str(&format!("; landmark similarity {s:.3}"));
        if vetoed {
            explanation.push_str(&format!(
                " below {:.3} (geometry veto)",
                profile.landmark_min_similarity
            ));
        }
    }
}

struct Comparison {
    source: usize,
    distance: f32,
    score: f32,
}

/// Full scorer: Euclidean, cosine and Pearson blended per comparison.
pub struct EnsembleMatcher<'a> {
    pub profile: &'a MatchProfile,
}

impl<'a> EnsembleMatcher<'a> {
    pub fn new(profile: &'a MatchProfile) -> Self {
        Self { profile }
    }

    /// Per-comparison score in [0, 1] for one stored descriptor.
    pub fn comparison_score(&self, probe: &FaceDescriptor, stored: &FaceDescriptor) -> f32 {
        let w = self.profile.weights.normalized();
        let distance = probe.euclidean_distance(stored);
        let euclidean = unit(1.0 - distance / self.profile.distance_scale);
        let cosine = unit(probe.similarity(stored));
        let pearson = unit(probe.pearson(stored));
        unit(w.euclidean * euclidean + w.cosine * cosine + w.pearson * pearson)
    }
}

impl Matcher for EnsembleMatcher<'_> {
    fn score(
        &self,
        probe: &FaceDescriptor,
        landmarks: Option<&LandmarkVector>,
        gallery: &EnrollmentGallery,
    ) -> MatchVerdict {
        let profile = self.profile;

        if !gallery.has_face_registered() {
            return MatchVerdict::no_match("no match: gallery has no enrolled descriptors");
        }
        if probe.is_empty() || !probe.is_finite() {
            return MatchVerdict::no_match("no match: probe descriptor is empty or not finite");
        }

        let mut comparisons = Vec::new();
        let mut closest: Option<f32> = None;
        let mut skipped = 0usize;

        for (source, stored) in gallery.comparison_entries() {
            if stored.len() != probe.len() {
                skipped += 1;
                continue;
            }
            let distance = probe.euclidean_distance(stored);
            if !distance.is_finite() {
                skipped += 1;
                continue;
            }
            closest = Some(closest.map_or(distance, |c: f32| c.min(distance)));
            // Past the ceiling a comparison still counts, as a zero score.
            let score = if distance <= profile.max_tolerance {
                self.comparison_score(probe, stored)
            } else {
                0.0
            };
            comparisons.push(Comparison {
                source,
                distance,
                score,
            });
        }

        if skipped > 0 {
            tracing::warn!(skipped, "skipped gallery entries with mismatched or invalid values");
        }

        let qualifying = comparisons
            .iter()
            .filter(|c| c.distance <= profile.max_tolerance)
            .count();
        if qualifying == 0 {
            let mut verdict = MatchVerdict::no_match(match closest {
                Some(d) => format!(
                    "no match: closest distance {d:.3} exceeds ceiling {:.3}",
                    profile.max_tolerance
                ),
                None => "no match: no comparable gallery entries".to_string(),
            });
            verdict.best_distance = closest;
            return verdict;
        }

        let good_sources = comparisons
            .iter()
            .filter(|c| c.distance <= profile.base_tolerance)
            .map(|c| c.source)
            .collect::<BTreeSet<_>>()
            .len();

        let mut scores: Vec<f32> = comparisons.iter().map(|c| c.score).collect();
        scores.sort_by(|a, b| b.partial_cmp(a).unwrap_or(std::cmp::Ordering::Equal));
        let base = profile.confidence_stat.apply(&scores);

        let best_distance = comparisons
            .iter()
            .map(|c| c.distance)
            .fold(f32::INFINITY, f32::min);
        let top = &scores[..scores.len().min(SPREAD_WINDOW)];
        let spread = std_dev(top);

        let mut bonus = 0.0;
        if best_distance <= profile.tight_distance {
            bonus += TIGHT_MATCH_BONUS;
        }
        if top.len() >= 2 && spread < CONSISTENT_SPREAD {
            bonus += CONSISTENCY_BONUS;
        }
        let bonus = bonus.min(profile.max_bonus);
        let penalty = (spread - INCONSISTENT_SPREAD).max(0.0).min(profile.max_penalty);
        let confidence = unit(base + bonus - penalty);

        let (landmark_similarity, vetoed) = landmark_check(profile, landmarks, gallery);

        let confident = confidence >= profile.min_confidence;
        let enough = good_sources >= profile.min_matches;
        let is_match = confident && enough && !vetoed;

        let mut explanation = format!(
            "{}: confidence {confidence:.3} {} {:.3}; {good_sources} of {} required photos matched closely",
            if is_match { "match" } else { "no match" },
            if confident { ">=" } else { "below" },
            profile.min_confidence,
            profile.min_matches,
        );
        push_landmark_note(&mut explanation, profile, landmark_similarity, vetoed);

        tracing::trace!(
            profile = %profile.name,
            comparisons = qualifying,
            good_sources,
            confidence,
            is_match,
            "gallery scored"
        );

        MatchVerdict {
            is_match,
            confidence,
            explanation,
            qualifying,
            good_sources,
            best_distance: Some(best_distance),
            landmark_similarity,
        }
    }
}

/// Cheap single-metric scorer: Euclidean distance only.
///
/// Used by the gallery search when its time budget runs low.
pub struct DistanceMatcher<'a> {
    pub profile: &'a MatchProfile,
}

impl<'a> DistanceMatcher<'a> {
    pub fn new(profile: &'a MatchProfile) -> Self {
        Self { profile }
    }
}

impl Matcher for DistanceMatcher<'_> {
    fn score(
        &self,
        probe: &FaceDescriptor,
        landmarks: Option<&LandmarkVector>,
        gallery: &EnrollmentGallery,
    ) -> MatchVerdict {
        let profile = self.profile;
        if !gallery.has_face_registered() {
            return MatchVerdict::no_match("no match: gallery has no enrolled descriptors");
        }

        let mut best = f32::INFINITY;
        let mut qualifying = 0usize;
        let mut good = BTreeSet::new();
        for (source, stored) in gallery.comparison_entries() {
            if stored.len() != probe.len() {
                continue;
            }
            let distance = probe.euclidean_distance(stored);
            if !distance.is_finite() || distance > profile.max_tolerance {
                continue;
            }
            qualifying += 1;
            best = best.min(distance);
            if distance <= profile.base_tolerance {
                good.insert(source);
            }
        }

        if qualifying == 0 {
            return MatchVerdict::no_match(format!(
                "no match (distance only): nothing within ceiling {:.3}",
                profile.max_tolerance
            ));
        }

        let confidence = unit(1.0 - best / profile.distance_scale);
        let (landmark_similarity, vetoed) = landmark_check(profile, landmarks, gallery);
        let is_match = confidence >= profile.min_confidence
            && good.len() >= profile.min_matches
            && !vetoed;
        let mut explanation = format!(
            "{} (distance only): best distance {best:.3}, confidence {confidence:.3}, {} of {} required photos matched closely",
            if is_match { "match" } else { "no match" },
            good.len(),
            profile.min_matches,
        );
        push_landmark_note(&mut explanation, profile, landmark_similarity, vetoed);
        MatchVerdict {
            is_match,
            confidence,
            explanation,
            qualifying,
            good_sources: good.len(),
            best_distance: Some(best),
            landmark_similarity,
        }
    }
}

fn std_dev(values: &[f32]) -> f32 {
    if values.len() < 2 {
        return 0.0;
    }
    let n = values.len() as f32;
    let mean = values.iter().sum::<f32>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / n).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gallery::EnvironmentalVariant;
    use clockface_imaging::Perturbation;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const DIM: usize = 128;

    /// Zero-mean alternating pattern with norm 1.
    fn base_vector() -> Vec<f32> {
        let scale = 1.0 / (DIM as f32).sqrt();
        (0..DIM).map(|i| if i % 2 == 0 { scale } else { -scale }).collect()
    }

    /// Zero-mean pattern orthogonal to [`base_vector`], norm 1.
    fn orthogonal_vector() -> Vec<f32> {
        let scale = 1.0 / (DIM as f32).sqrt();
        (0..DIM).map(|i| if (i / 2) % 2 == 0 { scale } else { -scale }).collect()
    }

    fn offset(t: f32) -> FaceDescriptor {
        let v = base_vector();
        let u = orthogonal_vector();
        FaceDescriptor::new(v.iter().zip(&u).map(|(a, b)| a + t * b).collect())
    }

    fn gallery_of(copies: usize) -> EnrollmentGallery {
        EnrollmentGallery::new(vec![FaceDescriptor::new(base_vector()); copies])
    }

    fn profile(min_matches: usize) -> MatchProfile {
        MatchProfile {
            min_matches,
            ..MatchProfile::balanced()
        }
    }

    #[test]
    fn test_self_comparison_is_maximal() {
        let p = MatchProfile::balanced();
        let m = EnsembleMatcher::new(&p);
        let v = FaceDescriptor::new(base_vector());
        assert!((m.comparison_score(&v, &v) - 1.0).abs() < 1e-5);
        assert!(m.comparison_score(&v, &offset(0.3)) < m.comparison_score(&v, &v));
    }

    #[test]
    fn test_identical_probe_matches_with_full_confidence() {
        let p = MatchProfile::strict();
        let verdict = EnsembleMatcher::new(&p).score(&FaceDescriptor::new(base_vector()), None, &gallery_of(5));
        assert!(verdict.is_match, "{}", verdict.explanation);
        assert!((verdict.confidence - 1.0).abs() < 1e-3);
        assert_eq!(verdict.good_sources, 5);
        assert_eq!(verdict.best_distance, Some(0.0));
    }

    #[test]
    fn test_distant_probe_never_matches() {
        let p = MatchProfile::permissive();
        let mut rng = StdRng::seed_from_u64(7);
        let noisy: Vec<f32> = base_vector()
            .iter()
            .map(|x| x + rng.gen_range(-0.5..0.5))
            .collect();
        let probe = FaceDescriptor::new(noisy);
        let gallery = gallery_of(5);
        assert!(probe.euclidean_distance(&gallery.descriptors[0]) > p.max_tolerance * 2.0);

        let verdict = EnsembleMatcher::new(&p).score(&probe, None, &gallery);
        assert!(!verdict.is_match);
        assert_eq!(verdict.confidence, 0.0);
        assert_eq!(verdict.qualifying, 0);
        assert!(verdict.explanation.contains("exceeds ceiling"), "{}", verdict.explanation);
    }

    #[test]
    fn test_single_close_descriptor_is_not_enough() {
        let p = profile(2);
        let verdict = EnsembleMatcher::new(&p).score(&offset(0.05), None, &gallery_of(1));
        assert!(!verdict.is_match);
        assert!(verdict.confidence >= p.min_confidence, "score itself is high");
        assert_eq!(verdict.good_sources, 1);
        assert!(verdict.explanation.contains("1 of 2"), "{}", verdict.explanation);
    }

    #[test]
    fn test_variants_count_for_their_source_photo_only() {
        let p = profile(2);
        let mut gallery = gallery_of(1);
        for perturbation in Perturbation::ALL {
            gallery.environmental_variants.push(EnvironmentalVariant {
                source: 0,
                perturbation,
                descriptor: FaceDescriptor::new(base_vector()),
            });
        }
        let verdict = EnsembleMatcher::new(&p).score(&offset(0.05), None, &gallery);
        assert_eq!(verdict.qualifying, 6);
        assert_eq!(verdict.good_sources, 1);
        assert!(!verdict.is_match);
    }

    #[test]
    fn test_empty_gallery() {
        let p = MatchProfile::balanced();
        let verdict = EnsembleMatcher::new(&p).score(&offset(0.0), None, &EnrollmentGallery::new(vec![]));
        assert!(!verdict.is_match);
        assert_eq!(verdict.confidence, 0.0);
        assert!(verdict.explanation.contains("no enrolled descriptors"));
    }

    #[test]
    fn test_degenerate_inputs_do_not_poison_score() {
        let p = profile(1);
        let m = EnsembleMatcher::new(&p);
        let zero = FaceDescriptor::new(vec![0.0; DIM]);
        let gallery = EnrollmentGallery::new(vec![zero.clone(), FaceDescriptor::new(base_vector())]);
        // Zero vector vs zero vector: distance 0, cosine/pearson undefined → 0.
        let verdict = m.score(&zero, None, &gallery);
        assert!(verdict.confidence.is_finite());
        assert!((0.0..=1.0).contains(&verdict.confidence));

        let nan_probe = FaceDescriptor::new(vec![f32::NAN; DIM]);
        let verdict = m.score(&nan_probe, None, &gallery);
        assert!(!verdict.is_match);
        assert_eq!(verdict.confidence, 0.0);
    }

    #[test]
    fn test_mismatched_dimensions_are_skipped() {
        let p = profile(1);
        let gallery = EnrollmentGallery::new(vec![FaceDescriptor::new(vec![0.1; 4])]);
        let verdict = EnsembleMatcher::new(&p).score(&offset(0.0), None, &gallery);
        assert!(!verdict.is_match);
        assert!(verdict.explanation.contains("no comparable"));
    }

    #[test]
    fn test_landmark_veto_in_strict_profile() {
        let p = MatchProfile::strict();
        let mut gallery = gallery_of(5);
        gallery.landmarks = vec![LandmarkVector::new(vec![0.1, 0.2, -0.3, 0.4]); 3];

        let same = LandmarkVector::new(vec![0.1, 0.2, -0.3, 0.4]);
        let verdict = EnsembleMatcher::new(&p).score(&FaceDescriptor::new(base_vector()), Some(&same), &gallery);
        assert!(verdict.is_match, "{}", verdict.explanation);
        assert!((verdict.landmark_similarity.unwrap() - 1.0).abs() < 1e-5);

        let different = LandmarkVector::new(vec![-0.4, 0.3, 0.2, -0.1]);
        let verdict =
            EnsembleMatcher::new(&p).score(&FaceDescriptor::new(base_vector()), Some(&different), &gallery);
        assert!(!verdict.is_match);
        assert!(verdict.confidence > 0.9, "descriptor score alone is high");
        assert!(verdict.explanation.contains("geometry veto"), "{}", verdict.explanation);
    }

    #[test]
    fn test_landmarks_do_not_veto_when_disabled() {
        let p = MatchProfile::balanced();
        let mut gallery = gallery_of(5);
        gallery.landmarks = vec![LandmarkVector::new(vec![0.1, 0.2, -0.3, 0.4])];
        let different = LandmarkVector::new(vec![-0.4, 0.3, 0.2, -0.1]);
        let verdict =
            EnsembleMatcher::new(&p).score(&FaceDescriptor::new(base_vector()), Some(&different), &gallery);
        assert!(verdict.is_match);
        assert_eq!(verdict.landmark_similarity, Some(0.0));
    }

    #[test]
    fn test_distance_matcher() {
        let p = profile(1);
        let m = DistanceMatcher::new(&p);
        let exact = m.score(&offset(0.0), None, &gallery_of(2));
        assert!(exact.is_match);
        assert_eq!(exact.confidence, 1.0);

        let far = m.score(&offset(2.0), None, &gallery_of(2));
        assert!(!far.is_match);
        assert_eq!(far.confidence, 0.0);
    }

    #[test]
    fn test_entry_crossing_ceiling_does_not_raise_confidence() {
        let p = MatchProfile {
            min_matches: 1,
            ..MatchProfile::strict()
        };
        let m = EnsembleMatcher::new(&p);
        let gallery = EnrollmentGallery::new(vec![offset(0.1), offset(0.5)]);

        let near = m.score(&offset(0.0), None, &gallery);
        let far = m.score(&offset(-0.06), None, &gallery);
        assert_eq!(near.qualifying, 2);
        assert_eq!(far.qualifying, 1, "second entry is now past the ceiling");
        assert!(
            far.confidence <= near.confidence,
            "near {} far {}",
            near.confidence,
            far.confidence
        );
    }

    #[test]
    fn test_distance_matcher_honours_landmark_veto() {
        let p = MatchProfile::strict();
        let mut gallery = gallery_of(5);
        gallery.landmarks = vec![LandmarkVector::new(vec![0.1, 0.2, -0.3, 0.4]); 3];
        let m = DistanceMatcher::new(&p);

        let different = LandmarkVector::new(vec![-0.4, 0.3, 0.2, -0.1]);
        let verdict = m.score(&offset(0.0), Some(&different), &gallery);
        assert!(!verdict.is_match);
        assert_eq!(verdict.confidence, 1.0);
        assert!(verdict.explanation.contains("geometry veto"), "{}", verdict.explanation);

        let same = LandmarkVector::new(vec![0.1, 0.2, -0.3, 0.4]);
        assert!(m.score(&offset(0.0), Some(&same), &gallery).is_match);
    }

    proptest! {
        #[test]
        fn prop_confidence_non_increasing_for_spread_gallery(
            offsets in proptest::collection::vec(0.0f32..0.8, 1..7),
            x1 in 0.0f32..0.6,
            dx in 0.0f32..0.3,
            strictness in 0usize..3,
        ) {
            let p = [MatchProfile::strict(), MatchProfile::balanced(), MatchProfile::permissive()]
                [strictness].clone();
            let m = EnsembleMatcher::new(&p);
            let gallery = EnrollmentGallery::new(offsets.iter().map(|&t| offset(t)).collect());
            let near = m.score(&offset(-x1), None, &gallery);
            let far = m.score(&offset(-(x1 + dx)), None, &gallery);
            prop_assert!(far.confidence <= near.confidence + 1e-5,
                "offsets={:?} x1={} dx={} near={} far={}", offsets, x1, dx, near.confidence, far.confidence);
        }

        #[test]
        fn prop_confidence_non_increasing_with_distance(
            t1 in 0.0f32..1.0,
            dt in 0.0f32..1.0,
            copies in 1usize..6,
        ) {
            let p = profile(1);
            let m = EnsembleMatcher::new(&p);
            let gallery = gallery_of(copies);
            let near = m.score(&offset(t1), None, &gallery);
            let far = m.score(&offset(t1 + dt), None, &gallery);
            prop_assert!(far.confidence <= near.confidence + 1e-6,
                "t1={} dt={} near={} far={}", t1, dt, near.confidence, far.confidence);
        }

        #[test]
        fn prop_match_implies_both_floors(
            probe in proptest::collection::vec(-0.2f32..0.2, DIM),
            stored in proptest::collection::vec(proptest::collection::vec(-0.2f32..0.2, DIM), 1..5),
            strictness in 0usize..3,
        ) {
            let p = [MatchProfile::strict(), MatchProfile::balanced(), MatchProfile::permissive()]
                [strictness].clone();
            let gallery = EnrollmentGallery::new(stored.into_iter().map(FaceDescriptor::new).collect());
            let verdict = EnsembleMatcher::new(&p).score(&FaceDescriptor::new(probe), None, &gallery);
            prop_assert!((0.0..=1.0).contains(&verdict.confidence));
            if verdict.is_match {
                prop_assert!(verdict.confidence >= p.min_confidence);
                prop_assert!(verdict.good_sources >= p.min_matches);
            }
        }
    }
}
