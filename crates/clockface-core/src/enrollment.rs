//! Enrollment: several photos of one employee in, one gallery out.

use crate::backend::FaceBackend;
use crate::extractor::{DescriptorExtractor, ExtractionProfile};
use crate::gallery::{EnrollmentGallery, EnvironmentalVariant};
use crate::search::CancelToken;
use clockface_imaging::{Frame, Perturbation, QualityProfile};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentPolicy {
    /// Photos that must be submitted.
    pub min_photos: usize,
    /// Photos that must survive quality and extraction.
    pub min_valid_photos: usize,
    pub quality: QualityProfile,
    pub extraction: ExtractionProfile,
    /// Lighting conditions each accepted photo is re-embedded under.
    pub perturbations: Vec<Perturbation>,
}

impl Default for EnrollmentPolicy {
    fn default() -> Self {
        Self {
            min_photos: 5,
            min_valid_photos: 3,
            quality: QualityProfile::strict(),
            extraction: ExtractionProfile::enrollment(),
            perturbations: Perturbation::ALL.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhotoOutcome {
    Accepted {
        quality: f32,
        /// Index of the localization strategy that found the face.
        strategy: usize,
        variants: usize,
    },
    Rejected {
        reason: String,
    },
}

/// What happened to one submitted photo.
#[derive(Debug, Clone, PartialEq)]
pub struct PhotoReport {
    /// Position in the submitted list.
    pub index: usize,
    pub outcome: PhotoOutcome,
}

impl PhotoReport {
    pub fn accepted(&self) -> bool {
        matches!(self.outcome, PhotoOutcome::Accepted { .. })
    }
}

impl fmt::Display for PhotoReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.outcome {
            PhotoOutcome::Accepted {
                quality, variants, ..
            } => write!(
                f,
                "photo {}: accepted (quality {quality:.2}, {variants} variants)",
                self.index + 1
            ),
            PhotoOutcome::Rejected { reason } => {
                write!(f, "photo {}: rejected ({reason})", self.index + 1)
            }
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EnrollmentError {
    #[error("{provided} photos submitted, at least {required} required")]
    TooFewPhotos { provided: usize, required: usize },
    #[error("only {valid} usable photos, at least {required} required: {}", summarize(.reports))]
    InsufficientValidPhotos {
        valid: usize,
        required: usize,
        reports: Vec<PhotoReport>,
    },
    #[error("enrollment cancelled")]
    Cancelled,
}

fn summarize(reports: &[PhotoReport]) -> String {
    reports
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A built gallery and the per-photo reports behind it.
#[derive(Debug, Clone)]
pub struct Enrollment {
    pub gallery: EnrollmentGallery,
    pub reports: Vec<PhotoReport>,
}

/// Turns a batch of photos into an [`EnrollmentGallery`]. Has no side effects.
pub struct EnrollmentAggregator<'a> {
    backend: &'a dyn FaceBackend,
    policy: &'a EnrollmentPolicy,
}

impl<'a> EnrollmentAggregator<'a> {
    pub fn new(backend: &'a dyn FaceBackend, policy: &'a EnrollmentPolicy) -> Self {
        Self { backend, policy }
    }

    pub fn aggregate(
        &self,
        photos: &[Vec<u8>],
        cancel: &CancelToken,
    ) -> Result<Enrollment, EnrollmentError> {
        if photos.len() < self.policy.min_photos {
            return Err(EnrollmentError::TooFewPhotos {
                provided: photos.len(),
                required: self.policy.min_photos,
            });
        }

        let extractor = DescriptorExtractor::new(self.backend, &self.policy.extraction);
        let mut gallery = EnrollmentGallery::new(Vec::new());
        let mut reports = Vec::with_capacity(photos.len());

        for (index, bytes) in photos.iter().enumerate() {
            if cancel.is_cancelled() {
                return Err(EnrollmentError::Cancelled);
            }
            let outcome = match self.process(&extractor, bytes, &mut gallery, cancel) {
                Ok(outcome) => outcome,
                Err(reason) => {
                    tracing::warn!(photo = index + 1, %reason, "enrollment photo rejected");
                    PhotoOutcome::Rejected { reason }
                }
            };
            reports.push(PhotoReport { index, outcome });
        }

        let valid = gallery.descriptors.len();
        if valid < self.policy.min_valid_photos {
            return Err(EnrollmentError::InsufficientValidPhotos {
                valid,
                required: self.policy.min_valid_photos,
                reports,
            });
        }

        tracing::info!(
            photos = photos.len(),
            valid,
            variants = gallery.environmental_variants.len(),
            landmarks = gallery.landmarks.len(),
            "enrollment gallery built"
        );
        Ok(Enrollment { gallery, reports })
    }

    /// Decode, gate, extract and derive variants for one photo, appending to `gallery`.
    fn process(
        &self,
        extractor: &DescriptorExtractor<'_>,
        bytes: &[u8],
        gallery: &mut EnrollmentGallery,
        cancel: &CancelToken,
    ) -> Result<PhotoOutcome, String> {
        let frame = Frame::decode(bytes).map_err(|e| e.to_string())?;
        let quality = self.policy.quality.evaluate(&frame).map_err(|e| e.to_string())?;
        let extraction = extractor.extract(&frame).map_err(|e| e.to_string())?;

        let source = gallery.descriptors.len();
        let mut variants = 0;
        for &perturbation in &self.policy.perturbations {
            if cancel.is_cancelled() {
                break;
            }
            let perturbed = perturbation.apply(&extraction.frame);
            match extractor.reembed(&perturbed, &extraction.face) {
                Ok(descriptor) => {
                    gallery.environmental_variants.push(EnvironmentalVariant {
                        source,
                        perturbation,
                        descriptor,
                    });
                    variants += 1;
                }
                Err(e) => {
                    tracing::debug!(?perturbation, error = %e, "variant extraction failed");
                }
            }
        }

        gallery.descriptors.push(extraction.descriptor);
        if let Some(landmarks) = extraction.landmarks {
            gallery.landmarks.push(landmarks);
        }
        let score = quality.score();
        gallery.quality_scores.push(score);

        Ok(PhotoOutcome::Accepted {
            quality: score,
            strategy: extraction.strategy,
            variants,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{encode_png, enrollment_photos, synthetic_photo, SyntheticBackend};

    fn dark_photo() -> Vec<u8> {
        encode_png(&Frame::new(vec![10; 320 * 240], 320, 240).unwrap())
    }

    #[test]
    fn test_builds_gallery_with_variants() {
        let backend = SyntheticBackend::new();
        let policy = EnrollmentPolicy::default();
        let enrollment = EnrollmentAggregator::new(&backend, &policy)
            .aggregate(&enrollment_photos(1, 5), &CancelToken::new())
            .unwrap();

        let gallery = &enrollment.gallery;
        assert!(gallery.has_face_registered());
        assert_eq!(gallery.descriptors.len(), 5);
        assert_eq!(gallery.landmarks.len(), 5);
        assert_eq!(gallery.environmental_variants.len(), 25);
        assert_eq!(gallery.quality_scores.len(), 5);
        assert!(enrollment.reports.iter().all(PhotoReport::accepted));
        assert!(gallery
            .environmental_variants
            .iter()
            .all(|v| v.descriptor.euclidean_distance(&gallery.descriptors[v.source]) < 0.05));
    }

    #[test]
    fn test_too_few_photos() {
        let backend = SyntheticBackend::new();
        let policy = EnrollmentPolicy::default();
        let err = EnrollmentAggregator::new(&backend, &policy)
            .aggregate(&enrollment_photos(1, 3), &CancelToken::new())
            .unwrap_err();
        assert_eq!(
            err,
            EnrollmentError::TooFewPhotos {
                provided: 3,
                required: 5
            }
        );
    }

    #[test]
    fn test_insufficient_valid_photos_lists_every_report() {
        let backend = SyntheticBackend::new();
        let policy = EnrollmentPolicy::default();
        let photos = vec![
            synthetic_photo(1, 0),
            b"not an image".to_vec(),
            dark_photo(),
            synthetic_photo(1, 1),
            Vec::new(),
        ];
        let err = EnrollmentAggregator::new(&backend, &policy)
            .aggregate(&photos, &CancelToken::new())
            .unwrap_err();
        let EnrollmentError::InsufficientValidPhotos {
            valid,
            required,
            reports,
        } = &err
        else {
            panic!("unexpected error: {err}");
        };
        assert_eq!((*valid, *required), (2, 3));
        assert_eq!(reports.len(), 5);
        assert!(reports[0].accepted() && reports[3].accepted());
        assert!(!reports[1].accepted() && !reports[2].accepted() && !reports[4].accepted());
        let message = err.to_string();
        assert!(message.contains("photo 3: rejected"), "{message}");
    }

    #[test]
    fn test_rejected_photos_do_not_shift_variant_sources() {
        let backend = SyntheticBackend::new();
        let policy = EnrollmentPolicy::default();
        let mut photos = enrollment_photos(2, 4);
        photos.insert(1, dark_photo());
        let gallery = EnrollmentAggregator::new(&backend, &policy)
            .aggregate(&photos, &CancelToken::new())
            .unwrap()
            .gallery;
        assert_eq!(gallery.descriptors.len(), 4);
        assert!(gallery.environmental_variants.iter().all(|v| v.source < 4));
    }

    #[test]
    fn test_cancelled() {
        let backend = SyntheticBackend::new();
        let policy = EnrollmentPolicy::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = EnrollmentAggregator::new(&backend, &policy)
            .aggregate(&enrollment_photos(1, 5), &cancel)
            .unwrap_err();
        assert_eq!(err, EnrollmentError::Cancelled);
    }
}
