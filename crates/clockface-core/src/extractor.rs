//! Descriptor extraction: one decoded photo in, one face descriptor out.
//!
//! Normalizes the frame, runs the localization fallback chain, picks a single
//! usable face, and asks the backend for its descriptor and landmarks.

use crate::backend::{BackendError, FaceBackend, ModelSize};
use crate::locate::{locate_with_fallback, select_face, LocateStrategy, SelectError};
use crate::types::{BoundingBox, FaceDescriptor, LandmarkVector};
use clockface_imaging::Frame;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Longest side photos are downscaled to before localization.
pub const DEFAULT_MAX_DIMENSION: u32 = 800;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ExtractionError {
    #[error("no face found in photo")]
    NoFace,
    #[error("{count} faces of similar size found; cannot tell which one to use")]
    Ambiguous { count: usize },
    #[error("face is {width}x{height}px, smaller than {min}px")]
    FaceTooSmall { width: u32, height: u32, min: u32 },
    #[error("face is cut off by the photo border")]
    FaceCropped,
    #[error("facial landmarks could not be detected")]
    LandmarksMissing,
    #[error("descriptor extraction failed: {0}")]
    EmbeddingFailed(String),
    #[error("face localization failed: {0}")]
    Backend(#[from] BackendError),
}

impl From<SelectError> for ExtractionError {
    fn from(e: SelectError) -> Self {
        match e {
            SelectError::NoFace => ExtractionError::NoFace,
            SelectError::Ambiguous { count } => ExtractionError::Ambiguous { count },
        }
    }
}

/// Extraction settings for one use (enrollment or verification).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionProfile {
    pub max_dimension: u32,
    /// Minimum face side in pixels, measured on the downscaled frame.
    pub min_face_size: u32,
    /// Faces closer than this fraction of the frame size to an edge are cropped.
    pub border_margin: f32,
    /// Faces whose area is within this ratio of the largest are near-ties.
    pub area_tie_ratio: f32,
    pub jitter: u32,
    pub model: ModelSize,
    pub require_landmarks: bool,
    pub strategies: Vec<LocateStrategy>,
}

impl ExtractionProfile {
    /// Thorough: every fallback, heavy jitter, large model, landmarks required.
    pub fn enrollment() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            min_face_size: 80,
            border_margin: 0.01,
            area_tie_ratio: 0.9,
            jitter: 10,
            model: ModelSize::Large,
            require_landmarks: true,
            strategies: LocateStrategy::thorough_chain(),
        }
    }

    /// Fast: short chain, minimal jitter, landmarks optional.
    pub fn verification() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            min_face_size: 60,
            border_margin: 0.0,
            area_tie_ratio: 0.9,
            jitter: 1,
            model: ModelSize::Large,
            require_landmarks: false,
            strategies: LocateStrategy::quick_chain(),
        }
    }
}

/// A descriptor together with what was learned extracting it.
#[derive(Debug, Clone)]
pub struct Extraction {
    pub descriptor: FaceDescriptor,
    pub landmarks: Option<LandmarkVector>,
    pub face: BoundingBox,
    /// The (possibly enhanced) frame the face was localized and embedded on.
    pub frame: Frame,
    /// Index of the localization strategy that found the face.
    pub strategy: usize,
}

pub struct DescriptorExtractor<'a> {
    backend: &'a dyn FaceBackend,
    profile: &'a ExtractionProfile,
}

impl<'a> DescriptorExtractor<'a> {
    pub fn new(backend: &'a dyn FaceBackend, profile: &'a ExtractionProfile) -> Self {
        Self { backend, profile }
    }

    pub fn extract(&self, frame: &Frame) -> Result<Extraction, ExtractionError> {
        let frame = frame.downscale_to(self.profile.max_dimension);
        let located = locate_with_fallback(self.backend, &frame, &self.profile.strategies)?
            .ok_or(ExtractionError::NoFace)?;

        let face = select_face(
            located.faces,
            located.frame.width,
            located.frame.height,
            self.profile.area_tie_ratio,
        )?;
        self.check_geometry(&face, &located.frame)?;

        let descriptor = self.embed(&located.frame, &face)?;

        let landmarks = match self.backend.landmarks(&located.frame, &face) {
            Ok(named) => LandmarkVector::from_named(&named, &face),
            Err(e) => {
                tracing::debug!(error = %e, "landmark detection failed");
                None
            }
        };
        if landmarks.is_none() && self.profile.require_landmarks {
            return Err(ExtractionError::LandmarksMissing);
        }

        Ok(Extraction {
            descriptor,
            landmarks,
            face,
            frame: located.frame,
            strategy: located.strategy,
        })
    }

    /// Re-embed an already-localized face, e.g. on a perturbed copy of its frame.
    pub fn reembed(&self, frame: &Frame, face: &BoundingBox) -> Result<FaceDescriptor, ExtractionError> {
        self.embed(frame, face)
    }

    fn embed(&self, frame: &Frame, face: &BoundingBox) -> Result<FaceDescriptor, ExtractionError> {
        let values = self
            .backend
            .embed_face(frame, face, self.profile.jitter, self.profile.model)
            .map_err(|e| ExtractionError::EmbeddingFailed(e.to_string()))?;
        let descriptor = FaceDescriptor::new(values);
        if descriptor.is_empty() || !descriptor.is_finite() {
            return Err(ExtractionError::EmbeddingFailed(
                "backend returned an empty or non-finite descriptor".into(),
            ));
        }
        Ok(descriptor)
    }

    fn check_geometry(&self, face: &BoundingBox, frame: &Frame) -> Result<(), ExtractionError> {
        let min = self.profile.min_face_size;
        if face.width < min as f32 || face.height < min as f32 {
            return Err(ExtractionError::FaceTooSmall {
                width: face.width.max(0.0) as u32,
                height: face.height.max(0.0) as u32,
                min,
            });
        }

        let margin_x = frame.width as f32 * self.profile.border_margin;
        let margin_y = frame.height as f32 * self.profile.border_margin;
        let cropped = face.x < margin_x
            || face.y < margin_y
            || face.right() > frame.width as f32 - margin_x
            || face.bottom() > frame.height as f32 - margin_y;
        if cropped {
            return Err(ExtractionError::FaceCropped);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::LocateMethod;
    use crate::testing::{faceless_frame, synthetic_frame, SyntheticBackend};
    use crate::types::NamedLandmarks;

    /// Reports fixed boxes and a constant descriptor.
    struct FixedBoxes {
        faces: Vec<BoundingBox>,
        descriptor: Vec<f32>,
    }

    impl FaceBackend for FixedBoxes {
        fn locate_faces(
            &self,
            _frame: &Frame,
            _method: LocateMethod,
            _upsample: u32,
        ) -> Result<Vec<BoundingBox>, BackendError> {
            Ok(self.faces.clone())
        }

        fn embed_face(
            &self,
            _frame: &Frame,
            _face: &BoundingBox,
            _jitter: u32,
            _model: ModelSize,
        ) -> Result<Vec<f32>, BackendError> {
            Ok(self.descriptor.clone())
        }

        fn landmarks(&self, _frame: &Frame, _face: &BoundingBox) -> Result<NamedLandmarks, BackendError> {
            Err(BackendError::Unsupported)
        }
    }

    fn fixed(faces: Vec<BoundingBox>) -> FixedBoxes {
        FixedBoxes {
            faces,
            descriptor: vec![0.5, -0.5],
        }
    }

    fn gray(width: u32, height: u32) -> Frame {
        Frame::new(vec![128; (width * height) as usize], width, height).unwrap()
    }

    #[test]
    fn test_extracts_synthetic_face_with_landmarks() {
        let backend = SyntheticBackend::new();
        let profile = ExtractionProfile::enrollment();
        let extraction = DescriptorExtractor::new(&backend, &profile)
            .extract(&synthetic_frame(1, 0))
            .unwrap();
        assert_eq!(extraction.descriptor.len(), 64);
        assert!(extraction.landmarks.is_some());
        assert_eq!(extraction.strategy, 0);
        assert_eq!(extraction.face.width, 120.0);
    }

    #[test]
    fn test_no_face() {
        let backend = SyntheticBackend::new();
        let profile = ExtractionProfile::verification();
        let err = DescriptorExtractor::new(&backend, &profile)
            .extract(&faceless_frame())
            .unwrap_err();
        assert_eq!(err, ExtractionError::NoFace);
    }

    #[test]
    fn test_landmarks_required_for_enrollment_only() {
        let backend = SyntheticBackend {
            without_landmarks: true,
            ..SyntheticBackend::default()
        };
        let enrollment = ExtractionProfile::enrollment();
        let err = DescriptorExtractor::new(&backend, &enrollment)
            .extract(&synthetic_frame(1, 0))
            .unwrap_err();
        assert_eq!(err, ExtractionError::LandmarksMissing);

        let verification = ExtractionProfile::verification();
        let extraction = DescriptorExtractor::new(&backend, &verification)
            .extract(&synthetic_frame(1, 0))
            .unwrap();
        assert!(extraction.landmarks.is_none());
    }

    #[test]
    fn test_small_face_rejected() {
        let backend = fixed(vec![BoundingBox::new(100.0, 100.0, 40.0, 40.0)]);
        let profile = ExtractionProfile::enrollment();
        let err = DescriptorExtractor::new(&backend, &profile)
            .extract(&gray(400, 400))
            .unwrap_err();
        assert!(matches!(err, ExtractionError::FaceTooSmall { width: 40, min: 80, .. }));
    }

    #[test]
    fn test_face_touching_border_is_cropped() {
        let backend = fixed(vec![BoundingBox::new(0.0, 100.0, 150.0, 150.0)]);
        let profile = ExtractionProfile::enrollment();
        let err = DescriptorExtractor::new(&backend, &profile)
            .extract(&gray(400, 400))
            .unwrap_err();
        assert_eq!(err, ExtractionError::FaceCropped);
    }

    #[test]
    fn test_ambiguous_faces() {
        let backend = fixed(vec![
            BoundingBox::new(20.0, 150.0, 100.0, 100.0),
            BoundingBox::new(280.0, 150.0, 100.0, 100.0),
        ]);
        let profile = ExtractionProfile::verification();
        let err = DescriptorExtractor::new(&backend, &profile)
            .extract(&gray(400, 400))
            .unwrap_err();
        assert_eq!(err, ExtractionError::Ambiguous { count: 2 });
    }

    #[test]
    fn test_non_finite_embedding_rejected() {
        let backend = FixedBoxes {
            faces: vec![BoundingBox::new(100.0, 100.0, 150.0, 150.0)],
            descriptor: vec![f32::NAN, 0.1],
        };
        let profile = ExtractionProfile::verification();
        let err = DescriptorExtractor::new(&backend, &profile)
            .extract(&gray(400, 400))
            .unwrap_err();
        assert!(matches!(err, ExtractionError::EmbeddingFailed(_)));
    }

    #[test]
    fn test_large_photo_downscaled_before_localizing() {
        let backend = fixed(vec![BoundingBox::new(300.0, 200.0, 200.0, 200.0)]);
        let profile = ExtractionProfile::verification();
        let extraction = DescriptorExtractor::new(&backend, &profile)
            .extract(&gray(1600, 1200))
            .unwrap();
        assert_eq!((extraction.frame.width, extraction.frame.height), (800, 600));
    }

    #[test]
    fn test_reembed_matches_original() {
        let backend = SyntheticBackend::new();
        let profile = ExtractionProfile::enrollment();
        let extractor = DescriptorExtractor::new(&backend, &profile);
        let extraction = extractor.extract(&synthetic_frame(2, 1)).unwrap();
        let again = extractor.reembed(&extraction.frame, &extraction.face).unwrap();
        assert_eq!(again, extraction.descriptor);
    }
}
