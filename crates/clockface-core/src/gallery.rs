//! Per-employee enrollment gallery and its persisted JSON form.
//!
//! The gallery is stored by the host as an opaque JSON blob. Older
//! deployments wrote a bare descriptor, a list of descriptors, or an
//! unversioned object; [`EnrollmentGallery::from_json`] is the only place
//! those shapes are recognized, so the scorer only ever sees the current
//! schema.

use crate::types::{FaceDescriptor, LandmarkVector};
use chrono::{DateTime, Utc};
use clockface_imaging::Perturbation;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Current persisted schema version.
pub const GALLERY_FORMAT_VERSION: u32 = 2;

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("gallery JSON is malformed: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("gallery format version {found} is newer than supported version {GALLERY_FORMAT_VERSION}")]
    UnsupportedVersion { found: u32 },
    #[error("gallery descriptors have inconsistent dimensions")]
    InconsistentDimensions,
}

/// A descriptor re-extracted from a lighting-perturbed copy of an enrollment photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentalVariant {
    /// Index of the enrollment photo (and its entry in `descriptors`) this came from.
    pub source: usize,
    pub perturbation: Perturbation,
    pub descriptor: FaceDescriptor,
}

/// Everything enrolled for one employee.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrollmentGallery {
    pub format_version: u32,
    pub descriptors: Vec<FaceDescriptor>,
    #[serde(default)]
    pub landmarks: Vec<LandmarkVector>,
    #[serde(default)]
    pub environmental_variants: Vec<EnvironmentalVariant>,
    #[serde(default)]
    pub quality_scores: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

impl EnrollmentGallery {
    pub fn new(descriptors: Vec<FaceDescriptor>) -> Self {
        Self {
            format_version: GALLERY_FORMAT_VERSION,
            descriptors,
            landmarks: Vec::new(),
            environmental_variants: Vec::new(),
            quality_scores: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// An employee only counts as registered with at least one descriptor.
    pub fn has_face_registered(&self) -> bool {
        !self.descriptors.is_empty()
    }

    /// Mean per-photo quality, for reporting.
    pub fn average_quality(&self) -> Option<f32> {
        if self.quality_scores.is_empty() {
            return None;
        }
        Some(self.quality_scores.iter().sum::<f32>() / self.quality_scores.len() as f32)
    }

    /// Dimension shared by every descriptor, if the gallery is non-empty.
    pub fn dimension(&self) -> Option<usize> {
        self.descriptors.first().map(FaceDescriptor::len)
    }

    /// Every descriptor to compare against, tagged with its source photo.
    pub fn comparison_entries(&self) -> impl Iterator<Item = (usize, &FaceDescriptor)> {
        self.descriptors.iter().enumerate().chain(
            self.environmental_variants
                .iter()
                .map(|v| (v.source, &v.descriptor)),
        )
    }

    pub fn to_json(&self) -> Result<String, GalleryError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Read a gallery in the current schema or any older persisted shape.
    pub fn from_json(json: &str) -> Result<Self, GalleryError> {
        let gallery = match serde_json::from_str::<PersistedGallery>(json)? {
            PersistedGallery::Current(g) => {
                if g.format_version > GALLERY_FORMAT_VERSION {
                    return Err(GalleryError::UnsupportedVersion {
                        found: g.format_version,
                    });
                }
                EnrollmentGallery {
                    format_version: GALLERY_FORMAT_VERSION,
                    ..g
                }
            }
            PersistedGallery::LegacyObject(legacy) => {
                tracing::debug!(
                    descriptors = legacy.encodings.len(),
                    "migrating unversioned gallery object"
                );
                EnrollmentGallery {
                    landmarks: legacy.landmarks,
                    quality_scores: legacy.quality_scores,
                    ..EnrollmentGallery::new(legacy.encodings)
                }
            }
            PersistedGallery::LegacyList(list) => {
                tracing::debug!(descriptors = list.len(), "migrating descriptor list");
                EnrollmentGallery::new(list)
            }
            PersistedGallery::LegacySingle(single) => {
                tracing::debug!("migrating single-descriptor gallery");
                EnrollmentGallery::new(vec![single])
            }
        };
        gallery.check_dimensions()?;
        Ok(gallery)
    }

    fn check_dimensions(&self) -> Result<(), GalleryError> {
        let Some(dim) = self.dimension() else {
            return Ok(());
        };
        let consistent = self
            .comparison_entries()
            .all(|(_, d)| d.len() == dim)
            && self
                .environmental_variants
                .iter()
                .all(|v| v.source < self.descriptors.len());
        if consistent {
            Ok(())
        } else {
            Err(GalleryError::InconsistentDimensions)
        }
    }
}

/// Unversioned object written before the schema carried a version.
#[derive(Deserialize)]
struct LegacyGallery {
    #[serde(alias = "descriptors")]
    encodings: Vec<FaceDescriptor>,
    #[serde(default)]
    landmarks: Vec<LandmarkVector>,
    #[serde(default)]
    quality_scores: Vec<f32>,
}

/// Every shape a persisted gallery has taken, newest first.
#[derive(Deserialize)]
#[serde(untagged)]
enum PersistedGallery {
    Current(EnrollmentGallery),
    LegacyObject(LegacyGallery),
    LegacyList(Vec<FaceDescriptor>),
    LegacySingle(FaceDescriptor),
}
