//! clockface-core: Face matching decisions for attendance.
//!
//! Turns photos into face descriptors through a pluggable [`FaceBackend`],
//! builds per-employee enrollment galleries, and decides whether a probe
//! matches an enrolled employee under a named [`MatchProfile`].

pub mod backend;
pub mod duplicate;
pub mod enrollment;
pub mod extractor;
pub mod gallery;
pub mod locate;
pub mod profile;
pub mod scorer;
pub mod search;
#[cfg(any(test, feature = "test-support"))]
pub mod testing;
pub mod types;

pub use backend::{BackendError, FaceBackend, LocateMethod, ModelSize};
pub use duplicate::{DuplicateEnrollment, DuplicateGuard};
pub use enrollment::{Enrollment, EnrollmentAggregator, EnrollmentError, EnrollmentPolicy, PhotoReport};
pub use extractor::{DescriptorExtractor, Extraction, ExtractionError, ExtractionProfile};
pub use gallery::{EnrollmentGallery, GalleryError};
pub use profile::{MatchProfile, ProfileName};
pub use scorer::{DistanceMatcher, EnsembleMatcher, MatchVerdict, Matcher};
pub use search::{CancelToken, GallerySearch, GallerySearchResult};
pub use types::{BoundingBox, FaceDescriptor, LandmarkVector};
