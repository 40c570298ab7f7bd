//! The face primitives clockface consumes but does not implement.
//!
//! Face localization, descriptor embedding and landmark detection come from
//! an external face library. The host wraps that library in a
//! [`FaceBackend`]; everything in this crate works through the trait.

use crate::types::{BoundingBox, NamedLandmarks};
use clockface_imaging::Frame;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Face localization method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LocateMethod {
    /// Cheap, lower-accuracy localizer (e.g. HOG).
    Fast,
    /// Slow, higher-accuracy localizer (e.g. CNN).
    Accurate,
}

/// Embedding model size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelSize {
    Small,
    Large,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BackendError {
    #[error("backend failure: {0}")]
    Failed(String),
    #[error("operation not supported by this backend")]
    Unsupported,
}

/// External face primitives.
///
/// Implementations must be thread-safe: one backend instance serves every
/// request, each on its own blocking worker.
pub trait FaceBackend: Send + Sync {
    /// Locate faces. `upsample` enlarges the image internally so smaller
    /// faces can be found.
    fn locate_faces(
        &self,
        frame: &Frame,
        method: LocateMethod,
        upsample: u32,
    ) -> Result<Vec<BoundingBox>, BackendError>;

    /// Embed one located face. `jitter` is the number of randomized
    /// re-samples averaged into the descriptor.
    fn embed_face(
        &self,
        frame: &Frame,
        face: &BoundingBox,
        jitter: u32,
        model: ModelSize,
    ) -> Result<Vec<f32>, BackendError>;

    /// Named landmark points for one located face.
    fn landmarks(&self, frame: &Frame, face: &BoundingBox) -> Result<NamedLandmarks, BackendError>;
}
