//! clockface-imaging: Photo decoding, enhancement variants and the quality gate.
//!
//! Everything downstream works on the canonical 8-bit grayscale [`Frame`].

pub mod enhance;
pub mod frame;
pub mod quality;

pub use enhance::{Enhancement, Perturbation};
pub use frame::{Frame, FrameError, MAX_DECODE_DIMENSION};
pub use quality::{QualityProfile, QualityRejection, QualityReport};
