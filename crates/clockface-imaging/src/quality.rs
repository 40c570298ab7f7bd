//! Image quality gate.
//!
//! Rejects photos that are unusable for face matching before any localization
//! or embedding work is spent on them. One parameterized gate serves both
//! enrollment ([`QualityProfile::strict`]) and verification
//! ([`QualityProfile::permissive`]).

use crate::frame::Frame;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Luminance standard deviation treated as "full" contrast when scoring.
const CONTRAST_SCORE_FULL: f32 = 64.0;
/// Laplacian variance treated as "full" sharpness when scoring.
const SHARPNESS_SCORE_FULL: f32 = 500.0;

/// Tunable thresholds for the quality gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityProfile {
    pub min_width: u32,
    pub min_height: u32,
    /// Sanity ceiling on either dimension.
    pub max_dimension: u32,
    /// Acceptable mean luminance band (0–255).
    pub min_brightness: f32,
    pub max_brightness: f32,
    /// Minimum luminance standard deviation.
    pub min_contrast: f32,
    /// Minimum Laplacian variance; `None` skips the blur check.
    pub min_sharpness: Option<f32>,
}

impl QualityProfile {
    /// Tight thresholds for enrollment photos.
    pub fn strict() -> Self {
        Self {
            min_width: 200,
            min_height: 200,
            max_dimension: 8000,
            min_brightness: 50.0,
            max_brightness: 200.0,
            min_contrast: 20.0,
            min_sharpness: Some(100.0),
        }
    }

    /// Loose thresholds for live verification captures.
    pub fn permissive() -> Self {
        Self {
            min_width: 100,
            min_height: 100,
            max_dimension: 8000,
            min_brightness: 30.0,
            max_brightness: 225.0,
            min_contrast: 10.0,
            min_sharpness: Some(20.0),
        }
    }

    /// Run every check in order, stopping at the first failure.
    pub fn evaluate(&self, frame: &Frame) -> Result<QualityReport, QualityRejection> {
        let (width, height) = (frame.width, frame.height);
        if width < self.min_width || height < self.min_height {
            return Err(QualityRejection::TooSmall {
                width,
                height,
                min_width: self.min_width,
                min_height: self.min_height,
            });
        }
        if width > self.max_dimension || height > self.max_dimension {
            return Err(QualityRejection::TooLarge {
                width,
                height,
                max: self.max_dimension,
            });
        }

        let brightness = frame.avg_brightness();
        if brightness < self.min_brightness {
            return Err(QualityRejection::TooDark {
                mean: brightness,
                min: self.min_brightness,
            });
        }
        if brightness > self.max_brightness {
            return Err(QualityRejection::TooBright {
                mean: brightness,
                max: self.max_brightness,
            });
        }

        let contrast = frame.contrast();
        if contrast < self.min_contrast {
            return Err(QualityRejection::LowContrast {
                contrast,
                min: self.min_contrast,
            });
        }

        let sharpness = match self.min_sharpness {
            Some(min) => {
                let sharpness = frame.laplacian_variance();
                if sharpness < min {
                    return Err(QualityRejection::Blurry { sharpness, min });
                }
                Some(sharpness)
            }
            None => None,
        };

        Ok(QualityReport {
            width,
            height,
            brightness,
            contrast,
            sharpness,
        })
    }

    /// `(accepted, reason)` form of [`evaluate`](Self::evaluate).
    pub fn check(&self, frame: &Frame) -> (bool, String) {
        match self.evaluate(frame) {
            Ok(report) => (true, report.to_string()),
            Err(rejection) => (false, rejection.to_string()),
        }
    }
}

/// Measurements of an accepted photo.
#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    pub width: u32,
    pub height: u32,
    pub brightness: f32,
    pub contrast: f32,
    pub sharpness: Option<f32>,
}

impl QualityReport {
    /// Fold brightness, contrast and sharpness into a single score in [0, 1].
    pub fn score(&self) -> f32 {
        let brightness = 1.0 - ((self.brightness - 127.5).abs() / 127.5).min(1.0);
        let contrast = (self.contrast / CONTRAST_SCORE_FULL).min(1.0);
        let mut parts = vec![brightness, contrast];
        if let Some(sharpness) = self.sharpness {
            parts.push((sharpness / SHARPNESS_SCORE_FULL).min(1.0));
        }
        (parts.iter().sum::<f32>() / parts.len() as f32).clamp(0.0, 1.0)
    }
}

impl std::fmt::Display for QualityReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "image quality acceptable ({}x{}, brightness {:.1}, contrast {:.1}",
            self.width, self.height, self.brightness, self.contrast
        )?;
        if let Some(sharpness) = self.sharpness {
            write!(f, ", sharpness {sharpness:.1}")?;
        }
        write!(f, ")")
    }
}

/// The first quality check a photo failed, with the offending metric.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QualityRejection {
    #[error("image too small: {width}x{height}, minimum {min_width}x{min_height}")]
    TooSmall {
        width: u32,
        height: u32,
        min_width: u32,
        min_height: u32,
    },
    #[error("image too large: {width}x{height}, maximum {max} per side")]
    TooLarge { width: u32, height: u32, max: u32 },
    #[error("image too dark: mean luminance {mean:.1} below {min:.1}")]
    TooDark { mean: f32, min: f32 },
    #[error("image too bright: mean luminance {mean:.1} above {max:.1}")]
    TooBright { mean: f32, max: f32 },
    #[error("insufficient contrast: {contrast:.1} below {min:.1}")]
    LowContrast { contrast: f32, min: f32 },
    #[error("image too blurry: sharpness {sharpness:.1} below {min:.1}")]
    Blurry { sharpness: f32, min: f32 },
}
