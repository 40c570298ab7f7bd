//! Face localization fallback chain and single-face selection.
//!
//! Localization runs an ordered list of [`LocateStrategy`] values and stops
//! at the first one that finds a face. Cheap strategies go first; enhanced
//! variants and the accurate localizer are only paid for on hard captures.

use crate::backend::{BackendError, FaceBackend, LocateMethod};
use crate::types::BoundingBox;
use clockface_imaging::{Enhancement, Frame};
use serde::{Deserialize, Serialize};

/// Overlap above which two boxes are treated as the same face.
const NMS_IOU_THRESHOLD: f32 = 0.4;
/// Centre distances closer than this share of the frame diagonal are a tie.
const CENTER_TIE_FRACTION: f32 = 0.02;

/// One step of the localization fallback chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocateStrategy {
    pub method: LocateMethod,
    #[serde(default = "default_upsample")]
    pub upsample: u32,
    /// Enhancement applied to the frame before localizing, if any.
    #[serde(default)]
    pub enhancement: Option<Enhancement>,
}

fn default_upsample() -> u32 {
    1
}

impl LocateStrategy {
    pub fn new(method: LocateMethod, upsample: u32, enhancement: Option<Enhancement>) -> Self {
        Self {
            method,
            upsample,
            enhancement,
        }
    }

    /// Thorough chain for enrollment photos.
    pub fn thorough_chain() -> Vec<Self> {
        use Enhancement::*;
        use LocateMethod::*;
        vec![
            Self::new(Fast, 1, None),
            Self::new(Fast, 1, Some(Clahe { tiles: 8, clip_limit: 0.012 })),
            Self::new(Fast, 1, Some(Gamma { gamma: 0.6 })),
            Self::new(Fast, 1, Some(Gamma { gamma: 1.5 })),
            Self::new(Fast, 1, Some(ContrastStretch { low_pct: 0.02, high_pct: 0.98 })),
            Self::new(Fast, 1, Some(Equalize)),
            Self::new(Fast, 1, Some(Brightness { offset: 40 })),
            Self::new(Fast, 2, None),
            Self::new(Accurate, 1, None),
        ]
    }

    /// Short chain for live verification, where latency matters.
    pub fn quick_chain() -> Vec<Self> {
        use Enhancement::*;
        use LocateMethod::*;
        vec![
            Self::new(Fast, 1, None),
            Self::new(Fast, 1, Some(Clahe { tiles: 8, clip_limit: 0.012 })),
            Self::new(Fast, 1, Some(Gamma { gamma: 0.6 })),
            Self::new(Accurate, 1, None),
        ]
    }

    fn describe(&self) -> String {
        let method = match self.method {
            LocateMethod::Fast => "fast",
            LocateMethod::Accurate => "accurate",
        };
        match &self.enhancement {
            Some(e) => format!("{method}x{}+{}", self.upsample, e.name()),
            None => format!("{method}x{}", self.upsample),
        }
    }
}

/// Faces found by the first successful strategy.
#[derive(Debug, Clone)]
pub struct Located {
    /// The frame the faces were found on (enhanced if the strategy enhanced it).
    pub frame: Frame,
    pub faces: Vec<BoundingBox>,
    /// Index of the successful strategy in the chain.
    pub strategy: usize,
}

/// Run the chain in order and stop at the first strategy that finds a face.
///
/// A strategy whose backend call fails is skipped. `Ok(None)` means every
/// strategy ran and found nothing; an error is only returned when every
/// strategy failed outright.
pub fn locate_with_fallback<B: FaceBackend + ?Sized>(
    backend: &B,
    frame: &Frame,
    strategies: &[LocateStrategy],
) -> Result<Option<Located>, BackendError> {
    let mut last_error = None;
    let mut failures = 0usize;

    for (idx, strategy) in strategies.iter().enumerate() {
        let candidate = match &strategy.enhancement {
            Some(enhancement) => enhancement.apply(frame),
            None => frame.clone(),
        };

        match backend.locate_faces(&candidate, strategy.method, strategy.upsample) {
            Ok(faces) if !faces.is_empty() => {
                tracing::debug!(
                    strategy = %strategy.describe(),
                    attempt = idx + 1,
                    faces = faces.len(),
                    "face localized"
                );
                return Ok(Some(Located {
                    frame: candidate,
                    faces,
                    strategy: idx,
                }));
            }
            Ok(_) => {
                tracing::debug!(strategy = %strategy.describe(), "no face, trying next strategy");
            }
            Err(e) => {
                tracing::warn!(strategy = %strategy.describe(), error = %e, "localizer failed");
                failures += 1;
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) if failures == strategies.len() => Err(e),
        _ => Ok(None),
    }
}

/// Why no single face could be chosen.
#[derive(Debug, Clone, PartialEq)]
pub enum SelectError {
    NoFace,
    Ambiguous { count: usize },
}

/// Pick exactly one face.
///
/// Overlapping duplicates are merged first. The largest box wins; boxes whose
/// area is within `area_tie_ratio` of the largest are near-ties, settled by
/// distance to the frame centre. If the centre distances tie as well, the
/// capture is ambiguous.
pub fn select_face(
    faces: Vec<BoundingBox>,
    frame_width: u32,
    frame_height: u32,
    area_tie_ratio: f32,
) -> Result<BoundingBox, SelectError> {
    let mut faces = nms(faces, NMS_IOU_THRESHOLD);
    faces.sort_by(|a, b| {
        b.area()
            .partial_cmp(&a.area())
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let Some(largest) = faces.first() else {
        return Err(SelectError::NoFace);
    };
    let cutoff = largest.area() * area_tie_ratio;
    let mut contenders: Vec<(f32, BoundingBox)> = faces
        .iter()
        .filter(|f| f.area() >= cutoff)
        .map(|f| (center_distance(f, frame_width, frame_height), f.clone()))
        .collect();

    if contenders.len() == 1 {
        return Ok(contenders.remove(0).1);
    }

    contenders.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));
    let diagonal = (frame_width as f32).hypot(frame_height as f32);
    if contenders[1].0 - contenders[0].0 < diagonal * CENTER_TIE_FRACTION {
        return Err(SelectError::Ambiguous {
            count: contenders.len(),
        });
    }
    Ok(contenders.remove(0).1)
}

fn center_distance(face: &BoundingBox, frame_width: u32, frame_height: u32) -> f32 {
    let (cx, cy) = face.center();
    (cx - frame_width as f32 / 2.0).hypot(cy - frame_height as f32 / 2.0)
}

/// Non-Maximum Suppression: remove overlapping detections.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    for det in detections {
        if keep.iter().all(|k| iou(k, &det) <= iou_threshold) {
            keep.push(det);
        }
    }
    keep
}

/// Compute Intersection-over-Union between two bounding boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = a.right().min(b.right());
    let y2 = a.bottom().min(b.bottom());

    let inter_area = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union_area = a.area() + b.area() - inter_area;

    if union_area > 0.0 {
        inter_area / union_area
    } else {
        0.0
    }
}
