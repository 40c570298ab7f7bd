//! Deterministic stand-ins for the external face library, for tests.
//!
//! [`synthetic_photo`] draws a 320x240 scene with one "face": a square of
//! per-identity grey levels on an 8x8 grid, overlaid with a fine checker
//! texture and framed by a black rim. [`SyntheticBackend`] finds the rim,
//! and embeds the face as its zero-mean, unit-norm 8x8 grid of cell means.
//! Photos of one identity therefore produce near-identical descriptors under
//! any position, size, brightness or contrast change, and photos of different
//! identities land far apart.

use crate::backend::{BackendError, FaceBackend, LocateMethod, ModelSize};
use crate::types::{BoundingBox, NamedLandmarks};
use clockface_imaging::Frame;
use std::io::Cursor;
use std::time::Duration;

pub const PHOTO_WIDTH: u32 = 320;
pub const PHOTO_HEIGHT: u32 = 240;
/// Side of the descriptor grid; descriptors have `GRID * GRID` values.
pub const GRID: u32 = 8;

const RIM: u32 = 2;
const RIM_LEVEL: u8 = 0;
/// Pixels darker than this are rim.
const RIM_THRESHOLD: u8 = 30;
const TEXTURE: i32 = 20;

fn splitmix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9e37_79b9_7f4a_7c15);
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}

fn cell_level(identity: u64, cell: u32) -> i32 {
    80 + (splitmix(identity.wrapping_mul(131).wrapping_add(cell as u64)) % 90) as i32
}

fn background(x: u32, offset: i32) -> i32 {
    80 + (x * 80 / PHOTO_WIDTH) as i32 + offset
}

/// Where and how [`synthetic_photo`] draws the face for one variant.
fn layout(variant: u64) -> (u32, u32, u32, i32) {
    let side = 120 + (variant % 2) as u32 * 8;
    let x = 88 + (variant % 4) as u32 * 8;
    let y = 54 + (variant % 3) as u32 * 6;
    let offset = (variant % 3) as i32 * 8 - 8;
    (x, y, side, offset)
}

/// Grayscale frame of one identity; `variant` shifts position, size and brightness.
pub fn synthetic_frame(identity: u64, variant: u64) -> Frame {
    let (fx, fy, side, offset) = layout(variant);
    let mut data = Vec::with_capacity((PHOTO_WIDTH * PHOTO_HEIGHT) as usize);
    for y in 0..PHOTO_HEIGHT {
        for x in 0..PHOTO_WIDTH {
            let inside = |lo: u32, len: u32, v: u32| v >= lo && v < lo + len;
            let value = if inside(fx, side, x) && inside(fy, side, y) {
                let (dx, dy) = (x - fx, y - fy);
                let cell = (dy * GRID / side) * GRID + dx * GRID / side;
                let texture = if (dx + dy) % 2 == 0 { TEXTURE } else { -TEXTURE };
                cell_level(identity, cell) + texture + offset
            } else if inside(fx.saturating_sub(RIM), side + 2 * RIM, x)
                && inside(fy.saturating_sub(RIM), side + 2 * RIM, y)
            {
                RIM_LEVEL as i32
            } else {
                background(x, offset)
            };
            data.push(value.clamp(0, 255) as u8);
        }
    }
    Frame {
        data,
        width: PHOTO_WIDTH,
        height: PHOTO_HEIGHT,
    }
}

/// A textured scene with no face in it; passes the quality gate.
pub fn faceless_frame() -> Frame {
    let mut frame = synthetic_frame(0, 0);
    let (fx, fy, side, offset) = layout(0);
    for y in fy - RIM..fy + side + RIM {
        for x in fx - RIM..fx + side + RIM {
            let idx = (y * PHOTO_WIDTH + x) as usize;
            let inner = x >= fx && x < fx + side && y >= fy && y < fy + side;
            if !inner {
                frame.data[idx] = background(x, offset) as u8;
            }
        }
    }
    frame
}

/// Encode a frame as PNG bytes, the way photos arrive from a host.
pub fn encode_png(frame: &Frame) -> Vec<u8> {
    let mut bytes = Vec::new();
    frame
        .to_gray_image()
        .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Png)
        .expect("PNG encoding into memory cannot fail");
    bytes
}

pub fn synthetic_photo(identity: u64, variant: u64) -> Vec<u8> {
    encode_png(&synthetic_frame(identity, variant))
}

/// `count` distinct captures of one identity.
pub fn enrollment_photos(identity: u64, count: usize) -> Vec<Vec<u8>> {
    (0..count as u64).map(|v| synthetic_photo(identity, v)).collect()
}

/// [`FaceBackend`] that understands [`synthetic_photo`] scenes.
#[derive(Debug, Clone, Default)]
pub struct SyntheticBackend {
    /// Fail landmark detection.
    pub without_landmarks: bool,
    /// Sleep this long in every embedding call.
    pub embed_delay: Option<Duration>,
}

impl SyntheticBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            embed_delay: Some(delay),
            ..Self::default()
        }
    }
}

impl FaceBackend for SyntheticBackend {
    fn locate_faces(
        &self,
        frame: &Frame,
        _method: LocateMethod,
        _upsample: u32,
    ) -> Result<Vec<BoundingBox>, BackendError> {
        let (mut min_x, mut min_y, mut max_x, mut max_y) = (u32::MAX, u32::MAX, 0, 0);
        for (i, &p) in frame.data.iter().enumerate() {
            if p < RIM_THRESHOLD {
                let (x, y) = (i as u32 % frame.width, i as u32 / frame.width);
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);
            }
        }
        if min_x == u32::MAX || max_x < min_x + 2 * RIM || max_y < min_y + 2 * RIM {
            return Ok(vec![]);
        }
        Ok(vec![BoundingBox::new(
            (min_x + RIM) as f32,
            (min_y + RIM) as f32,
            (max_x + 1 - min_x - 2 * RIM) as f32,
            (max_y + 1 - min_y - 2 * RIM) as f32,
        )])
    }

    fn embed_face(
        &self,
        frame: &Frame,
        face: &BoundingBox,
        _jitter: u32,
        _model: ModelSize,
    ) -> Result<Vec<f32>, BackendError> {
        if let Some(delay) = self.embed_delay {
            std::thread::sleep(delay);
        }
        let (fx, fy) = (face.x.max(0.0) as u32, face.y.max(0.0) as u32);
        let (w, h) = (face.width as u32, face.height as u32);
        if w < GRID || h < GRID || fx + w > frame.width || fy + h > frame.height {
            return Err(BackendError::Failed("face region out of bounds".into()));
        }

        let mut cells = vec![0.0f32; (GRID * GRID) as usize];
        for gy in 0..GRID {
            for gx in 0..GRID {
                let (x0, x1) = (fx + gx * w / GRID, fx + (gx + 1) * w / GRID);
                let (y0, y1) = (fy + gy * h / GRID, fy + (gy + 1) * h / GRID);
                let mut sum = 0u64;
                for y in y0..y1 {
                    for x in x0..x1 {
                        sum += frame.data[(y * frame.width + x) as usize] as u64;
                    }
                }
                cells[(gy * GRID + gx) as usize] = sum as f32 / ((x1 - x0) * (y1 - y0)) as f32;
            }
        }

        let mean = cells.iter().sum::<f32>() / cells.len() as f32;
        cells.iter_mut().for_each(|c| *c -= mean);
        let norm = cells.iter().map(|c| c * c).sum::<f32>().sqrt();
        if norm < 1e-3 {
            return Err(BackendError::Failed("flat face region".into()));
        }
        Ok(cells.into_iter().map(|c| c / norm).collect())
    }

    fn landmarks(&self, _frame: &Frame, face: &BoundingBox) -> Result<NamedLandmarks, BackendError> {
        if self.without_landmarks {
            return Err(BackendError::Failed("landmark model unavailable".into()));
        }
        let at = |rx: f32, ry: f32| (face.x + rx * face.width, face.y + ry * face.height);
        let mut named = NamedLandmarks::new();
        named.insert("chin".into(), vec![at(0.3, 0.9), at(0.5, 0.97), at(0.7, 0.9)]);
        named.insert("left_eye".into(), vec![at(0.25, 0.38), at(0.38, 0.36)]);
        named.insert("right_eye".into(), vec![at(0.62, 0.36), at(0.75, 0.38)]);
        named.insert("nose_tip".into(), vec![at(0.5, 0.62)]);
        named.insert("top_lip".into(), vec![at(0.38, 0.75), at(0.62, 0.75)]);
        Ok(named)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_locates_face_inside_rim() {
        let backend = SyntheticBackend::new();
        for variant in 0..6 {
            let (fx, fy, side, _) = layout(variant);
            let faces = backend
                .locate_faces(&synthetic_frame(3, variant), LocateMethod::Fast, 1)
                .unwrap();
            assert_eq!(faces.len(), 1);
            assert_eq!(
                (faces[0].x, faces[0].y, faces[0].width, faces[0].height),
                (fx as f32, fy as f32, side as f32, side as f32)
            );
        }
    }

    #[test]
    fn test_faceless_frame_has_no_face() {
        let faces = SyntheticBackend::new()
            .locate_faces(&faceless_frame(), LocateMethod::Fast, 1)
            .unwrap();
        assert!(faces.is_empty());
    }

    #[test]
    fn test_same_identity_embeds_close_other_far() {
        let backend = SyntheticBackend::new();
        let embed = |identity, variant| {
            let frame = synthetic_frame(identity, variant);
            let face = backend.locate_faces(&frame, LocateMethod::Fast, 1).unwrap()[0].clone();
            crate::types::FaceDescriptor::new(
                backend.embed_face(&frame, &face, 1, ModelSize::Small).unwrap(),
            )
        };
        let a0 = embed(1, 0);
        assert!(a0.euclidean_distance(&embed(1, 5)) < 0.05);
        assert!(a0.euclidean_distance(&embed(2, 0)) > 0.8);
    }

    #[test]
    fn test_photo_decodes_back_to_frame() {
        let frame = Frame::decode(&synthetic_photo(4, 1)).unwrap();
        assert_eq!(frame, synthetic_frame(4, 1));
    }
}
