//! Enhancement variants and simulated lighting perturbations.
//!
//! Every operation takes a [`Frame`] and returns a new one; the input is
//! never modified, so the same photo can feed several variants.

use crate::frame::Frame;
use serde::{Deserialize, Serialize};

/// A photometric enhancement applied before face localization.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Enhancement {
    /// Linearly stretch the `[low_pct, high_pct]` percentile range to 0–255.
    ContrastStretch { low_pct: f32, high_pct: f32 },
    /// Power-law correction. `gamma < 1` brightens shadows.
    Gamma { gamma: f32 },
    /// Global histogram equalization.
    Equalize,
    /// Contrast-limited adaptive histogram equalization.
    Clahe { tiles: u32, clip_limit: f32 },
    /// Uniform brightness shift.
    Brightness { offset: i16 },
}

impl Enhancement {
    pub fn apply(&self, frame: &Frame) -> Frame {
        match *self {
            Enhancement::ContrastStretch { low_pct, high_pct } => {
                contrast_stretch(frame, low_pct, high_pct)
            }
            Enhancement::Gamma { gamma } => gamma_correct(frame, gamma),
            Enhancement::Equalize => equalize(frame),
            Enhancement::Clahe { tiles, clip_limit } => {
                let mut out = frame.clone();
                clahe_enhance(&mut out.data, frame.width, frame.height, tiles, clip_limit);
                out
            }
            Enhancement::Brightness { offset } => {
                map_lut(frame, |v| (v as i16 + offset).clamp(0, 255) as u8)
            }
        }
    }

    /// Short name used in logs.
    pub fn name(&self) -> &'static str {
        match self {
            Enhancement::ContrastStretch { .. } => "contrast_stretch",
            Enhancement::Gamma { .. } => "gamma",
            Enhancement::Equalize => "equalize",
            Enhancement::Clahe { .. } => "clahe",
            Enhancement::Brightness { .. } => "brightness",
        }
    }
}

/// Simulated lighting condition used to derive environmental variants
/// from an enrollment photo.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Perturbation {
    Indoor,
    Outdoor,
    LowLight,
    Backlit,
    Overcast,
}

impl Perturbation {
    pub const ALL: [Perturbation; 5] = [
        Perturbation::Indoor,
        Perturbation::Outdoor,
        Perturbation::LowLight,
        Perturbation::Backlit,
        Perturbation::Overcast,
    ];

    /// Contrast gain around mid-grey and brightness offset.
    pub fn gain_offset(self) -> (f32, f32) {
        match self {
            Perturbation::Indoor => (0.9, -10.0),
            Perturbation::Outdoor => (1.15, 25.0),
            Perturbation::LowLight => (0.7, -40.0),
            Perturbation::Backlit => (1.3, -20.0),
            Perturbation::Overcast => (0.85, 10.0),
        }
    }

    pub fn apply(self, frame: &Frame) -> Frame {
        let (gain, offset) = self.gain_offset();
        map_lut(frame, |v| {
            ((v as f32 - 128.0) * gain + 128.0 + offset)
                .round()
                .clamp(0.0, 255.0) as u8
        })
    }
}

/// Apply a per-intensity mapping through a 256-entry lookup table.
fn map_lut(frame: &Frame, f: impl Fn(u8) -> u8) -> Frame {
    let lut: [u8; 256] = std::array::from_fn(|i| f(i as u8));
    Frame {
        data: frame.data.iter().map(|&p| lut[p as usize]).collect(),
        width: frame.width,
        height: frame.height,
    }
}

fn histogram(data: &[u8]) -> [u32; 256] {
    let mut hist = [0u32; 256];
    for &p in data {
        hist[p as usize] += 1;
    }
    hist
}

/// Intensity below which `pct` of the pixels fall.
fn percentile_level(hist: &[u32; 256], total: usize, pct: f32) -> u8 {
    let target = (pct.clamp(0.0, 1.0) * total as f32).ceil() as u64;
    let mut seen = 0u64;
    for (level, &count) in hist.iter().enumerate() {
        seen += count as u64;
        if seen >= target.max(1) {
            return level as u8;
        }
    }
    255
}

fn contrast_stretch(frame: &Frame, low_pct: f32, high_pct: f32) -> Frame {
    if frame.data.is_empty() {
        return frame.clone();
    }
    let hist = histogram(&frame.data);
    let lo = percentile_level(&hist, frame.data.len(), low_pct) as f32;
    let hi = percentile_level(&hist, frame.data.len(), high_pct) as f32;
    if hi - lo < 1.0 {
        return frame.clone();
    }
    map_lut(frame, |v| {
        ((v as f32 - lo) / (hi - lo) * 255.0).round().clamp(0.0, 255.0) as u8
    })
}

fn gamma_correct(frame: &Frame, gamma: f32) -> Frame {
    if gamma.is_nan() || gamma <= 0.0 {
        return frame.clone();
    }
    map_lut(frame, |v| {
        (255.0 * (v as f32 / 255.0).powf(gamma)).round().clamp(0.0, 255.0) as u8
    })
}

fn equalize(frame: &Frame) -> Frame {
    if frame.data.is_empty() {
        return frame.clone();
    }
    let cdf = normalized_cdf(&histogram(&frame.data), frame.data.len() as f32);
    map_lut(frame, |v| cdf[v as usize].round() as u8)
}

/// Cumulative histogram rescaled to 0–255, anchored at the first occupied bin.
fn normalized_cdf(hist: &[u32; 256], total: f32) -> [f32; 256] {
    let mut cdf = [0f32; 256];
    cdf[0] = hist[0] as f32;
    for i in 1..256 {
        cdf[i] = cdf[i - 1] + hist[i] as f32;
    }
    let cdf_min = cdf.iter().find(|&&v| v > 0.0).copied().unwrap_or(0.0);
    let denom = total - cdf_min;
    if denom > 0.0 {
        for v in cdf.iter_mut() {
            *v = ((*v - cdf_min) / denom * 255.0).clamp(0.0, 255.0);
        }
    } else {
        // Single occupied bin: nothing to equalize.
        for (i, v) in cdf.iter_mut().enumerate() {
            *v = i as f32;
        }
    }
    cdf
}

/// Clip a tile histogram at `clip` and spread the excess evenly over all bins.
fn clip_histogram(hist: &mut [u32; 256], clip: u32) {
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }
    let redist = excess / 256;
    let leftover = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += redist;
        if i < leftover {
            *bin += 1;
        }
    }
}

/// Apply Contrast-Limited Adaptive Histogram Equalization (CLAHE) in-place.
///
/// `clip_limit` is the maximum share of a tile's pixels any single bin may
/// hold. Tile CDFs are blended bilinearly so tile seams do not show.
pub fn clahe_enhance(gray: &mut [u8], width: u32, height: u32, tiles: u32, clip_limit: f32) {
    let w = width as usize;
    let h = height as usize;
    let t = tiles.max(1) as usize;
    if w == 0 || h == 0 || gray.len() < w * h {
        return;
    }
    let tile_w = w / t;
    let tile_h = h / t;
    if tile_w == 0 || tile_h == 0 {
        return;
    }
    let tile_pixels = tile_w * tile_h;
    let clip = ((clip_limit * tile_pixels as f32) as u32).max(1);

    let mut cdfs: Vec<[f32; 256]> = Vec::with_capacity(t * t);
    for row in 0..t {
        for col in 0..t {
            let mut hist = [0u32; 256];
            for y in row * tile_h..(row + 1) * tile_h {
                for &p in &gray[y * w + col * tile_w..y * w + (col + 1) * tile_w] {
                    hist[p as usize] += 1;
                }
            }
            clip_histogram(&mut hist, clip);
            cdfs.push(normalized_cdf(&hist, tile_pixels as f32));
        }
    }

    for y in 0..h {
        let fy = (y as f32 / tile_h as f32 - 0.5).clamp(0.0, (t - 1) as f32);
        let r0 = fy as usize;
        let r1 = (r0 + 1).min(t - 1);
        let dy = fy - r0 as f32;

        for x in 0..w {
            let fx = (x as f32 / tile_w as f32 - 0.5).clamp(0.0, (t - 1) as f32);
            let c0 = fx as usize;
            let c1 = (c0 + 1).min(t - 1);
            let dx = fx - c0 as f32;

            let pixel = gray[y * w + x] as usize;
            let top = cdfs[r0 * t + c0][pixel] * (1.0 - dx) + cdfs[r0 * t + c1][pixel] * dx;
            let bot = cdfs[r1 * t + c0][pixel] * (1.0 - dx) + cdfs[r1 * t + c1][pixel] * dx;
            gray[y * w + x] = (top * (1.0 - dy) + bot * dy).round().clamp(0.0, 255.0) as u8;
        }
    }
}
