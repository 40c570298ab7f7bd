//! Frame type: decoded grayscale photos and luminance statistics.

use image::imageops::FilterType;
use image::{GrayImage, ImageReader, Limits};
use ndarray::ArrayView2;
use std::io::Cursor;

/// Largest width or height [`Frame::decode`] will decode.
pub const MAX_DECODE_DIMENSION: u32 = 8000;

/// A decoded photo in the canonical 8-bit grayscale format.
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes, row-major).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    /// Wrap raw grayscale bytes, checking the buffer length.
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Result<Self, FrameError> {
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
        })
    }

    /// Decode an encoded photo (PNG, JPEG, ...) and convert it to grayscale.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        Self::decode_within(bytes, MAX_DECODE_DIMENSION)
    }

    /// Like [`decode`](Self::decode), but rejects photos wider or taller than
    /// `max_dimension` from their header, before any pixels are decoded.
    pub fn decode_within(bytes: &[u8], max_dimension: u32) -> Result<Self, FrameError> {
        if bytes.is_empty() {
            return Err(FrameError::Empty);
        }
        let (width, height) = Self::reader(bytes)?.into_dimensions()?;
        if width > max_dimension || height > max_dimension {
            return Err(FrameError::TooLarge {
                width,
                height,
                max: max_dimension,
            });
        }

        let mut limits = Limits::default();
        limits.max_image_width = Some(max_dimension);
        limits.max_image_height = Some(max_dimension);
        let mut reader = Self::reader(bytes)?;
        reader.limits(limits);
        let gray = reader.decode()?.to_luma8();
        Ok(Self::from_gray_image(gray))
    }

    fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, FrameError> {
        ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| FrameError::Decode(image::ImageError::IoError(e)))
    }

    pub fn from_gray_image(image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            data: image.into_raw(),
            width,
            height,
        }
    }

    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_raw(self.width, self.height, self.data.clone())
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }

    /// Shrink the frame so its longest side is at most `max_dimension`.
    ///
    /// Frames already within bounds are returned unchanged.
    pub fn downscale_to(&self, max_dimension: u32) -> Frame {
        let longest = self.width.max(self.height);
        if max_dimension == 0 || longest <= max_dimension {
            return self.clone();
        }
        let scale = max_dimension as f32 / longest as f32;
        let width = ((self.width as f32 * scale).round() as u32).max(1);
        let height = ((self.height as f32 * scale).round() as u32).max(1);
        tracing::debug!(
            from = ?(self.width, self.height),
            to = ?(width, height),
            "downscaling frame"
        );
        let resized =
            image::imageops::resize(&self.to_gray_image(), width, height, FilterType::Triangle);
        Self::from_gray_image(resized)
    }

    /// Average pixel brightness (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.data.iter().map(|&b| b as f32).sum::<f32>() / self.data.len() as f32
    }

    /// Standard deviation of the luminance.
    pub fn contrast(&self) -> f32 {
        if self.data.is_empty() {
            return 0.0;
        }
        let mean = self.avg_brightness();
        let variance = self
            .data
            .iter()
            .map(|&b| (b as f32 - mean).powi(2))
            .sum::<f32>()
            / self.data.len() as f32;
        variance.sqrt()
    }

    /// Variance of the 4-neighbour Laplacian response over the frame interior.
    ///
    /// Blurred photos have weak edges and therefore a low variance.
    pub fn laplacian_variance(&self) -> f32 {
        if self.width < 3 || self.height < 3 {
            return 0.0;
        }
        let Ok(view) = ArrayView2::from_shape(
            (self.height as usize, self.width as usize),
            &self.data[..],
        ) else {
            return 0.0;
        };

        let responses: Vec<f32> = view
            .windows((3, 3))
            .into_iter()
            .map(|w| {
                4.0 * w[[1, 1]] as f32
                    - w[[0, 1]] as f32
                    - w[[1, 0]] as f32
                    - w[[1, 2]] as f32
                    - w[[2, 1]] as f32
            })
            .collect();

        let n = responses.len() as f32;
        let mean = responses.iter().sum::<f32>() / n;
        responses.iter().map(|r| (r - mean).powi(2)).sum::<f32>() / n
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("empty image payload")]
    Empty,
    #[error("could not decode image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("image is {width}x{height}, larger than {max} pixels on a side")]
    TooLarge { width: u32, height: u32, max: u32 },
    #[error("invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}
