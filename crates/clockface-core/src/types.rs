use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Named facial features, in the order their points are concatenated into a
/// [`LandmarkVector`].
pub const LANDMARK_FEATURES: [&str; 9] = [
    "chin",
    "left_eyebrow",
    "right_eyebrow",
    "nose_bridge",
    "nose_tip",
    "left_eye",
    "right_eye",
    "top_lip",
    "bottom_lip",
];

/// Landmark points per named feature, as returned by the backend.
pub type NamedLandmarks = BTreeMap<String, Vec<(f32, f32)>>;

/// Bounding box for a located face, in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    /// Locator score; backends without one report 1.0.
    pub confidence: f32,
}

impl BoundingBox {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
            confidence: 1.0,
        }
    }

    pub fn area(&self) -> f32 {
        self.width.max(0.0) * self.height.max(0.0)
    }

    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }

    pub fn right(&self) -> f32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.y + self.height
    }
}

/// Face descriptor produced by the embedding backend (typically 128-dimensional).
///
/// Immutable once produced: the values can be read but not changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FaceDescriptor {
    values: Vec<f32>,
}

impl FaceDescriptor {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when every component is a finite number.
    pub fn is_finite(&self) -> bool {
        self.values.iter().all(|v| v.is_finite())
    }

    /// Euclidean distance; the metric the embedding model was trained for.
    pub fn euclidean_distance(&self, other: &FaceDescriptor) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Cosine similarity in [-1, 1]. Zero-norm inputs give 0.
    pub fn similarity(&self, other: &FaceDescriptor) -> f32 {
        cosine(&self.values, &other.values)
    }

    /// Pearson correlation in [-1, 1]. Constant inputs give 0.
    pub fn pearson(&self, other: &FaceDescriptor) -> f32 {
        let n = self.values.len().min(other.values.len());
        if n < 2 {
            return 0.0;
        }
        let a = &self.values[..n];
        let b = &other.values[..n];
        let mean_a = a.iter().sum::<f32>() / n as f32;
        let mean_b = b.iter().sum::<f32>() / n as f32;

        let mut cov = 0.0f32;
        let mut var_a = 0.0f32;
        let mut var_b = 0.0f32;
        for (x, y) in a.iter().zip(b.iter()) {
            let dx = x - mean_a;
            let dy = y - mean_b;
            cov += dx * dy;
            var_a += dx * dx;
            var_b += dy * dy;
        }

        let denom = (var_a * var_b).sqrt();
        if denom > 0.0 {
            cov / denom
        } else {
            0.0
        }
    }
}

impl From<Vec<f32>> for FaceDescriptor {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// Concatenated landmark coordinates, normalized to the face box.
///
/// Each point is stored relative to the box centre and divided by the box
/// width/height, so the vector describes face geometry rather than where the
/// face sat in the photo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LandmarkVector {
    values: Vec<f32>,
}

impl LandmarkVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Build from named features in [`LANDMARK_FEATURES`] order.
    ///
    /// Returns `None` when the box is degenerate or no known feature has points.
    pub fn from_named(named: &NamedLandmarks, face: &BoundingBox) -> Option<Self> {
        if face.width <= 0.0 || face.height <= 0.0 {
            return None;
        }
        let (cx, cy) = face.center();
        let values: Vec<f32> = LANDMARK_FEATURES
            .iter()
            .filter_map(|feature| named.get(*feature))
            .flatten()
            .flat_map(|&(x, y)| [(x - cx) / face.width, (y - cy) / face.height])
            .collect();
        (!values.is_empty()).then(|| Self::new(values))
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Cosine similarity over the common prefix of both vectors.
    pub fn similarity(&self, other: &LandmarkVector) -> f32 {
        let n = self.values.len().min(other.values.len());
        cosine(&self.values[..n], &other.values[..n])
    }
}

fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom > 0.0 {
        dot / denom
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(values: &[f32]) -> FaceDescriptor {
        FaceDescriptor::new(values.to_vec())
    }

    #[test]
    fn test_cosine_similarity_identical() {
        let a = d(&[1.0, 0.0, 0.0]);
        assert!((a.similarity(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_orthogonal_and_opposite() {
        assert!(d(&[1.0, 0.0]).similarity(&d(&[0.0, 1.0])).abs() < 1e-6);
        assert!((d(&[1.0, 0.0]).similarity(&d(&[-1.0, 0.0])) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        assert_eq!(d(&[0.0, 0.0]).similarity(&d(&[1.0, 0.0])), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        assert_eq!(d(&[0.0, 0.0]).euclidean_distance(&d(&[3.0, 4.0])), 5.0);
        let a = d(&[0.2, -0.1, 0.4]);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn test_pearson() {
        let a = d(&[1.0, 2.0, 3.0, 4.0]);
        let scaled = d(&[10.0, 20.0, 30.0, 40.0]);
        let reversed = d(&[4.0, 3.0, 2.0, 1.0]);
        assert!((a.pearson(&scaled) - 1.0).abs() < 1e-6);
        assert!((a.pearson(&reversed) + 1.0).abs() < 1e-6);
        assert_eq!(a.pearson(&d(&[5.0, 5.0, 5.0, 5.0])), 0.0);
        assert_eq!(d(&[1.0]).pearson(&d(&[1.0])), 0.0);
    }

    #[test]
    fn test_descriptor_serializes_as_bare_array() {
        let json = serde_json::to_string(&d(&[0.5, -0.25])).unwrap();
        assert_eq!(json, "[0.5,-0.25]");
        let back: FaceDescriptor = serde_json::from_str("[1.0,2.0]").unwrap();
        assert_eq!(back.values(), &[1.0, 2.0]);
    }

    #[test]
    fn test_descriptor_is_finite() {
        assert!(d(&[0.1, 0.2]).is_finite());
        assert!(!d(&[0.1, f32::NAN]).is_finite());
    }

    #[test]
    fn test_bounding_box_geometry() {
        let b = BoundingBox::new(10.0, 20.0, 30.0, 40.0);
        assert_eq!(b.area(), 1200.0);
        assert_eq!(b.center(), (25.0, 40.0));
        assert_eq!((b.right(), b.bottom()), (40.0, 60.0));
    }

    #[test]
    fn test_landmark_vector_feature_order_and_normalization() {
        let face = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        let mut named = NamedLandmarks::new();
        named.insert("nose_tip".into(), vec![(50.0, 60.0)]);
        named.insert("chin".into(), vec![(50.0, 100.0)]);
        named.insert("unknown_feature".into(), vec![(0.0, 0.0)]);

        let lm = LandmarkVector::from_named(&named, &face).unwrap();
        // chin comes before nose_tip; unknown features are ignored.
        assert_eq!(lm.values(), &[0.0, 0.5, 0.0, 0.1]);
    }

    #[test]
    fn test_landmark_vector_translation_invariant() {
        let mut a = NamedLandmarks::new();
        a.insert("left_eye".into(), vec![(30.0, 40.0), (35.0, 38.0)]);
        a.insert("right_eye".into(), vec![(65.0, 40.0), (70.0, 38.0)]);
        let mut b = NamedLandmarks::new();
        b.insert("left_eye".into(), vec![(230.0, 140.0), (235.0, 138.0)]);
        b.insert("right_eye".into(), vec![(265.0, 140.0), (270.0, 138.0)]);

        let la = LandmarkVector::from_named(&a, &BoundingBox::new(0.0, 0.0, 100.0, 100.0)).unwrap();
        let lb =
            LandmarkVector::from_named(&b, &BoundingBox::new(200.0, 100.0, 100.0, 100.0)).unwrap();
        assert!((la.similarity(&lb) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_landmark_vector_none_when_empty() {
        let face = BoundingBox::new(0.0, 0.0, 100.0, 100.0);
        assert!(LandmarkVector::from_named(&NamedLandmarks::new(), &face).is_none());
        let mut named = NamedLandmarks::new();
        named.insert("chin".into(), vec![(1.0, 1.0)]);
        assert!(LandmarkVector::from_named(&named, &BoundingBox::new(0.0, 0.0, 0.0, 10.0)).is_none());
    }

    #[test]
    fn test_landmark_similarity_uses_common_prefix() {
        let long = LandmarkVector::new(vec![0.1, 0.2, 0.3, 0.4, 9.0, -9.0]);
        let short = LandmarkVector::new(vec![0.1, 0.2, 0.3, 0.4]);
        assert!((long.similarity(&short) - 1.0).abs() < 1e-6);
    }
}
