use serde::{Deserialize, Serialize};

/// Face detection box in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub confidence: f32,
}

/// A single face-mesh point `(x, y)`.
///
/// Inside a [`LandmarkSet`] the coordinates are pixels of the source frame.
pub type Landmark = (f32, f32);

/// Ordered landmarks for one detected face in one frame.
///
/// The point count is fixed by the face-mesh model (468 for MediaPipe).
/// Serializes as a JSON array of `[x, y]` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LandmarkSet {
    points: Vec<Landmark>,
}

impl LandmarkSet {
    pub fn new(points: Vec<Landmark>) -> Self {
        Self { points }
    }

    /// Scale normalized `[0, 1]` detector output into pixel space of a
    /// `width` x `height` frame.
    pub fn from_normalized(points: &[Landmark], width: u32, height: u32) -> Self {
        let (w, h) = (width as f32, height as f32);
        Self {
            points: points.iter().map(|&(x, y)| (x * w, y * h)).collect(),
        }
    }

    pub fn points(&self) -> &[Landmark] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Euclidean distance between the flattened coordinate sequences.
    ///
    /// Returns `None` when the two sets have a different number of points;
    /// such sets are not comparable.
    pub fn distance(&self, other: &LandmarkSet) -> Option<f32> {
        if self.points.len() != other.points.len() {
            return None;
        }

        let sum = self
            .points
            .iter()
            .zip(other.points.iter())
            .map(|(a, b)| (a.0 - b.0).powi(2) + (a.1 - b.1).powi(2))
            .sum::<f32>();

        Some(sum.sqrt())
    }
}

/// Result of comparing a live landmark set against a registered one.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchResult {
    pub matched: bool,
    /// Distance to the reference, `None` if the shapes differ.
    pub distance: Option<f32>,
}

/// Strategy for comparing a candidate landmark set against a reference.
pub trait Matcher {
    fn compare(&self, candidate: &LandmarkSet, reference: &LandmarkSet, threshold: f32) -> MatchResult;
}

/// Plain Euclidean distance matcher in pixel units.
///
/// A candidate matches when its distance is strictly below `threshold`. The
/// distance is not normalized by face size or frame resolution, so the
/// threshold only makes sense for a given camera setup.
pub struct EuclideanMatcher;

impl Matcher for EuclideanMatcher {
    fn compare(&self, candidate: &LandmarkSet, reference: &LandmarkSet, threshold: f32) -> MatchResult {
        match candidate.distance(reference) {
            Some(distance) => MatchResult {
                matched: distance < threshold,
                distance: Some(distance),
            },
            None => MatchResult {
                matched: false,
                distance: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mesh(n: usize, offset: f32) -> LandmarkSet {
        LandmarkSet::new((0..n).map(|i| (i as f32 + offset, 2.0 * i as f32)).collect())
    }

    #[test]
    fn test_distance_self_is_zero() {
        let a = mesh(468, 0.0);
        assert_eq!(a.distance(&a), Some(0.0));
    }

    #[test]
    fn test_distance_known_value() {
        let a = LandmarkSet::new(vec![(0.0, 0.0), (0.0, 0.0)]);
        let b = LandmarkSet::new(vec![(3.0, 0.0), (0.0, 4.0)]);
        let d = a.distance(&b).unwrap();
        assert!((d - 5.0).abs() < 1e-6, "got {d}");
    }

    #[test]
    fn test_distance_shape_mismatch() {
        let a = mesh(468, 0.0);
        let b = mesh(467, 0.0);
        assert_eq!(a.distance(&b), None);
    }

    #[test]
    fn test_from_normalized_scales_by_frame_size() {
        let set = LandmarkSet::from_normalized(&[(0.5, 0.25), (1.0, 1.0)], 640, 480);
        assert_eq!(set.points(), &[(320.0, 120.0), (640.0, 480.0)]);
    }

    #[test]
    fn test_euclidean_matcher_self_matches() {
        let a = mesh(468, 0.0);
        let result = EuclideanMatcher.compare(&a, &a, 1000.0);
        assert!(result.matched);
        assert_eq!(result.distance, Some(0.0));
    }

    #[test]
    fn test_euclidean_matcher_threshold_is_strict() {
        let a = LandmarkSet::new(vec![(0.0, 0.0)]);
        let b = LandmarkSet::new(vec![(10.0, 0.0)]);
        assert!(!EuclideanMatcher.compare(&a, &b, 10.0).matched);
        assert!(EuclideanMatcher.compare(&a, &b, 10.5).matched);
    }

    #[test]
    fn test_euclidean_matcher_shape_mismatch_never_matches() {
        let a = mesh(468, 0.0);
        let b = mesh(10, 0.0);
        let result = EuclideanMatcher.compare(&a, &b, f32::MAX);
        assert!(!result.matched);
        assert_eq!(result.distance, None);
    }

    #[test]
    fn test_far_candidate_does_not_match() {
        let a = mesh(468, 0.0);
        let b = mesh(468, 100.0);
        // 468 points each shifted by 100px in x → distance = 100 * sqrt(468)
        let result = EuclideanMatcher.compare(&a, &b, 1000.0);
        assert!(!result.matched);
        assert!(result.distance.unwrap() > 2000.0);
    }

    #[test]
    fn test_json_shape() {
        let set = LandmarkSet::new(vec![(1.5, 2.0), (3.0, 4.25)]);
        let json = serde_json::to_string(&set).unwrap();
        assert_eq!(json, "[[1.5,2.0],[3.0,4.25]]");
    }
}
