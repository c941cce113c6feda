//! Face-mesh landmark extraction via ONNX Runtime.
//!
//! Two stages: the SCRFD detector finds the face, then a MediaPipe
//! face-landmark model runs on a square crop around the most confident box.
//! The 468 mesh points come back in frame-normalized coordinates.

use crate::detector::{check_frame, sample_rgb, DetectorError, FaceDetector};
use crate::types::{BoundingBox, Landmark};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;

// --- Named constants ---
const FACE_MESH_INPUT_SIZE: usize = 192;
const FACE_MESH_LANDMARKS: usize = 468;
/// Each mesh point is emitted as (x, y, z) in input-pixel units.
const FACE_MESH_POINT_DIM: usize = 3;
const FACE_MESH_PRESENCE_THRESHOLD: f32 = 0.5;
/// Context added around the detector box on every side, as a fraction of
/// the box's longer edge.
const FACE_CROP_MARGIN: f32 = 0.25;

/// Source of per-frame face landmarks.
///
/// Given a packed RGB frame, returns the landmarks of zero or one face in
/// normalized `[0, 1]` frame coordinates. The caller scales them to pixels.
pub trait LandmarkExtractor {
    fn extract(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Vec<Landmark>>, DetectorError>;
}

/// Pixel rectangle of the frame handed to the mesh model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    /// The whole frame.
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }

    /// Square around `face`, grown by the crop margin and clipped to the
    /// frame. `None` when nothing of it lies inside the frame.
    pub fn around(face: &BoundingBox, frame_width: u32, frame_height: u32) -> Option<Self> {
        let side = face.width.max(face.height) * (1.0 + 2.0 * FACE_CROP_MARGIN);
        let cx = face.x + face.width / 2.0;
        let cy = face.y + face.height / 2.0;

        let x0 = (cx - side / 2.0).floor().max(0.0);
        let y0 = (cy - side / 2.0).floor().max(0.0);
        let x1 = (cx + side / 2.0).ceil().min(frame_width as f32);
        let y1 = (cy + side / 2.0).ceil().min(frame_height as f32);

        if !(x1 > x0 && y1 > y0) {
            return None;
        }
        Some(Self {
            x: x0 as u32,
            y: y0 as u32,
            width: (x1 - x0) as u32,
            height: (y1 - y0) as u32,
        })
    }

    /// Map a point normalized to this crop into frame-normalized coordinates.
    pub fn to_frame(&self, point: Landmark, frame_width: u32, frame_height: u32) -> Landmark {
        (
            (self.x as f32 + point.0 * self.width as f32) / frame_width as f32,
            (self.y as f32 + point.1 * self.height as f32) / frame_height as f32,
        )
    }
}

/// SCRFD detector followed by a MediaPipe face-mesh model.
pub struct FaceMesh {
    detector: FaceDetector,
    session: Session,
    landmarks_idx: usize,
    presence_idx: usize,
}

impl FaceMesh {
    /// Load the SCRFD detector and the face-landmark ONNX model.
    pub fn load(detector_path: &str, model_path: &str) -> Result<Self, DetectorError> {
        let detector = FaceDetector::load(detector_path)?;

        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = model_path,
            inputs = ?session.inputs().iter().map(|i| (i.name(), i.dtype())).collect::<Vec<_>>(),
            outputs = ?output_names,
            "loaded face-mesh model"
        );

        if output_names.len() < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "face-mesh model requires 2 outputs (landmarks, presence), got {}",
                output_names.len()
            )));
        }

        let (landmarks_idx, presence_idx) = discover_output_indices(&output_names);
        tracing::debug!(landmarks_idx, presence_idx, "face-mesh output tensor mapping");

        Ok(Self {
            detector,
            session,
            landmarks_idx,
            presence_idx,
        })
    }

    /// Resample `region` of a packed RGB frame to the model input, scaled to
    /// [0, 1], NHWC.
    fn preprocess(rgb: &[u8], width: usize, height: usize, region: &CropRegion) -> Array4<f32> {
        let size = FACE_MESH_INPUT_SIZE;
        let mut tensor = Array4::<f32>::zeros((1, size, size, 3));
        if width == 0 || height == 0 {
            return tensor;
        }

        let sx = region.width as f32 / size as f32;
        let sy = region.height as f32 / size as f32;

        for y in 0..size {
            let src_y = region.y as f32 + (y as f32 + 0.5) * sy - 0.5;
            for x in 0..size {
                let src_x = region.x as f32 + (x as f32 + 0.5) * sx - 0.5;
                let pixel = sample_rgb(rgb, width, height, src_x, src_y);
                for (c, value) in pixel.iter().enumerate() {
                    tensor[[0, y, x, c]] = value / 255.0;
                }
            }
        }

        tensor
    }
}

impl LandmarkExtractor for FaceMesh {
    fn extract(
        &mut self,
        rgb: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Option<Vec<Landmark>>, DetectorError> {
        check_frame(rgb, width, height)?;

        let faces = self.detector.detect(rgb, width, height)?;
        let Some(face) = faces.first() else {
            tracing::trace!("no face box");
            return Ok(None);
        };
        let Some(region) = CropRegion::around(face, width, height) else {
            tracing::trace!(?face, "face box outside frame");
            return Ok(None);
        };
        tracing::trace!(confidence = face.confidence, ?region, "face crop");

        let input = Self::preprocess(rgb, width as usize, height as usize, &region);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, raw) = outputs[self.landmarks_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("landmarks: {e}")))?;
        let (_, presence) = outputs[self.presence_idx]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("presence: {e}")))?;

        let logit = presence.first().copied().ok_or_else(|| {
            DetectorError::InferenceFailed("empty presence tensor".to_string())
        })?;

        let points = decode_landmarks(raw, logit)?;
        Ok(points.map(|p| {
            p.into_iter()
                .map(|point| region.to_frame(point, width, height))
                .collect()
        }))
    }
}

/// Pick the landmark and presence outputs.
///
/// Converted MediaPipe models use opaque tensor names, so anything that
/// mentions "score", "flag" or "presence" is taken as the face flag and the
/// first remaining output as the landmarks. Falls back to positional
/// ordering [0] = landmarks, [1] = presence.
fn discover_output_indices(names: &[String]) -> (usize, usize) {
    let presence = names.iter().position(|n| {
        let n = n.to_ascii_lowercase();
        n.contains("score") || n.contains("flag") || n.contains("presence")
    });

    match presence {
        Some(p) => {
            let landmarks = (0..names.len()).find(|&i| i != p).unwrap_or(0);
            (landmarks, p)
        }
        None => {
            tracing::info!(
                ?names,
                "face-mesh: output names not recognized, using positional mapping [0]=landmarks, [1]=presence"
            );
            (0, 1)
        }
    }
}

fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Turn raw mesh output into crop-normalized 2D landmarks, or `None` when
/// the face-presence score is below threshold.
fn decode_landmarks(raw: &[f32], presence_logit: f32) -> Result<Option<Vec<Landmark>>, DetectorError> {
    let score = sigmoid(presence_logit);
    if score < FACE_MESH_PRESENCE_THRESHOLD {
        tracing::trace!(score, "no face");
        return Ok(None);
    }

    let expected = FACE_MESH_LANDMARKS * FACE_MESH_POINT_DIM;
    if raw.len() != expected {
        return Err(DetectorError::InferenceFailed(format!(
            "expected {expected} landmark values, got {}",
            raw.len()
        )));
    }

    let size = FACE_MESH_INPUT_SIZE as f32;
    let points = raw
        .chunks_exact(FACE_MESH_POINT_DIM)
        .map(|p| (p[0] / size, p[1] / size))
        .collect();

    Ok(Some(points))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn face(x: f32, y: f32, w: f32, h: f32) -> BoundingBox {
        BoundingBox {
            x,
            y,
            width: w,
            height: h,
            confidence: 0.9,
        }
    }

    #[test]
    fn test_crop_around_adds_margin() {
        // 100x120 box centred on (250, 160): side 120 * 1.5 = 180
        let region = CropRegion::around(&face(200.0, 100.0, 100.0, 120.0), 640, 480).unwrap();
        assert_eq!(
            region,
            CropRegion {
                x: 160,
                y: 70,
                width: 180,
                height: 180
            }
        );
    }

    #[test]
    fn test_crop_around_clips_to_frame() {
        let region = CropRegion::around(&face(0.0, 0.0, 100.0, 100.0), 640, 480).unwrap();
        assert_eq!(
            region,
            CropRegion {
                x: 0,
                y: 0,
                width: 125,
                height: 125
            }
        );

        let region = CropRegion::around(&face(580.0, 400.0, 80.0, 80.0), 640, 480).unwrap();
        assert_eq!(region.x + region.width, 640);
        assert_eq!(region.y + region.height, 480);
    }

    #[test]
    fn test_crop_around_outside_frame() {
        assert_eq!(CropRegion::around(&face(900.0, 10.0, 50.0, 50.0), 640, 480), None);
    }

    #[test]
    fn test_crop_to_frame_mapping() {
        let region = CropRegion {
            x: 100,
            y: 50,
            width: 200,
            height: 200,
        };
        assert_eq!(region.to_frame((0.0, 0.0), 640, 480), (100.0 / 640.0, 50.0 / 480.0));
        assert_eq!(region.to_frame((0.5, 0.5), 640, 480), (200.0 / 640.0, 150.0 / 480.0));
        assert_eq!(region.to_frame((1.0, 1.0), 640, 480), (300.0 / 640.0, 250.0 / 480.0));
    }

    #[test]
    fn test_full_region_mapping_is_identity() {
        let region = CropRegion::full(640, 480);
        assert_eq!(region.to_frame((0.25, 0.75), 640, 480), (0.25, 0.75));
    }

    #[test]
    fn test_decoded_mesh_lands_inside_face_box() {
        let mut raw = vec![0.0; FACE_MESH_LANDMARKS * FACE_MESH_POINT_DIM];
        raw[0] = 96.0; // crop centre
        raw[1] = 96.0;
        let region = CropRegion::around(&face(200.0, 100.0, 100.0, 120.0), 640, 480).unwrap();

        let points = decode_landmarks(&raw, 4.0).unwrap().unwrap();
        let (x, y) = region.to_frame(points[0], 640, 480);

        assert!((x * 640.0 - 250.0).abs() < 1e-3, "x = {}", x * 640.0);
        assert!((y * 480.0 - 160.0).abs() < 1e-3, "y = {}", y * 480.0);
    }

    #[test]
    fn test_preprocess_output_shape() {
        let rgb = vec![0u8; 640 * 480 * 3];
        let tensor = FaceMesh::preprocess(&rgb, 640, 480, &CropRegion::full(640, 480));
        assert_eq!(tensor.shape(), &[1, FACE_MESH_INPUT_SIZE, FACE_MESH_INPUT_SIZE, 3]);
    }

    #[test]
    fn test_preprocess_scales_to_unit_range() {
        let rgb = vec![255u8; 64 * 64 * 3];
        let tensor = FaceMesh::preprocess(&rgb, 64, 64, &CropRegion::full(64, 64));
        assert!(tensor.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_preprocess_keeps_channels_apart() {
        let rgb: Vec<u8> = std::iter::repeat([255u8, 0, 128])
            .take(32 * 32)
            .flatten()
            .collect();
        let tensor = FaceMesh::preprocess(&rgb, 32, 32, &CropRegion::full(32, 32));
        assert!((tensor[[0, 10, 10, 0]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 10, 10, 1]].abs() < 1e-6);
        assert!((tensor[[0, 10, 10, 2]] - 128.0 / 255.0).abs() < 1e-6);
    }

    #[test]
    fn test_preprocess_reads_only_the_crop() {
        // Left half black, right half white; crop well inside the right half.
        let (w, h) = (64usize, 32usize);
        let rgb: Vec<u8> = (0..w * h)
            .flat_map(|i| if i % w < w / 2 { [0u8; 3] } else { [255u8; 3] })
            .collect();
        let region = CropRegion {
            x: 40,
            y: 4,
            width: 16,
            height: 16,
        };
        let tensor = FaceMesh::preprocess(&rgb, w, h, &region);
        assert!(tensor.iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_decode_low_presence_is_no_face() {
        let raw = vec![0.0; FACE_MESH_LANDMARKS * FACE_MESH_POINT_DIM];
        assert_eq!(decode_landmarks(&raw, -4.0).unwrap(), None);
    }

    #[test]
    fn test_decode_normalizes_points() {
        let mut raw = vec![0.0; FACE_MESH_LANDMARKS * FACE_MESH_POINT_DIM];
        raw[0] = 96.0;
        raw[1] = 48.0;
        raw[2] = -7.0; // z is dropped
        let points = decode_landmarks(&raw, 4.0).unwrap().unwrap();
        assert_eq!(points.len(), FACE_MESH_LANDMARKS);
        assert_eq!(points[0], (0.5, 0.25));
    }

    #[test]
    fn test_decode_wrong_length_is_error() {
        let raw = vec![0.0; 10];
        assert!(decode_landmarks(&raw, 4.0).is_err());
    }

    #[test]
    fn test_discover_named_presence() {
        let names = vec!["conv2d_21".to_string(), "conv2d_31_flag".to_string()];
        assert_eq!(discover_output_indices(&names), (0, 1));
        let names = vec!["face_score".to_string(), "mesh".to_string()];
        assert_eq!(discover_output_indices(&names), (1, 0));
    }

    #[test]
    fn test_discover_positional_fallback() {
        let names = vec!["1".to_string(), "2".to_string()];
        assert_eq!(discover_output_indices(&names), (0, 1));
    }

    #[test]
    fn test_missing_detector_model() {
        let err = FaceMesh::load("/nonexistent/det_10g.onnx", "/nonexistent/face_landmark.onnx")
            .err()
            .unwrap();
        assert!(matches!(err, DetectorError::ModelNotFound(p) if p.contains("det_10g")));
    }
}
