//! UltraFace-style face detector via ONNX Runtime.
//!
//! The model takes a fixed 320x240 RGB input and emits two tensors:
//! per-anchor class scores `[1, N, 2]` (background, face) and per-anchor
//! corner boxes `[1, N, 4]` normalized to [0, 1]. Boxes are filtered by
//! score, de-duplicated with NMS and mapped back to image coordinates.

use crate::types::{FaceRegion, Image};
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Model constants ---
const INPUT_WIDTH: u32 = 320;
const INPUT_HEIGHT: u32 = 240;
const INPUT_MEAN: f32 = 127.0;
const INPUT_STD: f32 = 128.0;
const CONFIDENCE_THRESHOLD: f32 = 0.7;
const NMS_THRESHOLD: f32 = 0.3;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Candidate box in image pixels, before conversion to a region.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

impl Candidate {
    fn area(&self) -> f32 {
        (self.x2 - self.x1).max(0.0) * (self.y2 - self.y1).max(0.0)
    }

    fn iou(&self, other: &Candidate) -> f32 {
        let inter_w = (self.x2.min(other.x2) - self.x1.max(other.x1)).max(0.0);
        let inter_h = (self.y2.min(other.y2) - self.y1.max(other.y1)).max(0.0);
        let inter = inter_w * inter_h;
        let union = self.area() + other.area() - inter;
        if union > 0.0 {
            inter / union
        } else {
            0.0
        }
    }

    /// Round outward-clamped corners into a region; `None` if nothing is left.
    fn to_region(self, width: u32, height: u32) -> Option<FaceRegion> {
        let clamp = |v: f32, max: u32| v.round().clamp(0.0, max as f32) as u32;
        let region = FaceRegion {
            top: clamp(self.y1, height),
            right: clamp(self.x2, width),
            bottom: clamp(self.y2, height),
            left: clamp(self.x1, width),
        };
        (!region.is_empty()).then_some(region)
    }
}

/// ONNX face detector.
pub struct FaceDetector {
    session: Session,
}

impl FaceDetector {
    /// Load the detector model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let num_outputs = session.outputs().len();
        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = num_outputs,
            "loaded face detector model"
        );

        if num_outputs < 2 {
            return Err(DetectorError::InferenceFailed(format!(
                "detector requires 2 outputs (scores, boxes), got {num_outputs}"
            )));
        }

        Ok(Self { session })
    }

    /// Detect faces, returning regions ordered by descending confidence.
    pub fn detect(&mut self, image: &Image) -> Result<Vec<FaceRegion>, DetectorError> {
        let input = preprocess(image);
        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let (_, scores) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("scores: {e}")))?;
        let (_, boxes) = outputs[1]
            .try_extract_tensor::<f32>()
            .map_err(|e| DetectorError::InferenceFailed(format!("boxes: {e}")))?;

        let candidates = decode(
            scores,
            boxes,
            image.width() as f32,
            image.height() as f32,
            CONFIDENCE_THRESHOLD,
        );
        let kept = nms(candidates, NMS_THRESHOLD);
        tracing::debug!(faces = kept.len(), "detector pass finished");

        Ok(kept
            .into_iter()
            .filter_map(|c| c.to_region(image.width(), image.height()))
            .collect())
    }
}

/// Resize to the model input and build a normalized NCHW tensor.
fn preprocess(image: &Image) -> Array4<f32> {
    let resized = imageops::resize(
        &image.to_rgb_image(),
        INPUT_WIDTH,
        INPUT_HEIGHT,
        FilterType::Triangle,
    );
    let (w, h) = (INPUT_WIDTH as usize, INPUT_HEIGHT as usize);
    let mut tensor = Array4::<f32>::zeros((1, 3, h, w));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] = (pixel.0[c] as f32 - INPUT_MEAN) / INPUT_STD;
        }
    }
    tensor
}

/// Turn raw score/box tensors into pixel-space candidates above `threshold`.
fn decode(scores: &[f32], boxes: &[f32], width: f32, height: f32, threshold: f32) -> Vec<Candidate> {
    let anchors = (scores.len() / 2).min(boxes.len() / 4);
    (0..anchors)
        .filter_map(|i| {
            let score = scores[i * 2 + 1];
            if score <= threshold {
                return None;
            }
            let b = &boxes[i * 4..i * 4 + 4];
            Some(Candidate {
                x1: b[0] * width,
                y1: b[1] * height,
                x2: b[2] * width,
                y2: b[3] * height,
                score,
            })
        })
        .collect()
}

/// Greedy non-maximum suppression, highest score first.
fn nms(mut candidates: Vec<Candidate>, iou_threshold: f32) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<Candidate> = Vec::new();
    for candidate in candidates {
        if keep.iter().all(|k| k.iou(&candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgb, RgbImage};

    fn cand(x1: f32, y1: f32, x2: f32, y2: f32, score: f32) -> Candidate {
        Candidate { x1, y1, x2, y2, score }
    }

    #[test]
    fn test_iou_identical() {
        let a = cand(0.0, 0.0, 10.0, 10.0, 1.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_partial() {
        let a = cand(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = cand(5.0, 0.0, 15.0, 10.0, 1.0);
        // Overlap 50, union 150
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn test_nms_suppresses_overlapping() {
        let kept = nms(
            vec![
                cand(5.0, 5.0, 105.0, 105.0, 0.8),
                cand(0.0, 0.0, 100.0, 100.0, 0.9),
                cand(200.0, 200.0, 250.0, 250.0, 0.75),
            ],
            NMS_THRESHOLD,
        );
        assert_eq!(kept.len(), 2);
        assert!((kept[0].score - 0.9).abs() < 1e-6);
        assert!((kept[1].score - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_decode_filters_and_scales() {
        let scores = [0.9, 0.1, 0.2, 0.8];
        let boxes = [0.0, 0.0, 1.0, 1.0, 0.25, 0.5, 0.75, 1.0];
        let candidates = decode(&scores, &boxes, 200.0, 100.0, CONFIDENCE_THRESHOLD);
        assert_eq!(candidates, vec![cand(50.0, 50.0, 150.0, 100.0, 0.8)]);
    }

    #[test]
    fn test_to_region_clamps() {
        let region = cand(-10.0, 5.4, 250.0, 120.0, 0.9).to_region(200, 100).unwrap();
        assert_eq!(region, FaceRegion::new(5, 200, 100, 0));
        assert!(cand(300.0, 0.0, 310.0, 10.0, 0.9).to_region(200, 100).is_none());
    }

    #[test]
    fn test_preprocess_shape_and_normalization() {
        let image = Image::from_rgb(&RgbImage::from_pixel(64, 48, Rgb([255, 127, 0])));
        let tensor = preprocess(&image);
        assert_eq!(tensor.shape(), &[1, 3, INPUT_HEIGHT as usize, INPUT_WIDTH as usize]);
        assert!((tensor[[0, 0, 10, 10]] - 1.0).abs() < 1e-6);
        assert!(tensor[[0, 1, 10, 10]].abs() < 1e-6);
        assert!((tensor[[0, 2, 10, 10]] + 127.0 / 128.0).abs() < 1e-6);
    }

    #[test]
    fn test_load_missing_model() {
        let err = FaceDetector::load(Path::new("/nonexistent/detector.onnx")).err().unwrap();
        assert!(matches!(err, DetectorError::ModelNotFound(_)));
    }
}
