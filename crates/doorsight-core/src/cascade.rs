//! Classical face locator for the geometric tier.
//!
//! Backed by the SeetaFace funnel-structured cascade from the `rustface`
//! crate, run over a luminance image. The trained model is an external file
//! (`seeta_fd_frontal_v1.0.bin`); nothing here carries weights of its own.

use crate::types::FaceRegion;
use image::GrayImage;
use rustface::{create_detector_with_model, read_model, Detector, ImageData};
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

// --- Detection parameters ---
pub const MIN_FACE_SIZE: u32 = 30;
/// Each pyramid level shrinks the image by 1.1.
pub const PYRAMID_SCALE_FACTOR: f32 = 1.0 / 1.1;
pub const SCORE_THRESHOLD: f64 = 2.0;
pub const WINDOW_STEP: u32 = 4;

#[derive(Error, Debug)]
pub enum CascadeError {
    #[error("cascade model not found: {0}")]
    ModelNotFound(String),
    #[error("failed to read cascade model {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed cascade model: {0}")]
    Model(String),
}

/// Face locator over grayscale images, the seam behind the geometric tier.
pub trait GeometricLocator: Send + Sync {
    fn name(&self) -> &str;

    /// Face regions, most confident first.
    fn locate(&self, gray: &GrayImage) -> Result<Vec<FaceRegion>, CascadeError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectParams {
    pub min_face_size: u32,
    pub pyramid_scale_factor: f32,
    pub score_threshold: f64,
    pub window_step: u32,
}

impl Default for DetectParams {
    fn default() -> Self {
        Self {
            min_face_size: MIN_FACE_SIZE,
            pyramid_scale_factor: PYRAMID_SCALE_FACTOR,
            score_threshold: SCORE_THRESHOLD,
            window_step: WINDOW_STEP,
        }
    }
}

/// SeetaFace cascade detector.
///
/// Keeps the raw model bytes and builds a fresh detector per call; the
/// detector itself is stateful and not shareable across threads.
pub struct CascadeDetector {
    model: Vec<u8>,
    params: DetectParams,
}

impl CascadeDetector {
    pub fn load(path: &Path) -> Result<Self, CascadeError> {
        if !path.exists() {
            return Err(CascadeError::ModelNotFound(path.display().to_string()));
        }
        let bytes = std::fs::read(path).map_err(|source| CascadeError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let detector = Self::from_bytes(bytes)?;
        tracing::info!(path = %path.display(), "loaded cascade face model");
        Ok(detector)
    }

    /// Validate and keep an in-memory model.
    pub fn from_bytes(model: Vec<u8>) -> Result<Self, CascadeError> {
        read_model(Cursor::new(&model)).map_err(|e| CascadeError::Model(e.to_string()))?;
        Ok(Self {
            model,
            params: DetectParams::default(),
        })
    }

    pub fn with_params(mut self, params: DetectParams) -> Self {
        self.params = params;
        self
    }

    pub fn params(&self) -> DetectParams {
        self.params
    }

    fn detector(&self) -> Result<Box<dyn Detector>, CascadeError> {
        let model =
            read_model(Cursor::new(&self.model)).map_err(|e| CascadeError::Model(e.to_string()))?;
        let mut detector = create_detector_with_model(model);
        detector.set_min_face_size(self.params.min_face_size);
        detector.set_score_thresh(self.params.score_threshold);
        detector.set_pyramid_scale_factor(self.params.pyramid_scale_factor);
        detector.set_slide_window_step(self.params.window_step, self.params.window_step);
        Ok(detector)
    }
}

impl GeometricLocator for CascadeDetector {
    fn name(&self) -> &str {
        "seetaface"
    }

    fn locate(&self, gray: &GrayImage) -> Result<Vec<FaceRegion>, CascadeError> {
        let (width, height) = gray.dimensions();
        if width < self.params.min_face_size || height < self.params.min_face_size {
            return Ok(Vec::new());
        }

        let mut detector = self.detector()?;
        let mut image = ImageData::new(gray.as_raw(), width, height);
        let mut faces = detector.detect(&mut image);
        faces.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        tracing::debug!(faces = faces.len(), "cascade pass finished");

        Ok(faces
            .iter()
            .filter_map(|face| {
                let bbox = face.bbox();
                to_region(bbox.x(), bbox.y(), bbox.width(), bbox.height(), width, height)
            })
            .collect())
    }
}

/// Convert an `(x, y, width, height)` box that may hang off the image edge.
fn to_region(
    x: i32,
    y: i32,
    box_width: u32,
    box_height: u32,
    width: u32,
    height: u32,
) -> Option<FaceRegion> {
    let (x, y) = (i64::from(x), i64::from(y));
    let clip = |v: i64, max: u32| v.clamp(0, i64::from(max)) as u32;
    let region = FaceRegion {
        top: clip(y, height),
        right: clip(x + i64::from(box_width), width),
        bottom: clip(y + i64::from(box_height), height),
        left: clip(x, width),
    };
    (!region.is_empty()).then_some(region)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params() {
        let params = DetectParams::default();
        assert_eq!(params.min_face_size, 30);
        assert!((1.0 / params.pyramid_scale_factor - 1.1).abs() < 1e-6);
    }

    #[test]
    fn test_to_region_inside() {
        assert_eq!(
            to_region(10, 20, 30, 40, 100, 100),
            Some(FaceRegion::new(20, 40, 60, 10))
        );
    }

    #[test]
    fn test_to_region_clips_edges() {
        assert_eq!(
            to_region(-5, -8, 30, 30, 20, 100),
            Some(FaceRegion::new(0, 20, 22, 0))
        );
    }

    #[test]
    fn test_to_region_outside_image() {
        assert_eq!(to_region(120, 10, 30, 30, 100, 100), None);
        assert_eq!(to_region(-50, 10, 30, 30, 100, 100), None);
    }

    #[test]
    fn test_load_missing_model() {
        let err = CascadeDetector::load(Path::new("/nonexistent/seeta_fd_frontal_v1.0.bin"))
            .err()
            .unwrap();
        assert!(matches!(err, CascadeError::ModelNotFound(_)));
    }

    #[test]
    fn test_rejects_truncated_model() {
        let err = CascadeDetector::from_bytes(vec![1, 2]).err().unwrap();
        assert!(matches!(err, CascadeError::Model(_)));
    }
}
