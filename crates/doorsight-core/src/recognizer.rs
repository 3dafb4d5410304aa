//! 128-dimensional face encoder via ONNX Runtime.
//!
//! Crops the face region, resizes it to the model's square input and
//! returns the raw embedding. Distances between these embeddings are
//! Euclidean, so values are left unnormalized.

use crate::types::{EncoderKind, Encoding, FaceRegion, Image};
use image::imageops::{self, FilterType};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

// --- Named constants ---
const ENCODER_INPUT_SIZE: u32 = 160;
const ENCODER_MEAN: f32 = 127.5;
const ENCODER_STD: f32 = 128.0;

#[derive(Error, Debug)]
pub enum RecognizerError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// ONNX face encoder.
pub struct FaceEncoder {
    session: Session,
}

impl FaceEncoder {
    /// Load the encoder model from the given path.
    pub fn load(model_path: &Path) -> Result<Self, RecognizerError> {
        if !model_path.exists() {
            return Err(RecognizerError::ModelNotFound(model_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        tracing::info!(
            path = %model_path.display(),
            inputs = ?session.inputs().iter().map(|i| i.name()).collect::<Vec<_>>(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            "loaded face encoder model"
        );

        Ok(Self { session })
    }

    /// Encode the face inside `region`. `Ok(None)` if the region does not
    /// overlap the image.
    pub fn encode(
        &mut self,
        image: &Image,
        region: &FaceRegion,
    ) -> Result<Option<Encoding>, RecognizerError> {
        let Some(crop) = image.crop(region) else {
            return Ok(None);
        };
        let input = preprocess(&crop);

        let outputs = self.session.run(ort::inputs![TensorRef::from_array_view(input.view())?])?;
        let (_, raw) = outputs[0]
            .try_extract_tensor::<f32>()
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding extraction: {e}")))?;

        let values = raw.iter().map(|&v| f64::from(v)).collect();
        let encoding = Encoding::new(values, EncoderKind::Native)
            .map_err(|e| RecognizerError::InferenceFailed(format!("embedding: {e}")))?;
        Ok(Some(encoding))
    }
}

/// Resize a face crop to the encoder input and build a normalized NCHW tensor.
fn preprocess(crop: &Image) -> Array4<f32> {
    let resized = imageops::resize(
        &crop.to_rgb_image(),
        ENCODER_INPUT_SIZE,
        ENCODER_INPUT_SIZE,
        FilterType::Triangle,
    );
    let size = ENCODER_INPUT_SIZE as usize;
    let mut tensor = Array4::<f32>::zeros((1, 3, size, size));
    for (x, y, pixel) in resized.enumerate_pixels() {
        for c in 0..3 {
            tensor[[0, c, y as usize, x as usize]] =
                (pixel.0[c] as f32 - ENCODER_MEAN) / ENCODER_STD;
        }
    }
    tensor
}
