//! Detector-free face location and the thumbnail encoder.
//!
//! Used whenever the full recognition backend is unavailable. The encoder is
//! a cheap stand-in signature (a tiny resized crop, L2-normalized), not a
//! biometric embedding.

use crate::types::{EncoderKind, Encoding, FaceRegion, Image, ENCODING_DIM};
use image::imageops::{self, FilterType};

/// Side length of the square thumbnail the crop is resized to.
pub const THUMBNAIL_SIZE: u32 = 16;
const THUMBNAIL_FILTER: FilterType = FilterType::CatmullRom;

/// Synthetic detection: one region covering the central 50% × 50% block.
pub fn mock_locate(image: &Image) -> Vec<FaceRegion> {
    vec![FaceRegion::centered(image.width(), image.height())]
}

/// Encode `region` (or the central block when `None`) as a thumbnail signature.
///
/// Returns `None` when the region does not overlap the image.
pub fn encode(image: &Image, region: Option<&FaceRegion>) -> Option<Encoding> {
    let region = region
        .copied()
        .unwrap_or_else(|| FaceRegion::centered(image.width(), image.height()));
    let crop = image.crop(&region)?;

    let thumbnail = imageops::resize(
        &crop.to_rgb_image(),
        THUMBNAIL_SIZE,
        THUMBNAIL_SIZE,
        THUMBNAIL_FILTER,
    );

    // Row-major RGB, then pad or truncate to the encoding width.
    let mut values: Vec<f64> = thumbnail.into_raw().into_iter().map(f64::from).collect();
    values.resize(ENCODING_DIM, 0.0);

    let norm = values.iter().map(|v| v * v).sum::<f64>().sqrt();
    if norm > 0.0 {
        values.iter_mut().for_each(|v| *v /= norm);
    }

    Encoding::new(values, EncoderKind::Fallback).ok()
}
