//! Image normalization: transport decoding, raster decoding and channel
//! canonicalization into an RGB [`Image`].

use crate::types::Image;
use base64::prelude::BASE64_STANDARD;
use base64::Engine as _;
use image::{DynamicImage, GrayImage, Luma};
use ndarray::Array3;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("unsupported or corrupt image: {0}")]
    Raster(#[from] image::ImageError),
    #[error("unsupported channel count {0} (expected 1, 3 or 4)")]
    UnsupportedChannels(u8),
    #[error("image has zero area")]
    Empty,
    #[error("pixel buffer does not match image dimensions: {0}")]
    Shape(#[from] ndarray::ShapeError),
}

/// Decode a base64 payload (optionally a `data:` URL) into a canonical image.
pub fn decode_base64(payload: &str) -> Result<Image, DecodeError> {
    let payload = payload.trim();
    // Browsers hand over `data:image/jpeg;base64,<data>`.
    let data = match payload.split_once(";base64,") {
        Some((prefix, data)) if prefix.starts_with("data:") => data,
        _ => payload,
    };
    let bytes = BASE64_STANDARD.decode(data)?;
    decode_image(&bytes)
}

/// Decode raw encoded raster bytes (PNG, JPEG, BMP, ...) into a canonical image.
pub fn decode_image(bytes: &[u8]) -> Result<Image, DecodeError> {
    let decoded = image::load_from_memory(bytes)?;
    normalize(&decoded)
}

/// Canonicalize an already-decoded image to H × W × 3.
///
/// Grayscale is replicated into all three channels, alpha is dropped,
/// anything else is rejected.
pub fn normalize(decoded: &DynamicImage) -> Result<Image, DecodeError> {
    let (width, height) = (decoded.width() as usize, decoded.height() as usize);
    if width == 0 || height == 0 {
        return Err(DecodeError::Empty);
    }

    let pixels = match decoded.color().channel_count() {
        1 => {
            let gray = decoded.to_luma8();
            Array3::from_shape_fn((height, width, 3), |(y, x, _)| {
                gray.get_pixel(x as u32, y as u32).0[0]
            })
        }
        3 => Array3::from_shape_vec((height, width, 3), decoded.to_rgb8().into_raw())?,
        4 => {
            let rgba = decoded.to_rgba8();
            Array3::from_shape_fn((height, width, 3), |(y, x, c)| {
                rgba.get_pixel(x as u32, y as u32).0[c]
            })
        }
        n => return Err(DecodeError::UnsupportedChannels(n)),
    };

    tracing::debug!(width, height, color = ?decoded.color(), "image normalized");
    Image::from_array(pixels).ok_or(DecodeError::UnsupportedChannels(3))
}

/// Single-channel luminance, `Y = 0.299 R + 0.587 G + 0.114 B`, rounded.
pub fn luminance(image: &Image) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let [r, g, b] = image.rgb(x, y);
        let luma = (299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000;
        Luma([luma as u8])
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use base64::Engine as _;
    use image::{
        GrayAlphaImage, ImageBuffer, ImageFormat, LumaA, Rgb, RgbImage, Rgba, RgbaImage,
    };
    use std::io::Cursor;

    fn encoded(image: DynamicImage, format: ImageFormat) -> Vec<u8> {
        let mut buf = Vec::new();
        image.write_to(&mut Cursor::new(&mut buf), format).unwrap();
        buf
    }

    pub(crate) fn png_bytes(image: DynamicImage) -> Vec<u8> {
        encoded(image, ImageFormat::Png)
    }

    pub(crate) fn png_base64(image: DynamicImage) -> String {
        BASE64_STANDARD.encode(png_bytes(image))
    }

    #[test]
    fn test_rgb_roundtrip_shape() {
        let rgb = RgbImage::from_fn(7, 5, |x, y| Rgb([x as u8, y as u8, 200]));
        let image = decode_base64(&png_base64(DynamicImage::ImageRgb8(rgb))).unwrap();
        assert_eq!(image.pixels().shape(), &[5, 7, 3]);
        assert_eq!(image.rgb(6, 4), [6, 4, 200]);
    }

    #[test]
    fn test_grayscale_replicated() {
        let gray = GrayImage::from_fn(4, 3, |x, y| Luma([(x * 10 + y) as u8]));
        let image = decode_image(&png_bytes(DynamicImage::ImageLuma8(gray.clone()))).unwrap();
        assert_eq!(image.pixels().shape(), &[3, 4, 3]);
        for y in 0..3 {
            for x in 0..4 {
                let v = gray.get_pixel(x, y).0[0];
                assert_eq!(image.rgb(x, y), [v, v, v]);
            }
        }
    }

    #[test]
    fn test_rgba_alpha_dropped() {
        let rgba = RgbaImage::from_fn(3, 3, |x, y| Rgba([x as u8, y as u8, 9, 17]));
        let image = decode_image(&png_bytes(DynamicImage::ImageRgba8(rgba))).unwrap();
        assert_eq!(image.pixels().shape(), &[3, 3, 3]);
        assert_eq!(image.rgb(2, 1), [2, 1, 9]);
    }

    #[test]
    fn test_luma_alpha_rejected() {
        let la = GrayAlphaImage::from_pixel(2, 2, LumaA([10, 255]));
        let err = decode_image(&png_bytes(DynamicImage::ImageLumaA8(la))).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedChannels(2)));
    }

    #[test]
    fn test_jpeg_decoded_to_rgb() {
        let rgb = RgbImage::from_pixel(16, 16, Rgb([120, 60, 200]));
        let image = decode_image(&encoded(DynamicImage::ImageRgb8(rgb), ImageFormat::Jpeg)).unwrap();
        assert_eq!(image.pixels().shape(), &[16, 16, 3]);
        let [r, g, b] = image.rgb(8, 8);
        // Lossy: allow a few levels of drift per channel.
        assert!((r as i32 - 120).abs() <= 8, "r = {r}");
        assert!((g as i32 - 60).abs() <= 8, "g = {g}");
        assert!((b as i32 - 200).abs() <= 8, "b = {b}");
    }

    #[test]
    fn test_bmp_decoded_to_rgb() {
        let rgb = RgbImage::from_fn(5, 4, |x, y| Rgb([x as u8 * 40, y as u8 * 60, 7]));
        let image = decode_image(&encoded(DynamicImage::ImageRgb8(rgb), ImageFormat::Bmp)).unwrap();
        assert_eq!(image.pixels().shape(), &[4, 5, 3]);
        assert_eq!(image.rgb(4, 3), [160, 180, 7]);
    }

    #[test]
    fn test_sixteen_bit_gray_reduced_to_eight() {
        let gray16: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_fn(4, 2, |x, _| Luma([if x < 2 { 0 } else { u16::MAX }]));
        let image = decode_image(&png_bytes(DynamicImage::ImageLuma16(gray16))).unwrap();
        assert_eq!(image.pixels().shape(), &[2, 4, 3]);
        assert_eq!(image.rgb(0, 0), [0, 0, 0]);
        assert_eq!(image.rgb(3, 1), [255, 255, 255]);
    }

    #[test]
    fn test_sixteen_bit_rgb_reduced_to_eight() {
        let rgb16: ImageBuffer<Rgb<u16>, Vec<u16>> =
            ImageBuffer::from_pixel(3, 3, Rgb([u16::MAX, 0, u16::MAX]));
        let image = decode_image(&png_bytes(DynamicImage::ImageRgb16(rgb16))).unwrap();
        assert_eq!(image.pixels().shape(), &[3, 3, 3]);
        assert_eq!(image.rgb(1, 1), [255, 0, 255]);
    }

    #[test]
    fn test_corrupt_bytes_rejected() {
        let err = decode_image(b"definitely not a png").unwrap_err();
        assert!(matches!(err, DecodeError::Raster(_)));
    }

    #[test]
    fn test_bad_base64_rejected() {
        let err = decode_base64("***not base64***").unwrap_err();
        assert!(matches!(err, DecodeError::Base64(_)));
    }

    #[test]
    fn test_data_url_prefix_stripped() {
        let rgb = RgbImage::from_pixel(2, 2, Rgb([1, 2, 3]));
        let payload = format!(
            "data:image/png;base64,{}",
            png_base64(DynamicImage::ImageRgb8(rgb))
        );
        let image = decode_base64(&payload).unwrap();
        assert_eq!(image.rgb(0, 0), [1, 2, 3]);
    }

    #[test]
    fn test_luminance_weights() {
        let rgb = RgbImage::from_fn(3, 1, |x, _| match x {
            0 => Rgb([255, 0, 0]),
            1 => Rgb([0, 255, 0]),
            _ => Rgb([255, 255, 255]),
        });
        let gray = luminance(&Image::from_rgb(&rgb));
        assert_eq!(gray.get_pixel(0, 0).0[0], 76);
        assert_eq!(gray.get_pixel(1, 0).0[0], 150);
        assert_eq!(gray.get_pixel(2, 0).0[0], 255);
    }
}
