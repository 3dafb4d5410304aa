use chrono::{DateTime, Utc};
use image::RgbImage;
use ndarray::{s, Array3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Number of dimensions in every encoding, regardless of tier.
pub const ENCODING_DIM: usize = 128;

/// Backend tier chosen once at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// ONNX detector + 128-d encoder.
    #[serde(alias = "full")]
    FullRecognition,
    /// Classical cascade detector with the thumbnail encoder.
    #[serde(alias = "geometric", alias = "cascade")]
    GeometricDetector,
    /// No detector at all; regions are synthetic.
    Mock,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::FullRecognition => "full_recognition",
            Tier::GeometricDetector => "geometric_detector",
            Tier::Mock => "mock",
        }
    }

    /// Encoder that produces encodings on this tier.
    pub fn encoder_kind(&self) -> EncoderKind {
        match self {
            Tier::FullRecognition => EncoderKind::Native,
            Tier::GeometricDetector | Tier::Mock => EncoderKind::Fallback,
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown tier {0:?} (expected full, geometric or mock)")]
pub struct UnknownTier(pub String);

impl FromStr for Tier {
    type Err = UnknownTier;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" | "full_recognition" => Ok(Tier::FullRecognition),
            "geometric" | "geometric_detector" | "cascade" => Ok(Tier::GeometricDetector),
            "mock" => Ok(Tier::Mock),
            other => Err(UnknownTier(other.to_string())),
        }
    }
}

/// Canonical pixel tensor: height × width × 3 (RGB), one byte per component.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pixels: Array3<u8>,
}

impl Image {
    /// Wrap an `(height, width, channels)` array. Returns `None` unless it has
    /// exactly three channels.
    pub fn from_array(pixels: Array3<u8>) -> Option<Self> {
        (pixels.shape()[2] == 3).then_some(Self { pixels })
    }

    pub fn from_rgb(rgb: &RgbImage) -> Self {
        let (w, h) = rgb.dimensions();
        let pixels = Array3::from_shape_fn((h as usize, w as usize, 3), |(y, x, c)| {
            rgb.get_pixel(x as u32, y as u32).0[c]
        });
        Self { pixels }
    }

    pub fn height(&self) -> u32 {
        self.pixels.shape()[0] as u32
    }

    pub fn width(&self) -> u32 {
        self.pixels.shape()[1] as u32
    }

    pub fn pixels(&self) -> &Array3<u8> {
        &self.pixels
    }

    /// Pixel at column `x`, row `y`.
    pub fn rgb(&self, x: u32, y: u32) -> [u8; 3] {
        let (x, y) = (x as usize, y as usize);
        [
            self.pixels[[y, x, 0]],
            self.pixels[[y, x, 1]],
            self.pixels[[y, x, 2]],
        ]
    }

    pub fn to_rgb_image(&self) -> RgbImage {
        RgbImage::from_fn(self.width(), self.height(), |x, y| image::Rgb(self.rgb(x, y)))
    }

    /// Copy out `region` after clamping it to the image. `None` if nothing is left.
    pub fn crop(&self, region: &FaceRegion) -> Option<Image> {
        let region = region.clamped(self.width(), self.height())?;
        let pixels = self
            .pixels
            .slice(s![
                region.top as usize..region.bottom as usize,
                region.left as usize..region.right as usize,
                ..
            ])
            .to_owned();
        Some(Self { pixels })
    }
}

/// Face rectangle in image coordinates, stored as (top, right, bottom, left).
///
/// `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FaceRegion {
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
    pub left: u32,
}

impl FaceRegion {
    pub fn new(top: u32, right: u32, bottom: u32, left: u32) -> Self {
        Self { top, right, bottom, left }
    }

    /// Convert an `(x, y, width, height)` box.
    pub fn from_xywh(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            top: y,
            right: x + width,
            bottom: y + height,
            left: x,
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    /// Central 50% × 50% block of a `width` × `height` image.
    pub fn centered(width: u32, height: u32) -> Self {
        Self {
            top: height / 4,
            right: 3 * width / 4,
            bottom: 3 * height / 4,
            left: width / 4,
        }
    }

    /// Intersect with a `width` × `height` image. `None` if the result is empty.
    pub fn clamped(&self, width: u32, height: u32) -> Option<Self> {
        let clamped = Self {
            top: self.top.min(height),
            right: self.right.min(width),
            bottom: self.bottom.min(height),
            left: self.left.min(width),
        };
        (!clamped.is_empty()).then_some(clamped)
    }
}

/// Which extractor produced an encoding. Encodings of different kinds live
/// in unrelated feature spaces and must never be compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EncoderKind {
    Native,
    Fallback,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    #[error("encoding has {actual} values, expected {expected}")]
    WrongDimension { expected: usize, actual: usize },
}

/// 128-dimensional face identity signature.
///
/// The length is checked on construction and on deserialization, so every
/// `Encoding` in circulation has exactly [`ENCODING_DIM`] values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawEncoding")]
pub struct Encoding {
    pub(crate) values: Vec<f64>,
    pub(crate) kind: EncoderKind,
}

#[derive(Deserialize)]
struct RawEncoding {
    values: Vec<f64>,
    kind: EncoderKind,
}

impl TryFrom<RawEncoding> for Encoding {
    type Error = EncodingError;

    fn try_from(raw: RawEncoding) -> Result<Self, Self::Error> {
        Encoding::new(raw.values, raw.kind)
    }
}

impl Encoding {
    pub fn new(values: Vec<f64>, kind: EncoderKind) -> Result<Self, EncodingError> {
        if values.len() != ENCODING_DIM {
            return Err(EncodingError::WrongDimension {
                expected: ENCODING_DIM,
                actual: values.len(),
            });
        }
        Ok(Self { values, kind })
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn kind(&self) -> EncoderKind {
        self.kind
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Same extractor and same length; anything else has no meaningful distance.
    pub fn is_comparable(&self, other: &Encoding) -> bool {
        self.kind == other.kind && self.values.len() == other.values.len()
    }

    pub fn norm(&self) -> f64 {
        self.values.iter().map(|v| v * v).sum::<f64>().sqrt()
    }

    pub fn dot(&self, other: &Encoding) -> f64 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    /// Cosine similarity in [-1, 1], or `None` when either vector has zero norm
    /// or the lengths differ.
    pub fn cosine_similarity(&self, other: &Encoding) -> Option<f64> {
        if self.values.len() != other.values.len() {
            return None;
        }
        let denom = self.norm() * other.norm();
        (denom > 0.0).then(|| self.dot(other) / denom)
    }

    /// Euclidean distance; infinite when the lengths differ.
    pub fn euclidean_distance(&self, other: &Encoding) -> f64 {
        if self.values.len() != other.values.len() {
            return f64::INFINITY;
        }
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f64>()
            .sqrt()
    }
}

/// A registered identity as the external registry hands it to us.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrolledFace {
    pub id: String,
    pub name: String,
    pub encoding: Encoding,
    pub registered_at: DateTime<Utc>,
}

/// Outcome of comparing one query encoding against a candidate set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MatchResult {
    /// Index of the closest candidate; `None` when there was nothing to compare.
    pub best_index: Option<usize>,
    /// 0 = identical, 1 = unrelated (native distances may exceed 1).
    pub distance: f64,
    pub is_match: bool,
}

impl MatchResult {
    /// Distance reported when no candidate could be compared.
    pub const MAX_DISTANCE: f64 = 1.0;

    pub fn no_candidates() -> Self {
        Self {
            best_index: None,
            distance: Self::MAX_DISTANCE,
            is_match: false,
        }
    }

    /// `1 - distance`, clamped to [0, 1].
    pub fn confidence(&self) -> f64 {
        (1.0 - self.distance).clamp(0.0, 1.0)
    }
}
