//! Capability selection: which locator/extractor/matcher tier serves requests.
//!
//! The tier is probed once when the [`Backend`] is built and never changes
//! afterwards. Callers own the backend and pass it around explicitly.

use crate::cascade::{CascadeDetector, CascadeError, GeometricLocator};
use crate::config::Config;
use crate::detector::{DetectorError, FaceDetector};
use crate::fallback;
use crate::image_io::luminance;
use crate::matcher::{best_match, CosineDistance, Distance, EuclideanDistance};
use crate::recognizer::{FaceEncoder, RecognizerError};
use crate::types::{EncoderKind, Encoding, FaceRegion, Image, MatchResult, Tier};
use std::fmt;
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
    #[error("cascade: {0}")]
    Cascade(#[from] CascadeError),
    #[error("{0} lock poisoned by an earlier panic")]
    Poisoned(&'static str),
}

/// Full-capability recognition library: detection, native encoding and its
/// own distance convention.
pub trait RecognitionBackend: Send + Sync {
    fn name(&self) -> &str;

    /// Face regions in canonical order, most confident first.
    fn locate(&self, image: &Image) -> Result<Vec<FaceRegion>, BackendError>;

    /// Encode the face in `region`, or the first detected face when `None`.
    /// `Ok(None)` means no encoding could be produced.
    fn encode(
        &self,
        image: &Image,
        region: Option<&FaceRegion>,
    ) -> Result<Option<Encoding>, BackendError>;

    fn distance(&self, known: &Encoding, query: &Encoding) -> f64 {
        EuclideanDistance.distance(known, query)
    }
}

/// ONNX detector + encoder pair. Sessions need exclusive access per run.
pub struct OnnxRecognition {
    detector: Mutex<FaceDetector>,
    encoder: Mutex<FaceEncoder>,
}

impl OnnxRecognition {
    pub fn load(detector_path: &Path, encoder_path: &Path) -> Result<Self, BackendError> {
        let detector = FaceDetector::load(detector_path)?;
        let encoder = FaceEncoder::load(encoder_path)?;
        Ok(Self {
            detector: Mutex::new(detector),
            encoder: Mutex::new(encoder),
        })
    }
}

impl RecognitionBackend for OnnxRecognition {
    fn name(&self) -> &str {
        "onnx"
    }

    fn locate(&self, image: &Image) -> Result<Vec<FaceRegion>, BackendError> {
        let mut detector = self
            .detector
            .lock()
            .map_err(|_| BackendError::Poisoned("detector"))?;
        Ok(detector.detect(image)?)
    }

    fn encode(
        &self,
        image: &Image,
        region: Option<&FaceRegion>,
    ) -> Result<Option<Encoding>, BackendError> {
        let region = match region {
            Some(region) => *region,
            None => match self.locate(image)?.first() {
                Some(region) => *region,
                None => return Ok(None),
            },
        };
        let mut encoder = self
            .encoder
            .lock()
            .map_err(|_| BackendError::Poisoned("encoder"))?;
        Ok(encoder.encode(image, &region)?)
    }
}

/// Adapts a recognition backend's distance to the matcher.
struct NativeDistance<'a>(&'a dyn RecognitionBackend);

impl Distance for NativeDistance<'_> {
    fn distance(&self, known: &Encoding, query: &Encoding) -> f64 {
        self.0.distance(known, query)
    }
}

/// The selected capability tier.
pub enum Backend {
    FullRecognition(Box<dyn RecognitionBackend>),
    GeometricDetector(Box<dyn GeometricLocator>),
    Mock,
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::FullRecognition(b) => f.debug_tuple("FullRecognition").field(&b.name()).finish(),
            Backend::GeometricDetector(c) => f.debug_tuple("GeometricDetector").field(&c.name()).finish(),
            Backend::Mock => f.write_str("Mock"),
        }
    }
}

impl Backend {
    /// Select the tier for this process.
    ///
    /// `force_mock` wins over everything. A forced `tier` must load or the
    /// probe fails. Otherwise the best tier that loads is chosen: ONNX models,
    /// then the classical cascade, then mock.
    pub fn probe(config: &Config) -> Result<Self, BackendError> {
        if config.force_mock {
            tracing::warn!("mock tier forced by configuration; face regions are synthetic");
            return Ok(Backend::Mock);
        }

        let backend = match config.tier {
            Some(Tier::FullRecognition) => Backend::FullRecognition(Box::new(
                OnnxRecognition::load(&config.detector_path(), &config.encoder_path())?,
            )),
            Some(Tier::GeometricDetector) => {
                Backend::GeometricDetector(Box::new(CascadeDetector::load(&config.cascade_path())?))
            }
            Some(Tier::Mock) => Backend::Mock,
            None => Self::best_available(config),
        };

        tracing::info!(tier = %backend.tier(), forced = config.tier.is_some(), "backend selected");
        if backend.is_synthetic() {
            tracing::warn!("running in mock tier; face regions are synthetic");
        }
        Ok(backend)
    }

    fn best_available(config: &Config) -> Self {
        match OnnxRecognition::load(&config.detector_path(), &config.encoder_path()) {
            Ok(onnx) => return Backend::FullRecognition(Box::new(onnx)),
            Err(e) => tracing::info!(error = %e, "full recognition unavailable"),
        }

        match CascadeDetector::load(&config.cascade_path()) {
            Ok(cascade) => {
                tracing::warn!("falling back to cascade detection with thumbnail encodings");
                return Backend::GeometricDetector(Box::new(cascade));
            }
            Err(e) => tracing::info!(error = %e, "cascade detector unavailable"),
        }

        Backend::Mock
    }

    pub fn tier(&self) -> Tier {
        match self {
            Backend::FullRecognition(_) => Tier::FullRecognition,
            Backend::GeometricDetector(_) => Tier::GeometricDetector,
            Backend::Mock => Tier::Mock,
        }
    }

    /// `true` when regions are made up rather than detected.
    pub fn is_synthetic(&self) -> bool {
        matches!(self, Backend::Mock)
    }

    pub fn encoder_kind(&self) -> EncoderKind {
        self.tier().encoder_kind()
    }

    /// Face Locator: zero or more regions, never an error for "no face".
    pub fn locate(&self, image: &Image) -> Result<Vec<FaceRegion>, BackendError> {
        match self {
            Backend::FullRecognition(backend) => backend.locate(image),
            Backend::GeometricDetector(locator) => Ok(locator.locate(&luminance(image))?),
            Backend::Mock => Ok(fallback::mock_locate(image)),
        }
    }

    /// Feature Extractor: a 128-value encoding or `None`.
    pub fn encode(
        &self,
        image: &Image,
        region: Option<&FaceRegion>,
    ) -> Result<Option<Encoding>, BackendError> {
        match self {
            Backend::FullRecognition(backend) => backend.encode(image, region),
            Backend::GeometricDetector(_) | Backend::Mock => Ok(fallback::encode(image, region)),
        }
    }

    /// Matcher: closest enrolled encoding under this tier's distance.
    pub fn compare(&self, known: &[Encoding], query: &Encoding, threshold: f64) -> MatchResult {
        match self {
            Backend::FullRecognition(backend) => {
                best_match(known, query, threshold, &NativeDistance(backend.as_ref()))
            }
            Backend::GeometricDetector(_) | Backend::Mock => {
                best_match(known, query, threshold, &CosineDistance)
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::{GrayImage, Rgb, RgbImage};
    use std::path::PathBuf;

    /// Recognition library double: fixed regions, encodings derived from the
    /// mean color of the region.
    pub(crate) struct StubRecognition {
        pub regions: Vec<FaceRegion>,
    }

    impl RecognitionBackend for StubRecognition {
        fn name(&self) -> &str {
            "stub"
        }

        fn locate(&self, _image: &Image) -> Result<Vec<FaceRegion>, BackendError> {
            Ok(self.regions.clone())
        }

        fn encode(
            &self,
            image: &Image,
            region: Option<&FaceRegion>,
        ) -> Result<Option<Encoding>, BackendError> {
            let Some(region) = region.or(self.regions.first()) else {
                return Ok(None);
            };
            let Some(crop) = image.crop(region) else {
                return Ok(None);
            };
            let [r, g, b] = crop.rgb(0, 0);
            let mut values = vec![0.0; crate::types::ENCODING_DIM];
            values[0] = r as f64 / 255.0;
            values[1] = g as f64 / 255.0;
            values[2] = b as f64 / 255.0;
            Ok(Encoding::new(values, EncoderKind::Native).ok())
        }
    }

    /// Geometric locator double returning fixed regions.
    pub(crate) struct StubLocator {
        pub regions: Vec<FaceRegion>,
    }

    impl GeometricLocator for StubLocator {
        fn name(&self) -> &str {
            "stub"
        }

        fn locate(&self, _gray: &GrayImage) -> Result<Vec<FaceRegion>, CascadeError> {
            Ok(self.regions.clone())
        }
    }

    fn scratch_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("doorsight-{name}-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn config_in(dir: PathBuf) -> Config {
        Config {
            model_dir: dir,
            ..Config::default()
        }
    }

    fn test_image(width: u32, height: u32) -> Image {
        Image::from_rgb(&RgbImage::from_fn(width, height, |x, y| {
            Rgb([x as u8, y as u8, 90])
        }))
    }

    #[test]
    fn test_probe_force_mock() {
        let config = Config {
            force_mock: true,
            tier: Some(Tier::FullRecognition),
            ..Config::default()
        };
        let backend = Backend::probe(&config).unwrap();
        assert_eq!(backend.tier(), Tier::Mock);
        assert!(backend.is_synthetic());
    }

    #[test]
    fn test_probe_degrades_to_mock_without_models() {
        let backend = Backend::probe(&config_in(scratch_dir("empty"))).unwrap();
        assert_eq!(backend.tier(), Tier::Mock);
    }

    #[test]
    fn test_probe_forced_full_requires_models() {
        let config = Config {
            tier: Some(Tier::FullRecognition),
            ..config_in(scratch_dir("forced-full"))
        };
        let err = Backend::probe(&config).unwrap_err();
        assert!(matches!(err, BackendError::Detector(DetectorError::ModelNotFound(_))));
    }

    #[test]
    fn test_probe_skips_malformed_cascade() {
        let config = config_in(scratch_dir("bad-cascade"));
        std::fs::write(config.cascade_path(), b"no").unwrap();

        let backend = Backend::probe(&config).unwrap();
        assert_eq!(backend.tier(), Tier::Mock);

        let forced = Config {
            tier: Some(Tier::GeometricDetector),
            ..config
        };
        let err = Backend::probe(&forced).unwrap_err();
        assert!(matches!(err, BackendError::Cascade(CascadeError::Model(_))));
    }

    #[test]
    fn test_geometric_tier_uses_locator_and_thumbnails() {
        let region = FaceRegion::new(4, 36, 28, 8);
        let backend = Backend::GeometricDetector(Box::new(StubLocator {
            regions: vec![region],
        }));
        let image = test_image(40, 32);
        assert_eq!(backend.locate(&image).unwrap(), vec![region]);
        assert_eq!(backend.encoder_kind(), EncoderKind::Fallback);
        assert!(!backend.is_synthetic());

        let encoding = backend.encode(&image, Some(&region)).unwrap().unwrap();
        assert_eq!(encoding.kind(), EncoderKind::Fallback);
    }

    #[test]
    fn test_mock_tier_pipeline_pieces() {
        let backend = Backend::Mock;
        let image = test_image(40, 20);
        let regions = backend.locate(&image).unwrap();
        assert_eq!(regions, vec![FaceRegion::new(5, 30, 15, 10)]);

        let encoding = backend.encode(&image, regions.first()).unwrap().unwrap();
        assert_eq!(encoding.kind, EncoderKind::Fallback);

        let result = backend.compare(&[encoding.clone()], &encoding, 0.6);
        assert_eq!(result.best_index, Some(0));
        assert!(result.distance.abs() < 1e-6);
        assert!(result.is_match);
    }

    #[test]
    fn test_full_tier_uses_native_distance() {
        let backend = Backend::FullRecognition(Box::new(StubRecognition { regions: vec![] }));
        let mut far = vec![0.0; crate::types::ENCODING_DIM];
        far[0] = 3.0;
        far[1] = 4.0;
        let known = vec![Encoding::new(far, EncoderKind::Native).unwrap()];
        let query = Encoding::new(vec![0.0; crate::types::ENCODING_DIM], EncoderKind::Native).unwrap();

        let result = backend.compare(&known, &query, 0.6);
        assert!((result.distance - 5.0).abs() < 1e-12);
        assert!(!result.is_match);
        assert_eq!(result.confidence(), 0.0);
    }

    #[test]
    fn test_full_tier_without_face_has_no_encoding() {
        let backend = Backend::FullRecognition(Box::new(StubRecognition { regions: vec![] }));
        assert_eq!(backend.encode(&test_image(10, 10), None).unwrap(), None);
    }
}
