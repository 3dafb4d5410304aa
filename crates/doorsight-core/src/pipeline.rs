//! Registration and verification flows: decode → locate → encode → match.
//!
//! Verification always yields a well-formed [`VerifyDecision`]; registration
//! yields an encoding or a typed reason for the caller to report.

use crate::backend::{Backend, BackendError};
use crate::config::Config;
use crate::gallery::RegistrySnapshot;
use crate::image_io::{self, DecodeError};
use crate::types::{Encoding, FaceRegion, Image, Tier};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("no image provided")]
    NoImage,
    #[error("invalid image: {0}")]
    Decode(#[from] DecodeError),
    #[error("no face detected in image")]
    NoFaceDetected,
    #[error("multiple faces detected ({0}); use a single face image")]
    MultipleFacesDetected(usize),
    #[error("could not encode face")]
    EncodingFailure,
    #[error("name cannot be empty")]
    EmptyName,
    #[error("backend failure: {0}")]
    Backend(#[from] BackendError),
}

impl PipelineError {
    /// Short label reported in place of a name on a denied verification.
    pub fn diagnostic(&self) -> &'static str {
        match self {
            PipelineError::NoImage => "No image",
            PipelineError::Decode(_) => "Invalid image",
            PipelineError::NoFaceDetected => "No face detected",
            PipelineError::MultipleFacesDetected(_) => "Multiple faces detected",
            PipelineError::EncodingFailure => "Encoding failed",
            PipelineError::EmptyName => "Name cannot be empty",
            PipelineError::Backend(_) => "Error",
        }
    }
}

/// Name reported when faces were compared but none matched.
pub const UNKNOWN_NAME: &str = "Unknown";
/// Name reported when the registry snapshot is empty.
pub const NO_REGISTERED_FACES: &str = "No registered faces";

/// Access decision for one verification attempt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerifyDecision {
    pub authorized: bool,
    /// Matched name, or a diagnostic when access is denied.
    pub name: String,
    /// `1 - distance` in [0, 1]; 0 for every failure path.
    pub confidence: f64,
}

impl VerifyDecision {
    fn denied(name: &str) -> Self {
        Self {
            authorized: false,
            name: name.to_string(),
            confidence: 0.0,
        }
    }
}

/// Successful registration: the encoding for the external registry to store.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub name: String,
    pub region: FaceRegion,
    pub encoding: Encoding,
}

/// The face-identity pipeline bound to one backend tier and threshold.
#[derive(Debug)]
pub struct FacePipeline {
    backend: Backend,
    threshold: f64,
}

impl FacePipeline {
    pub fn new(backend: Backend, threshold: f64) -> Self {
        Self { backend, threshold }
    }

    /// Probe the backend once and bind it with the configured threshold.
    pub fn from_config(config: &Config) -> Result<Self, BackendError> {
        Ok(Self::new(Backend::probe(config)?, config.threshold))
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn tier(&self) -> Tier {
        self.backend.tier()
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Register a face from a base64 image payload.
    pub fn register(&self, name: &str, payload: &str) -> Result<Registration, PipelineError> {
        let name = validate_name(name)?;
        let image = decode_payload(payload).map_err(|e| {
            tracing::warn!(error = %e, "registration rejected: undecodable image");
            e
        })?;
        self.register_face(name, &image)
    }

    /// Register a face from an already normalized image.
    pub fn register_image(&self, name: &str, image: &Image) -> Result<Registration, PipelineError> {
        let name = validate_name(name)?;
        self.register_face(name, image)
    }

    fn register_face(&self, name: &str, image: &Image) -> Result<Registration, PipelineError> {
        let result = self.encode_single_face(image);
        match &result {
            Ok(_) => tracing::info!(name, tier = %self.tier(), "registration encoded"),
            Err(e) => tracing::warn!(name, error = %e, "registration rejected"),
        }
        let (region, encoding) = result?;
        Ok(Registration {
            name: name.to_string(),
            region,
            encoding,
        })
    }

    fn encode_single_face(&self, image: &Image) -> Result<(FaceRegion, Encoding), PipelineError> {
        let regions = self.backend.locate(image)?;
        tracing::debug!(faces = regions.len(), "registration faces located");
        let region = match regions.as_slice() {
            [] => return Err(PipelineError::NoFaceDetected),
            [region] => *region,
            many => return Err(PipelineError::MultipleFacesDetected(many.len())),
        };
        let encoding = self
            .backend
            .encode(image, Some(&region))?
            .ok_or(PipelineError::EncodingFailure)?;
        Ok((region, encoding))
    }

    /// Verify a base64 image payload against a registry snapshot.
    pub fn verify(&self, payload: &str, snapshot: &RegistrySnapshot) -> VerifyDecision {
        let decision =
            decode_payload(payload).and_then(|image| self.try_verify(&image, snapshot));
        self.finish(decision)
    }

    /// Verify raw encoded image bytes (PNG, JPEG, ...) against a registry snapshot.
    pub fn verify_bytes(&self, bytes: &[u8], snapshot: &RegistrySnapshot) -> VerifyDecision {
        let decision = if bytes.is_empty() {
            Err(PipelineError::NoImage)
        } else {
            image_io::decode_image(bytes)
                .map_err(PipelineError::from)
                .and_then(|image| self.try_verify(&image, snapshot))
        };
        self.finish(decision)
    }

    /// Verify an already normalized image against a registry snapshot.
    pub fn verify_image(&self, image: &Image, snapshot: &RegistrySnapshot) -> VerifyDecision {
        self.finish(self.try_verify(image, snapshot))
    }

    fn try_verify(
        &self,
        image: &Image,
        snapshot: &RegistrySnapshot,
    ) -> Result<VerifyDecision, PipelineError> {
        let regions = self.backend.locate(image)?;
        tracing::debug!(faces = regions.len(), "verification faces located");
        let region = regions.first().ok_or(PipelineError::NoFaceDetected)?;
        let query = self
            .backend
            .encode(image, Some(region))?
            .ok_or(PipelineError::EncodingFailure)?;

        if snapshot.is_empty() {
            return Ok(VerifyDecision::denied(NO_REGISTERED_FACES));
        }

        let result = self
            .backend
            .compare(snapshot.encodings(), &query, self.threshold);
        let confidence = result.confidence();
        let matched_name = result
            .best_index
            .filter(|_| result.is_match)
            .and_then(|i| snapshot.name(i));

        Ok(match matched_name {
            Some(name) => VerifyDecision {
                authorized: true,
                name: name.to_string(),
                confidence,
            },
            None => VerifyDecision {
                authorized: false,
                name: UNKNOWN_NAME.to_string(),
                confidence,
            },
        })
    }

    fn finish(&self, decision: Result<VerifyDecision, PipelineError>) -> VerifyDecision {
        match decision {
            Ok(decision) => {
                let status = if decision.authorized { "GRANTED" } else { "DENIED" };
                tracing::info!(
                    status,
                    name = %decision.name,
                    confidence = decision.confidence,
                    tier = %self.tier(),
                    "verification"
                );
                decision
            }
            Err(e) => {
                tracing::warn!(error = %e, tier = %self.tier(), "verification failed");
                VerifyDecision::denied(e.diagnostic())
            }
        }
    }
}

fn decode_payload(payload: &str) -> Result<Image, PipelineError> {
    if payload.trim().is_empty() {
        return Err(PipelineError::NoImage);
    }
    Ok(image_io::decode_base64(payload)?)
}

fn validate_name(name: &str) -> Result<&str, PipelineError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(PipelineError::EmptyName);
    }
    Ok(name)
}
