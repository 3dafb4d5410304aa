//! doorsight-core — Face-identity authentication core.
//!
//! Turns an image into a 128-value face encoding and decides whether it
//! belongs to an enrolled identity. The capability tier (ONNX recognition,
//! cascade detection with thumbnail encodings, or mock) is probed once at
//! startup.

pub mod backend;
pub mod cascade;
pub mod config;
pub mod detector;
pub mod fallback;
pub mod gallery;
pub mod image_io;
pub mod matcher;
pub mod pipeline;
pub mod recognizer;
pub mod types;

pub use backend::{Backend, BackendError, OnnxRecognition, RecognitionBackend};
pub use config::{Config, ConfigError};
pub use gallery::{FaceRegistry, Gallery, RegistrySnapshot};
pub use pipeline::{FacePipeline, PipelineError, Registration, VerifyDecision};
pub use types::{
    EncoderKind, Encoding, EncodingError, EnrolledFace, FaceRegion, Image, MatchResult, Tier,
};
