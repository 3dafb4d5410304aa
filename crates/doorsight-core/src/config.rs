//! Core configuration: defaults, `DOORSIGHT_*` environment overrides and
//! TOML files.

use crate::matcher::DEFAULT_THRESHOLD;
use crate::types::{Tier, UnknownTier};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("threshold must be finite and in (0, 2], got {0}")]
    InvalidThreshold(f64),
    #[error("{0}")]
    Tier(#[from] UnknownTier),
}

/// Core configuration: match threshold, tier override and model locations.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Maximum distance for a positive match; lower is stricter.
    pub threshold: f64,
    /// Force a specific tier instead of probing.
    pub tier: Option<Tier>,
    /// Shortcut for `tier = "mock"`, wins over `tier`.
    pub force_mock: bool,
    /// Directory holding the model files below.
    pub model_dir: PathBuf,
    pub detector_model: String,
    pub encoder_model: String,
    pub cascade_model: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            threshold: DEFAULT_THRESHOLD,
            tier: None,
            force_mock: false,
            model_dir: default_model_dir(),
            detector_model: "version-RFB-320.onnx".to_string(),
            encoder_model: "face_encoder_128.onnx".to_string(),
            cascade_model: "seeta_fd_frontal_v1.0.bin".to_string(),
        }
    }
}

impl Config {
    /// Defaults overridden by `DOORSIGHT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Parse a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read a TOML file, then layer environment overrides on top.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml_str(&text)?;
        config.apply_env()?;
        Ok(config)
    }

    /// Apply `DOORSIGHT_*` overrides. Unparseable numbers are ignored, an
    /// unknown tier name is an error.
    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(threshold) = var("DOORSIGHT_THRESHOLD").and_then(|v| v.parse().ok()) {
            self.threshold = threshold;
        }
        if let Some(tier) = var("DOORSIGHT_TIER") {
            self.tier = Some(tier.parse()?);
        }
        if let Some(flag) = var("DOORSIGHT_FORCE_MOCK") {
            self.force_mock = matches!(flag.trim(), "1" | "true" | "yes");
        }
        if let Some(dir) = var("DOORSIGHT_MODEL_DIR") {
            self.model_dir = PathBuf::from(dir);
        }
        if let Some(name) = var("DOORSIGHT_DETECTOR_MODEL") {
            self.detector_model = name;
        }
        if let Some(name) = var("DOORSIGHT_ENCODER_MODEL") {
            self.encoder_model = name;
        }
        if let Some(name) = var("DOORSIGHT_CASCADE_MODEL") {
            self.cascade_model = name;
        }
        self.validate()
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.threshold.is_finite() || self.threshold <= 0.0 || self.threshold > 2.0 {
            return Err(ConfigError::InvalidThreshold(self.threshold));
        }
        Ok(())
    }

    pub fn detector_path(&self) -> PathBuf {
        self.model_dir.join(&self.detector_model)
    }

    pub fn encoder_path(&self) -> PathBuf {
        self.model_dir.join(&self.encoder_model)
    }

    pub fn cascade_path(&self) -> PathBuf {
        self.model_dir.join(&self.cascade_model)
    }
}

/// `$XDG_DATA_HOME/doorsight/models`, falling back to `~/.local/share`.
pub fn default_model_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("doorsight")
        .join("models")
}
