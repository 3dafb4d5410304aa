//! Enrolled faces and the read-only snapshot handed to the matcher.

use crate::types::{EnrolledFace, Encoding};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum SnapshotError {
    #[error("snapshot has {encodings} encodings but {names} names")]
    LengthMismatch { encodings: usize, names: usize },
}

#[derive(Error, Debug)]
pub enum GalleryError {
    #[error("malformed gallery: {0}")]
    Json(#[from] serde_json::Error),
}

/// Index-aligned encodings and display names, consistent for one call.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistrySnapshot {
    encodings: Vec<Encoding>,
    names: Vec<String>,
}

impl RegistrySnapshot {
    pub fn new(encodings: Vec<Encoding>, names: Vec<String>) -> Result<Self, SnapshotError> {
        if encodings.len() != names.len() {
            return Err(SnapshotError::LengthMismatch {
                encodings: encodings.len(),
                names: names.len(),
            });
        }
        Ok(Self { encodings, names })
    }

    pub fn encodings(&self) -> &[Encoding] {
        &self.encodings
    }

    pub fn name(&self, index: usize) -> Option<&str> {
        self.names.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.encodings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.encodings.is_empty()
    }
}

/// Anything that can hand out a consistent snapshot of enrolled faces.
pub trait FaceRegistry {
    fn snapshot(&self) -> RegistrySnapshot;
}

/// Public listing entry, without the encoding.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FaceSummary {
    pub id: String,
    pub name: String,
    pub registered_at: DateTime<Utc>,
}

/// In-memory set of enrolled faces, in enrollment order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Gallery {
    faces: Vec<EnrolledFace>,
}

impl Gallery {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a gallery; encodings of the wrong length are rejected.
    pub fn from_json(text: &str) -> Result<Self, GalleryError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, GalleryError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Store a face and return its id: `len + 1`, bumped past any existing id.
    pub fn enroll(&mut self, name: &str, encoding: Encoding) -> String {
        let mut next = self.faces.len() + 1;
        while self.get(&next.to_string()).is_some() {
            next += 1;
        }
        let id = next.to_string();

        tracing::info!(id = %id, name, "face enrolled");
        self.faces.push(EnrolledFace {
            id: id.clone(),
            name: name.to_string(),
            encoding,
            registered_at: Utc::now(),
        });
        id
    }

    pub fn remove(&mut self, id: &str) -> Option<EnrolledFace> {
        let pos = self.faces.iter().position(|f| f.id == id)?;
        let face = self.faces.remove(pos);
        tracing::info!(id, name = %face.name, "face removed");
        Some(face)
    }

    pub fn get(&self, id: &str) -> Option<&EnrolledFace> {
        self.faces.iter().find(|f| f.id == id)
    }

    pub fn list(&self) -> Vec<FaceSummary> {
        self.faces
            .iter()
            .map(|f| FaceSummary {
                id: f.id.clone(),
                name: f.name.clone(),
                registered_at: f.registered_at,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }
}

impl FaceRegistry for Gallery {
    fn snapshot(&self) -> RegistrySnapshot {
        RegistrySnapshot {
            encodings: self.faces.iter().map(|f| f.encoding.clone()).collect(),
            names: self.faces.iter().map(|f| f.name.clone()).collect(),
        }
    }
}
