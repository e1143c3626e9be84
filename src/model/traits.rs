//! Load/run contract between the service and the try-on pipeline

use async_trait::async_trait;
use image::RgbImage;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::model::device::{Device, Precision};

/// Everything a loader needs to materialize one pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadSpec {
    /// Model repository identifier (primary or fallback)
    pub identifier: String,

    /// Repository revision (branch, tag or commit)
    pub revision: String,

    /// Optional external VAE repository
    pub vae_id: Option<String>,

    /// Device the pipeline is placed on
    pub device: Device,

    /// Numeric precision, tied to the device
    pub precision: Precision,

    /// Token for private or gated repositories
    pub auth_token: Option<String>,
}

/// Inputs for a single try-on call.
///
/// All three images are already normalized to the model canvas.
#[derive(Debug, Clone)]
pub struct TryOnInput {
    /// The subject photo
    pub image: RgbImage,

    /// Conditioning mask; the garment image doubles as the mask
    pub mask_image: RgbImage,

    /// Garment style reference
    pub cloth: RgbImage,
}

/// A loaded try-on pipeline
#[async_trait]
pub trait TryOnPipeline: Send + Sync {
    /// Run one try-on call and return the generated candidates
    async fn run(&self, input: TryOnInput) -> anyhow::Result<Vec<RgbImage>>;
}

/// Materializes pipelines for a given load spec.
///
/// Implementations classify their failures into a [`LoadErrorKind`] once, at
/// this boundary.
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, spec: &LoadSpec) -> Result<Arc<dyn TryOnPipeline>, LoadError>;
}

/// Classified cause of a failed load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadErrorKind {
    /// Weight files, subfolders, repository or revision not found
    MissingArtifact,
    /// Private or gated repository without valid credentials
    AuthFailure,
    /// The attempt did not finish within the load timeout
    Timeout,
    /// Anything else: bad arguments, runtime crashes, network errors
    Other,
}

impl LoadErrorKind {
    /// Environment-class failures are the only ones eligible for fallback
    pub fn is_environment(&self) -> bool {
        matches!(self, Self::MissingArtifact | Self::AuthFailure)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingArtifact => "missing_artifact",
            Self::AuthFailure => "auth_failure",
            Self::Timeout => "timeout",
            Self::Other => "other",
        }
    }
}

impl fmt::Display for LoadErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed load attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} while loading '{identifier}': {message}")]
pub struct LoadError {
    pub kind: LoadErrorKind,
    pub identifier: String,
    pub message: String,
}

impl LoadError {
    pub fn new(kind: LoadErrorKind, identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            identifier: identifier.into(),
            message: message.into(),
        }
    }

    pub fn missing_artifact(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LoadErrorKind::MissingArtifact, identifier, message)
    }

    pub fn auth_failure(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LoadErrorKind::AuthFailure, identifier, message)
    }

    pub fn other(identifier: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(LoadErrorKind::Other, identifier, message)
    }
}
