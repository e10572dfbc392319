use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T, E = RecognitionError> = std::result::Result<T, E>;

/// Failures while loading the model graph and its label table.
#[derive(Debug, Clone, Error)]
pub enum InitError {
    #[error("Asset not found: {}", .0.display())]
    MissingAsset(PathBuf),

    #[error("Malformed model graph: {0}")]
    MalformedModel(String),

    #[error("Malformed labels file: {0}")]
    MalformedLabels(String),

    #[error("Label count ({labels}) does not match model output size ({outputs})")]
    LabelCountMismatch { labels: usize, outputs: usize },

    #[error("Inference runtime unavailable: {0}")]
    Runtime(String),
}

impl InitError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MissingAsset(_) => "asset-missing",
            Self::MalformedModel(_) | Self::MalformedLabels(_) => "asset-malformed",
            Self::LabelCountMismatch { .. } => "label-count-mismatch",
            Self::Runtime(_) => "runtime-unavailable",
        }
    }
}

#[derive(Debug, Error)]
pub enum PrepError {
    #[error("Failed to read image source {reference}: {reason}")]
    Unreadable { reference: String, reason: String },

    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(#[from] base64::DecodeError),

    #[error("Unsupported image format: {0}")]
    UnsupportedFormat(String),

    #[error("Corrupt image data: {0}")]
    CorruptImage(String),

    #[error("Image has zero area ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },

    #[error("Cannot map image channels onto a {0}-channel model input")]
    ChannelMismatch(usize),

    #[error("Camera frame of {width}x{height} expects {expected} bytes, got {actual}")]
    InvalidFrame {
        width: u32,
        height: u32,
        expected: usize,
        actual: usize,
    },
}

impl PrepError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Unreadable { .. } => "reference-unreadable",
            Self::InvalidBase64(_) => "invalid-base64",
            Self::UnsupportedFormat(_) => "unsupported-format",
            Self::CorruptImage(_) => "corrupt-image",
            Self::InvalidFrame { .. } => "invalid-frame",
            Self::EmptyImage { .. } => "empty-image",
            Self::ChannelMismatch(_) => "channel-mismatch",
        }
    }
}

impl From<image::ImageError> for PrepError {
    fn from(err: image::ImageError) -> Self {
        match err {
            image::ImageError::Unsupported(e) => Self::UnsupportedFormat(e.to_string()),
            other => Self::CorruptImage(other.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum InferError {
    #[error("Tensor shape {actual:?} does not match model input {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Non-finite value in {0}")]
    NonFinite(&'static str),

    #[error("Graph execution failed: {0}")]
    Execution(String),
}

impl InferError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ShapeMismatch { .. } => "shape-mismatch",
            Self::NonFinite(_) => "non-finite",
            Self::Execution(_) => "execution-failure",
        }
    }
}

/// Everything a recognition call can report to the application shell.
#[derive(Debug, Error)]
pub enum RecognitionError {
    /// First-ever initialization, triggered lazily by a recognition call, failed.
    #[error("Model not initialized: {0}")]
    NotInitialized(#[source] InitError),

    #[error(transparent)]
    Init(#[from] InitError),

    #[error(transparent)]
    Prep(#[from] PrepError),

    #[error(transparent)]
    Infer(#[from] InferError),

    #[error("Worker failure: {0}")]
    Worker(String),
}

impl RecognitionError {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotInitialized(_) => "not-initialized",
            Self::Init(e) => e.kind(),
            Self::Prep(e) => e.kind(),
            Self::Infer(e) => e.kind(),
            Self::Worker(_) => "worker-failure",
        }
    }

    pub fn stage(&self) -> &'static str {
        match self {
            Self::NotInitialized(_) | Self::Init(_) => "init",
            Self::Prep(_) => "prepare",
            Self::Infer(_) => "infer",
            Self::Worker(_) => "worker",
        }
    }
}

impl Serialize for RecognitionError {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("RecognitionError", 3)?;
        state.serialize_field("stage", self.stage())?;
        state.serialize_field("kind", self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}
