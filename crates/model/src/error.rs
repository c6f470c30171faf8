//! Model error types

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Safetensors error: {0}")]
    Safetensors(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Missing tensor: {0}")]
    MissingTensor(String),

    #[error("Invalid tensor shape: expected {expected:?}, got {got:?}")]
    InvalidShape { expected: Vec<usize>, got: Vec<usize> },

    #[error("Invalid tensor dtype: expected {expected}, got {got}")]
    InvalidDtype { expected: String, got: String },

    #[error("Fixed-point error: {0}")]
    FixedPoint(#[from] mifq_fixed_point::FixedPointError),

    #[error("MIF error: {0}")]
    Mif(#[from] mifq_mif::MifError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Layer name {0:?} cannot be used as an artifact file prefix")]
    InvalidLayerName(String),

    #[error("Duplicate layer name: {0}")]
    DuplicateLayer(String),

    #[error("Metadata index not found: {}", .0.display())]
    MissingIndex(PathBuf),

    #[error("Layer {layer}: missing artifact {}", .path.display())]
    MissingArtifact { layer: String, path: PathBuf },

    #[error("Layer {layer}: {artifact} holds {actual} values, shape requires {expected}")]
    ShapeMismatch {
        layer: String,
        artifact: String,
        expected: usize,
        actual: usize,
    },

    #[error("Layer {layer}: invalid metadata record: {reason}")]
    InvalidRecord { layer: String, reason: String },
}

pub type Result<T> = std::result::Result<T, ModelError>;
