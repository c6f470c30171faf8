//! Harness error types

use std::time::Duration;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Model error: {0}")]
    Model(#[from] mifq_model::ModelError),

    #[error("Fixed-point error: {0}")]
    FixedPoint(#[from] mifq_fixed_point::FixedPointError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config file error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Dataset error: {0}")]
    Dataset(String),

    #[error("Index {index} out of range for dataset of {len} items")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("`{command}` failed with status {status:?}: {stderr}")]
    ToolFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },

    #[error("`{command}` timed out after {timeout:?}")]
    Timeout { command: String, timeout: Duration },

    #[error("Could not parse prediction: {reason}")]
    ParseFailure { reason: String, output: String },

    #[error("Could not restore staged input: {0}")]
    RestoreFailed(std::io::Error),

    #[error("No response from board")]
    NoResponse,
}

impl HarnessError {
    /// Errors that must stop a sweep instead of skipping one item
    pub fn is_fatal(&self) -> bool {
        matches!(self, HarnessError::RestoreFailed(_))
    }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
