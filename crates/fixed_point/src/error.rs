//! Fixed-point error types

use thiserror::Error;

#[derive(Error, Debug, PartialEq)]
pub enum FixedPointError {
    #[error("Invalid scale: {0} (must be finite and > 0)")]
    InvalidScale(f64),

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Non-finite input value {value} at position {position}")]
    NonFinite { value: f64, position: usize },
}

pub type Result<T> = std::result::Result<T, FixedPointError>;
