//! MIF error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum MifError {
    #[error("DEPTH mismatch: header declares {declared}, found {actual} content lines")]
    DepthMismatch { declared: usize, actual: usize },

    #[error("Missing DEPTH declaration")]
    MissingDepth,

    #[error("Unsupported WIDTH: {0} (only 16 is supported)")]
    UnsupportedWidth(u32),

    #[error("Line {line}: value 0x{value} does not fit in 16 bits")]
    ValueOutOfRange { line: usize, value: String },

    #[error("Line {line}: address {got} out of order, expected {expected}")]
    AddressOutOfOrder {
        line: usize,
        expected: usize,
        got: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MifError>;
