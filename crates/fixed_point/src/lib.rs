//! mifq Fixed-Point Encoding
//!
//! Conversion between floating-point values and signed 16-bit integers under a
//! per-tensor scale factor, plus the Q1.15 multiply-accumulate contract shared
//! with the hardware datapath.

mod error;
mod fixed;
mod vector;

pub use error::{FixedPointError, Result};
pub use fixed::{
    dequantize, dequantize_bits, from_bits, quantize, quantize_with, to_bits, OverflowPolicy,
    Quantized, Scale, Q15_MAX, Q15_SHIFT,
};
pub use vector::{dot_q15, linear_q15, FixedTensor};
