//! Fixed-point tensors and the Q1.15 accumulation contract

use crate::error::{FixedPointError, Result};
use crate::fixed::{from_bits, quantize_with, to_bits, OverflowPolicy, Scale, Q15_SHIFT};

/// A flat tensor of 16-bit fixed-point values with a common scale
#[derive(Debug, Clone, PartialEq)]
pub struct FixedTensor {
    /// Signed 16-bit values, row-major
    pub data: Vec<i16>,
    /// Common scale factor for all elements
    pub scale: Scale,
}

impl FixedTensor {
    /// Create a tensor from already quantized data
    pub fn from_raw(data: Vec<i16>, scale: Scale) -> Self {
        Self { data, scale }
    }

    /// Quantize floating-point values. Returns the tensor and how many
    /// elements fell outside the 16-bit range before narrowing.
    pub fn quantize(values: &[f32], scale: Scale, policy: OverflowPolicy) -> (Self, usize) {
        let mut overflows = 0;
        let data = values
            .iter()
            .map(|&v| {
                let q = quantize_with(f64::from(v), scale, policy);
                if q.overflowed {
                    overflows += 1;
                }
                q.value
            })
            .collect();
        (Self { data, scale }, overflows)
    }

    /// Rebuild from raw words as they appear in a memory image
    pub fn from_bits(words: &[u16], scale: Scale) -> Self {
        Self {
            data: words.iter().map(|&w| from_bits(w)).collect(),
            scale,
        }
    }

    /// Unsigned bit patterns, in order
    pub fn to_bits(&self) -> Vec<u16> {
        self.data.iter().map(|&v| to_bits(v)).collect()
    }


    /// Get the length of the tensor
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the tensor is empty
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Largest magnitude, widened so that -32768 is representable
    pub fn max_abs(&self) -> i32 {
        self.data
            .iter()
            .map(|&x| i32::from(x).abs())
            .max()
            .unwrap_or(0)
    }

    /// (min, max) of the signed values
    pub fn range(&self) -> Option<(i16, i16)> {
        let min = *self.data.iter().min()?;
        let max = *self.data.iter().max()?;
        Some((min, max))
    }
}

/// Dot product of two Q1.15 operands: products accumulated in 64 bits, then
/// arithmetic shift right by 15.
pub fn dot_q15(a: &[i16], b: &[i16]) -> Result<i64> {
    if a.len() != b.len() {
        return Err(FixedPointError::DimensionMismatch {
            expected: a.len(),
            got: b.len(),
        });
    }
    let sum: i64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| i64::from(x) * i64::from(y))
        .sum();
    Ok(sum >> Q15_SHIFT)
}

/// `y = (x · W) >> 15 + b` for a row-major `in_dim × out_dim` weight matrix.
///
/// Results are left wide; narrowing is up to the caller.
pub fn linear_q15(x: &[i16], w: &[i16], b: &[i16], out_dim: usize) -> Result<Vec<i64>> {
    let in_dim = x.len();
    if w.len() != in_dim * out_dim {
        return Err(FixedPointError::DimensionMismatch {
            expected: in_dim * out_dim,
            got: w.len(),
        });
    }
    if b.len() != out_dim {
        return Err(FixedPointError::DimensionMismatch {
            expected: out_dim,
            got: b.len(),
        });
    }

    let mut acc = vec![0i64; out_dim];
    for (i, &xi) in x.iter().enumerate() {
        let xi = i64::from(xi);
        let row = &w[i * out_dim..(i + 1) * out_dim];
        for (a, &wij) in acc.iter_mut().zip(row) {
            *a += xi * i64::from(wij);
        }
    }

    Ok(acc
        .into_iter()
        .zip(b)
        .map(|(a, &bj)| (a >> Q15_SHIFT) + i64::from(bj))
        .collect())
}
