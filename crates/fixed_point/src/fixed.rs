//! Scalar fixed-point codec

use serde::{Deserialize, Serialize};

use crate::error::{FixedPointError, Result};

/// Largest positive 16-bit fixed-point magnitude; the extremal element of a
/// layer maps onto it.
pub const Q15_MAX: i32 = 32767;

/// Fractional bits of a Q1.15 word. Accumulators are shifted right by this
/// amount after the multiply stage.
pub const Q15_SHIFT: u32 = 15;

/// Per-tensor multiplier from floating-point magnitude to integer units.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scale(f64);

impl Scale {
    /// Scale used for an all-zero layer.
    pub const UNIT: Scale = Scale(1.0);

    /// Wrap an existing multiplier
    pub fn new(value: f64) -> Result<Self> {
        if !value.is_finite() || value <= 0.0 {
            return Err(FixedPointError::InvalidScale(value));
        }
        Ok(Self(value))
    }

    /// Scale that maps `max_abs` onto [`Q15_MAX`]. A zero maximum yields
    /// [`Scale::UNIT`].
    pub fn from_max_abs(max_abs: f64) -> Result<Self> {
        if max_abs == 0.0 {
            return Ok(Self::UNIT);
        }
        Self::new(Q15_MAX as f64 / max_abs.abs())
    }

    /// Shared scale over every element of every tensor given.
    ///
    /// Weights and bias of one layer go through here together so both end up
    /// on the same integer scale.
    pub fn shared<'a, I>(tensors: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a [f32]>,
    {
        let mut max_abs = 0.0f64;
        let mut position = 0usize;
        for tensor in tensors {
            for &v in tensor {
                let v = f64::from(v);
                if !v.is_finite() {
                    return Err(FixedPointError::NonFinite { value: v, position });
                }
                max_abs = max_abs.max(v.abs());
                position += 1;
            }
        }
        Self::from_max_abs(max_abs)
    }

    /// The raw multiplier
    pub fn get(self) -> f64 {
        self.0
    }
}

impl Default for Scale {
    fn default() -> Self {
        Self::UNIT
    }
}

impl std::fmt::Display for Scale {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What to do with a rounded value outside the signed 16-bit range
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Keep the low 16 bits (two's-complement cast), as the hardware reads raw words
    #[default]
    Wrap,
    /// Clamp to [-32768, 32767]
    Saturate,
}

/// Result of quantizing one value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quantized {
    pub value: i16,
    /// The rounded value did not fit in 16 bits
    pub overflowed: bool,
}

/// Quantize with an explicit overflow policy.
///
/// Rounds half away from zero, then narrows to 16 bits.
pub fn quantize_with(value: f64, scale: Scale, policy: OverflowPolicy) -> Quantized {
    let rounded = (value * scale.get()).round();
    let overflowed = rounded > i16::MAX as f64 || rounded < i16::MIN as f64;
    let value = match policy {
        OverflowPolicy::Wrap => (rounded as i64) as i16,
        OverflowPolicy::Saturate => rounded.clamp(i16::MIN as f64, i16::MAX as f64) as i16,
    };
    Quantized { value, overflowed }
}

/// `round(value * scale)` as a two's-complement 16-bit integer
pub fn quantize(value: f64, scale: Scale) -> i16 {
    quantize_with(value, scale, OverflowPolicy::Wrap).value
}

/// `value / scale`
pub fn dequantize(value: i16, scale: Scale) -> f64 {
    f64::from(value) / scale.get()
}

/// Reinterpret a raw 16-bit word (as read back from a MIF) as signed.
pub fn from_bits(raw: u16) -> i16 {
    raw as i16
}

/// The unsigned bit pattern of a signed word
pub fn to_bits(value: i16) -> u16 {
    value as u16
}

/// Dequantize a raw word. Always goes through the signed reinterpretation;
/// there is deliberately no unsigned path.
pub fn dequantize_bits(raw: u16, scale: Scale) -> f64 {
    dequantize(from_bits(raw), scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scale_from_max_abs() {
        let scale = Scale::from_max_abs(4.0).unwrap();
        assert_eq!(scale.get(), 8191.75);
    }

    #[test]
    fn test_zero_layer_uses_unit_scale() {
        let w = [0.0f32; 4];
        let b = [0.0f32; 2];
        let scale = Scale::shared([&w[..], &b[..]]).unwrap();
        assert_eq!(scale, Scale::UNIT);
        assert_eq!(quantize(0.0, scale), 0);
    }

    #[test]
    fn test_shared_scale_spans_both_tensors() {
        let w = [1.0f32, -2.0, 0.5, 0.5];
        let b = [0.25f32, -4.0];
        let scale = Scale::shared([&w[..], &b[..]]).unwrap();
        assert_eq!(scale.get(), 32767.0 / 4.0);
    }

    #[test]
    fn test_invalid_scale() {
        assert!(matches!(Scale::new(0.0), Err(FixedPointError::InvalidScale(_))));
        assert!(matches!(Scale::new(-1.0), Err(FixedPointError::InvalidScale(_))));
        assert!(matches!(Scale::new(f64::NAN), Err(FixedPointError::InvalidScale(_))));
    }

    #[test]
    fn test_non_finite_input_rejected() {
        let w = [1.0f32, f32::INFINITY];
        assert!(matches!(
            Scale::shared([&w[..]]),
            Err(FixedPointError::NonFinite { position: 1, .. })
        ));
    }

    #[test]
    fn test_round_half_away_from_zero() {
        let scale = Scale::UNIT;
        assert_eq!(quantize(2.5, scale), 3);
        assert_eq!(quantize(-2.5, scale), -3);
        assert_eq!(quantize(-16383.5, scale), -16384);
    }

    #[test]
    fn test_wrap_vs_saturate() {
        let scale = Scale::UNIT;
        let wrapped = quantize_with(32768.0, scale, OverflowPolicy::Wrap);
        assert!(wrapped.overflowed);
        assert_eq!(wrapped.value, -32768);

        let saturated = quantize_with(32768.0, scale, OverflowPolicy::Saturate);
        assert!(saturated.overflowed);
        assert_eq!(saturated.value, 32767);

        let in_range = quantize_with(-32768.0, scale, OverflowPolicy::Wrap);
        assert!(!in_range.overflowed);
        assert_eq!(in_range.value, -32768);
    }

    #[test]
    fn test_bits_reinterpretation() {
        assert_eq!(from_bits(0xFFFF), -1);
        assert_eq!(from_bits(0x8001), -32767);
        assert_eq!(to_bits(-16384), 0xC000);
        let scale = Scale::from_max_abs(4.0).unwrap();
        assert!((dequantize_bits(0x8001, scale) + 4.0).abs() < 1e-9);
    }
}
