//! Property tests for the fixed-point codec
//!
//! - dequantize(quantize(v)) stays within half an integer step of v
//! - the extremal element of a scaled tensor lands on ±32767

use mifq_fixed_point::{dequantize, quantize, FixedTensor, OverflowPolicy, Scale, Q15_MAX};
use proptest::prelude::*;

proptest! {
    #[test]
    fn prop_roundtrip_within_half_step(max_abs in 1e-4f64..1e4, frac in -1.0f64..=1.0) {
        let scale = Scale::from_max_abs(max_abs).unwrap();
        let v = max_abs * frac;
        let back = dequantize(quantize(v, scale), scale);
        let bound = 0.5 / scale.get();
        prop_assert!((back - v).abs() <= bound * (1.0 + 1e-9),
            "v={} back={} bound={}", v, back, bound);
    }

    #[test]
    fn prop_extremal_element_saturates_range(
        values in prop::collection::vec(-100.0f32..100.0, 1..64),
    ) {
        prop_assume!(values.iter().any(|v| *v != 0.0));
        let scale = Scale::shared([&values[..]]).unwrap();
        let (t, overflows) = FixedTensor::quantize(&values, scale, OverflowPolicy::Wrap);
        prop_assert_eq!(overflows, 0);
        prop_assert_eq!(t.max_abs(), Q15_MAX);
    }
}
