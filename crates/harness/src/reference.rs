//! Fixed-point software reference
//!
//! Evaluates the quantized network with the same integer arithmetic the
//! hardware uses, so a sweep can run without a simulator and a simulator sweep
//! can be checked item by item.

use std::path::Path;

use mifq_fixed_point::{linear_q15, Q15_SHIFT};
use mifq_model::{ArtifactSet, LayerArtifacts};

use crate::error::{HarnessError, Result};
use crate::staging::StagedInput;
use crate::sweep::Backend;

/// Shift that places an 8-bit pixel in the top of a Q1.15 word
const PIXEL_SHIFT: u32 = Q15_SHIFT - 8;

/// Raw pixels as Q1.15 activations
pub fn lift_pixels(pixels: &[u8]) -> Vec<i16> {
    pixels.iter().map(|&p| i16::from(p) << PIXEL_SHIFT).collect()
}

fn saturate(v: i64) -> i16 {
    v.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16
}

/// Quantized dense network evaluated in integers
#[derive(Debug, Clone)]
pub struct FixedPointReference {
    layers: Vec<LayerArtifacts>,
}

impl FixedPointReference {
    /// Build from validated layers, in network order
    pub fn new(layers: Vec<LayerArtifacts>) -> Result<Self> {
        if layers.is_empty() {
            return Err(HarnessError::Config("network has no layers".to_string()));
        }
        for pair in layers.windows(2) {
            if pair[0].cols() != pair[1].rows() {
                return Err(HarnessError::Config(format!(
                    "layer {} produces {} values but {} expects {}",
                    pair[0].name,
                    pair[0].cols(),
                    pair[1].name,
                    pair[1].rows()
                )));
            }
        }
        Ok(Self { layers })
    }

    /// Load and validate the artifacts described by an index directory
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let set = ArtifactSet::open(dir)?;
        Self::new(set.layers)
    }

    /// Pixels the first layer expects
    pub fn input_len(&self) -> usize {
        self.layers.first().map_or(0, LayerArtifacts::rows)
    }

    /// Output activations of the last layer
    pub fn forward(&self, pixels: &[u8]) -> Result<Vec<i16>> {
        let mut x = lift_pixels(pixels);
        let last = self.layers.len() - 1;
        for (i, layer) in self.layers.iter().enumerate() {
            let y = linear_q15(&x, &layer.weight.data, &layer.bias.data, layer.cols())?;
            x = y
                .into_iter()
                .map(|v| {
                    let v = saturate(v);
                    if i < last {
                        v.max(0)
                    } else {
                        v
                    }
                })
                .collect();
        }
        Ok(x)
    }

    /// Index of the largest output; ties go to the lowest index
    pub fn predict(&self, pixels: &[u8]) -> Result<u8> {
        let out = self.forward(pixels)?;
        let mut best = 0;
        for (i, &v) in out.iter().enumerate() {
            if v > out[best] {
                best = i;
            }
        }
        u8::try_from(best).map_err(|_| HarnessError::Config(format!("class {} exceeds 255", best)))
    }
}

/// Sweep backend backed by [`FixedPointReference`]
pub struct ReferenceBackend {
    model: FixedPointReference,
}

impl ReferenceBackend {
    pub fn new(model: FixedPointReference) -> Self {
        Self { model }
    }
}

impl Backend for ReferenceBackend {
    fn name(&self) -> &str {
        "reference"
    }

    fn predict(&mut self, input: &StagedInput) -> Result<u8> {
        self.model.predict(&input.pixels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mifq_fixed_point::{FixedTensor, Scale};
    use mifq_model::MetadataRecord;

    fn layer(
        index: usize,
        name: &str,
        rows: usize,
        cols: usize,
        w: Vec<i16>,
        b: Vec<i16>,
    ) -> LayerArtifacts {
        LayerArtifacts {
            name: name.to_string(),
            record: MetadataRecord::new(index, name, rows, cols, Scale::UNIT),
            weight: FixedTensor::from_raw(w, Scale::UNIT),
            bias: FixedTensor::from_raw(b, Scale::UNIT),
        }
    }

    #[test]
    fn test_lift_pixels() {
        assert_eq!(lift_pixels(&[0, 1, 255]), vec![0, 128, 32640]);
    }

    #[test]
    fn test_single_layer() {
        let model = FixedPointReference::new(vec![layer(
            0,
            "fc0",
            2,
            3,
            vec![16384, 0, -16384, 0, 0, 0],
            vec![0, 100, 0],
        )])
        .unwrap();
        assert_eq!(model.input_len(), 2);
        assert_eq!(model.forward(&[255, 0]).unwrap(), vec![16320, 100, -16320]);
        assert_eq!(model.predict(&[255, 0]).unwrap(), 0);
    }

    #[test]
    fn test_hidden_relu_and_saturation() {
        // Hidden unit 0 goes negative and is clamped to zero by ReLU
        let fc0 = layer(0, "fc0", 1, 2, vec![-32767, 32767], vec![0, 0]);
        // Output 1 overflows i16 and saturates
        let fc1 = layer(1, "fc1", 2, 2, vec![32767, 0, 0, 32767], vec![0, 32767]);
        let model = FixedPointReference::new(vec![fc0, fc1]).unwrap();
        let out = model.forward(&[255]).unwrap();
        assert_eq!(out[0], 0);
        assert_eq!(out[1], i16::MAX);
        assert_eq!(model.predict(&[255]).unwrap(), 1);
    }

    #[test]
    fn test_tie_goes_to_first() {
        let model =
            FixedPointReference::new(vec![layer(0, "fc0", 1, 3, vec![0, 0, 0], vec![5, 9, 9])])
                .unwrap();
        assert_eq!(model.predict(&[0]).unwrap(), 1);
    }

    #[test]
    fn test_broken_chain_rejected() {
        let fc0 = layer(0, "fc0", 1, 2, vec![0, 0], vec![0, 0]);
        let fc1 = layer(1, "fc1", 3, 1, vec![0, 0, 0], vec![0]);
        assert!(FixedPointReference::new(vec![fc0, fc1]).is_err());
        assert!(FixedPointReference::new(vec![]).is_err());
    }

    #[test]
    fn test_wrong_input_length() {
        let model =
            FixedPointReference::new(vec![layer(0, "fc0", 2, 1, vec![1, 1], vec![0])]).unwrap();
        assert!(matches!(model.forward(&[1, 2, 3]), Err(HarnessError::FixedPoint(_))));
    }
}
