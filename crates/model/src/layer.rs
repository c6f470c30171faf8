//! Dense layer with floating-point parameters

use mifq_fixed_point::Scale;

use crate::error::{ModelError, Result};

/// One dense layer: `y = x · W + b`
#[derive(Debug, Clone, PartialEq)]
pub struct FloatLayer {
    /// Layer name, used as the metadata key and artifact file prefix
    pub name: String,
    /// Weight matrix (rows × cols), row-major
    pub weight: Vec<f32>,
    /// Input dimension
    pub rows: usize,
    /// Output dimension
    pub cols: usize,
    /// Bias vector (cols)
    pub bias: Vec<f32>,
}

impl FloatLayer {
    /// Create from a row-major `rows × cols` weight matrix and a bias of length `cols`
    pub fn new(
        name: impl Into<String>,
        weight: Vec<f32>,
        rows: usize,
        cols: usize,
        bias: Vec<f32>,
    ) -> Result<Self> {
        if weight.len() != rows * cols {
            return Err(ModelError::InvalidShape {
                expected: vec![rows, cols],
                got: vec![weight.len()],
            });
        }
        if bias.len() != cols {
            return Err(ModelError::InvalidShape {
                expected: vec![cols],
                got: vec![bias.len()],
            });
        }
        Ok(Self {
            name: name.into(),
            weight,
            rows,
            cols,
            bias,
        })
    }

    /// Create from an `out × in` matrix (PyTorch layout), transposing to `in × out`
    pub fn from_output_major(
        name: impl Into<String>,
        weight: &[f32],
        out_features: usize,
        in_features: usize,
        bias: Vec<f32>,
    ) -> Result<Self> {
        if weight.len() != out_features * in_features {
            return Err(ModelError::InvalidShape {
                expected: vec![out_features, in_features],
                got: vec![weight.len()],
            });
        }
        let mut transposed = vec![0.0f32; in_features * out_features];
        for o in 0..out_features {
            for i in 0..in_features {
                transposed[i * out_features + o] = weight[o * in_features + i];
            }
        }
        Self::new(name, transposed, in_features, out_features, bias)
    }

    /// Weight at (input i, output j)
    pub fn weight_at(&self, i: usize, j: usize) -> f32 {
        self.weight[i * self.cols + j]
    }

    /// Largest magnitude over weights and bias together
    pub fn max_abs(&self) -> f32 {
        self.weight
            .iter()
            .chain(&self.bias)
            .fold(0.0f32, |m, v| m.max(v.abs()))
    }

    /// The scale shared by this layer's weights and bias
    pub fn scale(&self) -> Result<Scale> {
        Ok(Scale::shared([&self.weight[..], &self.bias[..]])?)
    }

    /// Multiply every weight (not the bias) by `gain`
    pub fn with_weight_gain(mut self, gain: f32) -> Self {
        for w in &mut self.weight {
            *w *= gain;
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shape_validation() {
        assert!(matches!(
            FloatLayer::new("fc", vec![0.0; 5], 2, 2, vec![0.0; 2]),
            Err(ModelError::InvalidShape { .. })
        ));
        assert!(matches!(
            FloatLayer::new("fc", vec![0.0; 4], 2, 2, vec![0.0; 3]),
            Err(ModelError::InvalidShape { .. })
        ));
    }

    #[test]
    fn test_output_major_transpose() {
        // out=3, in=2: rows are outputs
        let w = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let layer = FloatLayer::from_output_major("fc", &w, 3, 2, vec![0.0; 3]).unwrap();
        assert_eq!((layer.rows, layer.cols), (2, 3));
        assert_eq!(layer.weight_at(0, 0), 1.0);
        assert_eq!(layer.weight_at(1, 0), 2.0);
        assert_eq!(layer.weight_at(0, 2), 5.0);
        assert_eq!(layer.weight_at(1, 2), 6.0);
    }

    #[test]
    fn test_scale_covers_bias() {
        let layer =
            FloatLayer::new("fc", vec![1.0, -2.0, 0.5, 0.5], 2, 2, vec![0.25, -4.0]).unwrap();
        assert_eq!(layer.max_abs(), 4.0);
        assert_eq!(layer.scale().unwrap().get(), 8191.75);
    }

    #[test]
    fn test_weight_gain_leaves_bias() {
        let layer = FloatLayer::new("fc", vec![1.0, 2.0], 1, 2, vec![0.5, 0.5])
            .unwrap()
            .with_weight_gain(255.0);
        assert_eq!(layer.weight, vec![255.0, 510.0]);
        assert_eq!(layer.bias, vec![0.5, 0.5]);
    }
}
