//! Float weight loading
//!
//! Two producers are supported: a safetensors file with `<layer>.weight` /
//! `<layer>.bias` pairs, and a small JSON document for hand-written networks.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use half::{bf16, f16};
use safetensors::SafeTensors;
use serde::{Deserialize, Serialize};

use crate::error::{ModelError, Result};
use crate::layer::FloatLayer;

/// How a 2-D weight tensor is laid out on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WeightLayout {
    /// `in × out`, as Keras stores dense kernels
    #[default]
    InputMajor,
    /// `out × in`, as PyTorch stores linear weights
    OutputMajor,
}

/// Load dense layers from a safetensors file
pub struct SafetensorsLoader {
    /// Raw safetensors data
    data: Vec<u8>,
    /// Layout of every weight tensor in the file
    layout: WeightLayout,
}

impl SafetensorsLoader {
    /// Read a whole safetensors file into memory
    pub fn from_file<P: AsRef<Path>>(path: P, layout: WeightLayout) -> Result<Self> {
        let mut file = File::open(path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        // Fail early on a malformed header
        SafeTensors::deserialize(&data).map_err(|e| ModelError::Safetensors(e.to_string()))?;

        Ok(Self { data, layout })
    }

    /// Wrap safetensors bytes already in memory
    pub fn from_bytes(data: Vec<u8>, layout: WeightLayout) -> Result<Self> {
        SafeTensors::deserialize(&data).map_err(|e| ModelError::Safetensors(e.to_string()))?;
        Ok(Self { data, layout })
    }

    fn tensors(&self) -> Result<SafeTensors<'_>> {
        SafeTensors::deserialize(&self.data).map_err(|e| ModelError::Safetensors(e.to_string()))
    }

    /// Names of the layers that have a `.weight` tensor, in lexical order
    pub fn layer_names(&self) -> Result<Vec<String>> {
        let tensors = self.tensors()?;
        let names: BTreeSet<String> = tensors
            .names()
            .into_iter()
            .filter_map(|n| n.strip_suffix(".weight").map(String::from))
            .collect();
        Ok(names.into_iter().collect())
    }

    /// Load a tensor as f32 values, with its shape
    fn load_tensor_f32(&self, name: &str) -> Result<(Vec<f32>, Vec<usize>)> {
        let tensors = self.tensors()?;
        let tensor = tensors
            .tensor(name)
            .map_err(|_| ModelError::MissingTensor(name.to_string()))?;

        let data = tensor.data();
        let values: Vec<f32> = match tensor.dtype() {
            safetensors::Dtype::F32 => data
                .chunks_exact(4)
                .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
                .collect(),
            safetensors::Dtype::BF16 => data
                .chunks_exact(2)
                .map(|b| bf16::from_bits(u16::from_le_bytes([b[0], b[1]])).to_f32())
                .collect(),
            safetensors::Dtype::F16 => data
                .chunks_exact(2)
                .map(|b| f16::from_bits(u16::from_le_bytes([b[0], b[1]])).to_f32())
                .collect(),
            other => {
                return Err(ModelError::InvalidDtype {
                    expected: "f32, bf16, or f16".to_string(),
                    got: format!("{:?}", other),
                });
            }
        };

        Ok((values, tensor.shape().to_vec()))
    }

    /// Load one dense layer: `<name>.weight` (2-D) and `<name>.bias` (1-D)
    pub fn load_layer(&self, name: &str) -> Result<FloatLayer> {
        let (weight, w_shape) = self.load_tensor_f32(&format!("{}.weight", name))?;
        let (bias, b_shape) = self.load_tensor_f32(&format!("{}.bias", name))?;

        let [a, b] = w_shape[..] else {
            return Err(ModelError::InvalidShape {
                expected: vec![0, 0],
                got: w_shape,
            });
        };
        if b_shape.len() != 1 {
            return Err(ModelError::InvalidShape {
                expected: vec![0],
                got: b_shape,
            });
        }

        match self.layout {
            WeightLayout::InputMajor => FloatLayer::new(name, weight, a, b, bias),
            WeightLayout::OutputMajor => FloatLayer::from_output_major(name, &weight, a, b, bias),
        }
    }

    /// Load layers in the given order, or every layer in lexical order
    pub fn load_network(&self, order: Option<&[String]>) -> Result<Vec<FloatLayer>> {
        let names = match order {
            Some(names) => names.to_vec(),
            None => self.layer_names()?,
        };
        if names.is_empty() {
            return Err(ModelError::Config("no dense layers found".to_string()));
        }
        names.iter().map(|n| self.load_layer(n)).collect()
    }
}

/// Hand-written network description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonNetwork {
    pub layers: Vec<JsonLayer>,
}

/// One layer of a [`JsonNetwork`]; `weight` is `in × out`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JsonLayer {
    pub name: String,
    pub weight: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
}

impl JsonNetwork {
    /// Load from a JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Convert to validated layers, in document order
    pub fn into_layers(self) -> Result<Vec<FloatLayer>> {
        self.layers
            .into_iter()
            .map(|l| {
                let rows = l.weight.len();
                let cols = l.weight.first().map_or(0, Vec::len);
                if let Some(bad) = l.weight.iter().find(|r| r.len() != cols) {
                    return Err(ModelError::InvalidShape {
                        expected: vec![rows, cols],
                        got: vec![rows, bad.len()],
                    });
                }
                let flat = l.weight.into_iter().flatten().collect();
                FloatLayer::new(l.name, flat, rows, cols, l.bias)
            })
            .collect()
    }
}
