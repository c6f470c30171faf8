//! Per-layer quantization engine
//!
//! Each layer gets one scale shared by its weights and bias, is quantized to
//! 16 bits and written as two MIF files. Layers are independent and run in
//! parallel. The metadata index is written last, and only when every layer
//! succeeded.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use mifq_fixed_point::{FixedTensor, OverflowPolicy, Scale};

use crate::error::{ModelError, Result};
use crate::layer::FloatLayer;
use crate::metadata::{MetadataIndex, MetadataRecord, METADATA_FILE};

/// Knobs for a quantization run
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizeOptions {
    /// Multiplier applied to the first layer's weights before scaling.
    /// 255.0 lets the hardware consume raw 8-bit pixels instead of [0, 1] inputs.
    pub input_gain: f32,
    /// Narrowing behavior for values that do not fit in 16 bits
    pub overflow: OverflowPolicy,
}

impl Default for QuantizeOptions {
    fn default() -> Self {
        Self {
            input_gain: 1.0,
            overflow: OverflowPolicy::Wrap,
        }
    }
}

/// A layer in fixed point, ready to be written out
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedLayer {
    pub name: String,
    /// Position in the network
    pub index: usize,
    /// Quantized weights, row-major `rows × cols`
    pub weight: FixedTensor,
    /// Quantized bias, `cols`
    pub bias: FixedTensor,
    pub rows: usize,
    pub cols: usize,
    /// Values that did not fit in 16 bits before narrowing
    pub overflows: usize,
}

impl QuantizedLayer {
    /// The layer's shared scale
    pub fn scale(&self) -> Scale {
        self.weight.scale
    }

    /// The metadata record describing this layer's artifacts
    pub fn record(&self) -> MetadataRecord {
        MetadataRecord::new(self.index, &self.name, self.rows, self.cols, self.scale())
    }

    /// Write both MIF files into `dir`
    pub fn write_artifacts(&self, dir: &Path) -> Result<()> {
        let record = self.record();
        mifq_mif::write_mif(dir.join(&record.w_mif), &self.weight.to_bits())?;
        mifq_mif::write_mif(dir.join(&record.b_mif), &self.bias.to_bits())?;
        Ok(())
    }
}

/// Quantize one layer with the shared-scale rule
pub fn quantize_layer(
    index: usize,
    layer: &FloatLayer,
    policy: OverflowPolicy,
) -> Result<QuantizedLayer> {
    let scale = layer.scale()?;
    let (weight, w_over) = FixedTensor::quantize(&layer.weight, scale, policy);
    let (bias, b_over) = FixedTensor::quantize(&layer.bias, scale, policy);

    Ok(QuantizedLayer {
        name: layer.name.clone(),
        index,
        weight,
        bias,
        rows: layer.rows,
        cols: layer.cols,
        overflows: w_over + b_over,
    })
}

/// Artifact names are `<name>_W.mif` / `<name>_b.mif` inside the output
/// directory, so a name must stay a single plain path component
fn is_file_prefix(name: &str) -> bool {
    !name.is_empty()
        && !name.contains("..")
        && !name
            .chars()
            .any(|c| matches!(c, '/' | '\\' | ':' | '\0') || c.is_control())
}

/// Writes the artifacts and metadata index of a whole network into one directory
pub struct QuantizationEngine {
    out_dir: PathBuf,
    options: QuantizeOptions,
}

impl QuantizationEngine {
    pub fn new(out_dir: impl Into<PathBuf>, options: QuantizeOptions) -> Self {
        Self {
            out_dir: out_dir.into(),
            options,
        }
    }

    /// Output directory
    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    fn check_network(&self, layers: &[FloatLayer]) -> Result<()> {
        if layers.is_empty() {
            return Err(ModelError::Config("network has no layers".to_string()));
        }
        let gain = self.options.input_gain;
        if !gain.is_finite() || gain == 0.0 {
            return Err(ModelError::Config(format!("invalid input gain {}", gain)));
        }
        let mut seen = HashSet::new();
        for layer in layers {
            if !is_file_prefix(&layer.name) {
                return Err(ModelError::InvalidLayerName(layer.name.clone()));
            }
            if !seen.insert(layer.name.as_str()) {
                return Err(ModelError::DuplicateLayer(layer.name.clone()));
            }
        }
        Ok(())
    }

    /// Quantize every layer in memory, without touching the filesystem
    pub fn quantize(&self, layers: &[FloatLayer]) -> Result<Vec<QuantizedLayer>> {
        self.check_network(layers)?;
        let gain = self.options.input_gain;
        let policy = self.options.overflow;

        layers
            .par_iter()
            .enumerate()
            .map(|(index, layer)| {
                if index == 0 && gain != 1.0 {
                    let scaled = layer.clone().with_weight_gain(gain);
                    quantize_layer(index, &scaled, policy)
                } else {
                    quantize_layer(index, layer, policy)
                }
            })
            .collect()
    }

    /// Quantize, write all artifacts, then commit the metadata index.
    ///
    /// A stale index in the output directory is removed first, so a failed run
    /// leaves no index rather than one describing overwritten artifacts.
    pub fn run(&self, layers: &[FloatLayer]) -> Result<MetadataIndex> {
        self.check_network(layers)?;
        std::fs::create_dir_all(&self.out_dir)?;

        let meta_path = self.out_dir.join(METADATA_FILE);
        if meta_path.exists() {
            std::fs::remove_file(&meta_path)?;
        }

        let quantized = self.quantize(layers)?;

        quantized
            .par_iter()
            .map(|q| q.write_artifacts(&self.out_dir))
            .collect::<Result<Vec<()>>>()?;

        let mut index = MetadataIndex::new();
        for q in &quantized {
            if q.overflows > 0 {
                tracing::warn!(
                    layer = %q.name,
                    count = q.overflows,
                    policy = ?self.options.overflow,
                    "values outside the 16-bit range"
                );
            }
            tracing::info!(
                layer = %q.name,
                rows = q.rows,
                cols = q.cols,
                scale = q.scale().get(),
                "quantized layer"
            );
            index.insert(q.name.clone(), q.record())?;
        }

        index.save(&self.out_dir)?;
        tracing::info!(dir = %self.out_dir.display(), layers = index.len(), "wrote metadata index");
        Ok(index)
    }
}
