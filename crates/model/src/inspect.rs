//! Human-readable summaries of decoded artifacts

use std::fmt;

use mifq_fixed_point::{dequantize, dequantize_bits, to_bits, FixedTensor, Scale};

use crate::metadata::LayerArtifacts;

/// Number of leading values shown per tensor
const HEAD: usize = 8;

/// First values of a tensor in three views, plus its range
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSummary {
    pub len: usize,
    pub raw_head: Vec<u16>,
    pub signed_head: Vec<i16>,
    pub dequant_head: Vec<f64>,
    /// (min, max) of the signed values
    pub signed_range: Option<(i16, i16)>,
    pub scale: Scale,
}

impl TensorSummary {
    pub fn of(tensor: &FixedTensor) -> Self {
        let signed_head: Vec<i16> = tensor.data.iter().take(HEAD).copied().collect();
        let raw_head: Vec<u16> = signed_head.iter().map(|&v| to_bits(v)).collect();
        Self {
            len: tensor.len(),
            // Raw words go back through the signed reinterpretation, as a MIF reader sees them
            dequant_head: raw_head
                .iter()
                .map(|&w| dequantize_bits(w, tensor.scale))
                .collect(),
            raw_head,
            signed_head,
            signed_range: tensor.range(),
            scale: tensor.scale,
        }
    }
}

/// What the sanity checker prints for one layer
#[derive(Debug, Clone, PartialEq)]
pub struct LayerSummary {
    pub name: String,
    pub w_shape: [usize; 2],
    pub b_shape: [usize; 1],
    pub scale: f64,
    pub weight: TensorSummary,
    pub bias: TensorSummary,
}

impl LayerSummary {
    pub fn of(layer: &LayerArtifacts) -> Self {
        Self {
            name: layer.name.clone(),
            w_shape: layer.record.w_shape,
            b_shape: layer.record.b_shape,
            scale: layer.record.scale,
            weight: TensorSummary::of(&layer.weight),
            bias: TensorSummary::of(&layer.bias),
        }
    }
}

fn write_tensor(f: &mut fmt::Formatter<'_>, tag: &str, t: &TensorSummary) -> fmt::Result {
    let n = t.raw_head.len();
    writeln!(f, "  first {} raw uint16 {}: {:?}", n, tag, t.raw_head)?;
    writeln!(f, "  first {} as signed int16 {}: {:?}", n, tag, t.signed_head)?;
    writeln!(f, "  first {} dequantized float {}: {:?}", n, tag, t.dequant_head)?;
    if let Some((lo, hi)) = t.signed_range {
        writeln!(f, "  {} signed range: {} {}", tag, lo, hi)?;
        writeln!(
            f,
            "  {} dequantized range: {} {}",
            tag,
            dequantize(lo, t.scale),
            dequantize(hi, t.scale)
        )?;
    }
    Ok(())
}

impl fmt::Display for LayerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Layer: {}", self.name)?;
        writeln!(f, "  W_shape: {:?}  b_shape: {:?}", self.w_shape, self.b_shape)?;
        writeln!(f, "  scale: {}", self.scale)?;
        writeln!(
            f,
            "  W entries: {} (expected {})  b entries: {} (expected {})",
            self.weight.len,
            self.w_shape[0] * self.w_shape[1],
            self.bias.len,
            self.b_shape[0]
        )?;
        write_tensor(f, "W", &self.weight)?;
        write_tensor(f, "b", &self.bias)
    }
}
