//! mifq Model Quantization
//!
//! Loads dense layers with floating-point weights, converts each layer to
//! 16-bit fixed point under one shared scale, writes the MIF artifacts and
//! the metadata index that every downstream consumer reads.

mod error;
mod inspect;
mod layer;
mod loader;
mod metadata;
mod quantize;

pub use error::{ModelError, Result};
pub use inspect::{LayerSummary, TensorSummary};
pub use layer::FloatLayer;
pub use loader::{JsonNetwork, SafetensorsLoader, WeightLayout};
pub use metadata::{
    ArtifactSet, LayerArtifacts, MetadataIndex, MetadataRecord, ADDR_MAPPING,
    FIXED_POINT_CONTRACT, METADATA_FILE,
};
pub use quantize::{quantize_layer, QuantizationEngine, QuantizeOptions, QuantizedLayer};
