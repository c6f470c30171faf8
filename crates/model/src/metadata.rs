//! Metadata index: layer name → shape, scale and artifact names
//!
//! On-disk form is a JSON object keyed by layer name, in network order:
//!
//! ```json
//! {
//!   "fc0": {
//!     "layer_index": 0,
//!     "W_shape": [784, 64],
//!     "b_shape": [64],
//!     "scale": 8191.75,
//!     "W_mif": "fc0_W.mif",
//!     "b_mif": "fc0_b.mif",
//!     "addr_mapping": "row_major: addr = i * H + j (i=0..r-1, j=0..c-1)",
//!     "fixed_point": "Q1.15: products accumulated in 64-bit, >> 15, then + bias"
//!   }
//! }
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use mifq_fixed_point::{FixedTensor, Scale};

use crate::error::{ModelError, Result};

/// File name of the index inside the artifact directory
pub const METADATA_FILE: &str = "weights_meta.json";

/// Address rule for weight artifacts
pub const ADDR_MAPPING: &str = "row_major: addr = i * H + j (i=0..r-1, j=0..c-1)";

/// Arithmetic contract between the artifacts and the hardware datapath
pub const FIXED_POINT_CONTRACT: &str =
    "Q1.15: products accumulated in 64-bit, >> 15, then + bias";

fn default_fixed_point() -> String {
    FIXED_POINT_CONTRACT.to_string()
}

/// One layer's entry in the index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetadataRecord {
    /// Position of the layer in the network
    pub layer_index: usize,
    /// Weight shape (input_dim, output_dim)
    #[serde(rename = "W_shape")]
    pub w_shape: [usize; 2],
    /// Bias shape (output_dim,)
    pub b_shape: [usize; 1],
    /// Shared scale of weights and bias
    pub scale: f64,
    /// Weight artifact file name, relative to the index
    #[serde(rename = "W_mif")]
    pub w_mif: String,
    /// Bias artifact file name, relative to the index
    pub b_mif: String,
    /// Human-readable address rule
    pub addr_mapping: String,
    /// Accumulation contract; absent in indexes from older exporters
    #[serde(default = "default_fixed_point")]
    pub fixed_point: String,
}

impl MetadataRecord {
    /// Record for a layer with the standard artifact names
    pub fn new(layer_index: usize, name: &str, rows: usize, cols: usize, scale: Scale) -> Self {
        Self {
            layer_index,
            w_shape: [rows, cols],
            b_shape: [cols],
            scale: scale.get(),
            w_mif: format!("{}_W.mif", name),
            b_mif: format!("{}_b.mif", name),
            addr_mapping: ADDR_MAPPING.to_string(),
            fixed_point: FIXED_POINT_CONTRACT.to_string(),
        }
    }

    /// Number of weight words
    pub fn weight_len(&self) -> usize {
        self.w_shape[0] * self.w_shape[1]
    }

    /// Number of bias words
    pub fn bias_len(&self) -> usize {
        self.b_shape[0]
    }

    /// The scale, checked to be positive and finite
    pub fn scale(&self) -> std::result::Result<Scale, mifq_fixed_point::FixedPointError> {
        Scale::new(self.scale)
    }

    fn check(&self, layer: &str) -> Result<()> {
        if self.w_shape[1] != self.b_shape[0] {
            return Err(ModelError::InvalidRecord {
                layer: layer.to_string(),
                reason: format!(
                    "W_shape[1] = {} disagrees with b_shape[0] = {}",
                    self.w_shape[1], self.b_shape[0]
                ),
            });
        }
        self.scale().map_err(|e| ModelError::InvalidRecord {
            layer: layer.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

/// Ordered mapping from layer name to record. Order is network order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataIndex {
    entries: Vec<(String, MetadataRecord)>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a layer. Names must be unique.
    pub fn insert(&mut self, name: impl Into<String>, record: MetadataRecord) -> Result<()> {
        let name = name.into();
        if self.get(&name).is_some() {
            return Err(ModelError::DuplicateLayer(name));
        }
        self.entries.push((name, record));
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&MetadataRecord> {
        self.entries.iter().find(|(n, _)| n == name).map(|(_, r)| r)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &MetadataRecord)> {
        self.entries.iter().map(|(n, r)| (n.as_str(), r))
    }

    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Pretty JSON with two-space indentation
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write `weights_meta.json` into `dir` via a temporary file and rename
    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(METADATA_FILE);
        let tmp = dir.join(format!(".{}.tmp", METADATA_FILE));
        std::fs::write(&tmp, self.to_json()?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// Parse `weights_meta.json` from `dir` without touching the artifacts
    pub fn load(dir: &Path) -> Result<Self> {
        let path = dir.join(METADATA_FILE);
        if !path.exists() {
            return Err(ModelError::MissingIndex(path));
        }
        let content = std::fs::read_to_string(&path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Check record invariants and network order
    pub fn check_records(&self) -> Result<()> {
        if self.entries.is_empty() {
            return Err(ModelError::Config("metadata index lists no layers".to_string()));
        }
        for (position, (name, record)) in self.entries.iter().enumerate() {
            record.check(name)?;
            if record.layer_index != position {
                return Err(ModelError::InvalidRecord {
                    layer: name.clone(),
                    reason: format!(
                        "layer_index {} but listed at position {}",
                        record.layer_index, position
                    ),
                });
            }
        }
        for pair in self.entries.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if prev.1.w_shape[1] != next.1.w_shape[0] {
                tracing::warn!(
                    from = %prev.0,
                    to = %next.0,
                    out_dim = prev.1.w_shape[1],
                    in_dim = next.1.w_shape[0],
                    "consecutive layers do not chain"
                );
            }
        }
        Ok(())
    }
}

impl Serialize for MetadataIndex {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (name, record) in &self.entries {
            map.serialize_entry(name, record)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for MetadataIndex {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct IndexVisitor;

        impl<'de> Visitor<'de> for IndexVisitor {
            type Value = MetadataIndex;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of layer name to metadata record")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut index = MetadataIndex::new();
                while let Some((name, record)) = access.next_entry::<String, MetadataRecord>()? {
                    index
                        .insert(name, record)
                        .map_err(serde::de::Error::custom)?;
                }
                Ok(index)
            }
        }

        deserializer.deserialize_map(IndexVisitor)
    }
}

/// A layer's decoded artifacts
#[derive(Debug, Clone, PartialEq)]
pub struct LayerArtifacts {
    pub name: String,
    pub record: MetadataRecord,
    /// Row-major `W_shape[0] × W_shape[1]`
    pub weight: FixedTensor,
    pub bias: FixedTensor,
}

impl LayerArtifacts {
    pub fn rows(&self) -> usize {
        self.record.w_shape[0]
    }

    pub fn cols(&self) -> usize {
        self.record.w_shape[1]
    }
}

fn read_artifact(dir: &Path, layer: &str, file: &str, expected: usize) -> Result<Vec<u16>> {
    let path = dir.join(file);
    if !path.is_file() {
        return Err(ModelError::MissingArtifact {
            layer: layer.to_string(),
            path,
        });
    }
    let image = mifq_mif::read_mif(&path)?;
    if image.len() != expected {
        return Err(ModelError::ShapeMismatch {
            layer: layer.to_string(),
            artifact: file.to_string(),
            expected,
            actual: image.len(),
        });
    }
    image.verify()?;
    Ok(image.into_words())
}

/// A validated index together with every layer's decoded artifacts.
///
/// Opening fails on the first missing file, count mismatch or malformed
/// record, so holders can rely on every shape being consistent.
#[derive(Debug, Clone)]
pub struct ArtifactSet {
    pub dir: PathBuf,
    pub index: MetadataIndex,
    pub layers: Vec<LayerArtifacts>,
}

impl ArtifactSet {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        let index = MetadataIndex::load(&dir)?;
        index.check_records()?;

        let mut layers = Vec::with_capacity(index.len());
        for (name, record) in index.iter() {
            let scale = record.scale()?;
            let w = read_artifact(&dir, name, &record.w_mif, record.weight_len())?;
            let b = read_artifact(&dir, name, &record.b_mif, record.bias_len())?;
            tracing::debug!(layer = name, weights = w.len(), bias = b.len(), "artifacts ok");
            layers.push(LayerArtifacts {
                name: name.to_string(),
                record: record.clone(),
                weight: FixedTensor::from_bits(&w, scale),
                bias: FixedTensor::from_bits(&b, scale),
            });
        }

        Ok(Self { dir, index, layers })
    }

    pub fn layer(&self, name: &str) -> Option<&LayerArtifacts> {
        self.layers.iter().find(|l| l.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(index: usize, name: &str) -> MetadataRecord {
        MetadataRecord::new(index, name, 2, 2, Scale::new(8191.75).unwrap())
    }

    #[test]
    fn test_json_field_names() {
        let mut index = MetadataIndex::new();
        index.insert("fc0", record(0, "fc0")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&index.to_json().unwrap()).unwrap();
        let fc0 = &json["fc0"];
        assert_eq!(fc0["layer_index"], 0);
        assert_eq!(fc0["W_shape"], serde_json::json!([2, 2]));
        assert_eq!(fc0["b_shape"], serde_json::json!([2]));
        assert_eq!(fc0["scale"], 8191.75);
        assert_eq!(fc0["W_mif"], "fc0_W.mif");
        assert_eq!(fc0["b_mif"], "fc0_b.mif");
        assert_eq!(fc0["addr_mapping"], ADDR_MAPPING);
    }

    #[test]
    fn test_order_is_preserved() {
        let mut index = MetadataIndex::new();
        index.insert("zeta", record(0, "zeta")).unwrap();
        index.insert("alpha", record(1, "alpha")).unwrap();
        let parsed: MetadataIndex = serde_json::from_str(&index.to_json().unwrap()).unwrap();
        assert_eq!(parsed.names(), vec!["zeta", "alpha"]);
        assert_eq!(parsed, index);
    }

    #[test]
    fn test_legacy_record_without_contract_field() {
        let json = r#"{"fc0": {"layer_index": 0, "W_shape": [2, 2], "b_shape": [2],
            "scale": 2.0, "W_mif": "fc0_W.mif", "b_mif": "fc0_b.mif",
            "addr_mapping": "row_major"}}"#;
        let index: MetadataIndex = serde_json::from_str(json).unwrap();
        assert_eq!(index.get("fc0").unwrap().fixed_point, FIXED_POINT_CONTRACT);
    }

    #[test]
    fn test_duplicate_key_rejected() {
        let mut index = MetadataIndex::new();
        index.insert("fc0", record(0, "fc0")).unwrap();
        assert!(matches!(
            index.insert("fc0", record(1, "fc0")),
            Err(ModelError::DuplicateLayer(_))
        ));
    }

    #[test]
    fn test_record_invariants() {
        let mut bad = record(0, "fc0");
        bad.b_shape = [3];
        let mut index = MetadataIndex::new();
        index.insert("fc0", bad).unwrap();
        assert!(matches!(index.check_records(), Err(ModelError::InvalidRecord { .. })));

        let mut bad = record(0, "fc0");
        bad.scale = 0.0;
        let mut index = MetadataIndex::new();
        index.insert("fc0", bad).unwrap();
        assert!(matches!(index.check_records(), Err(ModelError::InvalidRecord { .. })));

        let mut index = MetadataIndex::new();
        index.insert("fc0", record(1, "fc0")).unwrap();
        assert!(matches!(index.check_records(), Err(ModelError::InvalidRecord { .. })));
    }
}
