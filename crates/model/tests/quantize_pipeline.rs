//! Quantization → artifacts → metadata index, end to end

use mifq_fixed_point::Scale;
use mifq_model::{
    ArtifactSet, FloatLayer, LayerSummary, MetadataIndex, ModelError, QuantizationEngine,
    QuantizeOptions, METADATA_FILE,
};
use tempfile::TempDir;

fn example_network() -> Vec<FloatLayer> {
    vec![
        FloatLayer::new("fc0", vec![1.0, -2.0, 0.5, 0.5], 2, 2, vec![0.25, -4.0]).unwrap(),
        FloatLayer::new("fc1", vec![0.1, 0.2, -0.3, 0.4, 0.0, 0.6], 2, 3, vec![0.0, 0.0, 0.0])
            .unwrap(),
    ]
}

mod engine_tests {
    use super::*;

    #[test]
    fn test_example_layer_survives_mif_roundtrip() {
        let dir = TempDir::new().unwrap();
        let engine = QuantizationEngine::new(dir.path(), QuantizeOptions::default());
        let index = engine.run(&example_network()).unwrap();
        assert_eq!(index.names(), vec!["fc0", "fc1"]);

        let set = ArtifactSet::open(dir.path()).unwrap();
        let fc0 = set.layer("fc0").unwrap();
        assert_eq!(fc0.record.scale, 32767.0 / 4.0);
        assert_eq!(fc0.weight.data, vec![8192, -16384, 4096, 4096]);
        assert_eq!(fc0.bias.data, vec![2048, -32767]);
        assert_eq!(fc0.weight.scale, Scale::new(8191.75).unwrap());
    }

    #[test]
    fn test_artifact_names_and_layout() {
        let dir = TempDir::new().unwrap();
        QuantizationEngine::new(dir.path(), QuantizeOptions::default())
            .run(&example_network())
            .unwrap();
        for file in ["fc0_W.mif", "fc0_b.mif", "fc1_W.mif", "fc1_b.mif", METADATA_FILE] {
            assert!(dir.path().join(file).is_file(), "missing {}", file);
        }
        let text = std::fs::read_to_string(dir.path().join("fc1_W.mif")).unwrap();
        assert!(text.starts_with("DEPTH = 6;\nWIDTH = 16;\n"));
    }

    #[test]
    fn test_all_zero_network() {
        let dir = TempDir::new().unwrap();
        let layer = FloatLayer::new("z", vec![0.0; 4], 2, 2, vec![0.0; 2]).unwrap();
        QuantizationEngine::new(dir.path(), QuantizeOptions::default())
            .run(&[layer])
            .unwrap();
        let set = ArtifactSet::open(dir.path()).unwrap();
        assert_eq!(set.layers[0].record.scale, 1.0);
        assert!(set.layers[0].weight.data.iter().all(|&v| v == 0));
    }

    #[test]
    fn test_failed_run_leaves_no_index() {
        let dir = TempDir::new().unwrap();
        let engine = QuantizationEngine::new(dir.path(), QuantizeOptions::default());
        engine.run(&example_network()).unwrap();
        assert!(dir.path().join(METADATA_FILE).exists());

        let mut bad = example_network();
        bad[1].weight[2] = f32::NAN;
        assert!(engine.run(&bad).is_err());
        assert!(!dir.path().join(METADATA_FILE).exists());
        assert!(matches!(
            ArtifactSet::open(dir.path()),
            Err(ModelError::MissingIndex(_))
        ));
    }
}

mod validation_tests {
    use super::*;

    fn quantized_dir() -> TempDir {
        let dir = TempDir::new().unwrap();
        QuantizationEngine::new(dir.path(), QuantizeOptions::default())
            .run(&example_network())
            .unwrap();
        dir
    }

    #[test]
    fn test_truncated_artifact_is_shape_mismatch() {
        let dir = quantized_dir();
        let path = dir.path().join("fc1_W.mif");
        let text = std::fs::read_to_string(&path).unwrap();
        // Drop the last two content lines and the terminator
        let kept: Vec<&str> = text.lines().collect();
        let truncated = kept[..kept.len() - 3].join("\n");
        std::fs::write(&path, truncated).unwrap();

        match ArtifactSet::open(dir.path()) {
            Err(ModelError::ShapeMismatch {
                layer,
                expected,
                actual,
                ..
            }) => {
                assert_eq!(layer, "fc1");
                assert_eq!(expected, 6);
                assert_eq!(actual, 4);
            }
            other => panic!("expected ShapeMismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_artifact() {
        let dir = quantized_dir();
        std::fs::remove_file(dir.path().join("fc0_b.mif")).unwrap();
        assert!(matches!(
            ArtifactSet::open(dir.path()),
            Err(ModelError::MissingArtifact { layer, .. }) if layer == "fc0"
        ));
    }

    #[test]
    fn test_declared_shape_disagrees_with_artifact() {
        let dir = quantized_dir();
        let mut index = MetadataIndex::load(dir.path()).unwrap();
        let mut edited = MetadataIndex::new();
        for (name, record) in index.iter() {
            let mut record = record.clone();
            if name == "fc0" {
                record.w_shape = [3, 2];
            }
            edited.insert(name, record).unwrap();
        }
        index = edited;
        index.save(dir.path()).unwrap();

        assert!(matches!(
            ArtifactSet::open(dir.path()),
            Err(ModelError::ShapeMismatch { expected: 6, actual: 4, .. })
        ));
    }

    #[test]
    fn test_summary_after_validation() {
        let dir = quantized_dir();
        let set = ArtifactSet::open(dir.path()).unwrap();
        let summary = LayerSummary::of(&set.layers[0]);
        assert_eq!(summary.weight.signed_head, vec![8192, -16384, 4096, 4096]);
    }
}
