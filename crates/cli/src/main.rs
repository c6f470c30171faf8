//! mifq command-line tool
//!
//! # Usage
//!
//! ```bash
//! # Quantize a trained network into MIF files plus weights_meta.json
//! mifq quantize --weights mnist_mlp.safetensors --out-dir mif_weights
//!
//! # Print what the artifacts decode to
//! mifq check --dir mif_weights
//!
//! # Stage one test image for a manual simulator run
//! mifq stage --index 42
//!
//! # Compare the simulator with the labels over the first 100 images
//! mifq sweep 0 99 --config harness.toml
//! ```

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};

use mifq_fixed_point::OverflowPolicy;
use mifq_harness::{
    stage, BoardLink, CancelToken, FixedPointReference, HarnessConfig, IdxDataset,
    PredictionParser, ReferenceBackend, SimulatorBackend, StagingArea, Sweep, SweepRange,
};
use mifq_model::{
    ArtifactSet, JsonNetwork, LayerSummary, QuantizationEngine, QuantizeOptions,
    SafetensorsLoader, WeightLayout,
};

#[derive(Parser)]
#[command(name = "mifq")]
#[command(version)]
#[command(about = "Fixed-point MIF export and differential verification for dense networks")]
struct Cli {
    /// Harness configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Layout {
    /// in × out (Keras)
    InputMajor,
    /// out × in (PyTorch)
    OutputMajor,
}

#[derive(Clone, Copy, ValueEnum)]
enum BackendKind {
    Simulator,
    Reference,
}

#[derive(Subcommand)]
enum Commands {
    /// Quantize float weights into MIF files and a metadata index
    Quantize {
        /// Weights file (.safetensors or .json)
        #[arg(short, long)]
        weights: PathBuf,

        /// Output directory
        #[arg(short, long, default_value = "mif_weights")]
        out_dir: PathBuf,

        /// Layer order, comma separated (default: lexical order of names)
        #[arg(long, value_delimiter = ',')]
        layers: Option<Vec<String>>,

        /// Weight layout in a safetensors file
        #[arg(long, value_enum, default_value = "input-major")]
        layout: Layout,

        /// Multiplier folded into the first layer (255 for raw 8-bit pixels)
        #[arg(long, default_value = "1.0")]
        input_gain: f32,

        /// Clamp out-of-range values instead of wrapping
        #[arg(long)]
        saturate: bool,
    },

    /// Validate artifacts against the index and print what they decode to
    Check {
        /// Artifact directory
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Write one dataset image as the simulator's staged input
    Stage {
        /// Dataset index
        #[arg(short, long)]
        index: usize,

        /// Destination (default: configured staged input)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Classify one dataset image with the fixed-point reference
    Infer {
        /// Dataset index
        #[arg(short, long)]
        index: usize,

        /// Artifact directory
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Run a model over a range of images and report accuracy
    Sweep {
        /// First index (inclusive)
        start: Option<usize>,

        /// Last index (inclusive)
        end: Option<usize>,

        /// What produces predictions
        #[arg(short, long, value_enum, default_value = "simulator")]
        backend: BackendKind,

        /// Per-item timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Simulator working directory
        #[arg(long)]
        work_dir: Option<PathBuf>,

        /// Skip the build step
        #[arg(long)]
        no_build: bool,

        /// Artifact directory (reference backend)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },

    /// Send one image to a board and print its answer
    Send {
        /// Serial device
        #[arg(short, long)]
        port: PathBuf,

        /// Dataset index
        #[arg(short, long)]
        index: usize,
    },
}

fn init_logging(verbose: bool) {
    // Target prefix `mifq` covers the binary and every mifq_* library
    let default = if verbose { "mifq=debug" } else { "mifq=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<&Path>) -> Result<HarnessConfig> {
    let config = match path {
        Some(path) => HarnessConfig::from_file(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => HarnessConfig::default(),
    };
    Ok(config.with_env()?)
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let mut config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Quantize {
            weights,
            out_dir,
            layers,
            layout,
            input_gain,
            saturate,
        } => {
            let options = QuantizeOptions {
                input_gain,
                overflow: if saturate {
                    OverflowPolicy::Saturate
                } else {
                    OverflowPolicy::Wrap
                },
            };
            run_quantize(&weights, &out_dir, layers.as_deref(), layout, options)?;
        }
        Commands::Check { dir } => {
            run_check(&dir.unwrap_or(config.artifacts_dir))?;
        }
        Commands::Stage { index, out } => {
            let out = out.unwrap_or_else(|| config.staged_path());
            run_stage(&config, index, &out)?;
        }
        Commands::Infer { index, dir } => {
            if let Some(dir) = dir {
                config.artifacts_dir = dir;
            }
            run_infer(&config, index)?;
        }
        Commands::Sweep {
            start,
            end,
            backend,
            timeout,
            work_dir,
            no_build,
            dir,
        } => {
            if let Some(start) = start {
                config.start_index = start;
            }
            if let Some(end) = end {
                config.end_index = end;
            }
            if let Some(timeout) = timeout {
                config.timeout_secs = timeout;
            }
            if let Some(dir) = work_dir {
                config.work_dir = dir;
            }
            if no_build {
                config.build_command.clear();
            }
            if let Some(dir) = dir {
                config.artifacts_dir = dir;
            }
            run_sweep(&config, backend)?;
        }
        Commands::Send { port, index } => {
            run_send(&config, &port, index)?;
        }
    }

    Ok(())
}

fn run_quantize(
    weights: &Path,
    out_dir: &Path,
    order: Option<&[String]>,
    layout: Layout,
    options: QuantizeOptions,
) -> Result<()> {
    let layers = if weights.extension().is_some_and(|e| e == "json") {
        if order.is_some() {
            tracing::warn!("--layers is ignored for JSON networks; document order is used");
        }
        JsonNetwork::from_file(weights)?.into_layers()?
    } else {
        let layout = match layout {
            Layout::InputMajor => WeightLayout::InputMajor,
            Layout::OutputMajor => WeightLayout::OutputMajor,
        };
        SafetensorsLoader::from_file(weights, layout)
            .with_context(|| format!("loading {}", weights.display()))?
            .load_network(order)?
    };

    let index = QuantizationEngine::new(out_dir, options).run(&layers)?;
    for (name, record) in index.iter() {
        println!(
            "{}: W {:?} -> {}, b {:?} -> {}, scale {}",
            name, record.w_shape, record.w_mif, record.b_shape, record.b_mif, record.scale
        );
    }
    println!("Wrote {} layers to {}", index.len(), out_dir.display());
    Ok(())
}

fn run_check(dir: &Path) -> Result<()> {
    let set = ArtifactSet::open(dir)
        .with_context(|| format!("validating artifacts in {}", dir.display()))?;
    for layer in &set.layers {
        println!("{}", LayerSummary::of(layer));
    }
    println!("{} layers OK", set.layers.len());
    Ok(())
}

fn open_dataset(config: &HarnessConfig) -> Result<IdxDataset> {
    IdxDataset::open(&config.images, &config.labels).with_context(|| {
        format!(
            "reading dataset {} / {}",
            config.images.display(),
            config.labels.display()
        )
    })
}

fn run_stage(config: &HarnessConfig, index: usize, out: &Path) -> Result<()> {
    let dataset = open_dataset(config)?;
    let staged = stage(&dataset, index)?;
    std::fs::write(out, &staged.contents)
        .with_context(|| format!("writing {}", out.display()))?;
    println!("Wrote image {} to {}", index, out.display());
    println!("The correct label for this image is: {}", staged.label);
    Ok(())
}

fn run_infer(config: &HarnessConfig, index: usize) -> Result<()> {
    let dataset = open_dataset(config)?;
    let model = FixedPointReference::from_dir(&config.artifacts_dir)?;
    let staged = stage(&dataset, index)?;
    let logits = model.forward(&staged.pixels)?;
    let predicted = model.predict(&staged.pixels)?;
    tracing::debug!(?logits, "reference outputs");
    println!("Correct label: {}", staged.label);
    println!("Predicted digit: {}", predicted);
    Ok(())
}

fn run_sweep(config: &HarnessConfig, kind: BackendKind) -> Result<()> {
    config.validate()?;
    let dataset = open_dataset(config)?;
    let range = SweepRange::new(config.start_index, config.end_index)?;

    let cancel = CancelToken::new();
    let handler_token = cancel.clone();
    ctrlc::set_handler(move || {
        eprintln!("Interrupted; finishing the current item");
        handler_token.cancel();
    })
    .context("installing Ctrl-C handler")?;

    let sweep = Sweep::new(&dataset).report_every(config.report_every);
    let mut stdout = std::io::stdout().lock();
    let report = match kind {
        BackendKind::Simulator => {
            let mut backend = SimulatorBackend::new(
                StagingArea::new(config.staged_path())?,
                config.simulator()?,
                config.build()?,
                PredictionParser::new(&config.prediction_marker)?,
            );
            sweep.run(range, &mut backend, &cancel, &mut stdout)?
        }
        BackendKind::Reference => {
            let model = FixedPointReference::from_dir(&config.artifacts_dir)?;
            sweep.run(range, &mut ReferenceBackend::new(model), &cancel, &mut stdout)?
        }
    };

    for item in &report.skipped {
        tracing::info!(index = item.index, reason = %item.reason, "skipped");
    }
    if report.cancelled {
        tracing::warn!(tested = report.images_tested, "sweep cancelled before the end of the range");
    }
    Ok(())
}

fn run_send(config: &HarnessConfig, port: &Path, index: usize) -> Result<()> {
    let dataset = open_dataset(config)?;
    let staged = stage(&dataset, index)?;
    let device = OpenOptions::new()
        .read(true)
        .write(true)
        .open(port)
        .with_context(|| format!("opening {}", port.display()))?;

    println!("Sending image {} (label {})", index, staged.label);
    let predicted = BoardLink::new(device).classify(&staged.pixels)?;
    println!("Predicted digit: {}", predicted);
    Ok(())
}
