//! Harness configuration
//!
//! Defaults, then an optional TOML file, then `MIFQ_*` environment variables.
//! Command-line flags are applied on top by the binary.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};
use crate::simulator::{ToolCommand, DEFAULT_MARKER};
use crate::sweep::SweepRange;

/// Harness configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HarnessConfig {
    /// Directory the simulator runs in
    pub work_dir: PathBuf,

    /// Staged input file, relative to `work_dir`
    pub staged_input: PathBuf,

    /// Run once before a sweep. Empty disables the build step.
    pub build_command: Vec<String>,

    /// Run once per item
    pub simulator_command: Vec<String>,

    /// Text that precedes the predicted class in simulator output
    pub prediction_marker: String,

    /// Per-item wall-clock limit, in seconds
    pub timeout_secs: u64,

    /// First item of the sweep (inclusive)
    pub start_index: usize,

    /// Last item of the sweep (inclusive)
    pub end_index: usize,

    /// Print the running accuracy every this many items
    pub report_every: usize,

    /// IDX image file
    pub images: PathBuf,

    /// IDX label file
    pub labels: PathBuf,

    /// Directory holding MIF artifacts and the metadata index
    pub artifacts_dir: PathBuf,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("."),
            staged_input: PathBuf::from("image.hex"),
            build_command: ["iverilog", "-o", "mnist_mlp_tb", "mnist_mlp.v", "mnist_mlp_tb.v"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            simulator_command: vec!["vvp".to_string(), "mnist_mlp_tb".to_string()],
            prediction_marker: DEFAULT_MARKER.to_string(),
            timeout_secs: 60,
            start_index: 0,
            end_index: 9999,
            report_every: 10,
            images: PathBuf::from("t10k-images-idx3-ubyte"),
            labels: PathBuf::from("t10k-labels-idx1-ubyte"),
            artifacts_dir: PathBuf::from("mif_weights"),
        }
    }
}

impl HarnessConfig {
    /// Load from a TOML file; missing keys keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&content)?)
    }

    /// Defaults overlaid with the environment
    pub fn from_env() -> Result<Self> {
        Self::default().with_env()
    }

    /// Overlay `MIFQ_*` environment variables
    pub fn with_env(mut self) -> Result<Self> {
        if let Ok(dir) = std::env::var("MIFQ_WORK_DIR") {
            self.work_dir = PathBuf::from(dir);
        }
        if let Ok(path) = std::env::var("MIFQ_STAGED_INPUT") {
            self.staged_input = PathBuf::from(path);
        }
        if let Ok(cmd) = std::env::var("MIFQ_BUILD") {
            self.build_command = split_command(&cmd);
        }
        if let Ok(cmd) = std::env::var("MIFQ_SIMULATOR") {
            self.simulator_command = split_command(&cmd);
        }
        if let Ok(marker) = std::env::var("MIFQ_MARKER") {
            self.prediction_marker = marker;
        }
        if let Ok(t) = std::env::var("MIFQ_TIMEOUT_SECS") {
            self.timeout_secs = parse_env("MIFQ_TIMEOUT_SECS", &t)?;
        }
        if let Ok(s) = std::env::var("MIFQ_START") {
            self.start_index = parse_env("MIFQ_START", &s)?;
        }
        if let Ok(e) = std::env::var("MIFQ_END") {
            self.end_index = parse_env("MIFQ_END", &e)?;
        }
        if let Ok(path) = std::env::var("MIFQ_IMAGES") {
            self.images = PathBuf::from(path);
        }
        if let Ok(path) = std::env::var("MIFQ_LABELS") {
            self.labels = PathBuf::from(path);
        }
        if let Ok(dir) = std::env::var("MIFQ_ARTIFACTS") {
            self.artifacts_dir = PathBuf::from(dir);
        }
        Ok(self)
    }

    /// Per-item timeout
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Full path of the staged input file
    pub fn staged_path(&self) -> PathBuf {
        self.work_dir.join(&self.staged_input)
    }

    /// The configured item range
    pub fn range(&self) -> Result<SweepRange> {
        SweepRange::new(self.start_index, self.end_index)
    }

    /// The per-item simulator invocation
    pub fn simulator(&self) -> Result<ToolCommand> {
        ToolCommand::new(self.simulator_command.clone(), &self.work_dir, self.timeout())
    }

    /// The build step, if one is configured
    pub fn build(&self) -> Result<Option<ToolCommand>> {
        if self.build_command.is_empty() {
            return Ok(None);
        }
        ToolCommand::new(self.build_command.clone(), &self.work_dir, self.timeout()).map(Some)
    }

    /// Reject settings no sweep could run with
    pub fn validate(&self) -> Result<()> {
        if self.simulator_command.is_empty() {
            return Err(HarnessError::Config("simulator command is empty".to_string()));
        }
        if self.timeout_secs == 0 {
            return Err(HarnessError::Config("timeout must be at least 1s".to_string()));
        }
        if self.report_every == 0 {
            return Err(HarnessError::Config("report_every must be positive".to_string()));
        }
        self.range().map(|_| ())
    }
}

fn split_command(cmd: &str) -> Vec<String> {
    cmd.split_whitespace().map(String::from).collect()
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| HarnessError::Config(format!("{} has invalid value {:?}", name, value)))
}
