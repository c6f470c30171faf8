//! mifq Verification Harness
//!
//! Drives a fixed-point hardware model (an external simulator, the software
//! reference, or a board) over a labeled image set and reports how often its
//! prediction matches the expected label.

mod board;
mod config;
mod dataset;
mod error;
mod reference;
mod simulator;
mod staging;
mod sweep;

pub use board::{encode_frame, BoardLink, START_MARKER};
pub use config::HarnessConfig;
pub use dataset::{IdxDataset, InMemoryDataset, LabeledDataset, LabeledImage};
pub use error::{HarnessError, Result};
pub use reference::{lift_pixels, FixedPointReference, ReferenceBackend};
pub use simulator::{
    PredictionParser, SimulatorBackend, ToolCommand, ToolOutput, DEFAULT_MARKER, PARSER_VERSION,
};
pub use staging::{render_hex, stage, StagedInput, StagingArea};
pub use sweep::{Backend, CancelToken, SkippedItem, Sweep, SweepRange, SweepReport};
