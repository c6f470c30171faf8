//! Staged simulator input
//!
//! The simulator reads one image from a fixed file: one pixel per line, as two
//! lowercase hex digits, row-major. The file is replaced atomically before each
//! item and put back to its pre-sweep contents afterwards.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use crate::dataset::{LabeledDataset, LabeledImage};
use crate::error::{HarnessError, Result};

/// An image rendered for the simulator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedInput {
    pub index: usize,
    pub label: u8,
    pub pixels: Vec<u8>,
    /// File contents the simulator will read
    pub contents: String,
}

/// Render pixels as the simulator's hex format
pub fn render_hex(pixels: &[u8]) -> String {
    let mut out = String::with_capacity(pixels.len() * 3);
    for p in pixels {
        // Writing to a String cannot fail
        let _ = writeln!(out, "{:02x}", p);
    }
    out
}

/// Render dataset item `index`, without touching the filesystem
pub fn stage<D: LabeledDataset + ?Sized>(dataset: &D, index: usize) -> Result<StagedInput> {
    let LabeledImage { pixels, label, .. } = dataset.get(index)?;
    Ok(StagedInput {
        index,
        label,
        contents: render_hex(&pixels),
        pixels,
    })
}

/// Owns the staged input file for the length of a sweep
#[derive(Debug)]
pub struct StagingArea {
    path: PathBuf,
    /// Contents before the sweep; `None` if the file did not exist
    baseline: Option<Vec<u8>>,
}

impl StagingArea {
    /// Take over `path`, remembering what is there now
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let baseline = match std::fs::read(&path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, baseline })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace the staged file with `input`
    pub fn write(&self, input: &StagedInput) -> Result<()> {
        write_atomic(&self.path, input.contents.as_bytes())?;
        tracing::debug!(index = input.index, path = %self.path.display(), "staged input");
        Ok(())
    }

    /// Put the pre-sweep contents back
    pub fn restore(&self) -> Result<()> {
        let result = match &self.baseline {
            Some(bytes) => write_atomic(&self.path, bytes),
            None => match std::fs::remove_file(&self.path) {
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                other => other,
            },
        };
        result.map_err(HarnessError::RestoreFailed)
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            tracing::error!(path = %self.path.display(), error = %e, "staged input left modified");
        }
    }
}

/// Write via a sibling temp file and rename, so readers never see a partial file
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}
