//! Differential sweep over a range of dataset items
//!
//! Every item in the range is staged, handed to a backend, and compared with
//! its label. An item that fails (timeout, tool failure, unparseable output)
//! is recorded as skipped and still counts as tested, so the accuracy is never
//! inflated by items the model under test could not answer.

use std::fmt;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::dataset::LabeledDataset;
use crate::error::{HarnessError, Result};
use crate::staging::{stage, StagedInput};

/// Something that classifies a staged image
pub trait Backend {
    /// Short name for logs
    fn name(&self) -> &str;

    /// One-time setup before the first item. A failure aborts the sweep.
    fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    /// Predicted class for one item
    fn predict(&mut self, input: &StagedInput) -> Result<u8>;
}

/// Shared stop flag, checked between items
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Inclusive range of dataset indices
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SweepRange {
    pub start: usize,
    pub end: usize,
}

impl SweepRange {
    pub fn new(start: usize, end: usize) -> Result<Self> {
        if start > end {
            return Err(HarnessError::Config(format!(
                "start index {} is after end index {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Number of items in the range
    pub fn len(&self) -> usize {
        self.end - self.start + 1
    }

    /// Always false; `new` rejects `start > end`
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn iter(&self) -> std::ops::RangeInclusive<usize> {
        self.start..=self.end
    }
}

/// An item that produced no prediction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedItem {
    pub index: usize,
    pub reason: String,
}

/// Outcome of a sweep
#[derive(Debug, Clone, PartialEq)]
pub struct SweepReport {
    pub range: SweepRange,
    /// Items attempted, skipped ones included
    pub images_tested: usize,
    pub correct_matches: usize,
    pub skipped: Vec<SkippedItem>,
    /// Stopped early on request
    pub cancelled: bool,
}

impl SweepReport {
    fn new(range: SweepRange) -> Self {
        Self {
            range,
            images_tested: 0,
            correct_matches: 0,
            skipped: Vec::new(),
            cancelled: false,
        }
    }

    /// Percentage of tested items predicted correctly
    pub fn accuracy(&self) -> f64 {
        if self.images_tested == 0 {
            return 0.0;
        }
        self.correct_matches as f64 / self.images_tested as f64 * 100.0
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Total correct matches: {} out of {}",
            self.correct_matches, self.images_tested
        )?;
        write!(f, "Skipped: {}", self.skipped.len())?;
        if self.cancelled {
            write!(
                f,
                " (cancelled after {} of {} images)",
                self.images_tested,
                self.range.len()
            )?;
        }
        Ok(())
    }
}

/// Drives a backend over a dataset
pub struct Sweep<'a, D: ?Sized> {
    dataset: &'a D,
    report_every: usize,
}

impl<'a, D: LabeledDataset + ?Sized> Sweep<'a, D> {
    pub fn new(dataset: &'a D) -> Self {
        Self {
            dataset,
            report_every: 10,
        }
    }

    /// Print the running accuracy every `n` items
    pub fn report_every(mut self, n: usize) -> Self {
        self.report_every = n.max(1);
        self
    }

    /// Run `backend` over `range`, writing progress lines to `out`.
    ///
    /// Per-item failures are skipped. Setup failures, a range outside the
    /// dataset, and staged-input restore failures abort with an error.
    pub fn run<B, W>(
        &self,
        range: SweepRange,
        backend: &mut B,
        cancel: &CancelToken,
        out: &mut W,
    ) -> Result<SweepReport>
    where
        B: Backend + ?Sized,
        W: Write,
    {
        if range.end >= self.dataset.len() {
            return Err(HarnessError::IndexOutOfRange {
                index: range.end,
                len: self.dataset.len(),
            });
        }

        writeln!(out, "--- Preparing {} ---", backend.name())?;
        backend.prepare()?;

        let mut report = SweepReport::new(range);
        for index in range.iter() {
            if cancel.is_cancelled() {
                tracing::info!(index, "sweep cancelled");
                report.cancelled = true;
                break;
            }

            writeln!(out, "--- Testing image index: {} ---", index)?;
            report.images_tested += 1;

            match self.check_item(index, backend, out) {
                Ok(true) => report.correct_matches += 1,
                Ok(false) => {}
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    tracing::warn!(index, error = %e, "skipping item");
                    writeln!(out, "Skipped: {}", e)?;
                    report.skipped.push(SkippedItem {
                        index,
                        reason: e.to_string(),
                    });
                }
            }

            if report.images_tested % self.report_every == 0 {
                writeln!(
                    out,
                    "--- Current accuracy after {} images: {:.2}% ---",
                    report.images_tested,
                    report.accuracy()
                )?;
            }
        }

        writeln!(out, "\n--- Test Suite Finished ---")?;
        writeln!(out, "{}", report)?;
        tracing::info!(
            tested = report.images_tested,
            correct = report.correct_matches,
            skipped = report.skipped.len(),
            "sweep finished"
        );
        Ok(report)
    }

    fn check_item<B, W>(&self, index: usize, backend: &mut B, out: &mut W) -> Result<bool>
    where
        B: Backend + ?Sized,
        W: Write,
    {
        let input = stage(self.dataset, index)?;
        writeln!(out, "Correct label: {}", input.label)?;

        let predicted = backend.predict(&input)?;
        writeln!(out, "Predicted digit: {}", predicted)?;

        let matched = predicted == input.label;
        writeln!(out, "Result: {}", if matched { "MATCH" } else { "MISMATCH" })?;
        Ok(matched)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{InMemoryDataset, LabeledImage};

    /// Answers from a fixed table; `None` entries time out
    struct Scripted(Vec<Option<u8>>);

    impl Backend for Scripted {
        fn name(&self) -> &str {
            "scripted"
        }

        fn predict(&mut self, input: &StagedInput) -> Result<u8> {
            self.0[input.index].ok_or_else(|| HarnessError::Timeout {
                command: "scripted".to_string(),
                timeout: std::time::Duration::from_secs(1),
            })
        }
    }

    fn digits(n: usize) -> InMemoryDataset {
        InMemoryDataset::new(
            (0..n)
                .map(|i| LabeledImage {
                    rows: 1,
                    cols: 1,
                    pixels: vec![i as u8],
                    label: (i % 10) as u8,
                })
                .collect(),
        )
    }

    fn run(backend: &mut Scripted, n: usize) -> (SweepReport, String) {
        let ds = digits(n);
        let mut out = Vec::new();
        let report = Sweep::new(&ds)
            .run(
                SweepRange::new(0, n - 1).unwrap(),
                backend,
                &CancelToken::new(),
                &mut out,
            )
            .unwrap();
        (report, String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_nine_of_ten() {
        let mut answers: Vec<Option<u8>> = (0..10).map(|i| Some(i as u8)).collect();
        answers[9] = Some(3);
        let (report, out) = run(&mut Scripted(answers), 10);

        assert_eq!(report.correct_matches, 9);
        assert_eq!(report.images_tested, 10);
        assert!(report.skipped.is_empty());
        assert_eq!(out.matches("Current accuracy").count(), 1);
        assert!(out.contains("--- Current accuracy after 10 images: 90.00% ---"));
        assert!(out.contains("Total correct matches: 9 out of 10"));
    }

    #[test]
    fn test_skipped_items_count_as_tested() {
        let mut answers: Vec<Option<u8>> = (0..10).map(|i| Some(i as u8)).collect();
        answers[3] = None;
        let (report, out) = run(&mut Scripted(answers), 10);

        assert_eq!(report.images_tested, 10);
        assert_eq!(report.correct_matches, 9);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].index, 3);
        assert!(out.contains("--- Testing image index: 9 ---"));
    }

    #[test]
    fn test_cancel_before_start() {
        let ds = digits(5);
        let cancel = CancelToken::new();
        cancel.cancel();
        let report = Sweep::new(&ds)
            .run(
                SweepRange::new(0, 4).unwrap(),
                &mut Scripted(vec![Some(0); 5]),
                &cancel,
                &mut Vec::new(),
            )
            .unwrap();
        assert!(report.cancelled);
        assert_eq!(report.images_tested, 0);
        assert_eq!(report.accuracy(), 0.0);
    }

    #[test]
    fn test_range_outside_dataset() {
        let ds = digits(5);
        let err = Sweep::new(&ds)
            .run(
                SweepRange::new(0, 5).unwrap(),
                &mut Scripted(vec![Some(0); 6]),
                &CancelToken::new(),
                &mut Vec::new(),
            )
            .unwrap_err();
        assert!(matches!(err, HarnessError::IndexOutOfRange { index: 5, len: 5 }));
    }

    #[test]
    fn test_range_validation() {
        assert!(SweepRange::new(3, 2).is_err());
        assert_eq!(SweepRange::new(2, 2).unwrap().len(), 1);
    }
}
