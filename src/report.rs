//! Operation reports: per-run success tallies and itemized failures

use serde::Serialize;
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::error::{FailureKind, ReconcileError};
use crate::index::AssetSet;
use crate::matcher::Ambiguity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    FixDates,
    Convert,
    Merge,
    Replace,
    PruneLive,
}

impl Operation {
    fn title(&self) -> &'static str {
        match self {
            Operation::FixDates => "Date fixing",
            Operation::Convert => "Conversion",
            Operation::Merge => "Merge",
            Operation::Replace => "Replacement",
            Operation::PruneLive => "Live photo pruning",
        }
    }

    fn verb(&self) -> &'static str {
        match self {
            Operation::FixDates => "processed",
            Operation::Convert => "converted",
            Operation::Merge => "merged",
            Operation::Replace => "replaced",
            Operation::PruneLive => "moved to backup",
        }
    }
}

/// One item that did not complete.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Failure {
    pub path: PathBuf,
    pub kind: FailureKind,
    pub reason: String,
}

/// How converted assets were produced.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConvertTally {
    /// Edited assets written from their embedded preview.
    pub edited: u64,
    /// Assets fully decoded (including edited ones whose preview failed).
    pub original: u64,
}

/// Outcome of one pipeline run.
#[derive(Debug, Clone, Serialize)]
pub struct OperationReport {
    pub operation: Operation,
    /// Items the run attempted.
    pub processed: u64,
    pub succeeded: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub conversions: Option<ConvertTally>,
    pub failures: Vec<Failure>,
    /// Non-item notices (unreadable directories, ambiguous names).
    pub warnings: Vec<String>,
    pub elapsed_ms: u64,
}

impl OperationReport {
    pub fn new(operation: Operation) -> Self {
        Self {
            operation,
            processed: 0,
            succeeded: 0,
            conversions: None,
            failures: Vec::new(),
            warnings: Vec::new(),
            elapsed_ms: 0,
        }
    }

    pub fn record_success(&mut self) {
        self.processed += 1;
        self.succeeded += 1;
    }

    pub fn record_failure(&mut self, path: &Path, error: &ReconcileError) {
        self.processed += 1;
        self.failures.push(Failure {
            path: path.to_path_buf(),
            kind: error.kind(),
            reason: error.to_string(),
        });
    }

    /// An item deliberately left alone; listed with the failures so nothing
    /// is silently dropped.
    pub fn record_skip(&mut self, path: &Path, reason: impl Into<String>) {
        self.processed += 1;
        self.failures.push(Failure {
            path: path.to_path_buf(),
            kind: FailureKind::Skipped,
            reason: reason.into(),
        });
    }

    /// Fold one item outcome into the report.
    pub fn record<T>(&mut self, path: &Path, outcome: &Result<T, ReconcileError>) {
        match outcome {
            Ok(_) => self.record_success(),
            Err(e) => self.record_failure(path, e),
        }
    }

    pub fn note_index_issues(&mut self, set: &AssetSet) {
        for issue in &set.skipped {
            self.warnings.push(format!(
                "unreadable during scan: {}: {}",
                issue.path.display(),
                issue.reason
            ));
        }
    }

    pub fn note_ambiguities(&mut self, ambiguities: &[Ambiguity]) {
        for a in ambiguities {
            self.warnings.push(format!(
                "{} reference files named {}; used {}",
                a.candidates.len(),
                a.key,
                a.chosen.display()
            ));
        }
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    pub fn finish(mut self, timer: &Timer) -> Self {
        self.elapsed_ms = timer.elapsed_ms();
        self
    }
}

impl fmt::Display for OperationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} complete!", self.operation.title())?;
        writeln!(f, "Successfully {}: {} files", self.operation.verb(), self.succeeded)?;
        if let Some(tally) = &self.conversions {
            writeln!(f, "  from embedded preview (edited): {}", tally.edited)?;
            writeln!(f, "  from full decode (original): {}", tally.original)?;
        }
        if !self.warnings.is_empty() {
            writeln!(f, "\nWarnings:")?;
            for w in &self.warnings {
                writeln!(f, "{w}")?;
            }
        }
        if !self.failures.is_empty() {
            writeln!(f, "Failed: {} files", self.failures.len())?;
            writeln!(f, "\nErrors:")?;
            for failure in &self.failures {
                writeln!(f, "{}: [{}] {}", failure.path.display(), failure.kind, failure.reason)?;
            }
        }
        Ok(())
    }
}

/// Timer for tracking operation latency
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_outcomes() {
        let mut report = OperationReport::new(Operation::Replace);
        report.record(Path::new("/p/a.jpg"), &Ok::<(), ReconcileError>(()));
        report.record(
            Path::new("/p/b.jpg"),
            &Err::<(), _>(ReconcileError::backup("disk full")),
        );
        report.record_skip(Path::new("/p/c.jpg"), "duplicate name");

        assert_eq!(report.processed, 3);
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.failures[0].kind, FailureKind::Backup);
        assert_eq!(report.failures[1].kind, FailureKind::Skipped);
    }

    #[test]
    fn test_summary_lists_every_failure() {
        let mut report = OperationReport::new(Operation::Convert);
        report.conversions = Some(ConvertTally { edited: 1, original: 2 });
        report.record_success();
        report.record_failure(Path::new("/x/IMG_9.HEIC"), &ReconcileError::conversion("bad data"));

        let text = report.to_string();
        assert!(text.contains("Conversion complete!"));
        assert!(text.contains("Successfully converted: 1 files"));
        assert!(text.contains("from embedded preview (edited): 1"));
        assert!(text.contains("/x/IMG_9.HEIC: [conversion] Conversion failed: bad data"));
    }

    #[test]
    fn test_report_serializes() {
        let mut report = OperationReport::new(Operation::Merge);
        report.record_skip(Path::new("/s/a.jpg"), "duplicate name in source");
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["operation"], "merge");
        assert_eq!(json["failures"][0]["kind"], "skipped");
        assert!(json.get("conversions").is_none());
    }
}
