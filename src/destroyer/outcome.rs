//! Per-path and aggregate results of a destroy run.

#![allow(missing_docs)]

use std::path::PathBuf;
use std::time::Duration;

/// Result of attempting to destroy one filesystem object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestroyOutcome {
    /// Overwritten (where applicable) and unlinked.
    Destroyed,
    /// The path did not exist when the run reached it. Not a failure.
    SkippedMissing,
    /// The path could not be destroyed; the reason is recorded and the run
    /// continues with the next path.
    Failed(String),
}

impl DestroyOutcome {
    #[must_use]
    pub const fn is_failure(&self) -> bool {
        matches!(self, Self::Failed(_))
    }
}

/// One recorded outcome, in the order the run produced it. For directory
/// targets every descendant gets its own record before the directory's own
/// removal record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathOutcome {
    pub path: PathBuf,
    pub outcome: DestroyOutcome,
}

/// Aggregate of a whole destroy run. The run is successful iff no path
/// failed; skipped-missing paths do not count against it.
#[derive(Debug, Clone, Default)]
pub struct DestroyReport {
    pub outcomes: Vec<PathOutcome>,
    pub destroyed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub duration: Duration,
}

impl DestroyReport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one per-path outcome and update the counters.
    pub fn record(&mut self, path: impl Into<PathBuf>, outcome: DestroyOutcome) {
        match &outcome {
            DestroyOutcome::Destroyed => self.destroyed += 1,
            DestroyOutcome::SkippedMissing => self.skipped += 1,
            DestroyOutcome::Failed(_) => self.failed += 1,
        }
        self.outcomes.push(PathOutcome {
            path: path.into(),
            outcome,
        });
    }

    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.failed == 0
    }

    /// One-line summary for logs and the operator.
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} destroyed, {} skipped, {} failed",
            self.destroyed, self.skipped, self.failed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_report_is_success() {
        let report = DestroyReport::new();
        assert!(report.is_success());
        assert_eq!(report.summary(), "0 destroyed, 0 skipped, 0 failed");
    }

    #[test]
    fn skipped_missing_is_not_a_failure() {
        let mut report = DestroyReport::new();
        report.record("/tmp/a", DestroyOutcome::Destroyed);
        report.record("/tmp/b", DestroyOutcome::SkippedMissing);
        assert!(report.is_success());
        assert_eq!(report.destroyed, 1);
        assert_eq!(report.skipped, 1);
    }

    #[test]
    fn any_failure_fails_the_run() {
        let mut report = DestroyReport::new();
        report.record("/tmp/a", DestroyOutcome::Destroyed);
        report.record("/tmp/b", DestroyOutcome::Failed("unlink: EACCES".to_string()));
        assert!(!report.is_success());
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn outcomes_keep_run_order() {
        let mut report = DestroyReport::new();
        report.record("/t/child", DestroyOutcome::Destroyed);
        report.record("/t", DestroyOutcome::Destroyed);
        assert_eq!(report.outcomes[0].path, PathBuf::from("/t/child"));
        assert_eq!(report.outcomes[1].path, PathBuf::from("/t"));
    }
}
