use std::path::PathBuf;

use crate::candidate::{DownloadOutcome, DownloadRecord};

/// Counters and errors accumulated by one stage of a source run.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunTally {
    pub saved: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
}

impl RunTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, record: &DownloadRecord) {
        match &record.outcome {
            DownloadOutcome::Saved { .. } => self.saved += 1,
            DownloadOutcome::AlreadyDownloaded => self.skipped += 1,
            DownloadOutcome::Failed { .. } => {
                self.skipped += 1;
                if let Some(line) = record.error_line() {
                    self.errors.push(line);
                }
            }
        }
        self.errors.extend(record.warnings.iter().cloned());
    }

    pub fn note_error(&mut self, message: impl Into<String>) {
        self.errors.push(message.into());
    }

    /// Folds `other` into `self`, keeping error order (self first).
    pub fn merge(&mut self, other: RunTally) {
        self.saved += other.saved;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
    }

    pub fn into_result(
        self,
        engine: impl Into<String>,
        requested: usize,
        destination: PathBuf,
    ) -> ScrapeResult {
        ScrapeResult {
            engine: engine.into(),
            requested,
            saved: self.saved,
            skipped: self.skipped,
            errors: self.errors,
            destination,
        }
    }
}

/// Outcome of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScrapeResult {
    pub engine: String,
    pub requested: usize,
    pub saved: usize,
    pub skipped: usize,
    pub errors: Vec<String>,
    pub destination: PathBuf,
}

impl ScrapeResult {
    pub fn summary_line(&self) -> String {
        format!(
            "{}: requested={} saved={} skipped={} destination={}",
            self.engine,
            self.requested,
            self.saved,
            self.skipped,
            self.destination.display()
        )
    }
}

/// Everything a run produced, in source order.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RunReport {
    pub results: Vec<ScrapeResult>,
    /// Source-level failures, e.g. `"bing run failed: ..."`.
    pub failures: Vec<String>,
    /// Set when a setup failure stopped the remaining sources.
    pub aborted: bool,
    pub cancelled: bool,
}
