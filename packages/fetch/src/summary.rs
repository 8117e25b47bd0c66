//! Run outcome tallying and the printed summary block.

use std::fmt::Write as _;
use std::time::Instant;

use fleet_query_fetch_models::{RunSummary, SourceFailure};

use crate::worker::FetchResult;
use crate::writer::WriterReport;

/// How many failures the printed summary lists before truncating.
pub const MAX_PRINTED_ERRORS: usize = 5;

/// Accumulates [`FetchResult`] outcomes into a [`RunSummary`].
#[derive(Debug)]
pub struct RunAggregator {
    total_sources: usize,
    succeeded: usize,
    errors: Vec<SourceFailure>,
    started: Instant,
}

impl RunAggregator {
    /// Starts timing a run over `total_sources` sources.
    #[must_use]
    pub fn new(total_sources: usize) -> Self {
        Self {
            total_sources,
            succeeded: 0,
            errors: Vec::new(),
            started: Instant::now(),
        }
    }

    /// Tallies one result.
    pub fn record(&mut self, result: &FetchResult) {
        match result {
            FetchResult::Success { .. } => self.succeeded += 1,
            FetchResult::Failure { source_id, error } => self.errors.push(SourceFailure {
                source_id: source_id.clone(),
                message: error.to_string(),
            }),
        }
    }

    /// Builds the summary from the tallies and the writer's final counts.
    #[must_use]
    pub fn finish(self, report: WriterReport) -> RunSummary {
        RunSummary {
            total_sources: self.total_sources,
            succeeded: self.succeeded,
            failed: self.errors.len(),
            duration: self.started.elapsed(),
            total_rows_written: report.total_rows,
            group_row_counts: report.group_row_counts,
            errors: self.errors,
            sink_errors: report.failures,
        }
    }
}

/// Renders the human-readable summary printed at the end of a run.
#[must_use]
pub fn render_summary(summary: &RunSummary) -> String {
    let rule = "=".repeat(50);
    let mut out = String::new();

    let _ = writeln!(out, "\n{rule}");
    let _ = writeln!(out, "SUMMARY");
    let _ = writeln!(out, "{rule}");
    let _ = writeln!(out, "Total schemas: {}", summary.total_sources);
    let _ = writeln!(out, "Successful: {}", summary.succeeded);
    let _ = writeln!(out, "Failed: {}", summary.failed);
    let _ = writeln!(out, "Duration: {:.2} seconds", summary.duration.as_secs_f64());
    let _ = writeln!(out, "Total rows written: {}", summary.total_rows_written);

    if !summary.group_row_counts.is_empty() {
        let _ = writeln!(out, "\nRows per group:");
        for (group, count) in &summary.group_row_counts {
            let _ = writeln!(out, "  {group}: {count} rows");
        }
    }

    if !summary.errors.is_empty() {
        let _ = writeln!(out, "\nErrors ({}):", summary.errors.len());
        for failure in summary.errors.iter().take(MAX_PRINTED_ERRORS) {
            let _ = writeln!(out, "  {}: {}", failure.source_id, failure.message);
        }
        if summary.errors.len() > MAX_PRINTED_ERRORS {
            let _ = writeln!(
                out,
                "  ... and {} more",
                summary.errors.len() - MAX_PRINTED_ERRORS
            );
        }
    }

    if !summary.sink_errors.is_empty() {
        let dropped: u64 = summary.sink_errors.iter().map(|f| f.dropped_rows).sum();
        let _ = writeln!(out, "\nOutput errors ({}):", summary.sink_errors.len());
        if dropped > 0 {
            let _ = writeln!(out, "Rows not written: {dropped}");
        }
        for failure in summary.sink_errors.iter().take(MAX_PRINTED_ERRORS) {
            let _ = writeln!(
                out,
                "  {}: {} ({} rows dropped)",
                failure.group, failure.message, failure.dropped_rows
            );
        }
        if summary.sink_errors.len() > MAX_PRINTED_ERRORS {
            let _ = writeln!(
                out,
                "  ... and {} more",
                summary.sink_errors.len() - MAX_PRINTED_ERRORS
            );
        }
    }

    out
}
