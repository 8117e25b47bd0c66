#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Runs one query against every schema in the fleet and streams the
//! combined rows into grouped CSV files.
//!
//! [`run_fetch`] wires the pieces together: a [`pool::WorkerPool`] of
//! [`worker::SourceWorker`]s feeds results into one shared
//! [`writer::GroupedStreamWriter`], a [`summary::RunAggregator`] tallies
//! outcomes, and a [`progress::ProgressReporter`] snapshots the in-flight
//! workers to disk while the run is going.

pub mod active;
pub mod commands;
pub mod interactive;
pub mod pool;
pub mod progress;
pub mod queries;
pub mod sources;
pub mod stats;
pub mod summary;
pub mod worker;
pub mod writer;

#[cfg(test)]
pub(crate) mod testing;

use std::path::PathBuf;
use std::sync::Arc;

use fleet_query_database::connector::SourceConnector;
use fleet_query_fetch_models::{FetchConfig, RunSummary};
use fleet_query_source::progress::ProgressCallback;
use fleet_query_source_models::SourceDescriptor;

use crate::active::ActiveWorkers;
use crate::pool::WorkerPool;
use crate::progress::ProgressReporter;
use crate::summary::RunAggregator;
use crate::worker::{FetchResult, SourceWorker};
use crate::writer::{GroupedStreamWriter, WriterError};

/// Errors that abort a whole run.
///
/// Per-source failures never show up here; they are reported in the
/// returned summary.
#[derive(Debug, thiserror::Error)]
pub enum RunError {
    /// The grouped writer failed as a whole.
    #[error(transparent)]
    Writer(#[from] WriterError),

    /// The output directory could not be created.
    #[error("Failed to create output directory: {0}")]
    OutputDir(std::io::Error),

    /// A single-file output could not be written.
    #[error("Failed to write {}: {source}", path.display())]
    Output {
        /// File being written.
        path: PathBuf,
        /// Underlying error.
        source: csv::Error,
    },
}

/// Runs `query` against every source and writes the rows according to
/// `config`.
///
/// Sinks are flushed and closed, and the progress reporter is stopped,
/// before this returns on both the success and the error path.
///
/// # Errors
///
/// Returns [`RunError`] only when the shared writer itself fails. A run in
/// which every source fails still returns `Ok` with the failures listed.
pub async fn run_fetch(
    sources: Vec<SourceDescriptor>,
    query: &str,
    connector: Arc<dyn SourceConnector>,
    config: &FetchConfig,
    progress: Arc<dyn ProgressCallback>,
) -> Result<RunSummary, RunError> {
    let total = sources.len();
    log::info!("Starting parallel fetch from {total} schemas...");

    let writer = GroupedStreamWriter::create(&config.output_dir, config.layout.clone())?;
    let active = Arc::new(ActiveWorkers::new());
    let reporter = config.progress_file.clone().map(|path| {
        ProgressReporter::spawn(Arc::clone(&active), path, config.progress_interval)
    });

    let worker = SourceWorker::new(connector, Arc::clone(&active), config.connect_timeout);
    let pool = WorkerPool::new(worker, config.concurrency).with_progress(progress);
    log::info!("Using {} concurrent workers", pool.concurrency());

    let mut aggregator = RunAggregator::new(total);
    let dispatched = pool
        .dispatch(sources, query, |result| {
            aggregator.record(&result);
            if let FetchResult::Success { source_id, rows } = &result {
                writer.write_rows(source_id, rows)?;
            }
            Ok::<_, WriterError>(())
        })
        .await;

    let finished = writer.finish();
    if let Some(reporter) = reporter {
        reporter.stop().await;
    }
    dispatched?;
    let report = finished?;

    log::info!("Total rows written: {}", report.total_rows);
    let dropped: u64 = report.failures.iter().map(|f| f.dropped_rows).sum();
    if dropped > 0 {
        log::warn!("{dropped} rows could not be written to their output files");
    }
    for (group, count) in &report.group_row_counts {
        log::info!("  Group {group}: {count} rows");
    }

    Ok(aggregator.finish(report))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::Path;
    use std::time::Duration;

    use fleet_query_fetch_models::OutputLayout;
    use fleet_query_source::progress::null_progress;
    use fleet_query_source_models::Row;

    use super::*;
    use crate::testing::{FakeBehavior, FakeConnector, source};

    fn temp_dir(name: &str) -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("fleet_query_run_{name}_{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    fn config(dir: &Path, layout: OutputLayout, concurrency: usize) -> FetchConfig {
        FetchConfig {
            concurrency,
            output_dir: dir.to_path_buf(),
            layout,
            progress_file: Some(dir.join("progress.json")),
            progress_interval: Duration::from_millis(10),
            ..FetchConfig::default()
        }
    }

    fn group_by(column: &str) -> OutputLayout {
        OutputLayout::Grouped {
            column: column.to_string(),
        }
    }

    /// Data lines of a CSV file, sorted, without the header.
    fn sorted_lines(path: &Path) -> Vec<String> {
        let text = std::fs::read_to_string(path).unwrap();
        let mut lines: Vec<String> = text.lines().skip(1).map(str::to_string).collect();
        lines.sort();
        lines
    }

    #[tokio::test]
    async fn rows_are_grouped_by_column_value() {
        let dir = temp_dir("grouped");
        let connector = FakeConnector::new()
            .with("s1", FakeBehavior::Rows(vec![Row::new().with("y", 2021).with("n", 5)]))
            .with("s2", FakeBehavior::Rows(vec![Row::new().with("y", 2021).with("n", 3)]))
            .with("s3", FakeBehavior::Rows(vec![Row::new().with("y", 2022).with("n", 7)]));

        let summary = run_fetch(
            vec![source("s1"), source("s2"), source("s3")],
            "SELECT y, n",
            Arc::new(connector),
            &config(&dir, group_by("y"), 10),
            null_progress(),
        )
        .await
        .unwrap();

        assert_eq!(summary.total_sources, 3);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.total_rows_written, 3);
        assert_eq!(
            summary.group_row_counts,
            BTreeMap::from([("2021".to_string(), 2), ("2022".to_string(), 1)])
        );

        let header = std::fs::read_to_string(dir.join("y_2021.csv")).unwrap();
        assert!(header.starts_with("schema,n,y\n"));
        assert_eq!(
            sorted_lines(&dir.join("y_2021.csv")),
            vec!["s1,5,2021", "s2,3,2021"]
        );
        assert_eq!(sorted_lines(&dir.join("y_2022.csv")), vec!["s3,7,2022"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn failed_sources_are_counted_and_others_written() {
        let dir = temp_dir("failures");
        let rows = |n: i64| vec![Row::new().with("n", n), Row::new().with("n", n + 1)];
        let connector = FakeConnector::new()
            .with("ok1", FakeBehavior::Rows(rows(1)))
            .with("bad1", FakeBehavior::ConnectError("access denied".into()))
            .with("ok2", FakeBehavior::Rows(rows(10)))
            .with("bad2", FakeBehavior::QueryError("table missing".into()));

        let summary = run_fetch(
            vec![source("ok1"), source("bad1"), source("ok2"), source("bad2")],
            "SELECT n",
            Arc::new(connector),
            &config(&dir, OutputLayout::Ungrouped, 2),
            null_progress(),
        )
        .await
        .unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.total_rows_written, 4);
        let mut failed: Vec<_> = summary.errors.iter().map(|e| e.source_id.as_str()).collect();
        failed.sort_unstable();
        assert_eq!(failed, vec!["bad1", "bad2"]);
        assert_eq!(
            sorted_lines(&dir.join("schema_results.csv")),
            vec!["ok1,1", "ok1,2", "ok2,10", "ok2,11"]
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn zero_row_source_counts_as_success() {
        let dir = temp_dir("zero_rows");
        let connector = FakeConnector::new()
            .with("empty", FakeBehavior::Rows(Vec::new()))
            .with("full", FakeBehavior::Rows(vec![Row::new().with("copy", 0)]));

        let summary = run_fetch(
            vec![source("empty"), source("full")],
            "SELECT copy",
            Arc::new(connector),
            &config(&dir, group_by("copy"), 4),
            null_progress(),
        )
        .await
        .unwrap();

        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.total_rows_written, 1);
        assert_eq!(sorted_lines(&dir.join("copy_0.csv")), vec!["full,0"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn all_sources_failing_still_returns_summary() {
        let dir = temp_dir("all_fail");
        let connector = FakeConnector::new()
            .with("a", FakeBehavior::ConnectError("refused".into()))
            .with("b", FakeBehavior::ConnectDelay(Duration::from_secs(5)));
        let config = FetchConfig {
            connect_timeout: Duration::from_millis(20),
            ..config(&dir, group_by("copy"), 2)
        };

        let summary = run_fetch(
            vec![source("a"), source("b")],
            "SELECT 1",
            Arc::new(connector),
            &config,
            null_progress(),
        )
        .await
        .unwrap();

        assert_eq!(summary.succeeded, 0);
        assert_eq!(summary.failed, 2);
        assert_eq!(summary.total_rows_written, 0);
        assert!(summary.group_row_counts.is_empty());
        assert!(
            summary
                .errors
                .iter()
                .any(|e| e.source_id == "b" && e.message.contains("timeout"))
        );

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_level_does_not_change_output() {
        let build = || {
            (0..40_i64).fold(FakeConnector::new(), |c, i| {
                let rows = (0..5)
                    .map(|j| Row::new().with("g", (i + j) % 3).with("v", i * 100 + j))
                    .collect();
                c.with(
                    &format!("s{i}"),
                    FakeBehavior::QueryDelay(
                        Duration::from_millis((i % 4).unsigned_abs()),
                        rows,
                    ),
                )
            })
        };
        let sources = || (0..40).map(|i| source(&format!("s{i}"))).collect::<Vec<_>>();

        let mut outputs = Vec::new();
        for concurrency in [1, 50] {
            let dir = temp_dir(&format!("concurrency_{concurrency}"));
            let summary = run_fetch(
                sources(),
                "SELECT g, v",
                Arc::new(build()),
                &config(&dir, group_by("g"), concurrency),
                null_progress(),
            )
            .await
            .unwrap();
            assert_eq!(summary.total_rows_written, 200);

            let files: Vec<_> = ["g_0.csv", "g_1.csv", "g_2.csv"]
                .iter()
                .map(|f| sorted_lines(&dir.join(f)))
                .collect();
            outputs.push((summary.group_row_counts, files));
            std::fs::remove_dir_all(&dir).unwrap();
        }

        assert_eq!(outputs[0], outputs[1]);
    }

    #[tokio::test]
    async fn header_comes_from_first_arriving_row() {
        let dir = temp_dir("first_header");
        let connector = FakeConnector::new()
            .with(
                "early",
                FakeBehavior::Rows(vec![Row::new().with("a", 1).with("b", 2)]),
            )
            .with(
                "late",
                FakeBehavior::QueryDelay(
                    Duration::from_millis(50),
                    vec![Row::new().with("a", 3).with("c", 4)],
                ),
            );

        run_fetch(
            vec![source("late"), source("early")],
            "SELECT *",
            Arc::new(connector),
            &config(&dir, OutputLayout::Ungrouped, 2),
            null_progress(),
        )
        .await
        .unwrap();

        let text = std::fs::read_to_string(dir.join("schema_results.csv")).unwrap();
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("schema,a,b"));
        let mut rest: Vec<_> = lines.collect();
        rest.sort_unstable();
        assert_eq!(rest, vec!["early,1,2", "late,3,"]);

        std::fs::remove_dir_all(&dir).unwrap();
    }

    #[tokio::test]
    async fn progress_file_ends_with_no_active_workers() {
        let dir = temp_dir("progress");
        let connector = FakeConnector::new().with(
            "slow",
            FakeBehavior::QueryDelay(Duration::from_millis(40), vec![Row::new().with("n", 1)]),
        );

        run_fetch(
            vec![source("slow")],
            "SELECT n",
            Arc::new(connector),
            &config(&dir, OutputLayout::Ungrouped, 1),
            null_progress(),
        )
        .await
        .unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("progress.json")).unwrap())
                .unwrap();
        assert_eq!(json["active_threads"], 0);
        assert!(json["threads"].as_object().unwrap().is_empty());

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
