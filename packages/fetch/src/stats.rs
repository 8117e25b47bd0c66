//! Per-schema size statistics written to one CSV.

use std::path::Path;
use std::sync::Arc;

use fleet_query_database::connector::SourceConnector;
use fleet_query_fetch_models::{FetchConfig, SOURCE_ID_COLUMN, SourceFailure, StatsReport};
use fleet_query_source::progress::ProgressCallback;
use fleet_query_source_models::{Row, SourceDescriptor, Value};

use crate::RunError;
use crate::active::ActiveWorkers;
use crate::pool::WorkerPool;
use crate::worker::{FetchResult, SourceWorker};

/// Default stats output file name.
pub const DEFAULT_STATS_FILE: &str = "schema_stats.csv";

/// Case counts by copy flag plus test and change totals.
pub const STATS_QUERY: &str = "SELECT \
    SUM(CASE WHEN is_copy=0 THEN 1 ELSE 0 END) AS cases_copy_0, \
    SUM(CASE WHEN is_copy=1 THEN 1 ELSE 0 END) AS cases_copy_1, \
    (SELECT COUNT(*) FROM tests) AS tests_count, \
    (SELECT COUNT(*) FROM test_changes) AS test_changes_count \
    FROM cases";

/// Column order of the stats file.
pub const STATS_COLUMNS: [&str; 6] = [
    SOURCE_ID_COLUMN,
    "cases_copy_0",
    "cases_copy_1",
    "tests_count",
    "test_changes_count",
    "sum_tests_and_cases",
];

/// Stats for one schema.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemaStats {
    pub schema: String,
    pub cases_copy_0: i64,
    pub cases_copy_1: i64,
    pub tests_count: i64,
    pub test_changes_count: i64,
}

impl SchemaStats {
    /// Builds stats from the first row of a stats query result.
    ///
    /// Missing, `NULL`, and non-numeric values count as zero, as does a
    /// schema that returned no row at all.
    #[must_use]
    pub fn from_rows(schema: &str, rows: &[Row]) -> Self {
        let count = |column: &str| {
            rows.first()
                .and_then(|row| row.get(column))
                .and_then(Value::as_i64)
                .unwrap_or(0)
        };

        Self {
            schema: schema.to_string(),
            cases_copy_0: count("cases_copy_0"),
            cases_copy_1: count("cases_copy_1"),
            tests_count: count("tests_count"),
            test_changes_count: count("test_changes_count"),
        }
    }

    /// Tests plus cases of both copy flags.
    #[must_use]
    pub const fn sum_tests_and_cases(&self) -> i64 {
        self.tests_count + self.cases_copy_0 + self.cases_copy_1
    }

    fn record(&self) -> [String; 6] {
        [
            self.schema.clone(),
            self.cases_copy_0.to_string(),
            self.cases_copy_1.to_string(),
            self.tests_count.to_string(),
            self.test_changes_count.to_string(),
            self.sum_tests_and_cases().to_string(),
        ]
    }
}

/// Writes `stats` to `path`, sorted by schema.
///
/// # Errors
///
/// Returns [`RunError::Output`] if the file cannot be written.
pub fn write_stats(path: &Path, stats: &mut [SchemaStats]) -> Result<(), RunError> {
    let output = |source: csv::Error| RunError::Output {
        path: path.to_path_buf(),
        source,
    };

    stats.sort_by(|a, b| a.schema.cmp(&b.schema));

    let mut writer = csv::Writer::from_path(path).map_err(output)?;
    writer.write_record(STATS_COLUMNS).map_err(output)?;
    for s in stats.iter() {
        writer.write_record(s.record()).map_err(output)?;
    }
    writer.flush().map_err(|e| output(e.into()))?;
    Ok(())
}

/// Runs [`STATS_QUERY`] against every source and writes one stats row per
/// schema to `output_dir/output_file`.
///
/// # Errors
///
/// Returns [`RunError`] if the output directory or file cannot be written.
/// Per-source failures are reported in [`StatsReport::errors`].
pub async fn collect_stats(
    sources: Vec<SourceDescriptor>,
    connector: Arc<dyn SourceConnector>,
    config: &FetchConfig,
    output_file: &str,
    progress: Arc<dyn ProgressCallback>,
) -> Result<StatsReport, RunError> {
    let total = sources.len();
    log::info!("Collecting stats from {total} schemas...");

    std::fs::create_dir_all(&config.output_dir).map_err(RunError::OutputDir)?;
    let path = config.output_dir.join(output_file);

    let worker = SourceWorker::new(
        connector,
        Arc::new(ActiveWorkers::new()),
        config.connect_timeout,
    );
    let pool = WorkerPool::new(worker, config.concurrency).with_progress(progress);

    let mut stats = Vec::with_capacity(total);
    let mut errors = Vec::new();
    pool.dispatch::<_, RunError>(sources, STATS_QUERY, |result| {
        match result {
            FetchResult::Success { source_id, rows } => {
                stats.push(SchemaStats::from_rows(&source_id, &rows));
            }
            FetchResult::Failure { source_id, error } => {
                log::error!("Error for {source_id}: {error}");
                errors.push(SourceFailure {
                    source_id,
                    message: error.to_string(),
                });
            }
        }
        Ok(())
    })
    .await?;

    write_stats(&path, &mut stats)?;
    log::info!("Wrote stats for {} schemas to {}", stats.len(), path.display());
    if let Some(first) = errors.first() {
        log::warn!(
            "{} schemas failed; first error: {}: {}",
            errors.len(),
            first.source_id,
            first.message
        );
    }

    Ok(StatsReport {
        total,
        collected: stats.len(),
        errors,
        output_file: path,
    })
}
