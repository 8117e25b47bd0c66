//! Lazily-opened CSV sinks, one per group key.
//!
//! Every [`GroupedStreamWriter::write_row`] call holds one lock for the
//! whole lookup-or-create, header-fix, and write sequence. A group's header
//! is fixed by the first row that reaches it and never changes afterwards:
//! later rows are written positionally against it, with empty fields for
//! missing columns and extra columns dropped.

use std::collections::BTreeMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use fleet_query_fetch_models::{
    ALL_GROUP, OutputLayout, ROW_LOG_INTERVAL, SOURCE_ID_COLUMN, SinkFailure, UNKNOWN_GROUP,
};
use fleet_query_source_models::Row;

/// Errors that stop the writer as a whole.
///
/// Per-group open/write failures are not errors of this type; they are
/// recorded in [`WriterReport::failures`] and the run carries on.
#[derive(Debug, thiserror::Error)]
pub enum WriterError {
    /// Creating the output directory or flushing a sink failed.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A thread panicked while holding the sink registry lock.
    #[error("Sink registry lock poisoned")]
    Poisoned,

    /// A row arrived after [`GroupedStreamWriter::finish`].
    #[error("Writer already closed")]
    Closed,
}

/// Final per-group counts and any sink failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriterReport {
    /// Rows written per group key.
    pub group_row_counts: BTreeMap<String, u64>,
    /// Rows written across every group.
    pub total_rows: u64,
    /// Sink open/write failures, in the order they happened.
    pub failures: Vec<SinkFailure>,
    /// Paths of every file that was opened.
    pub files: Vec<PathBuf>,
}

struct OutputGroup {
    path: PathBuf,
    header: Vec<String>,
    sink: csv::Writer<File>,
    row_count: u64,
}

#[derive(Default)]
struct SinkRegistry {
    groups: BTreeMap<String, OutputGroup>,
    total_rows: u64,
    failures: Vec<SinkFailure>,
    /// Groups whose sink failed, mapped to their entry in `failures`.
    failed: BTreeMap<String, usize>,
    closed: bool,
}

impl SinkRegistry {
    fn fail_group(&mut self, key: String, message: String) {
        log::error!("Group {key}: {message}; dropping its remaining rows");
        self.failed.insert(key.clone(), self.failures.len());
        self.failures.push(SinkFailure {
            group: key,
            message,
            dropped_rows: 1,
        });
    }
}

/// Shared writer that routes rows to per-group CSV files.
pub struct GroupedStreamWriter {
    output_dir: PathBuf,
    layout: OutputLayout,
    registry: Mutex<SinkRegistry>,
}

impl GroupedStreamWriter {
    /// Creates the writer, creating `output_dir` if needed. No file is
    /// opened until its group receives a row.
    ///
    /// # Errors
    ///
    /// Returns [`WriterError::Io`] if the output directory cannot be
    /// created.
    pub fn create(
        output_dir: impl Into<PathBuf>,
        layout: OutputLayout,
    ) -> Result<Self, WriterError> {
        let output_dir = output_dir.into();
        std::fs::create_dir_all(&output_dir)?;

        Ok(Self {
            output_dir,
            layout,
            registry: Mutex::new(SinkRegistry::default()),
        })
    }

    /// Directory output files are written to.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Group key `row` belongs to under the configured layout.
    #[must_use]
    pub fn group_key(&self, row: &Row) -> String {
        match self.layout.group_column() {
            None => ALL_GROUP.to_string(),
            Some(column) => match row.get(column) {
                Some(value) if !value.is_null() => value.to_string(),
                _ => UNKNOWN_GROUP.to_string(),
            },
        }
    }

    /// Writes one row produced by `source_id`.
    ///
    /// # Errors
    ///
    /// Returns [`WriterError::Poisoned`] or [`WriterError::Closed`]. Failing
    /// to open or write a group's file is logged and recorded once instead,
    /// and every later row for that group is counted as dropped.
    pub fn write_row(&self, source_id: &str, row: &Row) -> Result<(), WriterError> {
        let key = self.group_key(row);
        let mut guard = self.lock()?;
        let registry = &mut *guard;
        if registry.closed {
            return Err(WriterError::Closed);
        }

        if let Some(&index) = registry.failed.get(&key) {
            registry.failures[index].dropped_rows += 1;
            return Ok(());
        }

        if !registry.groups.contains_key(&key) {
            match self.open_group(&key, row) {
                Ok(group) => {
                    log::info!("Created output file {}", group.path.display());
                    registry.groups.insert(key.clone(), group);
                }
                Err(e) => {
                    registry.fail_group(key, format!("Failed to open sink: {e}"));
                    return Ok(());
                }
            }
        }

        let Some(group) = registry.groups.get_mut(&key) else {
            return Ok(());
        };

        let record = group.header.iter().map(|column| {
            if column == SOURCE_ID_COLUMN {
                source_id.to_string()
            } else {
                row.get(column).map(ToString::to_string).unwrap_or_default()
            }
        });

        if let Err(e) = group.sink.write_record(record) {
            registry.fail_group(key, format!("Failed to write row from {source_id}: {e}"));
            return Ok(());
        }

        group.row_count += 1;
        registry.total_rows += 1;
        if registry.total_rows % ROW_LOG_INTERVAL == 0 {
            log::info!("Written {} rows so far...", registry.total_rows);
        }

        Ok(())
    }

    /// Writes every row of one source's result set, in order.
    ///
    /// # Errors
    ///
    /// See [`Self::write_row`].
    pub fn write_rows(&self, source_id: &str, rows: &[Row]) -> Result<(), WriterError> {
        for row in rows {
            self.write_row(source_id, row)?;
        }
        Ok(())
    }

    /// Flushes and closes every sink. Further writes fail with
    /// [`WriterError::Closed`].
    ///
    /// A sink that fails to flush is recorded in the report, and the
    /// remaining sinks are still closed.
    ///
    /// # Errors
    ///
    /// Returns [`WriterError::Poisoned`] if the registry lock is poisoned.
    pub fn finish(&self) -> Result<WriterReport, WriterError> {
        let mut guard = self.lock()?;
        let registry = &mut *guard;
        registry.closed = true;

        let groups = std::mem::take(&mut registry.groups);
        let mut report = WriterReport {
            total_rows: registry.total_rows,
            failures: std::mem::take(&mut registry.failures),
            ..WriterReport::default()
        };

        for (key, group) in groups {
            let OutputGroup {
                path,
                mut sink,
                row_count,
                ..
            } = group;
            if let Err(e) = sink.flush() {
                let message = format!("Failed to flush {}: {e}", path.display());
                log::error!("Group {key}: {message}");
                report.failures.push(SinkFailure {
                    group: key.clone(),
                    message,
                    dropped_rows: 0,
                });
            }
            log::debug!("Closed {} ({row_count} rows)", path.display());
            report.group_row_counts.insert(key, row_count);
            report.files.push(path);
        }

        Ok(report)
    }

    fn open_group(&self, key: &str, first_row: &Row) -> Result<OutputGroup, csv::Error> {
        let path = self.output_dir.join(self.layout.file_name(key));
        let header = header_for(first_row);

        let mut sink = csv::Writer::from_path(&path)?;
        sink.write_record(&header)?;

        Ok(OutputGroup {
            path,
            header,
            sink,
            row_count: 0,
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, SinkRegistry>, WriterError> {
        self.registry.lock().map_err(|_| WriterError::Poisoned)
    }
}

/// The source id column followed by the row's other columns, sorted.
#[must_use]
pub fn header_for(row: &Row) -> Vec<String> {
    let mut columns: Vec<String> = row
        .columns()
        .filter(|c| *c != SOURCE_ID_COLUMN)
        .map(str::to_string)
        .collect();
    columns.sort_unstable();
    columns.dedup();

    let mut header = Vec::with_capacity(columns.len() + 1);
    header.push(SOURCE_ID_COLUMN.to_string());
    header.extend(columns);
    header
}
