#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Fleet fetch configuration, live worker state, and run summary types.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display, EnumString};

/// Name of the column that carries the source id in every output file.
pub const SOURCE_ID_COLUMN: &str = "schema";

/// Group key used when rows are not partitioned.
pub const ALL_GROUP: &str = "all";

/// Group key for rows that lack the grouping column or hold `NULL` in it.
pub const UNKNOWN_GROUP: &str = "unknown";

/// Output file name used when grouping is disabled and no single-file
/// name was given.
pub const DEFAULT_RESULTS_FILE: &str = "schema_results.csv";

/// Default location of the live progress artifact.
pub const DEFAULT_PROGRESS_FILE: &str = "thread_progress.json";

/// Default number of sources queried at once.
pub const DEFAULT_CONCURRENCY: usize = 10;

/// Default interval between progress artifact writes.
pub const DEFAULT_PROGRESS_INTERVAL: Duration = Duration::from_secs(5);

/// Default connect timeout for a single source.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// A milestone is logged every time this many rows have been written.
pub const ROW_LOG_INTERVAL: u64 = 10_000;

/// How result rows are partitioned into output files.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum OutputLayout {
    /// One file per distinct value of `column`, named `<column>_<value>.csv`.
    Grouped {
        /// Column whose value selects the output file.
        column: String,
    },
    /// Every row goes to one file with the given name.
    Single {
        /// Output file name.
        file_name: String,
    },
    /// Every row goes to [`DEFAULT_RESULTS_FILE`].
    Ungrouped,
}

impl OutputLayout {
    /// Resolves the layout from the CLI options. A single-file override
    /// always wins over a grouping column.
    #[must_use]
    pub fn from_options(group_column: Option<String>, single_file: Option<String>) -> Self {
        match (single_file, group_column) {
            (Some(file_name), _) => Self::Single { file_name },
            (None, Some(column)) => Self::Grouped { column },
            (None, None) => Self::Ungrouped,
        }
    }

    /// The grouping column, if rows are partitioned.
    #[must_use]
    pub fn group_column(&self) -> Option<&str> {
        match self {
            Self::Grouped { column } => Some(column),
            Self::Single { .. } | Self::Ungrouped => None,
        }
    }

    /// File name for the sink of `group_key`.
    ///
    /// Path separators in the key are replaced so a group value can never
    /// escape the output directory.
    #[must_use]
    pub fn file_name(&self, group_key: &str) -> String {
        match self {
            Self::Grouped { column } => {
                let key: String = group_key
                    .chars()
                    .map(|c| if matches!(c, '/' | '\\') { '_' } else { c })
                    .collect();
                format!("{column}_{key}.csv")
            }
            Self::Single { file_name } => file_name.clone(),
            Self::Ungrouped => DEFAULT_RESULTS_FILE.to_string(),
        }
    }
}

/// Configuration for a fleet fetch run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    /// Maximum number of sources queried concurrently.
    pub concurrency: usize,
    /// Connect timeout applied to every source.
    pub connect_timeout: Duration,
    /// Directory output files are written to.
    pub output_dir: PathBuf,
    /// How rows are partitioned into files.
    pub layout: OutputLayout,
    /// Where the live progress artifact is written. `None` disables it.
    pub progress_file: Option<PathBuf>,
    /// How often the progress artifact is rewritten.
    pub progress_interval: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: DEFAULT_CONCURRENCY,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            output_dir: PathBuf::from("."),
            layout: OutputLayout::Ungrouped,
            progress_file: Some(PathBuf::from(DEFAULT_PROGRESS_FILE)),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
        }
    }
}

/// The in-flight phase of a source worker.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum WorkerPhase {
    /// Establishing the connection.
    Connecting,
    /// Executing the query and reading rows.
    Querying,
}

/// Live state of one in-flight source worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveWorkerState {
    /// Source being worked on.
    #[serde(rename = "schema")]
    pub source_id: String,
    /// Current phase.
    #[serde(rename = "status")]
    pub phase: WorkerPhase,
    /// When the worker started on this source.
    #[serde(rename = "start_time")]
    pub started_at: DateTime<Utc>,
}

/// The document written to the progress artifact on every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    /// When the snapshot was taken.
    pub timestamp: DateTime<Utc>,
    /// Number of workers currently in flight.
    pub active_threads: usize,
    /// In-flight workers keyed by worker id (`Worker-<source id>`).
    pub threads: BTreeMap<String, ActiveWorkerState>,
}

/// A source that failed to produce rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceFailure {
    /// The failed source.
    #[serde(rename = "schema")]
    pub source_id: String,
    /// Human-readable failure description.
    #[serde(rename = "error")]
    pub message: String,
}

/// An output sink that could not be opened or written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SinkFailure {
    /// Group whose sink failed.
    pub group: String,
    /// Human-readable failure description.
    pub message: String,
    /// Rows for this group that were not written.
    #[serde(default)]
    pub dropped_rows: u64,
}

/// Final outcome of a fleet fetch run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Number of sources the run was started with.
    #[serde(rename = "total_schemas")]
    pub total_sources: usize,
    /// Sources that returned a result set.
    #[serde(rename = "successful")]
    pub succeeded: usize,
    /// Sources that failed to connect or query.
    pub failed: usize,
    /// Wall-clock duration of the run.
    #[serde(rename = "duration_seconds", with = "duration_seconds")]
    pub duration: Duration,
    /// Rows written across every group.
    pub total_rows_written: u64,
    /// Rows written per group key.
    pub group_row_counts: BTreeMap<String, u64>,
    /// Failed sources, in the order their results arrived.
    pub errors: Vec<SourceFailure>,
    /// Sink open/write failures.
    #[serde(default)]
    pub sink_errors: Vec<SinkFailure>,
}

/// Outcome of a stats collection run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsReport {
    /// Number of sources queried.
    pub total: usize,
    /// Number of sources whose stats were collected.
    pub collected: usize,
    /// Failed sources.
    pub errors: Vec<SourceFailure>,
    /// Path of the written stats file.
    pub output_file: PathBuf,
}

mod duration_seconds {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(duration.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}
