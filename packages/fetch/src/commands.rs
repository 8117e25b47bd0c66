//! Top-level operations shared by the CLI subcommands and the interactive
//! menu.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use fleet_query_cli_utils::{IndicatifProgress, MultiProgress};
use fleet_query_database::connector::MySqlConnector;
use fleet_query_fetch_models::{FetchConfig, RunSummary, StatsReport};

use crate::queries::QuerySelection;
use crate::sources::{SourceOrigin, load_sources, print_sources};
use crate::summary::render_summary;

/// Everything a fetch run needs besides the sources themselves.
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub origin: SourceOrigin,
    pub filter: Option<String>,
    pub selection: QuerySelection,
    pub config: FetchConfig,
    pub summary_json: Option<PathBuf>,
}

/// Resolves sources, runs the query against all of them, and prints the
/// summary.
///
/// # Errors
///
/// Returns an error if sources cannot be resolved, the writer fails as a
/// whole, or the JSON summary cannot be written.
pub async fn fetch(
    multi: &MultiProgress,
    options: FetchOptions,
) -> Result<RunSummary, Box<dyn std::error::Error>> {
    let FetchOptions {
        origin,
        filter,
        selection,
        mut config,
        summary_json,
    } = options;

    let sources = load_sources(&origin, filter, config.connect_timeout).await?;
    if sources.is_empty() {
        log::warn!("No sources to query");
    }

    config.layout = selection.layout;
    let progress = IndicatifProgress::steps_bar(multi, "Schemas", sources.len() as u64);

    let summary = crate::run_fetch(
        sources,
        &selection.query,
        Arc::new(MySqlConnector),
        &config,
        progress,
    )
    .await?;

    print!("{}", render_summary(&summary));

    if let Some(path) = summary_json {
        write_summary_json(&path, &summary)?;
        log::info!("Summary written to {}", path.display());
    }

    Ok(summary)
}

/// Resolves sources and collects per-schema stats into `output_file`.
///
/// # Errors
///
/// Returns an error if sources cannot be resolved or the stats file
/// cannot be written.
pub async fn stats(
    multi: &MultiProgress,
    origin: &SourceOrigin,
    filter: Option<String>,
    config: &FetchConfig,
    output_file: &str,
) -> Result<StatsReport, Box<dyn std::error::Error>> {
    let sources = load_sources(origin, filter, config.connect_timeout).await?;
    let progress = IndicatifProgress::steps_bar(multi, "Stats", sources.len() as u64);

    let report = crate::stats::collect_stats(
        sources,
        Arc::new(MySqlConnector),
        config,
        output_file,
        progress,
    )
    .await?;

    println!(
        "Collected stats for {}/{} schemas into {}",
        report.collected,
        report.total,
        report.output_file.display()
    );
    if !report.errors.is_empty() {
        println!("{} schemas failed", report.errors.len());
    }

    Ok(report)
}

/// Resolves sources and prints them.
///
/// # Errors
///
/// Returns an error if sources cannot be resolved.
pub async fn list(
    origin: &SourceOrigin,
    filter: Option<String>,
    config: &FetchConfig,
) -> Result<(), Box<dyn std::error::Error>> {
    let sources = load_sources(origin, filter, config.connect_timeout).await?;
    print_sources(&sources);
    Ok(())
}

/// Writes `summary` as pretty JSON.
///
/// # Errors
///
/// Returns an error if the file cannot be written.
pub fn write_summary_json(path: &Path, summary: &RunSummary) -> std::io::Result<()> {
    let json = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::time::Duration;

    use super::*;

    #[test]
    fn summary_json_uses_report_field_names() {
        let path = std::env::temp_dir().join(format!(
            "fleet_query_summary_{}.json",
            std::process::id()
        ));
        let summary = RunSummary {
            total_sources: 1,
            succeeded: 1,
            failed: 0,
            duration: Duration::from_secs(2),
            total_rows_written: 4,
            group_row_counts: BTreeMap::from([("0".to_string(), 4)]),
            errors: Vec::new(),
            sink_errors: Vec::new(),
        };

        write_summary_json(&path, &summary).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["total_schemas"], 1);
        assert_eq!(json["total_rows_written"], 4);
        assert_eq!(json["group_row_counts"]["0"], 4);

        std::fs::remove_file(&path).unwrap();
    }
}
