#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for running one query across the whole fleet.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use fleet_query_fetch::commands::{self, FetchOptions};
use fleet_query_fetch::interactive::parse_instance_ids;
use fleet_query_fetch::queries::select_query;
use fleet_query_fetch::sources::SourceOrigin;
use fleet_query_fetch::stats::DEFAULT_STATS_FILE;
use fleet_query_fetch_models::{DEFAULT_PROGRESS_FILE, FetchConfig, OutputLayout};

#[derive(Parser)]
#[command(
    name = "fleet_query_fetch",
    about = "Run one query against every schema in the fleet"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a query against every schema and write grouped CSV files
    Run {
        /// SQL to run on each schema (defaults to case counts by copy flag)
        #[arg(long)]
        query: Option<String>,
        /// Run the built-in tests-executed-per-year query
        #[arg(long)]
        complex: bool,
        /// Column to group output files by (default: `copy`, or a single
        /// `complex.csv` with `--complex`)
        #[arg(long)]
        group_column: Option<String>,
        /// Write every row to one `schema_results.csv`
        #[arg(long, conflicts_with = "group_column")]
        ungrouped: bool,
        /// Write every row to this single file instead of grouping
        #[arg(long)]
        output_file: Option<String>,
        /// Write the run summary as JSON to this path
        #[arg(long)]
        summary_json: Option<PathBuf>,
        #[command(flatten)]
        run: RunArgs,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// Collect per-schema case and test counts into one CSV
    Stats {
        /// Stats file name inside the output directory
        #[arg(long, default_value = DEFAULT_STATS_FILE)]
        output_file: String,
        #[command(flatten)]
        run: RunArgs,
        #[command(flatten)]
        source: SourceArgs,
    },
    /// List the schemas a run would target
    Sources {
        #[command(flatten)]
        source: SourceArgs,
        /// Registry connect timeout in seconds
        #[arg(long, default_value = "15")]
        connect_timeout: u64,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Max concurrent workers
    #[arg(long, default_value = "10")]
    workers: usize,
    /// Directory to save CSV files
    #[arg(long, default_value = ".")]
    output_dir: PathBuf,
    /// Per-schema connect timeout in seconds
    #[arg(long, default_value = "15")]
    connect_timeout: u64,
    /// Where to write the live progress snapshot
    #[arg(long, default_value = DEFAULT_PROGRESS_FILE)]
    progress_file: PathBuf,
    /// Seconds between progress snapshots
    #[arg(long, default_value = "5")]
    progress_interval: u64,
    /// Do not write a progress snapshot
    #[arg(long)]
    no_progress_file: bool,
}

impl RunArgs {
    fn into_config(self) -> FetchConfig {
        FetchConfig {
            concurrency: self.workers,
            connect_timeout: Duration::from_secs(self.connect_timeout),
            output_dir: self.output_dir,
            layout: OutputLayout::Ungrouped,
            progress_file: (!self.no_progress_file).then_some(self.progress_file),
            progress_interval: Duration::from_secs(self.progress_interval.max(1)),
        }
    }
}

#[derive(Args)]
struct SourceArgs {
    /// Read sources from this TOML file instead of the registry database
    #[arg(long)]
    sources_file: Option<PathBuf>,
    /// Comma-separated registry instance ids to restrict the run to
    #[arg(long)]
    instance_ids: Option<String>,
    /// Comma-separated schema names to run against (overrides
    /// `FLEET_QUERY_SOURCES` env var)
    #[arg(long)]
    sources: Option<String>,
}

impl SourceArgs {
    fn origin(&self) -> Result<SourceOrigin, String> {
        let instance_ids = self
            .instance_ids
            .as_deref()
            .map(parse_instance_ids)
            .transpose()?
            .unwrap_or_default();
        Ok(SourceOrigin::from_options(
            self.sources_file.clone(),
            instance_ids,
        ))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = fleet_query_cli_utils::init_logger();
    let cli = Cli::parse();

    let Some(command) = cli.command else {
        return fleet_query_fetch::interactive::run(&multi).await;
    };

    match command {
        Commands::Run {
            query,
            complex,
            group_column,
            ungrouped,
            output_file,
            summary_json,
            run,
            source,
        } => {
            let origin = source.origin()?;
            let selection = select_query(query, complex, group_column, output_file, ungrouped);
            let summary = commands::fetch(
                &multi,
                FetchOptions {
                    origin,
                    filter: source.sources,
                    selection,
                    config: run.into_config(),
                    summary_json,
                },
            )
            .await?;

            if summary.succeeded == 0 && summary.total_sources > 0 {
                log::error!("Every schema failed");
            }
        }
        Commands::Stats {
            output_file,
            run,
            source,
        } => {
            let origin = source.origin()?;
            commands::stats(
                &multi,
                &origin,
                source.sources,
                &run.into_config(),
                &output_file,
            )
            .await?;
        }
        Commands::Sources {
            source,
            connect_timeout,
        } => {
            let origin = source.origin()?;
            let config = FetchConfig {
                connect_timeout: Duration::from_secs(connect_timeout),
                ..FetchConfig::default()
            };
            commands::list(&origin, source.sources, &config).await?;
        }
    }

    Ok(())
}
