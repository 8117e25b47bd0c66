//! Interactive menu for fleet queries.
//!
//! Walks the operator through the same options the subcommands take using
//! `dialoguer` prompts.

use std::path::PathBuf;
use std::time::Duration;

use dialoguer::{Confirm, Input, Select};
use fleet_query_cli_utils::MultiProgress;
use fleet_query_fetch_models::{
    DEFAULT_CONCURRENCY, DEFAULT_CONNECT_TIMEOUT, DEFAULT_PROGRESS_FILE, FetchConfig,
};

use crate::commands::{self, FetchOptions};
use crate::queries::select_query;
use crate::sources::SourceOrigin;
use crate::stats::DEFAULT_STATS_FILE;

/// Top-level actions available in the menu.
enum Action {
    Fetch,
    Stats,
    ListSources,
}

impl Action {
    const ALL: &[Self] = &[Self::Fetch, Self::Stats, Self::ListSources];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::Fetch => "Run a query across all schemas",
            Self::Stats => "Collect schema stats",
            Self::ListSources => "List sources",
        }
    }
}

/// Built-in query choices.
enum QueryPreset {
    Simple,
    Complex,
    Custom,
}

impl QueryPreset {
    const ALL: &[Self] = &[Self::Simple, Self::Complex, Self::Custom];

    #[must_use]
    const fn label(&self) -> &'static str {
        match self {
            Self::Simple => "Case counts by copy flag",
            Self::Complex => "Tests executed per year",
            Self::Custom => "Custom SQL",
        }
    }
}

/// Runs the interactive menu.
///
/// # Errors
///
/// Returns an error if a prompt fails or the selected operation fails.
pub async fn run(multi: &MultiProgress) -> Result<(), Box<dyn std::error::Error>> {
    let labels: Vec<&str> = Action::ALL.iter().map(Action::label).collect();

    let idx = Select::new()
        .with_prompt("What would you like to do?")
        .items(&labels)
        .default(0)
        .interact()?;

    let origin = prompt_origin()?;
    let filter = prompt_optional_string("Comma-separated source ids (empty for all)")?;

    match Action::ALL[idx] {
        Action::Fetch => {
            let preset_labels: Vec<&str> =
                QueryPreset::ALL.iter().map(QueryPreset::label).collect();
            let preset = Select::new()
                .with_prompt("Which query?")
                .items(&preset_labels)
                .default(0)
                .interact()?;

            let (query, complex) = match QueryPreset::ALL[preset] {
                QueryPreset::Simple => (None, false),
                QueryPreset::Complex => (None, true),
                QueryPreset::Custom => {
                    let sql: String = Input::new().with_prompt("SQL").interact_text()?;
                    (Some(sql), false)
                }
            };

            let group_column =
                prompt_optional_string("Group output files by column (empty for default)")?;
            let selection = select_query(query, complex, group_column, None, false);
            let config = prompt_config()?;

            commands::fetch(
                multi,
                FetchOptions {
                    origin,
                    filter,
                    selection,
                    config,
                    summary_json: None,
                },
            )
            .await?;
        }
        Action::Stats => {
            let config = prompt_config()?;
            let output_file: String = Input::new()
                .with_prompt("Output file")
                .default(DEFAULT_STATS_FILE.to_string())
                .interact_text()?;
            commands::stats(multi, &origin, filter, &config, &output_file).await?;
        }
        Action::ListSources => {
            commands::list(&origin, filter, &FetchConfig::default()).await?;
        }
    }

    Ok(())
}

fn prompt_origin() -> Result<SourceOrigin, Box<dyn std::error::Error>> {
    let use_file = Confirm::new()
        .with_prompt("Read sources from a TOML file instead of the registry?")
        .default(false)
        .interact()?;

    if use_file {
        let path: String = Input::new()
            .with_prompt("Sources file")
            .default("sources.toml".to_string())
            .interact_text()?;
        return Ok(SourceOrigin::File(PathBuf::from(path)));
    }

    let ids = prompt_optional_string("Comma-separated instance ids (empty for all)")?;
    let instance_ids = ids
        .map(|raw| parse_instance_ids(&raw))
        .transpose()?
        .unwrap_or_default();
    Ok(SourceOrigin::Registry { instance_ids })
}

fn prompt_config() -> Result<FetchConfig, Box<dyn std::error::Error>> {
    let workers: String = Input::new()
        .with_prompt("Concurrent workers")
        .default(DEFAULT_CONCURRENCY.to_string())
        .interact_text()?;
    let concurrency = workers.trim().parse().unwrap_or(DEFAULT_CONCURRENCY);

    let timeout: String = Input::new()
        .with_prompt("Connect timeout (seconds)")
        .default(DEFAULT_CONNECT_TIMEOUT.as_secs().to_string())
        .interact_text()?;
    let connect_timeout = timeout
        .trim()
        .parse()
        .map_or(DEFAULT_CONNECT_TIMEOUT, Duration::from_secs);

    let output_dir: String = Input::new()
        .with_prompt("Output directory")
        .default(".".to_string())
        .interact_text()?;

    Ok(FetchConfig {
        concurrency,
        connect_timeout,
        output_dir: PathBuf::from(output_dir),
        progress_file: Some(PathBuf::from(DEFAULT_PROGRESS_FILE)),
        ..FetchConfig::default()
    })
}

fn prompt_optional_string(prompt: &str) -> Result<Option<String>, dialoguer::Error> {
    let value: String = Input::new()
        .with_prompt(prompt)
        .allow_empty(true)
        .interact_text()?;
    let value = value.trim();
    Ok(if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    })
}

/// Parses a comma-separated list of registry instance ids.
///
/// # Errors
///
/// Returns an error naming the first entry that is not a number.
pub fn parse_instance_ids(raw: &str) -> Result<Vec<u64>, String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>()
                .map_err(|e| format!("invalid instance id {s:?}: {e}"))
        })
        .collect()
}
