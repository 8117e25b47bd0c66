#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Where the list of fleet sources comes from.
//!
//! A [`CredentialProvider`] yields the ordered list of
//! [`SourceDescriptor`]s a run fans out to. The production provider queries
//! the registry database (see `fleet_query_database`); [`file::SourceFile`]
//! reads a static TOML list for offline use and tests.

pub mod file;
pub mod progress;

use std::collections::BTreeSet;

use async_trait::async_trait;
use fleet_query_source_models::SourceDescriptor;

/// Environment variable holding a comma-separated list of source ids to
/// restrict a run to.
pub const SOURCES_ENV_VAR: &str = "FLEET_QUERY_SOURCES";

/// Errors that can occur while resolving the source list.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// I/O error reading a sources file.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The sources file is not valid TOML or has the wrong shape.
    #[error("Invalid sources file: {0}")]
    Toml(#[from] toml::de::Error),

    /// The registry lookup failed.
    #[error("Registry error: {message}")]
    Registry {
        /// Description of what went wrong.
        message: String,
    },

    /// Two sources share the same id.
    #[error("Duplicate source id: {0}")]
    DuplicateId(String),
}

/// Supplies the ordered list of sources a run executes against.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Retrieves every source descriptor, in a stable order.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError`] if the list cannot be retrieved.
    async fn sources(&self) -> Result<Vec<SourceDescriptor>, SourceError>;
}

/// A provider over an already-resolved list, mostly useful in tests.
#[async_trait]
impl CredentialProvider for Vec<SourceDescriptor> {
    async fn sources(&self) -> Result<Vec<SourceDescriptor>, SourceError> {
        Ok(self.clone())
    }
}

/// Checks that no two sources share an id.
///
/// # Errors
///
/// Returns [`SourceError::DuplicateId`] naming the first repeated id.
pub fn ensure_unique_ids(sources: &[SourceDescriptor]) -> Result<(), SourceError> {
    let mut seen = BTreeSet::new();
    for source in sources {
        if !seen.insert(source.id.as_str()) {
            return Err(SourceError::DuplicateId(source.id.clone()));
        }
    }
    Ok(())
}

/// Narrows `sources` to the ids named by the `--sources` CLI flag or the
/// [`SOURCES_ENV_VAR`] environment variable. If neither is set, all sources
/// are returned.
#[must_use]
pub fn enabled_sources(
    sources: Vec<SourceDescriptor>,
    cli_filter: Option<String>,
) -> Vec<SourceDescriptor> {
    let filter = cli_filter.or_else(|| std::env::var(SOURCES_ENV_VAR).ok());

    let Some(filter_str) = filter else {
        return sources;
    };

    filter_sources(sources, &filter_str)
}

/// Keeps only sources whose id appears in the comma-separated `filter_str`.
#[must_use]
pub fn filter_sources(sources: Vec<SourceDescriptor>, filter_str: &str) -> Vec<SourceDescriptor> {
    let ids: Vec<&str> = filter_str
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let available: Vec<String> = sources.iter().map(|s| s.id.clone()).collect();
    let filtered: Vec<SourceDescriptor> = sources
        .into_iter()
        .filter(|s| ids.contains(&s.id.as_str()))
        .collect();

    if filtered.is_empty() {
        log::warn!(
            "No matching sources found for filter {ids:?}. Available: {}",
            available.join(", ")
        );
    }

    filtered
}
