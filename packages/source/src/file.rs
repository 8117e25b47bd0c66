//! Static source list loaded from a TOML file.
//!
//! Useful when the registry database is unreachable, or to run against a
//! hand-picked set of schemas:
//!
//! ```toml
//! [[sources]]
//! id = "tenant_42"
//! host = "db-7.internal"
//! user = "reader"
//! password = "..."
//! database = "tenant_42"
//! ```

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use fleet_query_source_models::SourceDescriptor;
use serde::Deserialize;

use crate::{CredentialProvider, SourceError, ensure_unique_ids};

#[derive(Debug, Deserialize)]
struct SourceFileContents {
    #[serde(default)]
    sources: Vec<SourceDescriptor>,
}

/// Parses the contents of a sources TOML file.
///
/// # Errors
///
/// Returns [`SourceError`] if the TOML is malformed or two entries share an
/// id.
pub fn parse_sources_toml(contents: &str) -> Result<Vec<SourceDescriptor>, SourceError> {
    let parsed: SourceFileContents = toml::from_str(contents)?;

    ensure_unique_ids(&parsed.sources)?;
    Ok(parsed.sources)
}

/// A [`CredentialProvider`] reading `[[sources]]` entries from disk.
#[derive(Debug, Clone)]
pub struct SourceFile {
    path: PathBuf,
}

impl SourceFile {
    /// Creates a provider for the TOML file at `path`. The file is read
    /// lazily on every call to [`CredentialProvider::sources`].
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl CredentialProvider for SourceFile {
    async fn sources(&self) -> Result<Vec<SourceDescriptor>, SourceError> {
        let contents = std::fs::read_to_string(&self.path)?;
        let sources = parse_sources_toml(&contents)?;
        log::info!(
            "Loaded {} source(s) from {}",
            sources.len(),
            self.path.display()
        );
        Ok(sources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TWO_SOURCES: &str = r#"
        [[sources]]
        id = "tenant_a"
        host = "db1"
        user = "reader"
        password = "secret-a"
        database = "tenant_a"

        [[sources]]
        id = "tenant_b"
        host = "db2"
        port = 3307
        user = "reader"
        password = "secret-b"
        database = "tenant_b"
    "#;

    #[test]
    fn parses_sources_in_file_order() {
        let sources = parse_sources_toml(TWO_SOURCES).unwrap();
        assert_eq!(sources.len(), 2);
        assert_eq!(sources[0].id, "tenant_a");
        assert_eq!(sources[0].port, 3306);
        assert_eq!(sources[1].port, 3307);
        assert_eq!(sources[1].password.expose(), "secret-b");
    }

    #[test]
    fn empty_file_has_no_sources() {
        assert!(parse_sources_toml("").unwrap().is_empty());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let doubled = format!("{TWO_SOURCES}\n{}", TWO_SOURCES.replace("tenant_b", "tenant_c"));
        let err = parse_sources_toml(&doubled).unwrap_err();
        assert!(matches!(err, SourceError::DuplicateId(id) if id == "tenant_a"));
    }

    #[test]
    fn rejects_missing_fields() {
        let err = parse_sources_toml("[[sources]]\nid = \"x\"\n").unwrap_err();
        assert!(matches!(err, SourceError::Toml(_)));
    }

    #[tokio::test]
    async fn reads_from_disk() {
        let dir = std::env::temp_dir().join("fleet_query_source_file_test");
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sources.toml");
        std::fs::write(&path, TWO_SOURCES).unwrap();

        let provider = SourceFile::new(&path);
        let sources = provider.sources().await.unwrap();
        assert_eq!(sources.len(), 2);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let provider = SourceFile::new("/nonexistent/fleet_query/sources.toml");
        assert!(matches!(
            provider.sources().await.unwrap_err(),
            SourceError::Io(_)
        ));
    }
}
