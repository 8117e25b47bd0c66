//! Resolving the list of sources a run targets.

use std::io::IsTerminal as _;
use std::path::PathBuf;
use std::time::Duration;

use fleet_query_database::db::RegistryConfig;
use fleet_query_database::registry::RegistryProvider;
use fleet_query_source::file::SourceFile;
use fleet_query_source::{CredentialProvider, enabled_sources};
use fleet_query_source_models::{Secret, SourceDescriptor};

/// Where source credentials come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    /// A TOML file of `[[sources]]` entries.
    File(PathBuf),
    /// The registry database, optionally narrowed to some instance ids.
    Registry {
        /// Instance ids to keep. Empty means every active instance.
        instance_ids: Vec<u64>,
    },
}

impl SourceOrigin {
    /// A file origin when `sources_file` is given, the registry otherwise.
    #[must_use]
    pub fn from_options(sources_file: Option<PathBuf>, instance_ids: Vec<u64>) -> Self {
        sources_file.map_or(Self::Registry { instance_ids }, Self::File)
    }
}

/// Loads sources from `origin` and narrows them by `filter` (or the
/// `FLEET_QUERY_SOURCES` environment variable).
///
/// When the registry password is not configured and a terminal is
/// attached, it is prompted for.
///
/// # Errors
///
/// Returns an error if the registry settings are invalid, the prompt
/// fails, or the provider cannot list sources.
pub async fn load_sources(
    origin: &SourceOrigin,
    filter: Option<String>,
    connect_timeout: Duration,
) -> Result<Vec<SourceDescriptor>, Box<dyn std::error::Error>> {
    let sources = match origin {
        SourceOrigin::File(path) => SourceFile::new(path).sources().await?,
        SourceOrigin::Registry { instance_ids } => {
            let mut config = RegistryConfig::from_env()?;
            if config.needs_password() {
                if std::io::stdin().is_terminal() {
                    config.set_password(prompt_password()?);
                } else {
                    log::warn!("MYSQL_DB_PASSWORD is not set; connecting without a password");
                }
            }

            RegistryProvider::new(config)
                .with_instance_ids(instance_ids.clone())
                .with_connect_timeout(connect_timeout)
                .sources()
                .await?
        }
    };

    Ok(enabled_sources(sources, filter))
}

fn prompt_password() -> Result<Secret, dialoguer::Error> {
    let password = dialoguer::Password::new()
        .with_prompt("Registry database password")
        .allow_empty_password(true)
        .interact()?;
    Ok(Secret::new(password))
}

/// Prints a table of `sources`.
pub fn print_sources(sources: &[SourceDescriptor]) {
    println!("{:<32} {:<40} DATABASE", "ID", "HOST");
    println!("{}", "-".repeat(90));
    for source in sources {
        println!(
            "{:<32} {:<40} {}",
            source.id,
            format!("{}:{}", source.host, source.port),
            source.database
        );
    }
    println!("\n{} source(s)", sources.len());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sources_file_takes_precedence() {
        assert_eq!(
            SourceOrigin::from_options(Some(PathBuf::from("fleet.toml")), vec![1]),
            SourceOrigin::File(PathBuf::from("fleet.toml"))
        );
        assert_eq!(
            SourceOrigin::from_options(None, vec![1, 2]),
            SourceOrigin::Registry {
                instance_ids: vec![1, 2]
            }
        );
    }

    #[tokio::test]
    async fn loads_and_filters_file_sources() {
        let path = std::env::temp_dir().join(format!(
            "fleet_query_load_sources_{}.toml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            r#"
[[sources]]
id = "tenant_a"
host = "db1"
user = "u"
password = "p"
database = "tenant_a"

[[sources]]
id = "tenant_b"
host = "db2"
user = "u"
password = "p"
database = "tenant_b"
"#,
        )
        .unwrap();

        let sources = load_sources(
            &SourceOrigin::File(path.clone()),
            Some("tenant_b".to_string()),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].id, "tenant_b");
        assert_eq!(sources[0].port, 3306);

        std::fs::remove_file(&path).unwrap();
    }
}
