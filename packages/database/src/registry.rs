//! Fleet registry lookup.
//!
//! The registry database lists every tenant instance together with the
//! server hosting its schema. Only instances that are both active and
//! installed are returned.

use std::time::Duration;

use async_trait::async_trait;
use fleet_query_source::{CredentialProvider, SourceError, ensure_unique_ids};
use fleet_query_source_models::{DEFAULT_PORT, Secret, SourceDescriptor};
use sqlx::Connection as _;
use sqlx::Row as _;
use sqlx::mysql::MySqlRow;

use crate::DbError;
use crate::connector::DEFAULT_CONNECT_TIMEOUT;
use crate::db::{RegistryConfig, connect_registry};

const CREDENTIALS_QUERY: &str = "
    SELECT
        database_password,
        database_name,
        database_user,
        database_servers.name AS server_name
    FROM instances
    JOIN database_servers ON instances.database_server_id = database_servers.replica_master_id
    WHERE is_active = 1 AND is_installed = 1";

/// Builds the credentials query, optionally restricted to `instance_ids`.
///
/// Returns the SQL text; ids are bound as positional parameters in the
/// same order.
#[must_use]
pub fn credentials_sql(instance_ids: &[u64]) -> String {
    let mut sql = CREDENTIALS_QUERY.to_string();
    if !instance_ids.is_empty() {
        let placeholders = vec!["?"; instance_ids.len()].join(", ");
        sql.push_str(&format!(" AND instances.id IN ({placeholders})"));
    }
    sql.push_str(" ORDER BY database_name");
    sql
}

/// A [`CredentialProvider`] backed by the fleet registry database.
#[derive(Debug, Clone)]
pub struct RegistryProvider {
    config: RegistryConfig,
    instance_ids: Vec<u64>,
    connect_timeout: Duration,
}

impl RegistryProvider {
    /// Creates a provider for the registry described by `config`.
    #[must_use]
    pub const fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            instance_ids: Vec::new(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Restricts the lookup to the given instance ids.
    #[must_use]
    pub fn with_instance_ids(mut self, ids: Vec<u64>) -> Self {
        self.instance_ids = ids;
        self
    }

    /// Overrides the connect timeout for the registry connection.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    async fn fetch(&self) -> Result<Vec<SourceDescriptor>, DbError> {
        log::info!("Fetching schema credentials from registry database...");

        let mut conn = connect_registry(&self.config, self.connect_timeout).await?;

        let sql = credentials_sql(&self.instance_ids);
        let mut query = sqlx::query(&sql);
        for id in &self.instance_ids {
            query = query.bind(*id);
        }

        let rows = query
            .fetch_all(&mut conn)
            .await
            .map_err(|e| DbError::querying(&e))?;

        if let Err(e) = conn.close().await {
            log::warn!("Failed to close registry connection: {e}");
        }

        let sources = rows
            .iter()
            .map(descriptor_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        log::info!("Retrieved credentials for {} schemas", sources.len());
        Ok(sources)
    }
}

#[async_trait]
impl CredentialProvider for RegistryProvider {
    async fn sources(&self) -> Result<Vec<SourceDescriptor>, SourceError> {
        let rows = self.fetch().await.map_err(|e| {
            log::error!("Error fetching credentials: {e}");
            SourceError::from(e)
        })?;
        registry_sources(rows)
    }
}

/// Rejects a registry listing in which two instances share a schema name.
fn registry_sources(sources: Vec<SourceDescriptor>) -> Result<Vec<SourceDescriptor>, SourceError> {
    if let Err(e) = ensure_unique_ids(&sources) {
        log::error!("Registry lists the same schema twice: {e}");
        return Err(e);
    }
    Ok(sources)
}

fn text_column(row: &MySqlRow, column: &str) -> Result<String, DbError> {
    row.try_get_unchecked::<String, _>(column)
        .map_err(|e| DbError::Query(format!("registry column '{column}': {e}")))
}

fn descriptor_from_row(row: &MySqlRow) -> Result<SourceDescriptor, DbError> {
    let database = text_column(row, "database_name")?;
    Ok(SourceDescriptor {
        id: database.clone(),
        host: text_column(row, "server_name")?,
        port: DEFAULT_PORT,
        user: text_column(row, "database_user")?,
        password: Secret::new(text_column(row, "database_password")?),
        database,
    })
}
