//! One-connection-per-source access to fleet schemas.
//!
//! A [`SourceConnector`] opens a fresh [`SourceConnection`] for every
//! source; nothing is pooled or reused, so connection trouble in one tenant
//! cannot leak into another.

use std::time::Duration;

use async_trait::async_trait;
use fleet_query_source_models::{Row, SourceDescriptor};
use sqlx::Connection as _;
use sqlx::mysql::MySqlConnection;

use crate::DbError;
use crate::db::{self, source_connect_options};
use crate::decode::decode_row;

/// Default connect timeout for a single source.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Opens connections to individual sources.
#[async_trait]
pub trait SourceConnector: Send + Sync {
    /// Opens a new connection to `source`.
    ///
    /// Callers bound this with their own connect timeout (see
    /// [`crate::db::with_connect_timeout`]).
    ///
    /// # Errors
    ///
    /// Returns a connection-class [`DbError`] if the source is unreachable
    /// or rejects the credentials.
    async fn connect(
        &self,
        source: &SourceDescriptor,
    ) -> Result<Box<dyn SourceConnection>, DbError>;
}

/// An open connection to one source.
#[async_trait]
pub trait SourceConnection: Send {
    /// Executes `sql` and reads the complete result set, in order.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if execution or row retrieval fails.
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, DbError>;

    /// Closes the connection gracefully.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the server did not acknowledge the close.
    async fn close(self: Box<Self>) -> Result<(), DbError>;
}

/// [`SourceConnector`] for MySQL-compatible fleet schemas.
#[derive(Debug, Default, Clone, Copy)]
pub struct MySqlConnector;

#[async_trait]
impl SourceConnector for MySqlConnector {
    async fn connect(
        &self,
        source: &SourceDescriptor,
    ) -> Result<Box<dyn SourceConnection>, DbError> {
        let conn = db::connect(source_connect_options(source)).await?;
        Ok(Box::new(MySqlSourceConnection { conn }))
    }
}

struct MySqlSourceConnection {
    conn: MySqlConnection,
}

#[async_trait]
impl SourceConnection for MySqlSourceConnection {
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, DbError> {
        let rows = sqlx::query(sql)
            .fetch_all(&mut self.conn)
            .await
            .map_err(|e| DbError::querying(&e))?;

        Ok(rows.iter().map(decode_row).collect())
    }

    async fn close(self: Box<Self>) -> Result<(), DbError> {
        self.conn.close().await.map_err(|e| DbError::querying(&e))
    }
}
