#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions)]

//! Database access for fleet queries.
//!
//! Two kinds of connections live here:
//!
//! * the registry database, queried once per run for the list of tenant
//!   schemas ([`registry::RegistryProvider`]), and
//! * one short-lived connection per tenant schema, opened by a
//!   [`connector::SourceConnector`] and closed as soon as the query result
//!   has been read.
//!
//! Both use `sqlx`'s MySQL driver directly. No connection pool is shared
//! between sources.

pub mod connector;
pub mod db;
pub mod decode;
pub mod registry;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// Could not establish a connection.
    #[error("Connection failed: {0}")]
    Connection(String),

    /// The connection attempt did not complete within the timeout.
    #[error("Connection timeout after {secs}s")]
    ConnectTimeout {
        /// The timeout that elapsed, in seconds.
        secs: u64,
    },

    /// Query execution or result retrieval failed.
    #[error("Query failed: {0}")]
    Query(String),

    /// Registry configuration is missing or invalid.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of what went wrong.
        message: String,
    },
}

impl DbError {
    /// Whether this error happened before a connection was established.
    #[must_use]
    pub const fn is_connection(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::ConnectTimeout { .. })
    }

    /// Classifies a driver error raised while connecting.
    #[must_use]
    pub fn connecting(e: &sqlx::Error) -> Self {
        Self::Connection(e.to_string())
    }

    /// Classifies a driver error raised after the connection was open.
    #[must_use]
    pub fn querying(e: &sqlx::Error) -> Self {
        match e {
            sqlx::Error::Io(_) | sqlx::Error::Tls(_) | sqlx::Error::PoolClosed => {
                Self::Connection(e.to_string())
            }
            _ => Self::Query(e.to_string()),
        }
    }
}

impl From<DbError> for fleet_query_source::SourceError {
    fn from(e: DbError) -> Self {
        Self::Registry {
            message: e.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_the_limit() {
        let err = DbError::ConnectTimeout { secs: 15 };
        assert_eq!(err.to_string(), "Connection timeout after 15s");
        assert!(err.is_connection());
    }

    #[test]
    fn io_errors_while_querying_are_connection_errors() {
        let io = sqlx::Error::Io(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        assert!(DbError::querying(&io).is_connection());
        assert!(!DbError::querying(&sqlx::Error::RowNotFound).is_connection());
    }
}
