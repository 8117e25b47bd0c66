//! Connection settings and connect helpers.

use std::str::FromStr as _;
use std::time::Duration;

use fleet_query_source_models::{Secret, SourceDescriptor};
use sqlx::ConnectOptions as _;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlSslMode};

use crate::DbError;

/// Default name of the registry schema.
pub const DEFAULT_REGISTRY_DATABASE: &str = "testrail_meta";

/// Connection settings for the registry database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryConfig {
    /// A full `mysql://` URL (from `REGISTRY_DATABASE_URL`). Kept as a
    /// [`Secret`] since it usually embeds the password.
    Url(Secret),
    /// Discrete settings (from the `MYSQL_*` variables).
    Parts {
        /// Registry server hostname.
        host: String,
        /// Registry server port.
        port: u16,
        /// Login user.
        user: String,
        /// Login password. `None` when not configured; callers may prompt.
        password: Option<Secret>,
        /// Registry schema name.
        database: String,
    },
}

impl RegistryConfig {
    /// Reads the registry settings from the environment.
    ///
    /// `REGISTRY_DATABASE_URL` wins when set. Otherwise `MYSQL_HOST`
    /// (default `localhost`), `MYSQL_DB_PORT` (default 3306),
    /// `MYSQL_DB_USER`, `MYSQL_DB_PASSWORD` and `MYSQL_DB_NAME` (default
    /// [`DEFAULT_REGISTRY_DATABASE`]) are used.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if `MYSQL_DB_USER` is missing or
    /// `MYSQL_DB_PORT` is not a valid port.
    pub fn from_env() -> Result<Self, DbError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Self::from_env`] but reads variables through `lookup`.
    ///
    /// # Errors
    ///
    /// See [`Self::from_env`].
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, DbError> {
        if let Some(url) = lookup("REGISTRY_DATABASE_URL") {
            return Ok(Self::Url(Secret::new(url)));
        }

        let host = lookup("MYSQL_HOST").unwrap_or_else(|| "localhost".to_string());
        let port = match lookup("MYSQL_DB_PORT") {
            Some(raw) => raw.trim().parse::<u16>().map_err(|e| DbError::Config {
                message: format!("MYSQL_DB_PORT={raw:?} is not a valid port: {e}"),
            })?,
            None => fleet_query_source_models::DEFAULT_PORT,
        };
        let user = lookup("MYSQL_DB_USER").ok_or_else(|| DbError::Config {
            message: "MYSQL_DB_USER is not set (or set REGISTRY_DATABASE_URL)".to_string(),
        })?;
        let password = lookup("MYSQL_DB_PASSWORD").map(Secret::from);
        let database =
            lookup("MYSQL_DB_NAME").unwrap_or_else(|| DEFAULT_REGISTRY_DATABASE.to_string());

        Ok(Self::Parts {
            host,
            port,
            user,
            password,
            database,
        })
    }

    /// Whether a password still has to be supplied before connecting.
    #[must_use]
    pub const fn needs_password(&self) -> bool {
        matches!(self, Self::Parts { password: None, .. })
    }

    /// Fills in a password obtained elsewhere (e.g. an interactive prompt).
    pub fn set_password(&mut self, secret: Secret) {
        if let Self::Parts { password, .. } = self {
            *password = Some(secret);
        }
    }

    /// Builds `sqlx` connect options.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the URL form cannot be parsed.
    pub fn connect_options(&self) -> Result<MySqlConnectOptions, DbError> {
        match self {
            Self::Url(url) => {
                MySqlConnectOptions::from_str(url.expose()).map_err(|e| DbError::Config {
                    message: format!("invalid REGISTRY_DATABASE_URL: {e}"),
                })
            }
            Self::Parts {
                host,
                port,
                user,
                password,
                database,
            } => {
                let options = MySqlConnectOptions::new()
                    .host(host)
                    .port(*port)
                    .username(user)
                    .database(database);
                Ok(match password {
                    Some(secret) => options.password(secret.expose()),
                    None => options,
                })
            }
        }
    }
}

/// Builds connect options for a single fleet source.
///
/// Built field by field so credentials never pass through a URL string.
#[must_use]
pub fn source_connect_options(source: &SourceDescriptor) -> MySqlConnectOptions {
    MySqlConnectOptions::new()
        .host(&source.host)
        .port(source.port)
        .username(&source.user)
        .password(source.password.expose())
        .database(&source.database)
}

/// Opens a single connection.
///
/// If the server rejects the handshake with a TLS-related error the
/// attempt is repeated once with TLS required.
///
/// # Errors
///
/// Returns [`DbError::Connection`] if both attempts fail.
pub async fn connect(options: MySqlConnectOptions) -> Result<MySqlConnection, DbError> {
    match options.connect().await {
        Ok(conn) => Ok(conn),
        Err(e) => {
            let msg = e.to_string().to_lowercase();
            if msg.contains("ssl") || msg.contains("tls") {
                log::debug!("Retrying connection with TLS required: {e}");
                options
                    .ssl_mode(MySqlSslMode::Required)
                    .connect()
                    .await
                    .map_err(|e| DbError::connecting(&e))
            } else {
                Err(DbError::connecting(&e))
            }
        }
    }
}

/// Runs a connect future, giving up after `timeout`.
///
/// # Errors
///
/// Returns [`DbError::ConnectTimeout`] when the deadline passes, or the
/// error of the connect future itself.
pub async fn with_connect_timeout<T>(
    timeout: Duration,
    connect: impl Future<Output = Result<T, DbError>> + Send,
) -> Result<T, DbError> {
    tokio::time::timeout(timeout, connect)
        .await
        .unwrap_or(Err(DbError::ConnectTimeout {
            secs: timeout.as_secs(),
        }))
}

/// [`connect`] bounded by `timeout`; TLS retry shares the same deadline.
///
/// # Errors
///
/// See [`connect`] and [`with_connect_timeout`].
pub async fn connect_with_timeout(
    options: MySqlConnectOptions,
    timeout: Duration,
) -> Result<MySqlConnection, DbError> {
    with_connect_timeout(timeout, connect(options)).await
}

/// Opens a connection to the registry database.
///
/// # Errors
///
/// Returns [`DbError`] if the configuration is incomplete or the
/// connection fails.
pub async fn connect_registry(
    config: &RegistryConfig,
    timeout: Duration,
) -> Result<MySqlConnection, DbError> {
    let options = config.connect_options()?;
    connect_with_timeout(options, timeout).await
}
