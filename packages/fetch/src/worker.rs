//! Single-source fetch: connect, query, close.
//!
//! A [`SourceWorker`] never returns an error. Every failure is folded into a
//! [`FetchResult::Failure`].

use std::sync::Arc;
use std::time::{Duration, Instant};

use fleet_query_database::DbError;
use fleet_query_database::connector::SourceConnector;
use fleet_query_database::db::with_connect_timeout;
use fleet_query_fetch_models::WorkerPhase;
use fleet_query_source_models::{Row, SourceDescriptor};

use crate::active::ActiveWorkers;

/// Why a source produced no rows.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FetchError {
    /// Connecting failed or timed out.
    #[error("{0}")]
    Connection(String),

    /// The query failed during execution or row retrieval.
    #[error("{0}")]
    Query(String),

    /// The worker task itself failed (panicked or was cancelled).
    #[error("Unexpected error: {0}")]
    Task(String),
}

impl From<DbError> for FetchError {
    fn from(e: DbError) -> Self {
        if e.is_connection() {
            Self::Connection(e.to_string())
        } else {
            match e {
                DbError::Query(message) => Self::Query(format!("Query failed: {message}")),
                other => Self::Query(other.to_string()),
            }
        }
    }
}

/// The outcome of running the query against one source.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchResult {
    /// The query returned a result set (possibly empty).
    Success {
        /// Source that produced the rows.
        source_id: String,
        /// Rows in result-set order.
        rows: Vec<Row>,
    },
    /// The source could not be queried.
    Failure {
        /// Source that failed.
        source_id: String,
        /// What went wrong.
        error: FetchError,
    },
}

impl FetchResult {
    /// The source this result belongs to.
    #[must_use]
    pub fn source_id(&self) -> &str {
        match self {
            Self::Success { source_id, .. } | Self::Failure { source_id, .. } => source_id,
        }
    }

    /// Whether the source returned a result set.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

/// Runs the fleet query against one source at a time.
///
/// Cheap to clone; every spawned task gets its own copy.
#[derive(Clone)]
pub struct SourceWorker {
    connector: Arc<dyn SourceConnector>,
    active: Arc<ActiveWorkers>,
    connect_timeout: Duration,
}

impl SourceWorker {
    /// Creates a worker that opens connections through `connector` and
    /// reports its phases into `active`.
    #[must_use]
    pub fn new(
        connector: Arc<dyn SourceConnector>,
        active: Arc<ActiveWorkers>,
        connect_timeout: Duration,
    ) -> Self {
        Self {
            connector,
            active,
            connect_timeout,
        }
    }

    /// Registry this worker reports into.
    #[must_use]
    pub const fn active(&self) -> &Arc<ActiveWorkers> {
        &self.active
    }

    /// Opens one connection to `source`, runs `query`, reads every row and
    /// closes the connection.
    pub async fn run(&self, source: &SourceDescriptor, query: &str) -> FetchResult {
        let source_id = source.id.clone();
        let guard = self.active.register(&source_id);
        let start = Instant::now();

        let connecting = self.connector.connect(source);
        let mut conn = match with_connect_timeout(self.connect_timeout, connecting).await {
            Ok(conn) => conn,
            Err(e) => {
                log::error!("Connection failed for {source_id}: {e}");
                return FetchResult::Failure {
                    source_id,
                    error: e.into(),
                };
            }
        };

        guard.set_phase(WorkerPhase::Querying);
        let queried = conn.query(query).await;

        if let Err(e) = conn.close().await {
            log::warn!("Failed to close connection for {source_id}: {e}");
        }

        match queried {
            Ok(rows) => {
                log::info!(
                    "Successfully fetched data from {source_id}: {} rows in {:.1}s",
                    rows.len(),
                    start.elapsed().as_secs_f64()
                );
                FetchResult::Success { source_id, rows }
            }
            Err(e) => {
                log::error!("Error fetching from {source_id}: {e}");
                FetchResult::Failure {
                    source_id,
                    error: e.into(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use fleet_query_source_models::Value;

    use super::*;
    use crate::testing::{FakeBehavior, FakeConnector, source};

    fn worker(connector: FakeConnector, timeout: Duration) -> SourceWorker {
        SourceWorker::new(
            Arc::new(connector),
            Arc::new(ActiveWorkers::new()),
            timeout,
        )
    }

    #[tokio::test]
    async fn success_preserves_row_order() {
        let rows = vec![
            Row::new().with("n", 3),
            Row::new().with("n", 1),
            Row::new().with("n", 2),
        ];
        let connector = FakeConnector::new().with("a", FakeBehavior::Rows(rows.clone()));
        let w = worker(connector.clone(), Duration::from_secs(1));

        let result = w.run(&source("a"), "SELECT n").await;
        assert_eq!(
            result,
            FetchResult::Success {
                source_id: "a".to_string(),
                rows
            }
        );
        assert!(w.active().is_empty());
        assert_eq!(connector.closed(), 1);
        assert_eq!(connector.queries(), vec!["SELECT n".to_string()]);
    }

    #[tokio::test]
    async fn connect_failure_is_captured() {
        let connector =
            FakeConnector::new().with("a", FakeBehavior::ConnectError("access denied".into()));
        let w = worker(connector, Duration::from_secs(1));

        let result = w.run(&source("a"), "SELECT 1").await;
        let FetchResult::Failure { source_id, error } = result else {
            panic!("expected failure");
        };
        assert_eq!(source_id, "a");
        assert!(matches!(error, FetchError::Connection(ref m) if m.contains("access denied")));
        assert!(w.active().is_empty());
    }

    #[tokio::test]
    async fn slow_connect_times_out() {
        let connector =
            FakeConnector::new().with("a", FakeBehavior::ConnectDelay(Duration::from_secs(5)));
        let w = worker(connector, Duration::from_millis(20));

        let result = w.run(&source("a"), "SELECT 1").await;
        let FetchResult::Failure { error, .. } = result else {
            panic!("expected failure");
        };
        assert_eq!(
            error,
            FetchError::Connection("Connection timeout after 0s".to_string())
        );
    }

    #[tokio::test]
    async fn query_failure_still_closes_connection() {
        let connector =
            FakeConnector::new().with("a", FakeBehavior::QueryError("no such table".into()));
        let w = worker(connector.clone(), Duration::from_secs(1));

        let result = w.run(&source("a"), "SELECT * FROM nope").await;
        let FetchResult::Failure { error, .. } = result else {
            panic!("expected failure");
        };
        assert_eq!(error, FetchError::Query("Query failed: no such table".into()));
        assert_eq!(connector.closed(), 1);
    }

    #[tokio::test]
    async fn phase_is_querying_while_query_runs() {
        let connector = FakeConnector::new().with(
            "a",
            FakeBehavior::QueryDelay(
                Duration::from_millis(200),
                vec![Row::new().with("n", Value::Null)],
            ),
        );
        let w = worker(connector, Duration::from_secs(1));
        let active = Arc::clone(w.active());

        let handle = tokio::spawn(async move { w.run(&source("a"), "SELECT n").await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        let snapshot = active.snapshot();
        assert_eq!(
            snapshot.threads["Worker-a"].phase,
            WorkerPhase::Querying
        );

        assert!(handle.await.unwrap().is_success());
        assert!(active.is_empty());
    }
}
