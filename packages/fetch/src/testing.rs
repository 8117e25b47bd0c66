//! In-memory [`SourceConnector`] for driving workers without a database.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use fleet_query_database::DbError;
use fleet_query_database::connector::{SourceConnection, SourceConnector};
use fleet_query_source_models::{Row, Secret, SourceDescriptor};

/// How a fake source responds.
#[derive(Debug, Clone)]
pub enum FakeBehavior {
    /// Connects and returns these rows.
    Rows(Vec<Row>),
    /// Refuses the connection.
    ConnectError(String),
    /// Takes this long to connect, then returns no rows.
    ConnectDelay(Duration),
    /// Connects, then fails the query.
    QueryError(String),
    /// Connects, then takes this long to return the rows.
    QueryDelay(Duration, Vec<Row>),
}

#[derive(Debug, Default)]
struct FakeState {
    closed: AtomicUsize,
    queries: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    peak: Arc<AtomicUsize>,
}

#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    behaviors: BTreeMap<String, FakeBehavior>,
    state: Arc<FakeState>,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, source_id: &str, behavior: FakeBehavior) -> Self {
        self.behaviors.insert(source_id.to_string(), behavior);
        self
    }

    /// Connections closed so far.
    pub fn closed(&self) -> usize {
        self.state.closed.load(Ordering::SeqCst)
    }

    /// Every query executed, in order.
    pub fn queries(&self) -> Vec<String> {
        self.state.queries.lock().unwrap().clone()
    }

    /// Highest number of simultaneously open connections.
    pub fn peak_in_flight(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.state.peak)
    }
}

#[async_trait]
impl SourceConnector for FakeConnector {
    async fn connect(
        &self,
        source: &SourceDescriptor,
    ) -> Result<Box<dyn SourceConnection>, DbError> {
        let behavior = self
            .behaviors
            .get(&source.id)
            .cloned()
            .ok_or_else(|| DbError::Connection(format!("unknown source {}", source.id)))?;

        match &behavior {
            FakeBehavior::ConnectError(message) => {
                return Err(DbError::Connection(message.clone()));
            }
            FakeBehavior::ConnectDelay(delay) => tokio::time::sleep(*delay).await,
            _ => {}
        }

        let now = self.state.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak.fetch_max(now, Ordering::SeqCst);

        Ok(Box::new(FakeConnection {
            behavior,
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeConnection {
    behavior: FakeBehavior,
    state: Arc<FakeState>,
}

#[async_trait]
impl SourceConnection for FakeConnection {
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>, DbError> {
        self.state.queries.lock().unwrap().push(sql.to_string());
        match &self.behavior {
            FakeBehavior::Rows(rows) => Ok(rows.clone()),
            FakeBehavior::QueryDelay(delay, rows) => {
                tokio::time::sleep(*delay).await;
                Ok(rows.clone())
            }
            FakeBehavior::QueryError(message) => Err(DbError::Query(message.clone())),
            FakeBehavior::ConnectError(_) | FakeBehavior::ConnectDelay(_) => Ok(Vec::new()),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), DbError> {
        self.state.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.state.closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// A descriptor whose schema name equals `id`.
pub fn source(id: &str) -> SourceDescriptor {
    SourceDescriptor {
        id: id.to_string(),
        host: "localhost".to_string(),
        port: 3306,
        user: "fleet".to_string(),
        password: Secret::from("secret"),
        database: id.to_string(),
    }
}
