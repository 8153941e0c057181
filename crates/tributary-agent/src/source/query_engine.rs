//! Generic relational query engine
//!
//! Shared by every SQL source. The engine never keeps a connection open
//! between operations: each call connects (with retry), probes, does its
//! work and closes again. Dialects only contribute the connection string
//! and the catalog query.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

use tributary_rdbc::connection::{Connection, ConnectionConfig, ConnectionFactory};
use tributary_rdbc::dialect::{ConnectParams, SqlDialect};
use tributary_rdbc::schema::SchemaSnapshot;
use tributary_rdbc::types::Row;

use crate::error::{ConnectorError, ConnectorResult};
use crate::retry::{retry, RetryConfig};

/// Application name reported to the database server
const APPLICATION_NAME: &str = "tributary";

/// Connection, introspection and statement execution for one database
pub struct QueryEngine {
    dialect: Box<dyn SqlDialect>,
    params: ConnectParams,
    factory: Arc<dyn ConnectionFactory>,
    retry: RetryConfig,
    connect_timeout_ms: u64,
    excluded: Vec<String>,
    snapshot: RwLock<Option<SchemaSnapshot>>,
}

impl QueryEngine {
    /// Create an engine
    pub fn new(
        dialect: Box<dyn SqlDialect>,
        params: ConnectParams,
        factory: Arc<dyn ConnectionFactory>,
    ) -> Self {
        Self {
            dialect,
            params,
            factory,
            retry: RetryConfig::default(),
            connect_timeout_ms: 10_000,
            excluded: Vec::new(),
            snapshot: RwLock::new(None),
        }
    }

    /// Set the connect retry policy
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Schemas to leave out of catalog introspection, on top of the
    /// dialect's system schemas
    pub fn with_excluded(mut self, excluded: Vec<String>) -> Self {
        self.excluded = excluded;
        self
    }

    /// Dialect in use
    pub fn dialect(&self) -> &dyn SqlDialect {
        self.dialect.as_ref()
    }

    /// Configured exclusion list
    pub fn excluded(&self) -> &[String] {
        &self.excluded
    }

    /// Open a connection and probe it.
    ///
    /// Retriable failures (connect refused, timeouts) are retried with
    /// backoff. A connection whose probe fails is closed before the error
    /// is returned.
    pub async fn connect(&self) -> ConnectorResult<Box<dyn Connection>> {
        self.connect_with(&self.retry).await
    }

    async fn connect_with(&self, policy: &RetryConfig) -> ConnectorResult<Box<dyn Connection>> {
        let url = self.dialect.connection_string(&self.params)?;
        let config = ConnectionConfig::new(url)
            .with_connect_timeout(self.connect_timeout_ms)
            .with_application_name(APPLICATION_NAME);

        let factory = &self.factory;
        let config = &config;
        let what = format!("{} connect", self.dialect.name());

        retry(policy, &what, || async move {
            let conn = factory.connect(config).await?;
            if let Err(e) = conn.ping().await {
                let _ = conn.close().await;
                return Err(e);
            }
            Ok::<_, tributary_rdbc::Error>(conn)
        })
        .await
        .map_err(|e| match e {
            ConnectorError::Database(db) if db.is_retriable() => {
                ConnectorError::connection(format!(
                    "{} at {}:{} unreachable: {}",
                    self.dialect.name(),
                    self.params.host,
                    self.params.port,
                    db
                ))
            }
            other => other,
        })
    }

    /// Close a connection, logging failures
    pub async fn release(&self, conn: Box<dyn Connection>) {
        if let Err(e) = conn.close().await {
            warn!(dialect = self.dialect.name(), error = %e, "Failed to close connection");
        }
    }

    /// Transient reachability check: open, probe, close.
    ///
    /// A single attempt without backoff, so a dead database costs at most
    /// one connect timeout.
    pub async fn probe(&self) -> bool {
        match self.connect_with(&RetryConfig::no_retry()).await {
            Ok(conn) => {
                self.release(conn).await;
                true
            }
            Err(e) => {
                debug!(dialect = self.dialect.name(), error = %e, "Probe failed");
                false
            }
        }
    }

    /// Run a statement on a fresh connection
    pub async fn query(&self, sql: &str) -> ConnectorResult<Vec<Row>> {
        let conn = self.connect().await?;
        let rows = conn.query(sql).await;
        self.release(conn).await;
        Ok(rows?)
    }

    /// Run the catalog query and keep the resulting snapshot
    pub async fn query_schema(&self) -> ConnectorResult<SchemaSnapshot> {
        let sql = self.dialect.catalog_query(&self.excluded);
        let rows = self.query(&sql).await?;
        let snapshot = SchemaSnapshot::from_rows(&rows)
            .map_err(|e| ConnectorError::Schema(e.to_string()))?;

        info!(
            dialect = self.dialect.name(),
            columns = snapshot.len(),
            tables = snapshot.tables().len(),
            "Schema snapshot taken"
        );
        *self.snapshot.write() = Some(snapshot.clone());
        Ok(snapshot)
    }

    /// Run `sql` and merge its first row into `extra`, along with the
    /// `table` and `db` keys
    pub async fn query_meta(
        &self,
        sql: &str,
        table: &str,
        db: &str,
        mut extra: Map<String, Value>,
    ) -> ConnectorResult<Map<String, Value>> {
        let rows = self.query(sql).await?;
        if let Some(row) = rows.first() {
            extra.extend(row.to_json_map());
        }
        extra.insert("table".to_string(), Value::String(table.to_string()));
        extra.insert("db".to_string(), Value::String(db.to_string()));
        Ok(extra)
    }

    /// Last schema snapshot, if one was taken
    pub fn snapshot(&self) -> Option<SchemaSnapshot> {
        self.snapshot.read().clone()
    }
}

impl std::fmt::Debug for QueryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryEngine")
            .field("dialect", &self.dialect.name())
            .field("params", &self.params)
            .field("excluded", &self.excluded)
            .field("has_snapshot", &self.snapshot.read().is_some())
            .finish()
    }
}
