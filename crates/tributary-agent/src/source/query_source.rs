//! Relational query source
//!
//! A `QuerySource` does not stream on its own. It takes a schema snapshot
//! at `init`, and after the handshake executes statements delivered with
//! `SourceQuery`, emitting one event per result row. MySQL and PostgreSQL
//! differ only in the [`QueryEngine`] they are built with.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tracing::{error, info};

use super::action::{Action, ActionDescription, SOURCE_QUERY};
use super::lifecycle::SourceBase;
use super::query_engine::QueryEngine;
use super::Source;
use crate::error::{ConnectorError, ConnectorResult, SourceStatus};
use crate::event::Event;

/// Source executing ad hoc statements against one database
pub struct QuerySource {
    base: SourceBase,
    engine: QueryEngine,
    connector_type: &'static str,
    database: String,
}

impl QuerySource {
    /// Create a query source. `database` is reported in every row event.
    pub fn new(
        base: SourceBase,
        engine: QueryEngine,
        connector_type: &'static str,
        database: impl Into<String>,
    ) -> Self {
        Self {
            base,
            engine,
            connector_type,
            database: database.into(),
        }
    }

    /// Shared lifecycle state
    pub fn base(&self) -> &SourceBase {
        &self.base
    }

    /// Underlying engine
    pub fn engine(&self) -> &QueryEngine {
        &self.engine
    }

    /// Database name reported in row events
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Execute `sql` and emit its rows. Returns the number of rows emitted.
    ///
    /// Only a source past its handshake (`Running` or `Unhealthy`) runs
    /// statements; before that its offsets are not yet known.
    pub async fn run_query(&self, sql: &str) -> ConnectorResult<u64> {
        match self.base.status() {
            SourceStatus::Running | SourceStatus::Unhealthy => {}
            SourceStatus::Stopped => return Err(ConnectorError::Stopped),
            other => {
                return Err(ConnectorError::State(format!(
                    "source '{}' cannot run queries while {}",
                    self.base.name(),
                    other
                )))
            }
        }

        let rows = self.engine.query(sql).await?;
        let mut emitted = 0;
        for row in rows {
            let event = Event::row(
                self.connector_type,
                self.base.agent(),
                self.database.as_str(),
                row.to_json_map(),
            );
            self.base.emit(event).await?;
            emitted += 1;
        }

        info!(
            source = %self.base.name(),
            rows = emitted,
            offset = self.base.offset(),
            "Query executed"
        );
        Ok(emitted)
    }
}

#[async_trait]
impl Source for QuerySource {
    fn name(&self) -> &str {
        self.base.name()
    }

    fn connector_type(&self) -> &'static str {
        self.connector_type
    }

    fn is_enabled(&self) -> bool {
        self.base.is_enabled()
    }

    async fn init(&self) -> ConnectorResult<()> {
        self.base.begin();
        if let Err(e) = self.engine.query_schema().await {
            error!(source = %self.base.name(), error = %e, "Schema snapshot failed");
            return Err(e);
        }
        Ok(())
    }

    async fn start(&self) -> ConnectorResult<()> {
        self.base.wait_for_meta().await?;
        info!(
            source = %self.base.name(),
            dialect = self.engine.dialect().name(),
            database = %self.database,
            "Query source ready"
        );
        Ok(())
    }

    async fn stop(&self) -> ConnectorResult<()> {
        self.base.stop();
        Ok(())
    }

    async fn handle(&self, action: Action) -> ConnectorResult<()> {
        match action {
            Action::SourceMeta(meta) => self.base.apply_meta(&meta),
            Action::SourceQuery(request) => self.run_query(&request.query).await.map(|_| ()),
        }
    }

    async fn status(&self) -> SourceStatus {
        if matches!(
            self.base.status(),
            SourceStatus::Running | SourceStatus::Unhealthy
        ) {
            let reachable = self.engine.probe().await;
            self.base.record_probe(reachable);
        }
        self.base.status()
    }

    async fn health_check(&self) -> bool {
        self.status().await == SourceStatus::Running
    }

    fn meta(&self) -> Map<String, Value> {
        self.base.meta()
    }

    fn schema(&self) -> Value {
        self.engine
            .snapshot()
            .and_then(|snapshot| serde_json::to_value(snapshot).ok())
            .unwrap_or(Value::Null)
    }

    fn available_actions(&self) -> BTreeMap<String, ActionDescription> {
        let mut actions = BTreeMap::new();
        actions.insert(SOURCE_QUERY.to_string(), ActionDescription::source_query());
        actions
    }

    fn take_output(&self) -> Option<mpsc::Receiver<Event>> {
        self.base.take_output()
    }
}
