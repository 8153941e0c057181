//! PostgreSQL query source
//!
//! # Example
//!
//! ```yaml
//! sources:
//!   pg:
//!     type: postgresqlQuery
//!     config:
//!       host: pg.internal
//!       user: agent
//!       password: ${PG_PASSWORD}
//!       database: app
//!       sslmode: disable
//! ```
//!
//! Connections are made without TLS; `sslmode` values other than
//! `disable`/`prefer`/`allow` fail at connect time.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use tributary_rdbc::connection::{ConnectionFactory, DatabaseType};
use tributary_rdbc::dialect::{ConnectParams, PostgresDialect};

use super::lifecycle::SourceBase;
use super::query_engine::QueryEngine;
use super::query_source::QuerySource;
use super::{parse_config, Source, SourceFactory};
use crate::error::ConnectorResult;
use crate::retry::{RetryConfig, RetrySettings};
use crate::types::SensitiveString;

/// Connector type identifier
pub const POSTGRESQL_QUERY_TYPE: &str = "postgresqlQuery";

/// PostgreSQL query source configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct PostgresQueryConfig {
    /// Server host
    #[validate(length(min = 1))]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    #[validate(range(min = 1))]
    pub port: u16,

    /// Login user
    #[validate(length(min = 1))]
    pub user: String,

    /// Login password
    #[serde(default)]
    pub password: SensitiveString,

    /// Database to connect to
    #[serde(default = "default_database")]
    #[validate(length(min = 1))]
    pub database: String,

    /// libpq `sslmode` (default `disable`)
    #[serde(default)]
    pub sslmode: Option<String>,

    /// Schemas to leave out of the catalog snapshot
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Connect retry policy
    #[serde(default)]
    #[validate(nested)]
    pub retry: RetrySettings,

    /// Connect timeout
    #[serde(default = "default_connect_timeout_ms")]
    #[validate(range(min = 100, max = 300000))]
    pub connect_timeout_ms: u64,
}

fn default_port() -> u16 {
    5432
}

fn default_database() -> String {
    "postgres".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl PostgresQueryConfig {
    /// Discrete connection parameters for the dialect
    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.expose_secret().to_string(),
            database: Some(self.database.clone()),
            sslmode: self.sslmode.clone(),
        }
    }

    /// Build the query engine over `factory`
    pub fn engine(&self, factory: Arc<dyn ConnectionFactory>) -> QueryEngine {
        QueryEngine::new(Box::new(PostgresDialect), self.connect_params(), factory)
            .with_retry(RetryConfig::from(&self.retry))
            .with_connect_timeout(self.connect_timeout_ms)
            .with_excluded(self.exclude.clone())
    }
}

/// Factory for PostgreSQL query sources
#[derive(Default)]
pub struct PostgresQueryFactory {
    connections: Option<Arc<dyn ConnectionFactory>>,
}

impl PostgresQueryFactory {
    /// Use `connections` instead of the built-in PostgreSQL driver
    pub fn with_connection_factory(connections: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            connections: Some(connections),
        }
    }

    fn connections(&self) -> ConnectorResult<Arc<dyn ConnectionFactory>> {
        match &self.connections {
            Some(connections) => Ok(connections.clone()),
            None => Ok(tributary_rdbc::factory_for(DatabaseType::PostgreSQL)?),
        }
    }
}

impl SourceFactory for PostgresQueryFactory {
    fn connector_type(&self) -> &'static str {
        POSTGRESQL_QUERY_TYPE
    }

    fn description(&self) -> &'static str {
        "Run ad hoc statements against PostgreSQL and emit one event per row"
    }

    fn config_schema(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(PostgresQueryConfig)).unwrap_or_default()
    }

    fn validate(&self, config: &serde_yaml::Value) -> ConnectorResult<()> {
        parse_config::<PostgresQueryConfig>(config).map(|_| ())
    }

    fn create(
        &self,
        base: SourceBase,
        config: &serde_yaml::Value,
    ) -> ConnectorResult<Arc<dyn Source>> {
        let config = parse_config::<PostgresQueryConfig>(config)?;
        let engine = config.engine(self.connections()?);
        Ok(Arc::new(QuerySource::new(
            base,
            engine,
            POSTGRESQL_QUERY_TYPE,
            config.database,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tributary_rdbc::dialect::SqlDialect;

    #[test]
    fn test_config_defaults() {
        let config: PostgresQueryConfig = serde_yaml::from_str("host: pg\nuser: agent").unwrap();
        assert_eq!(config.port, 5432);
        assert_eq!(config.database, "postgres");
        assert_eq!(config.sslmode, None);
        assert!(config.password.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_conninfo_from_config() {
        let config: PostgresQueryConfig = serde_yaml::from_str(
            "host: pg\nuser: agent\npassword: pw\ndatabase: app\nsslmode: prefer",
        )
        .unwrap();
        let dsn = PostgresDialect
            .connection_string(&config.connect_params())
            .unwrap();
        assert!(dsn.contains("dbname=app"));
        assert!(dsn.ends_with("sslmode=prefer"));
    }

    #[test]
    fn test_exclusions_reach_catalog_query() {
        let config: PostgresQueryConfig =
            serde_yaml::from_str("host: pg\nuser: agent\nexclude: [staging]").unwrap();
        let engine = config.engine(
            tributary_rdbc::factory_for(DatabaseType::PostgreSQL).unwrap(),
        );
        let sql = engine.dialect().catalog_query(engine.excluded());
        assert!(sql.contains("'pglogical_origin','staging'"));
    }
}
