//! MySQL query source
//!
//! # Example
//!
//! ```yaml
//! sources:
//!   orders-db:
//!     type: MysqlQuery
//!     config:
//!       host: db.internal
//!       port: 3306
//!       user: agent
//!       password: ${MYSQL_PASSWORD}
//!       schema: shop
//!       exclude: [tmp, audit]
//! ```

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use validator::Validate;

use tributary_rdbc::connection::{ConnectionFactory, DatabaseType};
use tributary_rdbc::dialect::{ConnectParams, MySqlDialect};

use super::lifecycle::SourceBase;
use super::query_engine::QueryEngine;
use super::query_source::QuerySource;
use super::{parse_config, Source, SourceFactory};
use crate::error::ConnectorResult;
use crate::retry::{RetryConfig, RetrySettings};
use crate::types::SensitiveString;

/// Connector type identifier
pub const MYSQL_QUERY_TYPE: &str = "MysqlQuery";

/// MySQL query source configuration
#[derive(Debug, Clone, Serialize, Deserialize, Validate, JsonSchema)]
pub struct MySqlQueryConfig {
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

    /// Default schema for statements; empty selects none
    #[serde(default)]
    pub schema: String,

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
    3306
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

impl MySqlQueryConfig {
    /// Discrete connection parameters for the dialect
    pub fn connect_params(&self) -> ConnectParams {
        ConnectParams {
            host: self.host.clone(),
            port: self.port,
            user: self.user.clone(),
            password: self.password.expose_secret().to_string(),
            database: Some(self.schema.clone()).filter(|s| !s.is_empty()),
            sslmode: None,
        }
    }

    /// Build the query engine over `factory`
    pub fn engine(&self, factory: Arc<dyn ConnectionFactory>) -> QueryEngine {
        QueryEngine::new(Box::new(MySqlDialect), self.connect_params(), factory)
            .with_retry(RetryConfig::from(&self.retry))
            .with_connect_timeout(self.connect_timeout_ms)
            .with_excluded(self.exclude.clone())
    }
}

/// Factory for MySQL query sources
#[derive(Default)]
pub struct MySqlQueryFactory {
    connections: Option<Arc<dyn ConnectionFactory>>,
}

impl MySqlQueryFactory {
    /// Use `connections` instead of the built-in MySQL driver
    pub fn with_connection_factory(connections: Arc<dyn ConnectionFactory>) -> Self {
        Self {
            connections: Some(connections),
        }
    }

    fn connections(&self) -> ConnectorResult<Arc<dyn ConnectionFactory>> {
        match &self.connections {
            Some(connections) => Ok(connections.clone()),
            None => Ok(tributary_rdbc::factory_for(DatabaseType::MySQL)?),
        }
    }
}

impl SourceFactory for MySqlQueryFactory {
    fn connector_type(&self) -> &'static str {
        MYSQL_QUERY_TYPE
    }

    fn description(&self) -> &'static str {
        "Run ad hoc statements against MySQL and emit one event per row"
    }

    fn config_schema(&self) -> serde_json::Value {
        serde_json::to_value(schemars::schema_for!(MySqlQueryConfig)).unwrap_or_default()
    }

    fn validate(&self, config: &serde_yaml::Value) -> ConnectorResult<()> {
        parse_config::<MySqlQueryConfig>(config).map(|_| ())
    }

    fn create(
        &self,
        base: SourceBase,
        config: &serde_yaml::Value,
    ) -> ConnectorResult<Arc<dyn Source>> {
        let config = parse_config::<MySqlQueryConfig>(config)?;
        let engine = config.engine(self.connections()?);
        Ok(Arc::new(QuerySource::new(
            base,
            engine,
            MYSQL_QUERY_TYPE,
            config.schema,
        )))
    }
}
