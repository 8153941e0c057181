//! Sources
//!
//! A source attaches to one upstream producer and pushes envelope events
//! onto its output channel. Every connector shares the lifecycle in
//! [`lifecycle::SourceBase`]; relational connectors additionally share the
//! [`query_engine::QueryEngine`].
//!
//! Connectors are built by name through a [`SourceRegistry`].

pub mod action;
pub mod file_follower;
pub mod lifecycle;
#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod query_engine;
pub mod query_source;

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

pub use action::{Action, ActionDescription, Meta, QueryRequest, SOURCE_META, SOURCE_QUERY};
pub use file_follower::{FileFollower, FileFollowerConfig, FILE_FOLLOWER_TYPE};
pub use lifecycle::SourceBase;
pub use query_engine::QueryEngine;
pub use query_source::QuerySource;

use crate::error::{ConnectorError, ConnectorResult, SourceStatus};
use crate::event::Event;

/// Capability set every connector implements
#[async_trait]
pub trait Source: Send + Sync {
    /// Source name from config
    fn name(&self) -> &str;

    /// Connector type identifier, also used as event type
    fn connector_type(&self) -> &'static str;

    /// Whether the source is enabled
    fn is_enabled(&self) -> bool;

    /// One-time setup. Leaves `Created`; SQL sources take their schema
    /// snapshot here. A failed snapshot is returned but leaves the source
    /// usable.
    async fn init(&self) -> ConnectorResult<()>;

    /// Wait for the handshake (unless standalone), then begin producing
    async fn start(&self) -> ConnectorResult<()>;

    /// Stop producing; best effort
    async fn stop(&self) -> ConnectorResult<()>;

    /// Handle a decoded action
    async fn handle(&self, action: Action) -> ConnectorResult<()>;

    /// Decode a raw action and handle it
    async fn process(&self, action: &str, payload: &[u8]) -> ConnectorResult<()> {
        match Action::decode(action, payload) {
            Ok(action) => self.handle(action).await,
            Err(e @ ConnectorError::UnsupportedAction(_)) => {
                warn!(source = %self.name(), action, "Action not implemented");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Current status (SQL sources probe connectivity first)
    async fn status(&self) -> SourceStatus;

    /// True iff the source is running
    async fn health_check(&self) -> bool;

    /// `{}` before the handshake, current offsets afterwards
    fn meta(&self) -> Map<String, Value>;

    /// Schema description of the emitted data
    fn schema(&self) -> Value;

    /// Actions the controller may send besides `SourceMeta`
    fn available_actions(&self) -> BTreeMap<String, ActionDescription>;

    /// Output channel receiver; only the first call gets it
    fn take_output(&self) -> Option<mpsc::Receiver<Event>>;
}

/// Builds sources of one connector type
pub trait SourceFactory: Send + Sync {
    /// Connector type identifier this factory builds
    fn connector_type(&self) -> &'static str;

    /// One-line description for listings
    fn description(&self) -> &'static str;

    /// JSON schema of the connector config
    fn config_schema(&self) -> Value;

    /// Check a raw config without building anything
    fn validate(&self, config: &serde_yaml::Value) -> ConnectorResult<()>;

    /// Build a source around `base` from a raw config
    fn create(&self, base: SourceBase, config: &serde_yaml::Value)
        -> ConnectorResult<Arc<dyn Source>>;
}

/// Deserialize and validate a connector config
pub(crate) fn parse_config<T>(config: &serde_yaml::Value) -> ConnectorResult<T>
where
    T: serde::de::DeserializeOwned + validator::Validate,
{
    let parsed: T = serde_yaml::from_value(config.clone())
        .map_err(|e| ConnectorError::config(format!("invalid config: {}", e)))?;
    parsed
        .validate()
        .map_err(|e| ConnectorError::config(format!("invalid config: {}", e)))?;
    Ok(parsed)
}

/// Factory for the file follower
#[derive(Debug, Default)]
pub struct FileFollowerFactory;

impl SourceFactory for FileFollowerFactory {
    fn connector_type(&self) -> &'static str {
        FILE_FOLLOWER_TYPE
    }

    fn description(&self) -> &'static str {
        "Follow a growing text file and emit one event per line"
    }

    fn config_schema(&self) -> Value {
        serde_json::to_value(schemars::schema_for!(FileFollowerConfig)).unwrap_or_default()
    }

    fn validate(&self, config: &serde_yaml::Value) -> ConnectorResult<()> {
        parse_config::<FileFollowerConfig>(config).map(|_| ())
    }

    fn create(
        &self,
        base: SourceBase,
        config: &serde_yaml::Value,
    ) -> ConnectorResult<Arc<dyn Source>> {
        let config = parse_config::<FileFollowerConfig>(config)?;
        Ok(Arc::new(FileFollower::new(base, config)))
    }
}

/// Connector factories by type identifier
#[derive(Default)]
pub struct SourceRegistry {
    factories: HashMap<String, Arc<dyn SourceFactory>>,
}

impl SourceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a factory under its connector type
    pub fn register(&mut self, factory: Arc<dyn SourceFactory>) {
        self.factories
            .insert(factory.connector_type().to_string(), factory);
    }

    /// Get a factory by connector type
    pub fn get(&self, connector_type: &str) -> Option<&Arc<dyn SourceFactory>> {
        self.factories.get(connector_type)
    }

    /// Whether a connector type is registered
    pub fn contains(&self, connector_type: &str) -> bool {
        self.factories.contains_key(connector_type)
    }

    /// Registered `(type, description)` pairs, sorted by type
    pub fn list(&self) -> Vec<(&str, &'static str)> {
        let mut list: Vec<_> = self
            .factories
            .iter()
            .map(|(name, factory)| (name.as_str(), factory.description()))
            .collect();
        list.sort_unstable();
        list
    }

    /// Build a source of `connector_type` around `base`
    pub fn create(
        &self,
        connector_type: &str,
        base: SourceBase,
        config: &serde_yaml::Value,
    ) -> ConnectorResult<Arc<dyn Source>> {
        let factory = self.get(connector_type).ok_or_else(|| {
            ConnectorError::config(format!("unknown connector type '{}'", connector_type))
        })?;
        factory.create(base, config)
    }
}

/// Create a registry with every built-in connector
pub fn create_source_registry() -> SourceRegistry {
    let mut registry = SourceRegistry::new();

    registry.register(Arc::new(FileFollowerFactory));

    #[cfg(feature = "mysql")]
    registry.register(Arc::new(mysql::MySqlQueryFactory::default()));

    #[cfg(feature = "postgres")]
    registry.register(Arc::new(postgres::PostgresQueryFactory::default()));

    registry
}
