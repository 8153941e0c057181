//! Connection traits for tributary-rdbc
//!
//! Core abstractions for database connectivity:
//! - Connection: row queries, liveness probe, close
//! - ConnectionFactory: opens connections for one database type
//! - ConnectionConfig: URL plus timeouts

use async_trait::async_trait;

use crate::error::Result;
use crate::types::Row;

/// A connection to a database
#[async_trait]
pub trait Connection: Send + Sync {
    /// Run a statement and collect every row it returns
    async fn query(&self, sql: &str) -> Result<Vec<Row>>;

    /// Liveness probe; an error means the connection is dead
    async fn ping(&self) -> Result<()>;

    /// Close the connection
    async fn close(&self) -> Result<()>;
}

/// Configuration for creating connections
#[derive(Clone)]
pub struct ConnectionConfig {
    /// Connection URL or driver connection string
    pub url: String,
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Application name (shown in pg_stat_activity, etc)
    pub application_name: Option<String>,
}

impl std::fmt::Debug for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionConfig")
            .field("url", &redact_url(&self.url))
            .field("connect_timeout_ms", &self.connect_timeout_ms)
            .field("application_name", &self.application_name)
            .finish()
    }
}

/// Redact credentials from a URL or `key=value` connection string.
pub fn redact_url(raw: &str) -> String {
    if let Ok(mut parsed) = url::Url::parse(raw) {
        if parsed.password().is_some() {
            let _ = parsed.set_password(Some("***"));
        }
        return parsed.to_string();
    }

    if raw.contains('=') {
        return raw
            .split_whitespace()
            .map(|pair| {
                if pair.starts_with("password=") {
                    "password=***"
                } else {
                    pair
                }
            })
            .collect::<Vec<_>>()
            .join(" ");
    }

    "***".to_string()
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            connect_timeout_ms: 10_000,
            application_name: Some("tributary".into()),
        }
    }
}

impl ConnectionConfig {
    /// Create configuration with just a URL
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set connection timeout
    pub fn with_connect_timeout(mut self, ms: u64) -> Self {
        self.connect_timeout_ms = ms;
        self
    }

    /// Set application name
    pub fn with_application_name(mut self, name: impl Into<String>) -> Self {
        self.application_name = Some(name.into());
        self
    }
}

/// Factory for creating connections
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// Create a new connection
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>>;

    /// Get the database type
    fn database_type(&self) -> DatabaseType;
}

/// Database type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DatabaseType {
    /// PostgreSQL
    PostgreSQL,
    /// MySQL/MariaDB
    MySQL,
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::PostgreSQL => write!(f, "PostgreSQL"),
            Self::MySQL => write!(f, "MySQL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_config_builder() {
        let config = ConnectionConfig::new("postgres://localhost/test")
            .with_connect_timeout(5000)
            .with_application_name("myapp");

        assert_eq!(config.url, "postgres://localhost/test");
        assert_eq!(config.connect_timeout_ms, 5000);
        assert_eq!(config.application_name, Some("myapp".into()));
    }

    #[test]
    fn test_debug_redacts_password() {
        let config = ConnectionConfig::new("mysql://root:hunter2@db:3306/shop");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("***"));

        let config = ConnectionConfig::new("host=db port=5432 user=app password=hunter2");
        let debug = format!("{:?}", config);
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("password=***"));
    }

    #[test]
    fn test_database_type_display() {
        assert_eq!(format!("{}", DatabaseType::PostgreSQL), "PostgreSQL");
        assert_eq!(format!("{}", DatabaseType::MySQL), "MySQL");
    }
}
