//! # tributary-rdbc
//!
//! Relational database connectivity for the tributary ingestion agent.
//!
//! This crate provides a small, driver-neutral interface over MySQL and
//! PostgreSQL: open a connection, probe it, run a statement and get back
//! ordered rows of typed values. Each database contributes a dialect that
//! knows how to build its connection string and how to read its catalog.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tributary_rdbc::prelude::*;
//!
//! let dialect = MySqlDialect;
//! let url = dialect.connection_string(&ConnectParams {
//!     host: "localhost".into(),
//!     port: 3306,
//!     user: "agent".into(),
//!     password: "secret".into(),
//!     database: Some("shop".into()),
//!     sslmode: None,
//! })?;
//!
//! let factory = factory_for(dialect.database_type())?;
//! let conn = factory.connect(&ConnectionConfig::new(url)).await?;
//! conn.ping().await?;
//!
//! let rows = conn.query(&dialect.catalog_query(&[])).await?;
//! let snapshot = SchemaSnapshot::from_rows(&rows)?;
//! conn.close().await?;
//! ```
//!
//! ## Feature Flags
//!
//! - `postgres` - PostgreSQL support via tokio-postgres
//! - `mysql` - MySQL/MariaDB support via mysql_async
//! - `full` - All features enabled

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod connection;
pub mod dialect;
pub mod error;
pub mod schema;
pub mod types;

// Backend implementations (conditionally compiled)
#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "mysql")]
pub mod mysql;

use std::sync::Arc;

pub use error::{Error, Result};
pub use types::{Row, Value};

use crate::connection::{ConnectionFactory, DatabaseType};

/// Get the connection factory for a database type.
///
/// Fails with a configuration error when the backend was compiled out.
pub fn factory_for(database_type: DatabaseType) -> error::Result<Arc<dyn ConnectionFactory>> {
    match database_type {
        #[cfg(feature = "mysql")]
        DatabaseType::MySQL => Ok(Arc::new(mysql::MySqlConnectionFactory::new())),
        #[cfg(feature = "postgres")]
        DatabaseType::PostgreSQL => Ok(Arc::new(postgres::PgConnectionFactory)),
        #[allow(unreachable_patterns)]
        other => Err(error::Error::config(format!(
            "{} support is not enabled in this build",
            other
        ))),
    }
}

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Core types
    pub use crate::types::{Row, Value};

    // Connection traits
    pub use crate::connection::{
        redact_url, Connection, ConnectionConfig, ConnectionFactory, DatabaseType,
    };

    // Dialects
    pub use crate::dialect::{
        quote_literal, ConnectParams, MySqlDialect, PostgresDialect, SqlDialect,
    };

    // Catalog
    pub use crate::schema::{ColumnDescriptor, SchemaSnapshot};

    pub use crate::factory_for;

    #[cfg(feature = "mysql")]
    pub use crate::mysql::{MySqlConnection, MySqlConnectionFactory};

    #[cfg(feature = "postgres")]
    pub use crate::postgres::{PgConnection, PgConnectionFactory};
}

#[cfg(test)]
mod tests {
    use super::prelude::*;

    #[test]
    fn test_value_creation() {
        let v = Value::from(42_i32);
        assert!(!v.is_null());
        assert_eq!(v.as_i64(), Some(42));

        let v = Value::from("hello");
        assert_eq!(v.as_str(), Some("hello"));
    }

    #[test]
    fn test_factory_matches_database_type() {
        for db in [DatabaseType::MySQL, DatabaseType::PostgreSQL] {
            let factory = factory_for(db).unwrap();
            assert_eq!(factory.database_type(), db);
        }
    }

    #[test]
    fn test_dialect_database_types() {
        assert_eq!(PostgresDialect.name(), "PostgreSQL");
        assert_eq!(PostgresDialect.database_type(), DatabaseType::PostgreSQL);
        assert_eq!(MySqlDialect.name(), "MySQL");
        assert_eq!(MySqlDialect.database_type(), DatabaseType::MySQL);
    }
}
