//! PostgreSQL backend implementation for tributary-rdbc
//!
//! Connections are opened with `tokio-postgres` over plain TCP (`NoTls`).
//! A configured `sslmode=require` therefore fails at connect time.
//!
//! Statements are prepared first. When every result column has a binary
//! decoder the rows are read typed; otherwise the statement runs over the
//! simple query protocol and values are parsed back from the server's text.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_postgres::types::{FromSql, Type};
use tokio_postgres::SimpleQueryMessage;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory, DatabaseType};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// SQLSTATE class 28: invalid authorization specification
const AUTH_SQLSTATE_PREFIX: &str = "28";

/// How a PostgreSQL column is decoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnKind {
    Bool,
    Char,
    Int2,
    Int4,
    Int8,
    Oid,
    Float4,
    Float8,
    Numeric,
    Bytes,
    Date,
    Time,
    Timestamp,
    TimestampTz,
    Uuid,
    Json,
    Text,
    BoolArray,
    Int2Array,
    Int4Array,
    Int8Array,
    Float8Array,
    TextArray,
    /// No binary decoder (interval, inet, money, enums, ...); read as text
    Unsupported,
}

impl ColumnKind {
    fn of(pg_type: &Type) -> Self {
        match *pg_type {
            Type::BOOL => Self::Bool,
            Type::CHAR => Self::Char,
            Type::INT2 => Self::Int2,
            Type::INT4 => Self::Int4,
            Type::INT8 => Self::Int8,
            Type::OID => Self::Oid,
            Type::FLOAT4 => Self::Float4,
            Type::FLOAT8 => Self::Float8,
            Type::NUMERIC => Self::Numeric,
            Type::BYTEA => Self::Bytes,
            Type::DATE => Self::Date,
            Type::TIME => Self::Time,
            Type::TIMESTAMP => Self::Timestamp,
            Type::TIMESTAMPTZ => Self::TimestampTz,
            Type::UUID => Self::Uuid,
            Type::JSON | Type::JSONB => Self::Json,
            Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => Self::Text,
            Type::BOOL_ARRAY => Self::BoolArray,
            Type::INT2_ARRAY => Self::Int2Array,
            Type::INT4_ARRAY => Self::Int4Array,
            Type::INT8_ARRAY => Self::Int8Array,
            Type::FLOAT8_ARRAY => Self::Float8Array,
            Type::TEXT_ARRAY | Type::VARCHAR_ARRAY => Self::TextArray,
            _ if <String as FromSql>::accepts(pg_type) => Self::Text,
            _ => Self::Unsupported,
        }
    }

    /// Interpret a value rendered by the server's text output function.
    ///
    /// Anything that does not parse for its kind is kept as the text itself.
    fn parse_text(self, text: &str) -> Value {
        let parsed = match self {
            Self::Bool => match text {
                "t" => Some(Value::Bool(true)),
                "f" => Some(Value::Bool(false)),
                _ => None,
            },
            Self::Int2 => text.parse().ok().map(Value::Int16),
            Self::Int4 => text.parse().ok().map(Value::Int32),
            Self::Int8 | Self::Oid => text.parse().ok().map(Value::Int64),
            Self::Float4 => text.parse().ok().map(Value::Float32),
            Self::Float8 => text.parse().ok().map(Value::Float64),
            Self::Numeric => Decimal::from_str(text).ok().map(Value::Decimal),
            Self::Date => chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .map(Value::Date),
            Self::Time => chrono::NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
                .ok()
                .map(Value::Time),
            Self::Timestamp => chrono::NaiveDateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f")
                .ok()
                .map(Value::DateTime),
            Self::TimestampTz => {
                chrono::DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%#z")
                    .ok()
                    .map(|dt| Value::DateTimeTz(dt.with_timezone(&chrono::Utc)))
            }
            Self::Uuid => uuid::Uuid::parse_str(text).ok().map(Value::Uuid),
            Self::Json => serde_json::from_str(text).ok().map(Value::Json),
            _ => None,
        };
        parsed.unwrap_or_else(|| Value::String(text.to_string()))
    }
}

fn read<'a, T>(row: &'a tokio_postgres::Row, idx: usize) -> Result<Option<T>>
where
    T: FromSql<'a>,
{
    row.try_get::<_, Option<T>>(idx).map_err(|e| {
        let column = &row.columns()[idx];
        Error::type_conversion(format!(
            "column '{}' of type {}: {}",
            column.name(),
            column.type_(),
            e
        ))
    })
}

fn read_array<'a, T>(row: &'a tokio_postgres::Row, idx: usize) -> Result<Option<Value>>
where
    T: FromSql<'a> + Into<serde_json::Value>,
{
    Ok(read::<Vec<Option<T>>>(row, idx)?.map(|items| {
        Value::Json(serde_json::Value::Array(
            items
                .into_iter()
                .map(|item| item.map_or(serde_json::Value::Null, Into::into))
                .collect(),
        ))
    }))
}

/// Convert one PostgreSQL column to a Value
fn pg_value_to_value(row: &tokio_postgres::Row, idx: usize, kind: ColumnKind) -> Result<Value> {
    let value = match kind {
        ColumnKind::Bool => read(row, idx)?.map(Value::Bool),
        ColumnKind::Char => read(row, idx)?.map(Value::Int8),
        ColumnKind::Int2 => read(row, idx)?.map(Value::Int16),
        ColumnKind::Int4 => read(row, idx)?.map(Value::Int32),
        ColumnKind::Int8 => read(row, idx)?.map(Value::Int64),
        ColumnKind::Oid => read::<u32>(row, idx)?.map(|n| Value::Int64(i64::from(n))),
        ColumnKind::Float4 => read(row, idx)?.map(Value::Float32),
        ColumnKind::Float8 => read(row, idx)?.map(Value::Float64),
        ColumnKind::Numeric => read(row, idx)?.map(Value::Decimal),
        ColumnKind::Bytes => read(row, idx)?.map(Value::Bytes),
        ColumnKind::Date => read(row, idx)?.map(Value::Date),
        ColumnKind::Time => read(row, idx)?.map(Value::Time),
        ColumnKind::Timestamp => read(row, idx)?.map(Value::DateTime),
        ColumnKind::TimestampTz => read(row, idx)?.map(Value::DateTimeTz),
        ColumnKind::Uuid => read(row, idx)?.map(Value::Uuid),
        ColumnKind::Json => read(row, idx)?.map(Value::Json),
        ColumnKind::Text => read(row, idx)?.map(Value::String),
        ColumnKind::BoolArray => read_array::<bool>(row, idx)?,
        ColumnKind::Int2Array => read_array::<i16>(row, idx)?,
        ColumnKind::Int4Array => read_array::<i32>(row, idx)?,
        ColumnKind::Int8Array => read_array::<i64>(row, idx)?,
        ColumnKind::Float8Array => read_array::<f64>(row, idx)?,
        ColumnKind::TextArray => read_array::<String>(row, idx)?,
        ColumnKind::Unsupported => {
            let column = &row.columns()[idx];
            return Err(Error::type_conversion(format!(
                "column '{}' of type {} has no binary decoder",
                column.name(),
                column.type_()
            )));
        }
    };
    Ok(value.unwrap_or(Value::Null))
}

fn query_error(sql: &str, e: tokio_postgres::Error) -> Error {
    let mut err = map_driver_error("query failed", e);
    if let Error::Query { sql: slot, .. } = &mut err {
        *slot = Some(sql.to_string());
    }
    err
}

fn map_driver_error(context: &str, e: tokio_postgres::Error) -> Error {
    if let Some(db) = e.as_db_error() {
        if db.code().code().starts_with(AUTH_SQLSTATE_PREFIX) {
            return Error::Authentication {
                message: format!("{}: {}", context, db.message()),
            };
        }
        return Error::Query {
            message: format!("{}: {}", context, db.message()),
            sql: None,
            source: Some(Box::new(e)),
        };
    }
    if e.is_closed() {
        return Error::connection_with_source(format!("{}: connection closed", context), e);
    }
    Error::connection_with_source(format!("{}: {}", context, e), e)
}

/// PostgreSQL connection implementation
pub struct PgConnection {
    client: tokio_postgres::Client,
    closed: AtomicBool,
}

impl PgConnection {
    /// Create a new connection from a tokio-postgres client
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self {
            client,
            closed: AtomicBool::new(false),
        }
    }

    /// Get the underlying client
    pub fn client(&self) -> &tokio_postgres::Client {
        &self.client
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) || self.client.is_closed() {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }

    /// Run a statement over the simple query protocol, which renders every
    /// column through the server's text output function
    async fn query_text(
        &self,
        sql: &str,
        columns: &[String],
        kinds: &[ColumnKind],
    ) -> Result<Vec<Row>> {
        let messages = self
            .client
            .simple_query(sql)
            .await
            .map_err(|e| query_error(sql, e))?;

        messages
            .iter()
            .filter_map(|message| match message {
                SimpleQueryMessage::Row(row) => Some(row),
                _ => None,
            })
            .map(|row| -> Result<Row> {
                let values = kinds
                    .iter()
                    .enumerate()
                    .map(|(idx, kind)| -> Result<Value> {
                        let text = row.try_get(idx).map_err(|e| {
                            Error::type_conversion(format!("column {}: {}", idx, e))
                        })?;
                        Ok(text.map_or(Value::Null, |text| kind.parse_text(text)))
                    })
                    .collect::<Result<Vec<_>>>()?;
                Ok(Row::new(columns.to_vec(), values))
            })
            .collect()
    }
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str) -> Result<Vec<Row>> {
        self.ensure_open()?;

        let statement = self
            .client
            .prepare(sql)
            .await
            .map_err(|e| query_error(sql, e))?;
        let columns: Vec<String> = statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        let kinds: Vec<ColumnKind> = statement
            .columns()
            .iter()
            .map(|c| ColumnKind::of(c.type_()))
            .collect();

        if kinds.contains(&ColumnKind::Unsupported) {
            tracing::debug!(sql = %sql, "Result has columns without a binary decoder, reading as text");
            return self.query_text(sql, &columns, &kinds).await;
        }

        let pg_rows = self
            .client
            .query(&statement, &[])
            .await
            .map_err(|e| query_error(sql, e))?;

        pg_rows
            .iter()
            .map(|pg_row| -> Result<Row> {
                let values = kinds
                    .iter()
                    .enumerate()
                    .map(|(idx, kind)| pg_value_to_value(pg_row, idx, *kind))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Row::new(columns.clone(), values))
            })
            .collect()
    }

    async fn ping(&self) -> Result<()> {
        self.ensure_open()?;
        self.client
            .simple_query("SELECT 1")
            .await
            .map(|_| ())
            .map_err(|e| map_driver_error("ping failed", e))
    }

    async fn close(&self) -> Result<()> {
        // Dropping the client ends the spawned connection task
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Clone, Copy, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut pg_config: tokio_postgres::Config = config
            .url
            .parse()
            .map_err(|e| Error::config(format!("invalid PostgreSQL connection string: {}", e)))?;
        pg_config.connect_timeout(Duration::from_millis(config.connect_timeout_ms));
        if let Some(app) = &config.application_name {
            pg_config.application_name(app);
        }

        let (client, connection) = pg_config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| map_driver_error("failed to connect", e))?;

        // Spawn the connection handler
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "PostgreSQL connection task ended with error");
            }
        });

        tracing::debug!(dbname = ?pg_config.get_dbname(), "Opened PostgreSQL connection");
        Ok(Box::new(PgConnection::new(client)))
    }

    fn database_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }
}
