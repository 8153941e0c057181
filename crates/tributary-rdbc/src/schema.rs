//! Catalog introspection model
//!
//! A `SchemaSnapshot` is the column-level result of one catalog query. It
//! is built once and never kept in sync with the live database.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Error, Result};
use crate::types::{Row, Value};

/// Number of columns every dialect's catalog query must project, in order.
pub const CATALOG_COLUMN_COUNT: usize = 12;

/// One column as described by the database catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[allow(missing_docs)]
pub struct ColumnDescriptor {
    pub catalog: String,
    pub schema: String,
    pub table: String,
    pub column: String,
    pub ordinal_position: u32,
    pub nullable: bool,
    pub data_type: String,
    pub char_max_length: Option<u64>,
    pub numeric_precision: Option<u64>,
    pub numeric_scale: Option<u64>,
    pub column_type: String,
    pub column_key: String,
}

impl ColumnDescriptor {
    /// Build a descriptor from one catalog row.
    ///
    /// Columns are read by position so that upper-case (MySQL) and
    /// lower-case (PostgreSQL) catalog column names both work.
    pub fn from_row(row: &Row) -> Result<Self> {
        if row.len() < CATALOG_COLUMN_COUNT {
            return Err(Error::schema(format!(
                "catalog row has {} columns, expected {}",
                row.len(),
                CATALOG_COLUMN_COUNT
            )));
        }

        let text = |idx: usize| -> String {
            row.get(idx)
                .and_then(Value::as_string)
                .unwrap_or_default()
        };
        let number = |idx: usize| -> Option<u64> {
            row.get(idx)
                .and_then(Value::as_i64)
                .and_then(|n| u64::try_from(n).ok())
        };

        let ordinal_position = number(4)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| Error::schema("catalog row without ordinal position"))?;

        Ok(Self {
            catalog: text(0),
            schema: text(1),
            table: text(2),
            column: text(3),
            ordinal_position,
            nullable: row.get(5).and_then(Value::as_bool).unwrap_or(false),
            data_type: text(6),
            char_max_length: number(7),
            numeric_precision: number(8),
            numeric_scale: number(9),
            column_type: text(10),
            column_key: text(11),
        })
    }

    /// Whether the catalog flags this column as primary key member
    pub fn is_primary_key(&self) -> bool {
        self.column_key == "PRI"
    }

    /// `schema.table`
    pub fn qualified_table(&self) -> String {
        format!("{}.{}", self.schema, self.table)
    }
}

/// Ordered column descriptors from one catalog query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaSnapshot {
    columns: Vec<ColumnDescriptor>,
}

impl SchemaSnapshot {
    /// Create a snapshot from descriptors, keeping their order
    pub fn new(columns: Vec<ColumnDescriptor>) -> Self {
        Self { columns }
    }

    /// Materialize a snapshot from catalog rows
    pub fn from_rows(rows: &[Row]) -> Result<Self> {
        rows.iter()
            .map(ColumnDescriptor::from_row)
            .collect::<Result<Vec<_>>>()
            .map(Self::new)
    }

    /// Descriptors in catalog order
    pub fn columns(&self) -> &[ColumnDescriptor] {
        &self.columns
    }

    /// Number of column descriptors
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Whether the catalog returned no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Distinct schema names present in the snapshot
    pub fn schemas(&self) -> BTreeSet<&str> {
        self.columns.iter().map(|c| c.schema.as_str()).collect()
    }

    /// Distinct `schema.table` names present in the snapshot
    pub fn tables(&self) -> BTreeSet<String> {
        self.columns.iter().map(ColumnDescriptor::qualified_table).collect()
    }

    /// Columns of one table in catalog order
    pub fn table_columns<'a>(
        &'a self,
        schema: &'a str,
        table: &'a str,
    ) -> impl Iterator<Item = &'a ColumnDescriptor> + 'a {
        self.columns
            .iter()
            .filter(move |c| c.schema == schema && c.table == table)
    }
}
