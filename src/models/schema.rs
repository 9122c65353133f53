//! Schema-related data models.
//!
//! Table metadata is always read live from the catalog and never cached.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Maximum number of sample rows returned with a table detail.
pub const SAMPLE_ROW_LIMIT: u32 = 5;

/// Schema-qualified table name.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema,
)]
pub struct TableIdentity {
    /// Schema (namespace) containing the table, e.g. "public" or "main"
    pub schema: String,
    /// Table name
    pub table: String,
}

impl TableIdentity {
    pub fn new(schema: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            schema: schema.into(),
            table: table.into(),
        }
    }
}

impl std::fmt::Display for TableIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.schema, self.table)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnDefinition {
    pub name: String,
    /// Declared type as reported by the catalog (e.g. `integer`, `text`, `varchar`)
    pub data_type: String,
    pub nullable: bool,
    /// Default expression, verbatim
    pub default_value: Option<String>,
}

impl ColumnDefinition {
    /// Create a new column definition.
    pub fn new(name: impl Into<String>, data_type: impl Into<String>, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            nullable,
            default_value: None,
        }
    }

    /// Set the default expression.
    pub fn with_default(mut self, default_value: impl Into<String>) -> Self {
        self.default_value = Some(default_value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableSchema {
    #[serde(flatten)]
    pub identity: TableIdentity,
    pub columns: Vec<ColumnDefinition>,
}

impl TableSchema {
    /// Create a new table schema.
    pub fn new(identity: TableIdentity, columns: Vec<ColumnDefinition>) -> Self {
        Self { identity, columns }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDefinition> {
        self.columns.iter().find(|c| c.name == name)
    }
}

/// Table schema plus a handful of rows to show what the data looks like.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableDetail {
    #[serde(flatten)]
    pub schema: TableSchema,
    pub sample_rows: Vec<Map<String, JsonValue>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_identity_display_and_order() {
        let mut tables = vec![
            TableIdentity::new("public", "users"),
            TableIdentity::new("audit", "events"),
            TableIdentity::new("public", "accounts"),
        ];
        tables.sort();
        let names: Vec<String> = tables.iter().map(ToString::to_string).collect();
        assert_eq!(names, ["audit.events", "public.accounts", "public.users"]);
    }

    #[test]
    fn test_table_detail_serializes_flat() {
        let detail = TableDetail {
            schema: TableSchema::new(
                TableIdentity::new("public", "users"),
                vec![ColumnDefinition::new("id", "integer", false).with_default("nextval('users_id_seq'::regclass)")],
            ),
            sample_rows: vec![],
        };
        let value = serde_json::to_value(&detail).unwrap();
        assert_eq!(value["schema"], json!("public"));
        assert_eq!(value["table"], json!("users"));
        assert_eq!(value["columns"][0]["name"], json!("id"));
        assert_eq!(value["columns"][0]["nullable"], json!(false));
        assert_eq!(value["sample_rows"], json!([]));
    }

    #[test]
    fn test_column_lookup() {
        let schema = TableSchema::new(
            TableIdentity::new("main", "issues"),
            vec![ColumnDefinition::new("title", "TEXT", false)],
        );
        assert!(schema.column("title").is_some());
        assert!(schema.column("missing").is_none());
    }
}
