//! Query-related data models.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};

/// Default cap on rows returned by the `query` tool.
pub const DEFAULT_ROW_LIMIT: u32 = 1000;

/// Upper bound accepted for the row cap.
pub const MAX_ROW_LIMIT: u32 = 10_000;

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    Null,
    Bool(bool),
    /// Stored as i64 for maximum range
    Int(i64),
    Float(f64),
    String(String),
    /// Structured value, bound as JSON (PostgreSQL) or JSON text (SQLite)
    Json(JsonValue),
}

impl QueryParam {
    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Json(_) => "json",
        }
    }
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<i64> for QueryParam {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<bool> for QueryParam {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for QueryParam {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

/// One trusted SQL statement with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundStatement {
    pub sql: String,
    pub params: Vec<QueryParam>,
}

impl BoundStatement {
    pub fn new(sql: impl Into<String>, params: Vec<QueryParam>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }
}

/// Rows returned by a statement, in result order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Map<String, JsonValue>>,
    /// Rows written by INSERT/UPDATE/DELETE (0 for plain SELECT)
    pub rows_affected: u64,
    /// More rows were available than the row cap allowed
    pub truncated: bool,
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn first_row(&self) -> Option<&Map<String, JsonValue>> {
        self.rows.first()
    }

    /// Consume the result and return its first row.
    pub fn into_first_row(self) -> Option<Map<String, JsonValue>> {
        self.rows.into_iter().next()
    }
}
