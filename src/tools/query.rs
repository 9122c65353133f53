//! Query execution tool.
//!
//! This module implements the `query` MCP tool. Every statement passes the
//! statement classifier before it reaches the database; in read-only mode
//! writes are rejected with a clear reason.

use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::db::ConnectionManager;
use crate::error::DbResult;
use crate::models::QueryResult;
use crate::tools::sql_validator;

/// Input for the query tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct QueryInput {
    /// A single SQL statement. Only SELECT, WITH, EXPLAIN and SHOW are allowed unless write operations are enabled.
    pub sql: String,
}

/// Output from the query tool.
#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct QueryOutput {
    /// Column names in result order
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    /// Result rows as column → value maps
    pub rows: Vec<serde_json::Map<String, JsonValue>>,
    /// Number of rows returned
    pub row_count: usize,
    /// Rows written by the statement (0 for queries)
    pub rows_affected: u64,
    /// True when the result was cut off at the server's row cap
    pub truncated: bool,
    /// Query execution time in milliseconds
    pub execution_time_ms: u64,
}

impl From<QueryResult> for QueryOutput {
    fn from(result: QueryResult) -> Self {
        Self {
            row_count: result.rows.len(),
            columns: result.columns,
            rows: result.rows,
            rows_affected: result.rows_affected,
            truncated: result.truncated,
            execution_time_ms: result.execution_time_ms,
        }
    }
}

/// Handler for the query tool.
pub struct QueryToolHandler {
    connection_manager: Arc<ConnectionManager>,
}

impl QueryToolHandler {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self { connection_manager }
    }

    /// Classify the statement, then run it if allowed.
    pub async fn query(&self, input: QueryInput) -> DbResult<QueryOutput> {
        let db_type = self.connection_manager.db_type();
        let allow_write_ops = self.connection_manager.allow_write_ops();
        if let Err(e) = sql_validator::validate(&input.sql, db_type, allow_write_ops) {
            debug!(sql = %input.sql, error = %e, "Statement rejected");
            return Err(e);
        }

        let result = self.connection_manager.execute_query(&input.sql).await?;

        info!(
            row_count = result.rows.len(),
            rows_affected = result.rows_affected,
            truncated = result.truncated,
            execution_time_ms = result.execution_time_ms,
            "Query executed"
        );

        Ok(result.into())
    }
}
