//! Data models for the PostgreSQL MCP server.
//!
//! This module re-exports all model types used throughout the application.

pub mod connection;
pub mod query;
pub mod schema;

// Re-export commonly used types
pub use connection::{DatabaseType, PoolState};
pub use query::{BoundStatement, DEFAULT_ROW_LIMIT, MAX_ROW_LIMIT, QueryParam, QueryResult};
pub use schema::{ColumnDefinition, SAMPLE_ROW_LIMIT, TableDetail, TableIdentity, TableSchema};
