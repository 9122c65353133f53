//! MCP tool implementations.
//!
//! This module contains all database tool handlers:
//! - `query`: Execute a classified SQL statement
//! - `list_tables`: List user tables
//! - `get_table_detail`: Columns and sample rows of a table
//! - `create_issue` / `update_issue`, `create_feature` / `update_feature`: Issue and feature tracking
//! - `sql_validator`: Statement classifier gating `query`
//! - `format`: Rendering of handler results into tool and resource responses

pub mod format;
pub mod query;
pub mod schema;
pub mod sql_validator;
pub mod tracker;

pub use format::{render_resource, render_tool};
pub use query::{QueryInput, QueryOutput, QueryToolHandler};
pub use schema::{GetTableDetailInput, SchemaToolHandler};
pub use sql_validator::{Classification, classify};
pub use tracker::{
    CreateFeatureInput, CreateIssueInput, TrackerToolHandler, UpdateFeatureInput,
    UpdateIssueInput,
};
