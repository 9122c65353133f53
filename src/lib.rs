//! PostgreSQL MCP Server Library
//!
//! This library provides MCP (Model Context Protocol) tools for AI assistants
//! to work with a PostgreSQL database: classified SQL execution, schema
//! introspection and a small issue/feature tracker. SQLite files are
//! supported as a local backend.

pub mod config;
pub mod db;
pub mod error;
pub mod mcp;
pub mod models;
pub mod tools;
pub mod transport;

pub use config::{Config, ConnectionSettings};
pub use db::ConnectionManager;
pub use error::{DbError, DbResult};
pub use mcp::DbService;
