//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Connection pool management and leasing
//! - Statement execution
//! - Schema introspection
//! - Type mappings

pub mod executor;
pub mod params;
pub mod pool;
pub mod schema;
pub mod types;

pub use pool::{ConnectionHandle, ConnectionManager, DbPool, LeasedConnection};
pub use schema::quote_identifier;
