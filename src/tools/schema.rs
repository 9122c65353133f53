//! Schema introspection tools.
//!
//! This module implements the `list_tables` and `get_table_detail` MCP tools
//! and the `table://{schema}/{table}` resource that mirrors the latter.

use std::sync::Arc;

use percent_encoding::{AsciiSet, NON_ALPHANUMERIC, percent_decode_str, utf8_percent_encode};
use schemars::JsonSchema;
use serde::Deserialize;
use tracing::info;

use crate::db::ConnectionManager;
use crate::error::{DbError, DbResult};
use crate::models::{TableDetail, TableIdentity};

/// URI scheme of table resources.
pub const TABLE_URI_PREFIX: &str = "table://";

/// Everything outside the RFC 3986 unreserved set is escaped, `/` and `%` included.
const URI_COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Input for the get_table_detail tool.
#[derive(Debug, Clone, Deserialize, JsonSchema)]
pub struct GetTableDetailInput {
    /// Schema containing the table, e.g. "public" (PostgreSQL) or "main" (SQLite)
    pub schema: String,
    /// Table or view name, exactly as listed by list_tables
    pub table: String,
}

/// Resource URI for a table. Both names are percent-encoded.
pub fn table_uri(identity: &TableIdentity) -> String {
    format!(
        "{}{}/{}",
        TABLE_URI_PREFIX,
        utf8_percent_encode(&identity.schema, URI_COMPONENT),
        utf8_percent_encode(&identity.table, URI_COMPONENT)
    )
}

/// Parse `table://{schema}/{table}` and percent-decode both names.
///
/// The schema ends at the first literal `/`; a `/` inside a name arrives as `%2F`.
pub fn parse_table_uri(uri: &str) -> DbResult<TableIdentity> {
    let rest = uri.strip_prefix(TABLE_URI_PREFIX).ok_or_else(|| {
        DbError::query_validation(format!(
            "unsupported resource URI '{}': expected table://{{schema}}/{{table}}",
            uri
        ))
    })?;

    match rest.split_once('/') {
        Some((schema, table)) if !schema.is_empty() && !table.is_empty() => Ok(
            TableIdentity::new(decode_component(uri, schema)?, decode_component(uri, table)?),
        ),
        _ => Err(DbError::query_validation(format!(
            "malformed resource URI '{}': expected table://{{schema}}/{{table}}",
            uri
        ))),
    }
}

fn decode_component(uri: &str, component: &str) -> DbResult<String> {
    percent_decode_str(component)
        .decode_utf8()
        .map(|name| name.into_owned())
        .map_err(|_| {
            DbError::query_validation(format!(
                "malformed resource URI '{}': names must be UTF-8 after percent-decoding",
                uri
            ))
        })
}

/// Handler for schema tools.
pub struct SchemaToolHandler {
    connection_manager: Arc<ConnectionManager>,
}

impl SchemaToolHandler {
    pub fn new(connection_manager: Arc<ConnectionManager>) -> Self {
        Self { connection_manager }
    }

    /// List user tables ordered by schema, then name.
    pub async fn list_tables(&self) -> DbResult<Vec<TableIdentity>> {
        let tables = self.connection_manager.list_tables().await?;
        info!(count = tables.len(), "Tables listed");
        Ok(tables)
    }

    pub async fn get_table_detail(&self, input: GetTableDetailInput) -> DbResult<TableDetail> {
        if input.schema.trim().is_empty() || input.table.trim().is_empty() {
            return Err(DbError::query_validation(
                "schema and table must not be empty",
            ));
        }

        let detail = self
            .connection_manager
            .get_table_detail(&input.schema, &input.table)
            .await?;

        info!(
            table = %detail.schema.identity,
            columns = detail.schema.columns.len(),
            sample_rows = detail.sample_rows.len(),
            "Table detail fetched"
        );
        Ok(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_uri_round_trip() {
        let identity = TableIdentity::new("public", "issues");
        let uri = table_uri(&identity);
        assert_eq!(uri, "table://public/issues");
        assert_eq!(parse_table_uri(&uri).unwrap(), identity);
    }

    #[test]
    fn test_table_uri_escapes_reserved_characters() {
        for (schema, table) in [
            ("a/b", "c"),
            ("sales", "q1/q2"),
            ("100%", "odd name"),
            ("ünï", "t#1?x"),
        ] {
            let identity = TableIdentity::new(schema, table);
            let uri = table_uri(&identity);
            let (encoded_schema, _) = uri
                .strip_prefix(TABLE_URI_PREFIX)
                .and_then(|rest| rest.split_once('/'))
                .unwrap();
            assert!(!encoded_schema.contains('/'), "{uri}");
            assert_eq!(parse_table_uri(&uri).unwrap(), identity, "{uri}");
        }
        assert_eq!(
            table_uri(&TableIdentity::new("a/b", "100% done")),
            "table://a%2Fb/100%25%20done"
        );
    }

    #[test]
    fn test_parse_table_uri_rejects_invalid_utf8() {
        assert!(parse_table_uri("table://main/%FF").is_err());
    }

    #[test]
    fn test_parse_table_uri_splits_on_first_slash() {
        let identity = parse_table_uri("table://main/odd/name").unwrap();
        assert_eq!(identity.schema, "main");
        assert_eq!(identity.table, "odd/name");
    }

    #[test]
    fn test_parse_table_uri_rejects_malformed() {
        assert!(parse_table_uri("file:///etc/passwd").is_err());
        assert!(parse_table_uri("table://public").is_err());
        assert!(parse_table_uri("table:///users").is_err());
        assert!(parse_table_uri("table://public/").is_err());
    }

    #[test]
    fn test_get_table_detail_input() {
        let input: GetTableDetailInput =
            serde_json::from_str(r#"{ "schema": "public", "table": "users" }"#).unwrap();
        assert_eq!(input.schema, "public");
        assert!(serde_json::from_str::<GetTableDetailInput>(r#"{ "table": "users" }"#).is_err());
    }
}
