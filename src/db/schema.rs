//! Schema introspection module.
//!
//! Table metadata is read live from the system catalogs on every call.
//!
//! # Architecture
//!
//! SQL queries are organized in the `queries` submodule with constants for
//! each database type. Catalog lookups always bind the schema and table names
//! as parameters; only the sample-row query embeds them, and only after
//! [`quote_identifier`].

use serde_json::{Map, Value as JsonValue};

use crate::db::pool::ConnectionHandle;
use crate::error::{DbError, DbResult};
use crate::models::{
    ColumnDefinition, DatabaseType, QueryParam, SAMPLE_ROW_LIMIT, TableDetail, TableIdentity,
    TableSchema,
};

// =============================================================================
// SQL Query Templates
// =============================================================================

mod queries {
    pub mod postgres {
        pub const LIST_TABLES: &str = r#"
            SELECT
                table_schema::text AS table_schema,
                table_name::text AS table_name
            FROM information_schema.tables
            WHERE table_type = 'BASE TABLE'
            AND table_schema NOT IN ('pg_catalog', 'information_schema')
            AND table_schema NOT LIKE 'pg\_toast%'
            AND table_schema NOT LIKE 'pg\_temp%'
            ORDER BY 1, 2
            "#;

        pub const TABLE_EXISTS: &str = r#"
            SELECT 1 AS found
            FROM information_schema.tables
            WHERE table_schema = $1
            AND table_name = $2
            AND table_type IN ('BASE TABLE', 'VIEW')
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
            SELECT
                column_name::text AS column_name,
                (CASE
                    WHEN data_type IN ('USER-DEFINED', 'ARRAY') THEN udt_name
                    ELSE data_type
                END)::text AS data_type,
                (is_nullable = 'YES') AS is_nullable,
                column_default::text AS column_default
            FROM information_schema.columns
            WHERE table_schema = $1
            AND table_name = $2
            ORDER BY ordinal_position
            "#;
    }

    pub mod sqlite {
        pub const LIST_TABLES: &str = r#"
            SELECT schema AS table_schema, name AS table_name
            FROM pragma_table_list
            WHERE type = 'table'
            AND schema <> 'temp'
            AND name NOT LIKE 'sqlite\_%' ESCAPE '\'
            ORDER BY schema, name
            "#;

        pub const TABLE_EXISTS: &str = r#"
            SELECT 1 AS found
            FROM pragma_table_list
            WHERE schema = ?1
            AND name = ?2
            AND type IN ('table', 'view')
            "#;

        pub const DESCRIBE_COLUMNS: &str = r#"
            SELECT
                name AS column_name,
                type AS data_type,
                "notnull" = 0 AS is_nullable,
                dflt_value AS column_default
            FROM pragma_table_info(?2, ?1)
            ORDER BY cid
            "#;
    }
}

struct CatalogQueries {
    list_tables: &'static str,
    table_exists: &'static str,
    describe_columns: &'static str,
}

fn catalog(db_type: DatabaseType) -> CatalogQueries {
    match db_type {
        DatabaseType::PostgreSQL => CatalogQueries {
            list_tables: queries::postgres::LIST_TABLES,
            table_exists: queries::postgres::TABLE_EXISTS,
            describe_columns: queries::postgres::DESCRIBE_COLUMNS,
        },
        DatabaseType::SQLite => CatalogQueries {
            list_tables: queries::sqlite::LIST_TABLES,
            table_exists: queries::sqlite::TABLE_EXISTS,
            describe_columns: queries::sqlite::DESCRIBE_COLUMNS,
        },
    }
}

/// Quote an identifier for direct inclusion in SQL text.
///
/// Wraps the name in double quotes and doubles any embedded quote, so the
/// result always names exactly one object. Empty names and names containing
/// NUL are rejected.
///
/// ```
/// use pg_mcp_server::db::schema::quote_identifier;
///
/// assert_eq!(quote_identifier("users").unwrap(), "\"users\"");
/// assert_eq!(quote_identifier("a\"b").unwrap(), "\"a\"\"b\"");
/// ```
pub fn quote_identifier(name: &str) -> DbResult<String> {
    if name.is_empty() {
        return Err(DbError::query_validation("identifier must not be empty"));
    }
    if name.contains('\0') {
        return Err(DbError::query_validation(
            "identifier must not contain NUL characters",
        ));
    }
    Ok(format!("\"{}\"", name.replace('"', "\"\"")))
}

/// List user base tables on a leased connection.
pub(crate) async fn list_tables(
    handle: &mut ConnectionHandle,
) -> Result<Vec<TableIdentity>, sqlx::Error> {
    let queries = catalog(handle.db_type());
    let result = handle.fetch(queries.list_tables, &[]).await?;

    result
        .rows
        .iter()
        .map(|row| {
            Ok(TableIdentity::new(
                text_field(row, "table_schema")?,
                text_field(row, "table_name")?,
            ))
        })
        .collect()
}

/// Columns and sample rows of `identity`, or `None` when it does not exist.
///
/// `relation` must be the quoted form of `identity`.
pub(crate) async fn table_detail(
    handle: &mut ConnectionHandle,
    identity: &TableIdentity,
    relation: &str,
) -> Result<Option<TableDetail>, sqlx::Error> {
    let queries = catalog(handle.db_type());
    let params = [
        QueryParam::from(identity.schema.as_str()),
        QueryParam::from(identity.table.as_str()),
    ];

    let exists = handle.fetch(queries.table_exists, &params).await?;
    if exists.is_empty() {
        return Ok(None);
    }

    let columns = handle
        .fetch(queries.describe_columns, &params)
        .await?
        .rows
        .iter()
        .map(parse_column)
        .collect::<Result<Vec<_>, _>>()?;

    let sample_sql = format!("SELECT * FROM {} LIMIT {}", relation, SAMPLE_ROW_LIMIT);
    let sample_rows = handle.fetch(&sample_sql, &[]).await?.rows;

    Ok(Some(TableDetail {
        schema: TableSchema::new(identity.clone(), columns),
        sample_rows,
    }))
}

fn parse_column(row: &Map<String, JsonValue>) -> Result<ColumnDefinition, sqlx::Error> {
    let mut column = ColumnDefinition::new(
        text_field(row, "column_name")?,
        text_field(row, "data_type")?,
        row.get("is_nullable").is_some_and(is_truthy),
    );
    if let Some(default) = row.get("column_default").and_then(JsonValue::as_str) {
        column = column.with_default(default);
    }
    Ok(column)
}

fn text_field(row: &Map<String, JsonValue>, column: &str) -> Result<String, sqlx::Error> {
    match row.get(column) {
        Some(JsonValue::String(s)) => Ok(s.clone()),
        Some(JsonValue::Null) | None => Err(sqlx::Error::ColumnNotFound(column.to_string())),
        Some(other) => Ok(other.to_string()),
    }
}

/// Booleans arrive as JSON bools from PostgreSQL and as integers from SQLite.
fn is_truthy(value: &JsonValue) -> bool {
    match value {
        JsonValue::Bool(b) => *b,
        JsonValue::Number(n) => n.as_i64().is_some_and(|n| n != 0),
        JsonValue::String(s) => matches!(s.as_str(), "t" | "true" | "YES" | "1"),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_quote_identifier() {
        assert_eq!(quote_identifier("users").unwrap(), "\"users\"");
        assert_eq!(quote_identifier("Mixed Case").unwrap(), "\"Mixed Case\"");
        assert_eq!(
            quote_identifier("x\"; DROP TABLE users; --").unwrap(),
            "\"x\"\"; DROP TABLE users; --\""
        );
    }

    #[test]
    fn test_quote_identifier_rejects_nul_and_empty() {
        assert!(matches!(
            quote_identifier("bad\0name"),
            Err(DbError::QueryValidation { .. })
        ));
        assert!(matches!(
            quote_identifier(""),
            Err(DbError::QueryValidation { .. })
        ));
    }

    #[test]
    fn test_parse_column_postgres_row() {
        let row = json!({
            "column_name": "id",
            "data_type": "integer",
            "is_nullable": false,
            "column_default": "nextval('users_id_seq'::regclass)"
        });
        let column = parse_column(row.as_object().unwrap()).unwrap();
        assert_eq!(column.name, "id");
        assert!(!column.nullable);
        assert_eq!(
            column.default_value.as_deref(),
            Some("nextval('users_id_seq'::regclass)")
        );
    }

    #[test]
    fn test_parse_column_sqlite_row() {
        let row = json!({
            "column_name": "title",
            "data_type": "TEXT",
            "is_nullable": 1,
            "column_default": null
        });
        let column = parse_column(row.as_object().unwrap()).unwrap();
        assert!(column.nullable);
        assert!(column.default_value.is_none());
    }

    #[test]
    fn test_missing_column_is_an_error() {
        let row = json!({ "data_type": "TEXT" });
        assert!(parse_column(row.as_object().unwrap()).is_err());
    }
}
