//! The query and schema tools against SQLite, in both write modes.

use std::sync::Arc;

use pg_mcp_server::config::ConnectionSettings;
use pg_mcp_server::db::ConnectionManager;
use pg_mcp_server::error::DbError;
use pg_mcp_server::tools::schema::{GetTableDetailInput, SchemaToolHandler, parse_table_uri};
use pg_mcp_server::tools::{QueryInput, QueryToolHandler};
use serde_json::json;
use tempfile::TempDir;

async fn connect(dir: &TempDir, allow_write_ops: bool) -> Arc<ConnectionManager> {
    connect_with(dir, |settings| settings.with_write_ops(allow_write_ops)).await
}

async fn connect_with(
    dir: &TempDir,
    configure: impl FnOnce(ConnectionSettings) -> ConnectionSettings,
) -> Arc<ConnectionManager> {
    let path = dir.path().join("query.db");
    let settings = ConnectionSettings::new(format!("sqlite:{}", path.display())).unwrap();
    Arc::new(ConnectionManager::connect(configure(settings)).await.unwrap())
}

fn sql(text: &str) -> QueryInput {
    QueryInput {
        sql: text.to_string(),
    }
}

#[tokio::test]
async fn test_write_mode_then_read_only_mode() {
    let dir = TempDir::new().unwrap();

    {
        let manager = connect(&dir, true).await;
        let tool = QueryToolHandler::new(manager.clone());
        tool.query(sql("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)"))
            .await
            .unwrap();
        let inserted = tool
            .query(sql("INSERT INTO users (name) VALUES ('ada'), ('grace')"))
            .await
            .unwrap();
        assert_eq!(inserted.rows_affected, 2);

        // DROP stays blocked even with writes enabled
        let err = tool.query(sql("DROP TABLE users")).await.unwrap_err();
        assert!(matches!(err, DbError::QueryValidation { .. }), "{err:?}");
        manager.close().await;
    }

    let manager = connect(&dir, false).await;
    let tool = QueryToolHandler::new(manager.clone());

    let output = tool
        .query(sql("SELECT name FROM users ORDER BY id"))
        .await
        .unwrap();
    assert_eq!(output.row_count, 2);
    assert_eq!(output.columns, ["name"]);
    assert_eq!(output.rows[1]["name"], json!("grace"));

    let err = tool
        .query(sql("DELETE FROM users"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::QueryValidation { .. }), "{err:?}");

    let err = tool
        .query(sql("SELECT 1; DELETE FROM users"))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::QueryValidation { .. }), "{err:?}");

    let count = tool.query(sql("SELECT COUNT(*) AS n FROM users")).await.unwrap();
    assert_eq!(count.rows[0]["n"], json!(2));
}

#[tokio::test]
async fn test_schema_tool_and_resource_uri() {
    let dir = TempDir::new().unwrap();
    let manager = connect(&dir, true).await;
    manager
        .execute_query("CREATE TABLE orders (id INTEGER PRIMARY KEY, total REAL)")
        .await
        .unwrap();

    let tool = SchemaToolHandler::new(manager.clone());
    let tables = tool.list_tables().await.unwrap();
    assert_eq!(tables.len(), 1);

    let identity = parse_table_uri("table://main/orders").unwrap();
    assert_eq!(identity, tables[0]);

    let detail = tool
        .get_table_detail(GetTableDetailInput {
            schema: identity.schema.clone(),
            table: identity.table.clone(),
        })
        .await
        .unwrap();
    assert_eq!(detail.schema.columns.len(), 2);
    assert!(detail.sample_rows.is_empty());

    let err = tool
        .get_table_detail(GetTableDetailInput {
            schema: "main".into(),
            table: " ".into(),
        })
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::QueryValidation { .. }), "{err:?}");
}

#[tokio::test]
async fn test_read_only_sqlite_rejects_hidden_statements() {
    let dir = TempDir::new().unwrap();
    {
        let manager = connect(&dir, true).await;
        manager
            .execute_query("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();
        manager
            .execute_query("INSERT INTO t (id) VALUES (1), (2), (3)")
            .await
            .unwrap();
        manager.close().await;
    }

    let manager = connect(&dir, false).await;
    let tool = QueryToolHandler::new(manager.clone());

    for hostile in [
        "SELECT $x$ ; DELETE FROM t; SELECT $x$",
        "/* a /* b */ ; DROP TABLE t; */ SELECT 1",
    ] {
        let err = tool.query(sql(hostile)).await.unwrap_err();
        assert!(matches!(err, DbError::QueryValidation { .. }), "{hostile}: {err:?}");
    }

    let count = tool.query(sql("SELECT COUNT(*) AS n FROM t")).await.unwrap();
    assert_eq!(count.rows[0]["n"], json!(3));
}

#[tokio::test]
async fn test_manager_refuses_statement_tails() {
    let dir = TempDir::new().unwrap();
    let manager = connect(&dir, true).await;
    manager
        .execute_query("CREATE TABLE t (id INTEGER PRIMARY KEY)")
        .await
        .unwrap();
    manager
        .execute_query("INSERT INTO t (id) VALUES (1)")
        .await
        .unwrap();

    // checked below the tool layer, whatever the write mode
    for tail in [
        "SELECT 1; DELETE FROM t",
        "SELECT $x$ ; DELETE FROM t; SELECT $x$",
        "/* a /* b */ ; DROP TABLE t; */ SELECT 1",
    ] {
        let err = manager.execute_query(tail).await.unwrap_err();
        assert!(matches!(err, DbError::QueryValidation { .. }), "{tail}: {err:?}");
    }

    let count = manager
        .execute_query("SELECT COUNT(*) AS n FROM t")
        .await
        .unwrap();
    assert_eq!(count.rows[0]["n"], json!(1));
}

#[tokio::test]
async fn test_large_result_is_truncated() {
    let dir = TempDir::new().unwrap();
    let manager = connect_with(&dir, |settings| {
        settings.with_max_rows(5).with_max_connections(1)
    })
    .await;
    let tool = QueryToolHandler::new(manager.clone());

    let output = tool
        .query(sql(
            "WITH RECURSIVE c(x) AS (SELECT 1 UNION ALL SELECT x + 1 FROM c WHERE x < 100000) \
             SELECT x FROM c",
        ))
        .await
        .unwrap();
    assert_eq!(output.row_count, 5);
    assert!(output.truncated);
    assert_eq!(output.rows[4]["x"], json!(5));

    let small = tool.query(sql("SELECT 1 AS one")).await.unwrap();
    assert_eq!(small.row_count, 1);
    assert!(!small.truncated);

    // the connection is reusable after the unread rows were dropped
    let again = tool.query(sql("SELECT 2 AS two")).await.unwrap();
    assert_eq!(again.rows[0]["two"], json!(2));
}
